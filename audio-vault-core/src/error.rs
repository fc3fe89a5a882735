use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("{0}")]
    Validation(String),

    #[error("upload is incomplete, missing chunks: {}", format_missing(.0))]
    MissingChunks(Vec<u32>),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("requested range not satisfiable for {size} byte file")]
    RangeNotSatisfiable { size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool failure: {0}")]
    Tool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse status classification used by request-facing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    RangeNotSatisfiable,
    ServerError,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Validation(_) | VaultError::MissingChunks(_) => ErrorKind::BadRequest,
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::Conflict(_) => ErrorKind::Conflict,
            VaultError::RangeNotSatisfiable { .. } => ErrorKind::RangeNotSatisfiable,
            VaultError::Io(_) | VaultError::Tool(_) | VaultError::Serialization(_) => {
                ErrorKind::ServerError
            }
        }
    }

    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        VaultError::Io(std::io::Error::new(err.kind(), format!("{context}: {err}")))
    }
}

fn format_missing(missing: &[u32]) -> String {
    const SHOWN: usize = 16;
    let mut out = missing
        .iter()
        .take(SHOWN)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if missing.len() > SHOWN {
        out.push_str(&format!(" (+{} more)", missing.len() - SHOWN));
    }
    out
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, VaultError>;
