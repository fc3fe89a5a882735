use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::{Result, VaultError};

/// A single requested byte range, before it is checked against the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=<start>-` or `bytes=<start>-<end>`
    From { start: u64, end: Option<u64> },
    /// `bytes=-<len>`
    Suffix(u64),
}

/// Parse a `Range` header. Only the first range of a multi-range request is
/// honored; anything unparseable yields `None` and the full file is served.
pub fn parse_range(header: &str) -> Option<ByteRange> {
    let ranges = header.trim().strip_prefix("bytes=")?;
    let first = ranges.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return end.parse().ok().map(ByteRange::Suffix);
    }
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    if matches!(end, Some(e) if e < start) {
        return None;
    }
    Some(ByteRange::From { start, end })
}

/// What the response covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPlan {
    Full { size: u64 },
    Partial { start: u64, end: u64, size: u64 },
}

impl StreamPlan {
    pub fn resolve(range: Option<ByteRange>, size: u64) -> Result<Self> {
        let (start, end) = match range {
            None => return Ok(StreamPlan::Full { size }),
            Some(ByteRange::From { start, end }) => {
                let last = size.saturating_sub(1);
                (start, end.map_or(last, |e| e.min(last)))
            }
            Some(ByteRange::Suffix(len)) => {
                if len == 0 {
                    return Err(VaultError::RangeNotSatisfiable { size });
                }
                (size.saturating_sub(len), size.saturating_sub(1))
            }
        };
        if size == 0 || start >= size {
            return Err(VaultError::RangeNotSatisfiable { size });
        }
        Ok(StreamPlan::Partial { start, end, size })
    }

    pub fn content_length(&self) -> u64 {
        match *self {
            StreamPlan::Full { size } => size,
            StreamPlan::Partial { start, end, .. } => end - start + 1,
        }
    }

    /// `Content-Range` value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        match *self {
            StreamPlan::Full { .. } => None,
            StreamPlan::Partial { start, end, size } => Some(format!("bytes {start}-{end}/{size}")),
        }
    }
}

/// An opened stored file positioned at the start of the planned range.
#[derive(Debug)]
pub struct AudioStream {
    pub plan: StreamPlan,
    pub content_type: &'static str,
    pub file: File,
}

impl AudioStream {
    /// Reader limited to exactly the planned byte count.
    pub fn into_reader(self) -> tokio::io::Take<File> {
        let len = self.plan.content_length();
        self.file.take(len)
    }
}

pub fn content_type_for(filename: &str) -> &'static str {
    match Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct StreamingGateway {
    processed_dir: PathBuf,
}

impl StreamingGateway {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    pub async fn open(&self, filename: &str, range_header: Option<&str>) -> Result<AudioStream> {
        let not_found = || VaultError::NotFound(format!("file '{filename}' not found"));
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
        {
            return Err(not_found());
        }

        let path = self.processed_dir.join(filename);
        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(VaultError::io(format!("failed to open {filename}"), e)),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(not_found());
        }

        let plan = StreamPlan::resolve(range_header.and_then(parse_range), meta.len())?;
        if let StreamPlan::Partial { start, .. } = plan {
            file.seek(SeekFrom::Start(start)).await?;
        }

        debug!(filename = %filename, plan = ?plan, "Streaming stored file");
        Ok(AudioStream {
            plan,
            content_type: content_type_for(filename),
            file,
        })
    }
}
