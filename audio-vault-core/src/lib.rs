//! audio-vault-core
//!
//! Chunked upload assembly, background audio extraction through an external
//! transcoder, and the durable catalog of produced files. The HTTP shell lives
//! in `backend-rust-audio`; everything here is usable without it.

pub mod assembler;
pub mod catalog;
pub mod chunks;
pub mod config;
pub mod deletion;
pub mod error;
pub mod jobs;
pub mod options;
pub mod pipeline;
pub mod rename;
pub mod streaming;
pub mod transcoder;
pub mod vault;

pub use catalog::{Catalog, CatalogRecord};
pub use config::VaultConfig;
pub use error::{ErrorKind, Result, VaultError};
pub use jobs::{Job, JobState};
pub use options::{ConversionOptions, ExtractionParams};
pub use streaming::{AudioStream, StreamPlan};
pub use transcoder::{FfmpegTranscoder, Transcoder};
pub use vault::{AssembleRequest, AudioVault};
