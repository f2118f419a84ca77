//! Resumable chunked uploads with offset tracking and one-shot assembly.
//!
//! A transfer is reserved as an empty directory under the temp root, fed
//! byte ranges through [`TransferRegistry::append`], and assembled into a
//! single file once the declared length has been received.

mod manager;
mod recovery;
mod registry;
mod staging;
mod store;
mod validation;

pub use manager::{AppendOutcome, Assembled, ChunkManager, CleanupWarning, TransferState};
pub use recovery::RecoveryReport;
pub use registry::{SharedManager, SweepReport, TransferRegistry};
pub use staging::UploadDirs;
pub use store::{ChunkStore, StoredChunk, TransferMetadata};
pub use validation::{validate_file_name, validate_transfer_id};

/// Copy buffer used for chunk assembly and single-request uploads.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("received {received} bytes, more than the declared {total}")]
    Oversize { received: u64, total: u64 },

    #[error("assembled {copied} bytes, expected {total}")]
    SizeMismatch { copied: u64, total: u64 },

    #[error("expected chunk at offset {expected}, got {got}")]
    OffsetMismatch { expected: u64, got: u64 },

    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("transfer not active: {0}")]
    NotActive(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}
