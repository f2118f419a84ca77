//! Wire vocabulary shared by the upload server and the transfer core.
//!
//! FilePond drives chunked uploads with three custom headers and a handful
//! of query keys; this crate names them once and parses the metadata they
//! carry.

pub mod constants;
mod metadata;

pub use metadata::{UploadMetadata, parse_length, parse_offset};

/// Errors produced while reading upload metadata from a request.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid {name} header: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}
