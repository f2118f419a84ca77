//! Header names, query keys and reserved on-disk names.

/// Total size of the file, declared by the client.
pub const HEADER_UPLOAD_LENGTH: &str = "Upload-Length";

/// Display name of the file being uploaded.
pub const HEADER_UPLOAD_NAME: &str = "Upload-Name";

/// Byte offset of a chunk (request) or next expected byte (response).
pub const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";

/// Query key carrying the transfer id on PATCH and HEAD requests.
pub const QUERY_PATCH: &str = "patch";

/// Query key asking for a temporary (not yet committed) file.
pub const QUERY_RESTORE: &str = "restore";

/// Query key asking for a committed file.
pub const QUERY_LOAD: &str = "load";

/// Multipart form field used by single-request uploads.
pub const MULTIPART_FIELD: &str = "file";

/// Suffix of a stored chunk artifact (`<offset>.chunk`).
pub const CHUNK_SUFFIX: &str = ".chunk";

/// Per-transfer metadata file written on first data arrival.
pub const METADATA_FILE: &str = ".transfer.json";

/// Returns the artifact name of the chunk starting at `offset`.
pub fn chunk_file_name(offset: u64) -> String {
    format!("{offset}{CHUNK_SUFFIX}")
}

/// Parses a chunk artifact name back into its starting offset.
pub fn parse_chunk_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(CHUNK_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns `true` if `name` would collide with the transfer's own bookkeeping.
pub fn is_reserved_name(name: &str) -> bool {
    name == METADATA_FILE || parse_chunk_file_name(name).is_some()
}
