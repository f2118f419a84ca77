use std::path::{Component, Path};

use pondrelay_protocol::constants::is_reserved_name;

use crate::TransferError;

/// Parses a client-supplied transfer id and returns its canonical form.
///
/// Ids are minted as UUIDs, so anything else is rejected before it is
/// joined onto a filesystem path.
pub fn validate_transfer_id(id: &str) -> Result<String, TransferError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(TransferError::Validation("missing transfer id".into()));
    }
    uuid::Uuid::parse_str(trimmed)
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|_| TransferError::Validation(format!("malformed transfer id: {trimmed}")))
}

/// Validates that a client file name is a single, plain path component.
///
/// Rejects:
/// - Empty names
/// - Anything with a separator, `..`, a root or a Windows prefix
/// - Names that collide with chunk artifacts or the metadata file
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidPath(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(TransferError::InvalidPath(format!(
                "not a plain file name: {name}"
            )));
        }
    }

    if is_reserved_name(name) {
        return Err(TransferError::InvalidPath(format!("reserved file name: {name}")));
    }

    Ok(())
}
