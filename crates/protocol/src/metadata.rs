use crate::ProtocolError;
use crate::constants::{HEADER_UPLOAD_LENGTH, HEADER_UPLOAD_NAME, HEADER_UPLOAD_OFFSET};

/// Metadata FilePond attaches to every chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Declared total file size in bytes.
    pub total_size: u64,
    /// Client-supplied file name.
    pub filename: String,
    /// Offset the client believes the chunk starts at, if sent.
    pub offset: Option<u64>,
}

impl UploadMetadata {
    /// Reads the metadata through a case-insensitive header lookup.
    ///
    /// `Upload-Length` and `Upload-Name` are required; `Upload-Offset` is
    /// optional.
    pub fn from_lookup<'a, F>(lookup: F) -> Result<Self, ProtocolError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let total_size = parse_length(lookup(HEADER_UPLOAD_LENGTH))?;

        let filename = lookup(HEADER_UPLOAD_NAME)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ProtocolError::MissingHeader(HEADER_UPLOAD_NAME))?
            .to_string();

        let offset = match lookup(HEADER_UPLOAD_OFFSET) {
            Some(raw) => Some(parse_offset(raw)?),
            None => None,
        };

        Ok(Self {
            total_size,
            filename,
            offset,
        })
    }
}

/// Parses an `Upload-Length` header value.
pub fn parse_length(raw: Option<&str>) -> Result<u64, ProtocolError> {
    let raw = raw.ok_or(ProtocolError::MissingHeader(HEADER_UPLOAD_LENGTH))?;
    parse_number(HEADER_UPLOAD_LENGTH, raw)
}

/// Parses an `Upload-Offset` header value.
pub fn parse_offset(raw: &str) -> Result<u64, ProtocolError> {
    parse_number(HEADER_UPLOAD_OFFSET, raw)
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ProtocolError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidHeader {
            name,
            value: raw.to_string(),
        })
}
