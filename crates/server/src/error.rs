use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use pondrelay_protocol::ProtocolError;
use pondrelay_transfer::TransferError;

/// Errors produced while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ServerError {
    /// HTTP status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Protocol(_) => StatusCode::BAD_REQUEST,
            ServerError::Transfer(e) => match e {
                TransferError::Validation(_) | TransferError::InvalidPath(_) => {
                    StatusCode::BAD_REQUEST
                }
                TransferError::NotFound(_) => StatusCode::NOT_FOUND,
                TransferError::OffsetMismatch { .. } | TransferError::NotActive(_) => {
                    StatusCode::CONFLICT
                }
                TransferError::Oversize { .. }
                | TransferError::SizeMismatch { .. }
                | TransferError::Storage(_)
                | TransferError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Io(_) | ServerError::Http(_) | ServerError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, "request failed: {self}");
        } else {
            tracing::warn!(%status, "request rejected: {self}");
        }

        // Filesystem details stay in the log.
        let message = match &self {
            ServerError::Io(_)
            | ServerError::Http(_)
            | ServerError::Join(_)
            | ServerError::Transfer(TransferError::Storage(_))
            | ServerError::Transfer(TransferError::Metadata(_)) => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (
                ServerError::Transfer(TransferError::Validation("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::Protocol(ProtocolError::MissingHeader("Upload-Length")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::Transfer(TransferError::NotFound("id".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ServerError::Transfer(TransferError::OffsetMismatch {
                    expected: 5,
                    got: 0,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ServerError::Transfer(TransferError::Oversize {
                    received: 11,
                    total: 10,
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServerError::Transfer(TransferError::SizeMismatch {
                    copied: 8,
                    total: 10,
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[tokio::test]
    async fn storage_errors_are_not_leaked() {
        use http_body_util::BodyExt;

        let err = ServerError::Transfer(TransferError::Storage(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/var/secret/path",
        )));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"internal server error");
    }
}
