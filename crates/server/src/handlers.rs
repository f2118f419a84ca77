//! FilePond request handlers.
//!
//! One endpoint serves every action; the method and query string select it:
//!
//! - `POST` with `Upload-Length`: reserve a chunked transfer, reply with its id
//! - `POST` multipart (`file` field): store a whole file, reply with its id
//! - `PATCH ?patch=<id>`: append a chunk
//! - `HEAD ?patch=<id>`: report the next expected offset
//! - `DELETE` with the id as body: revert
//! - `GET ?restore=<id>` / `GET ?load=<id>`: download a temp / committed file
//!
//! `POST /debug/commit` with the id as body moves a finished upload to the
//! save root, the step a form submission performs in a real application.

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{TryStreamExt, stream};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

use pondrelay_protocol::constants::{
    HEADER_UPLOAD_LENGTH, HEADER_UPLOAD_OFFSET, MULTIPART_FIELD, QUERY_PATCH,
};
use pondrelay_protocol::{UploadMetadata, parse_length};
use pondrelay_transfer::{AppendOutcome, TransferError, TransferRegistry};

use crate::ServerError;

/// Chunks in flight between a multipart field and its writer.
const FIELD_CHANNEL_DEPTH: usize = 8;

/// State shared by all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub registry: Arc<TransferRegistry>,
}

/// Query keys FilePond puts on the upload endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UploadQuery {
    patch: Option<String>,
    restore: Option<String>,
    load: Option<String>,
}

pub(crate) async fn process(
    State(state): State<AppState>,
    request: Request,
) -> Result<String, ServerError> {
    if request.headers().contains_key(HEADER_UPLOAD_LENGTH) {
        let total = parse_length(header_str(request.headers(), HEADER_UPLOAD_LENGTH))?;
        let registry = Arc::clone(&state.registry);
        let id = run_blocking(move || registry.dirs().reserve()).await?;
        tracing::debug!(id = %id, total, "chunked upload allocated");
        return Ok(id);
    }

    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| ServerError::BadRequest(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(MULTIPART_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ServerError::BadRequest("file field has no file name".into()))?;

        return store_field(Arc::clone(&state.registry), filename, field).await;
    }

    Err(ServerError::BadRequest(format!(
        "no '{MULTIPART_FIELD}' form field"
    )))
}

/// Streams a multipart file field to disk without buffering it.
///
/// The field borrows the request, so its chunks are forwarded over a
/// channel to the blocking writer.
async fn store_field(
    registry: Arc<TransferRegistry>,
    filename: String,
    mut field: Field<'_>,
) -> Result<String, ServerError> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(FIELD_CHANNEL_DEPTH);
    let chunks = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let reader = SyncIoBridge::new(StreamReader::new(Box::pin(chunks)));
    let writer =
        tokio::task::spawn_blocking(move || registry.dirs().store_single(&filename, reader));

    let mut upload_error = None;
    loop {
        match field.chunk().await {
            Ok(Some(bytes)) => {
                // The writer stopped early; its result says why.
                if tx.send(Ok(bytes)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let message = e.body_text();
                let _ = tx.send(Err(io::Error::other(message.clone()))).await;
                upload_error = Some(message);
                break;
            }
        }
    }
    drop(tx);

    let stored = writer.await?;
    match upload_error {
        Some(message) => Err(ServerError::BadRequest(message)),
        None => Ok(stored?),
    }
}

pub(crate) async fn patch(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ServerError> {
    let id = required(query.patch, QUERY_PATCH)?;
    let meta = UploadMetadata::from_lookup(|name| header_str(&headers, name))?;

    let stream = body.into_data_stream().map_err(io::Error::other);
    let reader = SyncIoBridge::new(StreamReader::new(stream));
    let registry = Arc::clone(&state.registry);
    let outcome = run_blocking(move || registry.append(&id, &meta, reader)).await?;

    let offset = match outcome {
        AppendOutcome::Partial { offset } => offset,
        AppendOutcome::Complete(assembled) => assembled.size,
    };
    Ok(offset_response(offset))
}

pub(crate) async fn head(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
) -> Result<Response, ServerError> {
    let id = required(query.patch, QUERY_PATCH)?;
    resume_offset(&state, id).await
}

pub(crate) async fn fetch(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
) -> Result<Response, ServerError> {
    let registry = Arc::clone(&state.registry);

    if let Some(id) = non_empty(query.restore) {
        let path = run_blocking(move || registry.restore(&id)).await?;
        return serve_file(path).await;
    }
    if let Some(id) = non_empty(query.load) {
        let path = run_blocking(move || registry.dirs().find_committed(&id)).await?;
        return serve_file(path).await;
    }
    if let Some(id) = non_empty(query.patch) {
        return resume_offset(&state, id).await;
    }

    Err(ServerError::BadRequest(
        "expected a restore, load or patch query".into(),
    ))
}

pub(crate) async fn revert(
    State(state): State<AppState>,
    body: String,
) -> Result<StatusCode, ServerError> {
    let id = body.trim().to_string();
    if id.is_empty() {
        return Err(ServerError::BadRequest("missing transfer id in body".into()));
    }

    let registry = Arc::clone(&state.registry);
    run_blocking(move || registry.revert(&id)).await?;
    Ok(StatusCode::OK)
}

/// Confirms an upload, moving it to the save root so `?load=` can serve it.
///
/// Stands in for the form submission of the embedding application.
pub(crate) async fn commit(
    State(state): State<AppState>,
    body: String,
) -> Result<String, ServerError> {
    let id = body.trim().to_string();
    if id.is_empty() {
        return Err(ServerError::BadRequest("missing transfer id in body".into()));
    }

    let registry = Arc::clone(&state.registry);
    let committed = id.clone();
    run_blocking(move || registry.commit(&committed)).await?;
    Ok(id)
}

pub(crate) async fn temp_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ServerError> {
    let registry = Arc::clone(&state.registry);
    let ids = run_blocking(move || registry.dirs().list_temp_ids()).await?;
    Ok(Json(ids))
}

pub(crate) async fn save_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ServerError> {
    let registry = Arc::clone(&state.registry);
    let ids = run_blocking(move || registry.dirs().list_saved_ids()).await?;
    Ok(Json(ids))
}

async fn resume_offset(state: &AppState, id: String) -> Result<Response, ServerError> {
    let registry = Arc::clone(&state.registry);
    let offset = run_blocking(move || registry.offset(&id)).await?;
    Ok(offset_response(offset))
}

fn offset_response(offset: u64) -> Response {
    (StatusCode::OK, [(HEADER_UPLOAD_OFFSET, offset.to_string())]).into_response()
}

async fn serve_file(path: PathBuf) -> Result<Response, ServerError> {
    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, content_disposition(&name))
        .body(Body::from_stream(ReaderStream::new(file)))?;
    Ok(response)
}

/// Builds an `inline` disposition that survives non-ASCII file names.
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("inline; filename=\"{fallback}\"");
    if !name.is_ascii() {
        value.push_str("; filename*=UTF-8''");
        for byte in name.bytes() {
            if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
                value.push(byte as char);
            } else {
                let _ = write!(value, "%{byte:02X}");
            }
        }
    }

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

/// Runs filesystem work on the blocking pool.
async fn run_blocking<T, F>(task: F) -> Result<T, ServerError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task).await??)
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, key: &str) -> Result<String, ServerError> {
    non_empty(value).ok_or_else(|| ServerError::BadRequest(format!("missing '{key}' query")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_disposition() {
        let value = content_disposition("report 2024.pdf");
        assert_eq!(value.to_str().unwrap(), "inline; filename=\"report 2024.pdf\"");
    }

    #[test]
    fn quotes_are_replaced() {
        let value = content_disposition("say \"hi\".txt");
        assert_eq!(value.to_str().unwrap(), "inline; filename=\"say _hi_.txt\"");
    }

    #[test]
    fn unicode_disposition_adds_extended_name() {
        let value = content_disposition("café.txt");
        assert_eq!(
            value.to_str().unwrap(),
            "inline; filename=\"caf_.txt\"; filename*=UTF-8''caf%C3%A9.txt"
        );
    }

    #[test]
    fn required_rejects_blank() {
        assert!(required(Some("  ".into()), QUERY_PATCH).is_err());
        assert!(required(None, QUERY_PATCH).is_err());
        assert_eq!(required(Some("abc".into()), QUERY_PATCH).unwrap(), "abc");
    }
}
