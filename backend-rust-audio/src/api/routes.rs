use std::io;

use audio_vault_core::{AssembleRequest, CatalogRecord, Job, StreamPlan, VaultError};
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use super::error::ApiError;
use super::AppState;

const STREAM_BUF_BYTES: usize = 64 * 1024;

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "Audio vault operational")
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("malformed multipart body: {}", e.body_text()))
}

pub async fn upload_chunk(
    State(vault): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file_id: Option<String> = None;
    let mut chunk_index: Option<String> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => data = Some(field.bytes().await.map_err(multipart_error)?),
            "file_id" => file_id = Some(field.text().await.map_err(multipart_error)?),
            "chunk_index" => chunk_index = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let file_id = file_id.ok_or_else(|| ApiError::bad_request("missing field 'file_id'"))?;
    let raw_index =
        chunk_index.ok_or_else(|| ApiError::bad_request("missing field 'chunk_index'"))?;
    let data = data.ok_or_else(|| ApiError::bad_request("missing field 'file'"))?;

    let index: u32 = raw_index
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("malformed chunk index '{raw_index}'")))?;

    vault.put_chunk(file_id.trim(), index, &data).await?;
    debug!(file_id = %file_id, chunk = index, bytes = data.len(), "Stored chunk");

    Ok(Json(json!({ "status": "ok", "chunk": index })))
}

pub async fn check_chunks(
    State(vault): State<AppState>,
    Path(file_id): Path<String>,
) -> Json<Value> {
    let chunks: Vec<u32> = vault.list_chunks(&file_id).await.into_iter().collect();
    Json(json!({ "chunks": chunks }))
}

pub async fn assemble(
    State(vault): State<AppState>,
    payload: Result<Json<AssembleRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let job = vault.schedule_assembly(request).await?;
    Ok(Json(json!({ "status": "processing", "job_id": job.id })))
}

pub async fn job_status(
    State(vault): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    vault
        .job_status(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(VaultError::NotFound(format!("no job with id '{id}'"))))
}

pub async fn history(State(vault): State<AppState>) -> Json<Vec<CatalogRecord>> {
    Json(vault.history().await)
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub new_name: String,
}

pub async fn rename_file(
    State(vault): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let record = vault.rename(&id, &body.new_name).await?;
    Ok(Json(json!({ "status": "ok", "new_name": record.filename })))
}

pub async fn delete_file(
    State(vault): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let remaining = vault.remove(&id).await?;
    info!(file_id = %id, remaining = remaining.len(), "Delete request completed");
    Ok(Json(json!({ "status": "ok" })))
}

/// Serves a processed file, honoring a single byte range.
pub async fn stream_audio(
    State(vault): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let stream = vault.stream(&filename, range).await?;

    let status = match stream.plan {
        StreamPlan::Partial { .. } => StatusCode::PARTIAL_CONTENT,
        StreamPlan::Full { .. } => StatusCode::OK,
    };
    let content_length = stream.plan.content_length();
    let content_range = stream.plan.content_range();
    let content_type = stream.content_type;

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(value) = content_range {
        builder = builder.header(header::CONTENT_RANGE, value);
    }

    builder
        .body(Body::from_stream(read_chunks(stream.into_reader())))
        .map_err(|e| ApiError(VaultError::Io(io::Error::new(io::ErrorKind::Other, e))))
}

fn read_chunks<R>(mut reader: R) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut buf = vec![0u8; STREAM_BUF_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}
