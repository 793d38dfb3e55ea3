//! HTTP handlers for the chunked upload protocol.
//! Chunk bodies are streamed straight into the staging area; nothing here
//! buffers a whole chunk in memory.

use crate::{
    errors::AppError,
    services::upload_service::{ChunkBodyError, ChunkReceipt, InitiateUpload},
    state::AppState,
};
use axum::{
    BoxError, Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use futures::TryStreamExt;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/uploads/initiate`.
#[derive(Debug, Deserialize)]
pub struct InitiateUploadReq {
    pub filename: String,
    pub total_chunks: u32,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitiateUploadResp {
    pub upload_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkResp {
    pub received: bool,
    pub index: u32,
}

impl From<ChunkReceipt> for ChunkResp {
    fn from(receipt: ChunkReceipt) -> Self {
        Self {
            received: true,
            index: receipt.index,
        }
    }
}

/// Body of `POST /api/uploads/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    pub upload_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteUploadResp {
    pub file_id: String,
    pub filename: String,
    pub size: i64,
}

/// `POST /api/uploads/initiate`
pub async fn initiate_upload(
    State(state): State<AppState>,
    Json(req): Json<InitiateUploadReq>,
) -> Result<Json<InitiateUploadResp>, AppError> {
    let session = state
        .uploads
        .initiate(InitiateUpload {
            filename: req.filename,
            total_chunks: req.total_chunks,
            mime_type: req.mime_type,
            declared_size: req.size,
        })
        .await?;

    Ok(Json(InitiateUploadResp {
        upload_id: session.id.to_string(),
    }))
}

/// `POST /api/uploads/chunk` — multipart with `upload_id`, `index`, `chunk`.
///
/// `upload_id` and `index` have to arrive before the `chunk` file part so the
/// file can be streamed to its final location as it is read.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResp>, AppError> {
    let mut upload_id: Option<String> = None;
    let mut index: Option<u32> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("upload_id") => upload_id = Some(field.text().await?),
            Some("index") => {
                let raw = field.text().await?;
                let parsed = raw
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| AppError::bad_request(format!("invalid chunk index `{}`", raw)))?;
                index = Some(parsed);
            }
            Some("chunk") => {
                let (Some(upload_id), Some(index)) = (upload_id.as_deref(), index) else {
                    return Err(AppError::bad_request(
                        "`upload_id` and `index` must precede the `chunk` field",
                    ));
                };
                let limit = state.max_chunk_bytes;
                let stream = field.map_err(move |err| multipart_body_error(err, limit).into_io());
                let receipt = state.uploads.put_chunk(upload_id, index, stream).await?;
                return Ok(Json(receipt.into()));
            }
            _ => {}
        }
    }

    Err(AppError::bad_request("missing `chunk` field"))
}

/// `PUT /api/uploads/{upload_id}/chunks/{index}` — raw request body is the chunk.
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, u32)>,
    body: Body,
) -> Result<Json<ChunkResp>, AppError> {
    let limit = state.max_chunk_bytes;
    let stream = Limited::new(body, limit)
        .into_data_stream()
        .map_err(move |err| raw_body_error(err, limit).into_io());
    let receipt = state.uploads.put_chunk(&upload_id, index, stream).await?;
    Ok(Json(receipt.into()))
}

fn raw_body_error(err: BoxError, limit: usize) -> ChunkBodyError {
    if err.is::<LengthLimitError>() {
        ChunkBodyError::TooLarge { limit }
    } else {
        ChunkBodyError::Aborted(err.to_string())
    }
}

fn multipart_body_error(err: MultipartError, limit: usize) -> ChunkBodyError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ChunkBodyError::TooLarge { limit }
    } else {
        ChunkBodyError::Aborted(err.body_text())
    }
}

/// `POST /api/uploads/complete`
pub async fn complete_upload(
    State(state): State<AppState>,
    Json(req): Json<CompleteUploadReq>,
) -> Result<Json<CompleteUploadResp>, AppError> {
    let finished = state.uploads.complete(&req.upload_id).await?;
    Ok(Json(CompleteUploadResp {
        file_id: finished.id.to_string(),
        filename: finished.filename,
        size: finished.size_bytes,
    }))
}
