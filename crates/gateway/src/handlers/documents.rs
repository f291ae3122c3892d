//! Document handlers: multipart upload, listing, download and deletion

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::handlers::{Envelope, MessageResponse};
use crate::AppState;
use sitejo_common::{
    auth::AuthUser,
    errors::{AppError, Result},
    workflow::{DocumentView, Upload},
};

/// Default `document_type` when the form omits it
const DEFAULT_DOCUMENT_TYPE: &str = "attachment";

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            size: limit + 1,
            limit,
        }
    } else {
        AppError::InvalidFormat {
            message: err.body_text(),
        }
    }
}

/// Content type served for a stored extension
fn content_type_for(file_type: &str) -> &'static str {
    match file_type {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// File name reduced to what a quoted header parameter can carry
fn header_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect()
}

pub async fn list_documents(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<DocumentView>>> {
    let documents = state.documents.list(&auth.actor(), ticket_id).await?;
    Ok(Json(documents))
}

/// Multipart upload with a `file` part and an optional `document_type` part
pub async fn upload_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ticket_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Envelope<DocumentView>>)> {
    let limit = state.documents.max_upload_bytes();

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut document_type = DEFAULT_DOCUMENT_TYPE.to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((file_name, data.to_vec()));
            }
            Some("document_type") => {
                document_type = field.text().await.map_err(|e| multipart_error(e, limit))?;
            }
            _ => {}
        }
    }

    let (file_name, data) = file.ok_or_else(|| AppError::MissingField {
        field: "file".to_string(),
    })?;

    let document = state
        .documents
        .upload(
            &auth.actor(),
            ticket_id,
            Upload {
                file_name,
                data,
                document_type: document_type.trim().to_string(),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::new("Document uploaded successfully", document)),
    ))
}

/// Stream a stored document back as an attachment
pub async fn download_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<Response> {
    let (document, data) = state.documents.download(&auth.actor(), document_id).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        header_safe_name(&document.file_name)
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&document.file_type).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(data),
    )
        .into_response())
}

pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    state.documents.delete(&auth.actor(), document_id).await?;
    Ok(Json(MessageResponse {
        message: "Document deleted successfully",
    }))
}
