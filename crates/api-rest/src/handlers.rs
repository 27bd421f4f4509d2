use crate::auth::caller;
use crate::error::{ApiError, ErrorRes};
use crate::AppState;
use axum::{
    extract::{Multipart, Path as AxumPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use ctmark_core::{ResearchError, ResearchId, UploadedFile};
use serde::Serialize;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use utoipa::ToSchema;

/// Multipart field holding capture uploads.
const FILES_FIELD: &str = "files";

/// Multipart field holding a markup upload.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateResearchRes {
    pub research_id: String,
    pub captures_count: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint, used by monitoring and load balancers.
pub async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "ctmark REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/research",
    request_body(
        content_type = "multipart/form-data",
        description = "One or more `files` parts: capture files or a single zip archive"
    ),
    responses(
        (status = 201, description = "Research created", body = CreateResearchRes),
        (status = 400, description = "Bad request", body = ErrorRes),
        (status = 401, description = "Missing or invalid API key", body = ErrorRes),
        (status = 415, description = "No capture files in the upload", body = ErrorRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// Create a research from uploaded captures.
///
/// The research is depersonalized and previewed before the response is sent. If no upload is a
/// capture file, nothing is stored and `415` is returned.
#[axum::debug_handler]
pub async fn create_research(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateResearchRes>), ApiError> {
    let user = caller(&headers)?;
    let files = collect_files(multipart, FILES_FIELD).await?;

    let created = state.service.create_research(&user, files).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResearchRes {
            research_id: created.research_id.to_string(),
            captures_count: created.captures_count,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/research/{id}/captures/{num}",
    params(
        ("id" = String, Path, description = "Research identifier"),
        ("num" = usize, Path, description = "1-based capture number")
    ),
    responses(
        (status = 200, description = "Capture file"),
        (status = 404, description = "Research or capture not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_capture(
    State(state): State<AppState>,
    AxumPath((id, num)): AxumPath<(String, usize)>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let path = state.service.capture_path(&id, num)?;
    file_response(path, "application/dicom").await
}

#[utoipa::path(
    get,
    path = "/api/v1/research/{id}/preview",
    params(("id" = String, Path, description = "Research identifier")),
    responses(
        (status = 200, description = "Preview image"),
        (status = 404, description = "Research not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_preview(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let path = state.service.preview_path(&id)?;
    file_response(path, "image/jpeg").await
}

#[utoipa::path(
    get,
    path = "/api/v1/research/{id}/markup",
    params(("id" = String, Path, description = "Research identifier")),
    responses(
        (status = 200, description = "Markup document"),
        (status = 403, description = "Access denied", body = ErrorRes),
        (status = 404, description = "Research not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_markup(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let id = parse_id(&id)?;
    let path = state.service.markup_path(&user, &id).await?;
    file_response(path, "application/json").await
}

#[utoipa::path(
    post,
    path = "/api/v1/research/{id}/markup",
    params(("id" = String, Path, description = "Research identifier")),
    request_body(
        content_type = "multipart/form-data",
        description = "A single `file` part with a .json filename"
    ),
    responses(
        (status = 204, description = "Markup replaced"),
        (status = 403, description = "Access denied", body = ErrorRes),
        (status = 404, description = "Research not found", body = ErrorRes),
        (status = 415, description = "Not a markup file", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn upload_markup(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    let user = caller(&headers)?;
    let id = parse_id(&id)?;
    let file = collect_files(multipart, FILE_FIELD)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::BadRequest("Missing file part".into()))?;

    state.service.upload_markup(&user, &id, file).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/research/{id}/markers/{user}",
    params(
        ("id" = String, Path, description = "Research identifier"),
        ("user" = String, Path, description = "Marker to grant access to")
    ),
    responses(
        (status = 204, description = "Marker assigned"),
        (status = 403, description = "Caller does not own the research", body = ErrorRes),
        (status = 404, description = "Research not found", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn assign_marker(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath((id, marker)): AxumPath<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let user = caller(&headers)?;
    let id = parse_id(&id)?;

    state.service.assign_marker(&user, &id, &marker).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> Result<ResearchId, ApiError> {
    ResearchId::parse(raw).map_err(|e| ResearchError::from(e).into())
}

/// Spills every multipart part named `field` to disk, in request order.
///
/// Parts are copied chunk by chunk into anonymous temporary files, so request memory stays
/// bounded by the multipart chunk size whatever the upload size. The files disappear when the
/// returned uploads are dropped.
async fn collect_files(
    mut multipart: Multipart,
    field: &str,
) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(mut part) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let filename = part.file_name().unwrap_or_default().to_owned();

        let mut spool = tokio::fs::File::from_std(tempfile::tempfile().map_err(spool_error)?);
        while let Some(chunk) = part
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            spool.write_all(&chunk).await.map_err(spool_error)?;
        }
        spool.flush().await.map_err(spool_error)?;
        spool.seek(SeekFrom::Start(0)).await.map_err(spool_error)?;

        files.push(UploadedFile::new(filename, spool));
    }

    Ok(files)
}

fn spool_error(e: std::io::Error) -> ApiError {
    tracing::error!(error = %e, "failed to spool upload");
    ApiError::Internal("Internal error")
}

async fn file_response(path: PathBuf, content_type: &'static str) -> Result<Response, ApiError> {
    let body = tokio::fs::read(&path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to read research file");
        ApiError::Internal("Internal error")
    })?;
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
