use super::{ApiError, ApiResult, AppState};
use crate::files::{DeleteOutcome, FileScope, StoredFileInfo};
use crate::notify::NotifyEvent;
use anyhow::Context;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    HeaderValue, StatusCode,
};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File as TokioFile;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub(crate) struct ScopeParams {
    #[serde(default)]
    scope: Option<String>,
}

impl ScopeParams {
    fn parse(&self) -> Result<FileScope, ApiError> {
        match self.scope.as_deref() {
            None => Ok(FileScope::Public),
            Some(raw) => raw.parse::<FileScope>().map_err(ApiError::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    key: String,
    url: String,
    name: String,
    size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct StoredFileResponse {
    name: String,
    size_bytes: u64,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

fn map_stored_file(state: &AppState, scope: FileScope, file: StoredFileInfo) -> StoredFileResponse {
    let url = match scope {
        FileScope::Public => Some(state.store.public_url(&file.name)),
        FileScope::Archived => None,
    };
    StoredFileResponse {
        created_at: DateTime::<Utc>::from(file.created).to_rfc3339(),
        name: file.name,
        size_bytes: file.size_bytes,
        url,
    }
}

/// Accepts a binary payload plus its client-chosen media key, stores the
/// blob, and feeds the completed upload into the hub so queued messages can
/// resolve against the new URL.
pub(crate) async fn upload_blob(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut key = None;
    let mut file_bytes = None;
    let mut filename = None;
    let mut mime = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?
    {
        match field.name() {
            Some("key") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?;
                key = Some(value);
            }
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                mime = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?;
                file_bytes = Some(bytes);
            }
            _ => {}
        }
    }

    let key = key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing key field".into()))?;
    let data = file_bytes.ok_or_else(|| ApiError::BadRequest("missing file field".into()))?;

    let saved = state
        .store
        .save_upload(data, filename.as_deref(), mime.as_deref())
        .await?;

    tracing::info!(
        key = %key,
        name = %saved.name,
        size_bytes = saved.size_bytes,
        "blob upload complete"
    );
    state.hub.on_upload_complete(&key, &saved.url).await;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key,
            url: saved.url,
            name: saved.name,
            size_bytes: saved.size_bytes,
        }),
    ))
}

/// Streams a file from the public area. Archived files are not routable.
pub(crate) async fn serve_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.store.public_path(&name)?;
    let file = match TokioFile::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("file {name} not found")));
        }
        Err(err) => {
            return Err(ApiError::Internal(
                anyhow::Error::new(err).context(format!("unable to open {}", path.display())),
            ));
        }
    };

    let size = file
        .metadata()
        .await
        .with_context(|| format!("unable to stat {}", path.display()))
        .map_err(ApiError::Internal)?
        .len();

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = Response::new(body);
    let headers = response.headers_mut();

    let content_type = std::path::Path::new(&name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webm" => "video/webm",
            "mp4" => "video/mp4",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        })
        .unwrap_or("application/octet-stream");
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

    if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    Ok(response)
}

pub(crate) async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ScopeParams>,
) -> ApiResult<Vec<StoredFileResponse>> {
    let scope = params.parse()?;
    let files = state.store.list_area(scope).await?;
    let responses = files
        .into_iter()
        .map(|file| map_stored_file(&state, scope, file))
        .collect();
    Ok(Json(responses))
}

pub(crate) async fn delete_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ScopeParams>,
) -> Result<StatusCode, ApiError> {
    let scope = params.parse()?;
    state.store.delete_one(scope, &name).await?;
    tracing::info!(name = %name, scope = scope.as_str(), "deleted stored file");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn clear_files(
    State(state): State<AppState>,
    Query(params): Query<ScopeParams>,
) -> ApiResult<Vec<DeleteOutcome>> {
    let scope = params.parse()?;
    let outcomes = state.store.delete_all(scope).await?;
    let deleted = outcomes.iter().filter(|o| o.deleted).count();
    tracing::info!(scope = scope.as_str(), deleted, "cleared stored files");
    state.notifier.notify_detached(NotifyEvent::FilesCleared {
        scope: scope.as_str().to_string(),
        deleted,
    });
    Ok(Json(outcomes))
}
