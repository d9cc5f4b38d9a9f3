use actix_files::NamedFile;
use actix_web::{web, HttpRequest, HttpResponse};

use super::AppState;
use crate::error::{ApiError, ApiResult};

/// Serve a stored image. Legacy path shapes are repaired before lookup.
pub async fn serve_upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let tail = path.into_inner();
    let file_path = state
        .uploads
        .resolve(&tail)
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let file = NamedFile::open_async(&file_path).await.map_err(|e| {
        log::debug!("Upload {} not served: {}", file_path.display(), e);
        ApiError::NotFound("File not found".to_string())
    })?;
    Ok(file.into_response(&req))
}
