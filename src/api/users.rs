use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;

use super::form::read_upload_form;
use super::{AppState, PageQuery};
use crate::auth::{validate_username, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::store::StoreError;
use crate::uploads::{UploadError, PUBLIC_PREFIX};

pub const BIO_MAX_CHARS: usize = 500;
const SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

// ==================== Users Endpoints ====================

pub async fn list_users(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let users = state.store.list_users(query.limit(), query.offset())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn search_users(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    query: web::Query<SearchQuery>,
) -> ApiResult<HttpResponse> {
    let q = query.q.as_deref().unwrap_or_default().trim();
    if q.is_empty() {
        return Err(ApiError::BadRequest("Search query is required".to_string()));
    }

    let users = state.store.search_users(q, SEARCH_LIMIT)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}

pub async fn get_user(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user = state.store.get_user(&path)?;
    let posts_count = state.store.count_posts_by_user(&user.id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserProfile { user, posts_count })))
}

pub async fn list_user_posts(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let user = state.store.get_user(&path)?;
    let items = state
        .store
        .list_user_feed(&user.id, &auth_user.user_id, query.limit(), query.offset())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn update_profile(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> ApiResult<HttpResponse> {
    let mut user = state.store.get_user(&auth_user.user_id)?;

    if let Some(username) = body.username.as_deref().map(str::trim) {
        if !username.eq_ignore_ascii_case(&user.username) {
            validate_username(username).map_err(ApiError::BadRequest)?;
            match state.store.get_user_by_username(username) {
                Ok(other) if other.id != user.id => {
                    return Err(ApiError::Conflict("Username already taken".to_string()));
                }
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        user.username = username.to_string();
    }

    if let Some(bio) = body.bio.as_deref().map(str::trim) {
        if bio.chars().count() > BIO_MAX_CHARS {
            return Err(ApiError::BadRequest(format!(
                "Bio must be at most {} characters",
                BIO_MAX_CHARS
            )));
        }
        user.bio = bio.to_string();
    }

    state.store.update_user(&mut user)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(user)))
}

pub async fn upload_profile_picture(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let form = read_upload_form(payload, "image", state.uploads.max_bytes()).await?;
    let image = form.image.ok_or(UploadError::Empty)?;

    let mut user = state.store.get_user(&auth_user.user_id)?;
    let previous = std::mem::take(&mut user.profile_picture);
    user.profile_picture = state.uploads.save_image(&image.data, &image.content_type)?;

    if let Err(e) = state.store.update_user(&mut user) {
        state.uploads.remove(&user.profile_picture);
        return Err(e.into());
    }

    // Only pictures we stored ourselves are removed, not Google avatar URLs
    if previous.starts_with(PUBLIC_PREFIX) {
        state.uploads.remove(&previous);
    }

    log::info!("User {} updated profile picture", user.id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(user)))
}
