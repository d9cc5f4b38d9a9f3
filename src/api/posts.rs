use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};

use super::form::read_upload_form;
use super::{AppState, PageQuery};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::*;

pub const POST_MAX_CHARS: usize = 2000;

fn validate_content(content: &str) -> ApiResult<()> {
    if content.chars().count() > POST_MAX_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Post content must be at most {} characters",
            POST_MAX_CHARS
        )));
    }
    Ok(())
}

/// Load a post and make sure `user_id` owns it
pub(super) fn owned_post(state: &AppState, post_id: &str, user_id: &str) -> ApiResult<Post> {
    let post = state.store.get_post(post_id)?;
    if post.user_id != user_id {
        return Err(ApiError::Forbidden("You can only modify your own posts".to_string()));
    }
    Ok(post)
}

// ==================== Posts Endpoints ====================

pub async fn list_feed(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let items = state
        .store
        .list_feed(&auth_user.user_id, query.limit(), query.offset())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let form = read_upload_form(payload, "image", state.uploads.max_bytes()).await?;
    let content = form.text("content").unwrap_or_default().trim().to_string();
    validate_content(&content)?;

    if content.is_empty() && form.image.is_none() {
        return Err(ApiError::BadRequest("A post needs content or an image".to_string()));
    }

    let image = match &form.image {
        Some(part) => Some(state.uploads.save_image(&part.data, &part.content_type)?),
        None => None,
    };

    let mut post = Post::new(auth_user.user_id.clone(), content, image);
    if let Err(e) = state.store.create_post(&mut post) {
        if let Some(path) = &post.image {
            state.uploads.remove(path);
        }
        return Err(e.into());
    }

    log::info!("User {} created post {}", auth_user.user_id, post.id);
    let item = state.store.get_feed_item(&post.id, &auth_user.user_id)?;
    Ok(HttpResponse::Created().json(ApiResponse::success(item)))
}

pub async fn get_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let item = state.store.get_feed_item(&path, &auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn update_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdatePostRequest>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Post content is required".to_string()));
    }
    validate_content(content)?;

    owned_post(&state, &id, &auth_user.user_id)?;
    state.store.update_post_content(&id, content)?;

    let item = state.store.get_feed_item(&id, &auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(item)))
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    owned_post(&state, &id, &auth_user.user_id)?;

    let removed = state.store.delete_post(&id)?;
    if let Some(image) = &removed.image {
        state.uploads.remove(image);
    }

    log::info!("User {} deleted post {}", auth_user.user_id, id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "id": id }))))
}
