use actix_web::{web, HttpResponse};

use super::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::*;

pub const COMMENT_MAX_CHARS: usize = 1000;

// ==================== Comments Endpoints ====================

pub async fn list_comments(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    state.store.get_post(&post_id)?;

    let comments = state.store.list_comments(&post_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(comments)))
}

pub async fn create_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreateCommentRequest>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Comment content is required".to_string()));
    }
    if content.chars().count() > COMMENT_MAX_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Comment must be at most {} characters",
            COMMENT_MAX_CHARS
        )));
    }

    let mut comment = Comment {
        id: String::new(),
        post_id,
        user_id: auth_user.user_id.clone(),
        content: content.to_string(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    state.store.create_comment(&mut comment)?;

    let author = state.store.get_user(&auth_user.user_id)?.summary();
    Ok(HttpResponse::Created().json(ApiResponse::success(CommentView { comment, author })))
}

/// The comment's author and the owner of the post may delete it
pub async fn delete_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let comment = state.store.get_comment(&id)?;

    if comment.user_id != auth_user.user_id {
        let post = state.store.get_post(&comment.post_id)?;
        if post.user_id != auth_user.user_id {
            return Err(ApiError::Forbidden("You cannot delete this comment".to_string()));
        }
    }

    state.store.delete_comment(&id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "id": id }))))
}

// ==================== Likes Endpoints ====================

pub async fn toggle_like(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let status = state.store.toggle_like(&auth_user.user_id, &path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}

pub async fn like_status(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let status = state.store.like_status(&auth_user.user_id, &path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}

pub async fn list_likers(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let post_id = path.into_inner();
    state.store.get_post(&post_id)?;

    let users = state.store.list_likers(&post_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(users)))
}
