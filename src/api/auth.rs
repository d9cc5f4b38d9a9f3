use actix_web::{web, HttpResponse};

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::models::*;

// ==================== Auth Endpoints ====================

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let resp = state.auth_service.register(&body)?;
    Ok(HttpResponse::Created().json(ApiResponse::success(resp)))
}

pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let resp = state.auth_service.login(&body.email, &body.password)?;
    log::info!("User {} logged in", resp.user.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success(resp)))
}

pub async fn google_login(
    state: web::Data<AppState>,
    body: web::Json<GoogleLoginRequest>,
) -> ApiResult<HttpResponse> {
    let resp = state.auth_service.login_with_google(&body.credential).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(resp)))
}

pub async fn refresh(
    state: web::Data<AppState>,
    body: web::Json<RefreshRequest>,
) -> ApiResult<HttpResponse> {
    let resp = state.auth_service.refresh(&body.refresh_token)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(resp.tokens)))
}

pub async fn logout(
    state: web::Data<AppState>,
    body: web::Json<RefreshRequest>,
) -> ApiResult<HttpResponse> {
    state.auth_service.logout(&body.refresh_token)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "loggedOut": true }))))
}

pub async fn me(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult<HttpResponse> {
    let user = state.store.get_user(&auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(user)))
}
