use actix_web::http::header::AUTHORIZATION;
use actix_web::{rt, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::AppState;
use crate::auth::AuthUser;
use crate::chat;
use crate::error::{ApiError, ApiResult};
use crate::models::*;

const HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

// ==================== Chat Endpoints ====================

pub async fn list_conversations(state: web::Data<AppState>, auth_user: AuthUser) -> ApiResult<HttpResponse> {
    let conversations = state.store.list_conversations(&auth_user.user_id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(conversations)))
}

pub async fn list_messages(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> ApiResult<HttpResponse> {
    let limit = query.limit.unwrap_or(HISTORY_LIMIT).clamp(1, HISTORY_LIMIT);
    let messages = state
        .store
        .list_messages_between(&auth_user.user_id, &path, limit)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(messages)))
}

pub async fn send_message(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<SendMessageRequest>,
) -> ApiResult<HttpResponse> {
    let message = chat::send_message(&state.store, &state.chat_hub, &auth_user.user_id, &body)?;
    Ok(HttpResponse::Created().json(ApiResponse::success(message)))
}

pub async fn mark_read(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let updated = chat::mark_read(&state.store, &state.chat_hub, &auth_user.user_id, &path)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({ "updated": updated }))))
}

pub async fn online_users(state: web::Data<AppState>, _auth_user: AuthUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(state.chat_hub.online_users())))
}

/// Upgrade to a chat WebSocket. Browsers cannot set headers on WebSocket
/// requests, so the access token may come as `?token=` instead.
pub async fn connect(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<ConnectQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let header_token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    let token = query
        .token
        .as_deref()
        .or(header_token)
        .ok_or_else(|| ApiError::Unauthorized("Missing access token".to_string()))?;

    let claims = state
        .auth_service
        .validate_access_token(token.trim())
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let (conn_id, outbound) = state.chat_hub.register(&claims.sub);

    rt::spawn(chat::run_session(
        state.store.clone(),
        state.chat_hub.clone(),
        claims.sub,
        conn_id,
        session,
        stream,
        outbound,
    ));

    Ok(response)
}
