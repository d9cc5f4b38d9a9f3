use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::ai::AiService;
use crate::auth::AuthService;
use crate::chat::ChatHub;
use crate::error::ApiError;
use crate::store::Store;
use crate::uploads::UploadStore;

mod ai;
mod auth;
mod chat;
mod form;
mod posts;
mod social;
mod uploads;
mod users;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const JSON_BODY_LIMIT: usize = 64 * 1024;

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub uploads: Arc<UploadStore>,
    pub chat_hub: Arc<ChatHub>,
    pub ai: AiService,
}

impl AppState {
    /// State with a fresh chat hub and no AI backend
    pub fn new(store: Arc<Store>, auth_service: Arc<AuthService>, uploads: Arc<UploadStore>) -> Self {
        Self {
            store,
            auth_service,
            uploads,
            chat_hub: Arc::new(ChatHub::new()),
            ai: AiService::default(),
        }
    }

    pub fn with_ai(mut self, ai: AiService) -> Self {
        self.ai = ai;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Malformed or oversized JSON bodies become 400 envelopes
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req| ApiError::BadRequest(format!("Invalid JSON body: {}", err)).into())
}

/// Query strings that fail to deserialize become 400 envelopes
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(format!("Invalid query: {}", err)).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(format!("Invalid path: {}", err)).into())
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        // Health check
        .route("/health", web::get().to(health))

        // Auth
        .route("/api/auth/register", web::post().to(auth::register))
        .route("/api/auth/login", web::post().to(auth::login))
        .route("/api/auth/google", web::post().to(auth::google_login))
        .route("/api/auth/refresh", web::post().to(auth::refresh))
        .route("/api/auth/logout", web::post().to(auth::logout))
        .route("/api/auth/me", web::get().to(auth::me))

        // Users ("search" and "profile" are registered before "{id}")
        .route("/api/users", web::get().to(users::list_users))
        .route("/api/users/search", web::get().to(users::search_users))
        .route("/api/users/profile", web::put().to(users::update_profile))
        .route("/api/users/profile-picture", web::post().to(users::upload_profile_picture))
        .route("/api/users/{id}", web::get().to(users::get_user))
        .route("/api/users/{id}/posts", web::get().to(users::list_user_posts))

        // Posts
        .route("/api/posts", web::get().to(posts::list_feed))
        .route("/api/posts", web::post().to(posts::create_post))
        .route("/api/posts/{id}", web::get().to(posts::get_post))
        .route("/api/posts/{id}", web::put().to(posts::update_post))
        .route("/api/posts/{id}", web::delete().to(posts::delete_post))

        // Comments
        .route("/api/comments/post/{post_id}", web::get().to(social::list_comments))
        .route("/api/comments/post/{post_id}", web::post().to(social::create_comment))
        .route("/api/comments/{id}", web::delete().to(social::delete_comment))

        // Likes
        .route("/api/likes/{post_id}", web::post().to(social::toggle_like))
        .route("/api/likes/{post_id}", web::get().to(social::like_status))
        .route("/api/likes/{post_id}/users", web::get().to(social::list_likers))

        // Chat
        .route("/api/chat/conversations", web::get().to(chat::list_conversations))
        .route("/api/chat/messages", web::post().to(chat::send_message))
        .route("/api/chat/messages/{user_id}", web::get().to(chat::list_messages))
        .route("/api/chat/messages/{user_id}/read", web::put().to(chat::mark_read))
        .route("/api/chat/online", web::get().to(chat::online_users))
        .route("/ws", web::get().to(chat::connect))

        // AI coaching
        .route("/api/ai/workout-plan", web::post().to(ai::workout_plan))
        .route("/api/ai/nutrition-advice", web::post().to(ai::nutrition_advice))

        // Uploaded images
        .route("/uploads/{tail:.*}", web::get().to(uploads::serve_upload));
}
