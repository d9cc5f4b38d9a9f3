use actix_web::{test, web, App};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use fitsocial_server::api::{self, AppState};
use fitsocial_server::auth::AuthService;
use fitsocial_server::store::Store;
use fitsocial_server::uploads::UploadStore;

/// Helper to create AppState with all required components
fn create_app_state(upload_dir: &Path) -> web::Data<AppState> {
    let store = Arc::new(Store::new(":memory:").unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string(), store.clone()));
    let uploads = Arc::new(UploadStore::new(upload_dir, 5 * 1024 * 1024).unwrap());
    web::Data::new(AppState::new(store, auth_service, uploads))
}

macro_rules! register {
    ($app:expr, $username:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "username": $username,
                "email": format!("{}@example.com", $username),
                "password": "password123"
            }))
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        resp["data"].clone()
    }};
}

// ==================== Registration Tests ====================

#[actix_web::test]
async fn test_register_success() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "gymrat",
            "email": "GymRat@Example.com",
            "password": "securepassword123"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert!(body["data"]["accessToken"].is_string());
    assert!(body["data"]["refreshToken"].is_string());
    assert_eq!(body["data"]["tokenType"], "Bearer");
    assert_eq!(body["data"]["user"]["username"], "gymrat");
    assert_eq!(body["data"]["user"]["email"], "gymrat@example.com");
    // Password should not be in response
    assert!(body["data"]["user"]["passwordHash"].is_null());
    assert!(body["data"]["user"]["password"].is_null());
}

#[actix_web::test]
async fn test_register_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    register!(app, "gymrat");

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "GYMRAT",
            "email": "other@example.com",
            "password": "password123"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "newname",
            "email": "gymrat@example.com",
            "password": "password123"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_web::test]
async fn test_register_validation() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    for body in [
        json!({"username": "ab", "email": "ab@example.com", "password": "password123"}),
        json!({"username": "has space", "email": "x@example.com", "password": "password123"}),
        json!({"username": "valid_name", "email": "not-an-email", "password": "password123"}),
        json!({"username": "valid_name", "email": "v@example.com", "password": "123"}),
    ] {
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}

#[actix_web::test]
async fn test_malformed_json_returns_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{\"username\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON body"));
}

// ==================== Login Tests ====================

#[actix_web::test]
async fn test_login_with_username_or_email() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    register!(app, "runner");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"username": "runner", "password": "password123"}))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["user"]["username"], "runner");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"email": "runner@example.com", "password": "password123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_login_invalid_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    register!(app, "runner");

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"email": "runner@example.com", "password": "wrongpassword"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({"email": "nobody@example.com", "password": "password123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid credentials");
}

// ==================== Token Tests ====================

#[actix_web::test]
async fn test_refresh_rotates_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let auth = register!(app, "swimmer");
    let old_refresh = auth["refreshToken"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({"refreshToken": old_refresh}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let new_refresh = body["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, old_refresh);

    // The rotated token is spent
    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({"refreshToken": old_refresh}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({"refreshToken": new_refresh}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_access_token_rejected_on_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let auth = register!(app, "swimmer");

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({"refreshToken": auth["accessToken"]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_logout_revokes_refresh_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let auth = register!(app, "cyclist");
    let refresh = auth["refreshToken"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/auth/logout")
            .set_json(json!({"refreshToken": refresh}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    let req = test::TestRequest::post()
        .uri("/api/auth/refresh")
        .set_json(json!({"refreshToken": refresh}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

// ==================== Current User Tests ====================

#[actix_web::test]
async fn test_me_requires_valid_access_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let auth = register!(app, "climber");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", auth["accessToken"].as_str().unwrap())))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["username"], "climber");

    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", format!("Bearer {}", auth["refreshToken"].as_str().unwrap())))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", "Token abc"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "ok");
    assert!(resp["timestamp"].is_string());
}
