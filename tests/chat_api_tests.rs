use actix_web::{test, web, App};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use fitsocial_server::api::{self, AppState};
use fitsocial_server::auth::AuthService;
use fitsocial_server::store::Store;
use fitsocial_server::uploads::UploadStore;

fn create_app_state(upload_dir: &Path) -> web::Data<AppState> {
    let store = Arc::new(Store::new(":memory:").unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string(), store.clone()));
    let uploads = Arc::new(UploadStore::new(upload_dir, 5 * 1024 * 1024).unwrap());
    web::Data::new(AppState::new(store, auth_service, uploads))
}

macro_rules! register_and_get_token_id {
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
        let token = resp["data"]["accessToken"].as_str().unwrap().to_string();
        let user_id = resp["data"]["user"]["id"].as_str().unwrap().to_string();
        (token, user_id)
    }};
}

macro_rules! send_message {
    ($app:expr, $token:expr, $receiver:expr, $content:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/chat/messages")
            .insert_header(("Authorization", format!("Bearer {}", $token)))
            .set_json(json!({"receiverId": $receiver, "content": $content}))
            .to_request();
        test::call_service(&$app, req).await
    }};
}

// ==================== Messaging Tests ====================

#[actix_web::test]
async fn test_send_message_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let (alice, alice_id) = register_and_get_token_id!(app, "alice");
    let (bob, bob_id) = register_and_get_token_id!(app, "bob");

    let resp = send_message!(app, alice, bob_id, "Gym at 6?");
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["senderId"], alice_id.as_str());
    assert_eq!(body["data"]["receiverId"], bob_id.as_str());
    assert_eq!(body["data"]["read"], false);

    let resp = send_message!(app, bob, alice_id, "See you there");
    assert_eq!(resp.status(), 201);

    let req = test::TestRequest::get()
        .uri(&format!("/api/chat/messages/{}", alice_id))
        .insert_header(("Authorization", format!("Bearer {}", bob)))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let messages = resp["data"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "Gym at 6?");
    assert_eq!(messages[1]["content"], "See you there");
}

#[actix_web::test]
async fn test_send_message_validation() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let (alice, alice_id) = register_and_get_token_id!(app, "alice");
    let (_, bob_id) = register_and_get_token_id!(app, "bob");

    let resp = send_message!(app, alice, alice_id, "talking to myself");
    assert_eq!(resp.status(), 400);

    let resp = send_message!(app, alice, bob_id, "   ");
    assert_eq!(resp.status(), 400);

    let resp = send_message!(app, alice, bob_id, "m".repeat(2001));
    assert_eq!(resp.status(), 400);

    let resp = send_message!(app, alice, "ghost", "hello?");
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_online_receiver_gets_event() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let (alice, alice_id) = register_and_get_token_id!(app, "alice");
    let (_, bob_id) = register_and_get_token_id!(app, "bob");

    let (conn_id, mut bob_rx) = state.chat_hub.register(&bob_id);

    let req = test::TestRequest::get()
        .uri("/api/chat/online")
        .insert_header(("Authorization", format!("Bearer {}", alice)))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"], json!([bob_id.clone()]));

    let resp = send_message!(app, alice, bob_id, "PR attempt today");
    let body: serde_json::Value = test::read_body_json(resp).await;

    let frame: serde_json::Value = serde_json::from_str(&bob_rx.try_recv().unwrap()).unwrap();
    assert_eq!(frame["event"], "receive_message");
    assert_eq!(frame["data"]["id"], body["data"]["id"]);

    // Saved before it was emitted
    let stored = state.store.list_messages_between(&bob_id, &alice_id, 10).unwrap();
    assert_eq!(stored.len(), 1);

    state.chat_hub.unregister(&bob_id, conn_id);
    assert!(state.chat_hub.online_users().is_empty());
}

#[actix_web::test]
async fn test_conversations_and_mark_read() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let (alice, alice_id) = register_and_get_token_id!(app, "alice");
    let (bob, bob_id) = register_and_get_token_id!(app, "bob");
    let (carol, _) = register_and_get_token_id!(app, "carol");

    send_message!(app, alice, bob_id, "one");
    send_message!(app, alice, bob_id, "two");
    send_message!(app, carol, bob_id, "hey bob");

    let req = test::TestRequest::get()
        .uri("/api/chat/conversations")
        .insert_header(("Authorization", format!("Bearer {}", bob)))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let conversations = resp["data"].as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0]["partner"]["username"], "carol");
    assert_eq!(conversations[0]["unreadCount"], 1);
    assert_eq!(conversations[1]["partner"]["username"], "alice");
    assert_eq!(conversations[1]["lastMessage"]["content"], "two");
    assert_eq!(conversations[1]["unreadCount"], 2);

    let (_, mut alice_rx) = state.chat_hub.register(&alice_id);

    let req = test::TestRequest::put()
        .uri(&format!("/api/chat/messages/{}/read", alice_id))
        .insert_header(("Authorization", format!("Bearer {}", bob)))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["data"]["updated"], 2);

    let frame: serde_json::Value = serde_json::from_str(&alice_rx.try_recv().unwrap()).unwrap();
    assert_eq!(frame["event"], "messages_read");
    assert_eq!(frame["data"]["userId"], bob_id.as_str());

    assert_eq!(state.store.count_unread(&bob_id).unwrap(), 1);
}

// ==================== WebSocket Tests ====================

#[actix_web::test]
async fn test_ws_requires_valid_token() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_app_state(dir.path());
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure_routes)).await;

    let req = test::TestRequest::get().uri("/ws").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get().uri("/ws?token=not-a-jwt").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}
