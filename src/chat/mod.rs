//! Direct messaging: the in-memory hub of live connections, the WebSocket
//! frame protocol and the send/mark-read operations shared by REST and WS.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{ApiError, ApiResult};
use crate::models::{Message, SendMessageRequest};
use crate::store::{Store, StoreError};

mod session;

pub use session::run_session;

pub const MESSAGE_MAX_CHARS: usize = 2000;

/// Events pushed to clients, framed as `{"event": ..., "data": ...}`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: String },
    ReceiveMessage(Message),
    MessageSent(Message),
    #[serde(rename_all = "camelCase")]
    MessagesRead { user_id: String },
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    pub fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::error!("Failed to encode chat event: {}", e);
                None
            }
        }
    }
}

/// Events sent by clients
#[derive(Debug, PartialEq)]
pub enum ClientEvent {
    UserConnected,
    SendMessage { receiver_id: String, content: String },
    MarkRead { user_id: String },
}

#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadData {
    user_id: String,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, String> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|e| format!("Malformed frame: {}", e))?;

        match frame.event.as_str() {
            "user_connected" => Ok(ClientEvent::UserConnected),
            "send_message" => {
                let req: SendMessageRequest = serde_json::from_value(frame.data)
                    .map_err(|e| format!("Invalid send_message payload: {}", e))?;
                Ok(ClientEvent::SendMessage {
                    receiver_id: req.receiver_id,
                    content: req.content,
                })
            }
            "mark_read" => {
                let data: MarkReadData = serde_json::from_value(frame.data)
                    .map_err(|e| format!("Invalid mark_read payload: {}", e))?;
                Ok(ClientEvent::MarkRead { user_id: data.user_id })
            }
            other => Err(format!("Unknown event: {}", other)),
        }
    }
}

struct Connection {
    id: u64,
    tx: UnboundedSender<String>,
}

/// Process-local registry of live WebSocket connections, keyed by user id.
/// A user may hold several connections (one per tab).
#[derive(Default)]
pub struct ChatHub {
    connections: Mutex<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, Vec<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection; frames for it arrive on the returned receiver
    pub fn register(&self, user_id: &str) -> (u64, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();

        let mut connections = self.connections();
        connections
            .entry(user_id.to_string())
            .or_default()
            .push(Connection { id, tx });
        log::info!("User {} connected to chat (connection {})", user_id, id);
        (id, rx)
    }

    pub fn unregister(&self, user_id: &str, conn_id: u64) {
        let mut connections = self.connections();
        if let Some(list) = connections.get_mut(user_id) {
            list.retain(|c| c.id != conn_id);
            if list.is_empty() {
                connections.remove(user_id);
            }
        }
        log::info!("User {} disconnected from chat (connection {})", user_id, conn_id);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections().contains_key(user_id)
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections().keys().cloned().collect();
        users.sort();
        users
    }

    /// Push an event to every connection of `user_id`; returns how many received it
    pub fn emit(&self, user_id: &str, event: &ServerEvent) -> usize {
        let Some(frame) = event.to_frame() else {
            return 0;
        };

        let mut connections = self.connections();
        let Some(list) = connections.get_mut(user_id) else {
            return 0;
        };

        // Receivers dropped by a finished session are pruned here
        list.retain(|c| c.tx.send(frame.clone()).is_ok());
        let delivered = list.len();
        if list.is_empty() {
            connections.remove(user_id);
        }
        delivered
    }
}

// ==================== Chat Operations ====================

/// Validate, persist, then deliver a direct message
pub fn send_message(
    store: &Store,
    hub: &ChatHub,
    sender_id: &str,
    req: &SendMessageRequest,
) -> ApiResult<Message> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message content is required".to_string()));
    }
    if content.chars().count() > MESSAGE_MAX_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message must be at most {} characters",
            MESSAGE_MAX_CHARS
        )));
    }

    let receiver_id = req.receiver_id.trim();
    if receiver_id == sender_id {
        return Err(ApiError::BadRequest("Cannot send a message to yourself".to_string()));
    }
    match store.get_user(receiver_id) {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => return Err(ApiError::NotFound("Receiver not found".to_string())),
        Err(e) => return Err(e.into()),
    }

    let mut message = Message {
        id: String::new(),
        sender_id: sender_id.to_string(),
        receiver_id: receiver_id.to_string(),
        content: content.to_string(),
        read: false,
        created_at: chrono::Utc::now(),
    };
    store.create_message(&mut message)?;

    let delivered = hub.emit(receiver_id, &ServerEvent::ReceiveMessage(message.clone()));
    hub.emit(sender_id, &ServerEvent::MessageSent(message.clone()));
    log::debug!(
        "Message {} from {} to {} delivered to {} connection(s)",
        message.id,
        sender_id,
        receiver_id,
        delivered
    );

    Ok(message)
}

/// Mark messages from `partner_id` as read and tell the partner
pub fn mark_read(store: &Store, hub: &ChatHub, reader_id: &str, partner_id: &str) -> ApiResult<usize> {
    let updated = store.mark_messages_read(reader_id, partner_id)?;
    if updated > 0 {
        hub.emit(
            partner_id,
            &ServerEvent::MessagesRead {
                user_id: reader_id.to_string(),
            },
        );
    }
    Ok(updated)
}

/// Handle one text frame from `user_id`. Returns an event to send back on the same connection.
pub fn handle_client_text(store: &Store, hub: &ChatHub, user_id: &str, text: &str) -> Option<ServerEvent> {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(e) => return Some(ServerEvent::error(e)),
    };

    match event {
        ClientEvent::UserConnected => Some(ServerEvent::Connected {
            user_id: user_id.to_string(),
        }),
        ClientEvent::SendMessage { receiver_id, content } => {
            let req = SendMessageRequest { receiver_id, content };
            // message_sent reaches this connection through the hub
            match send_message(store, hub, user_id, &req) {
                Ok(_) => None,
                Err(e) => Some(ServerEvent::error(e.to_string())),
            }
        }
        ClientEvent::MarkRead { user_id: partner_id } => match mark_read(store, hub, user_id, &partner_id) {
            Ok(_) => None,
            Err(e) => Some(ServerEvent::error(e.to_string())),
        },
    }
}
