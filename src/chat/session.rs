use actix_ws::{CloseReason, Message as WsMessage, MessageStream, Session};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{handle_client_text, ChatHub, ServerEvent};
use crate::store::Store;

/// Drive one WebSocket connection until either side closes it.
/// The connection must already be registered in `hub` under `conn_id`.
pub async fn run_session(
    store: Arc<Store>,
    hub: Arc<ChatHub>,
    user_id: String,
    conn_id: u64,
    mut session: Session,
    mut inbound: MessageStream,
    mut outbound: UnboundedReceiver<String>,
) {
    let greeting = ServerEvent::Connected {
        user_id: user_id.clone(),
    };
    let mut close_reason: Option<CloseReason> = None;

    if let Some(frame) = greeting.to_frame() {
        if session.text(frame).await.is_err() {
            hub.unregister(&user_id, conn_id);
            return;
        }
    }

    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let reply = handle_client_text(&store, &hub, &user_id, &text);
                    if let Some(frame) = reply.and_then(|event| event.to_frame()) {
                        if session.text(frame).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(bytes))) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(reason))) => {
                    close_reason = reason;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("WebSocket protocol error for user {}: {}", user_id, e);
                    break;
                }
                None => break,
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if session.text(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    hub.unregister(&user_id, conn_id);
    let _ = session.close(close_reason).await;
}
