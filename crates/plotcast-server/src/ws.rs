//! `WebSocket` handler for browser clients.
//!
//! Clients connect to `GET /ws` (optionally `?client_id=...`) and send
//! JSON [`ClientMessage`]s to subscribe or unsubscribe. Broadcasts and
//! replies arrive as text frames of the form `"<topic>:<json>"`.
//!
//! Each socket is registered with the fanout as a [`ChannelConnection`].
//! If the fanout drops the connection (the client fell too far behind),
//! the outbound channel closes and so does the socket. When the client
//! goes away the connection is removed from every topic.
//!
//! A socket that connects with an id already in use takes it over, along
//! with its subscriptions; the older socket is closed and its cleanup
//! leaves the newer registration untouched.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use plotcast_fanout::{ChannelConnection, FanoutError, SubscribeOutcome};
use plotcast_types::{ClientMessage, ConnectionId, ServerMessage, Topic};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct WsQuery {
    /// Reuse this id instead of generating one.
    pub client_id: Option<String>,
}

/// Upgrade an HTTP request to a `WebSocket` client connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_connect(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let requested = query
        .client_id
        .filter(|id| !id.is_empty())
        .map(ConnectionId::from);
    ws.on_upgrade(move |socket| handle_ws(socket, state, requested))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, requested: Option<ConnectionId>) {
    let _client = state.track_client();
    let (connection, mut outbound) = ChannelConnection::channel(state.connection_buffer);
    let registration = match state
        .fanout
        .register_connection(Box::new(connection), requested)
        .await
    {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "rejecting WebSocket client");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let id = registration.id.clone();
    info!(
        connection_id = %id,
        generation = registration.generation,
        "WebSocket client connected"
    );

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(connection_id = %id, "fanout dropped or replaced the connection");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    debug!(connection_id = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match handle_client_text(&state, &id, text.as_str()).await {
                            Ok(reply) => reply,
                            Err(e) => {
                                warn!(connection_id = %id, error = %e, "fanout unavailable");
                                break;
                            }
                        };
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            debug!(connection_id = %id, "WebSocket client disconnected (reply failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(connection_id = %id, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %id, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    match state.fanout.release_connection(registration).await {
        Ok(()) => {}
        Err(FanoutError::Closed) => debug!(connection_id = %id, "fanout already stopped"),
        Err(e) => warn!(connection_id = %id, error = %e, "could not remove closed connection"),
    }
    info!(connection_id = %id, "WebSocket client removed");
}

/// Apply one client request and build the text frame to send back.
///
/// A malformed request yields an error reply; only a stopped fanout is
/// an error.
pub async fn handle_client_text(
    state: &AppState,
    id: &ConnectionId,
    text: &str,
) -> Result<String, FanoutError> {
    let request: ClientMessage = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "malformed client message");
            return Ok(render(None, &ServerMessage::error(format!("malformed request: {e}"))));
        }
    };

    let (topic, reply) = match request {
        ClientMessage::Subscribe { topic, auth } => {
            let outcome = state
                .fanout
                .subscribe_authorized(id.clone(), topic.clone(), auth)
                .await?;
            let reply = match outcome {
                SubscribeOutcome::Subscribed => {
                    ServerMessage::status(["subscribesuccess", topic.as_str(), id.as_str()])
                }
                SubscribeOutcome::Unauthorized => ServerMessage::error("unauthorized"),
                SubscribeOutcome::Refused => ServerMessage::error("subscription refused"),
            };
            (topic, reply)
        }
        ClientMessage::Unsubscribe { topic } => {
            let removed = state.fanout.unsubscribe(id.clone(), topic.clone()).await?;
            let reply = if removed {
                ServerMessage::status(["unsubscribesuccess", topic.as_str(), id.as_str()])
            } else {
                ServerMessage::error("not subscribed")
            };
            (topic, reply)
        }
    };
    Ok(render(Some(&topic), &reply))
}

fn render(topic: Option<&Topic>, reply: &ServerMessage) -> String {
    let json = reply
        .to_json()
        .unwrap_or_else(|_| String::from(r#"{"msgtype":"error","msg":"internal"}"#));
    match topic {
        Some(topic) => topic.frame(&json),
        None => json,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use plotcast_fanout::{AuthRegistry, FanoutHandle, FanoutManager, UnregisteredAuthPolicy};

    use super::*;

    fn state_with_auth() -> AppState {
        let mut auth = AuthRegistry::new(UnregisteredAuthPolicy::Allow);
        auth.register_arc(
            "private",
            Arc::new(|token: Option<&str>, _: &str| token == Some("letmein")),
        );
        let (fanout, _task) = FanoutHandle::spawn(FanoutManager::with_auth(auth), 8);
        AppState::new(fanout)
    }

    #[tokio::test]
    async fn subscribe_replies_with_status_frame() {
        let state = state_with_auth();
        let id = ConnectionId::from("c1");
        let reply = handle_client_text(
            &state,
            &id,
            r#"{"msgtype":"subscribe","topic":"bokehplot:doc1","auth":"x"}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            r#"bokehplot:doc1:{"msgtype":"status","status":["subscribesuccess","bokehplot:doc1","c1"]}"#
        );
    }

    #[tokio::test]
    async fn denied_subscribe_replies_unauthorized() {
        let state = state_with_auth();
        let id = ConnectionId::from("c1");
        let reply = handle_client_text(
            &state,
            &id,
            r#"{"msgtype":"subscribe","topic":"private:doc1","auth":"wrong"}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply, r#"private:doc1:{"msgtype":"error","msg":"unauthorized"}"#);
        assert!(state.fanout.subscribers(Topic::from("private:doc1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_request_gets_error_object() {
        let state = state_with_auth();
        let reply = handle_client_text(&state, &ConnectionId::from("c1"), "{not json")
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["msgtype"], "error");
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_topic_is_reported() {
        let state = state_with_auth();
        let reply = handle_client_text(
            &state,
            &ConnectionId::from("c1"),
            r#"{"msgtype":"unsubscribe","topic":"t:1"}"#,
        )
        .await
        .unwrap();
        assert_eq!(reply, r#"t:1:{"msgtype":"error","msg":"not subscribed"}"#);
    }
}
