// WebSocket push channel for chat messages and notifications.
//
// Each connection must authenticate with its first text frame
// (`{"type":"auth","token":"..."}`). After that the session receives every
// live event addressed to its user and answers `{"type":"ping"}` with
// `{"type":"pong"}`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use inkhub_core::auth;
use inkhub_core::db::Database;
use inkhub_core::events::Envelope;
use inkhub_core::model::User;
use inkhub_core::Marketplace;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 64;

/// Frames a client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Ping,
}

/// Control frames sent by the server. Live events use `LiveEvent`'s own
/// encoding.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Authenticated { user_id: i64 },
    Pong,
    Error { message: String },
}

impl ServerFrame {
    fn to_message(&self) -> Message {
        Message::Text(serde_json::to_string(self).unwrap_or_default().into())
    }
}

/// Accept connections on `0.0.0.0:{port}` forever, one task per session.
pub async fn run(port: u16, market: Arc<Marketplace>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted TCP connection from {addr}");
        let market = market.clone();
        tokio::spawn(handle_connection(stream, addr.to_string(), market));
    }
}

async fn handle_connection(stream: TcpStream, addr: String, market: Arc<Marketplace>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let outcome = tokio::time::timeout(AUTH_TIMEOUT, authenticate_stream(&mut read, &market.db))
        .await
        .unwrap_or_else(|_| Err("authentication timed out".to_string()));
    let user = match outcome {
        Ok(user) => user,
        Err(reason) => {
            info!("Rejecting live session from {addr}: {reason}");
            let _ = write
                .send(ServerFrame::Error { message: reason }.to_message())
                .await;
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };
    let user_id = user.id;
    info!(user_id, "Live session opened for {addr}");

    let events = market.events.subscribe();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let _ = out_tx
        .send(ServerFrame::Authenticated { user_id }.to_message())
        .await;

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });
    let forwarder = tokio::spawn(forward_events(events, user_id, out_tx.clone()));

    process_message_stream(read, &out_tx, &addr).await;

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    info!(user_id, "Live session closed for {addr}");
}

/// Wait for the first text frame and resolve it to a user. Control frames
/// before it are skipped; anything else fails the handshake.
pub async fn authenticate_stream<St>(stream: &mut St, db: &Database) -> Result<User, String>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Auth { token }) => auth::authenticate(db, &token)
                        .map(|(user, _)| user)
                        .map_err(|e| e.to_string()),
                    _ => Err("first message must be an auth frame".to_string()),
                };
            }
            Ok(Message::Close(_)) => return Err("closed before authenticating".to_string()),
            Err(e) => return Err(format!("websocket error: {e}")),
            _ => {}
        }
    }
    Err("stream ended before authenticating".to_string())
}

/// Handle inbound frames after authentication until the client closes or
/// errors. Replies are queued on `out`.
pub async fn process_message_stream<St>(mut stream: St, out: &mpsc::Sender<Message>, addr: &str)
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Ping) => {
                    if out.send(ServerFrame::Pong.to_message()).await.is_err() {
                        break;
                    }
                }
                Ok(ClientFrame::Auth { .. }) => debug!("Ignoring repeated auth from {addr}"),
                Err(_) => debug!("Ignoring unrecognised frame from {addr}"),
            },
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary and protocol-level ping/pong frames.
            }
        }
    }
}

/// Forward every event addressed to `user_id` as a JSON text frame.
pub async fn forward_events(
    mut rx: broadcast::Receiver<Envelope>,
    user_id: i64,
    out: mpsc::Sender<Message>,
) {
    loop {
        match rx.recv().await {
            Ok(envelope) if envelope.user_id == user_id => {
                let text = match serde_json::to_string(&envelope.event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(user_id, "failed to encode live event: {e}");
                        continue;
                    }
                };
                if out.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(user_id, skipped, "live session lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures_util::stream;
    use inkhub_core::db::NewUser;
    use inkhub_core::events::{EventHub, LiveEvent};
    use inkhub_core::model::{Notification, NotificationStatus, Role};
    use serde_json::Value;

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    fn db_with_token() -> (Database, User, String) {
        let db = Database::open(":memory:").unwrap();
        let user = db
            .insert_user(&NewUser {
                username: "ana".into(),
                email: "ana@example.com".into(),
                password_hash: "hash".into(),
                role: Role::Client,
                verified: true,
                verification_code: None,
                verification_code_expires_at: None,
                now: Utc::now(),
            })
            .unwrap();
        let token = auth::issue_token(&db, user.id).unwrap();
        (db, user, token)
    }

    fn text(s: &str) -> Result<Message, WsError> {
        Ok(Message::Text(s.to_string().into()))
    }

    fn notification(user_id: i64, content: &str) -> LiveEvent {
        LiveEvent::Notification {
            notification: Notification {
                id: 1,
                user_id,
                request_id: None,
                content: content.into(),
                status: NotificationStatus::Unread,
                created_at: Utc::now(),
            },
        }
    }

    fn json_of(msg: Message) -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    // -- authentication --

    #[tokio::test]
    async fn valid_auth_frame_resolves_user() {
        let (db, user, token) = db_with_token();
        let frame = format!(r#"{{"type":"auth","token":"{token}"}}"#);
        let mut stream = mock_stream(vec![Ok(Message::Ping(Default::default())), text(&frame)]);

        let authed = authenticate_stream(&mut stream, &db).await.unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let (db, _, _) = db_with_token();
        let mut stream = mock_stream(vec![text(r#"{"type":"auth","token":"1|nope"}"#)]);
        let err = authenticate_stream(&mut stream, &db).await.unwrap_err();
        assert_eq!(err, "Unauthenticated.");
    }

    #[tokio::test]
    async fn first_frame_must_be_auth() {
        let (db, _, _) = db_with_token();
        let mut stream = mock_stream(vec![text(r#"{"type":"ping"}"#)]);
        assert!(authenticate_stream(&mut stream, &db).await.is_err());

        let mut closed = mock_stream(vec![Ok(Message::Close(None))]);
        assert!(authenticate_stream(&mut closed, &db).await.is_err());

        let mut empty = mock_stream(vec![]);
        assert!(authenticate_stream(&mut empty, &db).await.is_err());
    }

    // -- inbound frames --

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (tx, mut rx) = mpsc::channel(8);
        process_message_stream(mock_stream(vec![text(r#"{"type":"ping"}"#)]), &tx, "test").await;

        assert_eq!(json_of(rx.recv().await.unwrap())["type"], "pong");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let (tx, mut rx) = mpsc::channel(8);
        let messages = vec![
            Ok(Message::Close(None)),
            text(r#"{"type":"ping"}"#),
        ];
        process_message_stream(mock_stream(messages), &tx, "test").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let (tx, mut rx) = mpsc::channel(8);
        let messages = vec![
            text(r#"{"type":"ping"}"#),
            Err(WsError::ConnectionClosed),
            text(r#"{"type":"ping"}"#),
        ];
        process_message_stream(mock_stream(messages), &tx, "test").await;
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_and_binary_frames_are_ignored() {
        let (tx, mut rx) = mpsc::channel(8);
        let messages = vec![
            Ok(Message::Binary(vec![1u8, 2, 3].into())),
            text("not json"),
            text(r#"{"type":"auth","token":"x"}"#),
        ];
        process_message_stream(mock_stream(messages), &tx, "test").await;
        assert!(rx.try_recv().is_err());
    }

    // -- outbound events --

    #[tokio::test]
    async fn only_own_events_are_forwarded() {
        let hub = EventHub::default();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(forward_events(hub.subscribe(), 7, tx));

        hub.publish(8, notification(8, "not yours"));
        hub.publish(7, notification(7, "yours"));

        let frame = json_of(rx.recv().await.unwrap());
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["notification"]["content"], "yours");
        task.abort();
    }

    #[tokio::test]
    async fn forwarding_stops_when_hub_is_dropped() {
        let hub = EventHub::default();
        let (tx, _rx) = mpsc::channel(8);
        let task = tokio::spawn(forward_events(hub.subscribe(), 1, tx));
        drop(hub);
        task.await.unwrap();
    }

    #[test]
    fn server_frames_are_tagged() {
        let Message::Text(pong) = ServerFrame::Pong.to_message() else {
            panic!("expected text");
        };
        assert_eq!(pong.as_str(), r#"{"type":"pong"}"#);
        let authed: Value =
            json_of(ServerFrame::Authenticated { user_id: 3 }.to_message());
        assert_eq!(authed["user_id"], 3);
    }
}
