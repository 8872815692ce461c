use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use campuslink_types::events::{RelayCommand, RelayEvent};

use crate::error::ClientError;

/// The relay must answer Identify with Ready within this window.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A live message delivered to a session subscription, in relay arrival
/// order. Live copies carry no server-assigned id; the durable record is
/// persisted through the data service on a separate path.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// session_id -> (registration id, subscription sender). One route per
/// session: re-joining replaces the registration rather than stacking a
/// second one.
type Routes = Arc<Mutex<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<IncomingMessage>)>>>;

/// An owned relay connection: dialed once at application start, closed at
/// shutdown. Components that need the relay get a [`RelayHandle`] from it;
/// nothing here is process-global.
pub struct RelayConnection {
    handle: RelayHandle,
    shutdown: CancellationToken,
    user_id: Uuid,
    username: String,
}

impl RelayConnection {
    /// Dial the relay and run the Identify/Ready handshake. On success the
    /// read and write loops are spawned and live until [`close`] or the
    /// connection drops.
    ///
    /// [`close`]: RelayConnection::close
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let identify = RelayCommand::Identify {
            token: token.to_string(),
        };
        sink.send(Message::text(serde_json::to_string(&identify).unwrap()))
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;

        let (user_id, username) = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(RelayEvent::Ready { user_id, username }) =
                        serde_json::from_str(&text)
                    {
                        return Some((user_id, username));
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ClientError::Handshake("no Ready from relay".into()))?;

        info!("{} ({}) connected to relay at {}", username, user_id, url);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        // Write loop: commands (and pong replies) -> relay.
        let write_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = write_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = out_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Read loop: relay events -> the subscription registered for the
        // event's session, dropped if none is.
        let read_routes = routes.clone();
        let read_shutdown = shutdown.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = read_shutdown.cancelled() => break,
                    next = stream.next() => {
                        match next {
                            Some(Ok(Message::Text(text))) => {
                                handle_event(&read_routes, &text);
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = pong_tx.send(Message::Pong(payload));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("relay connection lost");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("relay read error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            // Drop every route so pending Subscription::recv calls observe
            // end-of-stream instead of waiting forever.
            lock_routes(&read_routes).clear();
        });

        Ok(Self {
            handle: RelayHandle { out_tx, routes },
            shutdown,
            user_id,
            username,
        })
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Shut the connection down. Queued outbound frames are abandoned and a
    /// Close frame is sent.
    pub fn close(self) {
        // Drop runs the cancellation.
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn handle_event(routes: &Routes, text: &str) {
    match serde_json::from_str::<RelayEvent>(text) {
        Ok(RelayEvent::MessageReceive {
            session_id,
            sender_id,
            sender_username,
            content,
            timestamp,
        }) => {
            let delivered = deliver(
                routes,
                IncomingMessage {
                    session_id,
                    sender_id,
                    sender_username,
                    content,
                    timestamp,
                },
            );
            if !delivered {
                debug!("no subscription for session {}, dropping live message", session_id);
            }
        }
        Ok(RelayEvent::Ready { .. }) => {}
        Err(e) => {
            warn!("bad relay event: {} -- raw: {}", e, &text[..text.len().min(200)]);
        }
    }
}

fn deliver(routes: &Routes, msg: IncomingMessage) -> bool {
    let routes = lock_routes(routes);
    match routes.get(&msg.session_id) {
        Some((_, tx)) => tx.send(msg).is_ok(),
        None => false,
    }
}

fn lock_routes(
    routes: &Routes,
) -> std::sync::MutexGuard<'_, HashMap<Uuid, (Uuid, mpsc::UnboundedSender<IncomingMessage>)>> {
    match routes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cheap clonable handle to the relay connection.
#[derive(Clone)]
pub struct RelayHandle {
    out_tx: mpsc::UnboundedSender<Message>,
    routes: Routes,
}

impl RelayHandle {
    /// Register interest in a session's message stream and tell the relay to
    /// add us to the room. Joining a session that is already joined replaces
    /// the existing registration: the earlier subscription's stream ends and
    /// a single LeaveRoom later suffices.
    pub fn join(&self, session_id: Uuid) -> Result<Subscription, ClientError> {
        let reg_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        lock_routes(&self.routes).insert(session_id, (reg_id, tx));

        self.send_command(&RelayCommand::JoinRoom { session_id })?;

        Ok(Subscription {
            session_id,
            reg_id,
            rx,
            routes: self.routes.clone(),
            out_tx: self.out_tx.clone(),
        })
    }

    pub(crate) fn send_command(&self, cmd: &RelayCommand) -> Result<(), ClientError> {
        let text = serde_json::to_string(cmd).unwrap();
        self.out_tx
            .send(Message::text(text))
            .map_err(|_| ClientError::ConnectionLost)
    }

    #[cfg(test)]
    pub(crate) fn active_routes(&self) -> usize {
        lock_routes(&self.routes).len()
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self, msg: IncomingMessage) -> bool {
        deliver(&self.routes, msg)
    }
}

/// Scoped room membership. Dropping the subscription — on any exit path of
/// the owning view — removes the inbound route and sends LeaveRoom, so a
/// relay event arriving afterwards has nowhere to go.
pub struct Subscription {
    session_id: Uuid,
    reg_id: Uuid,
    rx: mpsc::UnboundedReceiver<IncomingMessage>,
    routes: Routes,
    out_tx: mpsc::UnboundedSender<Message>,
}

impl Subscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next live message for this session, in relay arrival order. Returns
    /// `None` once the registration was replaced by a newer join or the
    /// connection is gone.
    pub async fn recv(&mut self) -> Option<IncomingMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut routes = lock_routes(&self.routes);
        let still_ours = routes
            .get(&self.session_id)
            .is_some_and(|(reg_id, _)| *reg_id == self.reg_id);
        if !still_ours {
            // A newer join took over the room; leaving now would cut it off.
            return;
        }
        routes.remove(&self.session_id);
        drop(routes);

        let cmd = RelayCommand::LeaveRoom {
            session_id: self.session_id,
        };
        let _ = self
            .out_tx
            .send(Message::text(serde_json::to_string(&cmd).unwrap()));
    }
}

#[cfg(test)]
pub(crate) fn test_handle() -> (RelayHandle, mpsc::UnboundedReceiver<Message>) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        RelayHandle {
            out_tx,
            routes: Arc::new(Mutex::new(HashMap::new())),
        },
        out_rx,
    )
}
