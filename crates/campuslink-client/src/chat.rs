use tracing::warn;
use uuid::Uuid;

use campuslink_types::events::RelayCommand;

use crate::connection::{IncomingMessage, RelayHandle, Subscription};
use crate::error::ClientError;
use crate::history::MessagesApi;
use crate::view::SessionView;

/// What `send` did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted to the relay and persisted.
    Sent,
    /// Content was empty after trimming: no network call was issued.
    Skipped,
}

/// One mounted chat view over a session: room subscription, history, and
/// the merged message list. Dropping it releases the room membership.
pub struct SessionChat {
    relay: RelayHandle,
    api: MessagesApi,
    sub: Subscription,
    view: SessionView,
    session_id: Uuid,
    user_id: Uuid,
    username: String,
}

impl SessionChat {
    /// Join the session's room and load its history. The join is issued
    /// first and the fetch runs while live delivery is already possible; a
    /// failed fetch surfaces as an empty history with the error indicator
    /// set, never as a hard failure of the whole view.
    pub async fn open(
        relay: &RelayHandle,
        api: MessagesApi,
        session_id: Uuid,
        user_id: Uuid,
        username: &str,
    ) -> Result<Self, ClientError> {
        let sub = relay.join(session_id)?;

        let mut view = SessionView::new(session_id);
        match api.load_history(session_id).await {
            Ok(history) => view.install_history(history),
            Err(e) => {
                warn!("history fetch for session {} failed: {}", session_id, e);
                view.mark_history_failed();
            }
        }

        Ok(Self {
            relay: relay.clone(),
            api,
            sub,
            view,
            session_id,
            user_id,
            username: username.to_string(),
        })
    }

    /// Send a message: one relay transmission plus one persistence call.
    /// Content that is empty after trimming is a no-op with zero network
    /// calls. The sender's own view is updated optimistically with a local
    /// timestamp before the persistence call resolves; on success the entry
    /// is reconciled with the stored record, on failure it stays visible
    /// and the error is returned.
    pub async fn send(&mut self, content: &str) -> Result<SendOutcome, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let timestamp = chrono::Utc::now();
        self.relay.send_command(&RelayCommand::SendMessage {
            session_id: self.session_id,
            sender_id: self.user_id,
            content: content.to_string(),
            timestamp,
        })?;

        self.view
            .push_optimistic(self.user_id, &self.username, content, timestamp);

        let stored = self.api.persist(self.session_id, content).await?;
        self.view.resolve_optimistic(&stored);

        Ok(SendOutcome::Sent)
    }

    /// Await the next live message and append it to the view. Returns `None`
    /// once the subscription ended (connection lost or replaced by a newer
    /// join).
    pub async fn next_message(&mut self) -> Option<IncomingMessage> {
        let msg = self.sub.recv().await?;
        self.view.apply_live(&msg);
        Some(msg)
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode,
        response::IntoResponse,
        routing::get,
    };
    use chrono::DateTime;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use campuslink_types::api::MessageResponse;

    use super::*;
    use crate::connection::test_handle;

    struct StubApi {
        base_url: String,
        gets: Arc<AtomicUsize>,
        posts: Arc<AtomicUsize>,
    }

    /// Serve GET/POST /messages/{session_id} on an ephemeral port, counting
    /// hits. `history` is what GET returns (None = 500); POST echoes a
    /// stored record from `user_id` unless `post_fails`.
    async fn spawn_stub(
        user_id: Uuid,
        history: Option<Vec<MessageResponse>>,
        post_fails: bool,
    ) -> StubApi {
        let gets = Arc::new(AtomicUsize::new(0));
        let posts = Arc::new(AtomicUsize::new(0));

        let gets_handler = gets.clone();
        let history_handler = move |Path(_session_id): Path<Uuid>| {
            let gets = gets_handler.clone();
            let history = history.clone();
            async move {
                gets.fetch_add(1, Ordering::SeqCst);
                match history {
                    Some(records) => Json(records).into_response(),
                    None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                }
            }
        };

        let posts_handler = posts.clone();
        let persist_handler = move |Path(session_id): Path<Uuid>,
                                    Json(req): Json<campuslink_types::api::SendMessageRequest>| {
            let posts = posts_handler.clone();
            async move {
                posts.fetch_add(1, Ordering::SeqCst);
                if post_fails {
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
                let stored = MessageResponse {
                    id: Uuid::new_v4(),
                    session_id,
                    sender_id: user_id,
                    sender_username: "alice".into(),
                    content: req.content,
                    created_at: chrono::Utc::now(),
                };
                (StatusCode::CREATED, Json(stored)).into_response()
            }
        };

        let app = Router::new().route(
            "/messages/{session_id}",
            get(history_handler).post(persist_handler),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        StubApi {
            base_url: format!("http://{}", addr),
            gets,
            posts,
        }
    }

    fn relay_commands(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<RelayCommand> {
        let mut cmds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                cmds.push(serde_json::from_str(&text).unwrap());
            }
        }
        cmds
    }

    fn history_record(session_id: Uuid, content: &str, ts: i64) -> MessageResponse {
        MessageResponse {
            id: Uuid::new_v4(),
            session_id,
            sender_id: Uuid::new_v4(),
            sender_username: "bob".into(),
            content: content.into(),
            created_at: DateTime::from_timestamp(ts, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn whitespace_send_issues_zero_network_calls() {
        let user_id = Uuid::new_v4();
        let stub = spawn_stub(user_id, Some(vec![]), false).await;
        let (handle, mut out_rx) = test_handle();

        let session = Uuid::new_v4();
        let api = MessagesApi::new(&stub.base_url, "token");
        let mut chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();
        relay_commands(&mut out_rx); // discard the JoinRoom from open

        let outcome = chat.send("   ").await.unwrap();
        assert_eq!(outcome, SendOutcome::Skipped);

        assert!(relay_commands(&mut out_rx).is_empty());
        assert_eq!(stub.posts.load(Ordering::SeqCst), 0);
        assert!(chat.view().messages().is_empty());
    }

    #[tokio::test]
    async fn send_issues_one_persist_and_one_relay_transmission() {
        let user_id = Uuid::new_v4();
        let stub = spawn_stub(user_id, Some(vec![]), false).await;
        let (handle, mut out_rx) = test_handle();

        let session = Uuid::new_v4();
        let api = MessagesApi::new(&stub.base_url, "token");
        let mut chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();
        relay_commands(&mut out_rx);

        let outcome = chat.send("hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);

        let sends = relay_commands(&mut out_rx)
            .into_iter()
            .filter(|c| matches!(c, RelayCommand::SendMessage { .. }))
            .count();
        assert_eq!(sends, 1);
        assert_eq!(stub.posts.load(Ordering::SeqCst), 1);

        // Optimistic entry was reconciled with the stored record.
        let entry = chat.view().messages().last().unwrap();
        assert!(entry.id.is_some());
        assert!(!entry.pending);
        assert_eq!(entry.content, "hello");
    }

    #[tokio::test]
    async fn rejected_send_keeps_the_optimistic_entry_visible() {
        let user_id = Uuid::new_v4();
        let stub = spawn_stub(user_id, Some(vec![]), true).await;
        let (handle, mut out_rx) = test_handle();

        let session = Uuid::new_v4();
        let api = MessagesApi::new(&stub.base_url, "token");
        let mut chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();
        relay_commands(&mut out_rx);

        let err = chat.send("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::SendRejected(_)));

        let entry = chat.view().messages().last().unwrap();
        assert!(entry.pending);
        assert!(entry.id.is_none());
        assert_eq!(entry.content, "hello");
    }

    #[tokio::test]
    async fn send_over_dead_relay_is_connection_lost_with_no_persist() {
        let user_id = Uuid::new_v4();
        let stub = spawn_stub(user_id, Some(vec![]), false).await;
        let (handle, out_rx) = test_handle();

        let session = Uuid::new_v4();
        let api = MessagesApi::new(&stub.base_url, "token");
        let mut chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();

        drop(out_rx); // connection gone

        let err = chat.send("hello").await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost));
        assert_eq!(stub.posts.load(Ordering::SeqCst), 0);
        assert!(chat.view().messages().is_empty());
    }

    #[tokio::test]
    async fn failed_history_fetch_shows_empty_view_with_indicator() {
        let user_id = Uuid::new_v4();
        let stub = spawn_stub(user_id, None, false).await;
        let (handle, _out_rx) = test_handle();

        let session = Uuid::new_v4();
        let api = MessagesApi::new(&stub.base_url, "token");

        // The synchronizer itself reports a fetch error...
        let err = api.load_history(session).await.unwrap_err();
        assert!(matches!(err, ClientError::Fetch(_)));

        // ...and the opened view degrades to empty-plus-indicator.
        let chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();
        assert!(chat.view().history_failed());
        assert!(chat.view().messages().is_empty());
        assert_eq!(stub.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn history_and_live_messages_merge_in_order() {
        let user_id = Uuid::new_v4();
        let session = Uuid::new_v4();
        let stub = spawn_stub(
            user_id,
            Some(vec![history_record(session, "hi", 100)]),
            false,
        )
        .await;
        let (handle, _out_rx) = test_handle();

        let api = MessagesApi::new(&stub.base_url, "token");
        let mut chat = SessionChat::open(&handle, api, session, user_id, "alice")
            .await
            .unwrap();

        assert!(handle.deliver(IncomingMessage {
            session_id: session,
            sender_id: Uuid::new_v4(),
            sender_username: "bob".into(),
            content: "there".into(),
            timestamp: DateTime::from_timestamp(150, 0).unwrap(),
        }));
        chat.next_message().await.unwrap();

        let contents: Vec<&str> = chat
            .view()
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, ["hi", "there"]);
    }
}
