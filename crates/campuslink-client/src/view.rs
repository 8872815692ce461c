use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use campuslink_types::api::MessageResponse;

use crate::connection::IncomingMessage;

/// One entry in a session's message list. `id` is the server-assigned
/// identifier when known; optimistic entries have none until the
/// persistence call resolves.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Option<Uuid>,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub pending: bool,
}

/// Append-only ordered message list for one mounted session view. History
/// installs first; live messages append in arrival order; equal timestamps
/// keep arrival order. Entries carrying a server id are de-duplicated by
/// that id. Live-delivered copies carry no id, so a message that slips into
/// both the fetched history and live delivery during the join/fetch window
/// can appear twice; that race is accepted as bounded rather than patched
/// over with content+timestamp heuristics.
pub struct SessionView {
    session_id: Uuid,
    messages: Vec<ChatMessage>,
    seen_ids: HashSet<Uuid>,
    history_failed: bool,
}

impl SessionView {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            seen_ids: HashSet::new(),
            history_failed: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Install fetched history in the order the data service returned it.
    pub fn install_history(&mut self, history: Vec<MessageResponse>) {
        for record in history {
            if !self.seen_ids.insert(record.id) {
                continue;
            }
            self.messages.push(ChatMessage {
                id: Some(record.id),
                sender_id: record.sender_id,
                sender_username: record.sender_username,
                content: record.content,
                timestamp: record.created_at,
                pending: false,
            });
        }
        self.history_failed = false;
    }

    /// History could not be loaded: the view shows zero history messages
    /// plus an error indicator instead of blocking.
    pub fn mark_history_failed(&mut self) {
        self.history_failed = true;
    }

    pub fn history_failed(&self) -> bool {
        self.history_failed
    }

    /// Append a live message. Events for other sessions are ignored.
    pub fn apply_live(&mut self, msg: &IncomingMessage) {
        if msg.session_id != self.session_id {
            return;
        }
        self.messages.push(ChatMessage {
            id: None,
            sender_id: msg.sender_id,
            sender_username: msg.sender_username.clone(),
            content: msg.content.clone(),
            timestamp: msg.timestamp,
            pending: false,
        });
    }

    /// Show the sender's own message before the server acknowledges it,
    /// stamped with the locally generated timestamp.
    pub fn push_optimistic(
        &mut self,
        sender_id: Uuid,
        sender_username: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.messages.push(ChatMessage {
            id: None,
            sender_id,
            sender_username: sender_username.to_string(),
            content: content.to_string(),
            timestamp,
            pending: true,
        });
    }

    /// Reconcile an optimistic entry with the server-persisted record: the
    /// oldest pending entry matching sender and content takes over the
    /// stored id and timestamp. Returns false if no entry matched (e.g. the
    /// view was rebuilt in between).
    pub fn resolve_optimistic(&mut self, stored: &MessageResponse) -> bool {
        let Some(entry) = self.messages.iter_mut().find(|m| {
            m.pending && m.sender_id == stored.sender_id && m.content == stored.content
        }) else {
            return false;
        };

        entry.id = Some(stored.id);
        entry.timestamp = stored.created_at;
        entry.pending = false;
        self.seen_ids.insert(stored.id);
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}
