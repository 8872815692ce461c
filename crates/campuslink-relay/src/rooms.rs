use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use campuslink_types::events::RelayEvent;

/// Routing table for session rooms. Membership is ephemeral: it exists only
/// for the lifetime of the WebSocket connection that registered it.
#[derive(Clone)]
pub struct Rooms {
    inner: Arc<RoomsInner>,
}

struct RoomsInner {
    /// session_id -> (conn_id -> per-connection event sender)
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<RelayEvent>>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RoomsInner {
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection in a session's room. Rejoining with the same
    /// conn_id replaces the existing entry, so repeated joins never
    /// accumulate registrations.
    pub async fn join(&self, session_id: Uuid, conn_id: Uuid, tx: mpsc::UnboundedSender<RelayEvent>) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.entry(session_id).or_default().insert(conn_id, tx);
    }

    pub async fn leave(&self, session_id: Uuid, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&session_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&session_id);
            }
        }
    }

    /// Drop a connection from every room it joined. Called on disconnect.
    pub async fn leave_all(&self, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Forward an event to every member of the session's room except the
    /// sending connection. Returns the number of members it was sent to.
    pub async fn relay(&self, session_id: Uuid, sender_conn: Uuid, event: RelayEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&session_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (&conn_id, tx) in members.iter() {
            if conn_id == sender_conn {
                continue;
            }
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn member_count(&self, session_id: Uuid) -> usize {
        let rooms = self.inner.rooms.read().await;
        rooms.get(&session_id).map_or(0, |m| m.len())
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_for(session_id: Uuid) -> RelayEvent {
        RelayEvent::MessageReceive {
            session_id,
            sender_id: Uuid::new_v4(),
            sender_username: "alice".into(),
            content: "hi".into(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn relay_skips_the_sender() {
        let rooms = Rooms::new();
        let session = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();

        rooms.join(session, conn_a, tx_a).await;
        rooms.join(session, conn_b, tx_b).await;

        let delivered = rooms.relay(session, conn_a, message_for(session)).await;
        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejoin_does_not_accumulate_members() {
        let rooms = Rooms::new();
        let session = Uuid::new_v4();
        let conn = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        rooms.join(session, conn, tx.clone()).await;
        rooms.join(session, conn, tx).await;
        assert_eq!(rooms.member_count(session).await, 1);

        rooms.leave(session, conn).await;
        assert_eq!(rooms.member_count(session).await, 0);
    }

    #[tokio::test]
    async fn leave_all_clears_every_room() {
        let rooms = Rooms::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        rooms.join(s1, conn, tx.clone()).await;
        rooms.join(s2, conn, tx).await;

        rooms.leave_all(conn).await;
        assert_eq!(rooms.member_count(s1).await, 0);
        assert_eq!(rooms.member_count(s2).await, 0);
    }

    #[tokio::test]
    async fn relay_to_empty_room_delivers_nothing() {
        let rooms = Rooms::new();
        let session = Uuid::new_v4();
        let delivered = rooms.relay(session, Uuid::new_v4(), message_for(session)).await;
        assert_eq!(delivered, 0);
    }
}
