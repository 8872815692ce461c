use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent from the relay to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A live message forwarded to the other members of a session's room.
    /// Carries no server-assigned id: the durable copy is persisted through
    /// the data service on a separate path.
    MessageReceive {
        session_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Commands sent FROM client TO the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Register interest in a session's message stream
    JoinRoom { session_id: Uuid },

    /// Relinquish room membership
    LeaveRoom { session_id: Uuid },

    /// Transmit a message to the other members of the session's room.
    /// The timestamp is generated by the sender.
    SendMessage {
        session_id: Uuid,
        sender_id: Uuid,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format_is_tagged() {
        let cmd = RelayCommand::JoinRoom {
            session_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"JoinRoom\""));
        assert!(json.contains("\"data\""));

        let back: RelayCommand = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, RelayCommand::JoinRoom { session_id } if session_id.is_nil()));
    }
}
