use tracing::debug;
use uuid::Uuid;

use campuslink_types::api::{MessageResponse, SendMessageRequest};

use crate::error::ClientError;

/// Bearer-authenticated client for the message endpoints of the data
/// service. History loading is a pass-through: messages come back in the
/// order the service returns them (oldest first), with no client-side
/// re-sorting.
#[derive(Clone)]
pub struct MessagesApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl MessagesApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Durable message history for a session, oldest first.
    pub async fn load_history(&self, session_id: Uuid) -> Result<Vec<MessageResponse>, ClientError> {
        let url = format!("{}/messages/{}", self.base_url, session_id);
        debug!("loading history from {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ClientError::Fetch)?
            .error_for_status()
            .map_err(ClientError::Fetch)?;

        resp.json().await.map_err(ClientError::Fetch)
    }

    /// Persist a message, returning the stored record with its
    /// server-assigned id and timestamp.
    pub async fn persist(
        &self,
        session_id: Uuid,
        content: &str,
    ) -> Result<MessageResponse, ClientError> {
        let url = format!("{}/messages/{}", self.base_url, session_id);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&SendMessageRequest {
                content: content.to_string(),
            })
            .send()
            .await
            .map_err(ClientError::SendRejected)?
            .error_for_status()
            .map_err(ClientError::SendRejected)?;

        resp.json().await.map_err(ClientError::SendRejected)
    }
}
