use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use campuslink_db::models::SessionRow;
use campuslink_types::api::{MessageResponse, SendMessageRequest};
use campuslink_types::models::SessionStatus;

use crate::auth::AppStateInner;
use crate::middleware::Claims;
use crate::parse_db_timestamp;

/// Persist a message in a session the caller participates in. The live copy
/// travels over the relay on a separate path; this endpoint only stores the
/// durable record and hands back the server-assigned id and timestamp.
pub async fn send_message(
    State(state): State<Arc<AppStateInner>>,
    Path(session_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let session = load_session(&state, session_id).await?;
    authorize_participant(&session, claims.sub)?;

    // Messages may only be created while the session is confirmed.
    if SessionStatus::parse(&session.status) != Some(SessionStatus::Confirmed) {
        warn!(
            "{} tried to message session {} in status '{}'",
            claims.sub, session_id, session.status
        );
        return Err(StatusCode::FORBIDDEN);
    }

    let message_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let sid = session_id.to_string();
    let mid = message_id.to_string();
    let uid = claims.sub.to_string();
    let body = content.clone();
    let created = now.to_rfc3339();
    tokio::task::spawn_blocking(move || db.db.insert_message(&mid, &sid, &uid, &body, &created))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            session_id,
            sender_id: claims.sub,
            sender_username: claims.username.clone(),
            content,
            created_at: now,
        }),
    ))
}

/// Durable history for a session, oldest first, exactly as stored.
pub async fn get_messages(
    State(state): State<Arc<AppStateInner>>,
    Path(session_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let session = load_session(&state, session_id).await?;
    authorize_participant(&session, claims.sub)?;

    let db = state.clone();
    let sid = session_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.get_messages(&sid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .map(|row| MessageResponse {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt message id '{}': {}", row.id, e);
                Uuid::default()
            }),
            session_id: row.session_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt session_id '{}' on message '{}': {}", row.session_id, row.id, e);
                Uuid::default()
            }),
            sender_id: row.sender_id.parse().unwrap_or_else(|e| {
                warn!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e);
                Uuid::default()
            }),
            sender_username: row.sender_username,
            created_at: parse_db_timestamp(&row.created_at, &format!("message '{}'", row.id)),
            content: row.content,
        })
        .collect();

    Ok(Json(messages))
}

pub(crate) async fn load_session(
    state: &Arc<AppStateInner>,
    session_id: Uuid,
) -> Result<SessionRow, StatusCode> {
    let db = state.clone();
    let sid = session_id.to_string();
    tokio::task::spawn_blocking(move || db.db.get_session(&sid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)
}

pub(crate) fn authorize_participant(session: &SessionRow, user_id: Uuid) -> Result<(), StatusCode> {
    let is_participant = session.provider_id == user_id.to_string()
        || session.requester_id == user_id.to_string();
    if is_participant {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}
