use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use campuslink_db::models::SessionRow;
use campuslink_types::api::{CreateBookingRequest, UpdateBookingRequest};
use campuslink_types::models::{Session, SessionStatus};

use crate::auth::AppStateInner;
use crate::messages::{authorize_participant, load_session};
use crate::middleware::Claims;
use crate::parse_db_timestamp;

/// Request a session with a provider. The caller becomes the requester and
/// the booking starts out pending until the provider confirms it.
pub async fn create_booking(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.skill_name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.provider_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Provider must be a registered user
    let db = state.clone();
    let pid = req.provider_id.to_string();
    tokio::task::spawn_blocking(move || db.db.get_username_by_id(&pid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let session_id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let db = state.clone();
    let sid = session_id.to_string();
    let skill = req.skill_name.trim().to_string();
    let provider = req.provider_id.to_string();
    let requester = claims.sub.to_string();
    let scheduled = req.scheduled_at.to_rfc3339();
    let created = now.to_rfc3339();
    tokio::task::spawn_blocking(move || {
        db.db
            .create_session(&sid, &skill, &provider, &requester, &scheduled, &created)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(
        "{} booked '{}' with {} (session {})",
        claims.sub, req.skill_name, req.provider_id, session_id
    );

    Ok((
        StatusCode::CREATED,
        Json(Session {
            id: session_id,
            skill_name: req.skill_name.trim().to_string(),
            provider_id: req.provider_id,
            requester_id: claims.sub,
            scheduled_at: req.scheduled_at,
            status: SessionStatus::Pending,
            created_at: now,
        }),
    ))
}

/// All sessions where the caller is provider or requester.
pub async fn my_sessions(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let uid = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.sessions_for_user(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let sessions: Vec<Session> = rows.into_iter().map(session_from_row).collect();
    Ok(Json(sessions))
}

/// Apply a lifecycle transition to a booking. Who is allowed to do what:
/// the provider resolves pending bookings (confirm or cancel), the requester
/// marks a confirmed session completed, and either side may cancel a
/// confirmed session.
pub async fn update_booking(
    State(state): State<Arc<AppStateInner>>,
    Path(session_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = load_session(&state, session_id).await?;
    authorize_participant(&row, claims.sub)?;

    let current = SessionStatus::parse(&row.status).ok_or_else(|| {
        error!("Corrupt status '{}' on session '{}'", row.status, row.id);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !current.can_transition_to(req.status) {
        warn!(
            "{} attempted invalid transition {} -> {} on session {}",
            claims.sub,
            current.as_str(),
            req.status.as_str(),
            session_id
        );
        return Err(StatusCode::CONFLICT);
    }

    let caller = claims.sub.to_string();
    let allowed = match (current, req.status) {
        (SessionStatus::Pending, _) => caller == row.provider_id,
        (SessionStatus::Confirmed, SessionStatus::Completed) => caller == row.requester_id,
        (SessionStatus::Confirmed, SessionStatus::Cancelled) => true,
        _ => false,
    };
    if !allowed {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.clone();
    let sid = session_id.to_string();
    let status = req.status.as_str();
    tokio::task::spawn_blocking(move || db.db.update_session_status(&sid, status))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(
        "Session {} transitioned {} -> {}",
        session_id,
        current.as_str(),
        req.status.as_str()
    );

    let mut session = session_from_row(row);
    session.status = req.status;
    Ok(Json(session))
}

fn session_from_row(row: SessionRow) -> Session {
    Session {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt session id '{}': {}", row.id, e);
            Uuid::default()
        }),
        provider_id: row.provider_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt provider_id '{}' on session '{}': {}", row.provider_id, row.id, e);
            Uuid::default()
        }),
        requester_id: row.requester_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt requester_id '{}' on session '{}': {}", row.requester_id, row.id, e);
            Uuid::default()
        }),
        scheduled_at: parse_db_timestamp(&row.scheduled_at, &format!("session '{}'", row.id)),
        status: SessionStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("Corrupt status '{}' on session '{}'", row.status, row.id);
            SessionStatus::Cancelled
        }),
        created_at: parse_db_timestamp(&row.created_at, &format!("session '{}'", row.id)),
        skill_name: row.skill_name,
    }
}
