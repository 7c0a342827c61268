//! Request handlers.
//!
//! Webhook payloads are deserialized with every field optional and validated
//! by hand so missing fields come back as a 400 with a useful message rather
//! than a deserialization rejection.

use axum::extract::{Path, Query, State};
use axum::{Json, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Absence, Message, MessageStatus, normalize_phone};
use crate::tracker::ReplyOutcome;

use super::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ── Conversation initiation ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub school_id: String,
    /// Overrides the service-wide approval policy for this batch.
    pub auto_approve: Option<bool>,
    pub absences: Vec<Absence>,
}

/// POST /conversations/initiate
///
/// Accepts an absence report, filters it down to unexplained rows, and opens
/// a conversation per row in the background. Responds immediately with the
/// accepted rows; per-row failures (duplicate active conversation, transport
/// rejection) are logged, not surfaced here.
pub async fn initiate(
    State(state): State<AppState>,
    Json(request): Json<InitiateRequest>,
) -> Result<impl IntoResponse> {
    if request.school_id.trim().is_empty() {
        return Err(Error::Validation("school_id is empty".into()));
    }

    let auto_approve = request.auto_approve.unwrap_or(state.auto_approve);
    let unexplained: Vec<Absence> = request
        .absences
        .into_iter()
        .filter(Absence::is_unexplained)
        .collect();

    info!(
        school_id = %request.school_id,
        count = unexplained.len(),
        auto_approve,
        "Initiating conversations"
    );

    let accepted: Vec<_> = unexplained
        .iter()
        .map(|a| {
            json!({
                "student_id": a.student_id,
                "absence_id": a.id,
                "guardian_phone": a.guardian_phone,
            })
        })
        .collect();

    for absence in unexplained {
        let tracker = state.tracker.clone();
        let school_id = request.school_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.open(&absence, &school_id, auto_approve).await {
                error!(
                    absence_id = %absence.id,
                    student_id = %absence.student_id,
                    error = %e,
                    "Failed to open conversation"
                );
            }
        });
    }

    Ok(Json(json!({
        "status": "Conversations are being initiated",
        "initiated_conversations": accepted,
    })))
}

/// POST /conversations/{conversation_id}/complete
pub async fn complete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.tracker.mark_completed(conversation_id).await?;
    Ok(Json(json!({ "status": "Conversation marked as completed" })))
}

// ── Approval ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub conversation_id: Option<Uuid>,
}

/// GET /messages/pending
pub async fn pending_messages(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<Vec<Message>>> {
    let pending = state.tracker.list_pending(query.conversation_id).await?;
    Ok(Json(pending))
}

/// POST /messages/{message_id}/approve
pub async fn approve_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let message = state.tracker.approve_pending(message_id).await?;
    Ok(Json(json!({
        "status": "Message approved and sent",
        "dispatch_result": {
            "status": message.status,
            "transport_handle": message.transport_handle,
            "was_downgraded": message.was_downgraded,
        },
    })))
}

// ── Provider webhooks ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeliveryStatusPayload {
    pub message_handle: Option<String>,
    pub status: Option<String>,
    pub was_downgraded: Option<bool>,
}

/// POST /webhooks/delivery_status
///
/// Correlates by transport handle; replays of the same status are an
/// idempotent no-op.
pub async fn delivery_status(
    State(state): State<AppState>,
    Json(payload): Json<DeliveryStatusPayload>,
) -> Result<impl IntoResponse> {
    let handle = payload
        .message_handle
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Validation("message_handle is required".into()))?;
    let status_str = payload
        .status
        .ok_or_else(|| Error::Validation("status is required".into()))?;

    let status = MessageStatus::parse(&status_str.to_ascii_lowercase())
        .filter(MessageStatus::is_transport_status)
        .ok_or_else(|| Error::Validation(format!("unknown delivery status {status_str:?}")))?;

    let message = state
        .db
        .find_message_by_transport_handle(&handle)
        .await?
        .ok_or_else(|| Error::not_found("message", &handle))?;

    if message.status == status && message.was_downgraded == payload.was_downgraded {
        return Ok(Json(json!({ "status": "Message status unchanged" })));
    }

    state
        .db
        .set_message_delivery(message.id, status, payload.was_downgraded)
        .await?;

    info!(
        message_id = %message.id,
        status = status.as_str(),
        "Delivery status updated"
    );
    Ok(Json(json!({ "status": "Message status updated" })))
}

#[derive(Debug, Deserialize)]
pub struct InboundMessagePayload {
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub content: Option<String>,
    pub message_handle: Option<String>,
}

/// POST /webhooks/inbound_message
///
/// Resolves the sender to a guardian by normalized phone number, finds their
/// active conversation, and hands the reply to the tracker. All four provider
/// fields must be present.
pub async fn inbound_message(
    State(state): State<AppState>,
    Json(payload): Json<InboundMessagePayload>,
) -> Result<impl IntoResponse> {
    let from_number = payload
        .from_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::Validation("from_number is required".into()))?;
    let to_number = payload
        .to_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| Error::Validation("to_number is required".into()))?;
    let content = payload
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::Validation("content is required".into()))?;
    let message_handle = payload
        .message_handle
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| Error::Validation("message_handle is required".into()))?;

    let phone = normalize_phone(&from_number);
    info!(
        from = %phone,
        to = %to_number,
        handle = %message_handle,
        "Inbound message received"
    );

    let guardian = state
        .db
        .find_guardian_by_phone(&phone)
        .await?
        .ok_or_else(|| Error::not_found("guardian", &phone))?;

    let conversation = state
        .db
        .find_active_conversation(guardian.id, &guardian.school_id)
        .await?
        .ok_or_else(|| Error::not_found("active conversation for guardian", guardian.id))?;

    let outcome = state
        .tracker
        .on_inbound_reply(conversation.id, &content, state.auto_approve)
        .await?;

    Ok(match outcome {
        ReplyOutcome::Replied {
            conversation_id,
            message_id,
            message_status,
        } => Json(json!({
            "status": "Response processed",
            "conversation_id": conversation_id,
            "message_id": message_id,
            "message_status": message_status,
        })),
        ReplyOutcome::Logged {
            conversation_id,
            message_id,
        } => Json(json!({
            "status": "Message logged for human follow-up",
            "conversation_id": conversation_id,
            "message_id": message_id,
        })),
    })
}
