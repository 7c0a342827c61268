//! Approval gate — human sign-off for parked outbound messages.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Message, MessageStatus};
use crate::store::Database;

use super::messages::MessageLifecycleManager;

/// Holds admin-authored drafts pending sign-off and pushes approved ones out.
///
/// This is the only path by which an `awaiting_approval` message moves
/// forward when auto-approval is disabled.
#[derive(Clone)]
pub struct ApprovalGate {
    db: Arc<dyn Database>,
    messages: MessageLifecycleManager,
}

impl ApprovalGate {
    pub fn new(db: Arc<dyn Database>, messages: MessageLifecycleManager) -> Self {
        Self { db, messages }
    }

    /// Messages parked for approval, oldest first, optionally scoped to one
    /// conversation.
    pub async fn list_pending(&self, conversation_id: Option<Uuid>) -> Result<Vec<Message>> {
        Ok(self.db.list_awaiting_approval(conversation_id).await?)
    }

    /// Approve and dispatch one parked message.
    ///
    /// The message must currently be `awaiting_approval`; anything else is an
    /// invalid-state error, never a silent no-op. The conversation → guardian
    /// → phone chain is read sequentially and fails fast at the first gap.
    pub async fn approve(&self, message_id: Uuid) -> Result<Message> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or_else(|| Error::not_found("message", message_id))?;

        if message.status != MessageStatus::AwaitingApproval {
            return Err(Error::InvalidState(format!(
                "message {} is {}, not awaiting_approval",
                message.id,
                message.status.as_str()
            )));
        }

        let conversation = self
            .db
            .get_conversation(message.conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", message.conversation_id))?;

        let guardian = self
            .db
            .get_guardian(conversation.guardian_id)
            .await?
            .ok_or_else(|| Error::not_found("guardian", conversation.guardian_id))?;

        if guardian.phone_number.is_empty() {
            return Err(Error::not_found("guardian phone number", guardian.id));
        }

        let dispatched = self
            .messages
            .dispatch(&message, &guardian.phone_number)
            .await?;

        info!(
            message_id = %dispatched.id,
            conversation_id = %conversation.id,
            "Message approved and sent"
        );
        Ok(dispatched)
    }
}
