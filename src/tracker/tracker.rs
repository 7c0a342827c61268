//! Conversation state machine and coordination.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, TranscriptEntry, Verdict};
use crate::error::{ClassifierError, DatabaseError, Error, Result};
use crate::model::{
    Absence, Conversation, ConversationStatus, Guardian, Message, MessageStatus, SenderType,
};
use crate::store::Database;
use crate::transport::SmsTransport;

use super::approval::ApprovalGate;
use super::guardians::GuardianResolver;
use super::locks::ConversationLocks;
use super::messages::MessageLifecycleManager;

/// Placeholder substituted into the opening template.
const STUDENT_NAME_VAR: &str = "{student_name}";

/// Tracker wiring that comes from configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Opening message template with a `{student_name}` placeholder.
    pub opening_template: String,
    /// Delivery-callback URL handed to the transport on every send.
    pub callback_url: String,
    pub dispatch_timeout: Duration,
    pub classify_timeout: Duration,
}

/// What `open` produced.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub message_status: MessageStatus,
}

/// What an inbound reply produced.
#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    /// The conversation is already settled or escalated to a human; the
    /// message was recorded for follow-up and nothing else happened.
    Logged {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    /// The classifier ran and a response was drafted (and possibly sent).
    Replied {
        conversation_id: Uuid,
        message_id: Uuid,
        message_status: MessageStatus,
    },
}

/// The central coordinator: owns the conversation lifecycle and routes
/// classifier verdicts into state transitions and outbound sends.
pub struct ConversationTracker {
    db: Arc<dyn Database>,
    resolver: GuardianResolver,
    messages: MessageLifecycleManager,
    gate: ApprovalGate,
    classifier: Arc<dyn Classifier>,
    locks: ConversationLocks,
    opening_template: String,
    classify_timeout: Duration,
}

impl ConversationTracker {
    pub fn new(
        db: Arc<dyn Database>,
        transport: Arc<dyn SmsTransport>,
        classifier: Arc<dyn Classifier>,
        config: TrackerConfig,
    ) -> Self {
        let messages = MessageLifecycleManager::new(
            Arc::clone(&db),
            transport,
            config.callback_url,
            config.dispatch_timeout,
        );
        let gate = ApprovalGate::new(Arc::clone(&db), messages.clone());
        let resolver = GuardianResolver::new(Arc::clone(&db));

        Self {
            db,
            resolver,
            messages,
            gate,
            classifier,
            locks: ConversationLocks::new(),
            opening_template: config.opening_template,
            classify_timeout: config.classify_timeout,
        }
    }

    /// Open a conversation for one absence: resolve the guardian, create the
    /// conversation, draft the templated opening message, and either dispatch
    /// it or park it for approval.
    pub async fn open(
        &self,
        absence: &Absence,
        school_id: &str,
        auto_approve: bool,
    ) -> Result<OpenOutcome> {
        let (first_name, last_name) = absence.guardian_first_last();
        let guardian = self
            .resolver
            .resolve(&absence.guardian_phone, school_id, first_name, last_name)
            .await?;

        if let Some(existing) = self
            .db
            .find_active_conversation(guardian.id, school_id)
            .await?
        {
            return Err(Error::InvalidState(format!(
                "guardian {} already has active conversation {}",
                guardian.id, existing.id
            )));
        }

        let conversation = self
            .db
            .insert_conversation(&absence.student_id, school_id, &absence.id, guardian.id)
            .await
            .map_err(|e| match e {
                // Unique-index backstop for the pre-check race.
                DatabaseError::Constraint(detail) => Error::InvalidState(format!(
                    "guardian {} already has an active conversation ({detail})",
                    guardian.id
                )),
                other => Error::Database(other),
            })?;

        let content = self
            .opening_template
            .replace(STUDENT_NAME_VAR, &absence.student_name);
        let draft = self
            .messages
            .draft(conversation.id, &content, SenderType::Admin)
            .await?;

        info!(
            conversation_id = %conversation.id,
            student_id = %absence.student_id,
            auto_approve,
            "Conversation opened"
        );

        let message = self
            .send_or_gate(&conversation, draft, &guardian, auto_approve)
            .await?;

        Ok(OpenOutcome {
            conversation_id: conversation.id,
            message_id: message.id,
            message_status: message.status,
        })
    }

    /// Fold an inbound guardian reply into the conversation.
    ///
    /// Serialized per conversation: two concurrent replies classify in
    /// arrival order, never interleaved.
    pub async fn on_inbound_reply(
        &self,
        conversation_id: Uuid,
        content: &str,
        auto_approve: bool,
    ) -> Result<ReplyOutcome> {
        let _guard = self.locks.acquire(conversation_id).await;

        let conversation = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;

        let inbound = self.messages.record_inbound(conversation.id, content).await?;

        // A settled conversation (terminal RFA without an open escalation, or
        // explicitly completed) is in human hands: record the message and
        // flag it, no classifier call, no outbound send.
        let settled = conversation.status == ConversationStatus::Completed
            || (conversation.rfa.is_some()
                && conversation.status != ConversationStatus::ActionNeeded);
        if settled {
            warn!(
                conversation_id = %conversation.id,
                status = conversation.status.as_str(),
                "Guardian replied on a settled conversation; flagged for human follow-up"
            );
            return Ok(ReplyOutcome::Logged {
                conversation_id: conversation.id,
                message_id: inbound.id,
            });
        }

        // Chronological transcript, inbound message included.
        let transcript: Vec<TranscriptEntry> = self
            .db
            .list_messages(conversation.id)
            .await?
            .iter()
            .map(TranscriptEntry::from)
            .collect();

        // A failed or timed-out classification leaves the conversation in its
        // last known state; the next inbound message naturally retries.
        let verdict = tokio::time::timeout(
            self.classify_timeout,
            self.classifier.classify(&transcript, &conversation),
        )
        .await
        .map_err(|_| ClassifierError::Timeout(self.classify_timeout))??;

        self.apply_verdict(&conversation, &verdict).await?;

        let guardian = self
            .db
            .get_guardian(conversation.guardian_id)
            .await?
            .ok_or_else(|| Error::not_found("guardian", conversation.guardian_id))?;

        let draft = self
            .messages
            .draft(conversation.id, &verdict.response_content, SenderType::Admin)
            .await?;

        // Re-read so gating sees the post-verdict status.
        let conversation = self
            .db
            .get_conversation(conversation.id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;

        let message = self
            .send_or_gate(&conversation, draft, &guardian, auto_approve)
            .await?;

        Ok(ReplyOutcome::Replied {
            conversation_id: conversation.id,
            message_id: message.id,
            message_status: message.status,
        })
    }

    /// Approve and dispatch one parked message. Conversation status is not
    /// touched — status changes only come from classification or explicit
    /// completion.
    pub async fn approve_pending(&self, message_id: Uuid) -> Result<Message> {
        self.gate.approve(message_id).await
    }

    /// Messages parked for approval, optionally scoped to one conversation.
    pub async fn list_pending(&self, conversation_id: Option<Uuid>) -> Result<Vec<Message>> {
        self.gate.list_pending(conversation_id).await
    }

    /// Admin escape hatch: terminal transition, valid from any state. No
    /// classifier runs on this conversation afterwards.
    pub async fn mark_completed(&self, conversation_id: Uuid) -> Result<()> {
        self.db
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;

        self.db
            .set_conversation_status(conversation_id, ConversationStatus::Completed)
            .await?;
        info!(conversation_id = %conversation_id, "Conversation marked completed");
        Ok(())
    }

    /// Write a classifier verdict: status and RFA always, the recommended
    /// action only when the status calls for one.
    async fn apply_verdict(&self, conversation: &Conversation, verdict: &Verdict) -> Result<()> {
        let recommended_action = match verdict.conversation_status {
            ConversationStatus::ActionNeeded => verdict.recommended_action,
            _ => None,
        };
        self.db
            .set_conversation_verdict(
                conversation.id,
                verdict.conversation_status,
                verdict.rfa,
                recommended_action,
            )
            .await?;

        info!(
            conversation_id = %conversation.id,
            status = verdict.conversation_status.as_str(),
            rfa = verdict.rfa.map(|r| r.as_str()).unwrap_or("null"),
            "Classifier verdict applied"
        );
        Ok(())
    }

    /// The shared auto-approve-or-gate tail of `open` and `on_inbound_reply`.
    ///
    /// When gating, an `in_progress` conversation surfaces as
    /// `awaiting_message_approval` for admin visibility; an `action_needed`
    /// one keeps its status — the escalation outranks visibility.
    async fn send_or_gate(
        &self,
        conversation: &Conversation,
        draft: Message,
        guardian: &Guardian,
        auto_approve: bool,
    ) -> Result<Message> {
        if auto_approve {
            return self.messages.dispatch(&draft, &guardian.phone_number).await;
        }

        if conversation.status == ConversationStatus::InProgress {
            self.db
                .set_conversation_status(conversation.id, ConversationStatus::AwaitingMessageApproval)
                .await?;
        }
        Ok(draft)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
