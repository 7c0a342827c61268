//! The `Database` trait — single async interface for all persistence.
//!
//! The store is a keyed record repository with equality predicates and
//! timestamp ordering; foreign keys are followed manually by callers.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    Conversation, ConversationStatus, Guardian, Message, MessageStatus, RecommendedAction, Rfa,
    SenderType,
};

/// Backend-agnostic database trait covering guardians, conversations,
/// and messages.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Guardians ───────────────────────────────────────────────────

    /// Look up a guardian by its unique (phone_number, school_id) key.
    async fn find_guardian(
        &self,
        phone_number: &str,
        school_id: &str,
    ) -> Result<Option<Guardian>, DatabaseError>;

    /// Look up a guardian by phone number alone (inbound webhook path —
    /// the sender doesn't tell us the school).
    async fn find_guardian_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Guardian>, DatabaseError>;

    async fn get_guardian(&self, id: Uuid) -> Result<Option<Guardian>, DatabaseError>;

    /// Conditional insert keyed on (phone_number, school_id).
    ///
    /// Returns the surviving row whether or not this call created it. Safe
    /// under concurrent calls for the same key: the insert is
    /// `ON CONFLICT DO NOTHING`, never check-then-insert.
    async fn create_guardian_if_absent(
        &self,
        phone_number: &str,
        school_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Guardian, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Insert a new conversation in `in_progress`.
    ///
    /// Fails with [`DatabaseError::Constraint`] if the guardian already has a
    /// non-completed conversation at this school.
    async fn insert_conversation(
        &self,
        student_id: &str,
        school_id: &str,
        absence_id: &str,
        guardian_id: Uuid,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError>;

    /// The guardian's current non-completed conversation at a school, if any.
    async fn find_active_conversation(
        &self,
        guardian_id: Uuid,
        school_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// Apply a classifier verdict: status, reason-for-absence, and (when the
    /// status warrants one) the recommended action, in one write.
    async fn set_conversation_verdict(
        &self,
        id: Uuid,
        status: ConversationStatus,
        rfa: Option<Rfa>,
        recommended_action: Option<RecommendedAction>,
    ) -> Result<(), DatabaseError>;

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message to a conversation's log.
    async fn insert_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender_type: SenderType,
        status: MessageStatus,
    ) -> Result<Message, DatabaseError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError>;

    /// Correlate a delivery callback to its message.
    async fn find_message_by_transport_handle(
        &self,
        handle: &str,
    ) -> Result<Option<Message>, DatabaseError>;

    /// All messages of a conversation in `created_at` order — the transcript
    /// handed to the classifier.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, DatabaseError>;

    /// Messages parked for human approval, oldest first, optionally scoped to
    /// one conversation.
    async fn list_awaiting_approval(
        &self,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Fold a transport send response into the message record (dispatch path;
    /// written exactly once per message).
    async fn set_message_dispatched(
        &self,
        id: Uuid,
        status: MessageStatus,
        was_downgraded: Option<bool>,
        transport_handle: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Fold an async delivery callback into the message record.
    async fn set_message_delivery(
        &self,
        id: Uuid,
        status: MessageStatus,
        was_downgraded: Option<bool>,
    ) -> Result<(), DatabaseError>;
}
