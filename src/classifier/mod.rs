//! AI classification of absence conversations.
//!
//! The classifier is a stateless text-in/structured-output-out oracle: it
//! gets the chronological transcript plus a conversation snapshot and returns
//! a verdict. The adapter owns the prompt contract and validates the raw
//! response against the closed value domains — nothing out-of-domain is ever
//! coerced into the state machine.

pub mod openai;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::model::{Conversation, ConversationStatus, Message, RecommendedAction, Rfa, SenderType};

pub use openai::{ClassifierConfig, OpenAiClassifier};

/// One transcript entry handed to the classifier, in arrival order.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub content: String,
    pub sender_type: SenderType,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            sender_type: message.sender_type,
            timestamp: message.created_at,
        }
    }
}

/// Validated classifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub rfa: Option<Rfa>,
    /// Restricted to `in_progress` or `action_needed` — the classifier never
    /// completes or gates a conversation on its own.
    pub conversation_status: ConversationStatus,
    /// Only meaningful when `conversation_status` is `action_needed`.
    pub recommended_action: Option<RecommendedAction>,
    /// Reply text to send to the guardian.
    pub response_content: String,
}

/// Raw JSON shape returned by the model, before domain validation.
#[derive(Debug, Deserialize)]
pub struct RawVerdict {
    pub rfa: Option<String>,
    pub conversation_status: Option<String>,
    pub recommended_action: Option<String>,
    pub response_content: Option<String>,
}

impl Verdict {
    /// Check a raw verdict against the enumerated domains.
    pub fn validate(raw: RawVerdict) -> Result<Self, ClassifierError> {
        let status_str = raw
            .conversation_status
            .ok_or_else(|| ClassifierError::InvalidVerdict("missing conversation_status".into()))?;
        let conversation_status = match ConversationStatus::parse(&status_str) {
            Some(s @ (ConversationStatus::InProgress | ConversationStatus::ActionNeeded)) => s,
            _ => {
                return Err(ClassifierError::InvalidVerdict(format!(
                    "conversation_status {status_str:?} outside {{in_progress, action_needed}}"
                )));
            }
        };

        let rfa = match raw.rfa {
            None => None,
            Some(s) => Some(Rfa::parse(&s).ok_or_else(|| {
                ClassifierError::InvalidVerdict(format!("unknown rfa {s:?}"))
            })?),
        };

        let recommended_action = match raw.recommended_action {
            None => None,
            Some(s) => Some(RecommendedAction::parse(&s).ok_or_else(|| {
                ClassifierError::InvalidVerdict(format!("unknown recommended_action {s:?}"))
            })?),
        };

        let response_content = raw
            .response_content
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ClassifierError::InvalidVerdict("empty response_content".into()))?;

        Ok(Self {
            rfa,
            conversation_status,
            recommended_action,
            response_content,
        })
    }
}

/// The classification oracle.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a conversation from its full transcript. Idempotent per input;
    /// any schema-invalid model output surfaces as an error, never a guess.
    async fn classify(
        &self,
        transcript: &[TranscriptEntry],
        conversation: &Conversation,
    ) -> Result<Verdict, ClassifierError>;
}
