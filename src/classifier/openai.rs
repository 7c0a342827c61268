//! OpenAI-backed classifier adapter.
//!
//! Marshals the fixed prompt contract into a chat-completions call with a
//! JSON response format and validates the reply. The advisory tie-break
//! policy (an "Excused - …" reason biases toward mark_as_completed, an
//! ambiguous one toward attendance_officer_take_over) lives here in the
//! prompt text; the state machine accepts whatever validated value comes
//! back.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::ClassifierError;
use crate::model::{ALL_RFAS, Conversation};

use super::{Classifier, RawVerdict, TranscriptEntry, Verdict};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const SYSTEM_PROMPT: &str =
    "You are an assistant helping a school process absence conversations with guardians.";

/// Credentials and model selection for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl ClassifierConfig {
    /// Build from environment variables. Returns `None` if no API key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        Some(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("ABSENCE_LINE_CLASSIFIER_MODEL")
                .unwrap_or_else(|_| "gpt-4o-2024-08-06".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// reqwest-based OpenAI classifier.
pub struct OpenAiClassifier {
    config: ClassifierConfig,
    http: reqwest::Client,
}

impl OpenAiClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(
        &self,
        transcript: &[TranscriptEntry],
        conversation: &Conversation,
    ) -> Result<Verdict, ClassifierError> {
        let prompt = build_prompt(transcript, conversation)?;
        debug!(conversation_id = %conversation.id, "Requesting classification");

        let response = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&serde_json::json!({
                "model": self.config.model,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
            }))
            .send()
            .await
            .map_err(|e| ClassifierError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Request(format!("HTTP {status}: {body}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Request(format!("bad completion response: {e}")))?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifierError::InvalidVerdict("empty choices".into()))?;

        let raw: RawVerdict = serde_json::from_str(content)?;
        Verdict::validate(raw)
    }
}

/// Render the prompt contract for one classification call.
fn build_prompt(
    transcript: &[TranscriptEntry],
    conversation: &Conversation,
) -> Result<String, ClassifierError> {
    let history = serde_json::to_string_pretty(transcript)?;
    let reasons: Vec<&str> = ALL_RFAS.iter().map(|r| r.as_str()).collect();
    let reasons = serde_json::to_string(&reasons)?;

    Ok(format!(
        r#"Given the following conversation between a guardian of a recently absent student
and a school admin who reached out to understand why the student was absent
(student id {student_id}), analyze it and provide:
1. A reason for absence (rfa) if one has been made clear, chosen from the list
   below. If not clear, use null.
2. An updated conversation_status, either "in_progress" or "action_needed".
3. Only if conversation_status is "action_needed": a recommended_action,
   either "mark_as_completed" or "attendance_officer_take_over". Otherwise null.
4. A response_content text to send back to the guardian.

Allowed rfa values:
{reasons}

Conversation history (chronological):
{history}

Respond with a JSON object of this exact shape:
{{
    "rfa": "Excused - Sick" or null,
    "conversation_status": "in_progress" or "action_needed",
    "recommended_action": "mark_as_completed" or null,
    "response_content": "text message to the guardian"
}}

Guidelines:
- Be friendly and empathetic.
- If the rfa is "Excused - ..." the recommended_action should typically be "mark_as_completed".
- If the guardian gave a clear reason but you are unsure whether it is excused
  or unexcused, pick one and set recommended_action to "attendance_officer_take_over".
- If you escalate to the attendance officer, tell the guardian they will be in touch soon.
- If asked how to report future absences, say a text message to this number is enough.
- Keep response_content concise; it is sent as a text message."#,
        student_id = conversation.student_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationStatus, SenderType};
    use chrono::Utc;
    use uuid::Uuid;

    fn conversation() -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            student_id: "S003".into(),
            school_id: "school-1".into(),
            absence_id: "a1".into(),
            guardian_id: Uuid::new_v4(),
            rfa: None,
            status: ConversationStatus::InProgress,
            recommended_action: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_carries_transcript_and_domains() {
        let transcript = vec![
            TranscriptEntry {
                content: "Why was Bob absent?".into(),
                sender_type: SenderType::Admin,
                timestamp: Utc::now(),
            },
            TranscriptEntry {
                content: "My son was sick".into(),
                sender_type: SenderType::Guardian,
                timestamp: Utc::now(),
            },
        ];

        let prompt = build_prompt(&transcript, &conversation()).unwrap();
        assert!(prompt.contains("My son was sick"));
        assert!(prompt.contains("Excused - Sick"));
        assert!(prompt.contains("Unexcused - Misunderstanding of schedule"));
        assert!(prompt.contains("S003"));
        assert!(prompt.contains("attendance_officer_take_over"));
    }
}
