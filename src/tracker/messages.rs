//! Message lifecycle: draft → dispatch, plus inbound recording.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result, TransportError};
use crate::model::{Message, MessageStatus, SenderType};
use crate::store::Database;
use crate::transport::SmsTransport;

/// Creates message records and walks them through dispatch.
///
/// Whether a draft is dispatched immediately is the caller's decision (the
/// auto-approve policy lives in the tracker); this component only knows how
/// to move a drafted message forward.
#[derive(Clone)]
pub struct MessageLifecycleManager {
    db: Arc<dyn Database>,
    transport: Arc<dyn SmsTransport>,
    /// URL the provider posts delivery-status callbacks to.
    callback_url: String,
    dispatch_timeout: Duration,
}

impl MessageLifecycleManager {
    pub fn new(
        db: Arc<dyn Database>,
        transport: Arc<dyn SmsTransport>,
        callback_url: String,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            db,
            transport,
            callback_url,
            dispatch_timeout,
        }
    }

    /// Create an outbound draft parked in `awaiting_approval`.
    pub async fn draft(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender_type: SenderType,
    ) -> Result<Message> {
        Ok(self
            .db
            .insert_message(
                conversation_id,
                content,
                sender_type,
                MessageStatus::AwaitingApproval,
            )
            .await?)
    }

    /// Append an inbound guardian message (`received`, terminal).
    pub async fn record_inbound(&self, conversation_id: Uuid, content: &str) -> Result<Message> {
        Ok(self
            .db
            .insert_message(
                conversation_id,
                content,
                SenderType::Guardian,
                MessageStatus::Received,
            )
            .await?)
    }

    /// Attempt the external send and fold the transport response into the
    /// record.
    ///
    /// On any transport failure (rejection, network error, timeout) the row
    /// is left untouched — still `awaiting_approval` — so the approval gate
    /// remains a retry path, and the error propagates.
    pub async fn dispatch(&self, message: &Message, phone_number: &str) -> Result<Message> {
        let receipt = tokio::time::timeout(
            self.dispatch_timeout,
            self.transport
                .send(phone_number, &message.content, &self.callback_url),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.dispatch_timeout))??;

        self.db
            .set_message_dispatched(
                message.id,
                receipt.status,
                receipt.was_downgraded,
                receipt.transport_handle.as_deref(),
            )
            .await?;

        info!(
            message_id = %message.id,
            status = receipt.status.as_str(),
            "Message dispatched"
        );

        self.db
            .get_message(message.id)
            .await?
            .ok_or_else(|| Error::not_found("message", message.id))
    }
}
