//! Guardian identity resolution.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Guardian, normalize_phone};
use crate::store::Database;

/// Finds-or-creates guardian identities keyed by (phone number, school).
#[derive(Clone)]
pub struct GuardianResolver {
    db: Arc<dyn Database>,
}

impl GuardianResolver {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Resolve a guardian id for the given key, creating the record on first
    /// contact.
    ///
    /// On a hit the supplied names are ignored — the original identity wins
    /// even if the report spells the guardian differently. Concurrent calls
    /// for the same key resolve to the same row; the underlying insert is a
    /// single conditional write, never check-then-insert.
    pub async fn resolve(
        &self,
        phone_number: &str,
        school_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Guardian> {
        let phone = normalize_phone(phone_number);
        if phone.is_empty() {
            return Err(Error::Validation("guardian phone number is empty".into()));
        }

        let guardian = self
            .db
            .create_guardian_if_absent(&phone, school_id, first_name, last_name)
            .await?;
        debug!(guardian_id = %guardian.id, phone = %phone, "Guardian resolved");
        Ok(guardian)
    }
}
