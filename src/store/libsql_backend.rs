//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored
//! as RFC 3339 TEXT.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    Conversation, ConversationStatus, Guardian, Message, MessageStatus, RecommendedAction, Rfa,
    SenderType,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Wrap a libsql error, distinguishing constraint violations.
fn map_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let text = e.to_string();
    if text.contains("UNIQUE constraint") || text.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {text}"))
    } else {
        DatabaseError::Query(format!("{op}: {text}"))
    }
}

/// Parse an RFC 3339 datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

const GUARDIAN_COLUMNS: &str = "id, phone_number, school_id, first_name, last_name";

fn row_to_guardian(row: &libsql::Row) -> Result<Guardian, libsql::Error> {
    let id: String = row.get(0)?;
    Ok(Guardian {
        id: parse_uuid(&id),
        phone_number: row.get(1)?,
        school_id: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, student_id, school_id, absence_id, guardian_id, rfa, status, recommended_action, created_at";

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, libsql::Error> {
    let id: String = row.get(0)?;
    let guardian_id: String = row.get(4)?;
    let rfa: Option<String> = row.get(5).ok();
    let status: String = row.get(6)?;
    let recommended_action: Option<String> = row.get(7).ok();
    let created_at: String = row.get(8)?;

    Ok(Conversation {
        id: parse_uuid(&id),
        student_id: row.get(1)?,
        school_id: row.get(2)?,
        absence_id: row.get(3)?,
        guardian_id: parse_uuid(&guardian_id),
        rfa: rfa.as_deref().and_then(Rfa::parse),
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::InProgress),
        recommended_action: recommended_action
            .as_deref()
            .and_then(RecommendedAction::parse),
        created_at: parse_datetime(&created_at),
    })
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, content, sender_type, status, was_downgraded, transport_handle, created_at";

fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let was_downgraded: Option<i64> = row.get(5).ok();
    let transport_handle: Option<String> = row.get(6).ok();
    let created_at: String = row.get(7)?;

    Ok(Message {
        id: parse_uuid(&id),
        conversation_id: parse_uuid(&conversation_id),
        content: row.get(2)?,
        sender_type: SenderType::parse(&sender_type).unwrap_or(SenderType::Admin),
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::AwaitingApproval),
        was_downgraded: was_downgraded.map(|v| v != 0),
        transport_handle,
        created_at: parse_datetime(&created_at),
    })
}

// ── Database impl ───────────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn find_guardian(
        &self,
        phone_number: &str,
        school_id: &str,
    ) -> Result<Option<Guardian>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {GUARDIAN_COLUMNS} FROM guardians
                     WHERE phone_number = ?1 AND school_id = ?2"
                ),
                params![phone_number, school_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_guardian: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_guardian(&row).map_err(|e| {
                DatabaseError::Query(format!("find_guardian row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_guardian: {e}"))),
        }
    }

    async fn find_guardian_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<Guardian>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {GUARDIAN_COLUMNS} FROM guardians
                     WHERE phone_number = ?1 ORDER BY created_at ASC LIMIT 1"
                ),
                params![phone_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_guardian_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_guardian(&row).map_err(|e| {
                DatabaseError::Query(format!("find_guardian_by_phone row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_guardian_by_phone: {e}"))),
        }
    }

    async fn get_guardian(&self, id: Uuid) -> Result<Option<Guardian>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_guardian: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_guardian(&row).map_err(|e| {
                DatabaseError::Query(format!("get_guardian row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_guardian: {e}"))),
        }
    }

    async fn create_guardian_if_absent(
        &self,
        phone_number: &str,
        school_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Guardian, DatabaseError> {
        // Conditional insert: the UNIQUE index on (phone_number, school_id)
        // makes this race-safe. On a hit the existing row wins and the names
        // on this call are ignored.
        self.conn()
            .execute(
                "INSERT INTO guardians (id, phone_number, school_id, first_name, last_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(phone_number, school_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    phone_number,
                    school_id,
                    first_name,
                    last_name,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_err("create_guardian_if_absent", e))?;

        self.find_guardian(phone_number, school_id)
            .await?
            .ok_or_else(|| {
                DatabaseError::Query(format!(
                    "create_guardian_if_absent: row vanished for {phone_number}"
                ))
            })
    }

    async fn insert_conversation(
        &self,
        student_id: &str,
        school_id: &str,
        absence_id: &str,
        guardian_id: Uuid,
    ) -> Result<Conversation, DatabaseError> {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            school_id: school_id.to_string(),
            absence_id: absence_id.to_string(),
            guardian_id,
            rfa: None,
            status: ConversationStatus::InProgress,
            recommended_action: None,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO conversations
                     (id, student_id, school_id, absence_id, guardian_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.id.to_string(),
                    student_id,
                    school_id,
                    absence_id,
                    guardian_id.to_string(),
                    conversation.status.as_str(),
                    conversation.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_err("insert_conversation", e))?;

        debug!(conversation_id = %conversation.id, guardian_id = %guardian_id, "Conversation created");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row).map_err(|e| {
                DatabaseError::Query(format!("get_conversation row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn find_active_conversation(
        &self,
        guardian_id: Uuid,
        school_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE guardian_id = ?1 AND school_id = ?2 AND status != 'completed'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![guardian_id.to_string(), school_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_active_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row).map_err(|e| {
                DatabaseError::Query(format!("find_active_conversation row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_active_conversation: {e}"))),
        }
    }

    async fn set_conversation_verdict(
        &self,
        id: Uuid,
        status: ConversationStatus,
        rfa: Option<Rfa>,
        recommended_action: Option<RecommendedAction>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET status = ?1, rfa = ?2, recommended_action = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    rfa.map(|r| r.as_str()),
                    recommended_action.map(|a| a.as_str()),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| map_write_err("set_conversation_verdict", e))?;

        debug!(conversation_id = %id, status = status.as_str(), "Conversation verdict applied");
        Ok(())
    }

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| map_write_err("set_conversation_status", e))?;

        debug!(conversation_id = %id, status = status.as_str(), "Conversation status updated");
        Ok(())
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        sender_type: SenderType,
        status: MessageStatus,
    ) -> Result<Message, DatabaseError> {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            content: content.to_string(),
            sender_type,
            status,
            was_downgraded: None,
            transport_handle: None,
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO messages (id, conversation_id, content, sender_type, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    conversation_id.to_string(),
                    content,
                    sender_type.as_str(),
                    status.as_str(),
                    message.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_err("insert_message", e))?;

        debug!(message_id = %message.id, conversation_id = %conversation_id,
               sender = sender_type.as_str(), "Message appended");
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row).map_err(|e| {
                DatabaseError::Query(format!("get_message row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn find_message_by_transport_handle(
        &self,
        handle: &str,
    ) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE transport_handle = ?1"),
                params![handle],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_message_by_transport_handle: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row).map_err(|e| {
                DatabaseError::Query(format!("find_message_by_transport_handle row parse: {e}"))
            })?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "find_message_by_transport_handle: {e}"
            ))),
        }
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            messages.push(row_to_message(&row).map_err(|e| {
                DatabaseError::Query(format!("list_messages row parse: {e}"))
            })?);
        }
        Ok(messages)
    }

    async fn list_awaiting_approval(
        &self,
        conversation_id: Option<Uuid>,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = match conversation_id {
            Some(cid) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE status = 'awaiting_approval' AND conversation_id = ?1
                         ORDER BY created_at ASC, rowid ASC"
                    ),
                    params![cid.to_string()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE status = 'awaiting_approval'
                         ORDER BY created_at ASC, rowid ASC"
                    ),
                    (),
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_awaiting_approval: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            messages.push(row_to_message(&row).map_err(|e| {
                DatabaseError::Query(format!("list_awaiting_approval row parse: {e}"))
            })?);
        }
        Ok(messages)
    }

    async fn set_message_dispatched(
        &self,
        id: Uuid,
        status: MessageStatus,
        was_downgraded: Option<bool>,
        transport_handle: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE messages SET status = ?1, was_downgraded = ?2, transport_handle = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    was_downgraded.map(i64::from),
                    transport_handle,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| map_write_err("set_message_dispatched", e))?;

        debug!(message_id = %id, status = status.as_str(), "Message dispatched");
        Ok(())
    }

    async fn set_message_delivery(
        &self,
        id: Uuid,
        status: MessageStatus,
        was_downgraded: Option<bool>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE messages SET status = ?1,
                        was_downgraded = COALESCE(?2, was_downgraded)
                 WHERE id = ?3",
                params![status.as_str(), was_downgraded.map(i64::from), id.to_string()],
            )
            .await
            .map_err(|e| map_write_err("set_message_delivery", e))?;

        debug!(message_id = %id, status = status.as_str(), "Delivery status folded in");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn guardian_conditional_insert_is_idempotent() {
        let db = test_db().await;

        let first = db
            .create_guardian_if_absent("16509245188", "school-1", "Sally", "Smith")
            .await
            .unwrap();
        // Different names on the second call are ignored — the original
        // identity survives.
        let second = db
            .create_guardian_if_absent("16509245188", "school-1", "Jessy", "Johnson")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.first_name, "Sally");

        // Same phone at another school is a distinct guardian.
        let other_school = db
            .create_guardian_if_absent("16509245188", "school-2", "Sally", "Smith")
            .await
            .unwrap();
        assert_ne!(first.id, other_school.id);
    }

    #[tokio::test]
    async fn concurrent_resolves_yield_one_guardian() {
        let db = Arc::new(test_db().await);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.create_guardian_if_absent("15551234567", "school-1", "Pat", "Lee")
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "concurrent resolves must share one row");
    }

    #[tokio::test]
    async fn one_active_conversation_per_guardian_school() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550001111", "school-1", "A", "B")
            .await
            .unwrap();

        let first = db
            .insert_conversation("S001", "school-1", "a1", guardian.id)
            .await
            .unwrap();

        let second = db
            .insert_conversation("S001", "school-1", "a2", guardian.id)
            .await;
        assert!(matches!(second, Err(DatabaseError::Constraint(_))));

        // Completing the first frees the slot.
        db.set_conversation_status(first.id, ConversationStatus::Completed)
            .await
            .unwrap();
        db.insert_conversation("S001", "school-1", "a2", guardian.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_conversation_lookup_skips_completed() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550002222", "school-1", "A", "B")
            .await
            .unwrap();

        assert!(
            db.find_active_conversation(guardian.id, "school-1")
                .await
                .unwrap()
                .is_none()
        );

        let conv = db
            .insert_conversation("S002", "school-1", "a1", guardian.id)
            .await
            .unwrap();
        let active = db
            .find_active_conversation(guardian.id, "school-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, conv.id);

        db.set_conversation_status(conv.id, ConversationStatus::Completed)
            .await
            .unwrap();
        assert!(
            db.find_active_conversation(guardian.id, "school-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn verdict_updates_status_rfa_and_action() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550003333", "school-1", "A", "B")
            .await
            .unwrap();
        let conv = db
            .insert_conversation("S003", "school-1", "a1", guardian.id)
            .await
            .unwrap();

        db.set_conversation_verdict(
            conv.id,
            ConversationStatus::ActionNeeded,
            Some(Rfa::UnexcusedOverslept),
            Some(RecommendedAction::AttendanceOfficerTakeOver),
        )
        .await
        .unwrap();

        let loaded = db.get_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::ActionNeeded);
        assert_eq!(loaded.rfa, Some(Rfa::UnexcusedOverslept));
        assert_eq!(
            loaded.recommended_action,
            Some(RecommendedAction::AttendanceOfficerTakeOver)
        );
    }

    #[tokio::test]
    async fn messages_list_in_created_at_order() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550004444", "school-1", "A", "B")
            .await
            .unwrap();
        let conv = db
            .insert_conversation("S004", "school-1", "a1", guardian.id)
            .await
            .unwrap();

        for i in 0..3 {
            db.insert_message(
                conv.id,
                &format!("message {i}"),
                SenderType::Admin,
                MessageStatus::AwaitingApproval,
            )
            .await
            .unwrap();
        }

        let messages = db.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "message 0");
        assert_eq!(messages[2].content, "message 2");
    }

    #[tokio::test]
    async fn dispatch_and_delivery_updates() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550005555", "school-1", "A", "B")
            .await
            .unwrap();
        let conv = db
            .insert_conversation("S005", "school-1", "a1", guardian.id)
            .await
            .unwrap();
        let msg = db
            .insert_message(
                conv.id,
                "hello",
                SenderType::Admin,
                MessageStatus::AwaitingApproval,
            )
            .await
            .unwrap();

        db.set_message_dispatched(msg.id, MessageStatus::Queued, Some(false), Some("h-1"))
            .await
            .unwrap();
        let loaded = db
            .find_message_by_transport_handle("h-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, msg.id);
        assert_eq!(loaded.status, MessageStatus::Queued);
        assert_eq!(loaded.was_downgraded, Some(false));

        // Delivery callback without a downgrade flag keeps the stored one.
        db.set_message_delivery(msg.id, MessageStatus::Delivered, None)
            .await
            .unwrap();
        let loaded = db.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Delivered);
        assert_eq!(loaded.was_downgraded, Some(false));

        assert!(
            db.find_message_by_transport_handle("h-unknown")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn awaiting_approval_listing() {
        let db = test_db().await;
        let guardian = db
            .create_guardian_if_absent("15550006666", "school-1", "A", "B")
            .await
            .unwrap();
        let conv = db
            .insert_conversation("S006", "school-1", "a1", guardian.id)
            .await
            .unwrap();

        let pending = db
            .insert_message(
                conv.id,
                "gated",
                SenderType::Admin,
                MessageStatus::AwaitingApproval,
            )
            .await
            .unwrap();
        db.insert_message(conv.id, "inbound", SenderType::Guardian, MessageStatus::Received)
            .await
            .unwrap();

        let all = db.list_awaiting_approval(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, pending.id);

        let scoped = db.list_awaiting_approval(Some(conv.id)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        let none = db.list_awaiting_approval(Some(Uuid::new_v4())).await.unwrap();
        assert!(none.is_empty());
    }
}
