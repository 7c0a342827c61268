//! Integration tests for the HTTP surface.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! database and stubbed transport/classifier, and exercises the real REST
//! contract with reqwest.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use uuid::Uuid;

use absence_line::classifier::{Classifier, TranscriptEntry, Verdict};
use absence_line::error::{ClassifierError, TransportError};
use absence_line::http::{AppState, routes};
use absence_line::model::{Conversation, ConversationStatus, MessageStatus, Rfa};
use absence_line::store::{Database, LibSqlBackend};
use absence_line::tracker::{ConversationTracker, TrackerConfig};
use absence_line::transport::{DispatchReceipt, SmsTransport};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const GUARDIAN_PHONE: &str = "+16509245188";

/// Stub transport: accepts every send and hands out sequential handles.
struct StubTransport {
    counter: AtomicUsize,
}

#[async_trait]
impl SmsTransport for StubTransport {
    async fn send(
        &self,
        _phone_number: &str,
        _content: &str,
        _callback_url: &str,
    ) -> Result<DispatchReceipt, TransportError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchReceipt {
            status: MessageStatus::Queued,
            transport_handle: Some(format!("handle-{n}")),
            was_downgraded: Some(false),
        })
    }
}

/// Stub classifier: every reply means the student was sick.
struct StubClassifier;

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(
        &self,
        _transcript: &[TranscriptEntry],
        _conversation: &Conversation,
    ) -> Result<Verdict, ClassifierError> {
        Ok(Verdict {
            rfa: Some(Rfa::ExcusedSick),
            conversation_status: ConversationStatus::InProgress,
            recommended_action: None,
            response_content: "Sorry to hear that, feel better soon!".into(),
        })
    }
}

/// Start a server on a random port, return (base_url, db).
async fn start_server(auto_approve: bool) -> (String, Arc<dyn Database>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let tracker = Arc::new(ConversationTracker::new(
        Arc::clone(&db),
        Arc::new(StubTransport {
            counter: AtomicUsize::new(0),
        }),
        Arc::new(StubClassifier),
        TrackerConfig {
            opening_template: "Hello! Why was {student_name} absent?".into(),
            callback_url: "http://localhost/webhooks/delivery_status".into(),
            dispatch_timeout: Duration::from_secs(5),
            classify_timeout: Duration::from_secs(5),
        },
    ));
    let app = routes(AppState {
        db: Arc::clone(&db),
        tracker,
        auto_approve,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), db)
}

fn inbound_payload(from_number: &str, content: &str, handle: &str) -> Value {
    json!({
        "from_number": from_number,
        "to_number": "+14155550100",
        "content": content,
        "message_handle": handle,
    })
}

fn absence_row(id: &str, rfa: &str) -> Value {
    json!({
        "id": id,
        "student_id": "S003",
        "student_name": "Bob Johnson",
        "date": "2024-09-03",
        "rfa": rfa,
        "guardian_name": "Jessy Johnson",
        "guardian_phone": GUARDIAN_PHONE,
    })
}

/// Initiation runs in the background; poll until the guardian's conversation
/// shows up.
async fn wait_for_conversation(db: &Arc<dyn Database>) -> Conversation {
    for _ in 0..100 {
        if let Some(guardian) = db.find_guardian_by_phone("16509245188").await.unwrap() {
            if let Some(conversation) = db
                .find_active_conversation(guardian.id, &guardian.school_id)
                .await
                .unwrap()
            {
                return conversation;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("conversation never appeared");
}

#[tokio::test]
async fn health_reports_ok() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_server(true).await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn initiate_filters_and_opens_conversations() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_server(true).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/conversations/initiate"))
            .json(&json!({
                "school_id": "school-1",
                "absences": [
                    absence_row("abs-1", "Unexplained"),
                    absence_row("abs-2", "Excused - Sick"),
                ],
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await.unwrap();
        let accepted = body["initiated_conversations"].as_array().unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0]["absence_id"], "abs-1");

        let conversation = wait_for_conversation(&db).await;
        assert_eq!(conversation.absence_id, "abs-1");
        assert_eq!(conversation.status, ConversationStatus::InProgress);

        // Auto-approve dispatched the templated opener.
        let messages = db.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Queued);
        assert!(messages[0].content.contains("Bob Johnson"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn gated_open_approve_roundtrip() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_server(false).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/conversations/initiate"))
            .json(&json!({
                "school_id": "school-1",
                "absences": [absence_row("abs-1", "Unexplained")],
            }))
            .send()
            .await
            .unwrap();

        let conversation = wait_for_conversation(&db).await;
        assert_eq!(
            conversation.status,
            ConversationStatus::AwaitingMessageApproval
        );

        let pending: Vec<Value> = client
            .get(format!("{base}/messages/pending"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["status"], "awaiting_approval");
        let message_id = pending[0]["id"].as_str().unwrap().to_string();

        let response = client
            .post(format!("{base}/messages/{message_id}/approve"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["dispatch_result"]["status"], "queued");
        assert_eq!(body["dispatch_result"]["transport_handle"], "handle-0");

        // Approving the same message again is an invalid-state 400.
        let response = client
            .post(format!("{base}/messages/{message_id}/approve"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Approving an unknown message is a 404.
        let response = client
            .post(format!("{base}/messages/{}/approve", Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn delivery_status_callbacks() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_server(true).await;
        let client = reqwest::Client::new();

        client
            .post(format!("{base}/conversations/initiate"))
            .json(&json!({
                "school_id": "school-1",
                "absences": [absence_row("abs-1", "Unexplained")],
            }))
            .send()
            .await
            .unwrap();
        let conversation = wait_for_conversation(&db).await;
        let message = db.list_messages(conversation.id).await.unwrap().remove(0);
        let handle = message.transport_handle.clone().unwrap();

        // Missing fields are a 400.
        let response = client
            .post(format!("{base}/webhooks/delivery_status"))
            .json(&json!({ "status": "delivered" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Out-of-domain status is a 400.
        let response = client
            .post(format!("{base}/webhooks/delivery_status"))
            .json(&json!({ "message_handle": handle, "status": "teleported" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Unknown handle is a 404.
        let response = client
            .post(format!("{base}/webhooks/delivery_status"))
            .json(&json!({ "message_handle": "nope", "status": "delivered" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // A real update lands on the message.
        let response = client
            .post(format!("{base}/webhooks/delivery_status"))
            .json(&json!({
                "message_handle": handle,
                "status": "DELIVERED",
                "was_downgraded": true,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "Message status updated");

        let updated = db.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(updated.status, MessageStatus::Delivered);
        assert_eq!(updated.was_downgraded, Some(true));

        // Replaying the same callback is an idempotent no-op.
        let response = client
            .post(format!("{base}/webhooks/delivery_status"))
            .json(&json!({
                "message_handle": handle,
                "status": "delivered",
                "was_downgraded": true,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "Message status unchanged");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn inbound_message_flow() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_server(true).await;
        let client = reqwest::Client::new();

        // Unknown sender is a 404.
        let response = client
            .post(format!("{base}/webhooks/inbound_message"))
            .json(&inbound_payload("+19999999999", "hi", "in-0"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Every provider field is required; dropping any one is a 400.
        let full = inbound_payload(GUARDIAN_PHONE, "hi", "in-0");
        for field in ["from_number", "to_number", "content", "message_handle"] {
            let mut payload = full.clone();
            payload.as_object_mut().unwrap().remove(field);
            let response = client
                .post(format!("{base}/webhooks/inbound_message"))
                .json(&payload)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 400, "missing {field}");
        }

        client
            .post(format!("{base}/conversations/initiate"))
            .json(&json!({
                "school_id": "school-1",
                "absences": [absence_row("abs-1", "Unexplained")],
            }))
            .send()
            .await
            .unwrap();
        let conversation = wait_for_conversation(&db).await;

        // A guardian reply classifies and responds.
        let response = client
            .post(format!("{base}/webhooks/inbound_message"))
            .json(&inbound_payload(GUARDIAN_PHONE, "My son was sick", "in-1"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "Response processed");
        assert_eq!(body["message_status"], "queued");

        let updated = db.get_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(updated.rfa, Some(Rfa::ExcusedSick));

        // The RFA is settled, so the next reply is only logged.
        let response = client
            .post(format!("{base}/webhooks/inbound_message"))
            .json(&inbound_payload(GUARDIAN_PHONE, "Thanks!", "in-2"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "Message logged for human follow-up");

        // Completing the conversation closes the inbound route.
        let response = client
            .post(format!("{base}/conversations/{}/complete", conversation.id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .post(format!("{base}/webhooks/inbound_message"))
            .json(&inbound_payload(GUARDIAN_PHONE, "One more thing", "in-3"))
            .send()
            .await
            .unwrap();
        // No active conversation remains for this guardian.
        assert_eq!(response.status(), 404);
    })
    .await
    .expect("test timed out");
}
