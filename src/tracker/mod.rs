//! The conversation orchestration core.
//!
//! `ConversationTracker` owns the conversation state machine and coordinates
//! the guardian resolver, the message lifecycle manager, the approval gate,
//! and the classifier.

pub mod approval;
pub mod guardians;
pub mod locks;
pub mod messages;
pub mod tracker;

pub use approval::ApprovalGate;
pub use guardians::GuardianResolver;
pub use locks::ConversationLocks;
pub use messages::MessageLifecycleManager;
pub use tracker::{ConversationTracker, OpenOutcome, ReplyOutcome, TrackerConfig};
