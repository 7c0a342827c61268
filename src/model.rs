//! Domain records and closed value domains for the absence conversation engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Sentinel reason-for-absence on ingested absences that triggers outreach.
pub const UNEXPLAINED: &str = "Unexplained";

/// An absence row from an attendance report. Immutable input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Absence {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub date: NaiveDate,
    /// Raw reason-for-absence as reported; `"Unexplained"` means we don't have one.
    pub rfa: String,
    pub guardian_name: String,
    pub guardian_phone: String,
}

impl Absence {
    /// Whether this absence should trigger a guardian conversation.
    pub fn is_unexplained(&self) -> bool {
        self.rfa == UNEXPLAINED
    }

    /// Split the reported guardian name into (first, last).
    ///
    /// A single-token name becomes the first name with an empty last name.
    pub fn guardian_first_last(&self) -> (&str, &str) {
        match self.guardian_name.split_once(' ') {
            Some((first, last)) => (first, last),
            None => (self.guardian_name.as_str(), ""),
        }
    }
}

/// A student's contact, unique per (phone_number, school_id).
#[derive(Debug, Clone, Serialize)]
pub struct Guardian {
    pub id: Uuid,
    pub phone_number: String,
    pub school_id: String,
    pub first_name: String,
    pub last_name: String,
}

/// The ongoing exchange about one absence between a guardian and the school.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub student_id: String,
    pub school_id: String,
    pub absence_id: String,
    pub guardian_id: Uuid,
    pub rfa: Option<Rfa>,
    pub status: ConversationStatus,
    pub recommended_action: Option<RecommendedAction>,
    pub created_at: DateTime<Utc>,
}

/// One entry in a conversation's append-only message log.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub content: String,
    pub sender_type: SenderType,
    pub status: MessageStatus,
    pub was_downgraded: Option<bool>,
    /// Opaque id from the SMS provider, used to correlate delivery callbacks.
    pub transport_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Status domains ──────────────────────────────────────────────────

/// Conversation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    InProgress,
    ActionNeeded,
    AwaitingMessageApproval,
    Completed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::ActionNeeded => "action_needed",
            Self::AwaitingMessageApproval => "awaiting_message_approval",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "action_needed" => Some(Self::ActionNeeded),
            "awaiting_message_approval" => Some(Self::AwaitingMessageApproval),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    Guardian,
    Admin,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardian => "guardian",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guardian" => Some(Self::Guardian),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Message lifecycle state.
///
/// Outbound drafts start at `AwaitingApproval` and move to a transport status
/// exactly once on dispatch, then at most once more via the delivery callback.
/// Inbound guardian messages are `Received` and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    AwaitingApproval,
    Queued,
    Sent,
    Delivered,
    Failed,
    Received,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Received => "received",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "received" => Some(Self::Received),
            _ => None,
        }
    }

    /// Whether this is a state reported by the SMS provider (as opposed to
    /// one of our internal states).
    pub fn is_transport_status(&self) -> bool {
        matches!(self, Self::Queued | Self::Sent | Self::Delivered | Self::Failed)
    }
}

/// Next step suggested by the classifier when a conversation needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    MarkAsCompleted,
    AttendanceOfficerTakeOver,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkAsCompleted => "mark_as_completed",
            Self::AttendanceOfficerTakeOver => "attendance_officer_take_over",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mark_as_completed" => Some(Self::MarkAsCompleted),
            "attendance_officer_take_over" => Some(Self::AttendanceOfficerTakeOver),
            _ => None,
        }
    }
}

// ── Reason for absence ──────────────────────────────────────────────

/// The closed set of reason-for-absence classifications.
///
/// Exact strings matter: they are the classifier's output vocabulary and the
/// values shown on the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rfa {
    ExcusedSick,
    ExcusedAppointment,
    ExcusedTravel,
    ExcusedFamilyEmergency,
    ExcusedBereavement,
    ExcusedReligiousObservance,
    ExcusedSchoolApprovedActivity,
    ExcusedSevereWeather,
    ExcusedMentalHealthDay,
    ExcusedTherapyAppointment,
    ExcusedCollegeVisit,
    ExcusedMilitaryDuty,
    ExcusedCulturalObservance,
    UnexcusedSick,
    UnexcusedTravel,
    UnexcusedOverslept,
    UnexcusedTransportationIssues,
    UnexcusedSkippingClass,
    UnexcusedFamilyVacation,
    UnexcusedWork,
    UnexcusedForgotOnlineClass,
    UnexcusedTechnologyIssues,
    UnexcusedScheduleMisunderstanding,
}

impl Rfa {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExcusedSick => "Excused - Sick",
            Self::ExcusedAppointment => "Excused - appointment",
            Self::ExcusedTravel => "Excused - Travel",
            Self::ExcusedFamilyEmergency => "Excused - Family emergency",
            Self::ExcusedBereavement => "Excused - Bereavement",
            Self::ExcusedReligiousObservance => "Excused - Religious observance",
            Self::ExcusedSchoolApprovedActivity => "Excused - School-approved activity",
            Self::ExcusedSevereWeather => "Excused - Severe weather or natural disaster",
            Self::ExcusedMentalHealthDay => "Excused - Mental health day",
            Self::ExcusedTherapyAppointment => "Excused - Therapy or counseling appointment",
            Self::ExcusedCollegeVisit => "Excused - College visit",
            Self::ExcusedMilitaryDuty => "Excused - Military duty (for family member)",
            Self::ExcusedCulturalObservance => "Excused - Cultural observance",
            Self::UnexcusedSick => "Unexcused - Sick (without proper notification)",
            Self::UnexcusedTravel => "Unexcused - Travel (non-approved)",
            Self::UnexcusedOverslept => "Unexcused - Overslept",
            Self::UnexcusedTransportationIssues => "Unexcused - Transportation issues",
            Self::UnexcusedSkippingClass => "Unexcused - Skipping class",
            Self::UnexcusedFamilyVacation => "Unexcused - Family vacation (non-approved)",
            Self::UnexcusedWork => "Unexcused - Work (non-school related)",
            Self::UnexcusedForgotOnlineClass => "Unexcused - Forgot to attend online class",
            Self::UnexcusedTechnologyIssues => "Unexcused - Technology issues (for remote learning)",
            Self::UnexcusedScheduleMisunderstanding => "Unexcused - Misunderstanding of schedule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_RFAS.iter().copied().find(|r| r.as_str() == s)
    }

    pub fn is_excused(&self) -> bool {
        self.as_str().starts_with("Excused")
    }
}

/// Every reason-for-absence value, in dashboard display order.
pub const ALL_RFAS: &[Rfa] = &[
    Rfa::ExcusedSick,
    Rfa::ExcusedAppointment,
    Rfa::ExcusedTravel,
    Rfa::ExcusedFamilyEmergency,
    Rfa::ExcusedBereavement,
    Rfa::ExcusedReligiousObservance,
    Rfa::ExcusedSchoolApprovedActivity,
    Rfa::ExcusedSevereWeather,
    Rfa::ExcusedMentalHealthDay,
    Rfa::ExcusedTherapyAppointment,
    Rfa::ExcusedCollegeVisit,
    Rfa::ExcusedMilitaryDuty,
    Rfa::ExcusedCulturalObservance,
    Rfa::UnexcusedSick,
    Rfa::UnexcusedTravel,
    Rfa::UnexcusedOverslept,
    Rfa::UnexcusedTransportationIssues,
    Rfa::UnexcusedSkippingClass,
    Rfa::UnexcusedFamilyVacation,
    Rfa::UnexcusedWork,
    Rfa::UnexcusedForgotOnlineClass,
    Rfa::UnexcusedTechnologyIssues,
    Rfa::UnexcusedScheduleMisunderstanding,
];

// ── Serde for the closed domains ────────────────────────────────────
// Serialized as their canonical strings so JSON payloads and DB rows agree.

macro_rules! str_enum_serde {
    ($ty:ty, $label:expr) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::parse(&s)
                    .ok_or_else(|| D::Error::custom(format!("unknown {}: {s:?}", $label)))
            }
        }
    };
}

str_enum_serde!(ConversationStatus, "conversation status");
str_enum_serde!(SenderType, "sender type");
str_enum_serde!(MessageStatus, "message status");
str_enum_serde!(RecommendedAction, "recommended action");
str_enum_serde!(Rfa, "reason for absence");

// ── Phone normalization ─────────────────────────────────────────────

/// Canonicalize a phone number for storage and matching.
///
/// Guardians are created from report rows (`"+1650..."`) and matched against
/// webhook sender numbers (sometimes without the `+`); both sides go through
/// this so the unique key and the inbound lookup agree.
pub fn normalize_phone(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '(' && *c != ')')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfa_round_trips_every_value() {
        for rfa in ALL_RFAS {
            assert_eq!(Rfa::parse(rfa.as_str()), Some(*rfa));
        }
        assert_eq!(Rfa::parse("Excused - sick"), None);
        assert_eq!(Rfa::parse(""), None);
    }

    #[test]
    fn rfa_excused_prefix() {
        assert!(Rfa::ExcusedSick.is_excused());
        assert!(Rfa::ExcusedMilitaryDuty.is_excused());
        assert!(!Rfa::UnexcusedOverslept.is_excused());
    }

    #[test]
    fn conversation_status_round_trip() {
        for s in [
            ConversationStatus::InProgress,
            ConversationStatus::ActionNeeded,
            ConversationStatus::AwaitingMessageApproval,
            ConversationStatus::Completed,
        ] {
            assert_eq!(ConversationStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ConversationStatus::parse("open"), None);
    }

    #[test]
    fn transport_statuses() {
        assert!(MessageStatus::Queued.is_transport_status());
        assert!(MessageStatus::Failed.is_transport_status());
        assert!(!MessageStatus::AwaitingApproval.is_transport_status());
        assert!(!MessageStatus::Received.is_transport_status());
    }

    #[test]
    fn normalize_phone_strips_plus_and_separators() {
        assert_eq!(normalize_phone("+1 (650) 924-5188"), "16509245188");
        assert_eq!(normalize_phone("16509245188"), "16509245188");
        assert_eq!(normalize_phone(" +16509245188 "), "16509245188");
    }

    #[test]
    fn guardian_name_split() {
        let mut absence = Absence {
            id: "a1".into(),
            student_id: "S001".into(),
            student_name: "Jane Smith".into(),
            date: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
            rfa: UNEXPLAINED.into(),
            guardian_name: "Sally Anne Smith".into(),
            guardian_phone: "+16509245188".into(),
        };
        assert_eq!(absence.guardian_first_last(), ("Sally", "Anne Smith"));
        absence.guardian_name = "Cher".into();
        assert_eq!(absence.guardian_first_last(), ("Cher", ""));
        assert!(absence.is_unexplained());
    }

    #[test]
    fn status_serde_uses_canonical_strings() {
        let json = serde_json::to_string(&Rfa::ExcusedSick).unwrap();
        assert_eq!(json, "\"Excused - Sick\"");
        let back: Rfa = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Rfa::ExcusedSick);
        assert!(serde_json::from_str::<Rfa>("\"Excused - nonsense\"").is_err());
    }
}
