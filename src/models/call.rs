use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Call {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub conversation_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub status: CallStatus,
    pub participants: ParticipantSet,
    pub jitsi_room_id: String,
    pub jitsi_room_url: String,
    pub is_recorded: bool,
    pub recording_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    pub fn is_initiator(&self, user_id: Uuid) -> bool {
        self.initiator_id == user_id
    }

    /// Initiator or anyone on the participant list may act on the call.
    pub fn has_standing(&self, user_id: Uuid) -> bool {
        self.is_initiator(user_id) || self.participants.contains(user_id)
    }

}

/// Seconds between start and end, floored, never negative.
pub fn derive_duration(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> i32 {
    (ended_at - started_at).num_seconds().max(0) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "call_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "call_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Ongoing,
    Ended,
    Missed,
    Declined,
}

impl CallStatus {
    /// Terminal states are absorbing; no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Missed | CallStatus::Declined
        )
    }

    /// States before anyone has picked up.
    pub fn is_pre_ongoing(self) -> bool {
        matches!(self, CallStatus::Initiated | CallStatus::Ringing)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            CallStatus::Ongoing => self.is_pre_ongoing(),
            CallStatus::Declined | CallStatus::Missed => self.is_pre_ongoing(),
            CallStatus::Ended => true,
            CallStatus::Initiated | CallStatus::Ringing => false,
        }
    }
}

/// Ordered set of call participants, stored as a Postgres UUID array.
/// Membership changes go through `insert`, which keeps insertion order and
/// never duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent, no_pg_array)]
#[serde(transparent)]
pub struct ParticipantSet(Vec<Uuid>);

impl ParticipantSet {
    /// Builds the set for a new call: initiator first, then the invitees in
    /// the order given, duplicates dropped.
    pub fn with_initiator(initiator_id: Uuid, others: impl IntoIterator<Item = Uuid>) -> Self {
        let mut set = Self(vec![initiator_id]);
        for id in others {
            set.insert(id);
        }
        set
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.0.contains(&user_id)
    }

    /// Adds a member; returns false if already present.
    pub fn insert(&mut self, user_id: Uuid) -> bool {
        if self.contains(user_id) {
            return false;
        }
        self.0.push(user_id);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[Uuid] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [CallStatus::Ended, CallStatus::Missed, CallStatus::Declined] {
            for next in [
                CallStatus::Initiated,
                CallStatus::Ringing,
                CallStatus::Ongoing,
                CallStatus::Ended,
                CallStatus::Missed,
                CallStatus::Declined,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn ringing_transitions() {
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Ongoing));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Declined));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Missed));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Ended));
        assert!(!CallStatus::Ringing.can_transition_to(CallStatus::Initiated));
    }

    #[test]
    fn ongoing_only_ends() {
        assert!(CallStatus::Ongoing.can_transition_to(CallStatus::Ended));
        assert!(!CallStatus::Ongoing.can_transition_to(CallStatus::Declined));
        assert!(!CallStatus::Ongoing.can_transition_to(CallStatus::Missed));
        assert!(!CallStatus::Ongoing.can_transition_to(CallStatus::Ongoing));
    }

    #[test]
    fn participant_set_keeps_order_and_dedupes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut set = ParticipantSet::with_initiator(a, vec![b, a, b]);
        assert_eq!(set.as_slice(), &[a, b]);
        assert!(!set.insert(b));
        let c = Uuid::new_v4();
        assert!(set.insert(c));
        assert_eq!(set.as_slice(), &[a, b, c]);
    }

    #[test]
    fn initiator_always_present_even_if_omitted() {
        let initiator = Uuid::new_v4();
        let other = Uuid::new_v4();
        let set = ParticipantSet::with_initiator(initiator, vec![other]);
        assert!(set.contains(initiator));
        assert!(set.contains(other));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn duration_is_floored_and_non_negative() {
        let start = Utc::now();
        assert_eq!(
            derive_duration(start, start + Duration::milliseconds(4700)),
            4
        );
        assert_eq!(derive_duration(start, start - Duration::seconds(3)), 0);
    }
}
