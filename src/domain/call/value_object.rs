//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Callees are being rung
    Calling,
    /// One callee won the race and is connected
    Answered,
    /// Every callee declined
    Declined,
    /// Nobody answered before the ring deadline
    Missed,
    /// Explicitly ended by an actor
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Calling => "calling",
            CallStatus::Answered => "answered",
            CallStatus::Declined => "declined",
            CallStatus::Missed => "missed",
            CallStatus::Ended => "ended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calling" => Some(CallStatus::Calling),
            "answered" => Some(CallStatus::Answered),
            "declined" => Some(CallStatus::Declined),
            "missed" => Some(CallStatus::Missed),
            "ended" => Some(CallStatus::Ended),
            _ => None,
        }
    }

    /// Terminal states accept no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Declined | CallStatus::Missed | CallStatus::Ended
        )
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;

        matches!(
            (self, next),
            (Calling, Answered)
                | (Calling, Declined)
                | (Calling, Missed)
                | (Calling, Ended)
                | (Answered, Ended)
        )
    }

    /// States from which `next` may be reached; used as the guard of a
    /// conditional update
    pub fn predecessors_of(next: CallStatus) -> &'static [CallStatus] {
        match next {
            CallStatus::Calling => &[],
            CallStatus::Answered | CallStatus::Declined | CallStatus::Missed => {
                &[CallStatus::Calling]
            }
            CallStatus::Ended => &[CallStatus::Calling, CallStatus::Answered],
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one participant within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Notified,
    Invited,
    Ringing,
    Answered,
    Connected,
    Declined,
    Missed,
    Disconnected,
}

impl ParticipantStatus {
    /// Participants still eligible to answer
    pub const ELIGIBLE: [ParticipantStatus; 3] = [
        ParticipantStatus::Invited,
        ParticipantStatus::Notified,
        ParticipantStatus::Ringing,
    ];

    /// Participants dropped when a call ends
    pub const LIVE_ON_END: [ParticipantStatus; 2] =
        [ParticipantStatus::Connected, ParticipantStatus::Ringing];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Notified => "notified",
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Ringing => "ringing",
            ParticipantStatus::Answered => "answered",
            ParticipantStatus::Connected => "connected",
            ParticipantStatus::Declined => "declined",
            ParticipantStatus::Missed => "missed",
            ParticipantStatus::Disconnected => "disconnected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "notified" => Some(ParticipantStatus::Notified),
            "invited" => Some(ParticipantStatus::Invited),
            "ringing" => Some(ParticipantStatus::Ringing),
            "answered" => Some(ParticipantStatus::Answered),
            "connected" => Some(ParticipantStatus::Connected),
            "declined" => Some(ParticipantStatus::Declined),
            "missed" => Some(ParticipantStatus::Missed),
            "disconnected" => Some(ParticipantStatus::Disconnected),
            _ => None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        Self::ELIGIBLE.contains(self)
    }

    /// Holds the floor of the call (at most one callee per call)
    pub fn holds_floor(&self) -> bool {
        matches!(self, ParticipantStatus::Answered | ParticipantStatus::Connected)
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        let calling = CallStatus::Calling;
        assert!(calling.can_transition_to(CallStatus::Answered));
        assert!(calling.can_transition_to(CallStatus::Declined));
        assert!(calling.can_transition_to(CallStatus::Missed));
        assert!(calling.can_transition_to(CallStatus::Ended));
        assert!(CallStatus::Answered.can_transition_to(CallStatus::Ended));
        assert!(!CallStatus::Answered.can_transition_to(CallStatus::Missed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [CallStatus::Declined, CallStatus::Missed, CallStatus::Ended] {
            assert!(terminal.is_terminal());
            for next in [
                CallStatus::Calling,
                CallStatus::Answered,
                CallStatus::Declined,
                CallStatus::Missed,
                CallStatus::Ended,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!CallStatus::Answered.is_terminal());
    }

    #[test]
    fn test_predecessors_match_transitions() {
        assert_eq!(
            CallStatus::predecessors_of(CallStatus::Ended),
            &[CallStatus::Calling, CallStatus::Answered]
        );
        assert_eq!(
            CallStatus::predecessors_of(CallStatus::Missed),
            &[CallStatus::Calling]
        );
        assert!(CallStatus::predecessors_of(CallStatus::Calling).is_empty());
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(CallStatus::from_str("missed"), Some(CallStatus::Missed));
        assert_eq!(CallStatus::from_str("connecting"), None);
        assert_eq!(
            ParticipantStatus::from_str("invited"),
            Some(ParticipantStatus::Invited)
        );
        assert!(ParticipantStatus::Ringing.is_eligible());
        assert!(!ParticipantStatus::Connected.is_eligible());
        assert!(ParticipantStatus::Connected.holds_floor());
    }
}
