//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_identifier!(
    /// Intercom call identifier
    CallId
);

uuid_identifier!(
    /// Call-membership record identifier
    MembershipId
);

uuid_identifier!(
    /// Person identifier (doorman or resident profile)
    PartyId
);

uuid_identifier!(
    /// Apartment identifier
    ApartmentId
);

uuid_identifier!(
    /// Building identifier
    BuildingId
);

/// Role a person plays in the building
///
/// Initiators and callees are always one of these two; the decision points
/// that differ by role match on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Doorman,
    Resident,
}

impl PartyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyKind::Doorman => "doorman",
            PartyKind::Resident => "resident",
        }
    }

    /// Accepts the canonical names plus the legacy Portuguese labels
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doorman" | "porteiro" => Some(PartyKind::Doorman),
            "resident" | "morador" => Some(PartyKind::Resident),
            _ => None,
        }
    }

    /// Who gets dialed when this kind of party starts a call
    pub fn callee_kind(&self) -> PartyKind {
        match self {
            PartyKind::Doorman => PartyKind::Resident,
            PartyKind::Resident => PartyKind::Doorman,
        }
    }
}

impl fmt::Display for PartyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
