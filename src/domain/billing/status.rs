//! Entitlement status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{StateMachine, ValidationError};

/// Lifecycle of a user's entitlement.
///
/// `None` is what a user without any subscription reports. Persisted
/// entitlement rows are always `Active` or `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    #[default]
    None,
    Active,
    Canceled,
}

impl EntitlementStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, EntitlementStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementStatus::None => "none",
            EntitlementStatus::Active => "active",
            EntitlementStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntitlementStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EntitlementStatus::None),
            "active" => Ok(EntitlementStatus::Active),
            "canceled" => Ok(EntitlementStatus::Canceled),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown entitlement status '{}'", other),
            )),
        }
    }
}

impl StateMachine for EntitlementStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use EntitlementStatus::*;
        matches!((self, target), (None, Active) | (Active, Canceled))
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use EntitlementStatus::*;
        match self {
            None => vec![Active],
            Active => vec![Canceled],
            // A returning subscriber gets a fresh row
            Canceled => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_can_only_become_active() {
        assert_eq!(
            EntitlementStatus::None.valid_transitions(),
            vec![EntitlementStatus::Active]
        );
    }

    #[test]
    fn active_can_be_canceled() {
        let next = EntitlementStatus::Active.transition_to(EntitlementStatus::Canceled);
        assert_eq!(next, Ok(EntitlementStatus::Canceled));
    }

    #[test]
    fn canceled_is_terminal() {
        assert!(EntitlementStatus::Canceled.is_terminal());
        assert!(EntitlementStatus::Canceled
            .transition_to(EntitlementStatus::Active)
            .is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            EntitlementStatus::None,
            EntitlementStatus::Active,
            EntitlementStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<EntitlementStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<EntitlementStatus>().is_err());
    }
}
