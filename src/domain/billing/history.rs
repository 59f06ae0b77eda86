//! Append-only subscription history.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::status::EntitlementStatus;
use crate::domain::foundation::{HistoryEntryId, Timestamp, UserId, ValidationError};

/// Why an entitlement left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryReason {
    /// Replaced by a plan change through a new checkout.
    Superseded,
    /// A second active subscription was found for the same user.
    DuplicateActive,
    /// The provider reported the subscription as deleted.
    Canceled,
}

impl HistoryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryReason::Superseded => "superseded",
            HistoryReason::DuplicateActive => "duplicate_active",
            HistoryReason::Canceled => "canceled",
        }
    }
}

impl fmt::Display for HistoryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HistoryReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superseded" => Ok(HistoryReason::Superseded),
            "duplicate_active" => Ok(HistoryReason::DuplicateActive),
            "canceled" => Ok(HistoryReason::Canceled),
            other => Err(ValidationError::invalid_format(
                "reason",
                format!("unknown history reason '{}'", other),
            )),
        }
    }
}

/// Immutable record of a subscription leaving the active state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHistoryEntry {
    pub id: HistoryEntryId,
    pub user_id: UserId,
    pub provider_subscription_id: String,
    pub previous_status: EntitlementStatus,
    pub new_status: EntitlementStatus,
    pub reason: HistoryReason,
    pub recorded_at: Timestamp,
}

impl SubscriptionHistoryEntry {
    pub fn new(
        user_id: UserId,
        provider_subscription_id: impl Into<String>,
        previous_status: EntitlementStatus,
        new_status: EntitlementStatus,
        reason: HistoryReason,
        recorded_at: Timestamp,
    ) -> Self {
        Self {
            id: HistoryEntryId::new(),
            user_id,
            provider_subscription_id: provider_subscription_id.into(),
            previous_status,
            new_status,
            reason,
            recorded_at,
        }
    }
}
