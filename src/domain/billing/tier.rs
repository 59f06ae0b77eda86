//! Subscription plan tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Paid subscription tier.
///
/// The tier alone does not carry allotments; those come from the catalog
/// entry of the price the user subscribed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Pro,
    Premium,
}

impl PlanTier {
    /// Returns the display name for this tier.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanTier::Basic => "Basic",
            PlanTier::Pro => "Pro",
            PlanTier::Premium => "Premium",
        }
    }

    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Premium => "premium",
        }
    }

    /// Numeric rank, higher is a bigger plan.
    pub fn rank(&self) -> u8 {
        match self {
            PlanTier::Basic => 1,
            PlanTier::Pro => 2,
            PlanTier::Premium => 3,
        }
    }

    pub fn is_upgrade_from(&self, other: PlanTier) -> bool {
        self.rank() > other.rank()
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PlanTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(PlanTier::Basic),
            "pro" => Ok(PlanTier::Pro),
            "premium" => Ok(PlanTier::Premium),
            other => Err(ValidationError::invalid_format(
                "tier",
                format!("unknown plan tier '{}'", other),
            )),
        }
    }
}
