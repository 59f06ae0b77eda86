//! Per-user billing state as loaded inside a unit of work.

use serde::{Deserialize, Serialize};

use super::catalog::Allotment;
use super::entitlement::Entitlement;
use super::ledger::{CreditLedger, MinuteLedger};
use super::status::EntitlementStatus;
use super::tier::PlanTier;
use crate::domain::foundation::{Timestamp, UserId};

/// Everything the reconciliation handlers read and write for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBillingState {
    pub user_id: UserId,
    pub entitlements: Vec<Entitlement>,
    pub credits: CreditLedger,
    pub minutes: MinuteLedger,
}

impl UserBillingState {
    /// State of a user the store has never seen. Ledgers default to zero.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            entitlements: Vec::new(),
            credits: CreditLedger::default(),
            minutes: MinuteLedger::default(),
        }
    }

    /// The active entitlement, if any.
    pub fn active(&self) -> Option<&Entitlement> {
        self.entitlements.iter().find(|e| e.is_active())
    }

    /// The active entitlement, else the most recently updated row.
    pub fn current(&self) -> Option<&Entitlement> {
        self.active()
            .or_else(|| self.entitlements.iter().max_by_key(|e| e.updated_at))
    }

    pub fn by_subscription(&self, provider_subscription_id: &str) -> Option<&Entitlement> {
        self.entitlements
            .iter()
            .find(|e| e.provider_subscription_id == provider_subscription_id)
    }

    pub fn by_subscription_mut(&mut self, provider_subscription_id: &str) -> Option<&mut Entitlement> {
        self.entitlements
            .iter_mut()
            .find(|e| e.provider_subscription_id == provider_subscription_id)
    }

    pub fn active_count(&self) -> usize {
        self.entitlements.iter().filter(|e| e.is_active()).count()
    }

    /// Inserts `entitlement`, replacing any row for the same subscription.
    pub fn upsert(&mut self, entitlement: Entitlement) {
        match self.by_subscription_mut(&entitlement.provider_subscription_id) {
            Some(existing) => *existing = entitlement,
            None => self.entitlements.push(entitlement),
        }
    }

    /// Read model served to the dashboard and the generation pre-flight.
    pub fn snapshot(&self) -> BillingSnapshot {
        let current = self.current();
        BillingSnapshot {
            user_id: self.user_id.clone(),
            status: current.map(|e| e.status).unwrap_or_default(),
            tier: current.map(|e| e.tier),
            current_period: current.map(|e| e.current_period).unwrap_or(Allotment::ZERO),
            next_period: current.map(|e| e.next_period).unwrap_or(Allotment::ZERO),
            period_end: current.map(|e| e.period.end),
            cancel_at_period_end: current.map(|e| e.cancel_at_period_end).unwrap_or(false),
            credits: self.credits,
            minutes: self.minutes,
        }
    }
}

/// Read-only entitlement snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub user_id: UserId,
    pub status: EntitlementStatus,
    pub tier: Option<PlanTier>,
    pub current_period: Allotment,
    pub next_period: Allotment,
    pub period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    pub credits: CreditLedger,
    pub minutes: MinuteLedger,
}
