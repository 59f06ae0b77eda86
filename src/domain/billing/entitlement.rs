//! Entitlement aggregate.
//!
//! One row per provider subscription a user has held. At most one row per
//! user is `Active`; superseded and canceled rows stay behind as `Canceled`.
//!
//! # Period allotments
//!
//! `current_period` is frozen at the value granted when the period began.
//! Plan changes only touch `next_period`; the promotion happens at the
//! next period boundary (`roll_over`).

use serde::{Deserialize, Serialize};

use super::catalog::{Allotment, PlanEntry};
use super::status::EntitlementStatus;
use super::tier::PlanTier;
use crate::domain::foundation::{EntitlementId, StateMachine, Timestamp, UserId, ValidationError};

/// Bounds of a billing period as reported by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BillingPeriod {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, ValidationError> {
        if end.is_before(&start) {
            return Err(ValidationError::invalid_format(
                "period",
                "period end precedes period start",
            ));
        }
        Ok(Self { start, end })
    }
}

/// A user's subscription-derived entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: EntitlementId,
    pub user_id: UserId,

    /// External subscription reference, unique across all rows.
    pub provider_subscription_id: String,

    pub status: EntitlementStatus,
    pub tier: PlanTier,

    /// Allotment granted when the current period began.
    pub current_period: Allotment,

    /// Allotment that takes effect at the next period boundary.
    pub next_period: Allotment,

    pub period: BillingPeriod,
    pub cancel_at_period_end: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Entitlement {
    /// Opens a new active entitlement with the plan's defaults for both the
    /// current and the next period.
    pub fn activate(
        user_id: UserId,
        provider_subscription_id: impl Into<String>,
        plan: &PlanEntry,
        period: BillingPeriod,
        cancel_at_period_end: bool,
        at: Timestamp,
    ) -> Self {
        Self {
            id: EntitlementId::new(),
            user_id,
            provider_subscription_id: provider_subscription_id.into(),
            status: EntitlementStatus::Active,
            tier: plan.tier,
            current_period: plan.allotment,
            next_period: plan.allotment,
            period,
            cancel_at_period_end,
            created_at: at,
            updated_at: at,
        }
    }

    /// Carries a mid-cycle plan change over to a new subscription.
    ///
    /// The new row keeps the old tier and current allotment; only
    /// `next_period` reflects the newly purchased plan.
    pub fn succeed(
        previous: &Entitlement,
        provider_subscription_id: impl Into<String>,
        next_plan: &PlanEntry,
        period: BillingPeriod,
        cancel_at_period_end: bool,
        at: Timestamp,
    ) -> Self {
        Self {
            id: EntitlementId::new(),
            user_id: previous.user_id.clone(),
            provider_subscription_id: provider_subscription_id.into(),
            status: EntitlementStatus::Active,
            tier: previous.tier,
            current_period: previous.current_period,
            next_period: next_plan.allotment,
            period,
            cancel_at_period_end,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Schedules `allotment` for the next period.
    pub fn schedule_next(&mut self, allotment: Allotment, at: Timestamp) {
        self.next_period = allotment;
        self.updated_at = at;
    }

    /// True if `period` starts after the period this row is in.
    pub fn is_new_period(&self, period: &BillingPeriod) -> bool {
        period.start.is_after(&self.period.start)
    }

    /// True if a report about `period` observed at `at` predates what this
    /// row already reflects.
    pub fn outdates(&self, period: &BillingPeriod, at: Timestamp) -> bool {
        at.is_before(&self.updated_at) || period.start.is_before(&self.period.start)
    }

    /// Promotes `next_period` into `current_period` at a period boundary and
    /// recomputes `next_period` from the plan the subscription now reports.
    pub fn roll_over(
        &mut self,
        reported: &PlanEntry,
        period: BillingPeriod,
        cancel_at_period_end: bool,
        at: Timestamp,
    ) {
        self.current_period = self.next_period;
        self.tier = reported.tier;
        self.next_period = reported.allotment;
        self.period = period;
        self.cancel_at_period_end = cancel_at_period_end;
        self.updated_at = at;
    }

    /// Metadata refresh within the same period.
    pub fn refresh(
        &mut self,
        next_period: Option<Allotment>,
        period_end: Timestamp,
        cancel_at_period_end: bool,
        at: Timestamp,
    ) {
        if let Some(next) = next_period {
            self.next_period = next;
        }
        if !period_end.is_before(&self.period.start) {
            self.period.end = period_end;
        }
        self.cancel_at_period_end = cancel_at_period_end;
        self.updated_at = at;
    }

    /// Moves the entitlement to `Canceled`.
    ///
    /// # Errors
    ///
    /// Returns error if the entitlement is not active.
    pub fn cancel(&mut self, at: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(EntitlementStatus::Canceled)?;
        self.updated_at = at;
        Ok(())
    }
}
