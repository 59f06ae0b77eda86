//! Reconciliation handlers.
//!
//! Each handler is a pure function of the current per-user state, the
//! typed event payload, and the catalog. Time only enters through the
//! event's own timestamp, so replaying an event against the same state
//! yields the same result. Persisting the result atomically is the
//! caller's job.

use serde::{Deserialize, Serialize};

use super::catalog::{Allotment, Catalog, PlanEntry};
use super::entitlement::{BillingPeriod, Entitlement};
use super::errors::BillingError;
use super::history::{HistoryReason, SubscriptionHistoryEntry};
use super::state::UserBillingState;
use super::status::EntitlementStatus;
use super::tier::PlanTier;
use crate::domain::foundation::Timestamp;

/// Subscription facts reported by the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTerms {
    pub subscription_id: String,
    /// Price of the first subscription item, when the provider sent one.
    pub price_id: Option<String>,
    /// Provider status is one that grants service (active, trialing, past_due).
    pub provider_active: bool,
    pub period: BillingPeriod,
    pub cancel_at_period_end: bool,
}

impl SubscriptionTerms {
    fn require_price(&self) -> Result<&str, BillingError> {
        self.price_id
            .as_deref()
            .ok_or_else(|| BillingError::MalformedEvent(format!(
                "subscription {} carries no price",
                self.subscription_id
            )))
    }
}

/// Typed, user-attributed input to the handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingEvent {
    CreditPurchase { package_id: String },
    SubscriptionCheckout(SubscriptionTerms),
    SubscriptionUpserted(SubscriptionTerms),
    SubscriptionCanceled(SubscriptionTerms),
}

/// What a handler did, for logging and for the webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    CreditsGranted { credits: i64, minutes: i64 },
    SubscriptionStarted { tier: PlanTier },
    PlanChangeScheduled { from: PlanTier, to: PlanTier },
    PeriodRolledOver { tier: PlanTier },
    Refreshed,
    Canceled { tier: PlanTier },
    NoChange { reason: String },
}

/// New state plus the history entries to append with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub state: UserBillingState,
    pub history: Vec<SubscriptionHistoryEntry>,
    pub effect: Effect,
}

/// Applies `event` to `state`.
///
/// # Errors
///
/// - `UnknownCatalogId` when a price or package id is not in the catalog.
/// - `MalformedEvent` when a required price is absent.
pub fn reconcile(
    state: &UserBillingState,
    event: &BillingEvent,
    occurred_at: Timestamp,
    catalog: &Catalog,
) -> Result<Reconciled, BillingError> {
    let mut work = Work {
        state: state.clone(),
        history: Vec::new(),
        at: occurred_at,
    };

    let effect = match event {
        BillingEvent::CreditPurchase { package_id } => {
            credit_purchase(&mut work, package_id, catalog)?
        }
        BillingEvent::SubscriptionCheckout(terms) => {
            subscription_checkout(&mut work, terms, catalog)?
        }
        BillingEvent::SubscriptionUpserted(terms) => {
            subscription_upserted(&mut work, terms, catalog)?
        }
        BillingEvent::SubscriptionCanceled(terms) => {
            subscription_canceled(&mut work, terms, catalog)?
        }
    };

    Ok(Reconciled {
        state: work.state,
        history: work.history,
        effect,
    })
}

struct Work {
    state: UserBillingState,
    history: Vec<SubscriptionHistoryEntry>,
    at: Timestamp,
}

impl Work {
    /// Cancels every active row except the one for `keep`, logging each.
    fn retire_active_except(&mut self, keep: &str, reason: HistoryReason) -> Result<(), BillingError> {
        let at = self.at;
        let user_id = self.state.user_id.clone();
        for row in self.state.entitlements.iter_mut() {
            if row.is_active() && row.provider_subscription_id != keep {
                row.cancel(at)
                    .map_err(|e| BillingError::InvalidState(e.to_string()))?;
                self.history.push(SubscriptionHistoryEntry::new(
                    user_id.clone(),
                    row.provider_subscription_id.clone(),
                    EntitlementStatus::Active,
                    EntitlementStatus::Canceled,
                    reason,
                    at,
                ));
            }
        }
        Ok(())
    }

    fn grant_period(&mut self, allotment: Allotment) {
        self.state.credits.grant_period(allotment.credits);
        self.state.minutes.grant_period(allotment.minutes);
    }

    fn no_change(reason: impl Into<String>) -> Effect {
        Effect::NoChange {
            reason: reason.into(),
        }
    }
}

fn credit_purchase(work: &mut Work, package_id: &str, catalog: &Catalog) -> Result<Effect, BillingError> {
    let package = catalog.package(package_id)?;
    let credits = package.total_credits();
    let minutes = catalog.credits_to_minutes(credits);

    work.state.credits.grant(credits);
    work.state.minutes.grant(minutes);

    Ok(Effect::CreditsGranted { credits, minutes })
}

fn subscription_checkout(
    work: &mut Work,
    terms: &SubscriptionTerms,
    catalog: &Catalog,
) -> Result<Effect, BillingError> {
    let plan = catalog.plan(terms.require_price()?)?;

    if let Some(existing) = work.state.by_subscription(&terms.subscription_id) {
        if !existing.is_active() {
            return Ok(Work::no_change("subscription already ended"));
        }
        // Same subscription already known (its upsert arrived first)
        let allotment = plan.allotment;
        let at = work.at;
        if let Some(row) = work.state.by_subscription_mut(&terms.subscription_id) {
            row.schedule_next(allotment, at);
        }
        work.retire_active_except(&terms.subscription_id, HistoryReason::DuplicateActive)?;
        return Ok(Effect::Refreshed);
    }

    match work.state.active().cloned() {
        None => start_subscription(work, terms, plan),
        Some(previous) => schedule_plan_change(work, &previous, terms, plan),
    }
}

fn subscription_upserted(
    work: &mut Work,
    terms: &SubscriptionTerms,
    catalog: &Catalog,
) -> Result<Effect, BillingError> {
    let plan = catalog.plan(terms.require_price()?)?;
    let at = work.at;

    let Some(existing) = work.state.by_subscription(&terms.subscription_id).cloned() else {
        if !terms.provider_active {
            return Ok(Work::no_change("subscription is not active at the provider"));
        }
        return match work.state.active().cloned() {
            None => start_subscription(work, terms, plan),
            // Upsert for a replacement subscription arrived before its checkout
            Some(previous) => schedule_plan_change(work, &previous, terms, plan),
        };
    };

    if existing.outdates(&terms.period, at) {
        return Ok(Work::no_change("subscription update is older than stored state"));
    }

    let row = match work.state.by_subscription_mut(&terms.subscription_id) {
        Some(row) => row,
        None => return Ok(Work::no_change("subscription row vanished")),
    };

    if !existing.is_active() {
        row.refresh(None, terms.period.end, terms.cancel_at_period_end, at);
        return Ok(Effect::Refreshed);
    }

    if existing.is_new_period(&terms.period) {
        row.roll_over(plan, terms.period, terms.cancel_at_period_end, at);
        let current = row.current_period;
        let tier = row.tier;
        work.grant_period(current);
        work.retire_active_except(&terms.subscription_id, HistoryReason::DuplicateActive)?;
        return Ok(Effect::PeriodRolledOver { tier });
    }

    row.refresh(
        Some(plan.allotment),
        terms.period.end,
        terms.cancel_at_period_end,
        at,
    );
    work.retire_active_except(&terms.subscription_id, HistoryReason::DuplicateActive)?;
    Ok(Effect::Refreshed)
}

fn subscription_canceled(
    work: &mut Work,
    terms: &SubscriptionTerms,
    catalog: &Catalog,
) -> Result<Effect, BillingError> {
    let Some(existing) = work.state.by_subscription(&terms.subscription_id).cloned() else {
        return Ok(Work::no_change("no entitlement for subscription"));
    };
    if !existing.is_active() {
        return Ok(Work::no_change("entitlement already canceled"));
    }

    let (tier, allotment) = match terms.price_id.as_deref() {
        Some(price_id) => {
            let plan = catalog.plan(price_id)?;
            (plan.tier, plan.allotment)
        }
        None => (existing.tier, existing.current_period),
    };

    let at = work.at;
    if let Some(row) = work.state.by_subscription_mut(&terms.subscription_id) {
        row.cancel(at)
            .map_err(|e| BillingError::InvalidState(e.to_string()))?;
        row.tier = tier;
        row.cancel_at_period_end = terms.cancel_at_period_end;
    }
    work.history.push(SubscriptionHistoryEntry::new(
        work.state.user_id.clone(),
        terms.subscription_id.clone(),
        EntitlementStatus::Active,
        EntitlementStatus::Canceled,
        HistoryReason::Canceled,
        at,
    ));

    // The canceled period's grant still applies until it ends
    work.state.credits.restore_to(allotment.credits);
    work.state.minutes.restore_to(allotment.minutes);

    Ok(Effect::Canceled { tier })
}

fn start_subscription(
    work: &mut Work,
    terms: &SubscriptionTerms,
    plan: &PlanEntry,
) -> Result<Effect, BillingError> {
    let entitlement = Entitlement::activate(
        work.state.user_id.clone(),
        terms.subscription_id.clone(),
        plan,
        terms.period,
        terms.cancel_at_period_end,
        work.at,
    );
    work.retire_active_except(&terms.subscription_id, HistoryReason::DuplicateActive)?;
    work.state.upsert(entitlement);
    work.grant_period(plan.allotment);

    Ok(Effect::SubscriptionStarted { tier: plan.tier })
}

fn schedule_plan_change(
    work: &mut Work,
    previous: &Entitlement,
    terms: &SubscriptionTerms,
    plan: &PlanEntry,
) -> Result<Effect, BillingError> {
    let successor = Entitlement::succeed(
        previous,
        terms.subscription_id.clone(),
        plan,
        terms.period,
        terms.cancel_at_period_end,
        work.at,
    );
    work.retire_active_except(&terms.subscription_id, HistoryReason::Superseded)?;
    work.state.upsert(successor);

    Ok(Effect::PlanChangeScheduled {
        from: previous.tier,
        to: plan.tier,
    })
}
