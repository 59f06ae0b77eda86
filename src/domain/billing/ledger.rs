//! Credit and minute ledgers.
//!
//! Both ledgers keep their balances non-negative by construction: every
//! operation that would drive a balance below zero is rejected before any
//! field is touched.

use serde::{Deserialize, Serialize};

use super::errors::BillingError;
use crate::domain::foundation::ValidationError;

/// Spendable credits for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditLedger {
    pub available_credits: i64,
    /// Monotonic sum of every grant.
    pub total_credits_granted: i64,
}

impl CreditLedger {
    /// Adds purchased credits.
    pub fn grant(&mut self, credits: i64) {
        let credits = credits.max(0);
        self.available_credits += credits;
        self.total_credits_granted += credits;
    }

    /// Starts a fresh paid period: the balance is replaced, not topped up.
    pub fn grant_period(&mut self, credits: i64) {
        let credits = credits.max(0);
        self.available_credits = credits;
        self.total_credits_granted += credits;
    }

    /// Sets the balance to `credits`, counting only the increase as granted.
    pub fn restore_to(&mut self, credits: i64) {
        let credits = credits.max(0);
        if credits > self.available_credits {
            self.total_credits_granted += credits - self.available_credits;
        }
        self.available_credits = credits;
    }

    pub fn can_cover(&self, credits: i64) -> bool {
        self.available_credits >= credits
    }
}

/// Generation minutes for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinuteLedger {
    pub available_minutes: i64,
    /// Monotonic count of consumed minutes, net of refunds.
    pub total_minutes_used: i64,
}

impl MinuteLedger {
    pub fn grant(&mut self, minutes: i64) {
        self.available_minutes += minutes.max(0);
    }

    pub fn grant_period(&mut self, minutes: i64) {
        self.available_minutes = minutes.max(0);
    }

    /// Sets the balance without touching consumption.
    pub fn restore_to(&mut self, minutes: i64) {
        self.available_minutes = minutes.max(0);
    }
}

/// Balances reported back to the caller after a ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub remaining_credits: i64,
    pub remaining_minutes: i64,
}

/// Debits `minutes` of generation from both ledgers.
///
/// Check and write happen on the same borrowed state, so the caller only
/// has to guarantee that nobody else mutates the ledgers in between (the
/// per-user unit of work does).
pub fn debit(
    credits: &mut CreditLedger,
    minutes: &mut MinuteLedger,
    requested_minutes: i64,
    credits_per_minute: i64,
) -> Result<LedgerBalance, BillingError> {
    validate_minutes(requested_minutes)?;
    let required = requested_minutes.saturating_mul(credits_per_minute);

    if !credits.can_cover(required) || minutes.available_minutes < requested_minutes {
        return Err(BillingError::InsufficientCredits {
            required,
            available: credits.available_credits,
        });
    }

    credits.available_credits -= required;
    minutes.available_minutes -= requested_minutes;
    minutes.total_minutes_used += requested_minutes;

    Ok(LedgerBalance {
        remaining_credits: credits.available_credits,
        remaining_minutes: minutes.available_minutes,
    })
}

/// Exact inverse of [`debit`]. Does not count as a grant.
pub fn refund(
    credits: &mut CreditLedger,
    minutes: &mut MinuteLedger,
    refunded_minutes: i64,
    credits_per_minute: i64,
) -> Result<LedgerBalance, BillingError> {
    validate_minutes(refunded_minutes)?;

    credits.available_credits += refunded_minutes.saturating_mul(credits_per_minute);
    minutes.available_minutes += refunded_minutes;
    minutes.total_minutes_used = (minutes.total_minutes_used - refunded_minutes).max(0);

    Ok(LedgerBalance {
        remaining_credits: credits.available_credits,
        remaining_minutes: minutes.available_minutes,
    })
}

fn validate_minutes(minutes: i64) -> Result<(), ValidationError> {
    const MAX_MINUTES: i64 = 24 * 60;
    if !(1..=MAX_MINUTES).contains(&minutes) {
        return Err(ValidationError::out_of_range("minutes", 1, MAX_MINUTES, minutes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ledgers(credits: i64, minutes: i64) -> (CreditLedger, MinuteLedger) {
        (
            CreditLedger {
                available_credits: credits,
                total_credits_granted: credits,
            },
            MinuteLedger {
                available_minutes: minutes,
                total_minutes_used: 0,
            },
        )
    }

    #[test]
    fn debit_deducts_credits_and_minutes() {
        let (mut c, mut m) = ledgers(105, 10);

        let balance = debit(&mut c, &mut m, 5, 10).unwrap();

        assert_eq!(balance.remaining_credits, 55);
        assert_eq!(balance.remaining_minutes, 5);
        assert_eq!(m.total_minutes_used, 5);
    }

    #[test]
    fn debit_rejects_overdraw_without_side_effects() {
        let (mut c, mut m) = ledgers(55, 5);

        let err = debit(&mut c, &mut m, 10, 10).unwrap_err();

        assert_eq!(
            err,
            BillingError::InsufficientCredits {
                required: 100,
                available: 55
            }
        );
        assert_eq!(c.available_credits, 55);
        assert_eq!(m.available_minutes, 5);
        assert_eq!(m.total_minutes_used, 0);
    }

    #[test]
    fn debit_rejects_when_minutes_run_short() {
        let (mut c, mut m) = ledgers(500, 2);
        assert!(debit(&mut c, &mut m, 3, 10).is_err());
        assert_eq!(c.available_credits, 500);
    }

    #[test]
    fn debit_rejects_non_positive_minutes() {
        let (mut c, mut m) = ledgers(100, 10);
        assert!(matches!(
            debit(&mut c, &mut m, 0, 10),
            Err(BillingError::Validation(_))
        ));
        assert!(refund(&mut c, &mut m, -1, 10).is_err());
    }

    #[test]
    fn refund_floors_minutes_used_at_zero() {
        let (mut c, mut m) = ledgers(0, 0);
        refund(&mut c, &mut m, 3, 10).unwrap();
        assert_eq!(m.total_minutes_used, 0);
        assert_eq!(c.available_credits, 30);
        assert_eq!(c.total_credits_granted, 0);
    }

    #[test]
    fn grant_period_replaces_balance() {
        let mut c = CreditLedger {
            available_credits: 42,
            total_credits_granted: 100,
        };
        c.grant_period(300);
        assert_eq!(c.available_credits, 300);
        assert_eq!(c.total_credits_granted, 400);
    }

    #[test]
    fn restore_to_counts_only_the_increase() {
        let mut c = CreditLedger {
            available_credits: 40,
            total_credits_granted: 100,
        };
        c.restore_to(100);
        assert_eq!(c.total_credits_granted, 160);

        c.restore_to(10);
        assert_eq!(c.available_credits, 10);
        assert_eq!(c.total_credits_granted, 160);
    }

    proptest! {
        #[test]
        fn balances_never_go_negative(
            start_minutes in 0i64..200,
            ops in prop::collection::vec((any::<bool>(), 1i64..50), 0..40),
        ) {
            let (mut c, mut m) = ledgers(start_minutes * 10, start_minutes);
            for (is_debit, minutes) in ops {
                if is_debit {
                    let _ = debit(&mut c, &mut m, minutes, 10);
                } else {
                    refund(&mut c, &mut m, minutes, 10).unwrap();
                }
                prop_assert!(c.available_credits >= 0);
                prop_assert!(m.available_minutes >= 0);
                prop_assert!(m.total_minutes_used >= 0);
            }
        }

        #[test]
        fn refund_is_the_inverse_of_debit(
            start_minutes in 0i64..500,
            used_before in 0i64..100,
            minutes in 1i64..100,
        ) {
            let (mut c, mut m) = ledgers(start_minutes * 10, start_minutes);
            m.total_minutes_used = used_before;
            let before = (c, m);

            if debit(&mut c, &mut m, minutes, 10).is_ok() {
                refund(&mut c, &mut m, minutes, 10).unwrap();
            }

            prop_assert_eq!((c, m), before);
        }
    }
}
