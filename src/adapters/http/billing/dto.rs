//! Request and response bodies for the billing endpoints.

use serde::{Deserialize, Serialize};

use crate::application::WebhookOutcomeKind;
use crate::domain::billing::{
    BillingSnapshot, EntitlementStatus, HistoryReason, LedgerBalance, PlanTier,
    SubscriptionHistoryEntry,
};
use crate::domain::foundation::Timestamp;

// ════════════════════════════════════════════════════════════════════════════════
// Requests
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub price_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditCheckoutRequest {
    pub package_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebitRequest {
    pub minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub minutes: i64,
    #[serde(default)]
    pub attempt_id: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Responses
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAckResponse {
    pub received: bool,
    pub outcome: WebhookOutcomeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub remaining_credits: i64,
    pub remaining_minutes: i64,
}

impl From<LedgerBalance> for LedgerResponse {
    fn from(balance: LedgerBalance) -> Self {
        Self {
            remaining_credits: balance.remaining_credits,
            remaining_minutes: balance.remaining_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub remaining_credits: i64,
    pub remaining_minutes: i64,
    pub already_refunded: bool,
}

/// Current and next-period values of an allotment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodValues {
    pub current: i64,
    pub next: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub status: EntitlementStatus,
    pub tier: Option<PlanTier>,
    pub credits: PeriodValues,
    pub minutes: PeriodValues,
    pub period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeditationMinutes {
    pub available: i64,
    /// Minutes consumed, net of refunds.
    pub total: i64,
}

/// Body of `GET /api/billing/credits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsResponse {
    pub available_credits: i64,
    pub total_credits: i64,
    pub subscription: SubscriptionView,
    pub meditation_minutes: MeditationMinutes,
}

impl From<BillingSnapshot> for CreditsResponse {
    fn from(s: BillingSnapshot) -> Self {
        Self {
            available_credits: s.credits.available_credits,
            total_credits: s.credits.total_credits_granted,
            subscription: SubscriptionView {
                status: s.status,
                tier: s.tier,
                credits: PeriodValues {
                    current: s.current_period.credits,
                    next: s.next_period.credits,
                },
                minutes: PeriodValues {
                    current: s.current_period.minutes,
                    next: s.next_period.minutes,
                },
                period_end: s.period_end,
                cancel_at_period_end: s.cancel_at_period_end,
            },
            meditation_minutes: MeditationMinutes {
                available: s.minutes.available_minutes,
                total: s.minutes.total_minutes_used,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntryResponse {
    pub subscription_id: String,
    pub previous_status: EntitlementStatus,
    pub new_status: EntitlementStatus,
    pub reason: HistoryReason,
    pub recorded_at: Timestamp,
}

impl From<SubscriptionHistoryEntry> for HistoryEntryResponse {
    fn from(entry: SubscriptionHistoryEntry) -> Self {
        Self {
            subscription_id: entry.provider_subscription_id,
            previous_status: entry.previous_status,
            new_status: entry.new_status,
            reason: entry.reason,
            recorded_at: entry.recorded_at,
        }
    }
}

/// Standard error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::UserBillingState;
    use crate::domain::foundation::UserId;

    #[test]
    fn credits_response_for_new_user_has_zero_balances() {
        let snapshot = UserBillingState::empty(UserId::new("user-1").unwrap()).snapshot();
        let json = serde_json::to_value(CreditsResponse::from(snapshot)).unwrap();

        assert_eq!(json["available_credits"], 0);
        assert_eq!(json["subscription"]["status"], "none");
        assert!(json["subscription"]["tier"].is_null());
        assert_eq!(json["subscription"]["minutes"]["next"], 0);
        assert_eq!(json["meditation_minutes"]["available"], 0);
        assert_eq!(json["meditation_minutes"]["total"], 0);
    }

    #[test]
    fn webhook_ack_serializes_outcome_in_snake_case() {
        let ack = WebhookAckResponse {
            received: true,
            outcome: WebhookOutcomeKind::Duplicate,
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"received":true,"outcome":"duplicate"}"#);
    }

    #[test]
    fn webhook_ack_reads_back_from_json() {
        let ack: WebhookAckResponse =
            serde_json::from_str(r#"{"received":true,"outcome":"ignored"}"#).unwrap();
        assert!(ack.received);
        assert_eq!(ack.outcome, WebhookOutcomeKind::Ignored);
    }

    #[test]
    fn refund_request_attempt_id_is_optional() {
        let req: RefundRequest = serde_json::from_str(r#"{"minutes": 3}"#).unwrap();
        assert_eq!(req.minutes, 3);
        assert!(req.attempt_id.is_none());
    }
}
