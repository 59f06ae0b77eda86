//! Event classification.
//!
//! Turns a verified envelope into exactly one typed payload, or an
//! acknowledgement-only `Ignored`. Rules are checked in priority order:
//!
//! 1. completed checkout, no subscription, credit package id -> `CreditCheckout`
//! 2. completed checkout with a subscription -> `SubscriptionCheckout`
//! 3. subscription created/updated -> `SubscriptionUpserted`
//! 4. subscription deleted -> `SubscriptionCanceled`
//!
//! Whether a package id is in the catalog is decided later: an unknown id
//! is a fatal catalog error, not a reason to ignore the event.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::objects::{
    metadata_keys, metadata_user_id, CheckoutSessionObject, SubscriptionObject,
};
use super::provider_event::{ProviderEvent, ProviderEventType};
use crate::domain::billing::{BillingError, BillingPeriod, SubscriptionTerms};
use crate::domain::foundation::{EventId, Timestamp, UserId};

/// Handler routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventClass {
    SubscriptionCheckout,
    CreditCheckout,
    SubscriptionUpserted,
    SubscriptionCanceled,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::SubscriptionCheckout => "SUBSCRIPTION_CHECKOUT",
            EventClass::CreditCheckout => "CREDIT_CHECKOUT",
            EventClass::SubscriptionUpserted => "SUBSCRIPTION_UPSERTED",
            EventClass::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed subscription checkout. Period and cancel flag are not on the
/// session; the processor fetches the subscription before reconciling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCheckoutPayload {
    pub session_id: String,
    pub user_id: Option<UserId>,
    pub customer_id: Option<String>,
    pub subscription_id: String,
    /// Price stamped into metadata by the initiator, if any.
    pub price_id: Option<String>,
}

/// Completed one-time credit purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditCheckoutPayload {
    pub session_id: String,
    pub user_id: Option<UserId>,
    pub customer_id: Option<String>,
    pub package_id: String,
}

/// Subscription lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPayload {
    pub user_id: Option<UserId>,
    pub customer_id: Option<String>,
    pub terms: SubscriptionTerms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedPayload {
    SubscriptionCheckout(SubscriptionCheckoutPayload),
    CreditCheckout(CreditCheckoutPayload),
    SubscriptionUpserted(SubscriptionPayload),
    SubscriptionCanceled(SubscriptionPayload),
}

impl ClassifiedPayload {
    pub fn class(&self) -> EventClass {
        match self {
            ClassifiedPayload::SubscriptionCheckout(_) => EventClass::SubscriptionCheckout,
            ClassifiedPayload::CreditCheckout(_) => EventClass::CreditCheckout,
            ClassifiedPayload::SubscriptionUpserted(_) => EventClass::SubscriptionUpserted,
            ClassifiedPayload::SubscriptionCanceled(_) => EventClass::SubscriptionCanceled,
        }
    }
}

/// An actionable event with its envelope facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub event_id: EventId,
    pub occurred_at: Timestamp,
    pub payload: ClassifiedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Actionable(ClassifiedEvent),
    /// Acknowledged and discarded.
    Ignored { reason: String },
}

/// Classifies a verified provider event.
///
/// # Errors
///
/// `MalformedEvent` when a relevant event type carries a payload that does
/// not decode, or a blank identifier.
pub fn classify(event: &ProviderEvent) -> Result<Classification, BillingError> {
    let payload = match event.parsed_type() {
        ProviderEventType::CheckoutSessionCompleted => {
            let session: CheckoutSessionObject = event.decode_object()?;
            match classify_checkout(session)? {
                Some(payload) => payload,
                None => {
                    return Ok(Classification::Ignored {
                        reason: "checkout carries neither a subscription nor a credit package"
                            .to_string(),
                    })
                }
            }
        }
        ProviderEventType::SubscriptionCreated | ProviderEventType::SubscriptionUpdated => {
            let subscription: SubscriptionObject = event.decode_object()?;
            ClassifiedPayload::SubscriptionUpserted(subscription_payload(subscription)?)
        }
        ProviderEventType::SubscriptionDeleted => {
            let subscription: SubscriptionObject = event.decode_object()?;
            ClassifiedPayload::SubscriptionCanceled(subscription_payload(subscription)?)
        }
        ProviderEventType::Other => {
            return Ok(Classification::Ignored {
                reason: format!("unhandled event type {}", event.event_type),
            })
        }
    };

    Ok(Classification::Actionable(ClassifiedEvent {
        event_id: event.event_id()?,
        occurred_at: event.occurred_at()?,
        payload,
    }))
}

fn classify_checkout(session: CheckoutSessionObject) -> Result<Option<ClassifiedPayload>, BillingError> {
    let user_id = parse_user(metadata_user_id(&session.metadata))?;
    let subscription_id = non_blank(session.subscription.clone());

    if subscription_id.is_none() {
        if let Some(package_id) = credit_package_id(&session) {
            return Ok(Some(ClassifiedPayload::CreditCheckout(CreditCheckoutPayload {
                session_id: session.id,
                user_id,
                customer_id: non_blank(session.customer),
                package_id,
            })));
        }
    }

    Ok(subscription_id.map(|subscription_id| {
        ClassifiedPayload::SubscriptionCheckout(SubscriptionCheckoutPayload {
            session_id: session.id,
            user_id,
            customer_id: non_blank(session.customer),
            subscription_id,
            price_id: non_blank(session.metadata.get(metadata_keys::PRICE_ID).cloned()),
        })
    }))
}

/// Package id of a one-time purchase. Sessions tagged `credit_purchase`
/// may carry it under `price_id`, since packages are priced by their id.
fn credit_package_id(session: &CheckoutSessionObject) -> Option<String> {
    if let Some(id) = non_blank(session.metadata.get(metadata_keys::PACKAGE_ID).cloned()) {
        return Some(id);
    }
    let is_credit_purchase = session
        .metadata
        .get(metadata_keys::TYPE)
        .is_some_and(|t| t == metadata_keys::TYPE_CREDIT_PURCHASE);
    if is_credit_purchase {
        return non_blank(session.metadata.get(metadata_keys::PRICE_ID).cloned());
    }
    None
}

fn subscription_payload(subscription: SubscriptionObject) -> Result<SubscriptionPayload, BillingError> {
    if subscription.id.trim().is_empty() {
        return Err(BillingError::MalformedEvent("subscription without id".to_string()));
    }

    let period = period_from_unix(
        subscription.current_period_start,
        subscription.current_period_end,
    )?;

    Ok(SubscriptionPayload {
        user_id: parse_user(metadata_user_id(&subscription.metadata))?,
        customer_id: non_blank(subscription.customer.clone()),
        terms: SubscriptionTerms {
            price_id: subscription.price_id().map(str::to_string),
            provider_active: subscription.is_provider_active(),
            period,
            cancel_at_period_end: subscription.cancel_at_period_end,
            subscription_id: subscription.id,
        },
    })
}

/// Converts provider period bounds into a [`BillingPeriod`].
pub fn period_from_unix(start: i64, end: i64) -> Result<BillingPeriod, BillingError> {
    let start = Timestamp::from_unix_secs(start)
        .ok_or_else(|| BillingError::MalformedEvent("invalid period start".to_string()))?;
    let end = Timestamp::from_unix_secs(end)
        .ok_or_else(|| BillingError::MalformedEvent("invalid period end".to_string()))?;
    BillingPeriod::new(start, end).map_err(|e| BillingError::MalformedEvent(e.to_string()))
}

fn parse_user(raw: Option<&str>) -> Result<Option<UserId>, BillingError> {
    raw.map(UserId::new)
        .transpose()
        .map_err(|e| BillingError::MalformedEvent(e.to_string()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::webhook::provider_event::ProviderEventData;
    use serde_json::{json, Value};

    fn event(event_type: &str, object: Value) -> ProviderEvent {
        ProviderEvent {
            id: "evt_1".into(),
            event_type: event_type.into(),
            created: 1_704_067_200,
            livemode: false,
            data: ProviderEventData {
                object,
                previous_attributes: None,
            },
        }
    }

    fn actionable(event: &ProviderEvent) -> ClassifiedEvent {
        match classify(event).unwrap() {
            Classification::Actionable(c) => c,
            other => panic!("expected actionable, got {:?}", other),
        }
    }

    fn subscription_object(status: &str) -> Value {
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": status,
            "current_period_start": 1_704_067_200,
            "current_period_end": 1_706_745_600,
            "cancel_at_period_end": true,
            "metadata": { "user_id": "user-1" },
            "items": { "data": [ { "price": { "id": "price_pro" } } ] }
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Checkout sessions
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn checkout_with_package_and_no_subscription_is_credit_checkout() {
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": null,
                "mode": "payment",
                "metadata": { "user_id": "user-1", "package_id": "price_pkg", "type": "credit_purchase" }
            }),
        );

        let classified = actionable(&e);
        assert_eq!(classified.payload.class(), EventClass::CreditCheckout);
        match classified.payload {
            ClassifiedPayload::CreditCheckout(p) => {
                assert_eq!(p.package_id, "price_pkg");
                assert_eq!(p.user_id.unwrap().as_str(), "user-1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn credit_purchase_type_accepts_price_id_as_package() {
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "metadata": { "userId": "user-1", "price_id": "price_pkg", "type": "credit_purchase" }
            }),
        );
        match actionable(&e).payload {
            ClassifiedPayload::CreditCheckout(p) => assert_eq!(p.package_id, "price_pkg"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn checkout_with_subscription_is_subscription_checkout() {
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_2",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": "user-1", "price_id": "price_pro", "type": "subscription" }
            }),
        );

        match actionable(&e).payload {
            ClassifiedPayload::SubscriptionCheckout(p) => {
                assert_eq!(p.subscription_id, "sub_1");
                assert_eq!(p.price_id.as_deref(), Some("price_pro"));
                assert_eq!(p.customer_id.as_deref(), Some("cus_1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn subscription_reference_wins_over_package_id() {
        let e = event(
            "checkout.session.completed",
            json!({
                "id": "cs_3",
                "subscription": "sub_1",
                "metadata": { "package_id": "price_pkg" }
            }),
        );
        assert_eq!(actionable(&e).payload.class(), EventClass::SubscriptionCheckout);
    }

    #[test]
    fn checkout_without_subscription_or_package_is_ignored() {
        let e = event(
            "checkout.session.completed",
            json!({ "id": "cs_4", "metadata": { "user_id": "user-1" } }),
        );
        assert!(matches!(classify(&e).unwrap(), Classification::Ignored { .. }));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn created_and_updated_are_upserts() {
        for t in ["customer.subscription.created", "customer.subscription.updated"] {
            let classified = actionable(&event(t, subscription_object("active")));
            match classified.payload {
                ClassifiedPayload::SubscriptionUpserted(p) => {
                    assert_eq!(p.terms.subscription_id, "sub_1");
                    assert_eq!(p.terms.price_id.as_deref(), Some("price_pro"));
                    assert!(p.terms.provider_active);
                    assert!(p.terms.cancel_at_period_end);
                    assert_eq!(p.user_id.unwrap().as_str(), "user-1");
                }
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(classified.occurred_at.as_unix_secs(), 1_704_067_200);
        }
    }

    #[test]
    fn deleted_is_cancellation() {
        let classified = actionable(&event(
            "customer.subscription.deleted",
            subscription_object("canceled"),
        ));
        match classified.payload {
            ClassifiedPayload::SubscriptionCanceled(p) => assert!(!p.terms.provider_active),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unrelated_event_types_are_ignored() {
        let e = event("invoice.payment_succeeded", json!({ "id": "in_1" }));
        match classify(&e).unwrap() {
            Classification::Ignored { reason } => assert!(reason.contains("invoice.payment_succeeded")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_subscription_payload_is_rejected() {
        let e = event("customer.subscription.updated", json!({ "id": "sub_1" }));
        assert!(matches!(classify(&e), Err(BillingError::MalformedEvent(_))));

        let mut inverted = subscription_object("active");
        inverted["current_period_end"] = json!(1);
        let e = event("customer.subscription.updated", inverted);
        assert!(matches!(classify(&e), Err(BillingError::MalformedEvent(_))));
    }

    #[test]
    fn class_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&EventClass::CreditCheckout).unwrap(),
            "\"CREDIT_CHECKOUT\""
        );
        assert_eq!(EventClass::SubscriptionUpserted.to_string(), "SUBSCRIPTION_UPSERTED");
    }
}
