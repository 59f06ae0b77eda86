//! Inbound payment-processor event envelope.
//!
//! Only the envelope is typed here. The `data.object` payload stays a
//! `serde_json::Value` until the classifier decodes it into one of the
//! typed objects in [`super::objects`].

use serde::{Deserialize, Serialize};

use crate::domain::billing::BillingError;
use crate::domain::foundation::{EventId, Timestamp};

/// Event envelope as delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    /// Unique event identifier (evt_...). Redeliveries reuse it.
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp at which the provider created the event.
    pub created: i64,

    #[serde(default)]
    pub livemode: bool,

    pub data: ProviderEventData,
}

/// Container for the affected object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventData {
    pub object: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

/// Event types the reconciliation core acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventType {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    Other,
}

impl ProviderEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutSessionCompleted => "checkout.session.completed",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::Other => "other",
        }
    }
}

impl ProviderEvent {
    pub fn parsed_type(&self) -> ProviderEventType {
        ProviderEventType::parse(&self.event_type)
    }

    pub fn event_id(&self) -> Result<EventId, BillingError> {
        EventId::new(self.id.clone())
            .map_err(|_| BillingError::MalformedEvent("event has no id".to_string()))
    }

    /// The provider's creation time. Reconciliation uses this as its only clock.
    pub fn occurred_at(&self) -> Result<Timestamp, BillingError> {
        Timestamp::from_unix_secs(self.created).ok_or_else(|| {
            BillingError::MalformedEvent(format!("event {} has invalid created time", self.id))
        })
    }

    /// Decodes `data.object` into a typed provider object.
    pub fn decode_object<T: serde::de::DeserializeOwned>(&self) -> Result<T, BillingError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            BillingError::MalformedEvent(format!(
                "{} payload for event {}: {}",
                self.event_type, self.id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_minimal_envelope() {
        let raw = r#"{
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "created": 1704067200,
            "data": { "object": { "id": "sub_1" } }
        }"#;

        let event: ProviderEvent = serde_json::from_str(raw).unwrap();

        assert_eq!(event.id, "evt_1");
        assert!(!event.livemode);
        assert_eq!(event.parsed_type(), ProviderEventType::SubscriptionUpdated);
        assert_eq!(event.occurred_at().unwrap().as_unix_secs(), 1704067200);
    }

    #[test]
    fn unrelated_types_parse_as_other() {
        assert_eq!(
            ProviderEventType::parse("invoice.payment_succeeded"),
            ProviderEventType::Other
        );
        for t in [
            ProviderEventType::CheckoutSessionCompleted,
            ProviderEventType::SubscriptionCreated,
            ProviderEventType::SubscriptionUpdated,
            ProviderEventType::SubscriptionDeleted,
        ] {
            assert_eq!(ProviderEventType::parse(t.as_str()), t);
        }
    }

    #[test]
    fn decode_object_reports_malformed_payload() {
        #[derive(Debug, Deserialize)]
        struct NeedsAmount {
            #[allow(dead_code)]
            amount: i64,
        }

        let event = ProviderEvent {
            id: "evt_2".into(),
            event_type: "checkout.session.completed".into(),
            created: 1,
            livemode: false,
            data: ProviderEventData {
                object: json!({ "id": "cs_1" }),
                previous_attributes: None,
            },
        };

        let err = event.decode_object::<NeedsAmount>().unwrap_err();
        assert!(matches!(err, BillingError::MalformedEvent(_)));
    }
}
