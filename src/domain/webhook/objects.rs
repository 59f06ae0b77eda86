//! Provider objects carried in `data.object`.
//!
//! Fields the core never reads are left out. Everything the provider may
//! omit is optional or defaulted, so a missing field is reported by the
//! classifier with context instead of failing deserialization wholesale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata keys stamped by the checkout initiator.
pub mod metadata_keys {
    pub const USER_ID: &str = "user_id";
    /// Key used by sessions created before the snake_case rename.
    pub const LEGACY_USER_ID: &str = "userId";
    pub const PRICE_ID: &str = "price_id";
    pub const PACKAGE_ID: &str = "package_id";
    pub const TYPE: &str = "type";

    pub const TYPE_SUBSCRIPTION: &str = "subscription";
    pub const TYPE_CREDIT_PURCHASE: &str = "credit_purchase";
}

/// Reads the user id from provider metadata, accepting the legacy key.
pub fn metadata_user_id(metadata: &HashMap<String, String>) -> Option<&str> {
    metadata
        .get(metadata_keys::USER_ID)
        .or_else(|| metadata.get(metadata_keys::LEGACY_USER_ID))
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Checkout Session object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSessionObject {
    /// Session identifier (cs_...).
    pub id: String,

    pub customer: Option<String>,

    /// Set when the checkout created a recurring subscription.
    pub subscription: Option<String>,

    /// payment, setup or subscription.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Subscription object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionObject {
    /// Subscription identifier (sub_...).
    pub id: String,

    pub customer: Option<String>,

    /// active, trialing, past_due, canceled, incomplete, unpaid, ...
    pub status: String,

    pub current_period_start: i64,
    pub current_period_end: i64,

    #[serde(default)]
    pub cancel_at_period_end: bool,

    #[serde(default)]
    pub created: Option<i64>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub items: SubscriptionItems,
}

/// Subscription items list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionItem {
    pub price: PriceRef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceRef {
    pub id: String,
}

impl SubscriptionObject {
    /// Price of the first subscription item.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    /// Whether the provider status still grants service.
    pub fn is_provider_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing" | "past_due")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscription_reads_first_item_price() {
        let sub: SubscriptionObject = serde_json::from_value(json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "trialing",
            "current_period_start": 100,
            "current_period_end": 200,
            "items": { "object": "list", "data": [
                { "id": "si_1", "price": { "id": "price_a", "currency": "usd" } },
                { "id": "si_2", "price": { "id": "price_b" } }
            ]}
        }))
        .unwrap();

        assert_eq!(sub.price_id(), Some("price_a"));
        assert!(sub.is_provider_active());
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn canceled_and_incomplete_statuses_are_not_active() {
        for status in ["canceled", "incomplete", "incomplete_expired", "unpaid"] {
            let sub: SubscriptionObject = serde_json::from_value(json!({
                "id": "sub_1",
                "status": status,
                "current_period_start": 100,
                "current_period_end": 200
            }))
            .unwrap();
            assert!(!sub.is_provider_active(), "{status}");
            assert_eq!(sub.price_id(), None);
        }
    }

    #[test]
    fn metadata_user_id_accepts_legacy_key() {
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), "user-legacy".to_string());
        assert_eq!(metadata_user_id(&metadata), Some("user-legacy"));

        metadata.insert("user_id".to_string(), "user-new".to_string());
        assert_eq!(metadata_user_id(&metadata), Some("user-new"));

        metadata.insert("user_id".to_string(), " ".to_string());
        metadata.remove("userId");
        assert_eq!(metadata_user_id(&metadata), None);
    }
}
