//! Inbound webhook domain: envelope, provider objects, signature
//! verification, and classification into typed handler payloads.

mod classifier;
mod objects;
mod provider_event;
mod signature;

pub use classifier::{
    classify, period_from_unix, Classification, ClassifiedEvent, ClassifiedPayload,
    CreditCheckoutPayload, EventClass, SubscriptionCheckoutPayload, SubscriptionPayload,
};
pub use objects::{
    metadata_keys, metadata_user_id, CheckoutSessionObject, PriceRef, SubscriptionItem,
    SubscriptionItems, SubscriptionObject,
};
pub use provider_event::{ProviderEvent, ProviderEventData, ProviderEventType};
pub use signature::{sign_payload, SignatureHeader, WebhookVerifier};
