//! Billing error taxonomy.
//!
//! Every failure the reconciliation core can report, with the retry and
//! HTTP semantics the webhook endpoint and the user-facing routes rely on.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ValidationError};

/// Which catalog map an identifier was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    SubscriptionPrice,
    CreditPackage,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogKind::SubscriptionPrice => write!(f, "subscription price"),
            CatalogKind::CreditPackage => write!(f, "credit package"),
        }
    }
}

/// Errors produced by the billing core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BillingError {
    /// Signature header absent from an inbound webhook.
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    /// Inbound event failed signature or timestamp verification.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Catalog lookup failed. Signals misconfiguration; never defaulted.
    #[error("Unknown {kind} identifier '{id}'")]
    UnknownCatalogId { kind: CatalogKind, id: String },

    /// Event was already applied. Acknowledged, not a failure.
    #[error("Event {0} was already processed")]
    DuplicateEvent(String),

    /// Expected business outcome of a debit against a short balance.
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    /// Transient storage failure. The unit of work had no effect.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Payment processor call failed.
    #[error("Payment provider error: {message}")]
    UpstreamProviderError { message: String, retryable: bool },

    /// Event payload could not be decoded into its typed shape.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Required metadata was absent from the event.
    #[error("Missing required metadata: {0}")]
    MissingMetadata(&'static str),

    /// User has no payment-processor customer record yet.
    #[error("Customer not found. Please subscribe to a plan first.")]
    CustomerNotFound,

    /// Aggregate refused a state change.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller input failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl BillingError {
    pub fn unknown_price(id: impl Into<String>) -> Self {
        BillingError::UnknownCatalogId {
            kind: CatalogKind::SubscriptionPrice,
            id: id.into(),
        }
    }

    pub fn unknown_package(id: impl Into<String>) -> Self {
        BillingError::UnknownCatalogId {
            kind: CatalogKind::CreditPackage,
            id: id.into(),
        }
    }

    /// Returns true if redelivering the same request can succeed.
    ///
    /// The webhook endpoint answers retryable errors with a 5xx so the
    /// provider redelivers; everything else is answered with a status the
    /// provider treats as final.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::StorageConflict(_) => true,
            BillingError::UpstreamProviderError { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if the outcome should be reported as success.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, BillingError::DuplicateEvent(_))
    }

    /// Machine-readable error code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::MissingSignature => "MISSING_SIGNATURE",
            BillingError::InvalidSignature(_) => "INVALID_SIGNATURE",
            BillingError::UnknownCatalogId { .. } => "UNKNOWN_CATALOG_ID",
            BillingError::DuplicateEvent(_) => "DUPLICATE_EVENT",
            BillingError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            BillingError::StorageConflict(_) => "STORAGE_CONFLICT",
            BillingError::UpstreamProviderError { .. } => "UPSTREAM_PROVIDER_ERROR",
            BillingError::MalformedEvent(_) => "MALFORMED_EVENT",
            BillingError::MissingMetadata(_) => "MISSING_METADATA",
            BillingError::CustomerNotFound => "CUSTOMER_NOT_FOUND",
            BillingError::InvalidState(_) => "INVALID_STATE",
            BillingError::Validation(_) => "VALIDATION_FAILED",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::MissingSignature => StatusCode::BAD_REQUEST,
            BillingError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            BillingError::UnknownCatalogId { .. }
            | BillingError::MalformedEvent(_)
            | BillingError::MissingMetadata(_)
            | BillingError::Validation(_) => StatusCode::BAD_REQUEST,
            BillingError::DuplicateEvent(_) => StatusCode::OK,
            BillingError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            BillingError::CustomerNotFound => StatusCode::NOT_FOUND,
            BillingError::InvalidState(_) => StatusCode::CONFLICT,
            BillingError::StorageConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::UpstreamProviderError { retryable: true, .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BillingError::UpstreamProviderError { retryable: false, .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl From<DomainError> for BillingError {
    fn from(err: DomainError) -> Self {
        BillingError::StorageConflict(err.to_string())
    }
}
