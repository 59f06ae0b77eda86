//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("Cannot read catalog file {path}: {source}")]
    CatalogUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse catalog file: {0}")]
    CatalogMalformed(#[from] serde_yaml::Error),

    #[error("Catalog rejected: {0}")]
    CatalogRejected(#[from] crate::domain::foundation::ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Timeout must be a positive number of seconds within bounds")]
    InvalidTimeout,

    #[error("Production must bind a fixed port")]
    EphemeralPortInProduction,

    #[error("Database url must be a postgres:// or postgresql:// url")]
    InvalidDatabaseUrl,

    #[error("Database pool size must be between {min} and {max}")]
    InvalidPoolSize { min: u32, max: u32 },

    #[error("Invalid Stripe API key format")]
    InvalidStripeKey,

    #[error("Invalid Stripe webhook secret format")]
    InvalidStripeWebhookSecret,

    #[error("Site URL must be an absolute http(s) URL")]
    InvalidSiteUrl,

    #[error("Site URL must use HTTPS in production")]
    SiteUrlMustBeHttps,

    #[error("credits_per_minute must be positive")]
    InvalidCreditsPerMinute,
}
