//! Application configuration
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables carry the `MEDITATION_BILLING`
//! prefix and nested values are separated by a double underscore.
//!
//! # Example
//!
//! ```no_run
//! use meditation_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod error;
mod payment;
mod runtime;

pub use billing::BillingConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;
pub use runtime::{DatabaseConfig, Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub payment: PaymentConfig,

    #[serde(default)]
    pub billing: BillingConfig,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// A `.env` file is read first when present. Variable names map onto
    /// nested fields:
    ///
    /// - `MEDITATION_BILLING__SERVER__BIND=0.0.0.0:8080` -> `server.bind`
    /// - `MEDITATION_BILLING__PAYMENT__SITE_URL=...` -> `payment.site_url`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when required variables are missing or cannot
    /// be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("MEDITATION_BILLING")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Semantic validation of every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payment.validate(self.is_production())?;
        self.billing.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Environment variables are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[(&str, &str)] = &[
        ("MEDITATION_BILLING__DATABASE__URL", "postgresql://test@localhost/billing"),
        ("MEDITATION_BILLING__PAYMENT__STRIPE_API_KEY", "sk_test_xxx"),
        ("MEDITATION_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx"),
        ("MEDITATION_BILLING__PAYMENT__SITE_URL", "https://calm.example.com"),
    ];

    const OPTIONAL: &[&str] = &[
        "MEDITATION_BILLING__SERVER__BIND",
        "MEDITATION_BILLING__DATABASE__POOL_SIZE",
        "MEDITATION_BILLING__SERVER__ENVIRONMENT",
        "MEDITATION_BILLING__BILLING__CREDITS_PER_MINUTE",
    ];

    fn set_minimal_env() {
        for (key, value) in VARS {
            env::set_var(key, value);
        }
    }

    fn clear_env() {
        for (key, _) in VARS {
            env::remove_var(key);
        }
        for key in OPTIONAL {
            env::remove_var(key);
        }
    }

    fn load_with(extra: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        set_minimal_env();
        for (key, value) in extra {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn loads_required_sections_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[]).unwrap();

        assert_eq!(config.database.url, "postgresql://test@localhost/billing");
        assert_eq!(config.payment.site_url, "https://calm.example.com");
        assert!(!config.payment.require_livemode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn optional_sections_take_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[]).unwrap();

        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.billing.credits_per_minute, 10);
        assert!(config.billing.catalog_path.is_none());
    }

    #[test]
    fn nested_overrides_are_applied() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = load_with(&[
            ("MEDITATION_BILLING__SERVER__BIND", "127.0.0.1:3000"),
            ("MEDITATION_BILLING__DATABASE__POOL_SIZE", "4"),
            ("MEDITATION_BILLING__SERVER__ENVIRONMENT", "production"),
            ("MEDITATION_BILLING__BILLING__CREDITS_PER_MINUTE", "5"),
        ])
        .unwrap();

        assert_eq!(config.server.bind.to_string(), "127.0.0.1:3000");
        assert_eq!(config.database.pool_size, 4);
        assert!(config.is_production());
        assert_eq!(config.billing.credits_per_minute, 5);
    }

    #[test]
    fn missing_database_section_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("MEDITATION_BILLING__PAYMENT__STRIPE_API_KEY", "sk_test_xxx");
        env::set_var("MEDITATION_BILLING__PAYMENT__STRIPE_WEBHOOK_SECRET", "whsec_xxx");
        env::set_var("MEDITATION_BILLING__PAYMENT__SITE_URL", "https://calm.example.com");
        let result = AppConfig::load();
        clear_env();

        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
