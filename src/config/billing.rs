//! Billing catalog configuration
//!
//! The catalog defaults to the built-in price list. Pointing `catalog_path`
//! at a YAML file replaces it entirely:
//!
//! ```yaml
//! plans:
//!   - price_id: price_basic_monthly
//!     tier: basic
//!     minutes: 10
//! packages:
//!   - package_id: price_starter
//!     name: starter
//!     base_credits: 100
//!     bonus_credits: 5
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::error::{ConfigError, ValidationError};
use crate::domain::billing::{Allotment, Catalog, CreditPackage, PlanEntry, PlanTier};

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_credits_per_minute")]
    pub credits_per_minute: i64,

    /// Optional YAML catalog replacing the built-in one
    pub catalog_path: Option<PathBuf>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            credits_per_minute: default_credits_per_minute(),
            catalog_path: None,
        }
    }
}

fn default_credits_per_minute() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    plans: Vec<PlanRow>,
    #[serde(default)]
    packages: Vec<PackageRow>,
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    price_id: String,
    tier: PlanTier,
    minutes: i64,
    /// Defaults to `minutes * credits_per_minute`
    credits: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PackageRow {
    package_id: String,
    name: String,
    base_credits: i64,
    #[serde(default)]
    bonus_credits: i64,
}

impl BillingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.credits_per_minute <= 0 {
            return Err(ValidationError::InvalidCreditsPerMinute);
        }
        Ok(())
    }

    /// Builds the catalog from the configured file, or the built-in list.
    pub fn load_catalog(&self) -> Result<Catalog, ConfigError> {
        match &self.catalog_path {
            Some(path) => self.catalog_from_file(path),
            None => Ok(Catalog::standard(self.credits_per_minute)?),
        }
    }

    fn catalog_from_file(&self, path: &Path) -> Result<Catalog, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.catalog_from_yaml(&raw)
    }

    fn catalog_from_yaml(&self, raw: &str) -> Result<Catalog, ConfigError> {
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        let cpm = self.credits_per_minute;

        let plans = file
            .plans
            .into_iter()
            .map(|row| PlanEntry {
                allotment: Allotment::new(
                    row.minutes,
                    row.credits.unwrap_or_else(|| row.minutes.saturating_mul(cpm)),
                ),
                price_id: row.price_id,
                tier: row.tier,
            })
            .collect();
        let packages = file
            .packages
            .into_iter()
            .map(|row| CreditPackage {
                package_id: row.package_id,
                name: row.name,
                base_credits: row.base_credits,
                bonus_credits: row.bonus_credits,
            })
            .collect();

        Ok(Catalog::new(plans, packages, cpm)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CATALOG: &str = r#"
plans:
  - price_id: price_basic
    tier: basic
    minutes: 10
  - price_id: price_pro
    tier: pro
    minutes: 30
    credits: 250
packages:
  - package_id: price_starter
    name: starter
    base_credits: 100
    bonus_credits: 5
"#;

    fn write_catalog(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn without_path_uses_builtin_catalog() {
        let catalog = BillingConfig::default().load_catalog().unwrap();
        let plan = catalog.plan("price_1QSRGEIfIBf9iveko6Cj79JN").unwrap();
        assert_eq!(plan.tier, PlanTier::Pro);
        assert_eq!(plan.allotment, Allotment::new(30, 300));
        assert_eq!(catalog.package("price_1QeM5eIfIBf9ivekvb8ZvDAI").unwrap().total_credits(), 5750);
    }

    #[test]
    fn yaml_file_replaces_builtin_catalog() {
        let file = write_catalog(CATALOG);
        let config = BillingConfig {
            catalog_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let catalog = config.load_catalog().unwrap();

        assert_eq!(catalog.plan("price_basic").unwrap().allotment, Allotment::new(10, 100));
        assert_eq!(catalog.plan("price_pro").unwrap().allotment, Allotment::new(30, 250));
        assert_eq!(catalog.package("price_starter").unwrap().total_credits(), 105);
        assert!(catalog.plan("price_1QSRGEIfIBf9iveko6Cj79JN").is_err());
    }

    #[test]
    fn plan_credits_follow_conversion_rate() {
        let file = write_catalog(CATALOG);
        let config = BillingConfig {
            credits_per_minute: 4,
            catalog_path: Some(file.path().to_path_buf()),
        };
        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog.plan("price_basic").unwrap().allotment.credits, 40);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let file = write_catalog(
            r#"
plans:
  - { price_id: price_a, tier: basic, minutes: 10 }
  - { price_id: price_a, tier: pro, minutes: 30 }
"#,
        );
        let config = BillingConfig {
            catalog_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(config.load_catalog(), Err(ConfigError::CatalogRejected(_))));
    }

    #[test]
    fn zero_minute_plan_is_rejected() {
        let file = write_catalog("plans:\n  - { price_id: price_a, tier: basic, minutes: 0 }\n");
        let config = BillingConfig {
            catalog_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(config.load_catalog(), Err(ConfigError::CatalogRejected(_))));
    }

    #[test]
    fn unknown_tier_is_a_parse_error() {
        let file = write_catalog("plans:\n  - { price_id: price_a, tier: gold, minutes: 10 }\n");
        let config = BillingConfig {
            catalog_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(config.load_catalog(), Err(ConfigError::CatalogMalformed(_))));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let config = BillingConfig {
            catalog_path: Some(PathBuf::from("/nonexistent/catalog.yaml")),
            ..Default::default()
        };
        match config.load_catalog() {
            Err(ConfigError::CatalogUnreadable { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/catalog.yaml"))
            }
            other => panic!("expected unreadable catalog, got {:?}", other),
        }
    }

    #[test]
    fn non_positive_conversion_rate_fails_validation() {
        let config = BillingConfig {
            credits_per_minute: 0,
            catalog_path: None,
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidCreditsPerMinute)
        ));
    }
}
