//! Price and credit-package catalog.
//!
//! Maps external processor identifiers onto internal allotments. Lookups
//! never fall back to a default: an unknown identifier is a hard error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::errors::BillingError;
use super::tier::PlanTier;
use crate::domain::foundation::ValidationError;

/// Minutes and credits granted for one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allotment {
    pub minutes: i64,
    pub credits: i64,
}

impl Allotment {
    pub const ZERO: Allotment = Allotment {
        minutes: 0,
        credits: 0,
    };

    pub fn new(minutes: i64, credits: i64) -> Self {
        Self { minutes, credits }
    }
}

/// Subscription price entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub price_id: String,
    pub tier: PlanTier,
    pub allotment: Allotment,
}

/// One-time credit package. The package id doubles as the processor price
/// id used for the checkout line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditPackage {
    pub package_id: String,
    pub name: String,
    pub base_credits: i64,
    pub bonus_credits: i64,
}

impl CreditPackage {
    pub fn total_credits(&self) -> i64 {
        self.base_credits + self.bonus_credits
    }
}

/// Immutable catalog shared by the reconciliation handlers and the
/// checkout initiator.
#[derive(Debug, Clone)]
pub struct Catalog {
    plans: HashMap<String, PlanEntry>,
    packages: HashMap<String, CreditPackage>,
    credits_per_minute: i64,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids and empty allotments.
    pub fn new(
        plans: Vec<PlanEntry>,
        packages: Vec<CreditPackage>,
        credits_per_minute: i64,
    ) -> Result<Self, ValidationError> {
        if credits_per_minute <= 0 {
            return Err(ValidationError::out_of_range(
                "credits_per_minute",
                1,
                i64::MAX,
                credits_per_minute,
            ));
        }

        let mut plan_map = HashMap::with_capacity(plans.len());
        for plan in plans {
            if plan.price_id.trim().is_empty() {
                return Err(ValidationError::empty_field("price_id"));
            }
            if plan.allotment.minutes <= 0 || plan.allotment.credits <= 0 {
                return Err(ValidationError::invalid_format(
                    "plans",
                    format!("price '{}' grants nothing", plan.price_id),
                ));
            }
            if plan_map.contains_key(&plan.price_id) {
                return Err(ValidationError::invalid_format(
                    "plans",
                    format!("duplicate price id '{}'", plan.price_id),
                ));
            }
            plan_map.insert(plan.price_id.clone(), plan);
        }

        let mut package_map = HashMap::with_capacity(packages.len());
        for package in packages {
            if package.package_id.trim().is_empty() {
                return Err(ValidationError::empty_field("package_id"));
            }
            if package.base_credits <= 0 || package.bonus_credits < 0 {
                return Err(ValidationError::invalid_format(
                    "packages",
                    format!("package '{}' has invalid credit amounts", package.package_id),
                ));
            }
            if package_map.contains_key(&package.package_id) || plan_map.contains_key(&package.package_id) {
                return Err(ValidationError::invalid_format(
                    "packages",
                    format!("duplicate package id '{}'", package.package_id),
                ));
            }
            package_map.insert(package.package_id.clone(), package);
        }

        Ok(Self {
            plans: plan_map,
            packages: package_map,
            credits_per_minute,
        })
    }

    /// The production price list.
    pub fn standard(credits_per_minute: i64) -> Result<Self, ValidationError> {
        let plan = |price_id: &str, tier: PlanTier, minutes: i64| PlanEntry {
            price_id: price_id.to_string(),
            tier,
            allotment: Allotment::new(minutes, minutes * credits_per_minute),
        };
        let package = |package_id: &str, name: &str, base: i64, bonus: i64| CreditPackage {
            package_id: package_id.to_string(),
            name: name.to_string(),
            base_credits: base,
            bonus_credits: bonus,
        };

        Self::new(
            vec![
                plan("price_1QSRCGIfIBf9ivekBp2fRf03", PlanTier::Basic, 10),
                plan("price_1QeLn1IfIBf9ivekghK86k8N", PlanTier::Basic, 10),
                plan("price_1QSRGEIfIBf9iveko6Cj79JN", PlanTier::Pro, 30),
                plan("price_1QeLoMIfIBf9ivekW9TQeFyt", PlanTier::Pro, 30),
                plan("price_1QSRGeIfIBf9ivekryJ7zq49", PlanTier::Premium, 60),
                plan("price_1QeLpLIfIBf9ivekvP58R4d6", PlanTier::Premium, 60),
            ],
            vec![
                package("price_1QeLxDIfIBf9ivekXzPPzWdJ", "starter", 100, 5),
                package("price_1QeLzJIfIBf9iveksuGECwBc", "basic", 300, 20),
                package("price_1QeM0xIfIBf9ivekkIcojhow", "pro", 500, 50),
                package("price_1QeM3gIfIBf9ivekcnA1qkSx", "advanced", 1000, 150),
                package("price_1QeM5eIfIBf9ivekvb8ZvDAI", "ultimate", 5000, 750),
            ],
            credits_per_minute,
        )
    }

    /// Resolves a subscription price id.
    pub fn plan(&self, price_id: &str) -> Result<&PlanEntry, BillingError> {
        self.plans
            .get(price_id)
            .ok_or_else(|| BillingError::unknown_price(price_id))
    }

    /// Resolves a one-time credit package id.
    pub fn package(&self, package_id: &str) -> Result<&CreditPackage, BillingError> {
        self.packages
            .get(package_id)
            .ok_or_else(|| BillingError::unknown_package(package_id))
    }

    pub fn credits_per_minute(&self) -> i64 {
        self.credits_per_minute
    }

    /// Whole minutes purchasable with `credits`, rounded down.
    pub fn credits_to_minutes(&self, credits: i64) -> i64 {
        credits.max(0) / self.credits_per_minute
    }

    pub fn plans(&self) -> impl Iterator<Item = &PlanEntry> {
        self.plans.values()
    }

    pub fn packages(&self) -> impl Iterator<Item = &CreditPackage> {
        self.packages.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> Catalog {
        Catalog::standard(10).unwrap()
    }

    #[test]
    fn standard_catalog_resolves_every_tier() {
        let catalog = test_catalog();

        let basic = catalog.plan("price_1QSRCGIfIBf9ivekBp2fRf03").unwrap();
        assert_eq!(basic.tier, PlanTier::Basic);
        assert_eq!(basic.allotment, Allotment::new(10, 100));

        let pro = catalog.plan("price_1QeLoMIfIBf9ivekW9TQeFyt").unwrap();
        assert_eq!(pro.tier, PlanTier::Pro);
        assert_eq!(pro.allotment, Allotment::new(30, 300));

        let premium = catalog.plan("price_1QSRGeIfIBf9ivekryJ7zq49").unwrap();
        assert_eq!(premium.tier, PlanTier::Premium);
        assert_eq!(premium.allotment.minutes, 60);
    }

    #[test]
    fn unknown_price_is_an_error_not_a_default() {
        let err = test_catalog().plan("price_unknown").unwrap_err();
        assert_eq!(err, BillingError::unknown_price("price_unknown"));
    }

    #[test]
    fn package_totals_include_bonus() {
        let catalog = test_catalog();
        let starter = catalog.package("price_1QeLxDIfIBf9ivekXzPPzWdJ").unwrap();
        assert_eq!(starter.total_credits(), 105);

        let ultimate = catalog.package("price_1QeM5eIfIBf9ivekvb8ZvDAI").unwrap();
        assert_eq!(ultimate.total_credits(), 5750);
    }

    #[test]
    fn unknown_package_is_an_error() {
        assert!(matches!(
            test_catalog().package("pkg_missing"),
            Err(BillingError::UnknownCatalogId {
                kind: crate::domain::billing::CatalogKind::CreditPackage,
                ..
            })
        ));
    }

    #[test]
    fn credit_to_minute_conversion_rounds_down() {
        let catalog = test_catalog();
        assert_eq!(catalog.credits_to_minutes(105), 10);
        assert_eq!(catalog.credits_to_minutes(9), 0);
        assert_eq!(catalog.credits_to_minutes(-5), 0);
    }

    #[test]
    fn duplicate_price_ids_are_rejected() {
        let entry = PlanEntry {
            price_id: "price_a".into(),
            tier: PlanTier::Basic,
            allotment: Allotment::new(10, 100),
        };
        let result = Catalog::new(vec![entry.clone(), entry], vec![], 10);
        assert!(result.is_err());
    }

    #[test]
    fn empty_allotment_is_rejected() {
        let entry = PlanEntry {
            price_id: "price_a".into(),
            tier: PlanTier::Basic,
            allotment: Allotment::ZERO,
        };
        assert!(Catalog::new(vec![entry], vec![], 10).is_err());
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        assert!(Catalog::new(vec![], vec![], 0).is_err());
    }
}
