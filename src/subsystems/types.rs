//! Role parameters and categories shared by all subsystems.

use std::fmt;
use std::str::FromStr;

use crate::config::{ConsumptionConfig, GenerationConfig, StorageConfig};
use crate::error::{ConfigError, Result};

/// Collection a subsystem belongs to; also the first topic segment of its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubsystemCategory {
    Generations,
    Consumptions,
    Storages,
}

impl SubsystemCategory {
    pub const ALL: [SubsystemCategory; 3] = [
        SubsystemCategory::Generations,
        SubsystemCategory::Consumptions,
        SubsystemCategory::Storages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubsystemCategory::Generations => "generations",
            SubsystemCategory::Consumptions => "consumptions",
            SubsystemCategory::Storages => "storages",
        }
    }
}

impl fmt::Display for SubsystemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubsystemCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubsystemCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                ConfigError::new("subsystem_reporting", format!("unknown category \"{s}\""))
            })
    }
}

/// Whether a generator may export, and at which unit price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportPolicy {
    allowed: bool,
    unit_price: Option<f64>,
}

impl ExportPolicy {
    /// A policy forbidding export.
    pub fn disabled() -> Self {
        Self {
            allowed: false,
            unit_price: None,
        }
    }

    /// Builds a policy, requiring a price whenever export is allowed.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` on `field` if export is allowed without a price.
    pub fn new(allowed: bool, unit_price: Option<f64>, field: &str) -> Result<Self, ConfigError> {
        if !allowed {
            return Ok(Self::disabled());
        }
        match unit_price {
            Some(price) => Ok(Self {
                allowed,
                unit_price: Some(price),
            }),
            None => Err(ConfigError::new(field, "required when export is allowed")),
        }
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// The unit price, or `None` when export is disabled.
    pub fn unit_price(&self) -> Option<f64> {
        self.unit_price.filter(|_| self.allowed)
    }
}

/// Generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSpec {
    pub installed_capacity: f64,
    pub primary_energy: String,
    pub conversion_technique: String,
    pub export: ExportPolicy,
}

impl GenerationSpec {
    /// # Errors
    ///
    /// Returns a `ConfigError` if the capacity is not positive or export is
    /// allowed without a price.
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self, ConfigError> {
        require_positive(&cfg.id, "installed_capacity", cfg.installed_capacity)?;
        Ok(Self {
            installed_capacity: cfg.installed_capacity,
            primary_energy: cfg.primary_energy.clone(),
            conversion_technique: cfg.conversion_technique.clone(),
            export: ExportPolicy::new(
                cfg.can_export,
                cfg.export_price,
                &format!("generations.{}.export_price", cfg.id),
            )?,
        })
    }
}

/// Consumption parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumptionSpec {
    pub peak_demand: f64,
}

impl ConsumptionSpec {
    /// # Errors
    ///
    /// Returns a `ConfigError` if the peak demand is not positive.
    pub fn from_config(cfg: &ConsumptionConfig) -> Result<Self, ConfigError> {
        require_positive(&cfg.id, "peak_demand", cfg.peak_demand)?;
        Ok(Self {
            peak_demand: cfg.peak_demand,
        })
    }
}

/// Storage parameters. Storage does not yet charge or discharge.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSpec {
    pub technology: String,
    pub max_capacity: f64,
    pub usable_capacity: f64,
    pub max_charge_rate: f64,
    pub max_discharge_rate: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
}

impl From<&StorageConfig> for StorageSpec {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            technology: cfg.technology.clone(),
            max_capacity: cfg.max_capacity,
            usable_capacity: cfg.usable_capacity,
            max_charge_rate: cfg.max_charge_rate,
            max_discharge_rate: cfg.max_discharge_rate,
            charge_efficiency: cfg.charge_efficiency,
            discharge_efficiency: cfg.discharge_efficiency,
        }
    }
}

/// Role-specific part of a subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Generation(GenerationSpec),
    Consumption(ConsumptionSpec),
    Storage(StorageSpec),
}

impl Role {
    pub fn category(&self) -> SubsystemCategory {
        match self {
            Role::Generation(_) => SubsystemCategory::Generations,
            Role::Consumption(_) => SubsystemCategory::Consumptions,
            Role::Storage(_) => SubsystemCategory::Storages,
        }
    }

    /// Factor applied to every profile sample, if the role has a profile.
    pub fn profile_multiplier(&self) -> Option<f64> {
        match self {
            Role::Generation(g) => Some(g.installed_capacity),
            Role::Consumption(c) => Some(c.peak_demand),
            Role::Storage(_) => None,
        }
    }
}

fn require_positive(id: &str, name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::new(format!("{id}.{name}"), "must be > 0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip_through_from_str() {
        for category in SubsystemCategory::ALL {
            assert_eq!(category.as_str().parse::<SubsystemCategory>(), Ok(category));
        }
        assert!("batteries".parse::<SubsystemCategory>().is_err());
    }

    #[test]
    fn export_policy_requires_price_when_allowed() {
        let err = ExportPolicy::new(true, None, "pv.export_price").unwrap_err();
        assert_eq!(err.field, "pv.export_price");

        let policy = ExportPolicy::new(true, Some(0.12), "x").expect("priced policy");
        assert!(policy.allowed());
        assert_eq!(policy.unit_price(), Some(0.12));
    }

    #[test]
    fn disabled_policy_hides_price() {
        let policy = ExportPolicy::new(false, Some(0.3), "x").expect("disabled policy");
        assert!(!policy.allowed());
        assert_eq!(policy.unit_price(), None);
    }

    #[test]
    fn profile_multiplier_by_role() {
        let consumption = Role::Consumption(ConsumptionSpec { peak_demand: 3.5 });
        assert_eq!(consumption.profile_multiplier(), Some(3.5));
        assert_eq!(consumption.category(), SubsystemCategory::Consumptions);
    }
}
