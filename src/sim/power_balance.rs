//! Site energy balance and import/export classification.

use std::fmt;

/// Whether the site is net-exporting, net-importing, or balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStatus {
    Export,
    Import,
    SelfSustain,
}

impl SiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SiteStatus::Export => "EXPORT",
            SiteStatus::Import => "IMPORT",
            SiteStatus::SelfSustain => "SELF_SUSTAIN",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Site totals derived from summed generation and consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyBalance {
    pub total_generation: f64,
    pub total_consumption: f64,
    /// Lesser of generation and consumption.
    pub self_consumption: f64,
    /// Generation minus consumption (negative when importing).
    pub net_export: f64,
    pub status: SiteStatus,
}

impl Default for EnergyBalance {
    fn default() -> Self {
        Self::from_totals(0.0, 0.0)
    }
}

impl EnergyBalance {
    /// Computes the balance for the given totals.
    ///
    /// Export is checked before import, so equal totals are `SelfSustain`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prosumer_sim::sim::power_balance::{EnergyBalance, SiteStatus};
    ///
    /// let balance = EnergyBalance::from_totals(10.0, 6.0);
    /// assert_eq!(balance.status, SiteStatus::Export);
    /// assert_eq!(balance.self_consumption, 6.0);
    /// assert_eq!(balance.net_export, 4.0);
    /// ```
    pub fn from_totals(total_generation: f64, total_consumption: f64) -> Self {
        let self_consumption = total_generation.min(total_consumption);
        let status = if self_consumption < total_generation {
            SiteStatus::Export
        } else if self_consumption < total_consumption {
            SiteStatus::Import
        } else {
            SiteStatus::SelfSustain
        };

        Self {
            total_generation,
            total_consumption,
            self_consumption,
            net_export: total_generation - total_consumption,
            status,
        }
    }
}

/// Capacity-weighted mean export price.
///
/// Takes `(installed_capacity, unit_export_price)` for every export-capable
/// generator. Returns `0.0` when there is no export-capable capacity.
///
/// # Examples
///
/// ```
/// use prosumer_sim::sim::power_balance::weighted_export_price;
///
/// let price = weighted_export_price([(3.0, 0.10), (1.0, 0.20)]);
/// assert!((price - 0.125).abs() < 1e-12);
/// assert_eq!(weighted_export_price(Vec::new()), 0.0);
/// ```
pub fn weighted_export_price(generators: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let (weighted, capacity) = generators
        .into_iter()
        .fold((0.0, 0.0), |(weighted, capacity), (cap, price)| {
            (weighted + cap * price, capacity + cap)
        });

    if capacity > 0.0 {
        weighted / capacity
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surplus_generation_exports() {
        let b = EnergyBalance::from_totals(10.0, 6.0);
        assert_eq!(b.status, SiteStatus::Export);
        assert_eq!(b.net_export, 4.0);
        assert_eq!(b.self_consumption, 6.0);
    }

    #[test]
    fn deficit_imports() {
        let b = EnergyBalance::from_totals(4.0, 9.0);
        assert_eq!(b.status, SiteStatus::Import);
        assert_eq!(b.net_export, -5.0);
        assert_eq!(b.self_consumption, 4.0);
    }

    #[test]
    fn equal_totals_self_sustain() {
        let b = EnergyBalance::from_totals(5.0, 5.0);
        assert_eq!(b.status, SiteStatus::SelfSustain);
        assert_eq!(b.net_export, 0.0);
    }

    #[test]
    fn idle_site_self_sustains() {
        assert_eq!(EnergyBalance::default().status, SiteStatus::SelfSustain);
    }

    #[test]
    fn status_strings() {
        assert_eq!(SiteStatus::Export.to_string(), "EXPORT");
        assert_eq!(SiteStatus::Import.to_string(), "IMPORT");
        assert_eq!(SiteStatus::SelfSustain.to_string(), "SELF_SUSTAIN");
    }

    #[test]
    fn weighted_price_uses_capacity() {
        let price = weighted_export_price(vec![(5.0, 0.12), (5.0, 0.08)]);
        assert!((price - 0.10).abs() < 1e-12);
    }

    #[test]
    fn zero_capacity_price_is_zero() {
        assert_eq!(weighted_export_price(vec![(0.0, 0.5)]), 0.0);
    }
}
