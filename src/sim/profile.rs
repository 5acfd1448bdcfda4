//! Weekly half-hourly power profiles and the interpolated lookup into them.

use rand::Rng;
use serde::Deserialize;

use super::curve::{Curve, remap};
use crate::error::{ConfigError, Result, SimError};

/// Only supported profile source: uniform draws between per-slot bounds.
pub const RANGE_30M: &str = "range_30m";

/// Seconds covered by one profile slot.
pub const PROFILE_INTERVAL_SECS: f64 = 1800.0;

/// Number of days a generated profile spans.
pub const PROFILE_DAYS: usize = 7;

/// Profile descriptor as found in configuration.
///
/// `r0[i]` and `r1[i]` bound the random draw for slot `i` of each day.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSource {
    pub source: String,
    pub r0: Vec<f64>,
    pub r1: Vec<f64>,
}

impl ProfileSource {
    /// Number of slots per day described by the bounds.
    pub fn slots_per_day(&self) -> usize {
        self.r0.len().min(self.r1.len())
    }

    /// Checks the bound lists without drawing anything.
    ///
    /// `field` is the dotted path used in the returned errors.
    pub fn check(&self, field: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.source != RANGE_30M {
            errors.push(ConfigError::new(
                format!("{field}.source"),
                format!("unsupported source \"{}\", expected \"{RANGE_30M}\"", self.source),
            ));
        }
        if self.r0.is_empty() || self.r1.is_empty() {
            errors.push(ConfigError::new(
                format!("{field}.r0"),
                "r0 and r1 must not be empty",
            ));
        }
        if self.r0.len() != self.r1.len() {
            errors.push(ConfigError::new(
                format!("{field}.r1"),
                format!(
                    "must have the same length as r0 ({} != {})",
                    self.r1.len(),
                    self.r0.len()
                ),
            ));
        }
        if self.r0.iter().chain(&self.r1).any(|b| !b.is_finite()) {
            errors.push(ConfigError::new(
                format!("{field}.r0"),
                "bounds must be finite numbers",
            ));
        }
        errors
    }
}

/// A generated, pre-scaled weekly profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    samples: Vec<f64>,
}

impl Profile {
    /// Wraps already-scaled samples.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `samples` is empty.
    pub fn from_samples(samples: Vec<f64>) -> Result<Self> {
        if samples.is_empty() {
            return Err(ConfigError::new("profile", "profile must contain samples").into());
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interpolated power `elapsed_secs` after the profile's anchor (midnight).
    ///
    /// The slot index wraps at the end of the profile, so the last slot of the
    /// week blends into the first one. Negative offsets are treated as zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use prosumer_sim::sim::profile::Profile;
    ///
    /// let profile = Profile::from_samples(vec![0.0, 10.0]).unwrap();
    /// assert_eq!(profile.power_at(0.0), 0.0);
    /// // Halfway through a rising slot the sine curve is already past the midpoint.
    /// assert!(profile.power_at(900.0) > 5.0);
    /// ```
    pub fn power_at(&self, elapsed_secs: f64) -> f64 {
        let slots = elapsed_secs.max(0.0) / PROFILE_INTERVAL_SECS;
        let len = self.samples.len();
        let lower_idx = (slots.floor() as usize) % len;
        let upper_idx = (lower_idx + 1) % len;
        let fraction = slots.fract();

        let lower = self.samples[lower_idx];
        let upper = self.samples[upper_idx];
        let curve = Curve::between(lower, upper);
        remap(curve.apply(fraction), 0.0, 1.0, lower, upper)
    }
}

/// Generates a seven-day profile from `source`, scaled by `multiplier`.
///
/// For every day, each `(r0[i], r1[i])` pair yields one uniform draw in the
/// closed interval between the two bounds (in either order).
///
/// # Errors
///
/// * [`SimError::UnsupportedProfileSource`] if `source.source` is not `range_30m`
/// * [`SimError::Config`] if the bounds are empty, mismatched, or not finite
pub fn generate_profile<R: Rng>(
    source: &ProfileSource,
    multiplier: f64,
    rng: &mut R,
) -> Result<Profile> {
    if source.source != RANGE_30M {
        return Err(SimError::UnsupportedProfileSource(source.source.clone()));
    }
    if let Some(err) = source.check("profile").into_iter().next() {
        return Err(err.into());
    }

    let mut samples = Vec::with_capacity(PROFILE_DAYS * source.slots_per_day());
    for _ in 0..PROFILE_DAYS {
        for (&r0, &r1) in source.r0.iter().zip(&source.r1) {
            let (lo, hi) = if r0 <= r1 { (r0, r1) } else { (r1, r0) };
            let draw = if lo < hi {
                rng.random_range(lo..=hi)
            } else {
                lo
            };
            samples.push(draw * multiplier);
        }
    }
    Profile::from_samples(samples)
}
