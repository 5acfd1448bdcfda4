//! TOML-based site configuration.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

pub use crate::error::ConfigError;
use crate::sim::profile::ProfileSource;
use crate::subsystems::SubsystemCategory;
use crate::telemetry::publisher::short_site_id;

/// Top-level site configuration parsed from TOML.
///
/// Load with [`ProsumerConfig::from_toml_file`] and check with
/// [`ProsumerConfig::validate`] before building a site from it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProsumerConfig {
    /// Broker, site identity, and timing.
    #[serde(default)]
    pub settings: Settings,
    /// Categories whose per-subsystem detail the aggregator publishes.
    #[serde(default)]
    pub subsystem_reporting: Vec<String>,
    #[serde(default)]
    pub generations: Vec<GenerationConfig>,
    #[serde(default)]
    pub consumptions: Vec<ConsumptionConfig>,
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

/// Broker, site identity, and timing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Broker host name.
    pub server: String,
    /// Broker port.
    #[serde(alias = "mqttPort")]
    pub port: u16,
    /// Site address; the token after the last `:` is the short site id.
    #[serde(alias = "vpAddress")]
    pub vp_address: String,
    /// Tick interval of every subsystem (seconds, > 0).
    pub subsystem_interval_secs: u64,
    /// Tick interval of the aggregator (seconds, >= subsystem interval).
    pub aggregator_interval_secs: u64,
    /// Whether subsystems publish their own state each tick.
    pub publish_subsystem_state: bool,
    /// MQTT keep-alive (seconds).
    pub keep_alive_secs: u64,
    /// Fixed seed for profile generation; random when absent.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 1883,
            vp_address: String::new(),
            subsystem_interval_secs: 1,
            aggregator_interval_secs: 5,
            publish_subsystem_state: true,
            keep_alive_secs: 30,
            seed: None,
        }
    }
}

impl Settings {
    pub fn short_site_id(&self) -> &str {
        short_site_id(&self.vp_address)
    }

    pub fn subsystem_interval(&self) -> Duration {
        Duration::from_secs(self.subsystem_interval_secs)
    }

    pub fn aggregator_interval(&self) -> Duration {
        Duration::from_secs(self.aggregator_interval_secs)
    }
}

fn default_can_export() -> bool {
    true
}

/// Generation subsystem parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    pub id: String,
    /// Scales the profile (> 0).
    pub installed_capacity: f64,
    #[serde(default)]
    pub primary_energy: String,
    #[serde(default)]
    pub conversion_technique: String,
    #[serde(default = "default_can_export")]
    pub can_export: bool,
    /// Unit export price; required when `can_export`.
    #[serde(default)]
    pub export_price: Option<f64>,
    /// Moving-average windows in minutes.
    #[serde(default)]
    pub moving_avg_periods: Vec<u32>,
    pub profile: ProfileSource,
}

/// Consumption subsystem parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumptionConfig {
    pub id: String,
    /// Scales the profile (> 0).
    pub peak_demand: f64,
    #[serde(default)]
    pub moving_avg_periods: Vec<u32>,
    pub profile: ProfileSource,
}

/// Storage subsystem parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub id: String,
    #[serde(default)]
    pub technology: String,
    pub max_capacity: f64,
    pub usable_capacity: f64,
    pub max_charge_rate: f64,
    pub max_discharge_rate: f64,
    /// Charge efficiency (0..1.0].
    pub charge_efficiency: f64,
    /// Discharge efficiency (0..1.0].
    pub discharge_efficiency: f64,
}

/// Longest moving-average period, one week of profile.
pub const MAX_AVG_PERIOD_MINUTES: u32 = 7 * 24 * 60;

/// Replaces every `${NAME}` in `text` with `lookup(NAME)`.
///
/// # Errors
///
/// Returns a `ConfigError` for unset variables, empty names, or an
/// unterminated `${`.
///
/// # Examples
///
/// ```
/// use prosumer_sim::config::expand_vars;
///
/// let out = expand_vars("host = \"${HOST}:1883\"", |name| {
///     (name == "HOST").then(|| "broker".to_string())
/// });
/// assert_eq!(out.unwrap(), "host = \"broker:1883\"");
/// ```
pub fn expand_vars(
    text: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ConfigError::new("env", "unterminated \"${\" in configuration")
        })?;
        let name = &after[..end];
        if name.is_empty() {
            return Err(ConfigError::new("env", "empty variable name in \"${}\""));
        }
        let value = lookup(name).ok_or_else(|| {
            ConfigError::new(format!("env.{name}"), "environment variable is not set")
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn expand_strings(
    value: &mut toml::Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    match value {
        toml::Value::String(s) => *s = expand_vars(s, lookup)?,
        toml::Value::Array(items) => {
            for item in items {
                expand_strings(item, lookup)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_strings(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

impl ProsumerConfig {
    /// Parses a configuration from a TOML file, expanding `${VAR}` in string
    /// values.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read, a variable is
    /// unset, or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string, expanding `${VAR}` in string
    /// values from the process environment. Comments and keys are left as is.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is unset or the TOML is invalid.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str_with(s, |name| std::env::var(name).ok())
    }

    /// Like [`ProsumerConfig::from_toml_str`] with a custom variable lookup.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is unset or the TOML is invalid.
    pub fn from_toml_str_with(
        s: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut value: toml::Value =
            toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))?;
        expand_strings(&mut value, &lookup)?;
        value
            .try_into()
            .map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Categories whose detail the aggregator includes. Unknown names are ignored
    /// here and reported by [`ProsumerConfig::validate`].
    pub fn reporting(&self) -> HashSet<SubsystemCategory> {
        self.subsystem_reporting
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.settings;

        if s.server.trim().is_empty() {
            errors.push(ConfigError::new("settings.server", "must not be empty"));
        }
        if s.port == 0 {
            errors.push(ConfigError::new("settings.port", "must be > 0"));
        }
        if s.short_site_id().trim().is_empty() {
            errors.push(ConfigError::new(
                "settings.vp_address",
                "must end in a non-empty site id",
            ));
        }
        if s.subsystem_interval_secs == 0 {
            errors.push(ConfigError::new(
                "settings.subsystem_interval_secs",
                "must be > 0",
            ));
        }
        if s.aggregator_interval_secs < s.subsystem_interval_secs.max(1) {
            errors.push(ConfigError::new(
                "settings.aggregator_interval_secs",
                "must be >= settings.subsystem_interval_secs",
            ));
        }

        for name in &self.subsystem_reporting {
            if name.parse::<SubsystemCategory>().is_err() {
                errors.push(ConfigError::new(
                    "subsystem_reporting",
                    format!(
                        "unknown category \"{name}\", expected one of: \
                         generations, consumptions, storages"
                    ),
                ));
            }
        }

        let mut seen = HashSet::new();
        for (i, g) in self.generations.iter().enumerate() {
            let field = format!("generations[{i}]");
            check_id(&field, &g.id, &mut seen, &mut errors);
            check_positive(
                &format!("{field}.installed_capacity"),
                g.installed_capacity,
                &mut errors,
            );
            if g.can_export {
                match g.export_price {
                    None => errors.push(ConfigError::new(
                        format!("{field}.export_price"),
                        "required when can_export is true",
                    )),
                    Some(p) if !p.is_finite() || p < 0.0 => errors.push(ConfigError::new(
                        format!("{field}.export_price"),
                        "must be a finite number >= 0",
                    )),
                    Some(_) => {}
                }
            }
            check_periods(&field, &g.moving_avg_periods, &mut errors);
            errors.extend(g.profile.check(&format!("{field}.profile")));
        }

        let mut seen = HashSet::new();
        for (i, c) in self.consumptions.iter().enumerate() {
            let field = format!("consumptions[{i}]");
            check_id(&field, &c.id, &mut seen, &mut errors);
            check_positive(&format!("{field}.peak_demand"), c.peak_demand, &mut errors);
            check_periods(&field, &c.moving_avg_periods, &mut errors);
            errors.extend(c.profile.check(&format!("{field}.profile")));
        }

        let mut seen = HashSet::new();
        for (i, st) in self.storages.iter().enumerate() {
            let field = format!("storages[{i}]");
            check_id(&field, &st.id, &mut seen, &mut errors);
            check_positive(&format!("{field}.max_capacity"), st.max_capacity, &mut errors);
            check_positive(&format!("{field}.usable_capacity"), st.usable_capacity, &mut errors);
            check_positive(&format!("{field}.max_charge_rate"), st.max_charge_rate, &mut errors);
            check_positive(
                &format!("{field}.max_discharge_rate"),
                st.max_discharge_rate,
                &mut errors,
            );
            check_efficiency(
                &format!("{field}.charge_efficiency"),
                st.charge_efficiency,
                &mut errors,
            );
            check_efficiency(
                &format!("{field}.discharge_efficiency"),
                st.discharge_efficiency,
                &mut errors,
            );
            if st.usable_capacity > st.max_capacity {
                errors.push(ConfigError::new(
                    format!("{field}.usable_capacity"),
                    "must be <= max_capacity",
                ));
            }
        }

        errors
    }
}

fn check_id(field: &str, id: &str, seen: &mut HashSet<String>, errors: &mut Vec<ConfigError>) {
    if id.trim().is_empty() {
        errors.push(ConfigError::new(format!("{field}.id"), "must not be empty"));
    } else if !seen.insert(id.to_string()) {
        errors.push(ConfigError::new(
            format!("{field}.id"),
            format!("duplicate id \"{id}\""),
        ));
    }
}

fn check_positive(field: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if !(value.is_finite() && value > 0.0) {
        errors.push(ConfigError::new(field, "must be > 0"));
    }
}

fn check_efficiency(field: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(ConfigError::new(field, "must be in (0.0, 1.0]"));
    }
}

fn check_periods(field: &str, periods: &[u32], errors: &mut Vec<ConfigError>) {
    if periods.contains(&0) {
        errors.push(ConfigError::new(
            format!("{field}.moving_avg_periods"),
            "periods must be > 0 minutes",
        ));
    }
    if periods.iter().any(|&p| p > MAX_AVG_PERIOD_MINUTES) {
        errors.push(ConfigError::new(
            format!("{field}.moving_avg_periods"),
            format!("periods must be <= {MAX_AVG_PERIOD_MINUTES} minutes (one week)"),
        ));
    }
}
