//! Shared test fixtures for integration tests.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use prosumer_sim::config::{
    ConsumptionConfig, GenerationConfig, ProsumerConfig, Settings, StorageConfig,
};
use prosumer_sim::sim::clock::ManualClock;
use prosumer_sim::sim::profile::ProfileSource;

/// Short site id used by [`site_config`].
pub const SITE: &str = "site-1";

/// Topic of a leaf below the site prefix.
pub fn topic(path: &str) -> String {
    format!("prosumers/{SITE}/{path}")
}

/// Topic of a leaf below the aggregator root.
pub fn aggregate_topic(key: &str) -> String {
    topic(&format!("interconnectedsubsystems/0/{key}"))
}

/// Profile bounds that always draw `value` for all 48 slots.
pub fn flat_bounds(value: f64) -> ProfileSource {
    ProfileSource {
        source: "range_30m".to_string(),
        r0: vec![value; 48],
        r1: vec![value; 48],
    }
}

/// A clock frozen at local midnight of a fixed date.
pub fn midnight_clock() -> Arc<ManualClock> {
    let midnight: DateTime<Local> = Local
        .with_ymd_and_hms(2024, 6, 3, 0, 0, 0)
        .single()
        .expect("unambiguous local time");
    Arc::new(ManualClock::new(midnight))
}

/// Site with a 4 kW generator producing 2 kW, a house drawing 1 kW, and a
/// battery. Subsystems tick every second, the aggregator every five.
pub fn site_config() -> ProsumerConfig {
    ProsumerConfig {
        settings: Settings {
            server: "localhost".to_string(),
            port: 1883,
            vp_address: format!("vp:{SITE}"),
            subsystem_interval_secs: 1,
            aggregator_interval_secs: 5,
            publish_subsystem_state: true,
            keep_alive_secs: 30,
            seed: Some(42),
        },
        subsystem_reporting: vec!["generations".to_string()],
        generations: vec![GenerationConfig {
            id: "pv".to_string(),
            installed_capacity: 4.0,
            primary_energy: "solar".to_string(),
            conversion_technique: "photovoltaic".to_string(),
            can_export: true,
            export_price: Some(0.12),
            moving_avg_periods: vec![1],
            profile: flat_bounds(0.5),
        }],
        consumptions: vec![ConsumptionConfig {
            id: "house".to_string(),
            peak_demand: 4.0,
            moving_avg_periods: vec![],
            profile: flat_bounds(0.25),
        }],
        storages: vec![StorageConfig {
            id: "battery".to_string(),
            technology: "li-ion".to_string(),
            max_capacity: 10.0,
            usable_capacity: 9.0,
            max_charge_rate: 5.0,
            max_discharge_rate: 5.0,
            charge_efficiency: 0.95,
            discharge_efficiency: 0.95,
        }],
    }
}
