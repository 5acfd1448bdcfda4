//! Composition root: builds every subsystem and the aggregator from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng};

use crate::config::ProsumerConfig;
use crate::error::{ConfigError, Result};
use crate::sim::aggregator::{InterconnectedSubsystem, Members};
use crate::sim::clock::Clock;
use crate::subsystems::{Subsystem, SubsystemCategory, SubsystemContext};
use crate::telemetry::{PublishReport, StatePublisher, StateSink};

/// Every subsystem of a site, keyed by category and id.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<(SubsystemCategory, String), Arc<Subsystem>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subsystem.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the category already holds the same id.
    pub fn register(&mut self, subsystem: Arc<Subsystem>) -> Result<(), ConfigError> {
        let key = (subsystem.category(), subsystem.id().to_string());
        if self.entries.contains_key(&key) {
            return Err(ConfigError::new(
                format!("{}.id", key.0),
                format!("duplicate id \"{}\"", key.1),
            ));
        }
        self.entries.insert(key, subsystem);
        Ok(())
    }

    pub fn get(&self, category: SubsystemCategory, id: &str) -> Option<&Arc<Subsystem>> {
        self.entries.get(&(category, id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subsystems in `(category, id)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subsystem>> {
        self.entries.values()
    }
}

/// A running (or runnable) prosumer site.
pub struct Site {
    registry: Registry,
    aggregator: Arc<InterconnectedSubsystem>,
    publisher: StatePublisher,
}

impl Site {
    /// Builds all subsystems and the aggregator.
    ///
    /// Profiles are drawn from `settings.seed` when set, otherwise from OS
    /// entropy. Subsystems publish their own state only when
    /// `settings.publish_subsystem_state` is set; the aggregator always does.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, or the first subsystem that fails
    /// to build.
    pub fn from_config(
        cfg: &ProsumerConfig,
        sink: Arc<dyn StateSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if let Some(err) = cfg.validate().into_iter().next() {
            return Err(err.into());
        }

        let settings = &cfg.settings;
        let publisher = StatePublisher::new(sink, settings.short_site_id());
        let ctx = SubsystemContext {
            run_interval: settings.subsystem_interval(),
            clock: Arc::clone(&clock),
            publisher: settings
                .publish_subsystem_state
                .then(|| publisher.clone()),
        };
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut registry = Registry::new();
        let mut members = Members::default();
        for g in &cfg.generations {
            let subsystem = Arc::new(Subsystem::generation(g, &ctx, &mut rng)?);
            registry.register(Arc::clone(&subsystem))?;
            members.generations.push(subsystem);
        }
        for c in &cfg.consumptions {
            let subsystem = Arc::new(Subsystem::consumption(c, &ctx, &mut rng)?);
            registry.register(Arc::clone(&subsystem))?;
            members.consumptions.push(subsystem);
        }
        for s in &cfg.storages {
            let subsystem = Arc::new(Subsystem::storage(s, &ctx)?);
            registry.register(Arc::clone(&subsystem))?;
            members.storages.push(subsystem);
        }

        let aggregator_ctx = SubsystemContext {
            run_interval: settings.aggregator_interval(),
            clock,
            publisher: Some(publisher.clone()),
        };
        let aggregator = Arc::new(InterconnectedSubsystem::new(
            members,
            cfg.reporting(),
            &aggregator_ctx,
        ));

        tracing::info!(
            site = settings.short_site_id(),
            subsystems = registry.len(),
            unit_export_price = aggregator.unit_export_price(),
            "site built"
        );

        Ok(Self {
            registry,
            aggregator,
            publisher,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<InterconnectedSubsystem> {
        &self.aggregator
    }

    pub fn publisher(&self) -> &StatePublisher {
        &self.publisher
    }

    /// Publishes the retained online flag.
    pub async fn announce_online(&self) -> PublishReport {
        self.publisher.announce_online().await
    }

    /// Starts every subsystem, then the aggregator.
    pub fn start(&self) {
        for subsystem in self.registry.iter() {
            subsystem.start();
        }
        self.aggregator.start();
    }

    /// Stops the aggregator first, then every subsystem.
    pub async fn stop(&self) {
        self.aggregator.stop().await;
        for subsystem in self.registry.iter() {
            subsystem.stop().await;
        }
        tracing::info!(site = %self.publisher.prefix(), "site stopped");
    }
}
