use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use rand::Rng;
use tokio::sync::RwLock;

use super::types::{ConsumptionSpec, GenerationSpec, Role, StorageSpec, SubsystemCategory};
use crate::config::{ConsumptionConfig, GenerationConfig, StorageConfig};
use crate::error::{ConfigError, Result, SimError};
use crate::sim::clock::{Clock, secs_since_midnight_of};
use crate::sim::moving_average::MovingAverageTracker;
use crate::sim::profile::{Profile, generate_profile};
use crate::sim::schedule::{Runnable, Schedule};
use crate::telemetry::{StatePublisher, StateTree, StateValue};

/// Fields whose moving averages are tracked on every tick.
pub const TRACKED_FIELDS: [&str; 1] = ["power"];

/// Shared dependencies handed to every subsystem at construction.
#[derive(Clone)]
pub struct SubsystemContext {
    /// Tick interval.
    pub run_interval: Duration,
    /// Source of the tick time.
    pub clock: Arc<dyn Clock>,
    /// Where each tick's state goes; `None` keeps state local.
    pub publisher: Option<StatePublisher>,
}

#[derive(Debug)]
struct Readings {
    power: f64,
    updated_at: Option<DateTime<Local>>,
    averages: MovingAverageTracker,
}

/// An independently scheduled generation, consumption, or storage unit.
///
/// `power` is written only by the subsystem's own tick; everybody else reads
/// it through [`Subsystem::power`].
pub struct Subsystem {
    id: String,
    role: Role,
    profile: Option<Profile>,
    clock: Arc<dyn Clock>,
    publisher: Option<StatePublisher>,
    started_at: OnceLock<DateTime<Local>>,
    readings: RwLock<Readings>,
    schedule: Schedule,
}

impl Subsystem {
    /// Assembles a subsystem from already-built parts.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] if `id` is empty, or if a profile is given
    /// to a storage or missing for a generation/consumption.
    pub fn new(
        id: impl Into<String>,
        role: Role,
        profile: Option<Profile>,
        moving_avg_periods: &[u32],
        ctx: &SubsystemContext,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            let field = format!("{}.id", role.category());
            return Err(ConfigError::new(field, "must not be empty").into());
        }
        if role.profile_multiplier().is_some() != profile.is_some() {
            return Err(ConfigError::new(
                format!("{}.{id}.profile", role.category()),
                "profile must be present exactly for generations and consumptions",
            )
            .into());
        }

        Ok(Self {
            id,
            role,
            profile,
            clock: Arc::clone(&ctx.clock),
            publisher: ctx.publisher.clone(),
            started_at: OnceLock::new(),
            readings: RwLock::new(Readings {
                power: 0.0,
                updated_at: None,
                averages: MovingAverageTracker::new(
                    &TRACKED_FIELDS,
                    moving_avg_periods,
                    ctx.run_interval,
                ),
            }),
            schedule: Schedule::new(ctx.run_interval),
        })
    }

    /// Builds a generation and draws its profile from `rng`.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported profile source, malformed bounds, a
    /// non-positive capacity, or export allowed without a price.
    pub fn generation<R: Rng>(
        cfg: &GenerationConfig,
        ctx: &SubsystemContext,
        rng: &mut R,
    ) -> Result<Self> {
        let spec = GenerationSpec::from_config(cfg)?;
        let profile = generate_profile(&cfg.profile, spec.installed_capacity, rng)?;
        Self::new(
            cfg.id.clone(),
            Role::Generation(spec),
            Some(profile),
            &cfg.moving_avg_periods,
            ctx,
        )
    }

    /// Builds a consumption and draws its profile from `rng`.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported profile source, malformed bounds, or a
    /// non-positive peak demand.
    pub fn consumption<R: Rng>(
        cfg: &ConsumptionConfig,
        ctx: &SubsystemContext,
        rng: &mut R,
    ) -> Result<Self> {
        let spec = ConsumptionSpec::from_config(cfg)?;
        let profile = generate_profile(&cfg.profile, spec.peak_demand, rng)?;
        Self::new(
            cfg.id.clone(),
            Role::Consumption(spec),
            Some(profile),
            &cfg.moving_avg_periods,
            ctx,
        )
    }

    /// Builds a storage unit. Storage ticks do nothing yet.
    ///
    /// # Errors
    ///
    /// Fails if the id is empty.
    pub fn storage(cfg: &StorageConfig, ctx: &SubsystemContext) -> Result<Self> {
        Self::new(cfg.id.clone(), Role::Storage(StorageSpec::from(cfg)), None, &[], ctx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn category(&self) -> SubsystemCategory {
        self.role.category()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Topic root of this subsystem, e.g. `generations/pv-1`.
    pub fn entity_name(&self) -> String {
        format!("{}/{}", self.category(), self.id)
    }

    /// Time of the first start, if any.
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at.get().copied()
    }

    pub fn is_running(&self) -> bool {
        self.schedule.is_running()
    }

    /// Starts ticking. `started_at` is recorded on the first start only.
    ///
    /// Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        self.started_at.get_or_init(|| self.clock.now());
        let started = self.schedule.start(Arc::clone(self));
        if started {
            tracing::info!(entity = %self.entity_name(), "subsystem started");
        }
        started
    }

    /// Stops ticking; no tick runs after this returns.
    ///
    /// Returns `false` if the subsystem was idle.
    pub async fn stop(&self) -> bool {
        let stopped = self.schedule.stop().await;
        if stopped {
            tracing::info!(entity = %self.entity_name(), "subsystem stopped");
        }
        stopped
    }

    /// Latest computed power.
    pub async fn power(&self) -> f64 {
        self.readings.read().await.power
    }

    /// Current moving average of `field` over `period` minutes.
    pub async fn moving_average(&self, field: &str, period: u32) -> Option<f64> {
        self.readings.read().await.averages.average(field, period)
    }

    /// Unit export price of an export-capable generation.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::ExportNotAllowed`] for generations that may not
    /// export and for every other role.
    pub fn export_price(&self) -> Result<f64> {
        match &self.role {
            Role::Generation(g) => g.export.unit_price(),
            _ => None,
        }
        .ok_or_else(|| SimError::ExportNotAllowed {
            id: self.id.clone(),
        })
    }

    /// State exposed to the publisher and the aggregator.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::NotSupported`] for storage.
    pub async fn state_tree(&self) -> Result<StateTree> {
        if let Role::Storage(_) = self.role {
            return Err(SimError::not_supported("storage state"));
        }

        let mut tree = StateTree::new();
        tree.insert("id".into(), self.id.as_str().into());
        {
            let readings = self.readings.read().await;
            tree.insert("power".into(), readings.power.into());
            if let Some(at) = readings.updated_at {
                tree.insert("now".into(), StateValue::timestamp(&at));
            }
            let averages = readings.averages.to_state();
            if !averages.is_empty() {
                tree.insert("moving_avg".into(), averages.into());
            }
        }
        if let Some(at) = self.started_at.get() {
            tree.insert("started_at".into(), StateValue::timestamp(at));
        }

        match &self.role {
            Role::Generation(g) => {
                tree.insert("installed_capacity".into(), g.installed_capacity.into());
                tree.insert("primary_energy".into(), g.primary_energy.as_str().into());
                tree.insert(
                    "conversion_technique".into(),
                    g.conversion_technique.as_str().into(),
                );
                tree.insert("export_allowed".into(), g.export.allowed().into());
                if let Some(price) = g.export.unit_price() {
                    tree.insert("unit_export_price".into(), price.into());
                }
            }
            Role::Consumption(c) => {
                tree.insert("peak_demand".into(), c.peak_demand.into());
            }
            Role::Storage(_) => {}
        }
        Ok(tree)
    }

    /// Computes the power for the current clock time and records it.
    async fn update_power(&self, profile: &Profile) -> f64 {
        let now = self.clock.now();
        let started_at = *self.started_at.get_or_init(|| now);
        let power = profile.power_at(secs_since_midnight_of(started_at, now));

        let mut readings = self.readings.write().await;
        readings.power = power;
        readings.updated_at = Some(now);
        readings.averages.record("power", power);
        power
    }
}

#[async_trait]
impl Runnable for Subsystem {
    fn name(&self) -> String {
        self.entity_name()
    }

    async fn on_run(&self) -> Result<()> {
        let Some(profile) = &self.profile else {
            // Storage: charge/discharge is not modelled yet.
            return Ok(());
        };

        let power = self.update_power(profile).await;
        tracing::trace!(entity = %self.entity_name(), power, "tick");

        if let Some(publisher) = &self.publisher {
            let state = self.state_tree().await?;
            publisher.publish_state(&self.entity_name(), &state).await;
        }
        Ok(())
    }
}
