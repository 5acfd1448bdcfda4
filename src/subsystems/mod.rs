//! Generation, consumption, and storage subsystems.

pub mod subsystem;
pub mod types;

pub use subsystem::{Subsystem, SubsystemContext};
pub use types::{
    ConsumptionSpec, ExportPolicy, GenerationSpec, Role, StorageSpec, SubsystemCategory,
};
