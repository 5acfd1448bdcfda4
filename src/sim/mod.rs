/// Site aggregator combining all subsystems.
pub mod aggregator;
/// Wall-clock abstraction and midnight anchoring.
pub mod clock;
pub mod curve;
pub mod moving_average;
pub mod power_balance;
/// Weekly half-hourly power profiles.
pub mod profile;
/// Cancellable periodic tasks.
pub mod schedule;
