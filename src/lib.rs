//! Simulated prosumer site: profile-driven subsystems, a site aggregator, and
//! hierarchical state publishing to a retained-message broker.

pub mod cli;
pub mod config;
pub mod error;
/// Curves, profiles, scheduling, and the site aggregator.
pub mod sim;
pub mod site;
pub mod subsystems;
/// State trees, flattening, and publishing sinks.
pub mod telemetry;
