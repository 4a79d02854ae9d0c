//! Cycle-driven activity engine: activity definitions, the bursty rate
//! limiter, metrics, drivers, and the scenario layer that controls running
//! activities.

pub mod activity;
pub mod drivers;
pub mod metrics;
pub mod ratelimit;
pub mod scenario;

pub use cyclebench_config::adjust_timeout;
