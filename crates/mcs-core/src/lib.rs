//! mcs-core: configuration and shared types for the multi-cloud scheduler.

pub mod config;
pub mod types;

pub use config::SchedulerConfig;
pub use types::*;
