//! Run scheduling.
//!
//! This module provides the per-run monitor loop that dispatches ready tasks
//! and the launcher that starts runs in the background.

mod launcher;
mod monitor;
mod types;

pub use launcher::Launcher;
pub use monitor::RunMonitor;
pub use types::{MonitorConfig, SchedulerError};
