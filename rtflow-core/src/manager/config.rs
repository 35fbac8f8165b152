//! Execution manager configuration.
//!
//! ```toml
//! control_loop_period = 0.002
//! thread_priority = 50
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Priority of the real-time thread when none is configured.
pub const DEFAULT_THREAD_PRIORITY: i32 = 50;

fn default_thread_priority() -> i32 {
    DEFAULT_THREAD_PRIORITY
}

/// Settings shared by the manual and real-time execution managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionManagerConfig {
    /// Control-loop period in seconds.
    pub control_loop_period: f64,

    /// SCHED_FIFO priority of the real-time thread. Ignored by the manual
    /// manager.
    #[serde(default = "default_thread_priority")]
    pub thread_priority: i32,
}

impl ExecutionManagerConfig {
    pub fn new(control_loop_period: f64) -> Self {
        Self {
            control_loop_period,
            thread_priority: DEFAULT_THREAD_PRIORITY,
        }
    }

    /// Parse and validate a TOML table.
    pub fn from_toml_str(source: &str) -> Result<Self, ManagerError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidPeriod`] unless the period is a
    /// positive, finite number of seconds.
    pub fn validate(&self) -> Result<(), ManagerError> {
        validate_period(self.control_loop_period)
    }
}

pub(crate) fn validate_period(period: f64) -> Result<(), ManagerError> {
    if period.is_finite() && period > 0.0 {
        Ok(())
    } else {
        Err(ManagerError::InvalidPeriod(period))
    }
}
