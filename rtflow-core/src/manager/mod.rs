//! Execution Managers
//!
//! - [`ExecutionManager`] / [`ManualExecutionManager`]: cycles are run by
//!   the caller.
//! - [`RealTimeExecutionManager`]: cycles are run by a periodic thread.

mod config;
mod execution;
mod realtime;
mod stats;

pub use config::{ExecutionManagerConfig, DEFAULT_THREAD_PRIORITY};
pub use execution::{ExecutionManager, GraphGuard, ManualExecutionManager, NullMutex};
pub use realtime::{LoopState, RealTimeExecutionManager};
pub use stats::CycleStats;
