//! Execution Manager
//!
//! An execution manager owns a [`Graph`] behind a mutex and clocks it: one
//! call to [`ExecutionManager::run_execution_cycle`] takes a fresh update
//! token and evaluates the always-updated nodes, which pull whatever they
//! read from.
//!
//! The mutex is a type parameter. [`NullMutex`] (the default) is a
//! single-thread lock for managers whose cycles are driven by the caller;
//! the real-time manager uses `parking_lot::RawMutex` so other threads can
//! read and write the graph between ticks.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use parking_lot::lock_api::{GuardNoSend, Mutex, MutexGuard, RawMutex};
use tracing::debug;

use super::config::{validate_period, ExecutionManagerConfig};
use crate::error::{ExecutionError, GraphError, ManagerError};
use crate::graph::Graph;
use crate::system::SystemHandle;

/// A raw mutex for graphs that are only ever touched from one thread.
///
/// It does not synchronize anything; it only tracks whether the graph is
/// borrowed. It is `!Sync`, so a manager using it cannot be shared across
/// threads, and locking it twice panics instead of deadlocking.
pub struct NullMutex {
    locked: Cell<bool>,
}

unsafe impl RawMutex for NullMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: Cell::new(false),
    };

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        assert!(!self.locked.replace(true), "graph is already locked on this thread");
    }

    fn try_lock(&self) -> bool {
        !self.locked.replace(true)
    }

    unsafe fn unlock(&self) {
        self.locked.set(false);
    }

    fn is_locked(&self) -> bool {
        self.locked.get()
    }
}

/// Guard giving access to a manager's graph.
pub type GraphGuard<'a, R> = MutexGuard<'a, R, Graph>;

/// Owns a graph and clocks it.
pub struct ExecutionManager<R: RawMutex = NullMutex> {
    period: f64,
    graph: Arc<Mutex<R, Graph>>,
}

/// An execution manager whose cycles are driven by the caller.
pub type ManualExecutionManager = ExecutionManager<NullMutex>;

impl ExecutionManager {
    /// Create a manual manager with an empty graph.
    pub fn new(period: f64) -> Result<Self, ManagerError> {
        Self::with_raw_mutex(period)
    }

    pub fn from_config(config: &ExecutionManagerConfig) -> Result<Self, ManagerError> {
        config.validate()?;
        Self::with_raw_mutex(config.control_loop_period)
    }
}

impl<R: RawMutex> ExecutionManager<R> {
    /// Create a manager with an empty graph, locked by `R`.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidPeriod`] unless `period` is a
    /// positive, finite number of seconds.
    pub fn with_raw_mutex(period: f64) -> Result<Self, ManagerError> {
        validate_period(period)?;
        debug!(period, "created execution manager");
        Ok(Self {
            period,
            graph: Arc::new(Mutex::new(Graph::new(period))),
        })
    }

    /// Control-loop period in seconds.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Lock the graph.
    ///
    /// Every read, write and topology change goes through the returned
    /// guard. Keep the critical section short: a real-time loop waits for
    /// it before its next tick.
    pub fn lock(&self) -> GraphGuard<'_, R> {
        self.graph.lock()
    }

    /// Lock the graph if no one else holds it.
    pub fn try_lock(&self) -> Option<GraphGuard<'_, R>> {
        self.graph.try_lock()
    }

    /// Run one execution cycle with the graph locked.
    ///
    /// The first error raised by a system aborts the rest of the cycle and
    /// is returned.
    pub fn run_execution_cycle(&self) -> Result<(), ExecutionError> {
        self.graph.lock().run_cycle()
    }

    /// Register `system` as a root. See [`Graph::start_managing`].
    pub fn start_managing<S>(&self, system: SystemHandle<S>, always_update: bool) -> Result<(), GraphError> {
        self.graph.lock().start_managing(system, always_update)
    }

    /// Unregister a root. See [`Graph::stop_managing`].
    pub fn stop_managing<S>(&self, system: SystemHandle<S>) -> Result<(), GraphError> {
        self.graph.lock().stop_managing(system)
    }

    pub(crate) fn shared(&self) -> Arc<Mutex<R, Graph>> {
        Arc::clone(&self.graph)
    }
}

impl<R: RawMutex> fmt::Debug for ExecutionManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("period", &self.period)
            .field("locked", &self.graph.is_locked())
            .finish()
    }
}
