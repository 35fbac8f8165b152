//! Real-Time Execution Manager
//!
//! Runs execution cycles on a dedicated periodic thread.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Starting ──▶ Running ──stop()──▶ StopRequested ──▶ Idle
//!                                   │
//!                                   └── loop-fatal error ──▶ Faulted
//! ```
//!
//! `start()` blocks until the thread reports `Running` (or fails its
//! real-time setup). While `Faulted`, `start()` is refused until
//! `clear_error()` is called.
//!
//! # Real-time setup
//!
//! With the `rt` feature on Linux the loop thread locks its memory
//! (`mlockall`) and switches itself to `SCHED_FIFO` at the configured
//! priority before the first tick. Without it those steps are skipped and
//! the loop runs at normal priority.
//!
//! # Faults
//!
//! A cycle that returns [`ExecutionError::Fatal`] stops the loop. The error
//! callback (if any) is invoked with the message from the loop thread, then
//! the message is recorded and the state becomes `Faulted`. Any other error
//! reaching the loop is a bug in a system; the loop thread panics, the
//! loop is marked `Faulted` while it unwinds and `stop()` re-raises the
//! panic on the caller.

use std::panic;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::config::{ExecutionManagerConfig, DEFAULT_THREAD_PRIORITY};
use super::execution::{ExecutionManager, GraphGuard};
use super::stats::CycleStats;
use crate::error::{ExecutionError, ManagerError};
use crate::graph::Graph;

type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
type SharedGraph = Arc<parking_lot::lock_api::Mutex<parking_lot::RawMutex, Graph>>;

/// State of the real-time loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    StopRequested = 3,
    Faulted = 4,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StopRequested,
            4 => Self::Faulted,
            _ => Self::Idle,
        }
    }
}

/// State shared between the manager and its loop thread.
struct LoopShared {
    state: AtomicU8,
    error: Mutex<Option<String>>,
    stats: Mutex<Option<CycleStats>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl LoopShared {
    fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Atomically move from `from` to `to`.
    fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fault(&self, message: String) {
        error!(%message, "execution loop faulted");
        // Called unlocked: the callback may replace or clear itself.
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(&message);
        }
        *self.error.lock() = Some(message);
        self.set_state(LoopState::Faulted);
    }
}

/// An execution manager that ticks its graph from a periodic thread.
pub struct RealTimeExecutionManager {
    manager: ExecutionManager<parking_lot::RawMutex>,
    priority: i32,
    shared: Arc<LoopShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimeExecutionManager {
    /// Create a stopped manager with an empty graph.
    pub fn new(period: f64, priority: i32) -> Result<Self, ManagerError> {
        Ok(Self {
            manager: ExecutionManager::with_raw_mutex(period)?,
            priority,
            shared: Arc::new(LoopShared {
                state: AtomicU8::new(LoopState::Idle as u8),
                error: Mutex::new(None),
                stats: Mutex::new(None),
                on_error: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Create a manager at the default thread priority.
    pub fn with_period(period: f64) -> Result<Self, ManagerError> {
        Self::new(period, DEFAULT_THREAD_PRIORITY)
    }

    pub fn from_config(config: &ExecutionManagerConfig) -> Result<Self, ManagerError> {
        config.validate()?;
        Self::new(config.control_loop_period, config.thread_priority)
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &ExecutionManager<parking_lot::RawMutex> {
        &self.manager
    }

    /// Lock the graph. The loop waits for the guard before its next tick, so
    /// hold it briefly.
    pub fn lock(&self) -> GraphGuard<'_, parking_lot::RawMutex> {
        self.manager.lock()
    }

    /// Control-loop period in seconds.
    pub fn period(&self) -> f64 {
        self.manager.period()
    }

    /// Configured thread priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Whether the loop stopped on a loop-fatal error.
    pub fn has_error(&self) -> bool {
        self.shared.error.lock().is_some()
    }

    /// Message of the loop-fatal error, if any.
    pub fn error_message(&self) -> Option<String> {
        self.shared.error.lock().clone()
    }

    /// Statistics of the last loop run, available once it has exited.
    pub fn last_stats(&self) -> Option<CycleStats> {
        self.shared.stats.lock().clone()
    }

    /// Call `callback` with the message when the loop faults. It runs on
    /// the loop thread.
    pub fn set_error_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.on_error.lock() = Some(Arc::new(callback));
    }

    pub fn clear_error_callback(&self) {
        *self.shared.on_error.lock() = None;
    }

    /// Start the loop thread and wait until it is running.
    ///
    /// Does nothing if the loop is already running.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::InErrorState`] while a fault is recorded.
    /// - [`ManagerError::RtSetup`] if the thread could not lock its memory
    ///   or raise its priority.
    /// - [`ManagerError::Spawn`] if the thread could not be spawned.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut slot = self.thread.lock();

        match self.shared.state() {
            LoopState::Faulted => {
                return Err(ManagerError::InErrorState(self.error_message().unwrap_or_default()));
            }
            LoopState::Running | LoopState::Starting => return Ok(()),
            LoopState::Idle | LoopState::StopRequested => {}
        }
        if let Some(previous) = slot.take() {
            join(previous);
        }

        self.shared.set_state(LoopState::Starting);
        *self.shared.stats.lock() = None;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let looper = Looper {
            graph: self.manager.shared(),
            shared: Arc::clone(&self.shared),
            period: Duration::from_secs_f64(self.manager.period()),
            priority: self.priority,
        };
        let spawned = thread::Builder::new()
            .name("rtflow-exec".into())
            .spawn(move || looper.run(ready_tx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(LoopState::Idle);
                return Err(ManagerError::Spawn(e));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *slot = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                join(handle);
                self.shared.set_state(LoopState::Idle);
                Err(e)
            }
            Err(_) => {
                join(handle);
                self.shared.set_state(LoopState::Idle);
                Err(ManagerError::LoopExited)
            }
        }
    }

    /// Ask the loop to stop and wait for its thread.
    ///
    /// The loop finishes its current tick first. A faulted loop has already
    /// exited; its thread is joined and the fault stays recorded.
    ///
    /// # Panics
    ///
    /// Re-raises a panic of the loop thread. The loop stays `Faulted`.
    pub fn stop(&self) {
        let mut slot = self.thread.lock();
        self.shared.transition(LoopState::Running, LoopState::StopRequested);

        if let Some(handle) = slot.take() {
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }
        }
        self.shared.transition(LoopState::StopRequested, LoopState::Idle);
    }

    /// Forget a recorded fault so the loop can be started again.
    pub fn clear_error(&self) {
        let mut slot = self.thread.lock();
        if let Some(handle) = slot.take() {
            join(handle);
        }
        *self.shared.error.lock() = None;
        self.shared.transition(LoopState::Faulted, LoopState::Idle);
    }
}

impl Drop for RealTimeExecutionManager {
    fn drop(&mut self) {
        self.shared.transition(LoopState::Running, LoopState::StopRequested);
        if let Some(handle) = self.thread.get_mut().take() {
            // Re-raising here could abort the process.
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for RealTimeExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealTimeExecutionManager")
            .field("period", &self.manager.period())
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish()
    }
}

/// Join a loop thread whose panic, if any, is not ours to re-raise.
fn join(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("execution loop thread had panicked");
    }
}

/// Faults the loop if the thread unwinds, so a dead loop never reports
/// `Running`.
struct UnwindGuard<'a> {
    shared: &'a LoopShared,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.fault("execution loop panicked".to_owned());
        }
    }
}

/// Everything the loop thread owns.
struct Looper {
    graph: SharedGraph,
    shared: Arc<LoopShared>,
    period: Duration,
    priority: i32,
}

impl Looper {
    fn run(self, ready: mpsc::SyncSender<Result<(), ManagerError>>) {
        if let Err(e) = rt_setup(self.priority) {
            let _ = ready.send(Err(e));
            return;
        }
        self.shared.set_state(LoopState::Running);
        let _ = ready.send(Ok(()));
        info!(period_us = self.period.as_micros() as u64, priority = self.priority, "execution loop running");

        let _guard = UnwindGuard { shared: &self.shared };
        let mut stats = CycleStats::new(self.period);
        let mut release = Instant::now() + self.period;

        while self.shared.state() == LoopState::Running {
            sleep_until(release);
            if self.shared.state() != LoopState::Running {
                break;
            }

            let start = Instant::now();
            let result = self.graph.lock().run_cycle();
            stats.record(start.elapsed(), start.saturating_duration_since(release));

            match result {
                Ok(()) => {}
                Err(ExecutionError::Fatal(message)) => {
                    self.shared.fault(message);
                    break;
                }
                Err(other) => panic!("unrecoverable error in execution cycle: {other}"),
            }

            release += self.period;
            let now = Instant::now();
            while release <= now {
                release += self.period;
                stats.missed_releases += 1;
            }
        }

        info!(
            period_us = stats.period_ns / 1_000,
            cycles = stats.cycle_count,
            min_us = if stats.cycle_count == 0 { 0 } else { stats.min_cycle_ns / 1_000 },
            avg_us = stats.avg_cycle_ns() / 1_000,
            max_us = stats.max_cycle_ns / 1_000,
            stddev_us = stats.stddev_cycle_ns() / 1_000.0,
            overruns = stats.overruns,
            missed = stats.missed_releases,
            "execution loop exited"
        );
        *self.shared.stats.lock() = Some(stats);
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

// ─── Real-time setup ────────────────────────────────────────────────

/// Lock all current and future memory pages.
#[cfg(all(feature = "rt", target_os = "linux"))]
fn rt_mlockall() -> Result<(), ManagerError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| ManagerError::RtSetup(format!("mlockall failed: {e}")))
}

/// Set SCHED_FIFO with the given priority on the calling thread.
#[cfg(all(feature = "rt", target_os = "linux"))]
fn rt_set_scheduler(priority: i32) -> Result<(), ManagerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param for the duration of the call;
    // pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ManagerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(all(feature = "rt", target_os = "linux"))]
fn rt_setup(priority: i32) -> Result<(), ManagerError> {
    rt_mlockall()?;
    rt_set_scheduler(priority)
}

#[cfg(not(all(feature = "rt", target_os = "linux")))]
fn rt_setup(priority: i32) -> Result<(), ManagerError> {
    warn!(priority, "real-time scheduling unavailable; running at normal priority");
    Ok(())
}
