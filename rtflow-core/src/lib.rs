//! RTFlow Core
//!
//! This crate provides the dataflow engine underneath a real-time control
//! loop. It implements:
//!
//! - A graph of computation nodes ("systems") connected by typed ports
//! - Pull-based, at-most-once-per-cycle evaluation
//! - Clock ownership derived from the graph topology
//! - Manual and real-time (periodic thread) execution managers
//! - Run-time type routing of outputs into typed inputs
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the arena of nodes and ports, connections, value delegation
//!   and the per-cycle update protocol
//! - `system`: the [`System`] trait implemented by every node
//! - `manager`: execution managers that own a graph behind a mutex and
//!   clock it
//! - `conversion`: the [`Converter`] node
//! - `systems`: stock nodes (constants, gains, summers, callbacks)
//!
//! # Example
//!
//! ```rust,ignore
//! use rtflow_core::systems::{Constant, Gain};
//! use rtflow_core::ManualExecutionManager;
//!
//! let manager = ManualExecutionManager::new(0.002)?;
//! let out = {
//!     let mut graph = manager.lock();
//!     let source = Constant::add(&mut graph, 5.0);
//!     let gain = Gain::add(&mut graph, 2.0);
//!     let (source_out, gain_in, gain_out) = (
//!         graph.system(source)?.output(),
//!         graph.system(gain)?.input(),
//!         graph.system(gain)?.output(),
//!     );
//!     graph.connect(source_out, gain_in)?;
//!     graph.start_managing(gain, true)?;
//!     gain_out
//! };
//!
//! manager.run_execution_cycle()?;
//! assert_eq!(*manager.lock().value(out)?, 10.0);
//! ```

pub mod conversion;
pub mod error;
pub mod graph;
pub mod manager;
pub mod system;
pub mod systems;

pub use conversion::Converter;
pub use error::{ExecutionError, GraphError, ManagerError};
pub use graph::{Graph, Input, Membership, NodeId, Output, UpdateContext, UpdateToken};
pub use manager::{
    CycleStats, ExecutionManager, ExecutionManagerConfig, LoopState, ManualExecutionManager, NullMutex,
    RealTimeExecutionManager,
};
pub use system::{PortBuilder, System, SystemHandle};
