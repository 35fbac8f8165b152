//! Error Taxonomy
//!
//! Three families of errors flow through the engine:
//!
//! - [`GraphError`]: recoverable failures of graph operations (wiring,
//!   reading values, runtime type routing). They never tear down the graph.
//! - [`ExecutionError`]: what a node's `operate()` and an execution cycle
//!   return. [`ExecutionError::Fatal`] is the loop-fatal signal: the
//!   real-time loop cannot safely continue and must enter its faulted state.
//! - [`ManagerError`]: lifecycle failures of the execution managers.

use thiserror::Error;

/// Failures of graph-level operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The handle was created by a different graph.
    #[error("handle belongs to a different graph")]
    ForeignHandle,

    /// The node or port behind the handle has been removed.
    #[error("handle refers to a removed node or port")]
    StaleHandle,

    /// `connect` was called on an input that already has a producer.
    #[error("input is already connected to an output")]
    AlreadyConnected,

    /// The input has no producer.
    #[error("input is not connected to an output")]
    NotConnected,

    /// The resolved value is currently undefined.
    #[error("value is undefined")]
    ValueUndefined,

    /// A value cell did not hold the type its handle promised.
    #[error("value cell does not hold a `{expected}`")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: &'static str,
    },

    /// Delegating would make the delegation chain loop back on itself.
    #[error("delegation would create a cycle")]
    DelegationCycle,

    /// No registered conversion accepts the given output type.
    #[error("no conversion is registered for outputs of type `{type_name}`")]
    NoMatchingConversion {
        /// Type of the output that could not be routed.
        type_name: &'static str,
    },
}

/// Errors raised while executing a cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The loop-fatal signal.
    ///
    /// Raised by collaborators that detect an unrecoverable hardware
    /// condition (e.g. the bus stopped answering). A real-time manager
    /// captures it, records the message and stops.
    #[error("execution manager fault: {0}")]
    Fatal(String),

    /// A graph error surfaced inside `operate()`. This is a logic error in
    /// the node, not a condition the loop recovers from.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ExecutionError {
    /// Build the loop-fatal signal with the given message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether this is the designated "stop the loop" signal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Lifecycle errors of execution managers.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The control-loop period must be a positive, finite number of seconds.
    #[error("invalid control-loop period: {0} s")]
    InvalidPeriod(f64),

    /// `start()` was called while a previous fault is still recorded.
    #[error("cannot start while in an error state ({0}); call clear_error() first")]
    InErrorState(String),

    /// A real-time system call failed on the execution thread.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// The execution thread could not be spawned.
    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The execution thread ended before it reported that it was running.
    #[error("execution thread exited during startup")]
    LoopExited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_convert_into_execution_errors() {
        let err: ExecutionError = GraphError::ValueUndefined.into();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "value is undefined");
    }

    #[test]
    fn fatal_errors_carry_their_message() {
        let err = ExecutionError::fatal("puck 3 stopped answering");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "execution manager fault: puck 3 stopped answering"
        );
    }
}
