//! Systems
//!
//! A [`System`] is a block in a block diagram: it owns some inputs and
//! outputs and, once per execution cycle, turns the values on its inputs
//! into values on its outputs.
//!
//! # The per-cycle contract
//!
//! When the execution manager evaluates a node it first asks
//! [`System::inputs_valid`]. The default implementation pulls every input
//! (evaluating upstream nodes on demand) and answers `true` only if all of
//! them have defined values. If the answer is `true` the manager calls
//! [`System::operate`]; otherwise it calls [`System::invalidate_outputs`],
//! which by default marks every output undefined so the condition cascades
//! downstream.
//!
//! # Construction
//!
//! Systems are created inside a graph through [`Graph::add_system`], which
//! passes a [`PortBuilder`] to the constructor. The constructor declares
//! its ports on the builder and keeps the returned handles as fields:
//!
//! ```rust,ignore
//! struct Doubler {
//!     input: Input<f64>,
//!     output: Output<f64>,
//! }
//!
//! impl System for Doubler {
//!     fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
//!         let x = *cx.get(self.input)?;
//!         cx.set(self.output, 2.0 * x)?;
//!         Ok(())
//!     }
//! }
//!
//! let doubler = graph.add_system(|ports| Doubler {
//!     input: ports.input(),
//!     output: ports.output(),
//! });
//! ```
//!
//! [`Graph::add_system`]: crate::graph::Graph::add_system

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::ExecutionError;
use crate::graph::{Graph, GraphId, Input, NodeId, Output, UpdateContext};

/// Upcast helper so boxed systems can be downcast to their concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A unit of computation with typed ports and a tick contract.
///
/// Implementations must be real-time safe: `operate` runs on the control
/// loop thread with the manager's mutex held.
pub trait System: AsAny + Send {
    /// Update the outputs from the inputs and internal state.
    ///
    /// Return [`ExecutionError::Fatal`] to signal that the control loop
    /// cannot safely continue.
    fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError>;

    /// Gate for [`System::operate`]. Defaults to "every input is defined".
    fn inputs_valid(&mut self, cx: &mut UpdateContext<'_>) -> bool {
        cx.inputs_defined()
    }

    /// Called instead of `operate` when the inputs are not valid.
    /// Defaults to marking every output undefined.
    fn invalidate_outputs(&mut self, cx: &mut UpdateContext<'_>) {
        cx.invalidate_outputs();
    }
}

/// Declares the ports of a system while it is being constructed.
pub struct PortBuilder<'g> {
    graph: &'g mut Graph,
    node: NodeId,
}

impl<'g> PortBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, node: NodeId) -> Self {
        Self { graph, node }
    }

    /// The node being built.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Declare an input carrying values of type `T`.
    pub fn input<T: Send + 'static>(&mut self) -> Input<T> {
        self.graph.create_input(self.node)
    }

    /// Declare an output carrying values of type `T`. Its value starts
    /// undefined.
    pub fn output<T: Send + 'static>(&mut self) -> Output<T> {
        self.graph.create_output(self.node)
    }

    /// Ask for this node to be evaluated every cycle while it is managed,
    /// even when nothing pulls from it (e.g. a device that has to be polled
    /// to keep its watchdog happy).
    pub fn update_every_cycle(&mut self) {
        self.graph.mark_update_every_cycle(self.node);
    }
}

/// Typed handle to a system that was added to a graph.
pub struct SystemHandle<S> {
    graph: GraphId,
    node: NodeId,
    _marker: PhantomData<fn() -> S>,
}

impl<S> SystemHandle<S> {
    pub(crate) fn new(graph: GraphId, node: NodeId) -> Self {
        Self {
            graph,
            node,
            _marker: PhantomData,
        }
    }

    /// The node this system occupies.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn graph(&self) -> GraphId {
        self.graph
    }
}

impl<S> Clone for SystemHandle<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for SystemHandle<S> {}

impl<S> PartialEq for SystemHandle<S> {
    fn eq(&self, other: &Self) -> bool {
        self.graph == other.graph && self.node == other.node
    }
}

impl<S> Eq for SystemHandle<S> {}

impl<S> Hash for SystemHandle<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.graph.hash(state);
        self.node.hash(state);
    }
}

impl<S> fmt::Debug for SystemHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemHandle")
            .field("node", &self.node)
            .field("type", &std::any::type_name::<S>())
            .finish()
    }
}
