//! Dataflow Graph
//!
//! This module implements the graph of systems that an execution manager
//! clocks: the nodes, their typed ports, the connections between them and
//! the value cells that carry data along those connections.
//!
//! # Overview
//!
//! The graph is an arena. Nodes, inputs and outputs live in slot maps and
//! are addressed by generation-checked keys wrapped in typed handles:
//!
//! - An output owns a value cell and the set of inputs connected to it.
//! - An input refers to at most one output (single producer).
//! - A node owns its ports and the boxed [`System`] implementing it.
//!
//! Connections are edges `output -> input`. Each input records its producer
//! and each output mirrors the edge in its consumer list; the two sides are
//! only ever changed together, so removal is "remove the edge" and there
//! are no back-pointers to dangle.
//!
//! # Design Decisions
//!
//! 1. The graph lives behind its execution manager's mutex. Every read,
//!    write and topology change goes through a `&Graph` / `&mut Graph`
//!    obtained from the manager's lock guard.
//!
//! 2. Evaluation is pull-based: a cycle evaluates the always-updated nodes
//!    and each node pulls its producers on demand. A per-node update token
//!    guarantees at most one evaluation per node per cycle, even when a
//!    node is reachable along several paths.
//!
//! 3. Whether a node is clocked ("managed") is derived from the topology:
//!    anything a managed node reads from is managed. The derivation is an
//!    explicit worklist traversal (see `clock.rs`) rerun on every
//!    connection change.
//!
//! 4. Delegation chains and graph cycles are not expected. Delegation
//!    cycles are rejected when created; cyclic connections are not
//!    checked, and a node reached again while it is being evaluated simply
//!    sees its current (previous-cycle) outputs.

mod clock;
mod connect;
mod node;
mod port;
mod update;
mod value;

use std::any::type_name;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::debug;

pub use node::{Membership, NodeId, UpdateToken, UT_NULL};
pub use port::{Input, InputId, Output, OutputId};
pub use update::UpdateContext;

use node::NodeEntry;
use port::{InputEntry, OutputEntry};
use value::Value;

use crate::error::{ExecutionError, GraphError};
use crate::system::{AsAny, PortBuilder, System, SystemHandle};

/// Unique identifier of a graph, carried by every handle it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    /// Generate a new unique graph ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Execution-manager state that is guarded together with the graph.
#[derive(Debug)]
struct Clock {
    /// Control-loop period in seconds.
    period: f64,

    /// Token of the current (or last) cycle.
    token: UpdateToken,

    /// Nodes registered with `start_managing`, in registration order.
    managed: IndexSet<NodeId>,

    /// Managed nodes that run every cycle regardless of pull demand.
    always: IndexSet<NodeId>,

    /// Nodes evaluated in the current cycle, in evaluation order.
    evaluated: Vec<NodeId>,

    /// First error raised in the current cycle. Once set, the rest of the
    /// cycle is skipped.
    fault: Option<ExecutionError>,
}

/// The dataflow graph clocked by one execution manager.
pub struct Graph {
    id: GraphId,
    nodes: SlotMap<NodeId, NodeEntry>,
    inputs: SlotMap<InputId, InputEntry>,
    outputs: SlotMap<OutputId, OutputEntry>,
    clock: Clock,
}

impl Graph {
    /// Create an empty graph clocked at `period` seconds.
    pub(crate) fn new(period: f64) -> Self {
        Self {
            id: GraphId::new(),
            nodes: SlotMap::with_key(),
            inputs: SlotMap::with_key(),
            outputs: SlotMap::with_key(),
            clock: Clock {
                period,
                token: UT_NULL,
                managed: IndexSet::new(),
                always: IndexSet::new(),
                evaluated: Vec::new(),
                fault: None,
            },
        }
    }

    /// This graph's identifier.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Control-loop period in seconds.
    pub fn period(&self) -> f64 {
        self.clock.period
    }

    /// Token of the most recent execution cycle ([`UT_NULL`] before the
    /// first one).
    pub fn token(&self) -> UpdateToken {
        self.clock.token
    }

    /// Total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes evaluated during the most recent cycle, in evaluation order.
    pub fn evaluated(&self) -> &[NodeId] {
        &self.clock.evaluated
    }

    // ------------------------------------------------------------------------
    // Systems
    // ------------------------------------------------------------------------

    /// Add a system to the graph.
    ///
    /// `build` receives a [`PortBuilder`] on which the system declares its
    /// ports. The new node starts unmanaged.
    pub fn add_system<S, F>(&mut self, build: F) -> SystemHandle<S>
    where
        S: System,
        F: FnOnce(&mut PortBuilder<'_>) -> S,
    {
        let node = self.nodes.insert(NodeEntry::new(type_name::<S>()));
        let system = build(&mut PortBuilder::new(self, node));
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.system = Some(Box::new(system));
        }

        // Keep the per-cycle bookkeeping allocation-free.
        let capacity = self.nodes.len();
        self.clock.evaluated.reserve(capacity);

        debug!(?node, system = type_name::<S>(), "added system");
        SystemHandle::new(self.id, node)
    }

    /// Borrow a system by handle.
    pub fn system<S: System>(&self, handle: SystemHandle<S>) -> Result<&S, GraphError> {
        let node = self.check_node(handle.graph(), handle.node())?;
        let system = self
            .nodes
            .get(node)
            .and_then(|entry| entry.system.as_deref())
            .ok_or(GraphError::StaleHandle)?;
        <dyn System as AsAny>::as_any(system)
            .downcast_ref::<S>()
            .ok_or(GraphError::TypeMismatch {
                expected: type_name::<S>(),
            })
    }

    /// Mutably borrow a system by handle, e.g. to change a parameter from
    /// outside the control loop.
    pub fn system_mut<S: System>(&mut self, handle: SystemHandle<S>) -> Result<&mut S, GraphError> {
        let node = self.check_node(handle.graph(), handle.node())?;
        let system = self
            .nodes
            .get_mut(node)
            .and_then(|entry| entry.system.as_deref_mut())
            .ok_or(GraphError::StaleHandle)?;
        <dyn System as AsAny>::as_any_mut(system)
            .downcast_mut::<S>()
            .ok_or(GraphError::TypeMismatch {
                expected: type_name::<S>(),
            })
    }

    /// Remove a system and all of its ports from the graph.
    ///
    /// The node stops being managed, every input is disconnected, every
    /// consumer of every output is disconnected, the outputs stop
    /// delegating and any output delegating to them is undelegated. Handles
    /// to the removed node and its ports become stale.
    pub fn remove_system<S: System>(&mut self, handle: SystemHandle<S>) -> Result<S, GraphError> {
        // Type-check before tearing anything down.
        self.system(handle)?;
        let node = handle.node();

        self.stop_managing(handle)?;

        let (inputs, outputs) = match self.nodes.get(node) {
            Some(entry) => (entry.inputs.clone(), entry.outputs.clone()),
            None => return Err(GraphError::StaleHandle),
        };

        // Outputs first: releasing this node walks upstream through its
        // input edges, which must still be in place.
        for output in outputs {
            self.disconnect_output_id(output)?;
            let delegators: SmallVec<[OutputId; 2]> = self
                .outputs
                .get(output)
                .map(|entry| entry.value.delegators().iter().copied().collect())
                .unwrap_or_default();
            for delegator in delegators {
                self.clear_delegate(delegator);
            }
            self.clear_delegate(output);
            self.outputs.remove(output);
        }

        for input in inputs {
            if self.inputs.get(input).is_some_and(|entry| entry.source.is_some()) {
                self.disconnect_input(input)?;
            }
            self.inputs.remove(input);
        }

        let entry = self.nodes.remove(node).ok_or(GraphError::StaleHandle)?;
        self.clock.managed.shift_remove(&node);
        self.clock.always.shift_remove(&node);
        debug!(?node, system = entry.name(), "removed system");

        let system = entry.system.ok_or(GraphError::StaleHandle)?;
        <dyn System as AsAny>::into_any(system)
            .downcast::<S>()
            .map(|system| *system)
            .map_err(|_| GraphError::TypeMismatch {
                expected: type_name::<S>(),
            })
    }

    pub(crate) fn create_input<T: Send + 'static>(&mut self, node: NodeId) -> Input<T> {
        let id = self.inputs.insert(InputEntry {
            node,
            type_name: type_name::<T>(),
            source: None,
        });
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.inputs.push(id);
        }
        Input::new(self.id, id)
    }

    pub(crate) fn create_output<T: Send + 'static>(&mut self, node: NodeId) -> Output<T> {
        let id = self.outputs.insert(OutputEntry {
            node,
            type_name: type_name::<T>(),
            value: Value::new::<T>(),
            consumers: SmallVec::new(),
        });
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.outputs.push(id);
        }
        Output::new(self.id, id)
    }

    pub(crate) fn mark_update_every_cycle(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.set_update_every_cycle(true);
        }
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    /// Set an output's value. Clears any delegation.
    pub fn set_value<T: Send + 'static>(&mut self, output: Output<T>, value: T) -> Result<(), GraphError> {
        let id = self.check_output(output)?;
        self.clear_delegate(id);
        self.output_entry_mut(id)?.value.store(value)
    }

    /// Make an output's value undefined. Clears any delegation.
    pub fn set_undefined<T>(&mut self, output: Output<T>) -> Result<(), GraphError> {
        let id = self.check_output(output)?;
        self.set_undefined_id(id);
        Ok(())
    }

    /// Read an output's value, following delegation.
    ///
    /// This does not evaluate anything: it returns whatever the last cycle
    /// (or the last `set_value`) left there.
    pub fn value<T: 'static>(&self, output: Output<T>) -> Result<&T, GraphError> {
        let id = self.check_output(output)?;
        self.resolved_value(id)
    }

    /// Whether an output's value, following delegation, is defined.
    pub fn is_defined<T>(&self, output: Output<T>) -> bool {
        self.check_output(output)
            .and_then(|id| self.resolve(id))
            .ok()
            .and_then(|id| self.outputs.get(id))
            .is_some_and(|entry| entry.value.is_defined())
    }

    /// Read the value an input currently sees, without evaluating anything.
    pub fn input_value<T: 'static>(&self, input: Input<T>) -> Result<&T, GraphError> {
        let id = self.check_input(input)?;
        let source = self
            .inputs
            .get(id)
            .and_then(|entry| entry.source)
            .ok_or(GraphError::NotConnected)?;
        self.resolved_value(source)
    }

    /// Make `output` read through `delegate`.
    ///
    /// Any previous delegation is removed and the output's own value
    /// becomes undefined. If the output's node is managed, the delegate's
    /// node becomes managed too. Delegation chains may be arbitrarily long
    /// but must not loop: a delegation that would close a cycle is rejected
    /// with [`GraphError::DelegationCycle`].
    pub fn delegate_to<T>(&mut self, output: Output<T>, delegate: Output<T>) -> Result<(), GraphError> {
        let from = self.check_output(output)?;
        let to = self.check_output(delegate)?;

        let mut cursor = Some(to);
        while let Some(current) = cursor {
            if current == from {
                return Err(GraphError::DelegationCycle);
            }
            cursor = self.outputs.get(current).and_then(|entry| entry.value.delegate());
        }

        self.clear_delegate(from);
        let owner = {
            let entry = self.output_entry_mut(from)?;
            entry.value.clear();
            entry.value.replace_delegate(Some(to));
            entry.node
        };
        let target_owner = {
            let target = self.output_entry_mut(to)?;
            target.value.add_delegator(from);
            target.node
        };

        if self.nodes.get(owner).is_some_and(NodeEntry::is_managed) {
            self.acquire(target_owner);
        }

        debug!(?from, ?to, "delegated output");
        Ok(())
    }

    /// Stop delegating and answer with the output's own (undefined) value.
    /// No effect on an output that is not delegating.
    pub fn undelegate<T>(&mut self, output: Output<T>) -> Result<(), GraphError> {
        let id = self.check_output(output)?;
        self.clear_delegate(id);
        Ok(())
    }

    /// The output `output` currently delegates to, if any.
    pub fn delegate_of<T>(&self, output: Output<T>) -> Option<Output<T>> {
        let id = self.check_output(output).ok()?;
        self.outputs
            .get(id)
            .and_then(|entry| entry.value.delegate())
            .map(|delegate| Output::new(self.id, delegate))
    }

    pub(crate) fn set_undefined_id(&mut self, id: OutputId) {
        self.clear_delegate(id);
        if let Some(entry) = self.outputs.get_mut(id) {
            entry.value.clear();
        }
    }

    /// Drop `from`'s delegation link, if any, and let the former delegate's
    /// node re-derive its membership.
    pub(crate) fn clear_delegate(&mut self, from: OutputId) {
        let Some(to) = self
            .outputs
            .get_mut(from)
            .and_then(|entry| entry.value.replace_delegate(None))
        else {
            return;
        };

        if let Some(target) = self.outputs.get_mut(to) {
            target.value.remove_delegator(from);
            let owner = target.node;
            self.release(owner);
        }
        debug!(?from, ?to, "undelegated output");
    }

    /// Follow the delegation chain from `output` to the output that
    /// actually holds the data.
    fn resolve(&self, mut output: OutputId) -> Result<OutputId, GraphError> {
        for _ in 0..=self.outputs.len() {
            let entry = self.outputs.get(output).ok_or(GraphError::StaleHandle)?;
            match entry.value.delegate() {
                Some(next) => output = next,
                None => return Ok(output),
            }
        }
        Err(GraphError::DelegationCycle)
    }

    fn resolved_value<T: 'static>(&self, output: OutputId) -> Result<&T, GraphError> {
        let terminal = self.resolve(output)?;
        self.outputs
            .get(terminal)
            .ok_or(GraphError::StaleHandle)?
            .value
            .load::<T>()?
            .ok_or(GraphError::ValueUndefined)
    }

    // ------------------------------------------------------------------------
    // Handle validation
    // ------------------------------------------------------------------------

    fn check_node(&self, graph: GraphId, node: NodeId) -> Result<NodeId, GraphError> {
        if graph != self.id {
            return Err(GraphError::ForeignHandle);
        }
        if !self.nodes.contains_key(node) {
            return Err(GraphError::StaleHandle);
        }
        Ok(node)
    }

    fn check_input<T>(&self, input: Input<T>) -> Result<InputId, GraphError> {
        if input.graph() != self.id {
            return Err(GraphError::ForeignHandle);
        }
        if !self.inputs.contains_key(input.id()) {
            return Err(GraphError::StaleHandle);
        }
        Ok(input.id())
    }

    fn check_output<T>(&self, output: Output<T>) -> Result<OutputId, GraphError> {
        if output.graph() != self.id {
            return Err(GraphError::ForeignHandle);
        }
        if !self.outputs.contains_key(output.id()) {
            return Err(GraphError::StaleHandle);
        }
        Ok(output.id())
    }

    fn output_entry_mut(&mut self, id: OutputId) -> Result<&mut OutputEntry, GraphError> {
        self.outputs.get_mut(id).ok_or(GraphError::StaleHandle)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("period", &self.clock.period)
            .field("token", &self.clock.token)
            .field("managed", &self.clock.managed.len())
            .field("always_updated", &self.clock.always.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A system with one input and one output that does nothing.
    pub(crate) struct Passive {
        pub(crate) input: Input<f64>,
        pub(crate) output: Output<f64>,
    }

    impl System for Passive {
        fn operate(&mut self, _cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
            Ok(())
        }
    }

    pub(crate) fn passive(graph: &mut Graph) -> SystemHandle<Passive> {
        graph.add_system(|ports| Passive {
            input: ports.input(),
            output: ports.output(),
        })
    }

    #[test]
    fn add_and_remove_systems() {
        let mut graph = Graph::new(0.002);

        let a = passive(&mut graph);
        let b = passive(&mut graph);
        assert_eq!(graph.node_count(), 2);

        let removed = graph.remove_system(a).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(matches!(graph.system(a), Err(GraphError::StaleHandle)));
        assert!(graph.system(b).is_ok());

        // Ports of a removed system are stale too.
        assert_eq!(
            graph.set_value(removed.output, 1.0),
            Err(GraphError::StaleHandle)
        );
    }

    #[test]
    fn handles_from_other_graphs_are_rejected() {
        let mut first = Graph::new(0.002);
        let mut second = Graph::new(0.002);

        let a = passive(&mut first);
        let b = passive(&mut second);
        let (a_out, b_in) = {
            (first.system(a).unwrap().output, second.system(b).unwrap().input)
        };

        assert_eq!(first.connect(a_out, b_in), Err(GraphError::ForeignHandle));
        assert!(matches!(first.system(b), Err(GraphError::ForeignHandle)));
    }

    #[test]
    fn set_value_and_undefined() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let out = graph.system(a).unwrap().output;

        assert!(!graph.is_defined(out));
        assert_eq!(graph.value(out), Err(GraphError::ValueUndefined));

        graph.set_value(out, 5.0).unwrap();
        assert!(graph.is_defined(out));
        assert_eq!(graph.value(out), Ok(&5.0));

        graph.set_undefined(out).unwrap();
        assert!(!graph.is_defined(out));
    }

    #[test]
    fn delegation_chain_resolves_to_root() {
        let mut graph = Graph::new(0.002);
        let outs: Vec<Output<f64>> = (0..5)
            .map(|_| {
                let node = passive(&mut graph);
                graph.system(node).unwrap().output
            })
            .collect();

        // outs[0] -> outs[1] -> ... -> outs[4]
        for pair in outs.windows(2) {
            graph.delegate_to(pair[0], pair[1]).unwrap();
        }

        graph.set_value(outs[4], 3.5).unwrap();
        assert_eq!(graph.value(outs[0]), Ok(&3.5));

        graph.set_undefined(outs[4]).unwrap();
        assert!(!graph.is_defined(outs[0]));
    }

    #[test]
    fn delegation_cycles_are_rejected() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;

        assert_eq!(graph.delegate_to(a_out, a_out), Err(GraphError::DelegationCycle));

        graph.delegate_to(a_out, b_out).unwrap();
        assert_eq!(graph.delegate_to(b_out, a_out), Err(GraphError::DelegationCycle));
    }

    #[test]
    fn set_value_clears_delegation() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;

        graph.delegate_to(a_out, b_out).unwrap();
        assert_eq!(graph.delegate_of(a_out), Some(b_out));

        graph.set_value(a_out, 1.0).unwrap();
        assert_eq!(graph.delegate_of(a_out), None);
        assert_eq!(graph.value(a_out), Ok(&1.0));
    }

    #[test]
    fn removing_a_delegate_undelegates_its_delegators() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;

        graph.delegate_to(a_out, b_out).unwrap();
        graph.set_value(b_out, 2.0).unwrap();
        assert_eq!(graph.value(a_out), Ok(&2.0));

        graph.remove_system(b).unwrap();
        assert_eq!(graph.delegate_of(a_out), None);
        assert!(!graph.is_defined(a_out));
    }
}
