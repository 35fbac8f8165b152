//! Clock Ownership
//!
//! A node is evaluated only while it is *managed*, i.e. while the execution
//! manager is responsible for clocking it. Membership is a reachability
//! property of the topology:
//!
//! - Roots are registered directly with [`Graph::start_managing`].
//! - Any node that a managed node reads from, through an input connection
//!   or through a value delegation, is managed as well ("derived").
//!
//! # Algorithm
//!
//! Membership is maintained incrementally with two worklist traversals:
//!
//! 1. *Acquire* (a node became managed, or a managed node gained an
//!    upstream edge): walk upstream, marking every unmanaged node derived.
//!    Already managed nodes stop the walk.
//!
//! 2. *Release* (an edge into a derived node's consumers went away): the
//!    node re-derives its membership by scanning the consumers of its
//!    outputs and the outputs delegating to them. If none of those belong
//!    to a managed node, it becomes unmanaged and the same check is
//!    repeated for everything upstream of it. Direct nodes are pinned and
//!    stop the walk.
//!
//! Managed nodes flagged "update every cycle" are kept in the manager's
//! always-updated set.

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::node::{Membership, NodeEntry, NodeId};
use super::Graph;
use crate::error::GraphError;
use crate::system::SystemHandle;

type Worklist = SmallVec<[NodeId; 16]>;

impl Graph {
    /// Register a system as a root of the execution manager.
    ///
    /// The node stays managed until `stop_managing`, and everything it
    /// reads from becomes managed. It is only evaluated when something
    /// pulls it, unless `always_update` flags it to be updated every cycle.
    pub fn start_managing<S>(&mut self, system: SystemHandle<S>, always_update: bool) -> Result<(), GraphError> {
        let node = self.check_node(system.graph(), system.node())?;
        let Some(entry) = self.nodes.get_mut(node) else {
            return Err(GraphError::StaleHandle);
        };

        let was_managed = entry.is_managed();
        entry.set_membership(Membership::Direct);
        if always_update {
            entry.set_update_every_cycle(true);
        }
        let every_cycle = entry.updates_every_cycle();
        let name = entry.name();

        self.clock.managed.insert(node);
        if every_cycle {
            self.clock.always.insert(node);
        }

        if !was_managed {
            let mut pending = Worklist::new();
            self.upstream_nodes(node, &mut pending);
            self.acquire_all(pending);
        }

        debug!(?node, system = name, always_update = every_cycle, "started managing");
        Ok(())
    }

    /// Unregister a root.
    ///
    /// The node keeps being managed if something managed still reads from
    /// it; otherwise it, and whatever it alone kept managed upstream, is
    /// released. Has no effect on nodes that are not roots.
    pub fn stop_managing<S>(&mut self, system: SystemHandle<S>) -> Result<(), GraphError> {
        let node = self.check_node(system.graph(), system.node())?;
        let Some(entry) = self.nodes.get_mut(node) else {
            return Err(GraphError::StaleHandle);
        };
        if entry.membership() != Membership::Direct {
            return Ok(());
        }

        entry.set_membership(Membership::Derived);
        self.clock.managed.shift_remove(&node);
        self.release(node);

        debug!(?node, "stopped managing");
        Ok(())
    }

    /// How `system` is clocked.
    pub fn membership<S>(&self, system: SystemHandle<S>) -> Result<Membership, GraphError> {
        let node = self.check_node(system.graph(), system.node())?;
        self.nodes
            .get(node)
            .map(NodeEntry::membership)
            .ok_or(GraphError::StaleHandle)
    }

    /// Whether `system` is clocked by the manager, directly or derived.
    pub fn is_managed<S>(&self, system: SystemHandle<S>) -> bool {
        self.membership(system).is_ok_and(Membership::is_managed)
    }

    /// Whether `system` is a root registered with `start_managing`.
    pub fn is_directly_managed<S>(&self, system: SystemHandle<S>) -> bool {
        self.membership(system) == Ok(Membership::Direct)
    }

    /// Number of roots.
    pub fn managed_count(&self) -> usize {
        self.clock.managed.len()
    }

    /// Number of nodes updated every cycle.
    pub fn always_updated_count(&self) -> usize {
        self.clock.always.len()
    }

    /// Make `node` and everything upstream of it managed.
    pub(crate) fn acquire(&mut self, node: NodeId) {
        self.acquire_all(smallvec![node]);
    }

    fn acquire_all(&mut self, mut pending: Worklist) {
        while let Some(id) = pending.pop() {
            let Some(entry) = self.nodes.get_mut(id) else {
                continue;
            };
            if entry.is_managed() {
                continue;
            }

            entry.set_membership(Membership::Derived);
            if entry.updates_every_cycle() {
                self.clock.always.insert(id);
            }
            debug!(node = ?id, "acquired clock");

            self.upstream_nodes(id, &mut pending);
        }
    }

    /// Re-derive the membership of `node` and, if it lost it, of everything
    /// upstream.
    pub(crate) fn release(&mut self, node: NodeId) {
        let mut pending: Worklist = smallvec![node];
        while let Some(id) = pending.pop() {
            if self.nodes.get(id).map(NodeEntry::membership) != Some(Membership::Derived) {
                continue;
            }
            if self.has_managed_consumer(id) {
                continue;
            }

            if let Some(entry) = self.nodes.get_mut(id) {
                entry.set_membership(Membership::Unmanaged);
            }
            self.clock.always.shift_remove(&id);
            debug!(node = ?id, "released clock");

            self.upstream_nodes(id, &mut pending);
        }
    }

    /// Push the nodes `node` reads from: producers of its inputs and owners
    /// of the outputs its own outputs delegate to.
    fn upstream_nodes(&self, node: NodeId, out: &mut Worklist) {
        let Some(entry) = self.nodes.get(node) else {
            return;
        };

        for input in &entry.inputs {
            let producer = self
                .inputs
                .get(*input)
                .and_then(|input| input.source)
                .and_then(|source| self.outputs.get(source));
            if let Some(producer) = producer {
                out.push(producer.node);
            }
        }

        for output in &entry.outputs {
            let delegate = self
                .outputs
                .get(*output)
                .and_then(|output| output.value.delegate())
                .and_then(|delegate| self.outputs.get(delegate));
            if let Some(delegate) = delegate {
                out.push(delegate.node);
            }
        }
    }

    /// Whether any managed node reads from one of `node`'s outputs.
    fn has_managed_consumer(&self, node: NodeId) -> bool {
        let Some(entry) = self.nodes.get(node) else {
            return false;
        };
        let managed = |owner: NodeId| self.nodes.get(owner).is_some_and(NodeEntry::is_managed);

        entry
            .outputs
            .iter()
            .filter_map(|output| self.outputs.get(*output))
            .any(|output| {
                output
                    .consumers
                    .iter()
                    .filter_map(|input| self.inputs.get(*input))
                    .any(|input| managed(input.node))
                    || output
                        .value
                        .delegators()
                        .iter()
                        .filter_map(|delegator| self.outputs.get(*delegator))
                        .any(|delegator| managed(delegator.node))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{passive, Passive};
    use super::*;

    /// Build a -> b -> c and return the handles.
    fn chain(graph: &mut Graph) -> [SystemHandle<Passive>; 3] {
        let a = passive(graph);
        let b = passive(graph);
        let c = passive(graph);
        let a_out = graph.system(a).unwrap().output;
        let b_in = graph.system(b).unwrap().input;
        let b_out = graph.system(b).unwrap().output;
        let c_in = graph.system(c).unwrap().input;
        graph.connect(a_out, b_in).unwrap();
        graph.connect(b_out, c_in).unwrap();
        [a, b, c]
    }

    #[test]
    fn managing_a_sink_manages_its_upstream() {
        let mut graph = Graph::new(0.002);
        let [a, b, c] = chain(&mut graph);
        assert!(!graph.is_managed(a));

        graph.start_managing(c, false).unwrap();

        assert_eq!(graph.membership(a), Ok(Membership::Derived));
        assert_eq!(graph.membership(b), Ok(Membership::Derived));
        assert_eq!(graph.membership(c), Ok(Membership::Direct));
    }

    #[test]
    fn managing_the_middle_leaves_downstream_unmanaged() {
        let mut graph = Graph::new(0.002);
        let [a, b, c] = chain(&mut graph);

        graph.start_managing(b, false).unwrap();

        assert!(graph.is_managed(a));
        assert!(graph.is_directly_managed(b));
        assert!(!graph.is_managed(c));
    }

    #[test]
    fn stop_managing_releases_the_chain() {
        let mut graph = Graph::new(0.002);
        let [a, b, c] = chain(&mut graph);

        graph.start_managing(c, false).unwrap();
        graph.stop_managing(c).unwrap();

        assert!(!graph.is_managed(a));
        assert!(!graph.is_managed(b));
        assert!(!graph.is_managed(c));
        assert_eq!(graph.managed_count(), 0);
    }

    #[test]
    fn stopped_root_stays_managed_while_read() {
        let mut graph = Graph::new(0.002);
        let [a, b, c] = chain(&mut graph);

        graph.start_managing(c, false).unwrap();
        graph.start_managing(b, false).unwrap();
        graph.stop_managing(b).unwrap();

        assert_eq!(graph.membership(b), Ok(Membership::Derived));
        assert!(graph.is_managed(a));
    }

    #[test]
    fn connecting_to_a_managed_consumer_acquires_the_producer() {
        let mut graph = Graph::new(0.002);
        let sink = passive(&mut graph);
        let source = passive(&mut graph);
        graph.start_managing(sink, false).unwrap();
        assert!(!graph.is_managed(source));

        let out = graph.system(source).unwrap().output;
        let input = graph.system(sink).unwrap().input;
        graph.connect(out, input).unwrap();
        assert!(graph.is_managed(source));

        graph.disconnect(input).unwrap();
        assert!(!graph.is_managed(source));
    }

    #[test]
    fn a_second_path_keeps_the_producer_managed() {
        let mut graph = Graph::new(0.002);
        let source = passive(&mut graph);
        let first = passive(&mut graph);
        let second = passive(&mut graph);
        let out = graph.system(source).unwrap().output;
        let first_in = graph.system(first).unwrap().input;
        let second_in = graph.system(second).unwrap().input;

        graph.connect(out, first_in).unwrap();
        graph.connect(out, second_in).unwrap();
        graph.start_managing(first, false).unwrap();
        graph.start_managing(second, false).unwrap();

        graph.disconnect(first_in).unwrap();
        assert!(graph.is_managed(source));

        graph.disconnect(second_in).unwrap();
        assert!(!graph.is_managed(source));
    }

    #[test]
    fn delegation_carries_the_clock() {
        let mut graph = Graph::new(0.002);
        let front = passive(&mut graph);
        let back = passive(&mut graph);
        let front_out = graph.system(front).unwrap().output;
        let back_out = graph.system(back).unwrap().output;

        graph.start_managing(front, false).unwrap();
        graph.delegate_to(front_out, back_out).unwrap();
        assert!(graph.is_managed(back));

        graph.undelegate(front_out).unwrap();
        assert!(!graph.is_managed(back));
    }

    #[test]
    fn always_updated_nodes_follow_membership() {
        let mut graph = Graph::new(0.002);
        let sink = passive(&mut graph);
        let polled = graph.add_system(|ports| {
            ports.update_every_cycle();
            Passive {
                input: ports.input(),
                output: ports.output(),
            }
        });
        let out = graph.system(polled).unwrap().output;
        let input = graph.system(sink).unwrap().input;
        graph.connect(out, input).unwrap();
        assert_eq!(graph.always_updated_count(), 0);

        graph.start_managing(sink, false).unwrap();
        assert_eq!(graph.always_updated_count(), 1);

        graph.stop_managing(sink).unwrap();
        assert_eq!(graph.always_updated_count(), 0);
    }
}
