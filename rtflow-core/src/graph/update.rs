//! Evaluation
//!
//! One execution cycle is a pull-based traversal of the managed part of the
//! graph:
//!
//! 1. The cycle takes a fresh [`UpdateToken`].
//! 2. Every always-updated node is evaluated. Nothing else is ticked
//!    directly; roots and derived nodes run only when something pulls them.
//! 3. Evaluating a node stamps it with the token and hands its system an
//!    [`UpdateContext`]. Reading an input through the context first
//!    evaluates the producer (and, for delegating outputs, the owners along
//!    the delegation chain).
//!
//! A node already carrying the current token returns immediately, so each
//! node runs at most once per cycle no matter how many paths reach it.
//!
//! The first error raised by any system is recorded and the rest of the
//! cycle is skipped; the cycle then reports that error.

use tracing::trace;

use super::node::{NodeId, UpdateToken};
use super::port::OutputId;
use super::{Graph, Input, Output};
use crate::error::{ExecutionError, GraphError};
use crate::system::System;

/// A node's view of the graph while it is being evaluated.
pub struct UpdateContext<'g> {
    graph: &'g mut Graph,
    node: NodeId,
}

impl<'g> UpdateContext<'g> {
    fn new(graph: &'g mut Graph, node: NodeId) -> Self {
        Self { graph, node }
    }

    /// The node being evaluated.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Token of the running cycle.
    pub fn token(&self) -> UpdateToken {
        self.graph.clock.token
    }

    /// Control-loop period in seconds.
    pub fn period(&self) -> f64 {
        self.graph.clock.period
    }

    /// Read an input, evaluating its producer first if needed.
    ///
    /// Fails with [`GraphError::NotConnected`] if the input has no producer
    /// and [`GraphError::ValueUndefined`] if the producer's value is
    /// undefined.
    pub fn get<T: 'static>(&mut self, input: Input<T>) -> Result<&T, GraphError> {
        let source = self.pull_input(input)?;
        self.graph.resolved_value(source)
    }

    /// Whether an input has a defined value, evaluating its producer first
    /// if needed.
    pub fn value_defined<T>(&mut self, input: Input<T>) -> bool {
        self.pull_input(input)
            .ok()
            .and_then(|source| self.graph.resolve(source).ok())
            .and_then(|terminal| self.graph.outputs.get(terminal))
            .is_some_and(|entry| entry.value.is_defined())
    }

    /// Set an output's value, clearing any delegation.
    pub fn set<T: Send + 'static>(&mut self, output: Output<T>, value: T) -> Result<(), GraphError> {
        self.graph.set_value(output, value)
    }

    /// Make an output's value undefined.
    pub fn set_undefined<T>(&mut self, output: Output<T>) -> Result<(), GraphError> {
        self.graph.set_undefined(output)
    }

    /// Whether every input of the node is connected to a defined value.
    ///
    /// Inputs are pulled in declaration order; the first unconnected or
    /// undefined input ends the check.
    pub fn inputs_defined(&mut self) -> bool {
        let Some(inputs) = self.graph.nodes.get(self.node).map(|entry| entry.inputs.clone()) else {
            return false;
        };
        inputs.into_iter().all(|input| {
            let Some(source) = self.graph.inputs.get(input).and_then(|entry| entry.source) else {
                return false;
            };
            self.graph.pull(source);
            self.graph
                .resolve(source)
                .ok()
                .and_then(|terminal| self.graph.outputs.get(terminal))
                .is_some_and(|entry| entry.value.is_defined())
        })
    }

    /// Mark every output of the node undefined.
    pub fn invalidate_outputs(&mut self) {
        let Some(outputs) = self.graph.nodes.get(self.node).map(|entry| entry.outputs.clone()) else {
            return;
        };
        for output in outputs {
            self.graph.set_undefined_id(output);
        }
    }

    fn pull_input<T>(&mut self, input: Input<T>) -> Result<OutputId, GraphError> {
        let id = self.graph.check_input(input)?;
        let source = self
            .graph
            .inputs
            .get(id)
            .and_then(|entry| entry.source)
            .ok_or(GraphError::NotConnected)?;
        self.graph.pull(source);
        Ok(source)
    }
}

impl Graph {
    /// Bring `output` up to date for the running cycle: evaluate its owner,
    /// then the owners of every output along its delegation chain.
    pub(crate) fn pull(&mut self, output: OutputId) {
        let mut cursor = Some(output);
        for _ in 0..=self.outputs.len() {
            let Some(current) = cursor else {
                return;
            };
            let Some(owner) = self.outputs.get(current).map(|entry| entry.node) else {
                return;
            };
            self.update_node(owner);
            // Read after the update: operate may have changed the link.
            cursor = self.outputs.get(current).and_then(|entry| entry.value.delegate());
        }
    }

    /// Evaluate `node` once for the running cycle.
    pub(crate) fn update_node(&mut self, node: NodeId) {
        if self.clock.fault.is_some() {
            return;
        }
        let token = self.clock.token;
        let Some(entry) = self.nodes.get_mut(node) else {
            return;
        };
        if !entry.is_managed() || !entry.stamp(token) {
            return;
        }
        let Some(mut system) = entry.system.take() else {
            return;
        };
        self.clock.evaluated.push(node);

        let result = evaluate(system.as_mut(), &mut UpdateContext::new(self, node));

        if let Some(entry) = self.nodes.get_mut(node) {
            entry.system = Some(system);
        }
        if let Err(error) = result {
            trace!(?node, %error, "system failed");
            self.clock.fault.get_or_insert(error);
        }
    }

    /// Run one execution cycle.
    pub(crate) fn run_cycle(&mut self) -> Result<(), ExecutionError> {
        self.clock.token += 1;
        self.clock.evaluated.clear();
        self.clock.fault = None;

        // By index: evaluation may shrink the set.
        let mut index = 0;
        while let Some(node) = self.clock.always.get_index(index).copied() {
            self.update_node(node);
            if self.clock.fault.is_some() {
                break;
            }
            index += 1;
        }

        match self.clock.fault.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn evaluate(system: &mut dyn System, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
    let valid = system.inputs_valid(cx);
    if cx.graph.clock.fault.is_some() {
        // An upstream failure ends the cycle; leave the outputs alone.
        return Ok(());
    }
    if valid {
        system.operate(cx)
    } else {
        system.invalidate_outputs(cx);
        Ok(())
    }
}
