//! Connections
//!
//! The wiring protocol between outputs and inputs. An output can feed any
//! number of inputs; an input is fed by at most one output.
//!
//! - [`Graph::connect`] fails if the input already has a producer.
//! - [`Graph::disconnect`] fails if it has none.
//! - [`Graph::reconnect`] requires an existing producer and swaps it.
//! - [`Graph::force_connect`] connects or reconnects, whichever applies. It
//!   is the only one that is safe to call unconditionally.
//!
//! Every change also maintains clock ownership: connecting an input whose
//! node is managed makes the producer (and everything upstream of it)
//! managed; disconnecting lets the former producer re-derive its membership
//! from whatever consumers it has left.

use tracing::debug;

use super::port::{InputId, OutputId};
use super::{Graph, Input, Output};
use crate::error::GraphError;

impl Graph {
    /// Connect `output` to `input`.
    pub fn connect<T>(&mut self, output: Output<T>, input: Input<T>) -> Result<(), GraphError> {
        let from = self.check_output(output)?;
        let to = self.check_input(input)?;
        self.connect_ids(from, to)
    }

    /// Disconnect `input` from its producer.
    pub fn disconnect<T>(&mut self, input: Input<T>) -> Result<(), GraphError> {
        let to = self.check_input(input)?;
        self.disconnect_input(to)
    }

    /// Disconnect every input fed by `output`.
    pub fn disconnect_output<T>(&mut self, output: Output<T>) -> Result<(), GraphError> {
        let from = self.check_output(output)?;
        self.disconnect_output_id(from)
    }

    /// Move an already connected `input` over to `new_output`.
    pub fn reconnect<T>(&mut self, new_output: Output<T>, input: Input<T>) -> Result<(), GraphError> {
        let from = self.check_output(new_output)?;
        let to = self.check_input(input)?;
        self.disconnect_input(to)?;
        self.connect_ids(from, to)
    }

    /// Connect `output` to `input`, replacing any current producer.
    pub fn force_connect<T>(&mut self, output: Output<T>, input: Input<T>) -> Result<(), GraphError> {
        let from = self.check_output(output)?;
        let to = self.check_input(input)?;
        if self.source_id(to).is_some() {
            self.disconnect_input(to)?;
        }
        self.connect_ids(from, to)
    }

    /// Whether `input` has a producer.
    pub fn is_connected<T>(&self, input: Input<T>) -> bool {
        self.check_input(input)
            .ok()
            .and_then(|id| self.source_id(id))
            .is_some()
    }

    /// The output currently feeding `input`.
    pub fn source<T>(&self, input: Input<T>) -> Option<Output<T>> {
        let id = self.check_input(input).ok()?;
        self.source_id(id).map(|source| Output::new(self.id, source))
    }

    /// Number of inputs fed by `output`.
    pub fn consumer_count<T>(&self, output: Output<T>) -> usize {
        self.check_output(output)
            .ok()
            .and_then(|id| self.outputs.get(id))
            .map_or(0, |entry| entry.consumers.len())
    }

    /// Whether `output` feeds `input`.
    pub fn feeds<T>(&self, output: Output<T>, input: Input<T>) -> bool {
        match (self.check_output(output), self.check_input(input)) {
            (Ok(from), Ok(to)) => {
                self.source_id(to) == Some(from)
                    && self
                        .outputs
                        .get(from)
                        .is_some_and(|entry| entry.consumers.contains(&to))
            }
            _ => false,
        }
    }

    pub(crate) fn disconnect_input(&mut self, to: InputId) -> Result<(), GraphError> {
        let from = self.unlink(to).ok_or(GraphError::NotConnected)?;
        if let Some(producer) = self.outputs.get(from).map(|entry| entry.node) {
            self.release(producer);
        }
        debug!(?from, ?to, "disconnected");
        Ok(())
    }

    pub(crate) fn disconnect_output_id(&mut self, from: OutputId) -> Result<(), GraphError> {
        let consumers = self
            .outputs
            .get(from)
            .map(|entry| entry.consumers.clone())
            .ok_or(GraphError::StaleHandle)?;
        for to in consumers {
            self.disconnect_input(to)?;
        }
        Ok(())
    }

    fn connect_ids(&mut self, from: OutputId, to: InputId) -> Result<(), GraphError> {
        if self.source_id(to).is_some() {
            return Err(GraphError::AlreadyConnected);
        }
        self.link(from, to);

        // Push the consumer's clock upstream along the new edge.
        let consumer_managed = self
            .inputs
            .get(to)
            .and_then(|entry| self.nodes.get(entry.node))
            .is_some_and(|node| node.is_managed());
        if consumer_managed {
            if let Some(producer) = self.outputs.get(from).map(|entry| entry.node) {
                self.acquire(producer);
            }
        }

        debug!(?from, ?to, "connected");
        Ok(())
    }

    fn source_id(&self, to: InputId) -> Option<OutputId> {
        self.inputs.get(to).and_then(|entry| entry.source)
    }

    /// Record the edge `from -> to` on both sides.
    fn link(&mut self, from: OutputId, to: InputId) {
        if let Some(input) = self.inputs.get_mut(to) {
            input.source = Some(from);
        }
        if let Some(output) = self.outputs.get_mut(from) {
            output.consumers.push(to);
        }
    }

    /// Remove the edge ending at `to` from both sides, returning its
    /// producer.
    fn unlink(&mut self, to: InputId) -> Option<OutputId> {
        let from = self.inputs.get_mut(to)?.source.take()?;
        if let Some(output) = self.outputs.get_mut(from) {
            output.consumers.retain(|consumer| *consumer != to);
        }
        Some(from)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::passive;
    use super::*;

    #[test]
    fn connect_and_disconnect() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_in = graph.system(b).unwrap().input;

        graph.connect(a_out, b_in).unwrap();
        assert!(graph.is_connected(b_in));
        assert!(graph.feeds(a_out, b_in));
        assert_eq!(graph.source(b_in), Some(a_out));
        assert_eq!(graph.consumer_count(a_out), 1);

        graph.disconnect(b_in).unwrap();
        assert!(!graph.is_connected(b_in));
        assert!(!graph.feeds(a_out, b_in));
        assert_eq!(graph.consumer_count(a_out), 0);
    }

    #[test]
    fn second_producer_is_rejected() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let c = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;
        let c_in = graph.system(c).unwrap().input;

        graph.connect(a_out, c_in).unwrap();
        assert_eq!(graph.connect(b_out, c_in), Err(GraphError::AlreadyConnected));
        assert_eq!(graph.source(c_in), Some(a_out));
    }

    #[test]
    fn disconnecting_an_unconnected_input_fails() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let a_in = graph.system(a).unwrap().input;

        assert_eq!(graph.disconnect(a_in), Err(GraphError::NotConnected));
    }

    #[test]
    fn reconnect_requires_a_connection() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let c = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;
        let c_in = graph.system(c).unwrap().input;

        assert_eq!(graph.reconnect(b_out, c_in), Err(GraphError::NotConnected));

        graph.connect(a_out, c_in).unwrap();
        graph.reconnect(b_out, c_in).unwrap();
        assert!(graph.feeds(b_out, c_in));
        assert_eq!(graph.consumer_count(a_out), 0);
    }

    #[test]
    fn force_connect_detaches_the_old_producer() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let b = passive(&mut graph);
        let c = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let b_out = graph.system(b).unwrap().output;
        let c_in = graph.system(c).unwrap().input;

        graph.force_connect(a_out, c_in).unwrap();
        assert!(graph.feeds(a_out, c_in));

        graph.force_connect(b_out, c_in).unwrap();
        assert!(graph.feeds(b_out, c_in));
        assert!(!graph.feeds(a_out, c_in));
        assert_eq!(graph.consumer_count(a_out), 0);
    }

    #[test]
    fn disconnect_output_drops_every_consumer() {
        let mut graph = Graph::new(0.002);
        let a = passive(&mut graph);
        let a_out = graph.system(a).unwrap().output;
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let node = passive(&mut graph);
                let input = graph.system(node).unwrap().input;
                graph.connect(a_out, input).unwrap();
                input
            })
            .collect();
        assert_eq!(graph.consumer_count(a_out), 3);

        graph.disconnect_output(a_out).unwrap();
        assert_eq!(graph.consumer_count(a_out), 0);
        assert!(consumers.iter().all(|input| !graph.is_connected(*input)));
    }
}
