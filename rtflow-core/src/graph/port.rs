//! Ports
//!
//! Inputs and outputs are the typed endpoints through which data flows
//! between nodes. They live in the graph's arena and are addressed by
//! small `Copy` handles:
//!
//! - [`Output<T>`] owns a value cell and a fan-out set of connected inputs.
//! - [`Input<T>`] refers to at most one output (its producer).
//!
//! A handle carries the id of the graph that created it together with a
//! generation-checked key, so a handle from another graph or to a removed
//! port is rejected instead of aliasing some unrelated port.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use smallvec::SmallVec;

use super::node::NodeId;
use super::value::Value;
use super::GraphId;

slotmap::new_key_type! {
    /// Arena key of an input port.
    pub struct InputId;

    /// Arena key of an output port.
    pub struct OutputId;
}

/// Typed handle to an input port carrying values of type `T`.
pub struct Input<T> {
    graph: GraphId,
    id: InputId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Input<T> {
    pub(crate) fn new(graph: GraphId, id: InputId) -> Self {
        Self {
            graph,
            id,
            _marker: PhantomData,
        }
    }

    /// Arena key of this input.
    pub fn id(&self) -> InputId {
        self.id
    }

    pub(crate) fn graph(&self) -> GraphId {
        self.graph
    }
}

/// Typed handle to an output port carrying values of type `T`.
pub struct Output<T> {
    graph: GraphId,
    id: OutputId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Output<T> {
    pub(crate) fn new(graph: GraphId, id: OutputId) -> Self {
        Self {
            graph,
            id,
            _marker: PhantomData,
        }
    }

    /// Arena key of this output.
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub(crate) fn graph(&self) -> GraphId {
        self.graph
    }
}

// Handles are plain keys: copyable and comparable whatever `T` is, so these
// cannot be derived.
macro_rules! handle_impls {
    ($handle:ident) => {
        impl<T> Clone for $handle<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $handle<T> {}

        impl<T> PartialEq for $handle<T> {
            fn eq(&self, other: &Self) -> bool {
                self.graph == other.graph && self.id == other.id
            }
        }

        impl<T> Eq for $handle<T> {}

        impl<T> Hash for $handle<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.graph.hash(state);
                self.id.hash(state);
            }
        }

        impl<T> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("graph", &self.graph)
                    .field("id", &self.id)
                    .field("type", &std::any::type_name::<T>())
                    .finish()
            }
        }
    };
}

handle_impls!(Input);
handle_impls!(Output);

/// Arena entry behind an [`Input`].
#[derive(Debug)]
pub(crate) struct InputEntry {
    /// Node that owns this input.
    pub(crate) node: NodeId,

    pub(crate) type_name: &'static str,

    /// The producer. This is the authoritative side of an edge; the
    /// producer's `consumers` list mirrors it and both are only changed
    /// together by `Graph::link` / `Graph::unlink`.
    pub(crate) source: Option<OutputId>,
}

/// Arena entry behind an [`Output`].
#[derive(Debug)]
pub(crate) struct OutputEntry {
    /// Node that owns this output.
    pub(crate) node: NodeId,

    pub(crate) type_name: &'static str,

    pub(crate) value: Value,

    /// Inputs currently connected to this output (fan-out).
    pub(crate) consumers: SmallVec<[InputId; 4]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::collections::HashSet;

    #[test]
    fn handles_compare_by_graph_and_key() {
        let mut inputs: SlotMap<InputId, ()> = SlotMap::with_key();
        let key = inputs.insert(());

        let a = Input::<f64>::new(GraphId::new(), key);
        let b = a;
        let c = Input::<f64>::new(GraphId::new(), key);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn handles_are_copy_for_non_copy_payloads() {
        let mut outputs: SlotMap<OutputId, ()> = SlotMap::with_key();
        let output = Output::<Vec<String>>::new(GraphId::new(), outputs.insert(()));
        let copy = output;
        assert_eq!(output.id(), copy.id());
    }
}
