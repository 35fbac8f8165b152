//! Conversion
//!
//! A [`Converter<Out>`] has a single `Output<Out>` and a registry of
//! conversions. Each conversion is an adapter node with an input of some
//! type `In` and an output of type `Out`. Connecting an `Output<In>` to the
//! converter picks the conversion registered for `In`, wires the output
//! into the adapter's input and delegates the converter's output to the
//! adapter's output.
//!
//! The registry is keyed by the `TypeId` of the adapter's input type, so
//! routing is a single map lookup. Registering a second conversion for the
//! same input type replaces the first.

use std::any::{type_name, TypeId};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{ExecutionError, GraphError};
use crate::graph::{Graph, Input, InputId, Output, UpdateContext};
use crate::system::{System, SystemHandle};
use crate::systems::Callback;

/// One registered adapter, with its input type erased.
struct Conversion<Out> {
    input: InputId,
    output: Output<Out>,
    input_type: &'static str,
}

impl<Out> Clone for Conversion<Out> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Out> Copy for Conversion<Out> {}

/// Routes outputs of any registered type into one typed output.
pub struct Converter<Out> {
    output: Output<Out>,
    conversions: IndexMap<TypeId, Conversion<Out>>,
}

impl<Out: Send + 'static> Converter<Out> {
    /// Add a converter without conversions.
    pub fn add(graph: &mut Graph) -> SystemHandle<Self> {
        graph.add_system(|ports| Self {
            output: ports.output(),
            conversions: IndexMap::new(),
        })
    }

    pub fn output(&self) -> Output<Out> {
        self.output
    }

    /// Register an adapter reading `In` from `input` and writing `output`.
    pub fn register<In: 'static>(&mut self, input: Input<In>, output: Output<Out>) {
        self.conversions.insert(
            TypeId::of::<In>(),
            Conversion {
                input: input.id(),
                output,
                input_type: type_name::<In>(),
            },
        );
    }

    /// Whether a conversion from `In` is registered.
    pub fn accepts<In: 'static>(&self) -> bool {
        self.conversions.contains_key(&TypeId::of::<In>())
    }

    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    /// Type names of the registered input types, in registration order.
    pub fn input_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.conversions.values().map(|conversion| conversion.input_type)
    }
}

impl<Out: Send + 'static> System for Converter<Out> {
    // The output is delegated to the selected adapter; nothing to compute.
    fn operate(&mut self, _cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        Ok(())
    }
}

impl<Out: Send + 'static> SystemHandle<Converter<Out>> {
    /// Create a closure-backed adapter node converting `In` with `convert`
    /// and register it.
    pub fn register_fn<In, F>(self, graph: &mut Graph, convert: F) -> Result<SystemHandle<Callback<In, Out>>, GraphError>
    where
        In: Send + 'static,
        F: FnMut(&In) -> Out + Send + 'static,
    {
        let adapter = Callback::add(graph, convert);
        let (input, output) = {
            let adapter = graph.system(adapter)?;
            (adapter.input(), adapter.output())
        };
        graph.system_mut(self)?.register(input, output);
        Ok(adapter)
    }

    /// Feed `output` into the converter.
    ///
    /// Connects it to the adapter registered for `T` (replacing whatever
    /// that adapter was connected to) and delegates the converter's output
    /// to the adapter's output.
    ///
    /// # Errors
    ///
    /// [`GraphError::NoMatchingConversion`] if no adapter accepts `T`, or
    /// the handle error if `output` is foreign or stale. In both cases the
    /// converter keeps its current routing.
    pub fn connect_input_to<T: 'static>(self, graph: &mut Graph, output: Output<T>) -> Result<(), GraphError> {
        let (own, conversion) = {
            let converter = graph.system(self)?;
            let conversion = converter
                .conversions
                .get(&TypeId::of::<T>())
                .copied()
                .ok_or(GraphError::NoMatchingConversion {
                    type_name: type_name::<T>(),
                })?;
            (converter.output, conversion)
        };

        // Connect before delegating: a bad `output` must not reroute.
        let input = Input::new(graph.id(), conversion.input);
        graph.force_connect(output, input)?;
        graph.delegate_to(own, conversion.output)?;
        debug!(input_type = conversion.input_type, "converter routed");
        Ok(())
    }

    /// Stop routing: the converter's output is undelegated and becomes
    /// undefined. The adapter stays connected to its source.
    pub fn disconnect_input(self, graph: &mut Graph) -> Result<(), GraphError> {
        let own = graph.system(self)?.output;
        graph.undelegate(own)
    }
}
