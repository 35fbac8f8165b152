use crate::error::ExecutionError;
use crate::graph::{Graph, Input, Output, UpdateContext};
use crate::system::{System, SystemHandle};

type Transform<In, Out> = Box<dyn FnMut(&In) -> Out + Send>;

/// Applies a closure to its input.
pub struct Callback<In, Out> {
    input: Input<In>,
    output: Output<Out>,
    transform: Transform<In, Out>,
}

impl<In, Out> Callback<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn add<F>(graph: &mut Graph, transform: F) -> SystemHandle<Self>
    where
        F: FnMut(&In) -> Out + Send + 'static,
    {
        graph.add_system(|ports| Self {
            input: ports.input(),
            output: ports.output(),
            transform: Box::new(transform),
        })
    }

    pub fn input(&self) -> Input<In> {
        self.input
    }

    pub fn output(&self) -> Output<Out> {
        self.output
    }
}

impl<In, Out> System for Callback<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        let value = (self.transform)(cx.get(self.input)?);
        cx.set(self.output, value)?;
        Ok(())
    }
}
