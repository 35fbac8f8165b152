use std::ops::Mul;

use crate::error::ExecutionError;
use crate::graph::{Graph, Input, Output, UpdateContext};
use crate::system::{System, SystemHandle};

/// Multiplies its input by a gain.
pub struct Gain<T> {
    input: Input<T>,
    output: Output<T>,
    gain: T,
}

impl<T> Gain<T>
where
    T: Copy + Mul<Output = T> + Send + 'static,
{
    pub fn add(graph: &mut Graph, gain: T) -> SystemHandle<Self> {
        graph.add_system(|ports| Self {
            input: ports.input(),
            output: ports.output(),
            gain,
        })
    }

    pub fn input(&self) -> Input<T> {
        self.input
    }

    pub fn output(&self) -> Output<T> {
        self.output
    }

    pub fn gain(&self) -> T {
        self.gain
    }

    pub fn set_gain(&mut self, gain: T) {
        self.gain = gain;
    }
}

impl<T> System for Gain<T>
where
    T: Copy + Mul<Output = T> + Send + 'static,
{
    fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        let value = *cx.get(self.input)?;
        cx.set(self.output, self.gain * value)?;
        Ok(())
    }
}
