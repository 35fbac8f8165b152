use std::ops::{Add, Sub};

use smallvec::SmallVec;

use crate::error::ExecutionError;
use crate::graph::{Graph, Input, Output, UpdateContext};
use crate::system::{System, SystemHandle};

/// Sign applied to one input of a [`Summer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    Positive,
    Negative,
}

impl Polarity {
    /// Parse a polarity string such as `"+-+"`. Any character other than
    /// `-` is positive.
    pub fn parse(signs: &str) -> SmallVec<[Polarity; 4]> {
        signs
            .chars()
            .map(|c| if c == '-' { Self::Negative } else { Self::Positive })
            .collect()
    }
}

/// Adds (or subtracts) its inputs.
///
/// A strict summer's output is undefined as soon as one input is. With
/// `undefined_is_zero` an undefined or unconnected input counts as zero
/// instead.
pub struct Summer<T> {
    inputs: SmallVec<[(Input<T>, Polarity); 4]>,
    output: Output<T>,
    undefined_is_zero: bool,
}

impl<T> Summer<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Send + 'static,
{
    /// Add a strict summer with one input per polarity.
    pub fn add(graph: &mut Graph, polarity: &[Polarity]) -> SystemHandle<Self> {
        Self::add_with(graph, polarity, false)
    }

    pub fn add_with(graph: &mut Graph, polarity: &[Polarity], undefined_is_zero: bool) -> SystemHandle<Self> {
        graph.add_system(|ports| Self {
            inputs: polarity.iter().map(|sign| (ports.input(), *sign)).collect(),
            output: ports.output(),
            undefined_is_zero,
        })
    }

    pub fn input(&self, index: usize) -> Option<Input<T>> {
        self.inputs.get(index).map(|(input, _)| *input)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output(&self) -> Output<T> {
        self.output
    }
}

impl<T> System for Summer<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Send + 'static,
{
    fn inputs_valid(&mut self, cx: &mut UpdateContext<'_>) -> bool {
        self.undefined_is_zero || cx.inputs_defined()
    }

    fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        let mut sum = T::default();
        for (input, polarity) in &self.inputs {
            if !cx.value_defined(*input) {
                continue;
            }
            let value = *cx.get(*input)?;
            sum = match polarity {
                Polarity::Positive => sum + value,
                Polarity::Negative => sum - value,
            };
        }
        cx.set(self.output, sum)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManualExecutionManager;
    use crate::systems::ExposedOutput;

    fn setup(undefined_is_zero: bool) -> (ManualExecutionManager, [SystemHandle<ExposedOutput<f64>>; 3], Output<f64>) {
        let manager = ManualExecutionManager::new(0.002).unwrap();
        let (sources, out) = {
            let mut graph = manager.lock();
            let summer = Summer::<f64>::add_with(&mut graph, &Polarity::parse("+-+"), undefined_is_zero);
            let sources = [(); 3].map(|_| ExposedOutput::<f64>::add(&mut graph));
            for (index, source) in sources.iter().enumerate() {
                let from = graph.system(*source).unwrap().output();
                let to = graph.system(summer).unwrap().input(index).unwrap();
                graph.connect(from, to).unwrap();
            }
            graph.start_managing(summer, true).unwrap();
            (sources, graph.system(summer).unwrap().output())
        };
        (manager, sources, out)
    }

    #[test]
    fn applies_polarity() {
        let (manager, sources, out) = setup(false);
        for (source, value) in sources.iter().zip([1.0, 2.0, 4.0]) {
            ExposedOutput::set(&mut manager.lock(), *source, value).unwrap();
        }

        manager.run_execution_cycle().unwrap();
        assert_eq!(manager.lock().value(out), Ok(&3.0));
    }

    #[test]
    fn strict_summer_needs_every_input() {
        let (manager, sources, out) = setup(false);
        ExposedOutput::set(&mut manager.lock(), sources[0], 1.0).unwrap();

        manager.run_execution_cycle().unwrap();
        assert!(!manager.lock().is_defined(out));
    }

    #[test]
    fn undefined_counts_as_zero_when_asked() {
        let (manager, sources, out) = setup(true);
        ExposedOutput::set(&mut manager.lock(), sources[1], 2.5).unwrap();

        manager.run_execution_cycle().unwrap();
        assert_eq!(manager.lock().value(out), Ok(&-2.5));
    }

    #[test]
    fn parse_polarity() {
        assert_eq!(
            Polarity::parse("+-x").as_slice(),
            &[Polarity::Positive, Polarity::Negative, Polarity::Positive]
        );
    }
}
