use crate::error::{ExecutionError, GraphError};
use crate::graph::{Graph, Output, UpdateContext};
use crate::system::{System, SystemHandle};

/// An output whose value is written from outside the control loop.
///
/// The node itself never touches its output: another thread locks the
/// graph, calls [`ExposedOutput::set`] (or delegates the output) and
/// releases the lock. Consumers see the latest value on their next tick.
pub struct ExposedOutput<T> {
    output: Output<T>,
}

impl<T: Send + 'static> ExposedOutput<T> {
    /// Add an exposed output whose value starts undefined.
    pub fn add(graph: &mut Graph) -> SystemHandle<Self> {
        graph.add_system(|ports| Self {
            output: ports.output(),
        })
    }

    pub fn output(&self) -> Output<T> {
        self.output
    }

    /// Set the exposed value.
    pub fn set(graph: &mut Graph, exposed: SystemHandle<Self>, value: T) -> Result<(), GraphError> {
        let output = graph.system(exposed)?.output;
        graph.set_value(output, value)
    }

    /// Make the exposed value undefined.
    pub fn clear(graph: &mut Graph, exposed: SystemHandle<Self>) -> Result<(), GraphError> {
        let output = graph.system(exposed)?.output;
        graph.set_undefined(output)
    }
}

impl<T: Send + 'static> System for ExposedOutput<T> {
    fn operate(&mut self, _cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManualExecutionManager;

    #[test]
    fn value_survives_cycles() {
        let manager = ManualExecutionManager::new(0.002).unwrap();
        let (exposed, out) = {
            let mut graph = manager.lock();
            let exposed = ExposedOutput::add(&mut graph);
            graph.start_managing(exposed, true).unwrap();
            (exposed, graph.system(exposed).unwrap().output())
        };

        ExposedOutput::set(&mut manager.lock(), exposed, 3_i32).unwrap();
        manager.run_execution_cycle().unwrap();
        manager.run_execution_cycle().unwrap();
        assert_eq!(manager.lock().value(out), Ok(&3));

        ExposedOutput::clear(&mut manager.lock(), exposed).unwrap();
        manager.run_execution_cycle().unwrap();
        assert!(!manager.lock().is_defined(out));
    }
}
