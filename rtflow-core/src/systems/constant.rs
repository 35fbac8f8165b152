use crate::error::ExecutionError;
use crate::graph::{Graph, Output, UpdateContext};
use crate::system::{System, SystemHandle};

/// Outputs the same value every cycle.
pub struct Constant<T> {
    output: Output<T>,
    value: T,
}

impl<T: Clone + Send + 'static> Constant<T> {
    pub fn add(graph: &mut Graph, value: T) -> SystemHandle<Self> {
        graph.add_system(|ports| Self {
            output: ports.output(),
            value,
        })
    }

    pub fn output(&self) -> Output<T> {
        self.output
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Change the value; it is output from the next cycle on.
    pub fn set_value(&mut self, value: T) {
        self.value = value;
    }
}

impl<T: Clone + Send + 'static> System for Constant<T> {
    fn operate(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), ExecutionError> {
        cx.set(self.output, self.value.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManualExecutionManager;

    #[test]
    fn outputs_its_value_every_cycle() {
        let manager = ManualExecutionManager::new(0.002).unwrap();
        let (constant, out) = {
            let mut graph = manager.lock();
            let constant = Constant::add(&mut graph, 5.0);
            graph.start_managing(constant, true).unwrap();
            (constant, graph.system(constant).unwrap().output())
        };
        assert!(!manager.lock().is_defined(out));

        manager.run_execution_cycle().unwrap();
        assert_eq!(manager.lock().value(out), Ok(&5.0));

        manager.lock().system_mut(constant).unwrap().set_value(-1.5);
        manager.run_execution_cycle().unwrap();
        assert_eq!(manager.lock().value(out), Ok(&-1.5));
    }
}
