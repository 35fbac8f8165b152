//! Output Values
//!
//! Every output owns exactly one value cell. The cell holds an `Option<T>`
//! (defined or undefined) behind a type-erased [`Slot`], allocated once
//! when the output is created so that setting a value in the control loop
//! never allocates.
//!
//! A value may instead *delegate* to another output: reads through it then
//! resolve to the delegate's value. Holding data and delegating are mutually
//! exclusive; the graph clears one whenever it sets the other. The cell
//! also records which outputs delegate *to* it, so those links can be torn
//! down when it goes away.

use std::any::{type_name, Any};

use smallvec::SmallVec;

use super::port::OutputId;
use crate::error::GraphError;

/// Type-erased storage for an output's `Option<T>`.
pub(crate) trait Slot: Any + Send {
    fn is_defined(&self) -> bool;

    /// Make the value undefined.
    fn clear(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> Slot for Option<T> {
    fn is_defined(&self) -> bool {
        self.is_some()
    }

    fn clear(&mut self) {
        *self = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The value cell owned by an output.
pub(crate) struct Value {
    data: Box<dyn Slot>,

    /// Output this value currently reads through, if any.
    delegate: Option<OutputId>,

    /// Outputs whose values delegate to this one.
    delegators: SmallVec<[OutputId; 2]>,
}

impl Value {
    /// Create an undefined, non-delegating cell for values of type `T`.
    pub(crate) fn new<T: Send + 'static>() -> Self {
        Self {
            data: Box::new(None::<T>),
            delegate: None,
            delegators: SmallVec::new(),
        }
    }

    /// Write `value` into the cell. Does not touch delegation.
    pub(crate) fn store<T: Send + 'static>(&mut self, value: T) -> Result<(), GraphError> {
        let slot = self
            .data
            .as_any_mut()
            .downcast_mut::<Option<T>>()
            .ok_or(GraphError::TypeMismatch {
                expected: type_name::<T>(),
            })?;
        *slot = Some(value);
        Ok(())
    }

    /// Read the cell's own data, ignoring delegation.
    pub(crate) fn load<T: 'static>(&self) -> Result<Option<&T>, GraphError> {
        self.data
            .as_any()
            .downcast_ref::<Option<T>>()
            .map(Option::as_ref)
            .ok_or(GraphError::TypeMismatch {
                expected: type_name::<T>(),
            })
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    pub(crate) fn is_defined(&self) -> bool {
        self.data.is_defined()
    }

    pub(crate) fn delegate(&self) -> Option<OutputId> {
        self.delegate
    }

    /// Replace the delegation link, returning the previous one.
    pub(crate) fn replace_delegate(&mut self, delegate: Option<OutputId>) -> Option<OutputId> {
        std::mem::replace(&mut self.delegate, delegate)
    }

    pub(crate) fn delegators(&self) -> &[OutputId] {
        &self.delegators
    }

    pub(crate) fn add_delegator(&mut self, output: OutputId) {
        if !self.delegators.contains(&output) {
            self.delegators.push(output);
        }
    }

    pub(crate) fn remove_delegator(&mut self, output: OutputId) {
        self.delegators.retain(|o| *o != output);
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("defined", &self.is_defined())
            .field("delegate", &self.delegate)
            .field("delegators", &self.delegators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn new_value_is_undefined() {
        let value = Value::new::<f64>();
        assert!(!value.is_defined());
        assert_eq!(value.load::<f64>().unwrap(), None);
    }

    #[test]
    fn store_and_clear() {
        let mut value = Value::new::<f64>();
        value.store(5.0).unwrap();
        assert!(value.is_defined());
        assert_eq!(value.load::<f64>().unwrap(), Some(&5.0));

        value.clear();
        assert!(!value.is_defined());
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut value = Value::new::<f64>();
        assert!(matches!(
            value.store(1_u32),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert!(value.load::<i32>().is_err());
    }

    #[test]
    fn delegators_are_deduplicated() {
        let mut outputs: SlotMap<OutputId, ()> = SlotMap::with_key();
        let a = outputs.insert(());
        let b = outputs.insert(());

        let mut value = Value::new::<f64>();
        value.add_delegator(a);
        value.add_delegator(a);
        value.add_delegator(b);
        assert_eq!(value.delegators(), &[a, b]);

        value.remove_delegator(a);
        assert_eq!(value.delegators(), &[b]);
    }
}
