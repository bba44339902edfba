//! Runtime environment: the value stack and frame bookkeeping
//!
//! Globals occupy the bottom of the stack for the whole session. A call
//! saves the frame pointer, moves it to the stack top and pushes the
//! receiver and arguments; locals follow. Leaving the frame truncates the
//! stack back to the frame pointer.

use super::error::{InterpResult, RuntimeError};
use super::value::{Place, RuntimeValue};

#[derive(Debug, Default)]
pub struct Env {
    stack: Vec<RuntimeValue>,
    fp: usize,
    saved: Vec<usize>,
    /// Value of the most recent expression statement
    pub result: RuntimeValue,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    /// Number of active calls
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn push(&mut self, value: RuntimeValue) {
        self.stack.push(value);
    }

    /// Drop every slot at or above `height`
    pub fn truncate(&mut self, height: usize) {
        self.stack.truncate(height);
    }

    pub fn enter_frame(&mut self) {
        self.saved.push(self.fp);
        self.fp = self.stack.len();
    }

    pub fn leave_frame(&mut self) {
        self.stack.truncate(self.fp);
        self.fp = self.saved.pop().unwrap_or(0);
    }

    /// Forget every frame, keeping slots below `height`
    pub fn unwind_to(&mut self, height: usize) {
        self.stack.truncate(height);
        self.saved.clear();
        self.fp = 0;
    }

    pub fn clear(&mut self) {
        self.unwind_to(0);
        self.result = RuntimeValue::Empty;
    }

    /// Raw slot content, references are not followed
    pub fn slot(&self, index: usize) -> InterpResult<&RuntimeValue> {
        self.stack
            .get(index)
            .ok_or_else(|| RuntimeError::internal(format!("stack slot {index} is out of range")))
    }

    /// Overwrite a slot without following references
    pub fn set_slot(&mut self, index: usize, value: RuntimeValue) -> InterpResult<()> {
        let slot = self
            .stack
            .get_mut(index)
            .ok_or_else(|| RuntimeError::internal(format!("stack slot {index} is out of range")))?;
        let old = std::mem::replace(slot, value);
        drop(old);
        Ok(())
    }

    /// Value stored at `place`
    pub fn load(&self, place: &Place) -> InterpResult<RuntimeValue> {
        match place {
            Place::Stack(index) => self.slot(*index).cloned(),
            Place::Field(object, index) => {
                let object = object.upgrade().ok_or_else(RuntimeError::dangling_reference)?;
                object
                    .get(*index)
                    .ok_or_else(|| RuntimeError::index_out_of_bounds(*index as i64, object.len()))
            }
        }
    }

    /// Write `value` into `place`
    pub fn store(&mut self, place: &Place, value: RuntimeValue) -> InterpResult<()> {
        match place {
            Place::Stack(index) => self.set_slot(*index, value),
            Place::Field(object, index) => {
                let object = object.upgrade().ok_or_else(RuntimeError::dangling_reference)?;
                if object.set(*index, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::index_out_of_bounds(*index as i64, object.len()))
                }
            }
        }
    }

    /// Follow a `Ref` to the value it points at
    pub fn deref(&self, value: RuntimeValue) -> InterpResult<RuntimeValue> {
        match value {
            RuntimeValue::Ref(place) => self.load(&place),
            other => Ok(other),
        }
    }
}
