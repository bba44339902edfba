//! Runtime values for the interpreter

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::ast::{ClassRef, FnDecl, Type};

/// Shared handle to an object or array
pub type ObjectRef = Rc<Object>;

/// Runtime value
#[derive(Debug, Clone, Default)]
pub enum RuntimeValue {
    /// Slot that was never written
    #[default]
    Empty,
    Nil,
    Int(i64),
    Float(f64),
    String(Rc<str>),
    /// Class instance or array, shared by every holder
    Object(ObjectRef),
    /// Non-owning pointer to a storage slot, never chained
    Ref(Place),
    FunctionPointer(FunctionHandle),
}

impl RuntimeValue {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        RuntimeValue::String(s.into())
    }

    /// Get type name for error messages
    pub fn type_name(&self) -> String {
        match self {
            RuntimeValue::Empty => "<empty>".to_string(),
            RuntimeValue::Nil => "nil".to_string(),
            RuntimeValue::Int(_) => "int".to_string(),
            RuntimeValue::Float(_) => "float".to_string(),
            RuntimeValue::String(_) => "string".to_string(),
            RuntimeValue::Object(obj) => match &obj.class {
                Some(class) => class.name(),
                None => "array".to_string(),
            },
            RuntimeValue::Ref(_) => "reference".to_string(),
            RuntimeValue::FunctionPointer(_) => "function".to_string(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RuntimeValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RuntimeValue::Float(f) => Some(*f),
            RuntimeValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuntimeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert between `int` and `float` when storing into a slot of type `ty`
    pub fn coerce_to(self, ty: &Type) -> Self {
        match (self, ty) {
            (RuntimeValue::Int(n), Type::Float) => RuntimeValue::Float(n as f64),
            (RuntimeValue::Float(f), Type::Int) => RuntimeValue::Int(f as i64),
            (value, _) => value,
        }
    }

    /// `==` semantics: numbers by value, strings by content, everything else by identity
    pub fn equals(&self, other: &RuntimeValue) -> bool {
        use RuntimeValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Int(_) | Float(_), Int(_) | Float(_)) => self.as_float() == other.as_float(),
            (String(a), String(b)) => a == b,
            (Nil, Nil) | (Empty, Empty) => true,
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (FunctionPointer(a), FunctionPointer(b)) => a.same_target(b),
            _ => false,
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Empty => write!(f, "<empty>"),
            RuntimeValue::Nil => write!(f, "nil"),
            RuntimeValue::Int(n) => write!(f, "{n}"),
            RuntimeValue::Float(x) => write!(f, "{x}"),
            RuntimeValue::String(s) => write!(f, "{s}"),
            RuntimeValue::Object(obj) => match &obj.class {
                Some(class) => write!(f, "<{} object>", class.name()),
                None => {
                    write!(f, "[")?;
                    for (i, item) in obj.fields.borrow().iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                    write!(f, "]")
                }
            },
            RuntimeValue::Ref(_) => write!(f, "<reference>"),
            RuntimeValue::FunctionPointer(handle) => match handle.decl.upgrade() {
                Some(decl) => write!(f, "<function {}>", decl.signature()),
                None => write!(f, "<function>"),
            },
        }
    }
}

/// Storage location a `Ref` points at
#[derive(Debug, Clone)]
pub enum Place {
    /// Absolute index into the value stack
    Stack(usize),
    /// Field or element of an object
    Field(Weak<Object>, usize),
}

/// Callable value: a function plus the object it was taken from
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    pub decl: Weak<FnDecl>,
    pub receiver: Option<ObjectRef>,
}

impl FunctionHandle {
    fn same_target(&self, other: &FunctionHandle) -> bool {
        let same_receiver = match (&self.receiver, &other.receiver) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        Weak::ptr_eq(&self.decl, &other.decl) && same_receiver
    }
}

/// Fields of an object whose destructor still has to run
#[derive(Debug)]
pub struct PendingDestructor {
    pub class: ClassRef,
    pub fields: Vec<RuntimeValue>,
}

/// Queue the evaluator drains between statements
pub type DropQueue = Rc<RefCell<VecDeque<PendingDestructor>>>;

/// Reference-counted field vector of a class instance or array
pub struct Object {
    /// `None` for arrays
    pub class: Option<ClassRef>,
    pub fields: RefCell<Vec<RuntimeValue>>,
    /// Present when the class declares a destructor
    finalizer: Option<DropQueue>,
    destroyed: Cell<bool>,
}

impl Object {
    pub fn new(
        class: Option<ClassRef>,
        fields: Vec<RuntimeValue>,
        finalizer: Option<DropQueue>,
    ) -> Self {
        Self {
            class,
            fields: RefCell::new(fields),
            finalizer,
            destroyed: Cell::new(false),
        }
    }

    /// Object handed to a destructor: it will not be queued a second time
    pub fn resurrect(pending: PendingDestructor) -> Self {
        Self {
            class: Some(pending.class),
            fields: RefCell::new(pending.fields),
            finalizer: None,
            destroyed: Cell::new(true),
        }
    }

    /// Destructor has not run yet and will have to
    pub fn needs_destructor(&self) -> bool {
        self.finalizer.is_some() && !self.destroyed.get()
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.set(true);
    }

    pub fn len(&self) -> usize {
        self.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RuntimeValue> {
        self.fields.borrow().get(index).cloned()
    }

    /// Store `value` at `index`; the previous value is dropped after the borrow ends
    pub fn set(&self, index: usize, value: RuntimeValue) -> bool {
        let old = {
            let mut fields = self.fields.borrow_mut();
            match fields.get_mut(index) {
                Some(slot) => std::mem::replace(slot, value),
                None => return false,
            }
        };
        drop(old);
        true
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("fields", &self.fields.borrow().len())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let fields = self.fields.take();
        match (&self.finalizer, &self.class) {
            (Some(queue), Some(class)) if !self.destroyed.get() => {
                queue.borrow_mut().push_back(PendingDestructor { class: class.clone(), fields });
            }
            // children are released here, possibly queueing their own destructors
            _ => drop(fields),
        }
    }
}
