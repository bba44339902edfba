//! Tree-walking evaluator
//!
//! Statements return a [`Flow`] signal; faults propagate as
//! [`RuntimeError`]. L-value expressions evaluate to `Ref` values pointing at
//! their slot, everything else to plain values.
//!
//! Objects whose class declares a destructor hand their fields to the drop
//! queue when the last holder lets go. The queue is drained right after an
//! assignment overwrites a slot and after every statement and every frame or
//! block unwind, running the destructor as an ordinary call on a resurrected
//! receiver.

use std::rc::{Rc, Weak};

use crate::ast::*;

use super::env::Env;
use super::error::{InterpResult, RuntimeError};
use super::native::{NativeArgs, Natives};
use super::value::{DropQueue, FunctionHandle, Object, ObjectRef, Place, RuntimeValue};

/// Default bound on nested calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Default bound on the elements of one array, over all of its dimensions
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1 << 24;

/// Stack growth parameters for deep recursion
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Heap registry size below which dead entries are not pruned
const HEAP_PRUNE_MIN: usize = 1024;

/// Destructor sweeps `clear()` runs before giving up on objects created by destructors
const CLEAR_PASSES: usize = 16;

/// Control signal of an executed statement
#[derive(Debug)]
pub enum Flow {
    Normal,
    Break,
    Return(RuntimeValue),
}

/// The interpreter
pub struct Interpreter {
    env: Env,
    natives: Natives,
    drops: DropQueue,
    draining: bool,
    /// Every allocated object, for the teardown sweep
    heap: Vec<Weak<Object>>,
    prune_at: usize,
    /// Objects produced by the current statement that places still point into
    temporaries: Vec<ObjectRef>,
    depth: usize,
    max_depth: usize,
    max_array_len: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

impl Interpreter {
    pub fn new(max_depth: usize) -> Self {
        Self {
            env: Env::new(),
            natives: Natives::new(),
            drops: DropQueue::default(),
            draining: false,
            heap: Vec::new(),
            prune_at: HEAP_PRUNE_MIN,
            temporaries: Vec::new(),
            depth: 0,
            max_depth,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }

    pub fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    pub fn natives(&self) -> &Natives {
        &self.natives
    }

    pub fn natives_mut(&mut self) -> &mut Natives {
        &mut self.natives
    }

    /// Value of the most recent expression statement
    pub fn result(&self) -> &RuntimeValue {
        &self.env.result
    }

    pub fn stack_height(&self) -> usize {
        self.env.len()
    }

    /// Objects that are still alive
    pub fn live_objects(&self) -> usize {
        self.heap.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Current value of a global, `None` if its declaration has not run
    pub fn global_value(&self, decl: &VarDecl) -> Option<RuntimeValue> {
        let index = decl.runtime_index.get()?;
        let value = self.env.deref(self.env.slot(index).ok()?.clone()).ok()?;
        match value {
            RuntimeValue::Empty => None,
            value => Some(value),
        }
    }

    /// Execute every unit in order; the result register starts out empty
    pub fn run(&mut self, units: &[Program]) -> InterpResult<()> {
        self.env.result = RuntimeValue::Empty;
        for unit in units {
            for stmt in &unit.stmts {
                match self.exec_stmt(stmt).map_err(|e| e.at(stmt.span()))? {
                    Flow::Normal => {}
                    Flow::Break | Flow::Return(_) => {
                        return Err(RuntimeError::internal("control flow escaped to global scope")
                            .at(stmt.span()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop every slot at or above `height` and forget all frames
    pub fn unwind_to(&mut self, height: usize) {
        self.temporaries.clear();
        self.env.unwind_to(height);
        self.depth = 0;
        self.draining = false;
        if let Err(e) = self.drain_drops() {
            tracing::warn!(error = %e, "destructor failed while unwinding");
        }
    }

    /// Release everything: run pending destructors once, then break reference cycles
    pub fn clear(&mut self) {
        self.unwind_to(0);
        for _ in 0..CLEAR_PASSES {
            let pending: Vec<ObjectRef> = self
                .heap
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|o| o.needs_destructor())
                .collect();
            if pending.is_empty() {
                break;
            }
            tracing::debug!(objects = pending.len(), "running destructors of unreachable objects");
            for object in pending {
                object.mark_destroyed();
                let dtor = object
                    .class
                    .as_ref()
                    .and_then(ClassRef::get)
                    .and_then(|c| c.destructor().cloned());
                if let Some(dtor) = dtor {
                    if let Err(e) = self.invoke(&dtor, Some(object), Vec::new()) {
                        tracing::warn!(error = %e, "destructor failed during cleanup");
                    }
                }
            }
            self.unwind_to(0);
        }

        let live: Vec<ObjectRef> = self.heap.iter().filter_map(Weak::upgrade).collect();
        for object in &live {
            object.mark_destroyed();
            drop(object.fields.take());
        }
        drop(live);
        self.drops.borrow_mut().clear();
        self.heap.clear();
        self.env.clear();
    }

    // ====================================================================
    // Statements
    // ====================================================================

    fn exec_stmt(&mut self, stmt: &Stmt) -> InterpResult<Flow> {
        let mark = self.temporaries.len();
        let flow = self.exec_stmt_inner(stmt)?;
        self.temporaries.truncate(mark);
        self.drain_drops()?;
        Ok(flow)
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt) -> InterpResult<Flow> {
        match stmt {
            Stmt::Empty(_)
            | Stmt::FnDecl(_)
            | Stmt::ClassDecl(_)
            | Stmt::Typedef(_)
            | Stmt::Directive(_) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                let value = self.eval(expr)?;
                self.env.result = self.env.deref(value).map_err(|e| e.at(expr.span))?;
                Ok(Flow::Normal)
            }
            Stmt::VarDecl(decl) => {
                self.declare(decl).map_err(|e| e.at(decl.span))?;
                Ok(Flow::Normal)
            }
            Stmt::Block(block) => self.exec_block(block),
            Stmt::If(stmt) => {
                if self.condition(&stmt.cond)? {
                    self.exec_block(&stmt.then_branch)
                } else if let Some(else_branch) = &stmt.else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(stmt) => {
                while self.condition(&stmt.cond)? {
                    match self.exec_block(&stmt.body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Return(ret) => {
                let value = match &ret.value {
                    Some(expr) => self.eval_value(expr)?,
                    None => RuntimeValue::Empty,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> InterpResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, block: &Block) -> InterpResult<Flow> {
        let height = self.env.len();
        let flow = self.exec_stmts(&block.stmts);
        self.env.truncate(height);
        let flow = flow?;
        self.drain_drops()?;
        Ok(flow)
    }

    fn condition(&mut self, expr: &Expr) -> InterpResult<bool> {
        Ok(self.eval_int(expr)? != 0)
    }

    /// Push the initial value of `decl` and record its slot
    fn declare(&mut self, decl: &VarDecl) -> InterpResult<()> {
        let value = self.initial_value(decl)?;
        self.env.push(value);
        let base = match decl.storage() {
            Storage::Global => 0,
            _ => self.env.fp(),
        };
        decl.runtime_index.set(Some(self.env.len() - 1 - base));
        Ok(())
    }

    fn initial_value(&mut self, decl: &VarDecl) -> InterpResult<RuntimeValue> {
        let ty = decl.declared_type();
        if let Some(init) = &decl.init {
            if decl.is_reference() {
                return match self.eval(init)? {
                    RuntimeValue::Ref(place) => Ok(RuntimeValue::Ref(place)),
                    _ => Err(RuntimeError::internal(format!(
                        "reference '{}' bound to a temporary",
                        decl.name.node
                    ))),
                };
            }
            return Ok(self.eval_value(init)?.coerce_to(&ty));
        }
        if let Some(args) = &decl.ctor_args {
            let class = ty
                .class()
                .ok_or_else(|| {
                    RuntimeError::internal(format!("'{}' is not an object", decl.name.node))
                })?;
            let ctor = decl.constructor();
            let values = match &ctor {
                Some(ctor) => self.call_args(ctor, args)?,
                None => Vec::new(),
            };
            return self.construct(&class, ctor.as_ref(), values).map(RuntimeValue::Object);
        }
        if decl.has_sized_dims() {
            let mut sizes = Vec::new();
            for size in decl.dims.iter().map_while(Option::as_ref) {
                sizes.push(self.eval_int(size)?);
            }
            let elem = Type::array(decl.ty.ty(), decl.dims.len() - sizes.len());
            return self.build_array(&sizes, &elem, decl.constructor().as_ref());
        }
        self.default_value(&ty, decl.constructor().as_ref())
    }

    fn default_value(
        &mut self,
        ty: &Type,
        ctor: Option<&Rc<FnDecl>>,
    ) -> InterpResult<RuntimeValue> {
        Ok(match ty {
            Type::Int => RuntimeValue::Int(0),
            Type::Float => RuntimeValue::Float(0.0),
            Type::String => RuntimeValue::string(""),
            Type::Named(class) => {
                let class = class
                    .get()
                    .ok_or_else(|| RuntimeError::internal("class no longer exists"))?;
                RuntimeValue::Object(self.construct(&class, ctor, Vec::new())?)
            }
            _ => RuntimeValue::Nil,
        })
    }

    /// One dimension per size; elements are built in increasing index order
    fn build_array(
        &mut self,
        sizes: &[i64],
        elem: &Type,
        ctor: Option<&Rc<FnDecl>>,
    ) -> InterpResult<RuntimeValue> {
        let Some((&size, rest)) = sizes.split_first() else {
            return self.default_value(elem, ctor);
        };
        if let Some(&negative) = sizes.iter().find(|&&n| n < 0) {
            return Err(RuntimeError::negative_array_size(negative));
        }
        let total = sizes
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(usize::try_from(n).ok()?));
        if total.is_none_or(|total| total > self.max_array_len) {
            return Err(RuntimeError::array_too_large(sizes, self.max_array_len));
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(size as usize)
            .map_err(|_| RuntimeError::array_too_large(sizes, self.max_array_len))?;
        for _ in 0..size {
            items.push(self.build_array(rest, elem, ctor)?);
        }
        Ok(RuntimeValue::Object(self.alloc(None, items)))
    }

    fn alloc(&mut self, class: Option<&Rc<ClassDecl>>, fields: Vec<RuntimeValue>) -> ObjectRef {
        let finalizer = class.filter(|c| c.destructor().is_some()).map(|_| Rc::clone(&self.drops));
        let object = Rc::new(Object::new(class.map(ClassRef::new), fields, finalizer));
        self.track(&object);
        object
    }

    fn track(&mut self, object: &ObjectRef) {
        if self.heap.len() >= self.prune_at {
            self.heap.retain(|w| w.strong_count() > 0);
            self.prune_at = (self.heap.len() * 2).max(HEAP_PRUNE_MIN);
        }
        self.heap.push(Rc::downgrade(object));
    }

    /// Allocate, run member initializers with the object in slot 0, then the constructor
    fn construct(
        &mut self,
        class: &Rc<ClassDecl>,
        ctor: Option<&Rc<FnDecl>>,
        args: Vec<RuntimeValue>,
    ) -> InterpResult<ObjectRef> {
        let object = self.alloc(Some(class), vec![RuntimeValue::Empty; class.fields.len()]);
        self.env.enter_frame();
        self.env.push(RuntimeValue::Object(Rc::clone(&object)));
        let initialized = self.init_members(&object, class);
        self.env.leave_frame();
        initialized?;
        if let Some(ctor) = ctor {
            self.invoke(ctor, Some(Rc::clone(&object)), args)?;
        }
        Ok(object)
    }

    fn init_members(&mut self, object: &ObjectRef, class: &ClassDecl) -> InterpResult<()> {
        for (index, field) in class.fields.iter().enumerate() {
            let value = self.initial_value(field).map_err(|e| e.at(field.span))?;
            object.set(index, value);
        }
        Ok(())
    }

    fn drain_drops(&mut self) -> InterpResult<()> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let result = self.drain_queue();
        self.draining = false;
        result
    }

    fn drain_queue(&mut self) -> InterpResult<()> {
        loop {
            let next = self.drops.borrow_mut().pop_front();
            let Some(pending) = next else {
                return Ok(());
            };
            let Some(class) = pending.class.get() else {
                continue;
            };
            let Some(dtor) = class.destructor().cloned() else {
                continue;
            };
            tracing::trace!(class = %class.qualified_name(), "running destructor");
            let object = Rc::new(Object::resurrect(pending));
            self.track(&object);
            self.invoke(&dtor, Some(object), Vec::new())?;
        }
    }

    // ====================================================================
    // Calls
    // ====================================================================

    /// Argument values for `decl`, evaluated in the caller's frame
    fn call_args(&mut self, decl: &FnDecl, args: &[Expr]) -> InterpResult<Vec<RuntimeValue>> {
        let mut values = Vec::with_capacity(args.len());
        for (param, arg) in decl.params.iter().zip(args) {
            if param.is_reference() {
                match self.eval(arg)? {
                    RuntimeValue::Ref(place) => values.push(RuntimeValue::Ref(place)),
                    _ => {
                        return Err(RuntimeError::internal(format!(
                            "reference parameter '{}' needs an assignable argument",
                            param.name.node
                        ))
                        .at(arg.span));
                    }
                }
            } else {
                values.push(self.eval_value(arg)?.coerce_to(&param.declared_type()));
            }
        }
        Ok(values)
    }

    fn invoke(
        &mut self,
        decl: &Rc<FnDecl>,
        receiver: Option<ObjectRef>,
        args: Vec<RuntimeValue>,
    ) -> InterpResult<RuntimeValue> {
        if self.depth >= self.max_depth {
            return Err(RuntimeError::stack_overflow(self.max_depth));
        }
        tracing::trace!(function = %decl.name.node, depth = self.depth, "call");
        self.depth += 1;
        self.env.enter_frame();
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.invoke_in_frame(decl, receiver, args)
        });
        self.env.leave_frame();
        self.depth -= 1;
        let value = result?;
        self.drain_drops()?;
        Ok(value)
    }

    fn invoke_in_frame(
        &mut self,
        decl: &Rc<FnDecl>,
        receiver: Option<ObjectRef>,
        args: Vec<RuntimeValue>,
    ) -> InterpResult<RuntimeValue> {
        if let Some(receiver) = receiver {
            self.env.push(RuntimeValue::Object(receiver));
        }
        let supplied = args.len();
        for value in args {
            self.env.push(value);
        }
        for param in decl.params.iter().skip(supplied) {
            let default = param.init.as_ref().ok_or_else(|| {
                RuntimeError::internal(format!(
                    "missing argument for parameter '{}'",
                    param.name.node
                ))
            })?;
            let value = self.eval_value(default)?.coerce_to(&param.declared_type());
            self.env.push(value);
        }

        let ret = decl.return_type();
        let value = match &decl.body {
            Some(body) => match self.exec_stmts(&body.stmts)? {
                Flow::Return(value) => value,
                Flow::Normal | Flow::Break if ret == Type::Void => RuntimeValue::Empty,
                Flow::Normal | Flow::Break => {
                    return Err(RuntimeError::missing_return(&decl.name.node).at(decl.name.span));
                }
            },
            None => self.call_native(decl)?,
        };
        Ok(match ret {
            Type::Void => RuntimeValue::Empty,
            ret => value.coerce_to(&ret),
        })
    }

    fn call_native(&mut self, decl: &Rc<FnDecl>) -> InterpResult<RuntimeValue> {
        let func = self
            .natives
            .get(decl)
            .ok_or_else(|| RuntimeError::unbound_native(&decl.signature()))?;
        let base = self.env.fp();
        let len = self.env.len() - base;
        let mut args = NativeArgs::new(&mut self.env, base, len);
        func.call(&mut args).map_err(|message| RuntimeError::native(&decl.signature(), &message))
    }

    /// Object in frame slot 0
    fn this(&self) -> InterpResult<ObjectRef> {
        match self.env.slot(self.env.fp())? {
            RuntimeValue::Object(object) => Ok(Rc::clone(object)),
            _ => Err(RuntimeError::internal("member access outside of an object")),
        }
    }

    /// Receiver for a call to `decl` made without an explicit object
    fn implicit_receiver(&self, decl: &FnDecl) -> InterpResult<Option<ObjectRef>> {
        if decl.owner.borrow().is_some() {
            self.this().map(Some)
        } else {
            Ok(None)
        }
    }

    fn eval_call(&mut self, call: &CallExpr) -> InterpResult<RuntimeValue> {
        let target = call
            .target()
            .ok_or_else(|| RuntimeError::internal("call was never resolved"))?;
        match target {
            CallTarget::Function(decl) => {
                let decl = upgrade_fn(&decl)?;
                let receiver = self.implicit_receiver(&decl)?;
                let args = self.call_args(&decl, &call.args)?;
                self.invoke(&decl, receiver, args)
            }
            CallTarget::Method(decl) => {
                let decl = upgrade_fn(&decl)?;
                let ExprKind::Field(field) = &call.callee.kind else {
                    return Err(RuntimeError::internal("method call without an object"));
                };
                let receiver = self.eval_object(&field.base, "method call")?;
                let args = self.call_args(&decl, &call.args)?;
                self.invoke(&decl, Some(receiver), args)
            }
            CallTarget::Constructor { class, ctor } => {
                let class = class
                    .get()
                    .ok_or_else(|| RuntimeError::internal("class no longer exists"))?;
                let ctor = ctor.as_ref().map(upgrade_fn).transpose()?;
                let args = match &ctor {
                    Some(ctor) => self.call_args(ctor, &call.args)?,
                    None => Vec::new(),
                };
                self.construct(&class, ctor.as_ref(), args).map(RuntimeValue::Object)
            }
            CallTarget::Pointer => {
                let handle = match self.eval_value(&call.callee)? {
                    RuntimeValue::FunctionPointer(handle) => handle,
                    RuntimeValue::Nil => {
                        return Err(RuntimeError::nil_dereference("call through function pointer"));
                    }
                    other => {
                        return Err(RuntimeError::internal(format!(
                            "cannot call a value of type {}",
                            other.type_name()
                        )));
                    }
                };
                let decl = upgrade_fn(&handle.decl)?;
                let receiver = match handle.receiver {
                    Some(receiver) => Some(receiver),
                    None => self.implicit_receiver(&decl)?,
                };
                let args = self.call_args(&decl, &call.args)?;
                self.invoke(&decl, receiver, args)
            }
        }
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    fn eval(&mut self, expr: &Expr) -> InterpResult<RuntimeValue> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.eval_inner(expr))
            .map_err(|e| e.at(expr.span))
    }

    /// Evaluate and follow a resulting reference
    fn eval_value(&mut self, expr: &Expr) -> InterpResult<RuntimeValue> {
        let value = self.eval(expr)?;
        match self.env.deref(value).map_err(|e| e.at(expr.span))? {
            RuntimeValue::Empty => Err(RuntimeError::uninitialized().at(expr.span)),
            value => Ok(value),
        }
    }

    fn eval_int(&mut self, expr: &Expr) -> InterpResult<i64> {
        match self.eval_value(expr)? {
            RuntimeValue::Int(n) => Ok(n),
            other => Err(RuntimeError::internal(format!(
                "expected int, found {}",
                other.type_name()
            ))
            .at(expr.span)),
        }
    }

    fn eval_object(&mut self, expr: &Expr, what: &str) -> InterpResult<ObjectRef> {
        match self.eval_value(expr)? {
            RuntimeValue::Object(object) => Ok(object),
            RuntimeValue::Nil => Err(RuntimeError::nil_dereference(what).at(expr.span)),
            other => Err(RuntimeError::internal(format!(
                "{what} on a value of type {}",
                other.type_name()
            ))
            .at(expr.span)),
        }
    }

    fn eval_place(&mut self, expr: &Expr) -> InterpResult<Place> {
        match self.eval(expr)? {
            RuntimeValue::Ref(place) => Ok(place),
            _ => Err(
                RuntimeError::internal("assignment to a value that has no storage").at(expr.span)
            ),
        }
    }

    fn eval_inner(&mut self, expr: &Expr) -> InterpResult<RuntimeValue> {
        match &expr.kind {
            ExprKind::Int(n) => Ok(RuntimeValue::Int(*n)),
            ExprKind::Float(x) => Ok(RuntimeValue::Float(*x)),
            ExprKind::Str(s) => Ok(RuntimeValue::string(s.as_str())),
            ExprKind::Nil => Ok(RuntimeValue::Nil),
            ExprKind::Unary { op, operand } => {
                let value = self.eval_value(operand)?;
                unary(*op, value)
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            ExprKind::Assign { target, value } => {
                let value = self.eval_value(value)?;
                let place = self.eval_place(target)?;
                let value = value.coerce_to(&target.ty());
                self.env.store(&place, value.clone())?;
                // the overwritten value may have held the last handle to an object
                self.drain_drops()?;
                Ok(value)
            }
            ExprKind::Var(var) => self.eval_var(var),
            ExprKind::Index { base, index } => {
                let array = self.eval_object(base, "indexing")?;
                let i = self.eval_int(index)?;
                let len = array.len();
                if i < 0 || i as usize >= len {
                    return Err(RuntimeError::index_out_of_bounds(i, len));
                }
                let place = Place::Field(Rc::downgrade(&array), i as usize);
                self.temporaries.push(array);
                Ok(RuntimeValue::Ref(place))
            }
            ExprKind::Field(field) => self.eval_field(field),
            ExprKind::Call(call) => self.eval_call(call),
        }
    }

    fn eval_var(&mut self, var: &VarRef) -> InterpResult<RuntimeValue> {
        match var.binding() {
            Some(Binding::Variable(decl)) => {
                let decl = decl
                    .upgrade()
                    .ok_or_else(|| {
                        RuntimeError::internal(format!("'{}' no longer exists", var.name))
                    })?;
                self.variable_place(&decl).map(RuntimeValue::Ref)
            }
            Some(Binding::Function(decl)) => {
                let decl = upgrade_fn(&decl)?;
                let receiver = self.implicit_receiver(&decl)?;
                Ok(RuntimeValue::FunctionPointer(FunctionHandle {
                    decl: Rc::downgrade(&decl),
                    receiver,
                }))
            }
            _ => Err(RuntimeError::internal(format!("name '{}' was never resolved", var.name))),
        }
    }

    /// Slot of a variable, or the slot a reference variable is bound to
    fn variable_place(&self, decl: &VarDecl) -> InterpResult<Place> {
        let index = decl
            .runtime_index
            .get()
            .ok_or_else(|| RuntimeError::used_before_declaration(&decl.name.node))?;
        let place = match decl.storage() {
            Storage::Global => Place::Stack(index),
            Storage::Local | Storage::Param => Place::Stack(self.env.fp() + index),
            Storage::Member => Place::Field(Rc::downgrade(&self.this()?), index),
        };
        match self.env.load(&place)? {
            RuntimeValue::Ref(target) => Ok(target),
            _ => Ok(place),
        }
    }

    fn eval_field(&mut self, field: &FieldRef) -> InterpResult<RuntimeValue> {
        match field.member() {
            Some(Member::Field(decl)) => {
                let decl = decl
                    .upgrade()
                    .ok_or_else(|| {
                        RuntimeError::internal(format!(
                            "member '{}' no longer exists",
                            field.name.node
                        ))
                    })?;
                let index = decl
                    .runtime_index
                    .get()
                    .ok_or_else(|| {
                        RuntimeError::internal(format!("member '{}' has no slot", field.name.node))
                    })?;
                let object = self.eval_object(&field.base, "member access")?;
                let place = Place::Field(Rc::downgrade(&object), index);
                self.temporaries.push(object);
                match self.env.load(&place)? {
                    RuntimeValue::Ref(target) => Ok(RuntimeValue::Ref(target)),
                    _ => Ok(RuntimeValue::Ref(place)),
                }
            }
            Some(Member::Method(decl)) => {
                let object = self.eval_object(&field.base, "method access")?;
                Ok(RuntimeValue::FunctionPointer(FunctionHandle {
                    decl,
                    receiver: Some(object),
                }))
            }
            _ => Err(RuntimeError::internal(format!(
                "member '{}' was never resolved",
                field.name.node
            ))),
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> InterpResult<RuntimeValue> {
        match op {
            BinOp::And => {
                let holds = self.condition(lhs)? && self.condition(rhs)?;
                return Ok(RuntimeValue::Int(i64::from(holds)));
            }
            BinOp::Or => {
                let holds = self.condition(lhs)? || self.condition(rhs)?;
                return Ok(RuntimeValue::Int(i64::from(holds)));
            }
            _ => {}
        }
        let left = self.eval_value(lhs)?;
        let right = self.eval_value(rhs)?;
        binary(op, left, right)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.clear();
    }
}

fn upgrade_fn(decl: &Weak<FnDecl>) -> InterpResult<Rc<FnDecl>> {
    decl.upgrade().ok_or_else(|| RuntimeError::internal("function no longer exists"))
}

fn unary(op: UnOp, value: RuntimeValue) -> InterpResult<RuntimeValue> {
    match (op, value) {
        (UnOp::Neg, RuntimeValue::Int(n)) => Ok(RuntimeValue::Int(n.wrapping_neg())),
        (UnOp::Neg, RuntimeValue::Float(x)) => Ok(RuntimeValue::Float(-x)),
        (UnOp::Not, RuntimeValue::Int(n)) => Ok(RuntimeValue::Int(i64::from(n == 0))),
        (op, value) => Err(RuntimeError::internal(format!(
            "operator '{op}' on {}",
            value.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: RuntimeValue, right: RuntimeValue) -> InterpResult<RuntimeValue> {
    use RuntimeValue::{Float, Int};

    if op.is_equality() {
        let equal = left.equals(&right);
        return Ok(Int(i64::from(equal == (op == BinOp::Eq))));
    }
    if op.is_ordering() {
        let ordering = match (&left, &right) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (RuntimeValue::String(a), RuntimeValue::String(b)) => Some(a.cmp(b)),
            _ => match (left.as_float(), right.as_float()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => return Err(mismatch(op, &left, &right)),
            },
        };
        let holds = ordering.is_some_and(|o| match op {
            BinOp::Lt => o.is_lt(),
            BinOp::Le => o.is_le(),
            BinOp::Gt => o.is_gt(),
            _ => o.is_ge(),
        });
        return Ok(Int(i64::from(holds)));
    }

    // arithmetic keeps the type of the left operand
    match (&left, &right) {
        (RuntimeValue::String(a), RuntimeValue::String(b)) if op == BinOp::Add => {
            Ok(RuntimeValue::string(format!("{a}{b}")))
        }
        (Int(a), Int(b)) => int_arith(op, *a, *b).map(Int),
        (Int(a), Float(b)) => {
            if matches!(op, BinOp::Div | BinOp::Rem) && *b == 0.0 {
                return Err(RuntimeError::division_by_zero());
            }
            Ok(Int(float_arith(op, *a as f64, *b) as i64))
        }
        (Float(a), Int(_) | Float(_)) => {
            let b = right.as_float().unwrap_or_default();
            Ok(Float(float_arith(op, *a, b)))
        }
        _ => Err(mismatch(op, &left, &right)),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> InterpResult<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        BinOp::Div | BinOp::Rem if b == 0 => Err(RuntimeError::division_by_zero()),
        BinOp::Div => Ok(a.wrapping_div(b)),
        BinOp::Rem => Ok(a.wrapping_rem(b)),
        _ => Err(RuntimeError::internal(format!("operator '{op}' is not arithmetic"))),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        _ => a % b,
    }
}

fn mismatch(op: BinOp, left: &RuntimeValue, right: &RuntimeValue) -> RuntimeError {
    RuntimeError::internal(format!(
        "operator '{op}' cannot combine {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ErrorKind;
    use crate::parser::parse_source;
    use crate::sema::{bind, register};
    use crate::symbols::SymbolTables;

    // interpreter first: it must release objects while the declarations still exist
    struct Fixture {
        interp: Interpreter,
        tables: SymbolTables,
        _units: Vec<Program>,
    }

    impl Fixture {
        fn global(&self, name: &str) -> RuntimeValue {
            let decl = self.tables.vars.find_global(name).unwrap();
            self.interp.global_value(&decl).unwrap()
        }

        fn int(&self, name: &str) -> i64 {
            match self.global(name) {
                RuntimeValue::Int(n) => n,
                other => panic!("Expected int for {name}, got {other:?}"),
            }
        }
    }

    fn run_with_depth(src: &str, max_depth: usize) -> (Fixture, InterpResult<()>) {
        let program = parse_source(src, FileId(0)).unwrap();
        let mut tables = SymbolTables::new();
        let reg = register(&program, &mut tables);
        assert!(reg.diagnostics.is_empty(), "{:?}", reg.diagnostics);
        let units = vec![program];
        let bound = bind(&units, &mut tables);
        assert!(bound.is_empty(), "{:?}", bound);
        let checked = crate::types::check(&units);
        assert!(checked.is_empty(), "{:?}", checked);
        let mut interp = Interpreter::new(max_depth);
        let result = interp.run(&units);
        (Fixture { interp, tables, _units: units }, result)
    }

    fn run_ok(src: &str) -> Fixture {
        let (fixture, result) = run_with_depth(src, DEFAULT_MAX_CALL_DEPTH);
        if let Err(e) = result {
            panic!("runtime error: {e}");
        }
        fixture
    }

    fn run_err(src: &str) -> RuntimeError {
        let (_fixture, result) = run_with_depth(src, DEFAULT_MAX_CALL_DEPTH);
        result.unwrap_err()
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    #[test]
    fn test_arithmetic_and_coercion() {
        let fx = run_ok(
            "int a = 7 / 2; float b = 7 / 2.0; int c = 2.5 * 2; float d = 3; int e = -7 % 3;",
        );
        assert_eq!(fx.int("a"), 3);
        assert!(matches!(fx.global("b"), RuntimeValue::Float(x) if x == 3.5));
        assert_eq!(fx.int("c"), 5);
        assert!(matches!(fx.global("d"), RuntimeValue::Float(x) if x == 3.0));
        assert_eq!(fx.int("e"), -1);
    }

    #[test]
    fn test_comparisons_yield_int() {
        let fx = run_ok(
            r#"int a = 1 < 2.5; int b = "abc" < "abd"; int c = 2 == 2.0; int d = !(3 >= 4);"#,
        );
        assert_eq!((fx.int("a"), fx.int("b"), fx.int("c"), fx.int("d")), (1, 1, 1, 1));
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let fx = run_ok(
            "int calls = 0; int bump() { calls = calls + 1; return 1; } int r = 0 && bump(); \
             int s = 1 || bump();",
        );
        assert_eq!(fx.int("calls"), 0);
        assert_eq!(fx.int("r"), 0);
        assert_eq!(fx.int("s"), 1);
    }

    #[test]
    fn test_string_concatenation() {
        let fx = run_ok(r#"string s = "ab"; s = s + "cd";"#);
        assert!(matches!(fx.global("s"), RuntimeValue::String(s) if &*s == "abcd"));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(run_err("int z = 0; int a = 1 / z;").kind, ErrorKind::DivisionByZero);
        assert_eq!(run_err("int z = 0; int a = 1 % z;").kind, ErrorKind::DivisionByZero);
    }

    #[test]
    fn test_error_carries_innermost_span() {
        let src = "int z = 0; int a = 1 + 1 / z;";
        let err = run_err(src);
        let span = err.span.unwrap();
        assert_eq!(&src[span.start..span.end], "1 / z");
    }

    // ====================================================================
    // Arrays and objects
    // ====================================================================

    #[test]
    fn test_arrays_are_built_per_dimension() {
        let fx = run_ok(
            "int grid[2][3]; grid[1][2] = 5; int x = grid[1][2]; int y = grid[0][0]; \
             int[] rows[2];",
        );
        assert_eq!(fx.int("x"), 5);
        assert_eq!(fx.int("y"), 0);
        assert_eq!(fx.global("rows").to_string(), "[nil, nil]");
    }

    #[test]
    fn test_index_out_of_bounds() {
        let err = run_err("int xs[3]; xs[3] = 1;");
        assert_eq!(err.kind, ErrorKind::IndexOutOfBounds);
        assert_eq!(run_err("int n = -1; int xs[n];").kind, ErrorKind::NegativeArraySize);
    }

    #[test]
    fn test_huge_array_is_runtime_error() {
        let err = run_err("int n = 1000000000000; int xs[n];");
        assert_eq!(err.kind, ErrorKind::ArrayTooLarge);
        let err = run_err("int n = 100000; int grid[n][n];");
        assert_eq!(err.kind, ErrorKind::ArrayTooLarge);
        let err = run_err("int n = 4611686018427387904; int grid[n][n][n];");
        assert_eq!(err.kind, ErrorKind::ArrayTooLarge);
    }

    #[test]
    fn test_array_limit_is_configurable() {
        let program = parse_source("int xs[8];", FileId(0)).unwrap();
        let mut tables = SymbolTables::new();
        register(&program, &mut tables);
        let units = vec![program];
        bind(&units, &mut tables);
        crate::types::check(&units);
        let mut interp = Interpreter::new(DEFAULT_MAX_CALL_DEPTH).with_max_array_len(4);
        assert_eq!(interp.run(&units).unwrap_err().kind, ErrorKind::ArrayTooLarge);
        interp.clear();
    }

    #[test]
    fn test_nil_dereference() {
        assert_eq!(run_err("int[] xs; xs[0];").kind, ErrorKind::NilDereference);
        assert_eq!(run_err("class C { int v; }; C c = nil; c.v;").kind, ErrorKind::NilDereference);
        assert_eq!(run_err("function<int(int)> f; f(1);").kind, ErrorKind::NilDereference);
    }

    #[test]
    fn test_members_initialize_before_constructor() {
        let src = "class P { int x = 1; int y = x + 1; P(int k) { x = x + k; } }; P p = P(10); \
                   int px = p.x; int py = p.y;";
        let fx = run_ok(src);
        assert_eq!(fx.int("px"), 11);
        assert_eq!(fx.int("py"), 2);
    }

    #[test]
    fn test_auto_constructed_members() {
        let src = "class In { int v = 4; }; class Out { In inner; int data[2]; }; Out o; \
                   int v = o.inner.v; int d = o.data[1];";
        let fx = run_ok(src);
        assert_eq!(fx.int("v"), 4);
        assert_eq!(fx.int("d"), 0);
    }

    #[test]
    fn test_array_elements_constructed_in_order() {
        let src = r#"
            int next = 0;
            int seen[3];
            class X { int id; X() { id = next; seen[next] = next; next = next + 1; } };
            X xs[3];
            int first = xs[0].id;
            int last = xs[2].id;
        "#;
        let fx = run_ok(src);
        assert_eq!((fx.int("first"), fx.int("last"), fx.int("next")), (0, 2, 3));
        assert_eq!(fx.global("seen").to_string(), "[0, 1, 2]");
    }

    #[test]
    fn test_objects_are_shared_handles() {
        let fx = run_ok(
            "class B { int v; }; B a; B b = a; b.v = 9; int seen = a.v; int same = a == b;",
        );
        assert_eq!(fx.int("seen"), 9);
        assert_eq!(fx.int("same"), 1);
    }

    // ====================================================================
    // Calls
    // ====================================================================

    #[test]
    fn test_recursion() {
        let fx = run_ok(
            "int fib(int n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } \
             int r = fib(15);",
        );
        assert_eq!(fx.int("r"), 610);
    }

    #[test]
    fn test_return_from_nested_loop() {
        let src = "int find() { int i = 0; while (1) { while (1) { if (i == 3) { return i; } \
                   break; } i = i + 1; } return -1; } int r = find();";
        assert_eq!(run_ok(src).int("r"), 3);
    }

    #[test]
    fn test_missing_return() {
        let err = run_err("int f(int n) { if (n) { return 1; } } f(0);");
        assert_eq!(err.kind, ErrorKind::MissingReturn);
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let (_fx, result) = run_with_depth("int down(int n) { return down(n + 1); } down(0);", 64);
        assert_eq!(result.unwrap_err().kind, ErrorKind::StackOverflow);
    }

    #[test]
    fn test_reference_parameter_writes_through() {
        let src = "void inc(int& x) { x = x + 1; } void keep(int x) { x = x + 1; } int a = 5; \
                   inc(a); int b = 5; keep(b);";
        let fx = run_ok(src);
        assert_eq!(fx.int("a"), 6);
        assert_eq!(fx.int("b"), 5);
    }

    #[test]
    fn test_reference_variable_aliases() {
        let fx = run_ok("int x = 1; int& r = x; r = 7; int y = 2; r = y; y = 3;");
        assert_eq!(fx.int("x"), 2);
        assert_eq!(fx.int("r"), 2);
    }

    #[test]
    fn test_default_arguments_fill_trailing_params() {
        let fx = run_ok(
            "int add(int a, int b = 10) { return a + b; } int r = add(1); int s = add(1, 2);",
        );
        assert_eq!((fx.int("r"), fx.int("s")), (11, 3));
    }

    #[test]
    fn test_method_pointer_captures_receiver() {
        let src = "class C { int k; int add(int v) { return k + v; } }; C c; c.k = 5; \
                   function<int(int)> f = c.add; int r = f(2);";
        assert_eq!(run_ok(src).int("r"), 7);
    }

    #[test]
    fn test_scoping_restores_outer_binding() {
        let fx = run_ok("int x = 1; { int x = 2; x = 3; } int y = x;");
        assert_eq!(fx.int("y"), 1);
    }

    #[test]
    fn test_global_used_before_declaration() {
        let err = run_err("int f() { return g; } int x = f(); int g = 1;");
        assert_eq!(err.kind, ErrorKind::Uninitialized);
    }

    #[test]
    fn test_unbound_native_fails_at_call() {
        assert_eq!(run_err("import int answer(); answer();").kind, ErrorKind::UnboundNative);
    }

    // ====================================================================
    // Destructors
    // ====================================================================

    #[test]
    fn test_destructor_runs_once_at_scope_exit() {
        let src = "int count = 0; class D { ~D() { count = count + 1; } }; { D d; D alias = d; } \
                   int after = count;";
        let fx = run_ok(src);
        assert_eq!(fx.int("after"), 1);
        assert_eq!(fx.int("count"), 1);
    }

    #[test]
    fn test_destructor_runs_for_overwritten_value() {
        let src = "int count = 0; class D { ~D() { count = count + 1; } }; D d; d = D(); \
                   int mid = count; d = nil;";
        let fx = run_ok(src);
        assert_eq!(fx.int("mid"), 1);
        assert_eq!(fx.int("count"), 2);
    }

    #[test]
    fn test_destructor_runs_when_assignment_releases() {
        let src = "int count = 0; class D { ~D() { count = count + 1; } }; D d; \
                   int seen = ((d = nil) == nil) * 10 + count;";
        let fx = run_ok(src);
        assert_eq!(fx.int("seen"), 11);
        assert_eq!(fx.int("count"), 1);
    }

    #[test]
    fn test_destructor_runs_before_rest_of_expression() {
        let src = "int count = 0; class D { ~D() { count = count + 1; } }; D a; D b; \
                   int seen = (a = nil) == nil && count == 1 && (b = nil) == nil && count == 2;";
        assert_eq!(run_ok(src).int("seen"), 1);
    }

    #[test]
    fn test_destructor_sees_fields() {
        let src = "int last = 0; class D { int v = 3; ~D() { last = v; } }; { D d; d.v = 8; }";
        assert_eq!(run_ok(src).int("last"), 8);
    }

    #[test]
    fn test_temporary_destroyed_after_statement() {
        let src = "int count = 0; class D { int v = 2; ~D() { count = count + 1; } }; \
                   int v = D().v; int after = count;";
        let fx = run_ok(src);
        assert_eq!(fx.int("v"), 2);
        assert_eq!(fx.int("after"), 1);
    }

    #[test]
    fn test_clear_breaks_cycles() {
        let src = "class N { N other = nil; ~N() { other = nil; } }; N a; N b; a.other = b; \
                   b.other = a; N loner; loner.other = loner;";
        let mut fx = run_ok(src);
        assert_eq!(fx.interp.live_objects(), 3);
        fx.interp.clear();
        assert_eq!(fx.interp.live_objects(), 0);
        assert_eq!(fx.interp.stack_height(), 0);
    }
}
