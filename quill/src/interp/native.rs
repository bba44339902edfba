//! Host-implemented functions
//!
//! A script declares a native prototype with `import ret name(params);`. The
//! host attaches an implementation to that exact declaration, either
//! directly or from a [`NativeModule`] loaded when a script imports the
//! module by name.

use std::any::Any;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::ast::{ClassDecl, FnDecl, Type};
use crate::symbols::SymbolTables;

use super::env::Env;
use super::value::{Place, RuntimeValue};

/// Outcome of a native call; the message becomes a runtime error
pub type NativeResult = Result<RuntimeValue, String>;

/// Implementation of a native prototype
pub trait NativeFunction {
    fn call(&self, args: &mut NativeArgs<'_>) -> NativeResult;
}

impl<F> NativeFunction for F
where
    F: Fn(&mut NativeArgs<'_>) -> NativeResult,
{
    fn call(&self, args: &mut NativeArgs<'_>) -> NativeResult {
        self(args)
    }
}

/// The caller's argument slots, receiver first for member functions
pub struct NativeArgs<'a> {
    env: &'a mut Env,
    base: usize,
    len: usize,
}

impl<'a> NativeArgs<'a> {
    pub(crate) fn new(env: &'a mut Env, base: usize, len: usize) -> Self {
        Self { env, base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: usize) -> Result<RuntimeValue, String> {
        if index >= self.len {
            return Err(format!("argument {index} out of range ({} given)", self.len));
        }
        self.env.slot(self.base + index).cloned().map_err(|e| e.message)
    }

    /// Argument value, following a reference parameter to its referent
    pub fn get(&self, index: usize) -> Result<RuntimeValue, String> {
        match self.slot(index)? {
            RuntimeValue::Ref(place) => self.env.load(&place).map_err(|e| e.message),
            value => Ok(value),
        }
    }

    /// Overwrite an argument; reference parameters write through to the caller
    pub fn set(&mut self, index: usize, value: RuntimeValue) -> Result<(), String> {
        let place = match self.slot(index)? {
            RuntimeValue::Ref(place) => place,
            _ => Place::Stack(self.base + index),
        };
        self.env.store(&place, value).map_err(|e| e.message)
    }

    pub fn int(&self, index: usize) -> Result<i64, String> {
        let value = self.get(index)?;
        value
            .as_int()
            .ok_or_else(|| format!("argument {index}: expected int, found {}", value.type_name()))
    }

    pub fn float(&self, index: usize) -> Result<f64, String> {
        let value = self.get(index)?;
        value
            .as_float()
            .ok_or_else(|| format!("argument {index}: expected float, found {}", value.type_name()))
    }

    pub fn string(&self, index: usize) -> Result<Rc<str>, String> {
        match self.get(index)? {
            RuntimeValue::String(s) => Ok(s),
            other => Err(format!("argument {index}: expected string, found {}", other.type_name())),
        }
    }
}

struct NativeBinding {
    decl: Weak<FnDecl>,
    func: Rc<dyn NativeFunction>,
}

/// Implementations keyed by declaration identity
#[derive(Default)]
pub struct Natives {
    bindings: HashMap<usize, NativeBinding>,
}

impl Natives {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(decl: &Rc<FnDecl>) -> usize {
        Rc::as_ptr(decl) as usize
    }

    pub fn bind(&mut self, decl: &Rc<FnDecl>, func: Rc<dyn NativeFunction>) {
        self.prune();
        tracing::debug!(function = %decl.signature(), "bound native function");
        self.bindings.insert(Self::key(decl), NativeBinding { decl: Rc::downgrade(decl), func });
    }

    /// Implementation bound to this very declaration
    pub fn get(&self, decl: &Rc<FnDecl>) -> Option<Rc<dyn NativeFunction>> {
        let binding = self.bindings.get(&Self::key(decl))?;
        let live = binding.decl.upgrade()?;
        Rc::ptr_eq(&live, decl).then(|| Rc::clone(&binding.func))
    }

    pub fn is_bound(&self, decl: &Rc<FnDecl>) -> bool {
        self.get(decl).is_some()
    }

    /// Forget bindings whose declaration no longer exists
    pub fn prune(&mut self) {
        self.bindings.retain(|_, b| b.decl.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

/// Provider of native implementations for `import "name";`
pub trait NativeModule {
    fn load(&self, linker: &mut Linker<'_>) -> Result<(), String>;
}

/// What a module sees while loading: the declarations of the pending run
pub struct Linker<'a> {
    tables: &'a SymbolTables,
    natives: &'a mut Natives,
    context: Option<&'a mut (dyn Any + 'static)>,
}

impl<'a> Linker<'a> {
    pub fn new(
        tables: &'a SymbolTables,
        natives: &'a mut Natives,
        context: Option<&'a mut (dyn Any + 'static)>,
    ) -> Self {
        Self { tables, natives, context }
    }

    pub fn function(&self, path: &[&str], prototype: &[Type]) -> Option<Rc<FnDecl>> {
        self.tables.find_function(path, prototype)
    }

    pub fn class(&self, path: &[&str]) -> Option<Rc<ClassDecl>> {
        self.tables.find_class(path)
    }

    pub fn bind(&mut self, decl: &Rc<FnDecl>, func: impl NativeFunction + 'static) {
        self.natives.bind(decl, Rc::new(func));
    }

    /// Look up `path` with `prototype` and bind it, failing when no such prototype was declared
    pub fn bind_function(
        &mut self,
        path: &[&str],
        prototype: &[Type],
        func: impl NativeFunction + 'static,
    ) -> Result<(), String> {
        let decl = self.function(path, prototype).ok_or_else(|| {
            let types: Vec<String> = prototype.iter().map(Type::to_string).collect();
            format!("no prototype '{}({})' is declared", path.join("."), types.join(", "))
        })?;
        self.bind(&decl, func);
        Ok(())
    }

    /// Host extension context, if it has type `T`
    pub fn context<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_deref_mut()?.downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FileId;
    use crate::parser::parse_source;
    use crate::sema::{bind, register};

    fn native_tables(src: &str) -> (Vec<crate::ast::Program>, SymbolTables) {
        let program = parse_source(src, FileId(0)).unwrap();
        let mut tables = SymbolTables::new();
        register(&program, &mut tables);
        let units = vec![program];
        bind(&units, &mut tables);
        (units, tables)
    }

    fn answer(_: &mut NativeArgs<'_>) -> NativeResult {
        Ok(RuntimeValue::Int(42))
    }

    #[test]
    fn test_linker_binds_declared_prototype() {
        let (_units, tables) = native_tables("import int answer(); import float sqrt(float x);");
        let mut natives = Natives::new();
        let mut linker = Linker::new(&tables, &mut natives, None);
        linker.bind_function(&["answer"], &[], answer).unwrap();
        assert!(linker.bind_function(&["sqrt"], &[Type::Int], answer).is_err());

        let decl = tables.find_function(&["answer"], &[]).unwrap();
        assert!(natives.is_bound(&decl));
        let sqrt = tables.find_function(&["sqrt"], &[Type::Float]).unwrap();
        assert!(!natives.is_bound(&sqrt));
    }

    #[test]
    fn test_binding_does_not_outlive_declaration() {
        let mut natives = Natives::new();
        let decl = {
            let (_units, tables) = native_tables("import int answer();");
            let decl = tables.find_function(&["answer"], &[]).unwrap();
            natives.bind(&decl, Rc::new(answer));
            Rc::downgrade(&decl)
        };
        assert!(decl.upgrade().is_none());
        let (_units, tables) = native_tables("import int answer();");
        let fresh = tables.find_function(&["answer"], &[]).unwrap();
        assert!(!natives.is_bound(&fresh));
    }

    #[test]
    fn test_context_downcast() {
        let (_units, tables) = native_tables("");
        let mut natives = Natives::new();
        let mut counter: u32 = 7;
        let extension = Some(&mut counter as &mut (dyn Any + 'static));
        let mut linker = Linker::new(&tables, &mut natives, extension);
        assert_eq!(linker.context::<u32>().copied(), Some(7));
        assert!(linker.context::<String>().is_none());
    }

    #[test]
    fn test_args_write_through_references() {
        let mut env = Env::new();
        env.push(RuntimeValue::Int(1));
        env.push(RuntimeValue::Ref(Place::Stack(0)));
        env.push(RuntimeValue::Int(9));
        let mut args = NativeArgs::new(&mut env, 1, 2);
        assert_eq!(args.int(0).unwrap(), 1);
        args.set(0, RuntimeValue::Int(5)).unwrap();
        args.set(1, RuntimeValue::Int(6)).unwrap();
        assert!(args.string(1).is_err());
        assert!(args.get(2).is_err());
        assert!(matches!(env.slot(0).unwrap(), RuntimeValue::Int(5)));
        assert!(matches!(env.slot(2).unwrap(), RuntimeValue::Int(6)));
    }
}
