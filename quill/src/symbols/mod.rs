//! Symbol tables shared by the semantic passes
//!
//! The three tables are bundled so a session can snapshot them with one
//! `clone()` before a run and swap the copy in only when the run succeeds.

use std::rc::Rc;

use crate::ast::{ClassDecl, FnDecl, Type};

mod classes;
mod functions;
mod vars;

pub use classes::{ClassEntry, ClassTable, ROOT, ScopeId};
pub use functions::{FunctionTable, OverloadSet, find_same_prototype, same_prototype};
pub use vars::VarTable;

#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    pub vars: VarTable,
    pub classes: ClassTable,
    pub functions: FunctionTable,
}

impl SymbolTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class named by a dotted path from global scope, following typedefs
    pub fn find_class(&self, path: &[&str]) -> Option<Rc<ClassDecl>> {
        self.classes.find(path)?.target_class()
    }

    /// Function or method with exactly `prototype`
    ///
    /// A one-segment path names a global function; longer paths name a
    /// method of the class given by the leading segments.
    pub fn find_function(&self, path: &[&str], prototype: &[Type]) -> Option<Rc<FnDecl>> {
        match path {
            [] => None,
            [name] => self.functions.find(name)?.find_exact(prototype).cloned(),
            [class_path @ .., name] => {
                let class = self.find_class(class_path)?;
                class.methods_named(name).into_iter().find(|m| m.prototype() == prototype).cloned()
            }
        }
    }
}
