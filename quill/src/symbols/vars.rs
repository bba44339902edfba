//! Scoped variable table
//!
//! A stack of name maps where index 0 is the global scope. A barrier scope
//! (a global function body or a class body) hides every enclosing scope
//! except the global one.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::VarDecl;

#[derive(Debug, Clone, Default)]
struct VarScope {
    vars: HashMap<String, Rc<VarDecl>>,
    barrier: bool,
}

/// Stack-based scope management for name binding
#[derive(Debug, Clone)]
pub struct VarTable {
    /// Stack of scopes, index 0 is global
    scopes: Vec<VarScope>,
}

impl VarTable {
    pub fn new() -> Self {
        Self { scopes: vec![VarScope::default()] }
    }

    pub fn begin_scope(&mut self, barrier: bool) {
        self.scopes.push(VarScope { vars: HashMap::new(), barrier });
    }

    /// Pop the innermost scope; the global scope is never popped
    pub fn end_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    /// Declare `name` in the innermost scope, returning the clashing declaration on failure
    pub fn insert(&mut self, name: &str, decl: Rc<VarDecl>) -> Result<(), Rc<VarDecl>> {
        let innermost = self.scopes.len() - 1;
        let scope = &mut self.scopes[innermost];
        if let Some(previous) = scope.vars.get(name) {
            return Err(Rc::clone(previous));
        }
        scope.vars.insert(name.to_string(), decl);
        Ok(())
    }

    /// Innermost visible declaration of `name`
    pub fn find(&self, name: &str) -> Option<Rc<VarDecl>> {
        for scope in self.scopes[1..].iter().rev() {
            if let Some(decl) = scope.vars.get(name) {
                return Some(Rc::clone(decl));
            }
            if scope.barrier {
                break;
            }
        }
        self.find_global(name)
    }

    /// Declaration of `name` in the innermost scope only
    pub fn find_in_scope(&self, name: &str) -> Option<Rc<VarDecl>> {
        self.scopes.last().and_then(|s| s.vars.get(name)).cloned()
    }

    pub fn find_global(&self, name: &str) -> Option<Rc<VarDecl>> {
        self.scopes[0].vars.get(name).cloned()
    }

    /// Every name `find` could see from the innermost scope
    pub fn visible_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for scope in self.scopes[1..].iter().rev() {
            names.extend(scope.vars.keys().map(String::as_str));
            if scope.barrier {
                break;
            }
        }
        names.extend(self.scopes[0].vars.keys().map(String::as_str));
        names
    }

    pub fn globals(&self) -> impl Iterator<Item = (&String, &Rc<VarDecl>)> {
        self.scopes[0].vars.iter()
    }
}

impl Default for VarTable {
    fn default() -> Self {
        Self::new()
    }
}
