//! Class and typedef table
//!
//! Classes form a tree that mirrors their lexical nesting. Node 0 is the
//! global scope; every class and typedef is a child of the scope it was
//! declared in.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{ClassDecl, Span, Type, TypedefDecl};

/// Index of a node in the class tree
pub type ScopeId = usize;

/// The global scope
pub const ROOT: ScopeId = 0;

/// What a class-table name refers to
#[derive(Debug, Clone)]
pub enum ClassEntry {
    Class(Rc<ClassDecl>),
    Typedef(Rc<TypedefDecl>),
}

impl ClassEntry {
    pub fn span(&self) -> Span {
        match self {
            ClassEntry::Class(decl) => decl.name.span,
            ClassEntry::Typedef(decl) => decl.name.span,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<ClassDecl>> {
        match self {
            ClassEntry::Class(decl) => Some(decl),
            ClassEntry::Typedef(_) => None,
        }
    }

    /// Class this entry denotes once typedefs are resolved
    pub fn target_class(&self) -> Option<Rc<ClassDecl>> {
        match self {
            ClassEntry::Class(decl) => Some(Rc::clone(decl)),
            ClassEntry::Typedef(decl) => decl.target.ty().class(),
        }
    }

    /// Resolved type named by this entry
    pub fn ty(&self) -> Type {
        match self {
            ClassEntry::Class(decl) => Type::Named(crate::ast::ClassRef::new(decl)),
            ClassEntry::Typedef(decl) => decl.target.ty(),
        }
    }
}

#[derive(Debug, Clone)]
struct ClassNode {
    entry: Option<ClassEntry>,
    parent: Option<ScopeId>,
    children: HashMap<String, ScopeId>,
}

#[derive(Debug, Clone)]
pub struct ClassTable {
    nodes: Vec<ClassNode>,
    current: ScopeId,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            nodes: vec![ClassNode { entry: None, parent: None, children: HashMap::new() }],
            current: ROOT,
        }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    fn add_child(&mut self, name: &str, entry: ClassEntry) -> Result<ScopeId, ClassEntry> {
        if let Some(existing) = self.find_in_scope(self.current, name) {
            return Err(existing);
        }
        let id = self.nodes.len();
        let parent = Some(self.current);
        let node = ClassNode { entry: Some(entry), parent, children: HashMap::new() };
        self.nodes.push(node);
        self.nodes[self.current].children.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare a class in the current scope and descend into it
    pub fn begin_scope(&mut self, name: &str, decl: &Rc<ClassDecl>) -> Result<ScopeId, ClassEntry> {
        let id = self.add_child(name, ClassEntry::Class(Rc::clone(decl)))?;
        decl.scope.set(Some(id));
        self.current = id;
        Ok(id)
    }

    /// Return to the enclosing scope
    pub fn end_scope(&mut self) {
        self.current = self.nodes[self.current].parent.unwrap_or(ROOT);
    }

    /// Declare a typedef in the current scope
    pub fn insert_typedef(
        &mut self,
        name: &str,
        decl: &Rc<TypedefDecl>,
    ) -> Result<ScopeId, ClassEntry> {
        self.add_child(name, ClassEntry::Typedef(Rc::clone(decl)))
    }

    pub fn child(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        self.nodes.get(scope)?.children.get(name).copied()
    }

    pub fn entry(&self, scope: ScopeId) -> Option<&ClassEntry> {
        self.nodes.get(scope)?.entry.as_ref()
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.nodes.get(scope)?.parent
    }

    /// Entry declared directly in `scope` under `name`
    pub fn find_in_scope(&self, scope: ScopeId, name: &str) -> Option<ClassEntry> {
        self.child(scope, name).and_then(|id| self.entry(id)).cloned()
    }

    /// Look up a dotted path from the global scope
    pub fn find(&self, path: &[&str]) -> Option<ClassEntry> {
        let node = self.resolve_path(ROOT, path)?;
        self.entry(node).cloned()
    }

    /// Look up a dotted path starting in `scope` and moving outward to the root
    pub fn find_within_scope(&self, scope: ScopeId, path: &[&str]) -> Option<ClassEntry> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if self.child(s, path.first()?).is_some() {
                let node = self.resolve_path(s, path)?;
                return self.entry(node).cloned();
            }
            current = self.parent(s);
        }
        None
    }

    /// Follow `path` from `start`; inner typedef segments continue in their target class
    fn resolve_path(&self, start: ScopeId, path: &[&str]) -> Option<ScopeId> {
        let (last, inner) = path.split_last()?;
        let mut scope = start;
        for segment in inner {
            let node = self.child(scope, segment)?;
            scope = match self.entry(node)? {
                ClassEntry::Class(_) => node,
                ClassEntry::Typedef(decl) => decl.target.ty().class()?.scope.get()?,
            };
        }
        self.child(scope, last)
    }

    /// Names visible from `scope`, innermost first
    pub fn visible_names(&self, scope: ScopeId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(scope);
        while let Some(s) = current {
            names.extend(self.nodes[s].children.keys().map(String::as_str));
            current = self.parent(s);
        }
        names
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}
