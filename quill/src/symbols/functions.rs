//! Global function table with overload sets

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{FnDecl, Type, TypeExprKind, VarDecl};

/// Every declaration sharing one name
#[derive(Debug, Clone, Default)]
pub struct OverloadSet {
    pub decls: Vec<Rc<FnDecl>>,
    /// At least one overload is implemented in script
    pub has_body: bool,
}

impl OverloadSet {
    /// Overload whose resolved prototype equals `prototype`
    pub fn find_exact(&self, prototype: &[Type]) -> Option<&Rc<FnDecl>> {
        self.decls.iter().find(|d| {
            let own = d.prototype();
            own.len() == prototype.len() && own.iter().zip(prototype).all(|(a, b)| a.same_as(b))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    sets: HashMap<String, OverloadSet>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an overload, returning the declaration with an identical prototype on failure
    pub fn insert(&mut self, decl: Rc<FnDecl>) -> Result<(), Rc<FnDecl>> {
        let set = self.sets.entry(decl.name.node.clone()).or_default();
        if let Some(previous) = find_same_prototype(&set.decls, &decl) {
            return Err(Rc::clone(previous));
        }
        set.has_body |= decl.body.is_some();
        set.decls.push(decl);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&OverloadSet> {
        self.sets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

/// Written parameter type used to compare prototypes before types are resolved
///
/// Reference-ness is not part of the prototype.
fn param_key(param: &VarDecl) -> String {
    let mut key = base_key(&param.ty.kind);
    for _ in 0..param.ty.array_dims + param.dims.len() {
        key.push_str("[]");
    }
    key
}

fn base_key(kind: &TypeExprKind) -> String {
    match kind {
        TypeExprKind::Int => "int".to_string(),
        TypeExprKind::Float => "float".to_string(),
        TypeExprKind::String => "string".to_string(),
        TypeExprKind::Void => "void".to_string(),
        TypeExprKind::Named { global, path } => {
            let names: Vec<&str> = path.iter().map(|s| s.node.as_str()).collect();
            format!("{}{}", if *global { "::" } else { "" }, names.join("."))
        }
        TypeExprKind::Function { ret, params } => {
            let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
            format!("function<{}({})>", ret, params.join(","))
        }
    }
}

/// Whether two declarations have the same parameter list as written
pub fn same_prototype(a: &FnDecl, b: &FnDecl) -> bool {
    a.params.len() == b.params.len()
        && a.params.iter().zip(&b.params).all(|(x, y)| param_key(x) == param_key(y))
}

/// Declaration among `decls` with the same parameter list as `decl`
pub fn find_same_prototype<'a>(decls: &'a [Rc<FnDecl>], decl: &FnDecl) -> Option<&'a Rc<FnDecl>> {
    decls.iter().find(|d| same_prototype(d, decl))
}
