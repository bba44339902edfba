//! Abstract Syntax Tree definitions

mod expr;
mod span;
mod types;
pub mod visit;

pub use expr::*;
pub use span::*;
pub use types::*;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::Serialize;

/// A parsed source text: a sequence of statements
#[derive(Debug, Serialize)]
pub struct Program {
    pub file: FileId,
    pub stmts: Vec<Stmt>,
}

/// Statement
#[derive(Debug, Serialize)]
pub enum Stmt {
    /// Lone `;`
    Empty(Span),
    Expr(Expr),
    VarDecl(Rc<VarDecl>),
    FnDecl(Rc<FnDecl>),
    ClassDecl(Rc<ClassDecl>),
    Typedef(Rc<TypedefDecl>),
    Block(Block),
    If(IfStmt),
    While(WhileStmt),
    Break(Span),
    Return(ReturnStmt),
    Directive(Directive),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Empty(span) | Stmt::Break(span) => *span,
            Stmt::Expr(expr) => expr.span,
            Stmt::VarDecl(decl) => decl.span,
            Stmt::FnDecl(decl) => decl.span,
            Stmt::ClassDecl(decl) => decl.span,
            Stmt::Typedef(decl) => decl.span,
            Stmt::Block(block) => block.span,
            Stmt::If(stmt) => stmt.span,
            Stmt::While(stmt) => stmt.span,
            Stmt::Return(stmt) => stmt.span,
            Stmt::Directive(directive) => directive.span,
        }
    }
}

/// `{ ... }`
#[derive(Debug, Serialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Serialize)]
pub struct IfStmt {
    pub cond: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Serialize)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Serialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirectiveKind {
    /// Parse the file and load the native module of the same name
    Import,
    /// Parse the file only
    Include,
}

/// `import "name";` / `include "name";`
#[derive(Debug, Serialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub target: Spanned<String>,
    pub span: Span,
}

/// Where a variable lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Storage {
    /// Absolute stack slot
    Global,
    /// Slot relative to the frame pointer
    #[default]
    Local,
    /// Function parameter, addressed like a local
    Param,
    /// Field of the object in frame slot 0
    Member,
}

/// Variable, parameter or member declaration
#[derive(Debug, Serialize)]
pub struct VarDecl {
    pub name: Spanned<String>,
    pub ty: TypeExpr,
    /// Declarator dimensions `name[3][n]`; `None` for `[]`
    pub dims: Vec<Option<Expr>>,
    /// `= expr`, or the default value of a parameter
    pub init: Option<Expr>,
    /// `Class name(args)`
    pub ctor_args: Option<Vec<Expr>>,
    pub span: Span,
    #[serde(skip)]
    pub storage: Cell<Storage>,
    #[serde(skip)]
    pub runtime_index: Cell<Option<usize>>,
    /// Constructor chosen for class-typed variables built without `=`
    #[serde(skip)]
    pub constructor: RefCell<Option<Weak<FnDecl>>>,
}

impl VarDecl {
    pub fn new(name: Spanned<String>, ty: TypeExpr, span: Span) -> Self {
        Self {
            name,
            ty,
            dims: Vec::new(),
            init: None,
            ctor_args: None,
            span,
            storage: Cell::new(Storage::Local),
            runtime_index: Cell::new(None),
            constructor: RefCell::new(None),
        }
    }

    /// Full declared type including declarator dimensions
    pub fn declared_type(&self) -> Type {
        Type::array(self.ty.ty(), self.dims.len())
    }

    pub fn is_reference(&self) -> bool {
        self.ty.is_reference
    }

    /// The outermost declarator dimension carries a size expression
    pub fn has_sized_dims(&self) -> bool {
        matches!(self.dims.first(), Some(Some(_)))
    }

    pub fn storage(&self) -> Storage {
        self.storage.get()
    }

    pub fn constructor(&self) -> Option<Rc<FnDecl>> {
        self.constructor.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_constructor(&self, ctor: &Rc<FnDecl>) {
        *self.constructor.borrow_mut() = Some(Rc::downgrade(ctor));
    }
}

/// Function, method, constructor or destructor declaration
#[derive(Debug, Serialize)]
pub struct FnDecl {
    pub name: Spanned<String>,
    /// `None` for constructors and destructors
    pub ret: Option<TypeExpr>,
    pub params: Vec<Rc<VarDecl>>,
    /// `None` for native prototypes
    pub body: Option<Block>,
    /// Declared with `import`, implemented by the host
    pub is_import: bool,
    pub span: Span,
    #[serde(skip)]
    pub owner: RefCell<Option<ClassRef>>,
}

impl FnDecl {
    pub fn return_type(&self) -> Type {
        self.ret.as_ref().map(TypeExpr::ty).unwrap_or(Type::Void)
    }

    /// Ordered parameter types, the identity used for overloading
    pub fn prototype(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.declared_type()).collect()
    }

    /// Resolved parameter types match those of `other` one for one
    pub fn same_parameters(&self, other: &FnDecl) -> bool {
        let (mine, theirs) = (self.prototype(), other.prototype());
        mine.len() == theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| a.same_as(b))
    }

    /// Parameters that must be supplied by the caller
    pub fn required_params(&self) -> usize {
        self.params.iter().take_while(|p| p.init.is_none()).count()
    }

    pub fn owner(&self) -> Option<Rc<ClassDecl>> {
        self.owner.borrow().as_ref().and_then(ClassRef::get)
    }

    pub fn is_destructor(&self) -> bool {
        self.name.node.starts_with('~')
    }

    /// `name(int, float&)` for diagnostics
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let ty = p.declared_type().to_string();
                if p.is_reference() { format!("{ty}&") } else { ty }
            })
            .collect();
        format!("{}({})", self.name.node, params.join(", "))
    }
}

/// `typedef target Name;`
#[derive(Debug, Serialize)]
pub struct TypedefDecl {
    pub name: Spanned<String>,
    pub target: TypeExpr,
    pub span: Span,
}

/// Class declaration with its precomputed layout
#[derive(Debug, Serialize)]
pub struct ClassDecl {
    pub name: Spanned<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
    /// `~Name`
    pub destructor_name: String,
    /// Member variables in slot order
    #[serde(skip)]
    pub fields: Vec<Rc<VarDecl>>,
    #[serde(skip)]
    pub methods: Vec<Rc<FnDecl>>,
    #[serde(skip)]
    pub classes: Vec<Rc<ClassDecl>>,
    #[serde(skip)]
    pub typedefs: Vec<Rc<TypedefDecl>>,
    /// Slots built automatically before the constructor runs
    #[serde(skip)]
    pub auto_constructed: Vec<usize>,
    /// Lexically enclosing class
    #[serde(skip)]
    pub parent: RefCell<Option<ClassRef>>,
    /// Node of this class in the class table
    #[serde(skip)]
    pub scope: Cell<Option<usize>>,
}

impl ClassDecl {
    pub fn new(name: Spanned<String>, body: Vec<Stmt>, span: Span) -> Self {
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut classes = Vec::new();
        let mut typedefs = Vec::new();
        for stmt in &body {
            match stmt {
                Stmt::VarDecl(decl) => fields.push(Rc::clone(decl)),
                Stmt::FnDecl(decl) => methods.push(Rc::clone(decl)),
                Stmt::ClassDecl(decl) => classes.push(Rc::clone(decl)),
                Stmt::Typedef(decl) => typedefs.push(Rc::clone(decl)),
                _ => {}
            }
        }

        let mut auto_constructed = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            field.storage.set(Storage::Member);
            field.runtime_index.set(Some(index));
            let class_typed = matches!(field.ty.kind, TypeExprKind::Named { .. })
                && field.ty.array_dims == 0
                && field.dims.is_empty();
            let needs_build = field.init.is_none()
                && !field.is_reference()
                && (field.has_sized_dims() || class_typed);
            if needs_build {
                auto_constructed.push(index);
            }
        }

        Self {
            destructor_name: format!("~{}", name.node),
            name,
            body,
            span,
            fields,
            methods,
            classes,
            typedefs,
            auto_constructed,
            parent: RefCell::new(None),
            scope: Cell::new(None),
        }
    }

    pub fn constructors(&self) -> impl Iterator<Item = &Rc<FnDecl>> {
        self.methods.iter().filter(move |m| m.name.node == self.name.node)
    }

    pub fn destructor(&self) -> Option<&Rc<FnDecl>> {
        self.methods.iter().find(|m| m.name.node == self.destructor_name)
    }

    pub fn methods_named(&self, name: &str) -> Vec<&Rc<FnDecl>> {
        self.methods.iter().filter(|m| m.name.node == name).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Rc<VarDecl>> {
        self.fields.iter().find(|f| f.name.node == name)
    }

    pub fn nested_class(&self, name: &str) -> Option<&Rc<ClassDecl>> {
        self.classes.iter().find(|c| c.name.node == name)
    }

    pub fn parent(&self) -> Option<Rc<ClassDecl>> {
        self.parent.borrow().as_ref().and_then(ClassRef::get)
    }

    /// `Outer.Inner`
    pub fn qualified_name(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}.{}", parent.qualified_name(), self.name.node),
            None => self.name.node.clone(),
        }
    }
}
