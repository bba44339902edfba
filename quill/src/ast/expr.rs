//! Expression AST nodes

use std::cell::RefCell;
use std::rc::Weak;

use serde::Serialize;

use super::{ClassRef, FnDecl, Span, Spanned, Type, VarDecl};

/// Expression with its resolved type slot
#[derive(Debug, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    #[serde(skip)]
    pub ty: RefCell<Option<Type>>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: RefCell::new(None),
        }
    }

    /// Type assigned by the type checker, `Type::Error` before that
    pub fn ty(&self) -> Type {
        self.ty.borrow().clone().unwrap_or(Type::Error)
    }

    pub fn set_ty(&self, ty: Type) {
        *self.ty.borrow_mut() = Some(ty);
    }
}

#[derive(Debug, Serialize)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Nil,
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Var(VarRef),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Field(FieldRef),
    Call(CallExpr),
}

/// Simple name reference
#[derive(Debug, Serialize)]
pub struct VarRef {
    pub name: String,
    /// Written with a leading `::`
    pub global: bool,
    #[serde(skip)]
    pub binding: RefCell<Option<Binding>>,
}

impl VarRef {
    pub fn binding(&self) -> Option<Binding> {
        self.binding.borrow().clone()
    }

    pub fn bind(&self, binding: Binding) {
        *self.binding.borrow_mut() = Some(binding);
    }
}

/// `base.name`
#[derive(Debug, Serialize)]
pub struct FieldRef {
    pub base: Box<Expr>,
    pub name: Spanned<String>,
    #[serde(skip)]
    pub member: RefCell<Option<Member>>,
}

impl FieldRef {
    pub fn member(&self) -> Option<Member> {
        self.member.borrow().clone()
    }

    pub fn resolve(&self, member: Member) {
        *self.member.borrow_mut() = Some(member);
    }
}

/// `callee(args)`
#[derive(Debug, Serialize)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    #[serde(skip)]
    pub target: RefCell<Option<CallTarget>>,
}

impl CallExpr {
    pub fn target(&self) -> Option<CallTarget> {
        self.target.borrow().clone()
    }

    pub fn resolve(&self, target: CallTarget) {
        *self.target.borrow_mut() = Some(target);
    }
}

/// What a simple name refers to
#[derive(Debug, Clone)]
pub enum Binding {
    Variable(Weak<VarDecl>),
    /// Candidate functions, narrowed by the type checker
    Overloads(Vec<Weak<FnDecl>>),
    /// Function chosen when the name is used as a value
    Function(Weak<FnDecl>),
    Class(ClassRef),
}

/// What `base.name` refers to
#[derive(Debug, Clone)]
pub enum Member {
    Field(Weak<VarDecl>),
    Methods(Vec<Weak<FnDecl>>),
    /// Method chosen when the member is used as a value
    Method(Weak<FnDecl>),
    /// Nested class reached through a type path
    Class(ClassRef),
}

/// Resolved callee of a call expression
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Global function, or a method of the enclosing class called on `this`
    Function(Weak<FnDecl>),
    /// Method called on the object produced by the callee's base
    Method(Weak<FnDecl>),
    /// Object construction, with the constructor when the class declares one
    Constructor { class: ClassRef, ctor: Option<Weak<FnDecl>> },
    /// Indirect call through a function pointer value
    Pointer,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{s}")
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "!"),
        }
    }
}
