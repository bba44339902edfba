//! Type AST nodes and the resolved type model

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Serialize, Serializer};

use super::{ClassDecl, Span, Spanned};

/// Non-owning handle to a class declaration, compared by identity
#[derive(Clone)]
pub struct ClassRef(Weak<ClassDecl>);

impl ClassRef {
    pub fn new(decl: &Rc<ClassDecl>) -> Self {
        Self(Rc::downgrade(decl))
    }

    pub fn get(&self) -> Option<Rc<ClassDecl>> {
        self.0.upgrade()
    }

    pub fn is(&self, decl: &Rc<ClassDecl>) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(decl))
    }

    pub fn name(&self) -> String {
        self.get()
            .map(|c| c.qualified_name())
            .unwrap_or_else(|| "<dropped class>".to_string())
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef({})", self.name())
    }
}

impl Serialize for ClassRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// Resolved type of an expression or declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    Int,
    Float,
    String,
    Void,
    /// Type of the `nil` literal
    Nil,
    /// Poisoned type of an expression that already produced a diagnostic
    Error,
    /// Instance of a class
    Named(ClassRef),
    /// `dims`-dimensional array; `elem` is never itself an array
    Array { dims: usize, elem: Box<Type> },
    FunctionPointer {
        ret: Box<Type>,
        params: Vec<Type>,
        /// Owning class for pointers taken from a member function
        class: Option<ClassRef>,
    },
}

impl Type {
    /// Wrap `elem` into `dims` array dimensions, flattening nested arrays
    pub fn array(elem: Type, dims: usize) -> Type {
        if dims == 0 {
            return elem;
        }
        match elem {
            Type::Array { dims: inner, elem } => Type::Array { dims: inner + dims, elem },
            elem => Type::Array { dims, elem: Box::new(elem) },
        }
    }

    /// Type produced by indexing once, `None` for non-arrays
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::Array { dims: 1, elem } => Some((**elem).clone()),
            Type::Array { dims, elem } => Some(Type::Array { dims: dims - 1, elem: elem.clone() }),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Type equality where function pointers ignore the class they came from
    pub fn same_as(&self, other: &Type) -> bool {
        match (self, other) {
            (
                Type::FunctionPointer { ret: r1, params: p1, .. },
                Type::FunctionPointer { ret: r2, params: p2, .. },
            ) => {
                r1.same_as(r2)
                    && p1.len() == p2.len()
                    && p1.iter().zip(p2).all(|(x, y)| x.same_as(y))
            }
            (Type::Array { dims: d1, elem: e1 }, Type::Array { dims: d2, elem: e2 }) => {
                d1 == d2 && e1.same_as(e2)
            }
            _ => self == other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Types whose values are shared handles and accept `nil`
    pub fn is_pointer_like(&self) -> bool {
        matches!(
            self,
            Type::Named(_) | Type::Array { .. } | Type::FunctionPointer { .. } | Type::Nil
        )
    }

    pub fn class(&self) -> Option<Rc<ClassDecl>> {
        match self {
            Type::Named(class) => class.get(),
            _ => None,
        }
    }

    /// Whether a value of type `self` may be stored where `other` is expected
    pub fn is_compatible_with(&self, other: &Type) -> bool {
        if self.is_error() || other.is_error() {
            return false;
        }
        if self == other {
            return true;
        }
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Type::Nil, b) if b.is_pointer_like() => true,
            (a, Type::Nil) if a.is_pointer_like() => true,
            (
                Type::FunctionPointer { ret: r1, params: p1, .. },
                Type::FunctionPointer { ret: r2, params: p2, .. },
            ) => r1 == r2 && p1 == p2,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Nil => write!(f, "nil"),
            Type::Error => write!(f, "<error>"),
            Type::Named(class) => write!(f, "{}", class.name()),
            Type::Array { dims, elem } => {
                write!(f, "{elem}")?;
                for _ in 0..*dims {
                    write!(f, "[]")?;
                }
                Ok(())
            }
            Type::FunctionPointer { ret, params, .. } => {
                write!(f, "function<{ret}(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")>")
            }
        }
    }
}

/// Base of a written type
#[derive(Debug, Serialize)]
pub enum TypeExprKind {
    Int,
    Float,
    String,
    Void,
    /// Dotted class/typedef path, `global` when written with a leading `::`
    Named { global: bool, path: Vec<Spanned<String>> },
    /// `function<ret(params)>`
    Function { ret: Box<TypeExpr>, params: Vec<TypeExpr> },
}

/// A type as written in the source, resolved by the binder
#[derive(Debug, Serialize)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    /// Dimensions written as `[]` after the base type
    pub array_dims: usize,
    pub is_reference: bool,
    pub span: Span,
    #[serde(skip)]
    pub resolved: RefCell<Option<Type>>,
}

impl TypeExpr {
    pub fn new(kind: TypeExprKind, span: Span) -> Self {
        Self {
            kind,
            array_dims: 0,
            is_reference: false,
            span,
            resolved: RefCell::new(None),
        }
    }

    /// Resolved type, `Type::Error` until the binder ran
    pub fn ty(&self) -> Type {
        self.resolved.borrow().clone().unwrap_or(Type::Error)
    }

    pub fn set_resolved(&self, ty: Type) {
        *self.resolved.borrow_mut() = Some(ty);
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeExprKind::Void) && self.array_dims == 0
    }

    /// Type of a primitive base without consulting any symbol table
    pub fn primitive(&self) -> Option<Type> {
        match self.kind {
            TypeExprKind::Int => Some(Type::Int),
            TypeExprKind::Float => Some(Type::Float),
            TypeExprKind::String => Some(Type::String),
            TypeExprKind::Void => Some(Type::Void),
            TypeExprKind::Named { .. } | TypeExprKind::Function { .. } => None,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Int => write!(f, "int")?,
            TypeExprKind::Float => write!(f, "float")?,
            TypeExprKind::String => write!(f, "string")?,
            TypeExprKind::Void => write!(f, "void")?,
            TypeExprKind::Named { global, path } => {
                if *global {
                    write!(f, "::")?;
                }
                let names: Vec<&str> = path.iter().map(|s| s.node.as_str()).collect();
                write!(f, "{}", names.join("."))?;
            }
            TypeExprKind::Function { ret, params } => {
                write!(f, "function<{ret}(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")>")?;
            }
        }
        for _ in 0..self.array_dims {
            write!(f, "[]")?;
        }
        if self.is_reference {
            write!(f, "&")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_flattens_nested_dims() {
        let inner = Type::array(Type::Int, 2);
        let outer = Type::array(inner, 1);
        assert_eq!(outer, Type::Array { dims: 3, elem: Box::new(Type::Int) });
        assert_eq!(Type::array(Type::Float, 0), Type::Float);
    }

    #[test]
    fn test_element_peels_one_dimension() {
        let ty = Type::array(Type::String, 2);
        let once = ty.element().unwrap();
        assert_eq!(once, Type::array(Type::String, 1));
        assert_eq!(once.element(), Some(Type::String));
        assert_eq!(Type::Int.element(), None);
    }

    #[test]
    fn test_numeric_compatibility() {
        assert!(Type::Int.is_compatible_with(&Type::Float));
        assert!(Type::Float.is_compatible_with(&Type::Int));
        assert!(!Type::String.is_compatible_with(&Type::Int));
    }

    #[test]
    fn test_nil_compatibility() {
        let arr = Type::array(Type::Int, 1);
        assert!(Type::Nil.is_compatible_with(&arr));
        assert!(arr.is_compatible_with(&Type::Nil));
        assert!(!Type::Nil.is_compatible_with(&Type::Int));
    }

    #[test]
    fn test_error_is_never_compatible() {
        assert!(!Type::Error.is_compatible_with(&Type::Error));
        assert!(!Type::Int.is_compatible_with(&Type::Error));
    }

    #[test]
    fn test_function_pointer_compatibility_ignores_class() {
        let pointer = |param: Type| Type::FunctionPointer {
            ret: Box::new(Type::Int),
            params: vec![param],
            class: None,
        };
        let plain = pointer(Type::Int);
        let other = pointer(Type::Float);
        assert!(plain.is_compatible_with(&plain.clone()));
        assert!(!plain.is_compatible_with(&other));
    }

    #[test]
    fn test_type_display() {
        assert_eq!(Type::array(Type::Int, 2).to_string(), "int[][]");
        let fp = Type::FunctionPointer {
            ret: Box::new(Type::Void),
            params: vec![Type::Int, Type::String],
            class: None,
        };
        assert_eq!(fp.to_string(), "function<void(int, string)>");
    }

    #[test]
    fn test_type_expr_display() {
        let span = Span::default();
        let mut ty = TypeExpr::new(
            TypeExprKind::Named {
                global: true,
                path: vec![
                    Spanned::new("Outer".to_string(), span),
                    Spanned::new("Inner".to_string(), span),
                ],
            },
            span,
        );
        ty.array_dims = 1;
        ty.is_reference = true;
        assert_eq!(ty.to_string(), "::Outer.Inner[]&");
        assert_eq!(ty.ty(), Type::Error);
    }
}
