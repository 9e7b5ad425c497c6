// Expression tree consumed by the evaluator.
// There is no grammar here: front ends build these nodes directly.

use crate::runtime::string_pool::{intern, PooledStr};
use std::fmt;
use std::rc::Rc;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol(pub PooledStr);

impl Symbol {
    pub fn new(s: &str) -> Self {
        Symbol(intern(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Logical(bool),
    Integer(i64),
    Double(f64),
    String(PooledStr),
}

/// Formal parameter of a function, with an optional default expression
/// evaluated lazily in the callee's frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Formal {
    pub name: Symbol,
    pub default: Option<Rc<Expression>>,
}

impl Formal {
    pub fn new(name: &str) -> Self {
        Formal {
            name: Symbol::new(name),
            default: None,
        }
    }

    pub fn with_default(name: &str, default: Expression) -> Self {
        Formal {
            name: Symbol::new(name),
            default: Some(Rc::new(default)),
        }
    }
}

/// Actual argument at a call site.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<Symbol>,
    pub value: Rc<Expression>,
}

impl Argument {
    pub fn positional(value: Expression) -> Self {
        Argument {
            name: None,
            value: Rc::new(value),
        }
    }

    pub fn named(name: &str, value: Expression) -> Self {
        Argument {
            name: Some(Symbol::new(name)),
            value: Rc::new(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignScope {
    /// `<-`: bind in the current environment only.
    Local,
    /// `<<-`: rebind the nearest existing binding above the current
    /// environment, or create it in the root.
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub target: Symbol,
    /// One-based positions; empty for a plain assignment.
    pub path: Vec<Expression>,
    pub value: Box<Expression>,
    pub scope: AssignScope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expression>,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub formals: Rc<[Formal]>,
    pub body: Rc<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub target: Box<Expression>,
    /// One-based position.
    pub index: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfExpr {
    pub condition: Box<Expression>,
    pub then_branch: Box<Expression>,
    pub else_branch: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Symbol(Symbol),
    Call(CallExpr),
    Function(FunctionExpr),
    Assign(AssignExpr),
    Index(IndexExpr),
    Block(Vec<Expression>),
    If(IfExpr),
    OnExit(Box<Expression>),
    /// Leaves the function whose frame is the current environment.
    Return(Box<Expression>),
}

impl Expression {
    pub fn null() -> Self {
        Expression::Literal(Literal::Null)
    }

    pub fn logical(b: bool) -> Self {
        Expression::Literal(Literal::Logical(b))
    }

    pub fn int(n: i64) -> Self {
        Expression::Literal(Literal::Integer(n))
    }

    pub fn double(x: f64) -> Self {
        Expression::Literal(Literal::Double(x))
    }

    pub fn string(s: &str) -> Self {
        Expression::Literal(Literal::String(intern(s)))
    }

    pub fn symbol(name: &str) -> Self {
        Expression::Symbol(Symbol::new(name))
    }

    /// Call of a named function with positional arguments.
    pub fn call(name: &str, args: Vec<Expression>) -> Self {
        Expression::call_with(
            Expression::symbol(name),
            args.into_iter().map(Argument::positional).collect(),
        )
    }

    pub fn call_with(callee: Expression, arguments: Vec<Argument>) -> Self {
        Expression::Call(CallExpr {
            callee: Box::new(callee),
            arguments,
        })
    }

    pub fn function(formals: &[&str], body: Expression) -> Self {
        Expression::function_with(formals.iter().map(|f| Formal::new(f)).collect(), body)
    }

    pub fn function_with(formals: Vec<Formal>, body: Expression) -> Self {
        Expression::Function(FunctionExpr {
            formals: formals.into(),
            body: Rc::new(body),
        })
    }

    pub fn assign(name: &str, value: Expression) -> Self {
        Expression::assign_form(name, Vec::new(), value, AssignScope::Local)
    }

    pub fn assign_parent(name: &str, value: Expression) -> Self {
        Expression::assign_form(name, Vec::new(), value, AssignScope::Parent)
    }

    /// `name[[i]][[j]]... <- value`
    pub fn assign_index(name: &str, path: Vec<Expression>, value: Expression) -> Self {
        Expression::assign_form(name, path, value, AssignScope::Local)
    }

    /// `name[[i]][[j]]... <<- value`
    pub fn assign_parent_index(name: &str, path: Vec<Expression>, value: Expression) -> Self {
        Expression::assign_form(name, path, value, AssignScope::Parent)
    }

    fn assign_form(
        name: &str,
        path: Vec<Expression>,
        value: Expression,
        scope: AssignScope,
    ) -> Self {
        Expression::Assign(AssignExpr {
            target: Symbol::new(name),
            path,
            value: Box::new(value),
            scope,
        })
    }

    pub fn index(target: Expression, index: Expression) -> Self {
        Expression::Index(IndexExpr {
            target: Box::new(target),
            index: Box::new(index),
        })
    }

    pub fn block(expressions: Vec<Expression>) -> Self {
        Expression::Block(expressions)
    }

    pub fn if_else(condition: Expression, then_branch: Expression, else_branch: Expression) -> Self {
        Expression::If(IfExpr {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Some(Box::new(else_branch)),
        })
    }

    pub fn when(condition: Expression, then_branch: Expression) -> Self {
        Expression::If(IfExpr {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: None,
        })
    }

    pub fn on_exit(action: Expression) -> Self {
        Expression::OnExit(Box::new(action))
    }

    pub fn return_with(value: Expression) -> Self {
        Expression::Return(Box::new(value))
    }
}
