// Runtime value system
// Values live in the heap arena and are referred to by `ValueId`.

use crate::ast::{Expression, Formal};
use crate::runtime::arena::Handle;
use crate::runtime::environment::EnvId;
use crate::runtime::error::RuntimeResult;
use crate::runtime::evaluator::Evaluator;
use crate::runtime::string_pool::PooledStr;
use std::fmt;
use std::rc::Rc;

/// Opaque identity of a heap value. Two ids are equal exactly when they
/// name the same allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) Handle);

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({:?})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<value {:?}>", self.0)
    }
}

/// Approximate reference count. Saturates at `Many` and never comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefCount {
    Zero,
    One,
    Many,
}

impl RefCount {
    pub fn increment(self) -> RefCount {
        match self {
            RefCount::Zero => RefCount::One,
            RefCount::One | RefCount::Many => RefCount::Many,
        }
    }

    /// `Many` stays `Many`: once shared, always treated as shared.
    pub fn decrement(self) -> RefCount {
        match self {
            RefCount::One => RefCount::Zero,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Logical,
    Integer,
    Double,
    Character,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Logical => "logical",
            ScalarKind::Integer => "integer",
            ScalarKind::Double => "double",
            ScalarKind::Character => "character",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Logical(bool),
    Integer(i64),
    Double(f64),
    Str(PooledStr),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Logical(_) => ScalarKind::Logical,
            Scalar::Integer(_) => ScalarKind::Integer,
            Scalar::Double(_) => ScalarKind::Double,
            Scalar::Str(_) => ScalarKind::Character,
        }
    }

    /// Converts upward along logical < integer < double < character.
    /// Downward requests return the scalar unchanged.
    pub fn coerce(&self, kind: ScalarKind) -> Scalar {
        if kind <= self.kind() {
            return self.clone();
        }
        match (self, kind) {
            (Scalar::Logical(b), ScalarKind::Integer) => Scalar::Integer(*b as i64),
            (Scalar::Logical(b), ScalarKind::Double) => Scalar::Double(if *b { 1.0 } else { 0.0 }),
            (Scalar::Integer(n), ScalarKind::Double) => Scalar::Double(*n as f64),
            (_, ScalarKind::Character) => {
                Scalar::Str(crate::runtime::string_pool::intern(&self.to_string()))
            }
            _ => self.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Logical(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Integer(n) => Some(*n as f64),
            Scalar::Double(x) => Some(*x),
            Scalar::Str(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Logical(true) => write!(f, "TRUE"),
            Scalar::Logical(false) => write!(f, "FALSE"),
            Scalar::Integer(n) => write!(f, "{}", n),
            Scalar::Double(x) => write!(f, "{}", x),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Homogeneous vector of scalars. Mixed input is coerced to the highest kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicVector {
    kind: ScalarKind,
    elements: Vec<Scalar>,
}

impl AtomicVector {
    pub fn from_scalars(elements: Vec<Scalar>) -> Self {
        let kind = elements
            .iter()
            .map(Scalar::kind)
            .max()
            .unwrap_or(ScalarKind::Logical);
        let elements = elements.into_iter().map(|s| s.coerce(kind)).collect();
        AtomicVector { kind, elements }
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn elements(&self) -> &[Scalar] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Writes `scalar` at `index`, appending when `index == len`. Widens the
    /// whole vector when the new element has a higher kind.
    pub(crate) fn set(&mut self, index: usize, scalar: Scalar) -> bool {
        if index > self.elements.len() {
            return false;
        }
        if scalar.kind() > self.kind {
            self.kind = scalar.kind();
            let kind = self.kind;
            for element in self.elements.iter_mut() {
                *element = element.coerce(kind);
            }
        }
        let scalar = scalar.coerce(self.kind);
        if index == self.elements.len() {
            self.elements.push(scalar);
        } else {
            self.elements[index] = scalar;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arity {
    Fixed(usize),
    Variadic(usize), // Minimum number of arguments
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == *n,
            Arity::Variadic(min) => count >= *min,
            Arity::Range(min, max) => count >= *min && count <= *max,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic(min) => write!(f, "at least {}", min),
            Arity::Range(min, max) => write!(f, "{}-{}", min, max),
        }
    }
}

pub type BuiltinFn = fn(&mut Evaluator, &[ValueId], EnvId) -> RuntimeResult<ValueId>;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub func: BuiltinFn,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        // Compare builtin functions by name and arity, not by function pointer
        self.name == other.name && self.arity == other.arity
    }
}

/// User function: formals, body and the environment it was created in.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub formals: Rc<[Formal]>,
    pub body: Rc<Expression>,
    pub env: EnvId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Builtin(BuiltinFunction),
    Closure(Closure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Scalar(Scalar),
    Vector(AtomicVector),
    /// Elements are references; each membership counts toward the
    /// element's refcount.
    List(Vec<ValueId>),
    Function(Function),
    /// Environments are shared by reference and never copied.
    Environment(EnvId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Scalar(s) => s.kind().name(),
            Value::Vector(v) => v.kind().name(),
            Value::List(_) => "list",
            Value::Function(Function::Builtin(_)) => "builtin",
            Value::Function(Function::Closure(_)) => "closure",
            Value::Environment(_) => "environment",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Scalar view of a scalar or a length-one vector.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Vector(v) if v.len() == 1 => v.elements().first(),
            _ => None,
        }
    }

    /// Elements of a scalar, vector or NULL, for builtins that treat a
    /// scalar as a vector of length one.
    pub fn scalars(&self) -> Option<Vec<Scalar>> {
        match self {
            Value::Null => Some(Vec::new()),
            Value::Scalar(s) => Some(vec![s.clone()]),
            Value::Vector(v) => Some(v.elements().to_vec()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Vector(v) => v.len(),
            Value::List(items) => items.len(),
            Value::Scalar(_) | Value::Function(_) | Value::Environment(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
