//! Standard library
//!
//! Strict builtins installed in the global environment. Arguments arrive
//! evaluated and protected; every value a builtin allocates goes through
//! `Evaluator::alloc` so it stays protected until the call returns.
//!
//! Categories:
//! - Construction: `c`, `list`, `length`
//! - Arithmetic and comparison, elementwise with recycling
//! - Environments: `new.env`, `environment`, `assign`, `get`, `exists`, `rm`
//! - Control and introspection: `emit`, `stop`, `gc`, `is.function`, `identical`

use crate::ast::Symbol;
use crate::runtime::environment::{EnvId, LookupMode};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::evaluator::Evaluator;
use crate::runtime::heap::Heap;
use crate::runtime::values::{
    Arity, AtomicVector, BuiltinFn, Function, Scalar, ScalarKind, Value, ValueId,
};

pub struct StandardLibrary;

impl StandardLibrary {
    /// Binds every builtin into the evaluator's global environment.
    pub(crate) fn install(evaluator: &mut Evaluator) -> RuntimeResult<()> {
        Self::load_construction_functions(evaluator)?;
        Self::load_arithmetic_functions(evaluator)?;
        Self::load_environment_functions(evaluator)?;
        Self::load_control_functions(evaluator)?;
        log::debug!(
            "standard library installed: {} bindings",
            evaluator.heap().environment(evaluator.global())?.len()
        );
        Ok(())
    }

    fn load(
        evaluator: &mut Evaluator,
        builtins: &[(&'static str, Arity, BuiltinFn)],
    ) -> RuntimeResult<()> {
        for (name, arity, func) in builtins {
            evaluator.define_builtin(*name, arity.clone(), *func)?;
        }
        Ok(())
    }

    fn load_construction_functions(evaluator: &mut Evaluator) -> RuntimeResult<()> {
        Self::load(
            evaluator,
            &[
                ("c", Arity::Variadic(0), Self::c),
                ("list", Arity::Variadic(0), Self::list),
                ("length", Arity::Fixed(1), Self::length),
            ],
        )
    }

    fn load_arithmetic_functions(evaluator: &mut Evaluator) -> RuntimeResult<()> {
        Self::load(
            evaluator,
            &[
                ("+", Arity::Fixed(2), Self::add),
                ("-", Arity::Fixed(2), Self::subtract),
                ("*", Arity::Fixed(2), Self::multiply),
                ("/", Arity::Fixed(2), Self::divide),
                ("==", Arity::Fixed(2), Self::equal),
                ("<", Arity::Fixed(2), Self::less_than),
                (">", Arity::Fixed(2), Self::greater_than),
                ("!", Arity::Fixed(1), Self::not),
            ],
        )
    }

    fn load_environment_functions(evaluator: &mut Evaluator) -> RuntimeResult<()> {
        Self::load(
            evaluator,
            &[
                ("new.env", Arity::Range(0, 1), Self::new_env),
                ("environment", Arity::Range(0, 1), Self::environment),
                ("assign", Arity::Range(2, 3), Self::assign),
                ("get", Arity::Range(1, 2), Self::get),
                ("exists", Arity::Range(1, 2), Self::exists),
                ("rm", Arity::Range(1, 2), Self::rm),
            ],
        )
    }

    fn load_control_functions(evaluator: &mut Evaluator) -> RuntimeResult<()> {
        Self::load(
            evaluator,
            &[
                ("emit", Arity::Variadic(0), Self::emit),
                ("stop", Arity::Variadic(0), Self::stop),
                ("gc", Arity::Fixed(0), Self::gc),
                ("is.function", Arity::Fixed(1), Self::is_function),
                ("identical", Arity::Fixed(2), Self::identical),
            ],
        )
    }

    // --- construction ---

    /// `c(...)`: concatenates atomic arguments into one vector. Any list
    /// argument makes the result a list, splicing the list's elements.
    fn c(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let has_list = args
            .iter()
            .map(|arg| evaluator.heap().value(*arg))
            .collect::<RuntimeResult<Vec<_>>>()?
            .iter()
            .any(|value| matches!(value, Value::List(_)));

        if !has_list {
            let mut scalars = Vec::new();
            for arg in args {
                scalars.extend(Self::atomic(evaluator.heap(), *arg, "c")?);
            }
            if scalars.is_empty() {
                return evaluator.alloc(Value::Null);
            }
            return evaluator.alloc(Self::atomic_value(scalars));
        }

        let mut items = Vec::new();
        for arg in args {
            let value = evaluator.heap().value(*arg)?.clone();
            match value {
                Value::List(elements) => items.extend(elements),
                Value::Null => {}
                Value::Scalar(s) => items.push(evaluator.alloc(Value::Scalar(s))?),
                Value::Vector(v) => {
                    for s in v.elements() {
                        items.push(evaluator.alloc(Value::Scalar(s.clone()))?);
                    }
                }
                Value::Function(_) | Value::Environment(_) => items.push(*arg),
            }
        }
        let list = evaluator.heap_mut().alloc_list(items)?;
        Ok(evaluator.keep(list))
    }

    /// `list(...)`: elements are the argument values themselves, shared.
    fn list(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let list = evaluator.heap_mut().alloc_list(args.to_vec())?;
        Ok(evaluator.keep(list))
    }

    fn length(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let len = evaluator.heap().value(args[0])?.len();
        evaluator.alloc(Value::Scalar(Scalar::Integer(len as i64)))
    }

    // --- arithmetic ---

    fn add(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::arithmetic(evaluator, args, "+", i64::checked_add, |a, b| a + b)
    }

    fn subtract(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::arithmetic(evaluator, args, "-", i64::checked_sub, |a, b| a - b)
    }

    fn multiply(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::arithmetic(evaluator, args, "*", i64::checked_mul, |a, b| a * b)
    }

    /// Division always produces doubles.
    fn divide(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::arithmetic(evaluator, args, "/", |_, _| None, |a, b| a / b)
    }

    /// Integer operands stay integer unless the integer operation overflows,
    /// in which case that element (and so the whole result) is double.
    fn arithmetic(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        operation: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> RuntimeResult<ValueId> {
        let left = Self::numeric(evaluator.heap(), args[0], operation)?;
        let right = Self::numeric(evaluator.heap(), args[1], operation)?;
        let result = Self::recycle(&left, &right, |a, b| {
            let integers = (Self::as_integer(a), Self::as_integer(b));
            if let (Some(x), Some(y)) = integers {
                if let Some(n) = int_op(x, y) {
                    return Scalar::Integer(n);
                }
            }
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            Scalar::Double(float_op(x, y))
        });
        evaluator.alloc(Self::atomic_value(result))
    }

    fn equal(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::comparison(evaluator, args, "==", |ordering| {
            ordering == std::cmp::Ordering::Equal
        })
    }

    fn less_than(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        Self::comparison(evaluator, args, "<", |ordering| {
            ordering == std::cmp::Ordering::Less
        })
    }

    fn greater_than(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        _env: EnvId,
    ) -> RuntimeResult<ValueId> {
        Self::comparison(evaluator, args, ">", |ordering| {
            ordering == std::cmp::Ordering::Greater
        })
    }

    /// Compares as strings when either side is character, numerically
    /// otherwise. A NaN operand compares false.
    fn comparison(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        operation: &str,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> RuntimeResult<ValueId> {
        let left = Self::atomic(evaluator.heap(), args[0], operation)?;
        let right = Self::atomic(evaluator.heap(), args[1], operation)?;
        let result = Self::recycle(&left, &right, |a, b| {
            let ordering = if a.kind() == ScalarKind::Character || b.kind() == ScalarKind::Character
            {
                let a = a.coerce(ScalarKind::Character).to_string();
                let b = b.coerce(ScalarKind::Character).to_string();
                Some(a.cmp(&b))
            } else {
                a.as_f64()
                    .zip(b.as_f64())
                    .and_then(|(x, y)| x.partial_cmp(&y))
            };
            Scalar::Logical(ordering.map(accept).unwrap_or(false))
        });
        evaluator.alloc(Self::atomic_value(result))
    }

    fn not(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let operand = Self::numeric(evaluator.heap(), args[0], "!")?;
        let result = operand
            .iter()
            .map(|s| Scalar::Logical(s.as_f64().map(|x| x == 0.0).unwrap_or(false)))
            .collect();
        evaluator.alloc(Self::atomic_value(result))
    }

    // --- environments ---

    /// `new.env([parent])`: the parent defaults to the calling environment.
    fn new_env(evaluator: &mut Evaluator, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        let parent = match args.first() {
            Some(arg) => Self::env_arg(evaluator.heap(), *arg, "new.env")?,
            None => env,
        };
        let created = evaluator.heap_mut().new_environment(parent)?;
        evaluator.alloc(Value::Environment(created))
    }

    /// `environment([fun])`: the calling environment, or the environment
    /// a closure was defined in. Builtins have none.
    fn environment(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        env: EnvId,
    ) -> RuntimeResult<ValueId> {
        let target = match args.first() {
            None => Some(env),
            Some(arg) => match evaluator.heap().value(*arg)? {
                Value::Function(Function::Closure(closure)) => Some(closure.env),
                Value::Function(Function::Builtin(_)) => None,
                other => {
                    return Err(RuntimeError::TypeError {
                        expected: "function".to_string(),
                        actual: other.type_name().to_string(),
                        operation: "environment".to_string(),
                    })
                }
            },
        };
        match target {
            Some(target) => evaluator.alloc(Value::Environment(target)),
            None => evaluator.alloc(Value::Null),
        }
    }

    /// `assign(name, value, [envir])`: local assignment into `envir`.
    fn assign(evaluator: &mut Evaluator, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        let name = Self::name_arg(evaluator.heap(), args[0], "assign")?;
        let target = Self::optional_env(evaluator.heap(), args.get(2), env, "assign")?;
        evaluator.heap_mut().assign(&name, args[1], target)?;
        Ok(args[1])
    }

    fn get(evaluator: &mut Evaluator, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        let name = Self::name_arg(evaluator.heap(), args[0], "get")?;
        let start = Self::optional_env(evaluator.heap(), args.get(1), env, "get")?;
        evaluator.lookup_symbol(&name, start, LookupMode::Value)
    }

    fn exists(evaluator: &mut Evaluator, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        let name = Self::name_arg(evaluator.heap(), args[0], "exists")?;
        let start = Self::optional_env(evaluator.heap(), args.get(1), env, "exists")?;
        let found = evaluator.heap().find_binding_env(&name, start)?.is_some();
        evaluator.alloc(Value::Scalar(Scalar::Logical(found)))
    }

    /// `rm(name, [envir])`: removes from exactly `envir`, never a parent.
    fn rm(evaluator: &mut Evaluator, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        let name = Self::name_arg(evaluator.heap(), args[0], "rm")?;
        let target = Self::optional_env(evaluator.heap(), args.get(1), env, "rm")?;
        if !evaluator.heap_mut().remove_binding(&name, target)? {
            log::warn!("rm: object '{}' not found", name);
        }
        evaluator.alloc(Value::Null)
    }

    // --- control and introspection ---

    /// Appends one line to the evaluator's output log: every argument's
    /// printed form, separated by spaces.
    fn emit(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(Self::format_value(evaluator.heap(), *arg)?);
        }
        evaluator.emit_line(parts.join(" "));
        evaluator.alloc(Value::Null)
    }

    fn stop(evaluator: &mut Evaluator, args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let mut message = String::new();
        for arg in args {
            message.push_str(&Self::format_value(evaluator.heap(), *arg)?);
        }
        Err(RuntimeError::UserError(message))
    }

    /// `gc()`: runs a tracing pass and returns the number of live slots.
    fn gc(evaluator: &mut Evaluator, _args: &[ValueId], _env: EnvId) -> RuntimeResult<ValueId> {
        let report = evaluator.collect_garbage();
        evaluator.alloc(Value::Scalar(Scalar::Integer(report.live_after as i64)))
    }

    fn is_function(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        _env: EnvId,
    ) -> RuntimeResult<ValueId> {
        let callable = evaluator.heap().value(args[0])?.is_callable();
        evaluator.alloc(Value::Scalar(Scalar::Logical(callable)))
    }

    fn identical(
        evaluator: &mut Evaluator,
        args: &[ValueId],
        _env: EnvId,
    ) -> RuntimeResult<ValueId> {
        let same = Self::values_identical(evaluator.heap(), args[0], args[1])?;
        evaluator.alloc(Value::Scalar(Scalar::Logical(same)))
    }

    /// Environments and closures compare by identity; data compares by
    /// content, lists element by element.
    // Lists never contain themselves (`mutate` copies any level the
    // incoming element reaches), so the recursion here and in
    // `format_value` terminates.
    fn values_identical(heap: &Heap, a: ValueId, b: ValueId) -> RuntimeResult<bool> {
        if a == b {
            return Ok(true);
        }
        match (heap.value(a)?, heap.value(b)?) {
            (Value::Environment(x), Value::Environment(y)) => Ok(x == y),
            (Value::Function(Function::Builtin(x)), Value::Function(Function::Builtin(y))) => {
                Ok(x == y)
            }
            (Value::Function(_), Value::Function(_)) => Ok(false),
            (Value::List(xs), Value::List(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                for (x, y) in xs.iter().zip(ys) {
                    if !Self::values_identical(heap, *x, *y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (x, y) => Ok(x == y),
        }
    }

    // --- helpers ---

    /// Scalars of an atomic argument; NULL counts as empty.
    fn atomic(heap: &Heap, arg: ValueId, operation: &str) -> RuntimeResult<Vec<Scalar>> {
        let value = heap.value(arg)?;
        value.scalars().ok_or_else(|| RuntimeError::TypeError {
            expected: "atomic vector".to_string(),
            actual: value.type_name().to_string(),
            operation: operation.to_string(),
        })
    }

    fn numeric(heap: &Heap, arg: ValueId, operation: &str) -> RuntimeResult<Vec<Scalar>> {
        let scalars = Self::atomic(heap, arg, operation)?;
        if scalars.iter().any(|s| s.kind() == ScalarKind::Character) {
            return Err(RuntimeError::TypeError {
                expected: "numeric or logical".to_string(),
                actual: "character".to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(scalars)
    }

    fn as_integer(scalar: &Scalar) -> Option<i64> {
        match scalar {
            Scalar::Logical(b) => Some(*b as i64),
            Scalar::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Applies `op` pairwise, recycling the shorter side. Either side empty
    /// gives an empty result.
    fn recycle(left: &[Scalar], right: &[Scalar], op: impl Fn(&Scalar, &Scalar) -> Scalar) -> Vec<Scalar> {
        if left.is_empty() || right.is_empty() {
            return Vec::new();
        }
        let len = left.len().max(right.len());
        (0..len)
            .map(|i| op(&left[i % left.len()], &right[i % right.len()]))
            .collect()
    }

    /// One scalar stays a scalar; anything else is a vector.
    fn atomic_value(mut scalars: Vec<Scalar>) -> Value {
        if scalars.len() == 1 {
            if let Some(scalar) = scalars.pop() {
                return Value::Scalar(scalar);
            }
        }
        Value::Vector(AtomicVector::from_scalars(scalars))
    }

    fn name_arg(heap: &Heap, arg: ValueId, operation: &str) -> RuntimeResult<Symbol> {
        let value = heap.value(arg)?;
        match value.as_scalar() {
            Some(Scalar::Str(s)) => Ok(Symbol(s.clone())),
            _ => Err(RuntimeError::TypeError {
                expected: "character string".to_string(),
                actual: value.type_name().to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    fn env_arg(heap: &Heap, arg: ValueId, operation: &str) -> RuntimeResult<EnvId> {
        match heap.value(arg)? {
            Value::Environment(env) => Ok(*env),
            other => Err(RuntimeError::TypeError {
                expected: "environment".to_string(),
                actual: other.type_name().to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    fn optional_env(
        heap: &Heap,
        arg: Option<&ValueId>,
        default: EnvId,
        operation: &str,
    ) -> RuntimeResult<EnvId> {
        match arg {
            Some(arg) => Self::env_arg(heap, *arg, operation),
            None => Ok(default),
        }
    }

    /// Printed form used by `emit` and `stop`.
    pub fn format_value(heap: &Heap, id: ValueId) -> RuntimeResult<String> {
        Ok(match heap.value(id)? {
            Value::Null => "NULL".to_string(),
            Value::Scalar(s) => s.to_string(),
            Value::Vector(v) => v
                .elements()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(Self::format_value(heap, *item)?);
                }
                format!("list({})", parts.join(", "))
            }
            Value::Function(Function::Builtin(b)) => format!("<builtin {}>", b.name),
            Value::Function(Function::Closure(_)) => "<closure>".to_string(),
            Value::Environment(env) => format!("<environment {:?}>", env),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression as E;
    use pretty_assertions::assert_eq;

    fn eval(evaluator: &mut Evaluator, expr: E) -> Value {
        let id = evaluator.evaluate(&expr).unwrap();
        evaluator.heap().value(id).unwrap().clone()
    }

    fn ints(items: &[i64]) -> Value {
        Value::Vector(AtomicVector::from_scalars(
            items.iter().map(|n| Scalar::Integer(*n)).collect(),
        ))
    }

    #[test]
    fn arithmetic_recycles_the_shorter_operand() {
        let mut ev = Evaluator::new().unwrap();
        let sum = E::call(
            "+",
            vec![
                E::call("c", vec![E::int(1), E::int(2), E::int(3), E::int(4)]),
                E::call("c", vec![E::int(10), E::int(20)]),
            ],
        );
        assert_eq!(eval(&mut ev, sum), ints(&[11, 22, 13, 24]));
        let quotient = E::call("/", vec![E::int(1), E::int(4)]);
        assert_eq!(eval(&mut ev, quotient), Value::Scalar(Scalar::Double(0.25)));
    }

    #[test]
    fn integer_overflow_widens_to_double() {
        let mut ev = Evaluator::new().unwrap();
        let product = E::call("*", vec![E::int(i64::MAX), E::int(2)]);
        assert_eq!(
            eval(&mut ev, product),
            Value::Scalar(Scalar::Double(i64::MAX as f64 * 2.0))
        );
    }

    #[test]
    fn comparison_of_strings_is_lexical() {
        let mut ev = Evaluator::new().unwrap();
        let lt = E::call("<", vec![E::string("apple"), E::string("banana")]);
        assert_eq!(eval(&mut ev, lt), Value::Scalar(Scalar::Logical(true)));
        let eq = E::call("==", vec![E::int(1), E::double(1.0)]);
        assert_eq!(eval(&mut ev, eq), Value::Scalar(Scalar::Logical(true)));
    }

    #[test]
    fn c_with_a_list_argument_builds_a_list() {
        let mut ev = Evaluator::new().unwrap();
        let combined = E::call(
            "c",
            vec![E::call("list", vec![E::int(1)]), E::int(2)],
        );
        let id = ev.evaluate(&combined).unwrap();
        assert_eq!(ev.heap().value(id).unwrap().type_name(), "list");
        assert_eq!(ev.heap().value(id).unwrap().len(), 2);
        assert_eq!(
            StandardLibrary::format_value(ev.heap(), id).unwrap(),
            "list(1, 2)"
        );
    }

    #[test]
    fn environment_helpers_share_one_record() {
        let mut ev = Evaluator::new().unwrap();
        let program = E::block(vec![
            E::assign("e", E::call("new.env", vec![])),
            E::call("assign", vec![E::string("k"), E::int(7), E::symbol("e")]),
            E::call(
                "emit",
                vec![
                    E::call("exists", vec![E::string("k"), E::symbol("e")]),
                    E::call("get", vec![E::string("k"), E::symbol("e")]),
                ],
            ),
            E::call("rm", vec![E::string("k"), E::symbol("e")]),
            E::call("exists", vec![E::string("k"), E::symbol("e")]),
        ]);
        assert_eq!(eval(&mut ev, program), Value::Scalar(Scalar::Logical(false)));
        assert_eq!(ev.emitted(), &["TRUE 7".to_string()]);
    }

    #[test]
    fn stop_raises_a_user_error() {
        let mut ev = Evaluator::new().unwrap();
        let program = E::call("stop", vec![E::string("bad "), E::int(3)]);
        assert_eq!(
            ev.evaluate(&program),
            Err(RuntimeError::UserError("bad 3".to_string()))
        );
    }

    #[test]
    fn identical_compares_lists_structurally_and_environments_by_identity() {
        let mut ev = Evaluator::new().unwrap();
        let lists = E::call(
            "identical",
            vec![
                E::call("list", vec![E::int(1), E::string("a")]),
                E::call("list", vec![E::int(1), E::string("a")]),
            ],
        );
        assert_eq!(eval(&mut ev, lists), Value::Scalar(Scalar::Logical(true)));
        let envs = E::call(
            "identical",
            vec![E::call("new.env", vec![]), E::call("new.env", vec![])],
        );
        assert_eq!(eval(&mut ev, envs), Value::Scalar(Scalar::Logical(false)));
    }

    #[test]
    fn builtin_arity_is_checked() {
        let mut ev = Evaluator::new().unwrap();
        assert_eq!(
            ev.evaluate(&E::call("length", vec![])),
            Err(RuntimeError::ArityMismatch {
                function: "length".to_string(),
                expected: "1".to_string(),
                actual: 0,
            })
        );
    }
}
