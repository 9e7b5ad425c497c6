// Evaluator - binding, scoping, call frames and promise forcing
//
// Every value the evaluator allocates or hands between forms is protected on
// the heap's root stack until the enclosing public call returns. Public entry
// points (`eval`, `apply`, `force`, `lookup`) restore the stack on the way out,
// so a returned id is only guaranteed live until the next allocation unless
// the caller binds it.

use crate::ast::{
    Argument, AssignExpr, AssignScope, CallExpr, Expression, Formal, FunctionExpr, IfExpr,
    IndexExpr, Literal, Symbol,
};
use crate::config::RuntimeConfig;
use crate::runtime::copy_on_write::Element;
use crate::runtime::environment::{Binding, EnvId, LookupMode};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::frame::{CallFrame, OnExitAction};
use crate::runtime::gc::{GcReport, Root};
use crate::runtime::heap::{Heap, HeapStats};
use crate::runtime::promise::{ForceStart, PromiseId};
use crate::runtime::stdlib::StandardLibrary;
use crate::runtime::values::{
    Arity, BuiltinFn, BuiltinFunction, Closure, Function, RefCount, Scalar, Value, ValueId,
};
use std::rc::Rc;

pub struct Evaluator {
    heap: Heap,
    global: EnvId,
    frames: Vec<CallFrame>,
    config: RuntimeConfig,
    emitted: Vec<String>,
}

impl Evaluator {
    /// Create an evaluator with default settings and the standard library
    /// installed in a fresh global environment.
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        let mut heap = Heap::new(&config.gc);
        let global = heap.new_global_environment()?;
        let mut evaluator = Evaluator {
            heap,
            global,
            frames: Vec::new(),
            config,
            emitted: Vec::new(),
        };
        StandardLibrary::install(&mut evaluator)?;
        Ok(evaluator)
    }

    pub fn global(&self) -> EnvId {
        self.global
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap_stats(&self) -> &HeapStats {
        self.heap.stats()
    }

    /// Lines written by `emit`, oldest first.
    pub fn emitted(&self) -> &[String] {
        &self.emitted
    }

    pub fn take_emitted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.emitted)
    }

    pub(crate) fn emit_line(&mut self, line: String) {
        self.emitted.push(line);
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn collect_garbage(&mut self) -> GcReport {
        self.heap.collect_garbage()
    }

    pub fn refcount_state(&self, value: ValueId) -> RuntimeResult<RefCount> {
        self.heap.refcount_state(value)
    }

    /// The opaque identity of a live value. A `ValueId` is its own identity;
    /// this only rejects handles whose value has been reclaimed.
    pub fn identity(&self, value: ValueId) -> RuntimeResult<ValueId> {
        self.heap.value(value)?;
        Ok(value)
    }

    /// Identity of whatever `name` currently resolves to from `env`.
    pub fn identity_of(&mut self, name: &str, env: EnvId) -> RuntimeResult<ValueId> {
        self.lookup(name, env, LookupMode::Value)
    }

    /// Installs a builtin in the global environment, replacing any binding
    /// of the same name.
    pub fn define_builtin(
        &mut self,
        name: &'static str,
        arity: Arity,
        func: BuiltinFn,
    ) -> RuntimeResult<ValueId> {
        let value = self.heap.alloc_value(Value::Function(Function::Builtin(BuiltinFunction {
            name,
            arity,
            func,
        })))?;
        self.heap.bind(&Symbol::new(name), value, self.global)?;
        Ok(value)
    }

    // --- binding ---

    pub fn bind(&mut self, name: &str, value: ValueId, env: EnvId) -> RuntimeResult<()> {
        self.heap.bind(&Symbol::new(name), value, env)
    }

    pub fn assign(&mut self, name: &str, value: ValueId, env: EnvId) -> RuntimeResult<()> {
        self.heap.assign(&Symbol::new(name), value, env)
    }

    pub fn assign_parent(&mut self, name: &str, value: ValueId, start: EnvId) -> RuntimeResult<EnvId> {
        self.heap.assign_parent(&Symbol::new(name), value, start)
    }

    pub fn remove(&mut self, name: &str, env: EnvId) -> RuntimeResult<bool> {
        self.heap.remove_binding(&Symbol::new(name), env)
    }

    pub fn lookup(&mut self, name: &str, env: EnvId, mode: LookupMode) -> RuntimeResult<ValueId> {
        let name = Symbol::new(name);
        self.scoped(env, |ev| ev.lookup_symbol(&name, env, mode))
    }

    /// Walks from `env` to the root. Promises met on the way are forced,
    /// including in callable mode when their value then turns out not to be
    /// a function.
    pub(crate) fn lookup_symbol(
        &mut self,
        name: &Symbol,
        env: EnvId,
        mode: LookupMode,
    ) -> RuntimeResult<ValueId> {
        let mut cursor = Some(env);
        while let Some(current) = cursor {
            let record = self.heap.environment(current)?;
            let parent = record.parent();
            match record.get(name) {
                Some(Binding::Value(value)) => {
                    if self.matches_mode(value, mode)? {
                        return Ok(self.keep(value));
                    }
                }
                Some(Binding::Promise(promise)) => {
                    let value = self.force_promise(promise)?;
                    if self.matches_mode(value, mode)? {
                        return Ok(value);
                    }
                }
                Some(Binding::Missing) => {
                    if mode == LookupMode::Value {
                        return Err(RuntimeError::MissingArgument(name.to_string()));
                    }
                }
                None => {}
            }
            cursor = parent;
        }
        Err(RuntimeError::NameNotFound(name.to_string()))
    }

    fn matches_mode(&self, value: ValueId, mode: LookupMode) -> RuntimeResult<bool> {
        Ok(match mode {
            LookupMode::Value => true,
            LookupMode::Callable => self.heap.value(value)?.is_callable(),
        })
    }

    // --- promises ---

    /// Creates an unforced promise for the host. It stays a collection root,
    /// forced or not, until handed back with `drop_promise`.
    pub fn new_promise(&mut self, expression: Expression, env: EnvId) -> RuntimeResult<PromiseId> {
        self.check_exhausted()?;
        let promise = self.heap.new_promise(Rc::new(expression), env)?;
        self.heap.hold_promise(promise);
        Ok(promise)
    }

    /// Lets the collector reclaim a promise from `new_promise` once nothing
    /// else refers to it. Returns false for promises the host never held.
    pub fn drop_promise(&mut self, promise: PromiseId) -> bool {
        self.heap.release_promise(promise)
    }

    pub fn force(&mut self, promise: PromiseId) -> RuntimeResult<ValueId> {
        self.check_exhausted()?;
        let depth = self.heap.protect_depth();
        let result = self.force_promise(promise);
        self.heap.restore_protect(depth);
        result
    }

    pub(crate) fn force_promise(&mut self, promise: PromiseId) -> RuntimeResult<ValueId> {
        let (expression, env) = match self.heap.begin_forcing(promise)? {
            ForceStart::Cached(value) => return Ok(self.keep(value)),
            ForceStart::Evaluate(expression, env) => (expression, env),
        };
        log::debug!("forcing {:?} in {:?}", promise, env);
        let depth = self.heap.protect_depth();
        let result = self.eval_expr(&expression, env);
        self.heap.restore_protect(depth);
        match result {
            Ok(value) => {
                self.heap.finish_forcing(promise, Some(value))?;
                Ok(self.keep(value))
            }
            Err(err) => {
                self.heap.finish_forcing(promise, None)?;
                Err(RuntimeError::forcing(err))
            }
        }
    }

    // --- evaluation ---

    /// Evaluate `expr` in `env`. This is the entry point for front ends.
    pub fn eval(&mut self, expr: &Expression, env: EnvId) -> RuntimeResult<ValueId> {
        self.scoped(env, |ev| ev.eval_expr(expr, env))
    }

    /// Evaluate in the global environment.
    pub fn evaluate(&mut self, expr: &Expression) -> RuntimeResult<ValueId> {
        let global = self.global;
        self.eval(expr, global)
    }

    /// Call `function` with already evaluated arguments, matched by position.
    pub fn apply(&mut self, function: ValueId, args: &[ValueId], env: EnvId) -> RuntimeResult<ValueId> {
        self.scoped(env, |ev| {
            ev.keep(function);
            for arg in args {
                ev.keep(*arg);
            }
            ev.call_function(function, args, env)
        })
    }

    fn scoped<T>(
        &mut self,
        env: EnvId,
        body: impl FnOnce(&mut Self) -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        self.check_exhausted()?;
        let depth = self.heap.protect_depth();
        self.heap.protect(Root::Environment(env));
        let result = body(self);
        self.heap.restore_protect(depth);
        result
    }

    fn check_exhausted(&self) -> RuntimeResult<()> {
        match self.heap.exhausted() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Protects `value` for the rest of the current public call.
    pub(crate) fn keep(&mut self, value: ValueId) -> ValueId {
        self.heap.protect(Root::Value(value));
        value
    }

    /// Allocates a protected temporary.
    pub(crate) fn alloc(&mut self, value: Value) -> RuntimeResult<ValueId> {
        let id = self.heap.alloc_value(value)?;
        Ok(self.keep(id))
    }

    pub(crate) fn eval_expr(&mut self, expr: &Expression, env: EnvId) -> RuntimeResult<ValueId> {
        match expr {
            Expression::Literal(lit) => self.eval_literal(lit),
            Expression::Symbol(name) => self.lookup_symbol(name, env, LookupMode::Value),
            Expression::Call(call) => self.eval_call(call, env),
            Expression::Function(function) => self.eval_fn(function, env),
            Expression::Assign(assign) => self.eval_assign(assign, env),
            Expression::Index(index) => self.eval_index(index, env),
            Expression::Block(exprs) => self.eval_block(exprs, env),
            Expression::If(if_expr) => self.eval_if(if_expr, env),
            Expression::OnExit(action) => self.eval_on_exit(action, env),
            Expression::Return(value) => self.eval_return(value, env),
        }
    }

    fn eval_literal(&mut self, lit: &Literal) -> RuntimeResult<ValueId> {
        let value = match lit {
            Literal::Null => Value::Null,
            Literal::Logical(b) => Value::Scalar(Scalar::Logical(*b)),
            Literal::Integer(n) => Value::Scalar(Scalar::Integer(*n)),
            Literal::Double(x) => Value::Scalar(Scalar::Double(*x)),
            Literal::String(s) => Value::Scalar(Scalar::Str(s.clone())),
        };
        self.alloc(value)
    }

    fn eval_fn(&mut self, function: &FunctionExpr, env: EnvId) -> RuntimeResult<ValueId> {
        self.alloc(Value::Function(Function::Closure(Closure {
            formals: function.formals.clone(),
            body: function.body.clone(),
            env,
        })))
    }

    fn eval_block(&mut self, exprs: &[Expression], env: EnvId) -> RuntimeResult<ValueId> {
        let depth = self.heap.protect_depth();
        let mut last = None;
        for expr in exprs {
            // Earlier results are dropped; anything still needed is bound.
            self.heap.restore_protect(depth);
            last = Some(self.eval_expr(expr, env)?);
        }
        match last {
            Some(value) => Ok(value),
            None => self.alloc(Value::Null),
        }
    }

    fn eval_if(&mut self, if_expr: &IfExpr, env: EnvId) -> RuntimeResult<ValueId> {
        let condition = self.eval_expr(&if_expr.condition, env)?;
        if self.condition_holds(condition)? {
            self.eval_expr(&if_expr.then_branch, env)
        } else if let Some(else_branch) = &if_expr.else_branch {
            self.eval_expr(else_branch, env)
        } else {
            self.alloc(Value::Null)
        }
    }

    fn condition_holds(&self, condition: ValueId) -> RuntimeResult<bool> {
        let value = self.heap.value(condition)?;
        match value.as_scalar() {
            Some(Scalar::Logical(b)) => Ok(*b),
            Some(Scalar::Integer(n)) => Ok(*n != 0),
            Some(Scalar::Double(x)) if !x.is_nan() => Ok(*x != 0.0),
            _ => Err(RuntimeError::TypeError {
                expected: "logical or numeric scalar".to_string(),
                actual: value.type_name().to_string(),
                operation: "if".to_string(),
            }),
        }
    }

    fn eval_index(&mut self, index: &IndexExpr, env: EnvId) -> RuntimeResult<ValueId> {
        let target = self.eval_expr(&index.target, env)?;
        let position = self.eval_expr(&index.index, env)?;
        let position = self.position(position, "[[")?;
        match self.heap.element(target, position)? {
            Element::Value(value) => Ok(self.keep(value)),
            Element::Scalar(scalar) => self.alloc(Value::Scalar(scalar)),
        }
    }

    /// Zero-based position from a one-based index value.
    fn position(&self, index: ValueId, operation: &str) -> RuntimeResult<usize> {
        let value = self.heap.value(index)?;
        let position = match value.as_scalar() {
            Some(Scalar::Integer(n)) => Some(*n),
            Some(Scalar::Double(x)) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        };
        match position {
            Some(n) if n >= 1 => Ok((n - 1) as usize),
            _ => Err(RuntimeError::TypeError {
                expected: "positive whole-number index".to_string(),
                actual: value.type_name().to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    fn eval_assign(&mut self, assign: &AssignExpr, env: EnvId) -> RuntimeResult<ValueId> {
        let value = self.eval_expr(&assign.value, env)?;
        if assign.path.is_empty() {
            match assign.scope {
                AssignScope::Local => self.heap.assign(&assign.target, value, env)?,
                AssignScope::Parent => {
                    let start = self.escape_start(env)?;
                    self.heap.assign_parent(&assign.target, value, start)?;
                }
            }
            return Ok(value);
        }

        let mut path = Vec::with_capacity(assign.path.len());
        for step in &assign.path {
            let index = self.eval_expr(step, env)?;
            path.push(self.position(index, "[[<-")?);
        }

        let name = &assign.target;
        let (target_env, current) = match assign.scope {
            AssignScope::Local => {
                let current = self.lookup_symbol(name, env, LookupMode::Value)?;
                // An inherited or promised value becomes a local binding
                // first, so the mutation below sees it as shared and copies.
                if !matches!(self.heap.binding(env, name)?, Some(Binding::Value(_))) {
                    self.heap.bind(name, current, env)?;
                }
                (env, current)
            }
            AssignScope::Parent => {
                let start = self.escape_start(env)?;
                let current = self.lookup_symbol(name, start, LookupMode::Value)?;
                let target_env = self
                    .heap
                    .find_binding_env(name, start)?
                    .ok_or_else(|| RuntimeError::NameNotFound(name.to_string()))?;
                (target_env, current)
            }
        };

        let updated = self.heap.mutate(current, &path, value)?;
        self.heap.bind(name, updated, target_env)?;
        Ok(value)
    }

    /// `<<-` searches from the enclosing environment; at the root it is the
    /// root itself.
    fn escape_start(&self, env: EnvId) -> RuntimeResult<EnvId> {
        Ok(self.heap.parent_of(env)?.unwrap_or(env))
    }

    fn eval_on_exit(&mut self, action: &Expression, env: EnvId) -> RuntimeResult<ValueId> {
        match self.frames.iter_mut().rev().find(|frame| frame.env == env) {
            Some(frame) => frame
                .on_exit
                .push(OnExitAction::Expression(Rc::new(action.clone()))),
            // Outside any function there is no frame to attach to.
            None => log::debug!("on.exit outside a function frame ignored"),
        }
        self.alloc(Value::Null)
    }

    /// Evaluates `value` and unwinds to the frame running in `env`. Inside a
    /// promise that is the frame which created the promise.
    fn eval_return(&mut self, value: &Expression, env: EnvId) -> RuntimeResult<ValueId> {
        if !self.frames.iter().any(|frame| frame.env == env) {
            return Err(RuntimeError::ReturnOutsideFunction);
        }
        let value = self.eval_expr(value, env)?;
        Err(RuntimeError::Return { value, env })
    }

    /// Queue `action` on the innermost active frame running in `frame_env`.
    pub fn register_on_exit(&mut self, frame_env: EnvId, action: OnExitAction) -> RuntimeResult<()> {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.env == frame_env)
            .ok_or_else(|| {
                RuntimeError::InternalError(format!("no active call frame for {:?}", frame_env))
            })?;
        frame.on_exit.push(action);
        Ok(())
    }

    // --- calls ---

    fn eval_call(&mut self, call: &CallExpr, env: EnvId) -> RuntimeResult<ValueId> {
        let (function, name) = match call.callee.as_ref() {
            Expression::Symbol(name) => (
                self.lookup_symbol(name, env, LookupMode::Callable)?,
                name.to_string(),
            ),
            other => (self.eval_expr(other, env)?, "anonymous function".to_string()),
        };

        match self.heap.value(function)? {
            Value::Function(Function::Builtin(_)) => {
                let depth = self.heap.protect_depth();
                let mut args = Vec::with_capacity(call.arguments.len());
                for argument in &call.arguments {
                    args.push(self.eval_expr(&argument.value, env)?);
                }
                let result = self.call_function(function, &args, env)?;
                self.heap.restore_protect(depth);
                Ok(self.keep(result))
            }
            Value::Function(Function::Closure(closure)) => {
                let closure = closure.clone();
                self.check_depth()?;
                let depth = self.heap.protect_depth();
                let arguments =
                    self.match_arguments(&name, &closure.formals, &call.arguments, env)?;
                let frame = self.new_call_frame(function, arguments)?;
                let result = self.run_frame(function, frame, &closure.body)?;
                self.heap.restore_protect(depth);
                Ok(self.keep(result))
            }
            other => Err(RuntimeError::NotCallable(other.type_name().to_string())),
        }
    }

    /// Dispatch on evaluated arguments. Closure formals are matched by
    /// position and bound as values, not promises.
    pub(crate) fn call_function(
        &mut self,
        function: ValueId,
        args: &[ValueId],
        env: EnvId,
    ) -> RuntimeResult<ValueId> {
        match self.heap.value(function)? {
            Value::Function(Function::Builtin(builtin)) => {
                let builtin = builtin.clone();
                if !builtin.arity.accepts(args.len()) {
                    return Err(RuntimeError::ArityMismatch {
                        function: builtin.name.to_string(),
                        expected: builtin.arity.to_string(),
                        actual: args.len(),
                    });
                }
                (builtin.func)(self, args, env)
            }
            Value::Function(Function::Closure(closure)) => {
                let closure = closure.clone();
                if args.len() > closure.formals.len() {
                    return Err(RuntimeError::ArityMismatch {
                        function: "anonymous function".to_string(),
                        expected: closure.formals.len().to_string(),
                        actual: args.len(),
                    });
                }
                let bindings = closure
                    .formals
                    .iter()
                    .zip(args)
                    .map(|(formal, arg)| (formal.name.clone(), Binding::Value(*arg)))
                    .collect();
                let frame = self.new_call_frame(function, bindings)?;
                self.run_frame(function, frame, &closure.body)
            }
            other => Err(RuntimeError::NotCallable(other.type_name().to_string())),
        }
    }

    fn check_depth(&self) -> RuntimeResult<()> {
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeError::StackOverflow(self.config.max_call_depth));
        }
        Ok(())
    }

    /// Exact names first, then positions. Each matched actual becomes a
    /// promise over the caller's environment.
    fn match_arguments(
        &mut self,
        function: &str,
        formals: &[Formal],
        arguments: &[Argument],
        caller: EnvId,
    ) -> RuntimeResult<Vec<(Symbol, Binding)>> {
        let mismatch = || RuntimeError::ArityMismatch {
            function: function.to_string(),
            expected: format!(
                "({})",
                formals
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            actual: arguments.len(),
        };

        let mut matched: Vec<Option<Rc<Expression>>> = vec![None; formals.len()];
        let mut positional = Vec::new();
        for argument in arguments {
            match &argument.name {
                Some(name) => {
                    let slot = formals
                        .iter()
                        .position(|formal| &formal.name == name)
                        .filter(|i| matched[*i].is_none())
                        .ok_or_else(mismatch)?;
                    matched[slot] = Some(argument.value.clone());
                }
                None => positional.push(argument.value.clone()),
            }
        }
        let mut positional = positional.into_iter();
        for slot in matched.iter_mut().filter(|slot| slot.is_none()) {
            match positional.next() {
                Some(expr) => *slot = Some(expr),
                None => break,
            }
        }
        if positional.next().is_some() {
            return Err(mismatch());
        }

        let mut bindings = Vec::new();
        for (formal, expr) in formals.iter().zip(matched) {
            if let Some(expr) = expr {
                let promise = self.heap.new_promise(expr, caller)?;
                self.heap.protect(Root::Promise(promise));
                bindings.push((formal.name.clone(), Binding::Promise(promise)));
            }
        }
        Ok(bindings)
    }

    /// Create the environment for one invocation of `function`. Its parent
    /// is the closure's defining environment, never the caller's. Formals
    /// not in `arguments` get a promise of their default, evaluated in the
    /// new frame, or the missing marker.
    pub fn new_call_frame(
        &mut self,
        function: ValueId,
        arguments: Vec<(Symbol, Binding)>,
    ) -> RuntimeResult<EnvId> {
        let closure = match self.heap.value(function)? {
            Value::Function(Function::Closure(closure)) => closure.clone(),
            other => {
                return Err(RuntimeError::TypeError {
                    expected: "closure".to_string(),
                    actual: other.type_name().to_string(),
                    operation: "new call frame".to_string(),
                })
            }
        };
        let frame = self.heap.new_environment(closure.env)?;
        for (name, binding) in arguments {
            match binding {
                Binding::Value(value) => self.heap.bind(&name, value, frame)?,
                Binding::Promise(promise) => self.heap.bind_promise(&name, promise, frame)?,
                Binding::Missing => self.heap.bind_missing(&name, frame)?,
            }
        }
        for formal in closure.formals.iter() {
            if self.heap.binding(frame, &formal.name)?.is_some() {
                continue;
            }
            match &formal.default {
                Some(default) => {
                    let promise = self.heap.new_promise(default.clone(), frame)?;
                    self.heap.bind_promise(&formal.name, promise, frame)?;
                }
                None => self.heap.bind_missing(&formal.name, frame)?,
            }
        }
        Ok(frame)
    }

    fn run_frame(&mut self, function: ValueId, env: EnvId, body: &Expression) -> RuntimeResult<ValueId> {
        self.check_depth()?;
        self.frames.push(CallFrame::new(env, function));
        self.heap.push_frame_root(env, function);
        log::debug!("enter frame {:?} (depth {})", env, self.frames.len());

        let depth = self.heap.protect_depth();
        let result = match self.eval_expr(body, env) {
            Err(RuntimeError::Return { value, env: target }) if target == env => Ok(value),
            other => other,
        };
        self.heap.restore_protect(depth);
        // A return passing through to an outer frame carries its value.
        if let Ok(value) | Err(RuntimeError::Return { value, .. }) = &result {
            self.keep(*value);
        }

        let actions = match self.frames.last_mut() {
            Some(frame) => std::mem::take(&mut frame.on_exit),
            None => Vec::new(),
        };
        let result = self.run_on_exit(actions, env, result);

        self.heap.pop_frame_root();
        self.frames.pop();
        log::debug!("leave frame {:?}", env);
        result
    }

    /// Runs actions newest first. A failing body keeps its own error; a
    /// successful one reports the first action failure. An action that
    /// returns from this frame replaces a successful result.
    fn run_on_exit(
        &mut self,
        actions: Vec<OnExitAction>,
        env: EnvId,
        mut outcome: RuntimeResult<ValueId>,
    ) -> RuntimeResult<ValueId> {
        for action in actions.into_iter().rev() {
            let depth = self.heap.protect_depth();
            let ran = match action {
                OnExitAction::Expression(expr) => self.eval_expr(&expr, env).map(|_| ()),
                OnExitAction::Native(action) => action(self),
            };
            self.heap.restore_protect(depth);
            let ran = match ran {
                Err(RuntimeError::Return { value, env: target }) if target == env => {
                    if outcome.is_ok() {
                        outcome = Ok(self.keep(value));
                    }
                    Ok(())
                }
                other => other,
            };
            if let Err(err) = ran {
                if outcome.is_err() {
                    log::warn!("on.exit action failed during unwind: {}", err);
                } else {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }
}
