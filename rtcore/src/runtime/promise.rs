// Deferred, memoized argument evaluation

use crate::ast::Expression;
use crate::runtime::arena::Handle;
use crate::runtime::environment::EnvId;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::gc::Root;
use crate::runtime::heap::{stale, Heap};
use crate::runtime::values::ValueId;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(pub(crate) Handle);

impl fmt::Debug for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseId({:?})", self.0)
    }
}

/// `Unforced -> Forced` is the only transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Unforced {
        expression: Rc<Expression>,
        env: EnvId,
    },
    /// The defining environment is dropped once the result is cached.
    Forced(ValueId),
}

#[derive(Debug)]
pub struct PromiseRecord {
    pub(crate) state: PromiseState,
    /// Set while the expression runs, to reject re-entrant forcing.
    pub(crate) under_evaluation: bool,
}

impl PromiseRecord {
    pub fn state(&self) -> &PromiseState {
        &self.state
    }

    pub fn is_forced(&self) -> bool {
        matches!(self.state, PromiseState::Forced(_))
    }
}

pub(crate) enum ForceStart {
    Evaluate(Rc<Expression>, EnvId),
    Cached(ValueId),
}

impl Heap {
    pub fn new_promise(&mut self, expression: Rc<Expression>, env: EnvId) -> RuntimeResult<PromiseId> {
        self.environment(env)?;
        self.reserve(&[Root::Environment(env)])?;
        self.stats.promises_allocated += 1;
        Ok(PromiseId(self.promises.insert(PromiseRecord {
            state: PromiseState::Unforced { expression, env },
            under_evaluation: false,
        })))
    }

    pub fn promise(&self, promise: PromiseId) -> RuntimeResult<&PromiseRecord> {
        self.promises
            .get(promise.0)
            .ok_or_else(|| stale("promise", promise))
    }

    fn promise_mut(&mut self, promise: PromiseId) -> RuntimeResult<&mut PromiseRecord> {
        self.promises
            .get_mut(promise.0)
            .ok_or_else(|| stale("promise", promise))
    }

    /// Claims an unforced promise for evaluation, or hands back the cached
    /// value of a forced one.
    pub(crate) fn begin_forcing(&mut self, promise: PromiseId) -> RuntimeResult<ForceStart> {
        let record = self.promise_mut(promise)?;
        match &record.state {
            PromiseState::Forced(value) => Ok(ForceStart::Cached(*value)),
            PromiseState::Unforced { .. } if record.under_evaluation => {
                Err(RuntimeError::PromiseRecursion)
            }
            PromiseState::Unforced { expression, env } => {
                let start = ForceStart::Evaluate(expression.clone(), *env);
                record.under_evaluation = true;
                self.push_forcing(promise);
                Ok(start)
            }
        }
    }

    /// Ends an evaluation started by `begin_forcing`. On success the result
    /// is cached and counted; on failure the promise stays unforced.
    pub(crate) fn finish_forcing(
        &mut self,
        promise: PromiseId,
        result: Option<ValueId>,
    ) -> RuntimeResult<()> {
        self.pop_forcing();
        let record = self.promise_mut(promise)?;
        record.under_evaluation = false;
        if let Some(value) = result {
            record.state = PromiseState::Forced(value);
            self.retain(value)?;
        }
        Ok(())
    }
}
