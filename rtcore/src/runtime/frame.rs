// Call frames and deferred on-exit actions

use crate::ast::Expression;
use crate::runtime::environment::EnvId;
use crate::runtime::error::RuntimeResult;
use crate::runtime::evaluator::Evaluator;
use crate::runtime::values::ValueId;
use std::fmt;
use std::rc::Rc;

pub type NativeAction = Box<dyn FnOnce(&mut Evaluator) -> RuntimeResult<()>>;

/// Cleanup registered against a frame. Runs once when the frame exits,
/// whether it returns or fails.
pub enum OnExitAction {
    /// Evaluated in the frame's own environment.
    Expression(Rc<Expression>),
    Native(NativeAction),
}

impl OnExitAction {
    pub fn native(action: impl FnOnce(&mut Evaluator) -> RuntimeResult<()> + 'static) -> Self {
        OnExitAction::Native(Box::new(action))
    }
}

impl fmt::Debug for OnExitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnExitAction::Expression(expr) => f.debug_tuple("Expression").field(expr).finish(),
            OnExitAction::Native(_) => f.write_str("Native(..)"),
        }
    }
}

#[derive(Debug)]
pub struct CallFrame {
    pub env: EnvId,
    /// The closure being run; rooted for as long as the frame is active.
    pub function: ValueId,
    pub(crate) on_exit: Vec<OnExitAction>,
}

impl CallFrame {
    pub(crate) fn new(env: EnvId, function: ValueId) -> Self {
        CallFrame {
            env,
            function,
            on_exit: Vec::new(),
        }
    }

    pub fn pending_on_exit(&self) -> usize {
        self.on_exit.len()
    }
}
