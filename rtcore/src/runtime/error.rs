// Error handling for the runtime core

use crate::runtime::environment::EnvId;
use crate::runtime::values::ValueId;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures surfaced by evaluation, binding, forcing and collection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// Lookup exhausted the environment chain
    #[error("object '{0}' not found")]
    NameNotFound(String),

    /// A formal parameter was used without an actual argument or default
    #[error("argument \"{0}\" is missing, with no default")]
    MissingArgument(String),

    /// Failure raised while evaluating a deferred argument, reported where
    /// the promise was forced
    #[error("error while forcing promise: {source}")]
    PromiseForcingFailure { source: Box<RuntimeError> },

    /// A promise was forced again from inside its own evaluation
    #[error("promise already under evaluation: recursive default argument reference or earlier problems?")]
    PromiseRecursion,

    /// Mutation through a stale handle or outside the copy-on-write contract
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// The collector could not bring the live heap under its hard limit
    #[error("heap exhausted: {live} live slots after collection, limit is {limit}")]
    CollectionExhausted { live: usize, limit: usize },

    #[error("type error in {operation}: expected {expected}, got {actual}")]
    TypeError {
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("arity mismatch in {function}: expected {expected}, got {actual}")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("attempt to apply non-function: {0}")]
    NotCallable(String),

    #[error("evaluation nested too deeply: call depth limit {0} reached")]
    StackOverflow(usize),

    /// Raised by `stop()`
    #[error("{0}")]
    UserError(String),

    /// `return` evaluated where no call frame runs in the current environment
    #[error("no function to return from, jumping to top level")]
    ReturnOutsideFunction,

    /// Unwinding signal of `return`, caught by the frame running in `env`
    #[error("return from {env:?} escaped its call frame")]
    Return { value: ValueId, env: EnvId },

    /// Logic errors in the runtime itself
    #[error("internal error: {0}")]
    InternalError(String),
}

impl RuntimeError {
    /// Wraps a failure observed while forcing a promise. A failure that is
    /// already a forcing failure, or a `return` unwinding to the frame that
    /// created the promise, is passed through unchanged.
    pub fn forcing(error: RuntimeError) -> RuntimeError {
        match error {
            RuntimeError::PromiseForcingFailure { .. } | RuntimeError::Return { .. } => error,
            other => RuntimeError::PromiseForcingFailure {
                source: Box::new(other),
            },
        }
    }

    /// The innermost failure, looking through forcing wrappers.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::PromiseForcingFailure { source } => source.root_cause(),
            other => other,
        }
    }

    pub fn type_error(expected: &str, actual: &str, operation: &str) -> RuntimeError {
        RuntimeError::TypeError {
            expected: expected.to_string(),
            actual: actual.to_string(),
            operation: operation.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forcing_failures_are_not_wrapped_twice() {
        let inner = RuntimeError::UserError("boom".to_string());
        let once = RuntimeError::forcing(inner.clone());
        let twice = RuntimeError::forcing(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice.root_cause(), &inner);
    }

    #[test]
    fn messages_name_the_failure() {
        let err = RuntimeError::NameNotFound("x".to_string());
        assert_eq!(err.to_string(), "object 'x' not found");
        let err = RuntimeError::forcing(RuntimeError::UserError("bad arg".to_string()));
        assert_eq!(err.to_string(), "error while forcing promise: bad arg");
    }
}
