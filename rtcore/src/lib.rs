// rtcore: runtime memory and binding core
// Copy-on-write values, reference-semantics environments, lazy promises and
// a hybrid refcount/tracing collector. Expressions are built through `ast`;
// there is no parser.

pub mod ast;
pub mod config;
pub mod runtime;

pub use ast::{Argument, Expression, Formal, Symbol};
pub use config::{ConfigError, GcConfig, RuntimeConfig};
pub use runtime::{
    Binding, EnvId, Evaluator, LookupMode, OnExitAction, PromiseId, RefCount, RuntimeError,
    RuntimeResult, Scalar, Value, ValueId,
};
