// Runtime core
// Heap, copy-on-write values, environments, promises, the collector and the
// evaluator that drives them

pub mod arena;
pub mod copy_on_write;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod gc;
pub mod heap;
pub mod promise;
pub mod stdlib;
pub mod string_pool;
pub mod values;

pub use copy_on_write::Element;
pub use environment::{Binding, EnvId, EnvRecord, LookupMode};
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::Evaluator;
pub use frame::{CallFrame, OnExitAction};
pub use gc::{GcReport, Root};
pub use heap::{Heap, HeapStats};
pub use promise::{PromiseId, PromiseState};
pub use stdlib::StandardLibrary;
pub use string_pool::{intern, PooledStr};
pub use values::{
    Arity, AtomicVector, BuiltinFunction, Closure, Function, RefCount, Scalar, ScalarKind, Value,
    ValueId,
};
