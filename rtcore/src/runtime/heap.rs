//! Heap storage for values, environments and promises.
//!
//! All three live in generational arenas owned by one `Heap`. Reclamation is
//! split between the refcount path in `copy_on_write` and the tracing pass in
//! `gc`; this module only owns storage, roots and statistics.

use crate::config::GcConfig;
use crate::runtime::arena::Arena;
use crate::runtime::environment::{EnvId, EnvRecord};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::gc::{CollectionPolicy, Root};
use crate::runtime::promise::{PromiseId, PromiseRecord};
use crate::runtime::values::{RefCount, Value, ValueId};

#[derive(Debug)]
pub struct ValueSlot {
    pub(crate) value: Value,
    pub(crate) refs: RefCount,
}

/// Entry point set for the tracing pass.
#[derive(Debug, Default)]
pub(crate) struct RootSet {
    pub(crate) global: Option<EnvId>,
    /// Environment and function of every active call frame.
    pub(crate) frames: Vec<(EnvId, ValueId)>,
    /// Promises whose expression is being evaluated right now.
    pub(crate) forcing: Vec<PromiseId>,
    /// Promises handed to the host, held until it lets go of them.
    pub(crate) held_promises: Vec<PromiseId>,
    /// Temporaries held by the evaluator between allocations.
    pub(crate) protected: Vec<Root>,
}

/// Cumulative counters since the heap was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub values_allocated: usize,
    pub environments_allocated: usize,
    pub promises_allocated: usize,
    /// Values freed because their refcount dropped from one to zero.
    pub refcount_reclaimed: usize,
    /// Tracing passes run, whether triggered or requested.
    pub collections: usize,
    /// Objects of any kind freed by tracing passes.
    pub swept: usize,
}

#[derive(Debug)]
pub struct Heap {
    pub(crate) values: Arena<ValueSlot>,
    pub(crate) environments: Arena<EnvRecord>,
    pub(crate) promises: Arena<PromiseRecord>,
    pub(crate) roots: RootSet,
    pub(crate) policy: CollectionPolicy,
    pub(crate) stats: HeapStats,
    pub(crate) exhausted: Option<RuntimeError>,
}

impl Heap {
    pub fn new(config: &GcConfig) -> Self {
        Heap {
            values: Arena::new(),
            environments: Arena::new(),
            promises: Arena::new(),
            roots: RootSet::default(),
            policy: CollectionPolicy::from_config(config),
            stats: HeapStats::default(),
            exhausted: None,
        }
    }

    /// Allocates a value with a refcount of zero. May run a tracing pass
    /// first; anything `value` refers to is kept alive through it.
    pub fn alloc_value(&mut self, value: Value) -> RuntimeResult<ValueId> {
        let mut pending = Vec::new();
        crate::runtime::gc::value_references(&value, &mut pending);
        self.reserve(&pending)?;
        self.stats.values_allocated += 1;
        Ok(ValueId(self.values.insert(ValueSlot {
            value,
            refs: RefCount::Zero,
        })))
    }

    /// Allocates a list and counts its membership in each element.
    pub fn alloc_list(&mut self, items: Vec<ValueId>) -> RuntimeResult<ValueId> {
        for item in &items {
            self.value(*item)?;
        }
        let members = items.clone();
        let list = self.alloc_value(Value::List(items))?;
        for item in members {
            self.retain(item)?;
        }
        Ok(list)
    }

    pub fn value(&self, id: ValueId) -> RuntimeResult<&Value> {
        self.values
            .get(id.0)
            .map(|slot| &slot.value)
            .ok_or_else(|| stale("value", id))
    }

    pub(crate) fn slot_mut(&mut self, id: ValueId) -> RuntimeResult<&mut ValueSlot> {
        self.values.get_mut(id.0).ok_or_else(|| stale("value", id))
    }

    pub fn contains_value(&self, id: ValueId) -> bool {
        self.values.contains(id.0)
    }

    pub fn contains_environment(&self, env: EnvId) -> bool {
        self.environments.contains(env.0)
    }

    pub fn contains_promise(&self, promise: PromiseId) -> bool {
        self.promises.contains(promise.0)
    }

    /// Live values, environments and promises together.
    pub fn live_slots(&self) -> usize {
        self.values.len() + self.environments.len() + self.promises.len()
    }

    pub fn live_values(&self) -> usize {
        self.values.len()
    }

    pub fn live_environments(&self) -> usize {
        self.environments.len()
    }

    pub fn live_promises(&self) -> usize {
        self.promises.len()
    }

    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    pub fn global(&self) -> Option<EnvId> {
        self.roots.global
    }

    // --- roots ---

    pub(crate) fn set_global(&mut self, env: EnvId) {
        self.roots.global = Some(env);
    }

    pub fn protect(&mut self, root: Root) {
        self.roots.protected.push(root);
    }

    pub fn protect_depth(&self) -> usize {
        self.roots.protected.len()
    }

    /// Drops every protection pushed after `depth` was observed.
    pub fn restore_protect(&mut self, depth: usize) {
        self.roots.protected.truncate(depth);
    }

    /// Held by the evaluator or running as a frame's function.
    pub(crate) fn is_protected(&self, id: ValueId) -> bool {
        self.roots
            .protected
            .iter()
            .any(|root| *root == Root::Value(id))
            || self.roots.frames.iter().any(|(_, function)| *function == id)
    }

    pub(crate) fn push_frame_root(&mut self, env: EnvId, function: ValueId) {
        self.roots.frames.push((env, function));
    }

    pub(crate) fn pop_frame_root(&mut self) {
        self.roots.frames.pop();
    }

    pub(crate) fn push_forcing(&mut self, promise: PromiseId) {
        self.roots.forcing.push(promise);
    }

    pub(crate) fn pop_forcing(&mut self) {
        self.roots.forcing.pop();
    }

    pub(crate) fn hold_promise(&mut self, promise: PromiseId) {
        self.roots.held_promises.push(promise);
    }

    /// Returns whether `promise` was held.
    pub(crate) fn release_promise(&mut self, promise: PromiseId) -> bool {
        match self.roots.held_promises.iter().position(|p| *p == promise) {
            Some(index) => {
                self.roots.held_promises.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

pub(crate) fn stale<T: std::fmt::Debug>(kind: &str, handle: T) -> RuntimeError {
    RuntimeError::InternalError(format!("stale {} handle {:?}", kind, handle))
}
