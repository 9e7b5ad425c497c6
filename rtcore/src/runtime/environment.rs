// Environment for variable bindings and scope management

use crate::ast::Symbol;
use crate::runtime::arena::Handle;
use crate::runtime::error::RuntimeResult;
use crate::runtime::gc::Root;
use crate::runtime::heap::{stale, Heap};
use crate::runtime::promise::PromiseId;
use crate::runtime::values::ValueId;
use indexmap::IndexMap;
use std::fmt;

/// Reference to an environment record. Copying the id never copies the
/// environment: every holder sees the same bindings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(pub(crate) Handle);

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:?})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Value(ValueId),
    Promise(PromiseId),
    /// Formal parameter with no actual argument and no default.
    Missing,
}

/// What a lookup is searching for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    Value,
    /// Skip bindings whose value cannot be invoked.
    Callable,
}

/// The runtime environment record: a scope's bindings and its parent link.
#[derive(Debug)]
pub struct EnvRecord {
    bindings: IndexMap<Symbol, Binding>,
    parent: Option<EnvId>,
    is_root: bool,
}

impl EnvRecord {
    pub fn get(&self, name: &Symbol) -> Option<Binding> {
        self.bindings.get(name).copied()
    }

    pub fn parent(&self) -> Option<EnvId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn bindings(&self) -> impl Iterator<Item = (&Symbol, &Binding)> {
        self.bindings.iter()
    }
}

impl Heap {
    /// Creates the root environment. The root has no parent.
    pub fn new_global_environment(&mut self) -> RuntimeResult<EnvId> {
        self.reserve(&[])?;
        self.stats.environments_allocated += 1;
        let env = EnvId(self.environments.insert(EnvRecord {
            bindings: IndexMap::new(),
            parent: None,
            is_root: true,
        }));
        self.set_global(env);
        Ok(env)
    }

    /// Creates a new, empty environment that inherits from `parent`.
    pub fn new_environment(&mut self, parent: EnvId) -> RuntimeResult<EnvId> {
        self.environment(parent)?;
        self.reserve(&[Root::Environment(parent)])?;
        self.stats.environments_allocated += 1;
        Ok(EnvId(self.environments.insert(EnvRecord {
            bindings: IndexMap::new(),
            parent: Some(parent),
            is_root: false,
        })))
    }

    pub fn environment(&self, env: EnvId) -> RuntimeResult<&EnvRecord> {
        self.environments
            .get(env.0)
            .ok_or_else(|| stale("environment", env))
    }

    fn environment_mut(&mut self, env: EnvId) -> RuntimeResult<&mut EnvRecord> {
        self.environments
            .get_mut(env.0)
            .ok_or_else(|| stale("environment", env))
    }

    pub fn parent_of(&self, env: EnvId) -> RuntimeResult<Option<EnvId>> {
        Ok(self.environment(env)?.parent)
    }

    /// The binding for `name` in exactly this environment.
    pub fn binding(&self, env: EnvId, name: &Symbol) -> RuntimeResult<Option<Binding>> {
        Ok(self.environment(env)?.get(name))
    }

    /// Installs or overwrites `name` in `env` and counts the new reference.
    /// Rebinding a name to the value it already holds changes nothing.
    pub fn bind(&mut self, name: &Symbol, value: ValueId, env: EnvId) -> RuntimeResult<()> {
        self.value(value)?;
        self.install(env, name, Binding::Value(value))
    }

    /// Local assignment: create or overwrite in exactly `env`, never in a
    /// parent.
    pub fn assign(&mut self, name: &Symbol, value: ValueId, env: EnvId) -> RuntimeResult<()> {
        self.bind(name, value, env)
    }

    pub fn bind_promise(
        &mut self,
        name: &Symbol,
        promise: PromiseId,
        env: EnvId,
    ) -> RuntimeResult<()> {
        self.promise(promise)?;
        self.install(env, name, Binding::Promise(promise))
    }

    pub fn bind_missing(&mut self, name: &Symbol, env: EnvId) -> RuntimeResult<()> {
        self.install(env, name, Binding::Missing)
    }

    fn install(&mut self, env: EnvId, name: &Symbol, binding: Binding) -> RuntimeResult<()> {
        let previous = self
            .environment_mut(env)?
            .bindings
            .insert(name.clone(), binding);
        if previous == Some(binding) {
            return Ok(());
        }
        if let Binding::Value(value) = binding {
            self.retain(value)?;
        }
        if let Some(Binding::Value(old)) = previous {
            self.release(old)?;
        }
        Ok(())
    }

    /// Nearest environment, starting at and including `start`, that binds
    /// `name` directly.
    pub fn find_binding_env(&self, name: &Symbol, start: EnvId) -> RuntimeResult<Option<EnvId>> {
        let mut cursor = Some(start);
        while let Some(env) = cursor {
            let record = self.environment(env)?;
            if record.bindings.contains_key(name) {
                return Ok(Some(env));
            }
            cursor = record.parent;
        }
        Ok(None)
    }

    /// The root at the end of `env`'s parent chain.
    pub fn root_of(&self, env: EnvId) -> RuntimeResult<EnvId> {
        let mut current = env;
        while let Some(parent) = self.environment(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Escape assignment: rebind `name` in the nearest environment from
    /// `start` upward that already has it, otherwise create it in the root.
    /// Returns the environment that received the binding.
    pub fn assign_parent(
        &mut self,
        name: &Symbol,
        value: ValueId,
        start: EnvId,
    ) -> RuntimeResult<EnvId> {
        let target = match self.find_binding_env(name, start)? {
            Some(env) => env,
            None => self.root_of(start)?,
        };
        self.bind(name, value, target)?;
        Ok(target)
    }

    /// Drops `name` from exactly `env`, releasing its value. Returns whether
    /// a binding was present.
    pub fn remove_binding(&mut self, name: &Symbol, env: EnvId) -> RuntimeResult<bool> {
        let removed = self.environment_mut(env)?.bindings.shift_remove(name);
        match removed {
            Some(Binding::Value(value)) => {
                self.release(value)?;
                Ok(true)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Names bound directly in `env`, in insertion order.
    pub fn binding_names(&self, env: EnvId) -> RuntimeResult<Vec<Symbol>> {
        Ok(self.environment(env)?.bindings.keys().cloned().collect())
    }
}
