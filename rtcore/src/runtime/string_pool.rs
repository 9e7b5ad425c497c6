// Process-wide string interning shared by string scalars and binding names

use lazy_static::lazy_static;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

lazy_static! {
    /// Entries are never removed, so every `PooledStr` stays valid for the
    /// lifetime of the process.
    static ref STRING_POOL: Mutex<HashSet<Arc<str>>> = Mutex::new(HashSet::new());
}

fn pool() -> MutexGuard<'static, HashSet<Arc<str>>> {
    // A panic while holding the lock cannot leave the set half-updated.
    STRING_POOL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the canonical interned copy of a string.
#[derive(Clone)]
pub struct PooledStr(Arc<str>);

impl PooledStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both handles point at the same pool entry.
    pub fn same_entry(&self, other: &PooledStr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Returns the pool entry for `s`, creating it on first use.
pub fn intern(s: &str) -> PooledStr {
    let mut pool = pool();
    if let Some(existing) = pool.get(s) {
        return PooledStr(existing.clone());
    }
    let entry: Arc<str> = Arc::from(s);
    pool.insert(entry.clone());
    PooledStr(entry)
}

/// Number of distinct strings interned so far.
pub fn pool_size() -> usize {
    pool().len()
}

impl PartialEq for PooledStr {
    fn eq(&self, other: &Self) -> bool {
        self.same_entry(other) || self.0 == other.0
    }
}

impl Eq for PooledStr {}

impl Hash for PooledStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Borrow<str> for PooledStr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for PooledStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PooledStr {
    fn from(s: &str) -> Self {
        intern(s)
    }
}

impl fmt::Display for PooledStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PooledStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}
