//! Reference counting and the copy-on-write rule.
//!
//! A value may be changed in place only while exactly one counted reference
//! (binding, list membership or forced promise) points at it. Anything else
//! is copied first. Counts saturate at `Many`, so a value that was ever
//! shared is copied on every later mutation even if the other references
//! are gone.

use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::gc::Root;
use crate::runtime::heap::Heap;
use crate::runtime::values::{AtomicVector, RefCount, Scalar, Value, ValueId};
use std::collections::HashSet;

/// Result of reading one position of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// List element: the stored reference itself.
    Value(ValueId),
    /// Vector element: a scalar copied out of the vector.
    Scalar(Scalar),
}

impl Heap {
    pub fn refcount_state(&self, id: ValueId) -> RuntimeResult<RefCount> {
        self.values
            .get(id.0)
            .map(|slot| slot.refs)
            .ok_or_else(|| crate::runtime::heap::stale("value", id))
    }

    pub(crate) fn retain(&mut self, id: ValueId) -> RuntimeResult<()> {
        let slot = self.slot_mut(id)?;
        slot.refs = slot.refs.increment();
        Ok(())
    }

    /// Drops one counted reference. A value going from one to zero is freed
    /// at once unless the evaluator still holds it; freeing a list releases
    /// its elements in turn.
    pub(crate) fn release(&mut self, id: ValueId) -> RuntimeResult<()> {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let before = match self.values.get_mut(id.0) {
                Some(slot) => {
                    let before = slot.refs;
                    slot.refs = before.decrement();
                    before
                }
                // Already taken by a tracing pass.
                None => continue,
            };
            if before != RefCount::One || self.is_protected(id) {
                continue;
            }
            if let Some(slot) = self.values.remove(id.0) {
                self.stats.refcount_reclaimed += 1;
                if let Value::List(items) = slot.value {
                    pending.extend(items);
                }
            }
        }
        Ok(())
    }

    /// Duplicates the top level of a value. List elements are shared with
    /// the original, not copied. Environments are returned as-is.
    pub fn shallow_copy(&mut self, id: ValueId) -> RuntimeResult<ValueId> {
        let value = self.value(id)?.clone();
        if let Value::Environment(_) = value {
            return Ok(id);
        }
        let shared = match &value {
            Value::List(items) => items.clone(),
            _ => Vec::new(),
        };
        let copy = self.alloc_value(value)?;
        for item in shared {
            self.retain(item)?;
        }
        log::debug!("copy-on-write: {:?} duplicated as {:?}", id, copy);
        Ok(copy)
    }

    /// Replaces the element at `path` (zero-based, one position per nesting
    /// level) with `new_elem`. Returns `target` itself when it was changed in
    /// place, or the identity of the copy that received the change.
    pub fn mutate(
        &mut self,
        target: ValueId,
        path: &[usize],
        new_elem: ValueId,
    ) -> RuntimeResult<ValueId> {
        if !self.contains_value(target) {
            return Err(RuntimeError::InvalidMutation(format!(
                "target {:?} is no longer live",
                target
            )));
        }
        if !self.contains_value(new_elem) {
            return Err(RuntimeError::InvalidMutation(format!(
                "new element {:?} is no longer live",
                new_elem
            )));
        }
        let (&index, rest) = path
            .split_first()
            .ok_or_else(|| RuntimeError::InvalidMutation("empty element path".to_string()))?;

        let depth = self.protect_depth();
        self.protect(Root::Value(target));
        self.protect(Root::Value(new_elem));
        let result = self.mutate_level(target, index, rest, new_elem);
        self.restore_protect(depth);
        result
    }

    fn mutate_level(
        &mut self,
        target: ValueId,
        index: usize,
        rest: &[usize],
        new_elem: ValueId,
    ) -> RuntimeResult<ValueId> {
        // The outer level is made unique before descending, so a copied
        // list hands its elements to the copy as shared.
        let owner = self.make_unique(target, new_elem)?;
        self.protect(Root::Value(owner));
        let replacement = match rest.split_first() {
            None => new_elem,
            Some((&next, rest)) => {
                let child = self.list_element(owner, index)?;
                let replaced = self.mutate_level(child, next, rest, new_elem)?;
                self.protect(Root::Value(replaced));
                replaced
            }
        };
        self.replace_element(owner, index, replacement)?;
        Ok(owner)
    }

    /// A level that `incoming` reaches counts as shared even at one
    /// reference: storing `incoming` into it in place would make the level
    /// contain itself.
    fn make_unique(&mut self, id: ValueId, incoming: ValueId) -> RuntimeResult<ValueId> {
        if self.refcount_state(id)? == RefCount::One && !self.reaches(incoming, id)? {
            Ok(id)
        } else {
            self.shallow_copy(id)
        }
    }

    /// Whether `to` is `from` or one of its (nested) list elements.
    fn reaches(&self, from: ValueId, to: ValueId) -> RuntimeResult<bool> {
        let mut pending = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = pending.pop() {
            if id == to {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            if let Value::List(items) = self.value(id)? {
                pending.extend(items.iter().copied());
            }
        }
        Ok(false)
    }

    /// In-place store into `owner`, which must already be unique.
    fn replace_element(
        &mut self,
        owner: ValueId,
        index: usize,
        replacement: ValueId,
    ) -> RuntimeResult<()> {
        let incoming = self.value(replacement)?;
        let scalar = incoming.as_scalar().cloned();
        let incoming_type = incoming.type_name();

        let slot = self.slot_mut(owner)?;
        let displaced = match &mut slot.value {
            Value::List(items) => {
                let length = items.len();
                if index > length {
                    return Err(RuntimeError::IndexOutOfBounds { index, length });
                }
                if index == length {
                    items.push(replacement);
                    None
                } else {
                    Some(std::mem::replace(&mut items[index], replacement))
                }
            }
            Value::Vector(vector) => {
                let scalar = scalar.ok_or_else(|| {
                    RuntimeError::type_error("scalar", incoming_type, "vector element assignment")
                })?;
                let length = vector.len();
                if !vector.set(index, scalar) {
                    return Err(RuntimeError::IndexOutOfBounds { index, length });
                }
                return Ok(());
            }
            Value::Scalar(existing) => {
                let scalar = scalar.ok_or_else(|| {
                    RuntimeError::type_error("scalar", incoming_type, "vector element assignment")
                })?;
                let mut vector = AtomicVector::from_scalars(vec![existing.clone()]);
                if !vector.set(index, scalar) {
                    return Err(RuntimeError::IndexOutOfBounds { index, length: 1 });
                }
                slot.value = match vector.elements() {
                    [single] => Value::Scalar(single.clone()),
                    _ => Value::Vector(vector),
                };
                return Ok(());
            }
            other => {
                return Err(RuntimeError::type_error(
                    "vector or list",
                    other.type_name(),
                    "element assignment",
                ))
            }
        };

        match displaced {
            Some(old) if old == replacement => {}
            Some(old) => {
                self.retain(replacement)?;
                self.release(old)?;
            }
            None => self.retain(replacement)?,
        }
        Ok(())
    }

    /// The reference stored at `index` of a list.
    pub fn list_element(&self, id: ValueId, index: usize) -> RuntimeResult<ValueId> {
        match self.value(id)? {
            Value::List(items) => items.get(index).copied().ok_or(RuntimeError::IndexOutOfBounds {
                index,
                length: items.len(),
            }),
            other => Err(RuntimeError::type_error(
                "list",
                other.type_name(),
                "nested element assignment",
            )),
        }
    }

    /// Reads position `index` of a list, vector or scalar.
    pub fn element(&self, id: ValueId, index: usize) -> RuntimeResult<Element> {
        let value = self.value(id)?;
        let out_of_bounds = RuntimeError::IndexOutOfBounds {
            index,
            length: value.len(),
        };
        match value {
            Value::List(items) => items.get(index).copied().map(Element::Value).ok_or(out_of_bounds),
            Value::Vector(vector) => vector
                .elements()
                .get(index)
                .cloned()
                .map(Element::Scalar)
                .ok_or(out_of_bounds),
            Value::Scalar(scalar) if index == 0 => Ok(Element::Scalar(scalar.clone())),
            Value::Scalar(_) => Err(out_of_bounds),
            other => Err(RuntimeError::type_error(
                "vector or list",
                other.type_name(),
                "element extraction",
            )),
        }
    }
}
