//! Tracing collector.
//!
//! Refcounting frees acyclic values as soon as their last counted reference
//! goes away. Everything else (environment cycles, closures capturing their
//! own frame, values whose count saturated) is left to the mark-sweep pass
//! here, which walks values, environments and promises from the root set.

use crate::config::GcConfig;
use crate::runtime::environment::{Binding, EnvId};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::heap::Heap;
use crate::runtime::promise::{PromiseId, PromiseState};
use crate::runtime::values::{Closure, Function, Value, ValueId};

/// Anything the tracing pass can start from or reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Root {
    Value(ValueId),
    Environment(EnvId),
    Promise(PromiseId),
}

/// Outgoing references held inside a value payload.
pub(crate) fn value_references(value: &Value, out: &mut Vec<Root>) {
    match value {
        Value::List(items) => out.extend(items.iter().copied().map(Root::Value)),
        Value::Function(Function::Closure(Closure { env, .. })) => {
            out.push(Root::Environment(*env))
        }
        Value::Environment(env) => out.push(Root::Environment(*env)),
        Value::Null | Value::Scalar(_) | Value::Vector(_) | Value::Function(Function::Builtin(_)) => {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CollectionPolicy {
    pub(crate) threshold: usize,
    pub(crate) min_threshold: usize,
    pub(crate) growth_factor: usize,
    pub(crate) max_heap_slots: usize,
}

impl CollectionPolicy {
    pub(crate) fn from_config(config: &GcConfig) -> Self {
        CollectionPolicy {
            threshold: config.initial_threshold,
            min_threshold: config.min_threshold,
            growth_factor: config.growth_factor,
            max_heap_slots: config.max_heap_slots,
        }
    }

    fn next_threshold(&self, live: usize) -> usize {
        self.min_threshold.max(live.saturating_mul(self.growth_factor))
    }
}

/// Outcome of one tracing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub values_freed: usize,
    pub environments_freed: usize,
    pub promises_freed: usize,
    pub live_after: usize,
}

impl GcReport {
    pub fn total_freed(&self) -> usize {
        self.values_freed + self.environments_freed + self.promises_freed
    }
}

struct Marks {
    values: Vec<bool>,
    environments: Vec<bool>,
    promises: Vec<bool>,
}

/// Sets the mark for `index`, returning whether it was newly set.
fn mark(bits: &mut [bool], index: usize) -> bool {
    match bits.get_mut(index) {
        Some(bit) if !*bit => {
            *bit = true;
            true
        }
        _ => false,
    }
}

impl Heap {
    /// Makes room for one allocation. Runs a tracing pass when the live heap
    /// has reached the current threshold; `pending` holds references of the
    /// object about to be allocated, which are not reachable from any root
    /// yet. Once the heap has been reported exhausted every later call fails.
    pub(crate) fn reserve(&mut self, pending: &[Root]) -> RuntimeResult<()> {
        if let Some(err) = &self.exhausted {
            return Err(err.clone());
        }
        if self.live_slots() < self.policy.threshold {
            return Ok(());
        }
        let report = self.collect_with(pending);
        self.policy.threshold = self.policy.next_threshold(report.live_after);
        if report.live_after >= self.policy.max_heap_slots {
            let err = RuntimeError::CollectionExhausted {
                live: report.live_after,
                limit: self.policy.max_heap_slots,
            };
            log::error!("{}", err);
            self.exhausted = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Explicitly requested pass. Does not move the trigger threshold.
    pub fn collect_garbage(&mut self) -> GcReport {
        self.collect_with(&[])
    }

    /// Error that poisoned this heap, if any.
    pub fn exhausted(&self) -> Option<&RuntimeError> {
        self.exhausted.as_ref()
    }

    pub(crate) fn collect_with(&mut self, extra: &[Root]) -> GcReport {
        let marks = self.mark_from_roots(extra);
        let report = self.sweep(&marks);
        self.stats.collections += 1;
        self.stats.swept += report.total_freed();
        log::debug!(
            "gc: freed {} values, {} environments, {} promises; {} live",
            report.values_freed,
            report.environments_freed,
            report.promises_freed,
            report.live_after
        );
        report
    }

    fn mark_from_roots(&self, extra: &[Root]) -> Marks {
        let mut marks = Marks {
            values: vec![false; self.values.capacity()],
            environments: vec![false; self.environments.capacity()],
            promises: vec![false; self.promises.capacity()],
        };

        let mut work: Vec<Root> = Vec::new();
        work.extend(self.roots.global.map(Root::Environment));
        for (env, function) in &self.roots.frames {
            work.push(Root::Environment(*env));
            work.push(Root::Value(*function));
        }
        work.extend(self.roots.forcing.iter().copied().map(Root::Promise));
        work.extend(self.roots.held_promises.iter().copied().map(Root::Promise));
        work.extend(self.roots.protected.iter().copied());
        work.extend(extra.iter().copied());

        while let Some(root) = work.pop() {
            match root {
                Root::Value(id) => {
                    let Some(slot) = self.values.get(id.0) else {
                        continue;
                    };
                    if mark(&mut marks.values, id.0.index()) {
                        value_references(&slot.value, &mut work);
                    }
                }
                Root::Environment(env) => {
                    let Some(record) = self.environments.get(env.0) else {
                        continue;
                    };
                    if !mark(&mut marks.environments, env.0.index()) {
                        continue;
                    }
                    work.extend(record.parent().map(Root::Environment));
                    for (_, binding) in record.bindings() {
                        match binding {
                            Binding::Value(value) => work.push(Root::Value(*value)),
                            Binding::Promise(promise) => work.push(Root::Promise(*promise)),
                            Binding::Missing => {}
                        }
                    }
                }
                Root::Promise(promise) => {
                    let Some(record) = self.promises.get(promise.0) else {
                        continue;
                    };
                    if !mark(&mut marks.promises, promise.0.index()) {
                        continue;
                    }
                    match record.state() {
                        PromiseState::Unforced { env, .. } => work.push(Root::Environment(*env)),
                        PromiseState::Forced(value) => work.push(Root::Value(*value)),
                    }
                }
            }
        }
        marks
    }

    fn sweep(&mut self, marks: &Marks) -> GcReport {
        let mut report = GcReport::default();

        let dead: Vec<_> = self
            .values
            .handles()
            .filter(|handle| !marks.values[handle.index()])
            .collect();
        for handle in dead {
            if self.values.remove(handle).is_some() {
                report.values_freed += 1;
            }
        }

        let dead: Vec<_> = self
            .environments
            .handles()
            .filter(|handle| !marks.environments[handle.index()])
            .collect();
        for handle in dead {
            if self.environments.remove(handle).is_some() {
                report.environments_freed += 1;
            }
        }

        let dead: Vec<_> = self
            .promises
            .handles()
            .filter(|handle| !marks.promises[handle.index()])
            .collect();
        for handle in dead {
            if self.promises.remove(handle).is_some() {
                report.promises_freed += 1;
            }
        }

        report.live_after = self.live_slots();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Symbol;
    use crate::runtime::values::Scalar;

    fn int(heap: &mut Heap, n: i64) -> ValueId {
        heap.alloc_value(Value::Scalar(Scalar::Integer(n))).unwrap()
    }

    #[test]
    fn self_referencing_environment_is_swept_once_unreachable() {
        let mut heap = Heap::new(&GcConfig::default());
        let global = heap.new_global_environment().unwrap();
        let env = heap.new_environment(global).unwrap();
        let handle = heap.alloc_value(Value::Environment(env)).unwrap();
        heap.bind(&Symbol::new("self"), handle, env).unwrap();
        heap.bind(&Symbol::new("e"), handle, global).unwrap();

        assert_eq!(heap.collect_garbage().total_freed(), 0);
        assert!(heap.contains_environment(env));

        heap.remove_binding(&Symbol::new("e"), global).unwrap();
        let report = heap.collect_garbage();
        assert_eq!(report.environments_freed, 1);
        assert!(!heap.contains_environment(env));
        assert!(!heap.contains_value(handle));
    }

    #[test]
    fn protected_temporaries_survive() {
        let mut heap = Heap::new(&GcConfig::default());
        heap.new_global_environment().unwrap();
        let kept = int(&mut heap, 1);
        let dropped = int(&mut heap, 2);
        heap.protect(Root::Value(kept));

        let report = heap.collect_garbage();
        assert_eq!(report.values_freed, 1);
        assert!(heap.contains_value(kept));
        assert!(!heap.contains_value(dropped));
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.stats().swept, 1);
    }

    #[test]
    fn held_promise_and_its_environment_survive() {
        let mut heap = Heap::new(&GcConfig::default());
        let global = heap.new_global_environment().unwrap();
        let env = heap.new_environment(global).unwrap();
        let promise = heap
            .new_promise(std::rc::Rc::new(crate::ast::Expression::int(1)), env)
            .unwrap();
        heap.hold_promise(promise);

        assert_eq!(heap.collect_garbage().total_freed(), 0);
        assert!(heap.contains_promise(promise));
        assert!(heap.contains_environment(env));

        assert!(heap.release_promise(promise));
        let report = heap.collect_garbage();
        assert_eq!(report.promises_freed, 1);
        assert_eq!(report.environments_freed, 1);
        assert!(!heap.release_promise(promise));
    }

    #[test]
    fn threshold_grows_after_triggered_pass() {
        let config = GcConfig {
            initial_threshold: 4,
            min_threshold: 4,
            growth_factor: 2,
            max_heap_slots: 1000,
        };
        let mut heap = Heap::new(&config);
        let global = heap.new_global_environment().unwrap();
        for n in 0..5 {
            let v = int(&mut heap, n);
            heap.bind(&Symbol::new(&format!("v{}", n)), v, global).unwrap();
        }
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.policy.threshold, 8);
    }

    #[test]
    fn exhaustion_is_sticky() {
        let config = GcConfig {
            initial_threshold: 2,
            min_threshold: 2,
            growth_factor: 1,
            max_heap_slots: 3,
        };
        let mut heap = Heap::new(&config);
        let global = heap.new_global_environment().unwrap();
        let mut failure = None;
        for n in 0..10 {
            match heap.alloc_value(Value::Scalar(Scalar::Integer(n))) {
                Ok(v) => heap.bind(&Symbol::new(&format!("v{}", n)), v, global).unwrap(),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        assert!(matches!(
            failure,
            Some(RuntimeError::CollectionExhausted { limit: 3, .. })
        ));
        assert!(heap.exhausted().is_some());
        assert!(heap.collect_garbage().live_after >= 3);
        assert!(heap.alloc_value(Value::Null).is_err());
    }
}
