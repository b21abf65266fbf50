//! Cycle-detecting collector layered on top of reference counting.
//!
//! Reference counting frees acyclic data on its own; this collector handles
//! the rest. Starting from the root environments (global, modules, and the
//! active call chain — evaluation is paused while we run, so transient
//! frames root their contents), it marks every reachable heap slot and
//! environment frame, then treats unreachable-but-referenced slots and
//! frames as cycle members: their internal references are cleared (references
//! *into* the candidate set are forgotten, references *out* of it are
//! dropped normally) and the members are freed. Acyclic data never shows up
//! here, so linear structures and DAGs produce no false positives.
//!
//! Collection runs only at safe points: statement boundaries (the
//! automatic trigger), the `gc_collect()` builtin evaluated in statement
//! or binding position, and interpreter shutdown. At those points every
//! live value is reachable from an environment frame, so the root set is
//! complete.

use crate::{
    env::{EnvId, Environments},
    heap::{Heap, HeapId},
    resource::ResourceTracker,
    value::{Value, drain_release_queues},
};

/// What one collector run reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcReport {
    /// Heap slots freed as cycle members.
    pub collected_values: usize,
    /// Environment frames freed as cycle members.
    pub collected_frames: usize,
}

/// Runs one stop-the-world mark/sweep pass over the value graph.
pub(crate) fn collect(
    heap: &mut Heap<impl ResourceTracker>,
    envs: &mut Environments,
    roots: &[EnvId],
) -> GcReport {
    if !heap.may_have_cycles() {
        heap.note_gc_complete();
        return GcReport::default();
    }

    // Mark phase. Reaching an environment marks its bindings and its parent
    // chain (lookups can resolve through parents); reaching a function marks
    // its captured environment.
    let mut heap_marked = vec![false; heap.len()];
    let mut env_marked = vec![false; envs.arena_len()];
    let mut heap_work: Vec<HeapId> = Vec::new();
    let mut env_work: Vec<EnvId> = roots.to_vec();

    loop {
        if let Some(env) = env_work.pop() {
            let idx = env.index();
            if idx >= env_marked.len() || env_marked[idx] || !envs.is_live(env) {
                continue;
            }
            env_marked[idx] = true;
            heap_work.extend(envs.frame_heap_ids(env));
            if let Some(parent) = envs.parent(env) {
                env_work.push(parent);
            }
            continue;
        }
        if let Some(id) = heap_work.pop() {
            let idx = id.index();
            if idx >= heap_marked.len() || heap_marked[idx] || !heap.is_live(id) {
                continue;
            }
            heap_marked[idx] = true;
            let data = heap.get(id);
            data.collect_child_ids(&mut heap_work);
            if let Some(captured) = data.captured_env() {
                env_work.push(captured);
            }
            continue;
        }
        break;
    }

    // Sweep phase: everything live but unmarked is a cycle candidate.
    let heap_candidates: Vec<HeapId> = heap
        .live_slot_ids()
        .filter(|id| !heap_marked[id.index()])
        .collect();
    let env_candidates: Vec<EnvId> = envs
        .live_frames()
        .filter(|env| !env_marked[env.index()])
        .collect();

    if heap_candidates.is_empty() && env_candidates.is_empty() {
        heap.note_gc_complete();
        return GcReport::default();
    }

    let in_heap_candidates = |id: HeapId| !heap_marked[id.index()];
    let in_env_candidates = |env: EnvId| !env_marked[env.index()];

    // Break the cycles. References between candidates are forgotten (both
    // endpoints die in this pass); references leaving the candidate set are
    // queued for a normal refcount drop.
    let mut heap_q: Vec<HeapId> = Vec::new();
    let mut env_q: Vec<EnvId> = Vec::new();

    for &env in &env_candidates {
        for (_, value) in envs.take_bindings(env) {
            if let Value::Ref(child) = value
                && !in_heap_candidates(child)
            {
                heap_q.push(child);
            }
        }
        if let Some(parent) = envs.parent(env)
            && !in_env_candidates(parent)
        {
            env_q.push(parent);
        }
    }

    for &id in &heap_candidates {
        let (children, captured) = heap.clear_slot_children(id);
        for child in children {
            if !in_heap_candidates(child) {
                heap_q.push(child);
            }
        }
        if let Some(env) = captured
            && !in_env_candidates(env)
        {
            env_q.push(env);
        }
    }

    for &env in &env_candidates {
        envs.free_frame(env);
    }
    for &id in &heap_candidates {
        heap.free_slot(id);
    }

    // Outbound references cascade through normal reference counting.
    drain_release_queues(heap, envs, heap_q, env_q);

    heap.note_gc_complete();
    GcReport {
        collected_values: heap_candidates.len(),
        collected_frames: env_candidates.len(),
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::{
        heap::HeapData,
        resource::LimitedTracker,
        value::drop_value,
    };

    fn setup() -> (Heap<LimitedTracker>, Environments, EnvId) {
        let mut envs = Environments::new();
        let global = envs.new_frame(None);
        (Heap::new(LimitedTracker::unlimited()), envs, global)
    }

    #[test]
    fn acyclic_data_is_not_collected() {
        let (mut heap, mut envs, global) = setup();
        let inner = heap.allocate(HeapData::List(vec![Value::Int(1)])).unwrap();
        let outer = heap.allocate(HeapData::List(vec![Value::Ref(inner)])).unwrap();
        envs.define(global, "xs", Value::Ref(outer));

        let report = collect(&mut heap, &mut envs, &[global]);
        assert_eq!(report.collected_values, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn dict_cycle_is_collected_once_unrooted() {
        let (mut heap, mut envs, global) = setup();
        let a = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        let b = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        // a.next = b; b.next = a (each reference owns one count)
        heap.inc_ref(b);
        if let HeapData::Dict(entries) = heap.get_mut(a) {
            entries.insert("next".to_owned(), Value::Ref(b));
        }
        heap.inc_ref(a);
        if let HeapData::Dict(entries) = heap.get_mut(b) {
            entries.insert("next".to_owned(), Value::Ref(a));
        }

        // Drop the creating references; only the cycle's internal counts remain.
        drop_value(Value::Ref(a), &mut heap, &mut envs);
        drop_value(Value::Ref(b), &mut heap, &mut envs);
        assert_eq!(heap.live_count(), 2);

        let report = collect(&mut heap, &mut envs, &[global]);
        assert_eq!(report.collected_values, 2);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn rooted_cycle_survives() {
        let (mut heap, mut envs, global) = setup();
        let a = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        let b = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        heap.inc_ref(b);
        if let HeapData::Dict(entries) = heap.get_mut(a) {
            entries.insert("next".to_owned(), Value::Ref(b));
        }
        heap.inc_ref(a);
        if let HeapData::Dict(entries) = heap.get_mut(b) {
            entries.insert("next".to_owned(), Value::Ref(a));
        }
        // Keep `a` rooted in the global environment.
        envs.define(global, "a", Value::Ref(a));
        drop_value(Value::Ref(b), &mut heap, &mut envs);

        let report = collect(&mut heap, &mut envs, &[global]);
        assert_eq!(report.collected_values, 0);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn cycle_with_acyclic_hanger_frees_both() {
        let (mut heap, mut envs, global) = setup();
        // cycle: a <-> b ; b also holds a string reachable only via the cycle
        let s = heap.allocate(HeapData::Str("dangling".into())).unwrap();
        let a = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        let b = heap.allocate(HeapData::Dict(IndexMap::new())).unwrap();
        heap.inc_ref(b);
        if let HeapData::Dict(entries) = heap.get_mut(a) {
            entries.insert("next".to_owned(), Value::Ref(b));
        }
        heap.inc_ref(a);
        if let HeapData::Dict(entries) = heap.get_mut(b) {
            entries.insert("next".to_owned(), Value::Ref(a));
            entries.insert("tail".to_owned(), Value::Ref(s));
        }
        drop_value(Value::Ref(a), &mut heap, &mut envs);
        drop_value(Value::Ref(b), &mut heap, &mut envs);
        assert_eq!(heap.live_count(), 3);

        let report = collect(&mut heap, &mut envs, &[global]);
        // The string is unreachable too, so it is collected in the same pass.
        assert_eq!(report.collected_values, 3);
        assert_eq!(heap.live_count(), 0);
    }
}
