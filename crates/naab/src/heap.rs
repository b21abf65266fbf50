//! Arena heap with explicit reference counting.
//!
//! Heap-resident data (strings, containers, callables, struct instances,
//! block handles, module values) lives in slots addressed by [`HeapId`].
//! Values hold ids, not pointers; cloning a value increments the slot's
//! count and dropping decrements it. Frees cascade through an explicit work
//! list so deeply nested data never recurses, and the cycle detector
//! ([`crate::gc`]) reclaims what counting alone cannot.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::{
    env::EnvId,
    function::FunctionId,
    polyglot::BlockData,
    resource::{ResourceError, ResourceTracker},
    stdlib::StdlibModule,
    structs::{EnumId, StructId},
    value::Value,
};

/// Index of a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("heap index overflow"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Data stored in a heap slot.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    List(Vec<Value>),
    /// Insertion-order-preserving mapping. Ranges are dicts with the
    /// distinguished `__is_range` / `__range_start` / `__range_end` keys.
    Dict(IndexMap<String, Value>),
    /// A user-defined function together with its captured environment.
    Function { func: FunctionId, captured_env: EnvId },
    /// A struct instance; fields are positional, named by the definition.
    Struct { def: StructId, fields: Vec<Value> },
    /// An enum value: definition plus variant index.
    Enum { def: EnumId, variant: u32 },
    /// Opaque handle to a polyglot code fragment.
    Block(BlockData),
    /// An imported module alias; member access resolves in the module env.
    Module(EnvId),
    /// A recognized stdlib module alias.
    Stdlib(StdlibModule),
}

impl HeapData {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Dict(_) => "Dict",
            Self::Function { .. } => "Function",
            Self::Struct { .. } => "Struct",
            Self::Enum { .. } => "Enum",
            Self::Block(_) => "Block",
            Self::Module(_) => "Module",
            Self::Stdlib(_) => "Stdlib",
        }
    }

    /// Approximate size in bytes, for resource accounting.
    pub fn estimate_size(&self) -> usize {
        match self {
            Self::Str(s) => s.len(),
            Self::List(items) => items.len() * size_of::<Value>(),
            Self::Dict(entries) => entries.len() * (size_of::<Value>() + 16),
            Self::Struct { fields, .. } => fields.len() * size_of::<Value>(),
            Self::Block(block) => block.source.len(),
            Self::Function { .. } | Self::Enum { .. } | Self::Module(_) | Self::Stdlib(_) => 16,
        }
    }

    /// True when this slot can reference other heap slots or environments,
    /// i.e. when it can participate in a cycle.
    pub fn can_reference(&self) -> bool {
        matches!(
            self,
            Self::List(_) | Self::Dict(_) | Self::Struct { .. } | Self::Function { .. } | Self::Module(_)
        )
    }

    /// Pushes the ids of directly referenced heap slots onto `out`.
    pub fn collect_child_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::Enum { .. } | Self::Block(_) | Self::Stdlib(_) | Self::Function { .. } | Self::Module(_) => {}
            Self::List(items) => {
                for value in items {
                    if let Value::Ref(id) = value {
                        out.push(*id);
                    }
                }
            }
            Self::Dict(entries) => {
                for value in entries.values() {
                    if let Value::Ref(id) = value {
                        out.push(*id);
                    }
                }
            }
            Self::Struct { fields, .. } => {
                for value in fields {
                    if let Value::Ref(id) = value {
                        out.push(*id);
                    }
                }
            }
        }
    }

    /// The environment this slot keeps alive, if any.
    pub fn captured_env(&self) -> Option<EnvId> {
        match self {
            Self::Function { captured_env, .. } => Some(*captured_env),
            Self::Module(env) => Some(*env),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct HeapEntry {
    data: HeapData,
    ref_count: u32,
    /// Secret-hygiene marker; set via `mark_sensitive`.
    sensitive: bool,
}

/// Snapshot of heap occupancy, exposed to hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live slots.
    pub live_objects: usize,
    /// Recycled slots available for reuse.
    pub free_slots: usize,
    /// Total slot capacity (live + free).
    pub total_slots: usize,
    /// Live objects broken down by variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// The arena. Generic over the resource tracker so sandboxed and
/// unrestricted heaps share one implementation.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
    tracker: T,
    /// Allocations since the last cycle-collector run; the evaluator
    /// consults this at statement boundaries.
    allocations_since_gc: usize,
    /// Set when an allocation could have created a cycle. A clean flag lets
    /// the collector skip the mark phase entirely.
    may_have_cycles: bool,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
            may_have_cycles: false,
        }
    }

    /// Allocates a slot with reference count 1.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        self.allocations_since_gc += 1;
        if data.can_reference() {
            self.may_have_cycles = true;
        }
        let entry = HeapEntry {
            data,
            ref_count: 1,
            sensitive: false,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            Ok(id)
        } else {
            let id = HeapId::new(self.entries.len());
            self.entries.push(Some(entry));
            Ok(id)
        }
    }

    /// # Panics
    /// Panics when `id` addresses a freed slot; that is a refcounting bug in
    /// the core, not a user error.
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("access to freed heap slot {id:?}"))
            .data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("access to freed heap slot {id:?}"))
            .data
    }

    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    pub fn ref_count(&self, id: HeapId) -> u32 {
        self.entries[id.index()].as_ref().map_or(0, |e| e.ref_count)
    }

    pub fn is_sensitive(&self, id: HeapId) -> bool {
        self.entries[id.index()].as_ref().is_some_and(|e| e.sensitive)
    }

    pub fn set_sensitive(&mut self, id: HeapId) {
        if let Some(entry) = self.entries.get_mut(id.index()).and_then(Option::as_mut) {
            entry.sensitive = true;
        }
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self.entries[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("inc_ref on freed heap slot {id:?}"));
        entry.ref_count += 1;
    }

    /// Decrements `id`, freeing the slot when the count reaches zero.
    /// Children of a freed slot are pushed onto the work lists instead of
    /// being freed recursively; [`crate::value::drop_value`] drains them.
    pub fn dec_ref_collect(&mut self, id: HeapId, heap_q: &mut Vec<HeapId>, env_q: &mut Vec<EnvId>) {
        let Some(entry) = self.entries.get_mut(id.index()).and_then(Option::as_mut) else {
            // Freed by an earlier cascade step or by the cycle collector.
            return;
        };
        debug_assert!(entry.ref_count > 0, "dec_ref on zero-count slot {id:?}");
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return;
        }
        let entry = self.entries[id.index()].take().expect("slot checked above");
        self.tracker.on_free(|| entry.data.estimate_size());
        entry.data.collect_child_ids(heap_q);
        if let Some(env) = entry.data.captured_env() {
            env_q.push(env);
        }
        self.free_list.push(id);
    }

    /// Empties a slot's internal references in place, returning the child
    /// heap ids it held and the environment it captured. The slot stays
    /// live; the cycle collector frees it separately after accounting for
    /// the children.
    pub fn clear_slot_children(&mut self, id: HeapId) -> (Vec<HeapId>, Option<EnvId>) {
        let entry = self.entries[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("clear_slot_children on freed slot {id:?}"));
        let mut children = Vec::new();
        let mut captured = None;
        match &mut entry.data {
            HeapData::List(items) => {
                for value in items.drain(..) {
                    if let Value::Ref(child) = value {
                        children.push(child);
                    }
                }
            }
            HeapData::Dict(entries) => {
                for (_, value) in entries.drain(..) {
                    if let Value::Ref(child) = value {
                        children.push(child);
                    }
                }
            }
            HeapData::Struct { fields, .. } => {
                for value in fields.drain(..) {
                    if let Value::Ref(child) = value {
                        children.push(child);
                    }
                }
            }
            HeapData::Function { captured_env, .. } | HeapData::Module(captured_env) => {
                captured = Some(*captured_env);
            }
            HeapData::Str(_) | HeapData::Enum { .. } | HeapData::Block(_) | HeapData::Stdlib(_) => {}
        }
        (children, captured)
    }

    /// Ids of all live slots.
    pub fn live_slot_ids(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| HeapId::new(i)))
    }

    /// Frees a slot unconditionally without touching its children. Used by
    /// the cycle collector after it has already accounted for the children.
    pub fn free_slot(&mut self, id: HeapId) {
        if let Some(entry) = self.entries.get_mut(id.index()).and_then(Option::take) {
            self.tracker.on_free(|| entry.data.estimate_size());
            self.free_list.push(id);
        }
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live = 0usize;
        for entry in self.entries.iter().flatten() {
            live += 1;
            *objects_by_type.entry(entry.data.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: live,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn allocations_since_gc(&self) -> usize {
        self.allocations_since_gc
    }

    pub fn may_have_cycles(&self) -> bool {
        self.may_have_cycles
    }

    /// Called by the cycle collector when a run completes.
    pub fn note_gc_complete(&mut self) {
        self.allocations_since_gc = 0;
        self.may_have_cycles = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::LimitedTracker;

    fn heap() -> Heap<LimitedTracker> {
        Heap::new(LimitedTracker::unlimited())
    }

    #[test]
    fn slots_are_recycled() {
        let mut h = heap();
        let a = h.allocate(HeapData::Str("a".into())).unwrap();
        let mut heap_q = Vec::new();
        let mut env_q = Vec::new();
        h.dec_ref_collect(a, &mut heap_q, &mut env_q);
        assert!(!h.is_live(a));
        let b = h.allocate(HeapData::Str("b".into())).unwrap();
        assert_eq!(a, b);
        assert_eq!(h.live_count(), 1);
    }

    #[test]
    fn cascade_free_pushes_children() {
        let mut h = heap();
        let inner = h.allocate(HeapData::Str("inner".into())).unwrap();
        let outer = h
            .allocate(HeapData::List(vec![Value::Ref(inner), Value::Int(1)]))
            .unwrap();
        let mut heap_q = Vec::new();
        let mut env_q = Vec::new();
        h.dec_ref_collect(outer, &mut heap_q, &mut env_q);
        assert_eq!(heap_q, vec![inner]);
        assert!(env_q.is_empty());
        // Draining the queue frees the child as well.
        while let Some(id) = heap_q.pop() {
            h.dec_ref_collect(id, &mut heap_q, &mut env_q);
        }
        assert_eq!(h.live_count(), 0);
    }

    #[test]
    fn shared_slots_survive_one_drop() {
        let mut h = heap();
        let id = h.allocate(HeapData::Str("shared".into())).unwrap();
        h.inc_ref(id);
        let mut heap_q = Vec::new();
        let mut env_q = Vec::new();
        h.dec_ref_collect(id, &mut heap_q, &mut env_q);
        assert!(h.is_live(id));
        h.dec_ref_collect(id, &mut heap_q, &mut env_q);
        assert!(!h.is_live(id));
    }
}
