//! Lexical environment chain.
//!
//! Frames live in their own refcounted arena, separate from the value heap:
//! a frame is retained by the active call chain, by child frames (parent
//! link), by closures that captured it, and permanently by the global and
//! module roots. Lookups walk parents; `assign` mutates the nearest binding
//! and never shadows in a parent frame.

use ahash::AHashMap;

use crate::{
    ast::TypeExpr,
    heap::HeapId,
    value::Value,
};

/// Index of an environment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct EnvId(u32);

impl EnvId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("environment index overflow"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct EnvFrame {
    names: AHashMap<String, Value>,
    /// Declared types for bindings created by annotated `let`; assignment
    /// re-validates against these.
    declared: AHashMap<String, TypeExpr>,
    parent: Option<EnvId>,
    ref_count: u32,
}

/// Storage for every environment frame in an interpreter.
#[derive(Debug, Default)]
pub(crate) struct Environments {
    frames: Vec<Option<EnvFrame>>,
    free_list: Vec<EnvId>,
}

/// Result of resolving a name for assignment.
pub(crate) enum AssignOutcome {
    /// The displaced previous value; the caller must drop it heap-aware.
    Replaced(Value),
    /// No enclosing binding; the rejected value is handed back so the
    /// caller can drop it heap-aware.
    NotFound(Value),
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a frame with reference count 1. The parent's count is
    /// incremented; it drops again when this frame is released.
    pub fn new_frame(&mut self, parent: Option<EnvId>) -> EnvId {
        if let Some(p) = parent {
            self.inc_ref(p);
        }
        let frame = EnvFrame {
            names: AHashMap::new(),
            declared: AHashMap::new(),
            parent,
            ref_count: 1,
        };
        if let Some(id) = self.free_list.pop() {
            self.frames[id.index()] = Some(frame);
            id
        } else {
            let id = EnvId::new(self.frames.len());
            self.frames.push(Some(frame));
            id
        }
    }

    fn frame(&self, id: EnvId) -> &EnvFrame {
        self.frames
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("access to freed environment frame {id:?}"))
    }

    fn frame_mut(&mut self, id: EnvId) -> &mut EnvFrame {
        self.frames
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("access to freed environment frame {id:?}"))
    }

    pub fn is_live(&self, id: EnvId) -> bool {
        self.frames.get(id.index()).is_some_and(Option::is_some)
    }

    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        self.frame(id).parent
    }

    pub fn inc_ref(&mut self, id: EnvId) {
        self.frame_mut(id).ref_count += 1;
    }

    /// Decrements a frame, dropping its bindings when the count reaches
    /// zero. Displaced values and the parent release are pushed onto the
    /// work lists, mirroring [`crate::heap::Heap::dec_ref_collect`].
    pub fn dec_ref_collect(&mut self, id: EnvId, heap_q: &mut Vec<HeapId>, env_q: &mut Vec<EnvId>) {
        let Some(frame) = self.frames.get_mut(id.index()).and_then(Option::as_mut) else {
            return;
        };
        debug_assert!(frame.ref_count > 0, "dec_ref on zero-count frame {id:?}");
        frame.ref_count = frame.ref_count.saturating_sub(1);
        if frame.ref_count > 0 {
            return;
        }
        let frame = self.frames[id.index()].take().expect("frame checked above");
        for value in frame.names.into_values() {
            if let Value::Ref(heap_id) = value {
                heap_q.push(heap_id);
            }
        }
        if let Some(parent) = frame.parent {
            env_q.push(parent);
        }
        self.free_list.push(id);
    }

    /// Binds `name` in `env` itself. Returns the displaced value when the
    /// name was already bound in this frame; the caller drops it.
    pub fn define(&mut self, env: EnvId, name: impl Into<String>, value: Value) -> Option<Value> {
        self.frame_mut(env).names.insert(name.into(), value)
    }

    /// Records the declared type of a binding for later assignment checks.
    pub fn declare_type(&mut self, env: EnvId, name: impl Into<String>, ty: TypeExpr) {
        self.frame_mut(env).declared.insert(name.into(), ty);
    }

    /// The declared type governing `name`, from the frame that binds it.
    pub fn declared_type(&self, env: EnvId, name: &str) -> Option<&TypeExpr> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.frame(id);
            if frame.names.contains_key(name) {
                return frame.declared.get(name);
            }
            current = frame.parent;
        }
        None
    }

    /// Resolves `name` by walking the parent chain.
    pub fn lookup(&self, env: EnvId, name: &str) -> Option<&Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.frame(id);
            if let Some(value) = frame.names.get(name) {
                return Some(value);
            }
            current = frame.parent;
        }
        None
    }

    pub fn has(&self, env: EnvId, name: &str) -> bool {
        self.lookup(env, name).is_some()
    }

    /// Mutates the nearest enclosing binding of `name`. Never creates a new
    /// binding and never shadows in a parent frame.
    pub fn assign(&mut self, env: EnvId, name: &str, value: Value) -> AssignOutcome {
        let mut current = Some(env);
        while let Some(id) = current {
            if self.frame(id).names.contains_key(name) {
                let old = self
                    .frame_mut(id)
                    .names
                    .insert(name.to_owned(), value)
                    .expect("binding checked above");
                return AssignOutcome::Replaced(old);
            }
            current = self.frame(id).parent;
        }
        AssignOutcome::NotFound(value)
    }

    /// Every name visible from `env`, nearest frame first. Used by the
    /// "did you mean" diagnostic.
    pub fn all_names(&self, env: EnvId) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.frame(id);
            for name in frame.names.keys() {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            current = frame.parent;
        }
        out
    }

    /// Names bound directly in `env` (not ancestors). Module export tables
    /// are read through this.
    pub fn local_names(&self, env: EnvId) -> Vec<String> {
        self.frame(env).names.keys().cloned().collect()
    }

    /// Direct binding lookup that does not walk parents.
    pub fn lookup_local(&self, env: EnvId, name: &str) -> Option<&Value> {
        self.frame(env).names.get(name)
    }

    /// Iterates the heap ids referenced by a frame's own bindings.
    pub fn frame_heap_ids(&self, env: EnvId) -> impl Iterator<Item = HeapId> + '_ {
        self.frame(env).names.values().filter_map(Value::ref_id)
    }

    /// Total number of live frames; the cycle collector sizes its visited
    /// set from the arena length.
    pub fn arena_len(&self) -> usize {
        self.frames.len()
    }

    pub fn live_frames(&self) -> impl Iterator<Item = EnvId> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|_| EnvId::new(i)))
    }

    /// Takes every binding out of a frame, leaving it empty but live.
    /// Used by the cycle collector to break environment cycles.
    pub fn take_bindings(&mut self, env: EnvId) -> AHashMap<String, Value> {
        std::mem::take(&mut self.frame_mut(env).names)
    }

    /// Frees a frame unconditionally without touching its (already cleared)
    /// bindings or parent. Cycle-collector use only.
    pub fn free_frame(&mut self, env: EnvId) {
        if self.frames.get_mut(env.index()).and_then(Option::take).is_some() {
            self.free_list.push(env);
        }
    }
}
