//! Runtime function table.
//!
//! Function declarations are registered here when their defining module is
//! evaluated; heap function values carry a [`FunctionId`] plus their
//! captured environment. Monomorphized specializations are registered as
//! additional entries by the generic engine.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::ast::{FunctionDecl, Param, StmtLoc, TypeExpr};

/// Index into the function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FunctionId(u32);

impl FunctionId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function table overflow"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A registered function: the declaration's signature and body, plus the
/// source file it came from for stack frames.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FunctionDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Arc<Vec<StmtLoc>>,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl FunctionDef {
    pub fn from_decl(decl: &FunctionDecl, file: &str) -> Self {
        Self {
            name: decl.name.clone(),
            type_params: decl.type_params.clone(),
            params: decl.params.clone(),
            ret: decl.ret.clone(),
            body: Arc::clone(&decl.body),
            file: file.to_owned(),
            line: decl.loc.line,
            column: decl.loc.column,
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Default)]
struct TableInner {
    defs: Vec<Arc<FunctionDef>>,
    /// Specialization cache: mangled name -> id. Survives until teardown.
    specializations: AHashMap<String, FunctionId>,
}

/// Process-object-wide function storage, mutex-guarded per the shared-state
/// policy and shared between the root interpreter and module evaluation.
#[derive(Debug, Default)]
pub(crate) struct FunctionTable {
    inner: Mutex<TableInner>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, def: FunctionDef) -> FunctionId {
        let mut inner = self.inner.lock().expect("function table mutex poisoned");
        let id = FunctionId::new(inner.defs.len());
        inner.defs.push(Arc::new(def));
        id
    }

    pub fn get(&self, id: FunctionId) -> Arc<FunctionDef> {
        let inner = self.inner.lock().expect("function table mutex poisoned");
        Arc::clone(&inner.defs[id.index()])
    }

    /// Looks up a cached specialization by mangled name.
    pub fn specialization(&self, mangled: &str) -> Option<FunctionId> {
        let inner = self.inner.lock().expect("function table mutex poisoned");
        inner.specializations.get(mangled).copied()
    }

    /// Registers a specialization under its mangled name, returning the
    /// existing id when another call site specialized first.
    pub fn register_specialization(&self, mangled: String, def: FunctionDef) -> FunctionId {
        let mut inner = self.inner.lock().expect("function table mutex poisoned");
        if let Some(existing) = inner.specializations.get(&mangled) {
            return *existing;
        }
        let id = FunctionId::new(inner.defs.len());
        inner.defs.push(Arc::new(def));
        inner.specializations.insert(mangled, id);
        id
    }

    /// Number of cached specializations; exposed for the cache-idempotence
    /// property tests.
    pub fn specialization_count(&self) -> usize {
        let inner = self.inner.lock().expect("function table mutex poisoned");
        inner.specializations.len()
    }

    pub fn specialization_names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("function table mutex poisoned");
        inner.specializations.keys().cloned().collect()
    }
}
