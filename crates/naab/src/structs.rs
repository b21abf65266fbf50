//! Nominal type registries.
//!
//! Struct definitions are registered once per name; re-registration with an
//! identical shape is a no-op and a conflicting shape logs a warning and
//! keeps the first definition (so shared type modules can be reloaded).
//! Registration rejects field-type graphs that are transitively cyclic by
//! value before the offending definition lands. Enum declarations get the
//! same treatment in a sibling registry.

use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{CodeLoc, EnumDecl, FieldDecl, StructDecl, TypeExpr},
    exception::{ErrorKind, RunError, RunResult},
};

/// Index of a registered struct definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct StructId(u32);

impl StructId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("struct registry overflow"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a registered enum definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EnumId(u32);

impl EnumId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("enum registry overflow"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A registered struct definition. Effectively immutable after first
/// registration.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub loc: CodeLoc,
    pub file: String,
}

impl StructDef {
    pub(crate) fn from_decl(decl: &StructDecl, file: &str) -> Self {
        Self {
            name: decl.name.clone(),
            type_params: decl.type_params.clone(),
            fields: decl.fields.clone(),
            loc: decl.loc,
            file: file.to_owned(),
        }
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.type_params == other.type_params && self.fields == other.fields
    }
}

/// A registered enum definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
    pub loc: CodeLoc,
    pub file: String,
}

impl EnumDef {
    pub(crate) fn variant_index(&self, name: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|v| v == name)
            .map(|i| u32::try_from(i).expect("enum variant overflow"))
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    New,
    /// The name was already registered with an identical shape.
    Duplicate,
    /// The name was registered with a different shape; the first won.
    Conflict,
}

#[derive(Debug, Default)]
struct StructInner {
    defs: Vec<Arc<StructDef>>,
    by_name: AHashMap<String, StructId>,
}

/// Mutex-guarded struct registry, shared between the root interpreter and
/// module evaluation.
#[derive(Debug, Default)]
pub struct StructRegistry {
    inner: Mutex<StructInner>,
}

impl StructRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `def`, validating its type graph first.
    pub(crate) fn register(&self, def: StructDef) -> RunResult<(StructId, Registered)> {
        let mut inner = self.inner.lock().expect("struct registry mutex poisoned");
        if let Some(&existing_id) = inner.by_name.get(&def.name) {
            let existing = &inner.defs[existing_id.index()];
            if existing.same_shape(&def) {
                return Ok((existing_id, Registered::Duplicate));
            }
            tracing::warn!(
                name = %def.name,
                "struct re-registered with a different field shape; keeping the first definition"
            );
            return Ok((existing_id, Registered::Conflict));
        }

        validate_acyclic(&def, &inner)?;

        let id = StructId::new(inner.defs.len());
        inner.by_name.insert(def.name.clone(), id);
        inner.defs.push(Arc::new(def));
        Ok((id, Registered::New))
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<(StructId, Arc<StructDef>)> {
        let inner = self.inner.lock().expect("struct registry mutex poisoned");
        inner
            .by_name
            .get(name)
            .map(|&id| (id, Arc::clone(&inner.defs[id.index()])))
    }

    #[must_use]
    pub fn get(&self, id: StructId) -> Arc<StructDef> {
        let inner = self.inner.lock().expect("struct registry mutex poisoned");
        Arc::clone(&inner.defs[id.index()])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("struct registry mutex poisoned").defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rejects definitions whose field types form a by-value cycle.
///
/// Only plain struct-typed fields count as by-value edges: a nullable field,
/// a union containing `null`, and container element types all break the
/// cycle because instances can terminate.
fn validate_acyclic(candidate: &StructDef, inner: &StructInner) -> RunResult<()> {
    let mut visiting: Vec<&str> = Vec::new();
    let mut visited: AHashSet<String> = AHashSet::new();

    fn owned_edges<'a>(fields: &'a [FieldDecl], out: &mut Vec<&'a str>) {
        for field in fields {
            if let TypeExpr::Name { name, args } = &field.ty
                && args.is_empty()
            {
                out.push(name.as_str());
            }
        }
    }

    fn walk<'a>(
        name: &'a str,
        fields: &'a [FieldDecl],
        candidate: &'a StructDef,
        inner: &'a StructInner,
        visiting: &mut Vec<&'a str>,
        visited: &mut AHashSet<String>,
    ) -> RunResult<()> {
        if visiting.contains(&name) {
            let chain = visiting.join(" -> ");
            return Err(RunError::err(
                ErrorKind::TypeCycleError,
                format!("struct type graph is cyclic by value: {chain} -> {name}"),
            ));
        }
        if visited.contains(name) {
            return Ok(());
        }
        visiting.push(name);
        let mut edges = Vec::new();
        owned_edges(fields, &mut edges);
        for edge in edges {
            if edge == candidate.name {
                walk(edge, &candidate.fields, candidate, inner, visiting, visited)?;
            } else if let Some(&id) = inner.by_name.get(edge) {
                let def = &inner.defs[id.index()];
                walk(&def.name, &def.fields, candidate, inner, visiting, visited)?;
            }
        }
        visiting.pop();
        visited.insert(name.to_owned());
        Ok(())
    }

    walk(&candidate.name, &candidate.fields, candidate, inner, &mut visiting, &mut visited)
}

#[derive(Debug, Default)]
struct EnumInner {
    defs: Vec<Arc<EnumDef>>,
    by_name: AHashMap<String, EnumId>,
}

/// Mutex-guarded enum registry.
#[derive(Debug, Default)]
pub struct EnumRegistry {
    inner: Mutex<EnumInner>,
}

impl EnumRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, decl: &EnumDecl, file: &str) -> (EnumId, Registered) {
        let mut inner = self.inner.lock().expect("enum registry mutex poisoned");
        if let Some(&existing_id) = inner.by_name.get(&decl.name) {
            let existing = &inner.defs[existing_id.index()];
            if existing.variants == decl.variants {
                return (existing_id, Registered::Duplicate);
            }
            tracing::warn!(
                name = %decl.name,
                "enum re-registered with different variants; keeping the first definition"
            );
            return (existing_id, Registered::Conflict);
        }
        let id = EnumId::new(inner.defs.len());
        inner.by_name.insert(decl.name.clone(), id);
        inner.defs.push(Arc::new(EnumDef {
            name: decl.name.clone(),
            variants: decl.variants.clone(),
            loc: decl.loc,
            file: file.to_owned(),
        }));
        (id, Registered::New)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<(EnumId, Arc<EnumDef>)> {
        let inner = self.inner.lock().expect("enum registry mutex poisoned");
        inner
            .by_name
            .get(name)
            .map(|&id| (id, Arc::clone(&inner.defs[id.index()])))
    }

    #[must_use]
    pub fn get(&self, id: EnumId) -> Arc<EnumDef> {
        let inner = self.inner.lock().expect("enum registry mutex poisoned");
        Arc::clone(&inner.defs[id.index()])
    }
}
