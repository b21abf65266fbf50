//! Runtime value representation and heap-aware value operations.
//!
//! `Value` keeps immediates inline and everything else as a heap reference.
//! `Clone` is intentionally not derived: duplicating a value must go through
//! [`Value::clone_with_heap`] so the slot's reference count stays accurate,
//! and discarding one must go through [`drop_value`].

use indexmap::IndexMap;

use crate::{
    env::{EnvId, Environments},
    exception::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    object::Object,
    resource::{MAX_DATA_DEPTH, MAX_DICT_LEN, MAX_LIST_LEN, ResourceTracker},
    structs::{EnumId, EnumRegistry, StructId, StructRegistry},
};

/// Dict key marking a range value.
pub(crate) const RANGE_MARKER: &str = "__is_range";
/// Dict key holding a range's inclusive start.
pub(crate) const RANGE_START: &str = "__range_start";
/// Dict key holding a range's exclusive end.
pub(crate) const RANGE_END: &str = "__range_end";

/// A runtime value: inline immediates or a reference into the heap.
#[derive(Debug, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Ref(HeapId),
}

impl Value {
    /// The heap id behind a `Ref`, if any.
    #[inline]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Duplicates this value, incrementing the refcount for heap values.
    pub fn clone_with_heap(&self, heap: &mut Heap<impl ResourceTracker>) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
        }
    }

    /// Copies an immediate without touching the heap.
    ///
    /// # Panics
    /// Panics on `Ref`; use [`Value::clone_with_heap`] for those.
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Ref(id) => panic!("clone_immediate on heap value {id:?}"),
        }
    }

    /// Falsy values: null, 0, 0.0, the empty string, empty containers.
    pub fn truthy(&self, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::List(items) => !items.is_empty(),
                HeapData::Dict(entries) => !entries.is_empty(),
                _ => true,
            },
        }
    }
}

/// Runtime type tags, the currency of generic inference and mangling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TypeTag {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Dict,
    Function,
    Block,
    Module,
    Struct(StructId),
    Enum(EnumId),
}

impl TypeTag {
    /// The spelling used in diagnostics, mangled names, and type matching.
    pub fn display(&self, structs: &StructRegistry, enums: &EnumRegistry) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool => "bool".to_owned(),
            Self::Int => "int".to_owned(),
            Self::Float => "float".to_owned(),
            Self::Str => "string".to_owned(),
            Self::List => "list".to_owned(),
            Self::Dict => "dict".to_owned(),
            Self::Function => "function".to_owned(),
            Self::Block => "block".to_owned(),
            Self::Module => "module".to_owned(),
            Self::Struct(id) => structs.get(*id).name.clone(),
            Self::Enum(id) => enums.get(*id).name.clone(),
        }
    }
}

/// The type tag of a value.
pub(crate) fn type_tag(value: &Value, heap: &Heap<impl ResourceTracker>) -> TypeTag {
    match value {
        Value::Null => TypeTag::Null,
        Value::Bool(_) => TypeTag::Bool,
        Value::Int(_) => TypeTag::Int,
        Value::Float(_) => TypeTag::Float,
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(_) => TypeTag::Str,
            HeapData::List(_) => TypeTag::List,
            HeapData::Dict(_) => TypeTag::Dict,
            HeapData::Function { .. } => TypeTag::Function,
            HeapData::Struct { def, .. } => TypeTag::Struct(*def),
            HeapData::Enum { def, .. } => TypeTag::Enum(*def),
            HeapData::Block(_) => TypeTag::Block,
            HeapData::Module(_) | HeapData::Stdlib(_) => TypeTag::Module,
        },
    }
}

/// Drops a value, cascading refcount decrements through the heap and
/// environment arenas without recursion.
pub(crate) fn drop_value(value: Value, heap: &mut Heap<impl ResourceTracker>, envs: &mut Environments) {
    if let Value::Ref(id) = value {
        drain_release_queues(heap, envs, vec![id], Vec::new());
    }
}

/// Processes pending heap and environment releases until both queues are
/// empty. Heap frees can enqueue environment releases (captured closures)
/// and vice versa (frame bindings).
pub(crate) fn drain_release_queues(
    heap: &mut Heap<impl ResourceTracker>,
    envs: &mut Environments,
    mut heap_q: Vec<HeapId>,
    mut env_q: Vec<EnvId>,
) {
    loop {
        if let Some(id) = heap_q.pop() {
            heap.dec_ref_collect(id, &mut heap_q, &mut env_q);
        } else if let Some(env) = env_q.pop() {
            envs.dec_ref_collect(env, &mut heap_q, &mut env_q);
        } else {
            break;
        }
    }
}

/// Structural equality.
///
/// Primitives and containers compare by structure (ints and floats compare
/// numerically across the two kinds; NaN is never equal to anything),
/// callables, blocks, and modules compare by identity, and struct instances
/// compare fieldwise when they share a definition.
pub(crate) fn value_eq(a: &Value, b: &Value, heap: &Heap<impl ResourceTracker>, depth: usize) -> RunResult<bool> {
    if depth > MAX_DATA_DEPTH {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            "value comparison exceeded the nesting depth cap",
        ));
    }
    let result = match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return Ok(true);
            }
            match (heap.get(*x), heap.get(*y)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1 == s2,
                (HeapData::List(l1), HeapData::List(l2)) => {
                    if l1.len() != l2.len() {
                        return Ok(false);
                    }
                    for (v1, v2) in l1.iter().zip(l2) {
                        if !value_eq(v1, v2, heap, depth + 1)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                (HeapData::Dict(d1), HeapData::Dict(d2)) => {
                    if d1.len() != d2.len() {
                        return Ok(false);
                    }
                    for (key, v1) in d1 {
                        let Some(v2) = d2.get(key) else {
                            return Ok(false);
                        };
                        if !value_eq(v1, v2, heap, depth + 1)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                (
                    HeapData::Struct { def: def1, fields: f1 },
                    HeapData::Struct { def: def2, fields: f2 },
                ) => {
                    if def1 != def2 {
                        return Ok(false);
                    }
                    for (v1, v2) in f1.iter().zip(f2) {
                        if !value_eq(v1, v2, heap, depth + 1)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                (
                    HeapData::Enum { def: d1, variant: v1 },
                    HeapData::Enum { def: d2, variant: v2 },
                ) => d1 == d2 && v1 == v2,
                // Functions, blocks, and modules already failed the identity
                // check above.
                _ => false,
            }
        }
        _ => false,
    };
    Ok(result)
}

/// Recursively duplicates a value so mutations on the copy are invisible to
/// the original. Strings, enums, blocks, functions, and modules are shared
/// (immutable or identity-keyed); lists, dicts, and structs are rebuilt.
pub(crate) fn deep_copy(
    value: &Value,
    heap: &mut Heap<impl ResourceTracker>,
    depth: usize,
) -> RunResult<Value> {
    if depth > MAX_DATA_DEPTH {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            "deep copy exceeded the nesting depth cap",
        ));
    }
    let Value::Ref(id) = value else {
        return Ok(value.clone_immediate());
    };
    match heap.get(*id) {
        HeapData::List(_) => {
            let items: Vec<Value> = {
                let HeapData::List(items) = heap.get(*id) else { unreachable!() };
                // Snapshot the child list shallowly; children are copied below.
                items.iter().map(|v| v.shallow_peek()).collect()
            };
            let mut copied = Vec::with_capacity(items.len());
            for item in &items {
                copied.push(deep_copy(item, heap, depth + 1)?);
            }
            Ok(Value::Ref(heap.allocate(HeapData::List(copied))?))
        }
        HeapData::Dict(_) => {
            let entries: Vec<(String, Value)> = {
                let HeapData::Dict(entries) = heap.get(*id) else { unreachable!() };
                entries.iter().map(|(k, v)| (k.clone(), v.shallow_peek())).collect()
            };
            let mut copied = IndexMap::with_capacity(entries.len());
            for (key, item) in &entries {
                copied.insert(key.clone(), deep_copy(item, heap, depth + 1)?);
            }
            Ok(Value::Ref(heap.allocate(HeapData::Dict(copied))?))
        }
        HeapData::Struct { .. } => {
            let (def, fields): (StructId, Vec<Value>) = {
                let HeapData::Struct { def, fields } = heap.get(*id) else { unreachable!() };
                (*def, fields.iter().map(|v| v.shallow_peek()).collect())
            };
            let mut copied = Vec::with_capacity(fields.len());
            for item in &fields {
                copied.push(deep_copy(item, heap, depth + 1)?);
            }
            Ok(Value::Ref(heap.allocate(HeapData::Struct { def, fields: copied })?))
        }
        _ => Ok(value.clone_with_heap(heap)),
    }
}

impl Value {
    /// A non-owning view of a value used while snapshotting container
    /// children; the returned value must not be dropped heap-aware unless
    /// the caller increments the refcount first (the owner keeps the
    /// original reference).
    pub(crate) fn shallow_peek(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Ref(id) => Self::Ref(*id),
        }
    }
}

/// Converts a runtime value into a detached [`Object`].
///
/// Callables and block handles have no detached form; they render as
/// placeholder strings, which is what `print`, thrown payloads, and run
/// results need. The strict FFI converter lives in `polyglot::marshal` and
/// rejects them instead.
pub(crate) fn to_object(
    value: &Value,
    heap: &Heap<impl ResourceTracker>,
    structs: &StructRegistry,
    enums: &EnumRegistry,
    depth: usize,
) -> RunResult<Object> {
    if depth > MAX_DATA_DEPTH {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            "value conversion exceeded the nesting depth cap",
        ));
    }
    let object = match value {
        Value::Null => Object::Null,
        Value::Bool(b) => Object::Bool(*b),
        Value::Int(i) => Object::Int(*i),
        Value::Float(f) => Object::Float(*f),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Object::Str(s.clone()),
            HeapData::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(to_object(item, heap, structs, enums, depth + 1)?);
                }
                Object::List(out)
            }
            HeapData::Dict(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    out.insert(key.clone(), to_object(item, heap, structs, enums, depth + 1)?);
                }
                Object::Dict(out)
            }
            HeapData::Struct { def, fields } => {
                let def = structs.get(*def);
                let mut out = IndexMap::with_capacity(fields.len());
                for (field, item) in def.fields.iter().zip(fields) {
                    out.insert(field.name.clone(), to_object(item, heap, structs, enums, depth + 1)?);
                }
                Object::Struct {
                    name: def.name.clone(),
                    fields: out,
                }
            }
            HeapData::Enum { def, variant } => {
                let def = enums.get(*def);
                Object::Enum {
                    name: def.name.clone(),
                    variant: def
                        .variants
                        .get(*variant as usize)
                        .cloned()
                        .unwrap_or_default(),
                }
            }
            HeapData::Function { func, .. } => Object::Str(format!("<function:{:?}>", func)),
            HeapData::Block(block) => Object::Str(format!("<block:{}:{}>", block.language, block.block_id)),
            HeapData::Module(_) => Object::Str("<module>".to_owned()),
            HeapData::Stdlib(module) => Object::Str(format!("<module:{module}>")),
        },
    };
    Ok(object)
}

/// Materializes a detached [`Object`] on the heap.
///
/// Struct objects whose definition is registered come back as instances;
/// unknown struct names degrade to dicts.
pub(crate) fn from_object(
    object: &Object,
    heap: &mut Heap<impl ResourceTracker>,
    structs: &StructRegistry,
    enums: &EnumRegistry,
) -> RunResult<Value> {
    match object {
        Object::Null => Ok(Value::Null),
        Object::Bool(b) => Ok(Value::Bool(*b)),
        Object::Int(i) => Ok(Value::Int(*i)),
        Object::Float(f) => Ok(Value::Float(*f)),
        Object::Str(s) => Ok(Value::Ref(heap.allocate(HeapData::Str(s.clone()))?)),
        Object::List(items) => {
            check_list_len(items.len())?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_object(item, heap, structs, enums)?);
            }
            Ok(Value::Ref(heap.allocate(HeapData::List(out))?))
        }
        Object::Dict(entries) => {
            check_dict_len(entries.len())?;
            let mut out = IndexMap::with_capacity(entries.len());
            for (key, item) in entries {
                out.insert(key.clone(), from_object(item, heap, structs, enums)?);
            }
            Ok(Value::Ref(heap.allocate(HeapData::Dict(out))?))
        }
        Object::Struct { name, fields } => {
            if let Some((id, def)) = structs.get_by_name(name) {
                let mut ordered = Vec::with_capacity(def.fields.len());
                for field in &def.fields {
                    let item = fields.get(&field.name).unwrap_or(&Object::Null);
                    ordered.push(from_object(item, heap, structs, enums)?);
                }
                Ok(Value::Ref(heap.allocate(HeapData::Struct { def: id, fields: ordered })?))
            } else {
                let mut out = IndexMap::with_capacity(fields.len());
                for (key, item) in fields {
                    out.insert(key.clone(), from_object(item, heap, structs, enums)?);
                }
                Ok(Value::Ref(heap.allocate(HeapData::Dict(out))?))
            }
        }
        Object::Enum { name, variant } => {
            if let Some((id, def)) = enums.get_by_name(name)
                && let Some(idx) = def.variant_index(variant)
            {
                Ok(Value::Ref(heap.allocate(HeapData::Enum { def: id, variant: idx })?))
            } else {
                Ok(Value::Ref(heap.allocate(HeapData::Str(format!("{name}.{variant}")))?))
            }
        }
    }
}

pub(crate) fn check_list_len(len: usize) -> RunResult<()> {
    if len > MAX_LIST_LEN {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            format!("list of {len} elements exceeds the 10 M cap"),
        ));
    }
    Ok(())
}

pub(crate) fn check_dict_len(len: usize) -> RunResult<()> {
    if len > MAX_DICT_LEN {
        return Err(RunError::err(
            ErrorKind::ResourceLimit,
            format!("dict of {len} entries exceeds the 1 M cap"),
        ));
    }
    Ok(())
}

/// Reads a range's `(start, end)` when `value` is a range dict.
pub(crate) fn as_range(value: &Value, heap: &Heap<impl ResourceTracker>) -> Option<(i64, i64)> {
    let Value::Ref(id) = value else { return None };
    let HeapData::Dict(entries) = heap.get(*id) else {
        return None;
    };
    if !matches!(entries.get(RANGE_MARKER), Some(Value::Bool(true))) {
        return None;
    }
    let Some(Value::Int(start)) = entries.get(RANGE_START) else {
        return None;
    };
    let Some(Value::Int(end)) = entries.get(RANGE_END) else {
        return None;
    };
    Some((*start, *end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::LimitedTracker;

    fn setup() -> (Heap<LimitedTracker>, Environments, StructRegistry, EnumRegistry) {
        (
            Heap::new(LimitedTracker::unlimited()),
            Environments::new(),
            StructRegistry::new(),
            EnumRegistry::new(),
        )
    }

    #[test]
    fn truthiness_matches_the_value_model() {
        let (mut heap, _envs, _s, _e) = setup();
        assert!(!Value::Null.truthy(&heap));
        assert!(!Value::Int(0).truthy(&heap));
        assert!(!Value::Float(0.0).truthy(&heap));
        assert!(Value::Int(-1).truthy(&heap));
        let empty = Value::Ref(heap.allocate(HeapData::Str(String::new())).unwrap());
        assert!(!empty.truthy(&heap));
        let full = Value::Ref(heap.allocate(HeapData::List(vec![Value::Int(1)])).unwrap());
        assert!(full.truthy(&heap));
    }

    #[test]
    fn deep_copy_isolates_mutation() {
        let (mut heap, mut envs, _s, _e) = setup();
        let inner = heap.allocate(HeapData::List(vec![Value::Int(1)])).unwrap();
        let outer = heap.allocate(HeapData::List(vec![Value::Ref(inner)])).unwrap();

        let copy = deep_copy(&Value::Ref(outer), &mut heap, 0).unwrap();
        let copy_id = copy.ref_id().unwrap();
        assert_ne!(copy_id, outer);

        // Mutating the copy's inner list leaves the original untouched.
        let copy_inner = {
            let HeapData::List(items) = heap.get(copy_id) else { panic!() };
            items[0].ref_id().unwrap()
        };
        assert_ne!(copy_inner, inner);
        if let HeapData::List(items) = heap.get_mut(copy_inner) {
            items.push(Value::Int(2));
        }
        let HeapData::List(original) = heap.get(inner) else { panic!() };
        assert_eq!(original.len(), 1);

        drop_value(copy, &mut heap, &mut envs);
    }

    #[test]
    fn structural_equality_and_nan() {
        let (mut heap, _envs, _s, _e) = setup();
        let a = Value::Ref(heap.allocate(HeapData::List(vec![Value::Int(1), Value::Int(2)])).unwrap());
        let b = Value::Ref(heap.allocate(HeapData::List(vec![Value::Int(1), Value::Int(2)])).unwrap());
        assert!(value_eq(&a, &b, &heap, 0).unwrap());
        assert!(!value_eq(&Value::Float(f64::NAN), &Value::Float(f64::NAN), &heap, 0).unwrap());
        assert!(value_eq(&Value::Int(3), &Value::Float(3.0), &heap, 0).unwrap());
    }

    #[test]
    fn object_round_trip_for_containers() {
        let (mut heap, _envs, structs, enums) = setup();
        let mut entries = IndexMap::new();
        entries.insert("k".to_owned(), Value::Int(7));
        let dict = Value::Ref(heap.allocate(HeapData::Dict(entries)).unwrap());

        let object = to_object(&dict, &heap, &structs, &enums, 0).unwrap();
        let back = from_object(&object, &mut heap, &structs, &enums).unwrap();
        assert!(value_eq(&dict, &back, &heap, 0).unwrap());
    }
}
