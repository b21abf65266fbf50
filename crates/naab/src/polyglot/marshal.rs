//! Argument marshalling across the FFI boundary.
//!
//! Captured values are validated against the FFI contract before any
//! foreign code runs: no callables or block handles (rejected at
//! conversion), no non-finite floats, bounded string length, nesting depth,
//! and total payload size, and no null bytes in strings headed for C-API
//! surfaces. Serialized payload buffers derived from sensitive values are
//! zeroized after dispatch.

use indexmap::IndexMap;

use crate::{
    heap::{Heap, HeapData},
    object::Object,
    polyglot::PolyglotFailure,
    resource::ResourceTracker,
    structs::StructRegistry,
    value::Value,
};

/// Maximum length of a marshalled string.
pub const MAX_FFI_STRING: usize = 1024 * 1024;
/// Maximum container nesting depth across the boundary.
pub const MAX_FFI_DEPTH: usize = 100;
/// Maximum total serialized payload.
pub const MAX_FFI_PAYLOAD: usize = 10 * 1024 * 1024;

/// Converts a runtime value into its FFI representation.
///
/// Callables, block handles, and module values are FFI-unsafe and rejected
/// here, before validation even begins. Struct instances map to mappings
/// keyed by field name.
pub(crate) fn value_to_ffi_object(
    value: &Value,
    heap: &Heap<impl ResourceTracker>,
    structs: &StructRegistry,
    enums: &crate::structs::EnumRegistry,
    depth: usize,
) -> Result<Object, PolyglotFailure> {
    if depth > MAX_FFI_DEPTH {
        return Err(PolyglotFailure::validation(format!(
            "capture exceeds the {MAX_FFI_DEPTH}-level nesting cap"
        )));
    }
    match value {
        Value::Null => Ok(Object::Null),
        Value::Bool(b) => Ok(Object::Bool(*b)),
        Value::Int(i) => Ok(Object::Int(*i)),
        Value::Float(f) => Ok(Object::Float(*f)),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Ok(Object::Str(s.clone())),
            HeapData::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(value_to_ffi_object(item, heap, structs, enums, depth + 1)?);
                }
                Ok(Object::List(out))
            }
            HeapData::Dict(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    out.insert(key.clone(), value_to_ffi_object(item, heap, structs, enums, depth + 1)?);
                }
                Ok(Object::Dict(out))
            }
            HeapData::Struct { def, fields } => {
                let def = structs.get(*def);
                let mut out = IndexMap::with_capacity(fields.len());
                for (field, item) in def.fields.iter().zip(fields) {
                    out.insert(field.name.clone(), value_to_ffi_object(item, heap, structs, enums, depth + 1)?);
                }
                Ok(Object::Dict(out))
            }
            HeapData::Enum { def, variant } => {
                // Enums cross as their display string.
                let def = enums.get(*def);
                let variant = def.variants.get(*variant as usize).cloned().unwrap_or_default();
                Ok(Object::Str(format!("{}.{variant}", def.name)))
            }
            HeapData::Function { .. } => Err(PolyglotFailure::validation(
                "callable values cannot cross the FFI boundary",
            )),
            HeapData::Block(_) => Err(PolyglotFailure::validation(
                "block handles cannot cross the FFI boundary",
            )),
            HeapData::Module(_) | HeapData::Stdlib(_) => Err(PolyglotFailure::validation(
                "module values cannot cross the FFI boundary",
            )),
        },
    }
}

/// Validates a marshalled capture set against the FFI contract.
pub(crate) fn validate_captures(captures: &[(String, Object)]) -> Result<(), PolyglotFailure> {
    let mut total = 0usize;
    for (name, value) in captures {
        validate_ffi_value(value, name, 0, &mut total)?;
    }
    if total > MAX_FFI_PAYLOAD {
        return Err(PolyglotFailure::validation(format!(
            "total capture payload of {total} bytes exceeds the 10 MiB cap"
        )));
    }
    Ok(())
}

/// Validates one value: finiteness, string caps, null bytes, depth, and the
/// running payload total.
pub(crate) fn validate_ffi_value(
    value: &Object,
    name: &str,
    depth: usize,
    total: &mut usize,
) -> Result<(), PolyglotFailure> {
    if depth > MAX_FFI_DEPTH {
        return Err(PolyglotFailure::validation(format!(
            "capture {name:?} exceeds the {MAX_FFI_DEPTH}-level nesting cap"
        )));
    }
    match value {
        Object::Null | Object::Bool(_) | Object::Int(_) => {
            *total += 8;
        }
        Object::Float(f) => {
            if !f.is_finite() {
                return Err(PolyglotFailure::validation(format!(
                    "capture {name:?} is {f} and cannot cross the FFI boundary"
                )));
            }
            *total += 8;
        }
        Object::Str(s) => {
            if s.len() > MAX_FFI_STRING {
                return Err(PolyglotFailure::validation(format!(
                    "capture {name:?} string of {} bytes exceeds the 1 MiB cap",
                    s.len()
                )));
            }
            if s.bytes().any(|b| b == 0) {
                return Err(PolyglotFailure::validation(format!(
                    "capture {name:?} contains an embedded null byte"
                )));
            }
            *total += s.len();
        }
        Object::List(items) => {
            *total += 8;
            for item in items {
                validate_ffi_value(item, name, depth + 1, total)?;
            }
        }
        Object::Dict(entries) | Object::Struct { fields: entries, .. } => {
            *total += 8;
            for (key, item) in entries {
                if key.bytes().any(|b| b == 0) {
                    return Err(PolyglotFailure::validation(format!(
                        "capture {name:?} has a key with an embedded null byte"
                    )));
                }
                *total += key.len();
                validate_ffi_value(item, name, depth + 1, total)?;
            }
        }
        Object::Enum { name: n, variant } => {
            *total += n.len() + variant.len();
        }
    }
    if *total > MAX_FFI_PAYLOAD {
        return Err(PolyglotFailure::validation(format!(
            "total capture payload exceeds the 10 MiB cap at {name:?}"
        )));
    }
    Ok(())
}

/// Serializes captures to the JSON object handed to subprocess backends.
pub(crate) fn captures_to_json(captures: &[(String, Object)]) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in captures {
        map.insert(name.clone(), value.to_json());
    }
    serde_json::Value::Object(map).to_string()
}

/// Overwrites a payload buffer before release. Best-effort secret hygiene
/// for captures derived from sensitive values.
pub(crate) fn zeroize_payload(payload: String) {
    let mut bytes = payload.into_bytes();
    bytes.fill(0);
    // The zeroed buffer drops here; the secret bytes are gone from this
    // allocation even if the allocator recycles it.
    drop(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deep_list(depth: usize) -> Object {
        let mut value = Object::Int(0);
        for _ in 0..depth {
            value = Object::List(vec![value]);
        }
        value
    }

    #[test]
    fn nan_and_infinity_are_rejected() {
        let captures = vec![("x".to_owned(), Object::Float(f64::NAN))];
        assert!(validate_captures(&captures).is_err());
        let captures = vec![("x".to_owned(), Object::Float(f64::INFINITY))];
        assert!(validate_captures(&captures).is_err());
        let captures = vec![("x".to_owned(), Object::Float(1.5))];
        assert!(validate_captures(&captures).is_ok());
    }

    #[test]
    fn null_bytes_are_rejected() {
        let captures = vec![("s".to_owned(), Object::Str("a\0b".to_owned()))];
        assert!(validate_captures(&captures).is_err());
    }

    #[test]
    fn nesting_depth_is_capped() {
        let captures = vec![("deep".to_owned(), deep_list(MAX_FFI_DEPTH + 1))];
        assert!(validate_captures(&captures).is_err());
        let captures = vec![("ok".to_owned(), deep_list(10))];
        assert!(validate_captures(&captures).is_ok());
    }

    #[test]
    fn oversized_string_is_rejected() {
        let captures = vec![("s".to_owned(), Object::Str("x".repeat(MAX_FFI_STRING + 1)))];
        assert!(validate_captures(&captures).is_err());
    }

    #[test]
    fn captures_serialize_under_original_names() {
        let captures = vec![
            ("x".to_owned(), Object::Int(21)),
            ("name".to_owned(), Object::Str("naab".to_owned())),
        ];
        let json = captures_to_json(&captures);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["x"], 21);
        assert_eq!(parsed["name"], "naab");
    }
}
