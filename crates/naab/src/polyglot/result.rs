//! Return-value parsing for subprocess backends.
//!
//! The wrapper prints the block's result as JSON on the last stdout line;
//! this module recovers it. Null, integers, floats, booleans, strings,
//! JSON arrays, and JSON objects map to their value-model counterparts;
//! anything unparseable becomes a string.

use crate::{
    object::Object,
    polyglot::{PolyKind, PolyglotFailure},
};

/// Parses a child's stdout into a value.
pub(crate) fn parse_stdout(stdout: &str) -> Result<Object, PolyglotFailure> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Object::Null);
    }
    let last_line = trimmed.lines().last().unwrap_or(trimmed).trim();
    match serde_json::from_str::<serde_json::Value>(last_line) {
        Ok(parsed) => {
            let object = Object::from_json(&parsed);
            reject_non_finite(&object)?;
            Ok(object)
        }
        // Not JSON: the whole trimmed stdout is the (string) result.
        Err(_) => Ok(Object::Str(trimmed.to_owned())),
    }
}

/// Foreign results may not smuggle NaN or infinity back across the
/// boundary, mirroring the outbound validation.
fn reject_non_finite(object: &Object) -> Result<(), PolyglotFailure> {
    match object {
        Object::Float(f) if !f.is_finite() => Err(PolyglotFailure::new(
            PolyKind::Type,
            format!("foreign result is {f}, which cannot cross the FFI boundary"),
        )),
        Object::List(items) => {
            for item in items {
                reject_non_finite(item)?;
            }
            Ok(())
        }
        Object::Dict(entries) => {
            for item in entries.values() {
                reject_non_finite(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_parse() {
        assert_eq!(parse_stdout("42\n").unwrap(), Object::Int(42));
        assert_eq!(parse_stdout("2.5").unwrap(), Object::Float(2.5));
        assert_eq!(parse_stdout("true").unwrap(), Object::Bool(true));
        assert_eq!(parse_stdout("null").unwrap(), Object::Null);
        assert_eq!(parse_stdout("\"hi\"").unwrap(), Object::Str("hi".to_owned()));
    }

    #[test]
    fn last_line_wins() {
        let out = "progress 1\nprogress 2\n[1, 2, 3]\n";
        assert_eq!(
            parse_stdout(out).unwrap(),
            Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)])
        );
    }

    #[test]
    fn non_json_falls_back_to_string() {
        assert_eq!(parse_stdout("hello world\n").unwrap(), Object::Str("hello world".to_owned()));
    }

    #[test]
    fn empty_output_is_null() {
        assert_eq!(parse_stdout("   \n").unwrap(), Object::Null);
    }
}
