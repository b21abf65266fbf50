//! Implementation of the `strings` module.

use std::str::FromStr;

use strum::EnumString;

use crate::{
    exception::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    resource::ResourceTracker,
    stdlib::{MemberKind, StdlibCtx, StdlibModule, alloc_str, arg_int, arg_str, expect_arity},
    value::{Value, check_list_len},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum StringsFunctions {
    Upper,
    Lower,
    Trim,
    Split,
    Join,
    Substring,
    Contains,
    Find,
}

pub(crate) fn member_kind(name: &str) -> Option<MemberKind> {
    StringsFunctions::from_str(name).ok().map(|_| MemberKind::Function)
}

pub(crate) fn call<T: ResourceTracker>(
    name: &str,
    args: &[Value],
    ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    let func = StringsFunctions::from_str(name)
        .map_err(|_| RunError::err(ErrorKind::UndefinedName, format!("strings has no member {name}")))?;
    match func {
        StringsFunctions::Upper => {
            expect_arity(StdlibModule::Strings, name, args, 1)?;
            let s = arg_str(args, 0, ctx.heap, "strings.upper")?.to_uppercase();
            alloc_str(ctx.heap, s)
        }
        StringsFunctions::Lower => {
            expect_arity(StdlibModule::Strings, name, args, 1)?;
            let s = arg_str(args, 0, ctx.heap, "strings.lower")?.to_lowercase();
            alloc_str(ctx.heap, s)
        }
        StringsFunctions::Trim => {
            expect_arity(StdlibModule::Strings, name, args, 1)?;
            let s = arg_str(args, 0, ctx.heap, "strings.trim")?.trim().to_owned();
            alloc_str(ctx.heap, s)
        }
        StringsFunctions::Split => {
            expect_arity(StdlibModule::Strings, name, args, 2)?;
            let s = arg_str(args, 0, ctx.heap, "strings.split")?.to_owned();
            let sep = arg_str(args, 1, ctx.heap, "strings.split")?.to_owned();
            if sep.is_empty() {
                return Err(RunError::err(ErrorKind::TypeError, "strings.split: empty separator"));
            }
            let parts: Vec<String> = s.split(&sep).map(str::to_owned).collect();
            check_list_len(parts.len())?;
            let mut items = Vec::with_capacity(parts.len());
            for part in parts {
                items.push(alloc_str(ctx.heap, part)?);
            }
            Ok(Value::Ref(ctx.heap.allocate(HeapData::List(items))?))
        }
        StringsFunctions::Join => {
            expect_arity(StdlibModule::Strings, name, args, 2)?;
            let list_id = match args.first() {
                Some(Value::Ref(id)) => *id,
                _ => return Err(RunError::err(ErrorKind::TypeError, "strings.join: expected a list")),
            };
            let sep = arg_str(args, 1, ctx.heap, "strings.join")?.to_owned();
            let parts: Vec<String> = match ctx.heap.get(list_id) {
                HeapData::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Ref(id) => match ctx.heap.get(*id) {
                                HeapData::Str(s) => out.push(s.clone()),
                                _ => {
                                    return Err(RunError::err(
                                        ErrorKind::TypeError,
                                        "strings.join: list elements must be strings",
                                    ));
                                }
                            },
                            _ => {
                                return Err(RunError::err(
                                    ErrorKind::TypeError,
                                    "strings.join: list elements must be strings",
                                ));
                            }
                        }
                    }
                    out
                }
                _ => return Err(RunError::err(ErrorKind::TypeError, "strings.join: expected a list")),
            };
            alloc_str(ctx.heap, parts.join(&sep))
        }
        StringsFunctions::Substring => {
            expect_arity(StdlibModule::Strings, name, args, 3)?;
            let s = arg_str(args, 0, ctx.heap, "strings.substring")?.to_owned();
            let start = arg_int(args, 1, "strings.substring")?;
            let end = arg_int(args, 2, "strings.substring")?;
            let len = s.chars().count() as i64;
            if start < 0 || end < 0 {
                return Err(RunError::err(
                    ErrorKind::IndexError,
                    "strings.substring: negative index",
                ));
            }
            if start > end || end > len {
                return Err(RunError::err(
                    ErrorKind::IndexError,
                    format!("strings.substring: range {start}..{end} out of bounds for length {len}"),
                ));
            }
            let sub: String = s
                .chars()
                .skip(start as usize)
                .take((end - start) as usize)
                .collect();
            alloc_str(ctx.heap, sub)
        }
        StringsFunctions::Contains => {
            expect_arity(StdlibModule::Strings, name, args, 2)?;
            let s = arg_str(args, 0, ctx.heap, "strings.contains")?;
            let needle = arg_str(args, 1, ctx.heap, "strings.contains")?;
            Ok(Value::Bool(s.contains(needle)))
        }
        StringsFunctions::Find => {
            expect_arity(StdlibModule::Strings, name, args, 2)?;
            let s = arg_str(args, 0, ctx.heap, "strings.find")?;
            let needle = arg_str(args, 1, ctx.heap, "strings.find")?;
            // Char-based index, matching substring's indexing.
            match s.find(needle) {
                Some(byte_idx) => Ok(Value::Int(s[..byte_idx].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }
    }
}
