//! Implementation of the `regex` module.
//!
//! All execution routes through the regex safety guard; rejected patterns
//! are recorded in the audit log.

use std::str::FromStr;

use strum::EnumString;

use crate::{
    audit::AuditEventKind,
    exception::{ErrorKind, RunError, RunResult},
    heap::HeapData,
    regex_guard,
    resource::ResourceTracker,
    stdlib::{MemberKind, StdlibCtx, StdlibModule, alloc_str, arg_str, expect_arity},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum RegexFunctions {
    IsMatch,
    FindAll,
}

pub(crate) fn member_kind(name: &str) -> Option<MemberKind> {
    RegexFunctions::from_str(name).ok().map(|_| MemberKind::Function)
}

pub(crate) fn call<T: ResourceTracker>(
    name: &str,
    args: &[Value],
    ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    let func = RegexFunctions::from_str(name)
        .map_err(|_| RunError::err(ErrorKind::UndefinedName, format!("regex has no member {name}")))?;
    expect_arity(StdlibModule::Regex, name, args, 2)?;
    let pattern = arg_str(args, 0, ctx.heap, "regex pattern")?.to_owned();
    let input = arg_str(args, 1, ctx.heap, "regex input")?.to_owned();

    let audit_rejection = |err: &RunError| {
        if err.kind() == Some(ErrorKind::RegexComplexity) {
            ctx.audit.log(
                AuditEventKind::RegexRejected,
                serde_json::json!({ "pattern": pattern }),
            );
        }
    };

    match func {
        RegexFunctions::IsMatch => {
            let matched = regex_guard::safe_is_match(&pattern, &input).inspect_err(audit_rejection)?;
            Ok(Value::Bool(matched))
        }
        RegexFunctions::FindAll => {
            let found = regex_guard::safe_find_all(&pattern, &input).inspect_err(audit_rejection)?;
            let mut items = Vec::with_capacity(found.len());
            for m in found {
                items.push(alloc_str(ctx.heap, m)?);
            }
            Ok(Value::Ref(ctx.heap.allocate(HeapData::List(items))?))
        }
    }
}
