//! Implementation of the `json` module.

use std::str::FromStr;

use strum::EnumString;

use crate::{
    exception::{ErrorKind, RunError, RunResult},
    object::Object,
    resource::ResourceTracker,
    stdlib::{MemberKind, StdlibCtx, StdlibModule, alloc_str, arg_str, expect_arity},
    value::{Value, from_object, to_object},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum JsonFunctions {
    Parse,
    Stringify,
}

pub(crate) fn member_kind(name: &str) -> Option<MemberKind> {
    JsonFunctions::from_str(name).ok().map(|_| MemberKind::Function)
}

pub(crate) fn call<T: ResourceTracker>(
    name: &str,
    args: &[Value],
    ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    let func = JsonFunctions::from_str(name)
        .map_err(|_| RunError::err(ErrorKind::UndefinedName, format!("json has no member {name}")))?;
    match func {
        JsonFunctions::Parse => {
            expect_arity(StdlibModule::Json, name, args, 1)?;
            let text = arg_str(args, 0, ctx.heap, "json.parse")?;
            let parsed: serde_json::Value = serde_json::from_str(text)
                .map_err(|err| RunError::err(ErrorKind::TypeError, format!("json.parse: {err}")))?;
            let object = Object::from_json(&parsed);
            from_object(&object, ctx.heap, ctx.structs, ctx.enums)
        }
        JsonFunctions::Stringify => {
            expect_arity(StdlibModule::Json, name, args, 1)?;
            let object = to_object(&args[0], ctx.heap, ctx.structs, ctx.enums, 0)?;
            let text = serde_json::to_string(&object.to_json())
                .map_err(|err| RunError::err(ErrorKind::TypeError, format!("json.stringify: {err}")))?;
            alloc_str(ctx.heap, text)
        }
    }
}
