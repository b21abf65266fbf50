//! Implementation of the `io` module.
//!
//! All paths pass the path-security layer before any filesystem call, and
//! reads are capped at the module file-size limit. Violations are recorded
//! in the audit log.

use std::str::FromStr;

use strum::EnumString;

use crate::{
    audit::AuditEventKind,
    exception::{ErrorKind, RunError, RunResult},
    paths::canonicalize_path,
    resource::{MAX_FILE_SIZE, ResourceTracker},
    stdlib::{MemberKind, StdlibCtx, StdlibModule, alloc_str, arg_str, expect_arity},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
enum IoFunctions {
    ReadFile,
    WriteFile,
    Exists,
}

pub(crate) fn member_kind(name: &str) -> Option<MemberKind> {
    IoFunctions::from_str(name).ok().map(|_| MemberKind::Function)
}

pub(crate) fn call<T: ResourceTracker>(
    name: &str,
    args: &[Value],
    ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    let func = IoFunctions::from_str(name)
        .map_err(|_| RunError::err(ErrorKind::UndefinedName, format!("io has no member {name}")))?;
    match func {
        IoFunctions::ReadFile => {
            expect_arity(StdlibModule::Io, name, args, 1)?;
            let raw = arg_str(args, 0, ctx.heap, "io.read_file")?.to_owned();
            let path = screen(&raw, ctx)?;
            let metadata = std::fs::metadata(&path)
                .map_err(|err| RunError::err(ErrorKind::IOError, format!("cannot stat {raw:?}: {err}")))?;
            if metadata.len() > MAX_FILE_SIZE as u64 {
                return Err(RunError::err(
                    ErrorKind::ResourceLimit,
                    format!("file {raw:?} exceeds the 10 MiB cap"),
                ));
            }
            let contents = std::fs::read_to_string(&path)
                .map_err(|err| RunError::err(ErrorKind::IOError, format!("cannot read {raw:?}: {err}")))?;
            alloc_str(ctx.heap, contents)
        }
        IoFunctions::WriteFile => {
            expect_arity(StdlibModule::Io, name, args, 2)?;
            let raw = arg_str(args, 0, ctx.heap, "io.write_file")?.to_owned();
            let contents = arg_str(args, 1, ctx.heap, "io.write_file")?.to_owned();
            let path = screen(&raw, ctx)?;
            std::fs::write(&path, contents)
                .map_err(|err| RunError::err(ErrorKind::IOError, format!("cannot write {raw:?}: {err}")))?;
            Ok(Value::Null)
        }
        IoFunctions::Exists => {
            expect_arity(StdlibModule::Io, name, args, 1)?;
            let raw = arg_str(args, 0, ctx.heap, "io.exists")?.to_owned();
            match screen(&raw, ctx) {
                Ok(path) => Ok(Value::Bool(path.exists())),
                // A path outside the sandbox "does not exist" as far as the
                // probe is concerned, but the violation is still audited.
                Err(err) => match err.kind() {
                    Some(ErrorKind::PathSecurityError) => Ok(Value::Bool(false)),
                    _ => Err(err),
                },
            }
        }
    }
}

fn screen<T: ResourceTracker>(raw: &str, ctx: &StdlibCtx<'_, T>) -> RunResult<std::path::PathBuf> {
    canonicalize_path(raw, &ctx.options.base_dirs).inspect_err(|err| {
        if err.kind() == Some(ErrorKind::PathSecurityError) {
            ctx.audit.log(
                AuditEventKind::PathViolation,
                serde_json::json!({ "path": raw }),
            );
        }
    })
}
