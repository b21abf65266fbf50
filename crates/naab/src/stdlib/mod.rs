//! Standard-library registration and dispatch.
//!
//! Member access on a recognized stdlib module yields either a call-marker
//! string (functions, awaiting invocation with arguments) or the eagerly
//! materialized value (constants). Calling a marker binds
//! `{module, name, args}` and dispatches to the module's backend function.

use std::str::FromStr;

use strum::{Display, EnumString};

use crate::{
    audit::AuditLog,
    config::InterpOptions,
    exception::{ErrorKind, RunError, RunResult},
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    value::Value,
};

pub(crate) mod io_mod;
pub(crate) mod json_mod;
pub(crate) mod math;
pub(crate) mod regex_mod;
pub(crate) mod strings;

/// Prefix of the call-marker string a stdlib function member evaluates to.
pub(crate) const CALL_MARKER_PREFIX: &str = "__stdlib_call__:";

/// The registry of recognized stdlib modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum StdlibModule {
    Math,
    Io,
    Strings,
    Json,
    Regex,
}

impl StdlibModule {
    /// Resolves a single-segment `use` target against the registry.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

/// How a module member behaves on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberKind {
    /// Produces a call marker; the value is invoked later with arguments.
    Function,
    /// Materialized eagerly at member-access time.
    Constant,
}

/// Classifies `name` within `module`, or `None` for an unknown member.
pub(crate) fn member_kind(module: StdlibModule, name: &str) -> Option<MemberKind> {
    match module {
        StdlibModule::Math => math::member_kind(name),
        StdlibModule::Io => io_mod::member_kind(name),
        StdlibModule::Strings => strings::member_kind(name),
        StdlibModule::Json => json_mod::member_kind(name),
        StdlibModule::Regex => regex_mod::member_kind(name),
    }
}

/// Builds the marker string for a function member.
pub(crate) fn call_marker(module: StdlibModule, name: &str) -> String {
    format!("{CALL_MARKER_PREFIX}{module}:{name}")
}

/// Splits a marker string back into `(module, name)`.
pub(crate) fn parse_call_marker(marker: &str) -> Option<(StdlibModule, &str)> {
    let rest = marker.strip_prefix(CALL_MARKER_PREFIX)?;
    let (module, name) = rest.split_once(':')?;
    Some((StdlibModule::from_name(module)?, name))
}

/// Shared context handed to stdlib backend functions.
pub(crate) struct StdlibCtx<'a, T: ResourceTracker> {
    pub heap: &'a mut Heap<T>,
    pub options: &'a InterpOptions,
    pub audit: &'a AuditLog,
    pub structs: &'a crate::structs::StructRegistry,
    pub enums: &'a crate::structs::EnumRegistry,
}

/// Invokes `module.name(args)`. Arguments are borrowed; the caller keeps
/// ownership and drops them afterwards.
pub(crate) fn dispatch<T: ResourceTracker>(
    module: StdlibModule,
    name: &str,
    args: &[Value],
    ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    match module {
        StdlibModule::Math => math::call(name, args, ctx),
        StdlibModule::Io => io_mod::call(name, args, ctx),
        StdlibModule::Strings => strings::call(name, args, ctx),
        StdlibModule::Json => json_mod::call(name, args, ctx),
        StdlibModule::Regex => regex_mod::call(name, args, ctx),
    }
}

// Argument accessors shared by the module implementations.

pub(crate) fn expect_arity(module: StdlibModule, name: &str, args: &[Value], arity: usize) -> RunResult<()> {
    if args.len() != arity {
        return Err(RunError::err(
            ErrorKind::TypeError,
            format!("{module}.{name} takes {arity} argument(s), got {}", args.len()),
        ));
    }
    Ok(())
}

pub(crate) fn arg_str<'a, T: ResourceTracker>(
    args: &[Value],
    index: usize,
    heap: &'a Heap<T>,
    what: &str,
) -> RunResult<&'a str> {
    match args.get(index) {
        Some(Value::Ref(id)) => match heap.get(*id) {
            HeapData::Str(s) => Ok(s.as_str()),
            other => Err(wrong_type(what, "string", other.variant_name())),
        },
        Some(other) => Err(wrong_type(what, "string", type_label(other))),
        None => Err(RunError::internal("stdlib argument index out of range")),
    }
}

pub(crate) fn arg_int(args: &[Value], index: usize, what: &str) -> RunResult<i64> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(wrong_type(what, "int", type_label(other))),
        None => Err(RunError::internal("stdlib argument index out of range")),
    }
}

pub(crate) fn arg_num(args: &[Value], index: usize, what: &str) -> RunResult<f64> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i as f64),
        Some(Value::Float(f)) => Ok(*f),
        Some(other) => Err(wrong_type(what, "number", type_label(other))),
        None => Err(RunError::internal("stdlib argument index out of range")),
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Ref(_) => "object",
    }
}

fn wrong_type(what: &str, expected: &str, actual: &str) -> RunError {
    RunError::err(
        ErrorKind::TypeError,
        format!("{what}: expected {expected}, got {actual}"),
    )
}

pub(crate) fn alloc_str<T: ResourceTracker>(heap: &mut Heap<T>, s: impl Into<String>) -> RunResult<Value> {
    Ok(Value::Ref(heap.allocate(HeapData::Str(s.into()))?))
}
