#![doc = include_str!("../../../README.md")]

pub mod ast;

mod arith;
mod audit;
mod config;
mod env;
mod eval;
mod exception;
mod function;
mod gc;
mod generics;
mod heap;
mod io;
mod loader;
mod object;
mod paths;
mod polyglot;
mod regex_guard;
mod resource;
mod run;
mod sanitize;
mod stdlib;
mod structs;
mod value;

pub use crate::{
    audit::{AuditEventKind, AuditLog, AuditRecord, AuditVerification, HMAC_KEY_ENV, verify_audit_log},
    config::InterpOptions,
    exception::{Error, ErrorKind, Frame},
    gc::GcReport,
    heap::HeapStats,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    loader::ModuleParser,
    object::{Object, WrongType},
    polyglot::{
        BlockData, LanguageId, PolyKind, PolyglotFailure,
        future::{CancelToken, PolyFuture, WaitError, WorkerPool, race, retry_with_backoff, run_parallel, spawn},
    },
    resource::{LimitedTracker, ResourceError, ResourceLimits, ResourceTracker},
    run::{Interp, format_error},
    sanitize::SanitizeMode,
    stdlib::StdlibModule,
    structs::{EnumDef, EnumRegistry, Registered, StructDef, StructRegistry},
};
