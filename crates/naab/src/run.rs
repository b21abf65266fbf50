//! Public interface for running NAAb programs.

use std::{path::Path, sync::Arc};

use crate::{
    ast::Program,
    audit::AuditLog,
    config::InterpOptions,
    env::{EnvId, Environments},
    exception::{Error, ErrorKind, Frame, RunError},
    function::FunctionTable,
    gc::GcReport,
    heap::{Heap, HeapStats},
    io::{PrintWriter, StdPrint},
    loader::{ModuleLoader, ModuleParser},
    object::Object,
    polyglot::PolyglotRegistry,
    resource::{LimitedTracker, MAX_LINE_LEN, MAX_SOURCE_SIZE},
    sanitize::{SanitizeMode, sanitize_error},
    structs::{EnumRegistry, StructRegistry},
    value::{Value, drop_value, to_object},
};

/// Primary interface for evaluating NAAb programs.
///
/// An `Interp` owns the heap, environment arena, registries, module cache,
/// polyglot backends, and audit log for one interpreter instance. The
/// external parser hands it a [`Program`] plus the source text; evaluation
/// is single-threaded and runs to completion.
///
/// # Example
/// ```
/// use naab::{Interp, InterpOptions, Object};
/// use naab::ast::{Expr, Program, Stmt};
///
/// let program = Program::new("demo.naab")
///     .with_main(vec![Stmt::Return(Some(Expr::int(41).at(2, 5))).at(2, 1)]);
/// let mut interp = Interp::new(InterpOptions::default());
/// let result = interp.run_program(&program, "main { return 41 }").unwrap();
/// assert_eq!(result, Object::Int(41));
/// ```
#[derive(Debug)]
pub struct Interp {
    pub(crate) heap: Heap<LimitedTracker>,
    pub(crate) envs: Environments,
    pub(crate) global_env: EnvId,
    pub(crate) functions: Arc<FunctionTable>,
    pub(crate) structs: Arc<StructRegistry>,
    pub(crate) enums: Arc<EnumRegistry>,
    pub(crate) loader: ModuleLoader,
    pub(crate) parser: Option<Box<dyn ModuleParser>>,
    pub(crate) polyglot: PolyglotRegistry,
    pub(crate) audit: Arc<AuditLog>,
    pub(crate) options: InterpOptions,
    pub(crate) print: Box<dyn PrintWriter>,
    /// Error-reporting stack: one frame per active call, innermost last.
    pub(crate) stack: Vec<Frame>,
    /// Environments of the active call chain; cycle-collector roots.
    pub(crate) env_stack: Vec<EnvId>,
    pub(crate) call_depth: usize,
    /// Expression-nesting counter behind the scoped recursion guard.
    pub(crate) expr_depth: std::rc::Rc<std::cell::Cell<usize>>,
    /// File the currently executing code came from.
    pub(crate) current_file: String,
}

impl Interp {
    /// Creates an interpreter with the given options and the default
    /// polyglot backend set.
    #[must_use]
    pub fn new(options: InterpOptions) -> Self {
        let mut envs = Environments::new();
        let global_env = envs.new_frame(None);
        let audit = Arc::new(AuditLog::new(options.audit_log_path.clone()));
        Self {
            heap: Heap::new(LimitedTracker::new(options.limits)),
            envs,
            global_env,
            functions: Arc::new(FunctionTable::new()),
            structs: Arc::new(StructRegistry::new()),
            enums: Arc::new(EnumRegistry::new()),
            loader: ModuleLoader::new(options.module_search_roots.clone()),
            parser: None,
            polyglot: PolyglotRegistry::with_defaults(),
            audit,
            options,
            print: Box::new(StdPrint),
            stack: Vec::new(),
            env_stack: Vec::new(),
            call_depth: 0,
            expr_depth: std::rc::Rc::new(std::cell::Cell::new(0)),
            current_file: String::new(),
        }
    }

    /// Installs the module parser hook used by `use` imports.
    #[must_use]
    pub fn with_parser(mut self, parser: Box<dyn ModuleParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Redirects `print` output.
    pub fn set_print(&mut self, print: Box<dyn PrintWriter>) {
        self.print = print;
    }

    /// Evaluates a parsed program: declarations first, then `main`.
    ///
    /// Returns the value `main` returned (or `Null`). `source` is the raw
    /// text of the entry file; it is only used for input-cap checks here —
    /// positions in errors come from the AST.
    pub fn run_program(&mut self, program: &Program, source: &str) -> Result<Object, Error> {
        if source.len() > MAX_SOURCE_SIZE {
            return Err(Error::new(
                ErrorKind::ResourceLimit,
                format!("source of {} bytes exceeds the 100 MiB cap", source.len()),
            ));
        }
        if let Some((line_no, _)) = source
            .lines()
            .enumerate()
            .find(|(_, line)| line.len() > MAX_LINE_LEN)
        {
            return Err(Error::new(
                ErrorKind::ResourceLimit,
                format!("line {} exceeds the 10000-character cap", line_no + 1),
            ));
        }

        self.current_file = program.file.clone();
        let result = self.run_program_inner(program);
        match result {
            Ok(object) => Ok(object),
            Err(err) => Err(err.into_error()),
        }
    }

    fn run_program_inner(&mut self, program: &Program) -> Result<Object, RunError> {
        self.eval_decls(program, self.global_env, None)?;

        let Some(main) = &program.main else {
            return Ok(Object::Null);
        };
        let main_env = self.envs.new_frame(Some(self.global_env));
        self.env_stack.push(main_env);
        let outcome = self.eval_block(main, main_env);
        self.env_stack.pop();

        let result = match outcome {
            Ok(crate::eval::Exec::Return(value)) => {
                let object = to_object(&value, &self.heap, &self.structs, &self.enums, 0);
                drop_value(value, &mut self.heap, &mut self.envs);
                object
            }
            Ok(_) => Ok(Object::Null),
            Err(err) => Err(err),
        };
        self.release_env(main_env);
        // Shutdown-time collection keeps cyclic garbage from outliving main.
        self.collect_now();
        result
    }

    /// Explicitly runs the cycle collector, as `gc_collect()` does from user
    /// code.
    pub fn collect_now(&mut self) -> GcReport {
        let mut roots = vec![self.global_env];
        roots.extend(self.env_stack.iter().copied());
        roots.extend(self.loader.module_envs());
        let report = crate::gc::collect(&mut self.heap, &mut self.envs, &roots);
        if report.collected_values > 0 || report.collected_frames > 0 {
            tracing::debug!(
                values = report.collected_values,
                frames = report.collected_frames,
                "cycle collector reclaimed garbage"
            );
            self.audit.log(
                crate::audit::AuditEventKind::GcRun,
                serde_json::json!({
                    "collected_values": report.collected_values,
                    "collected_frames": report.collected_frames,
                }),
            );
        }
        report
    }

    /// Current heap occupancy.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Number of live heap slots; the live-set probe the GC scenarios use.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.heap.live_count()
    }

    /// Number of cached generic specializations.
    #[must_use]
    pub fn specialization_count(&self) -> usize {
        self.functions.specialization_count()
    }

    /// Mangled names of cached generic specializations.
    #[must_use]
    pub fn specialization_names(&self) -> Vec<String> {
        self.functions.specialization_names()
    }

    /// The interpreter's audit log.
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The struct registry (shared with module evaluation).
    #[must_use]
    pub fn struct_registry(&self) -> &StructRegistry {
        &self.structs
    }

    /// Formats an uncaught error for the user: sanitized message plus a
    /// stack trace, most recent call first.
    #[must_use]
    pub fn format_uncaught(&self, error: &Error) -> String {
        let sanitized = sanitize_error(
            &error.to_string(),
            self.options.sanitize_mode,
            self.options.repo_root.as_deref(),
        );
        if sanitized.redacted {
            self.audit.log(
                crate::audit::AuditEventKind::SanitizerHit,
                serde_json::json!({ "kind": error.kind().to_string() }),
            );
        }
        let mut out = sanitized.message;
        for line in error.trace_lines() {
            let line = sanitize_error(&line, self.options.sanitize_mode, self.options.repo_root.as_deref());
            out.push_str("\n    ");
            out.push_str(&line.message);
        }
        out
    }

    pub(crate) fn drop_val(&mut self, value: Value) {
        drop_value(value, &mut self.heap, &mut self.envs);
    }

    /// Releases one reference to an environment frame.
    pub(crate) fn release_env(&mut self, env: EnvId) {
        crate::value::drain_release_queues(&mut self.heap, &mut self.envs, Vec::new(), vec![env]);
    }
}

impl Drop for Interp {
    fn drop(&mut self) {
        self.polyglot.shutdown_all();
    }
}

/// Convenience sanitize entry for hosts that hold an error but no
/// interpreter (for example after teardown).
#[must_use]
pub fn format_error(error: &Error, mode: SanitizeMode, repo_root: Option<&Path>) -> String {
    let mut out = sanitize_error(&error.to_string(), mode, repo_root).message;
    for line in error.trace_lines() {
        out.push_str("\n    ");
        out.push_str(&sanitize_error(&line, mode, repo_root).message);
    }
    out
}
