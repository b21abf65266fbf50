//! AST evaluation.
//!
//! The evaluator is a visitor producing a value for expressions and an
//! [`Exec`] status for statements. Function boundaries translate statuses:
//! `return` becomes the call's result, `break`/`continue` escaping a loop is
//! a defensive `ControlFlowError`, and `throw` propagates as an error until
//! a matching `catch` binds it.

use std::str::FromStr;
use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    arith,
    ast::{
        AssignTarget, BinOp, CatchClause, CodeLoc, Decl, Expr, ExprLoc, Literal, PolyglotBlock, Program, Stmt,
        StmtLoc, TypeExpr, UnOp, UseDecl,
    },
    audit::AuditEventKind,
    env::{AssignOutcome, EnvId},
    exception::{Error, ErrorKind, Frame, RunError, RunResult},
    function::{FunctionDef, FunctionId},
    generics,
    heap::{HeapData, HeapId},
    polyglot::{BlockRequest, marshal},
    resource::{CounterGuard, MAX_EXPR_DEPTH, MAX_STACK_FRAMES, ResourceTracker},
    run::Interp,
    stdlib::{self, MemberKind, StdlibCtx, StdlibModule},
    structs::StructDef,
    value::{
        RANGE_END, RANGE_MARKER, RANGE_START, Value, as_range, check_dict_len, check_list_len, deep_copy,
        from_object, to_object, type_tag, value_eq,
    },
};

/// Statement status.
#[derive(Debug)]
pub(crate) enum Exec {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Builtin functions reachable without an import.
const BUILTINS: &[&str] = &["print", "len", "push", "str", "type_of", "gc_collect", "mark_sensitive"];

impl Interp {
    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    /// Evaluates a program's top-level declarations into `env`.
    ///
    /// `module_path` is `Some` while loading an imported module; exported
    /// names are then recorded in the loader's export table.
    pub(crate) fn eval_decls(
        &mut self,
        program: &Program,
        env: EnvId,
        module_path: Option<&std::path::Path>,
    ) -> RunResult<()> {
        for decl in &program.decls {
            match decl {
                Decl::Use(use_decl) => self.eval_use(use_decl, env)?,
                Decl::Struct(decl) => {
                    let def = StructDef::from_decl(decl, &self.current_file);
                    self.structs.register(def).map_err(|err| self.locate(err, decl.loc))?;
                    if let Some(path) = module_path {
                        self.loader.add_export(path, &decl.name);
                    }
                }
                Decl::Enum(decl) => {
                    self.enums.register(decl, &self.current_file);
                    if let Some(path) = module_path {
                        self.loader.add_export(path, &decl.name);
                    }
                }
                Decl::Function(decl) => {
                    let def = FunctionDef::from_decl(decl, &self.current_file);
                    let func = self.functions.register(def);
                    let id = self
                        .heap
                        .allocate(HeapData::Function { func, captured_env: env })
                        .map_err(RunError::from)?;
                    self.envs.inc_ref(env);
                    if let Some(old) = self.envs.define(env, &decl.name, Value::Ref(id)) {
                        self.drop_val(old);
                    }
                    if let Some(path) = module_path {
                        self.loader.add_export(path, &decl.name);
                    }
                }
                Decl::Const(decl) => {
                    let value = self.eval_rhs(&decl.value, env)?;
                    if let Some(ty) = &decl.ty {
                        if let Err(err) = self.check_declared_type(&value, ty, &decl.name, decl.loc) {
                            self.drop_val(value);
                            return Err(err);
                        }
                        self.envs.declare_type(env, &decl.name, ty.clone());
                    }
                    if let Some(old) = self.envs.define(env, &decl.name, value) {
                        self.drop_val(old);
                    }
                    if let Some(path) = module_path {
                        self.loader.add_export(path, &decl.name);
                    }
                }
                Decl::Stray(stmt) => {
                    return Err(self.error(
                        ErrorKind::ParseError,
                        "free-standing statements are not allowed at module top level; \
                         only `use`, `export` declarations, and `main` may appear here",
                        stmt.loc,
                    ));
                }
            }
        }
        Ok(())
    }

    fn eval_use(&mut self, use_decl: &UseDecl, env: EnvId) -> RunResult<()> {
        let bound_name = use_decl.bound_name().to_owned();

        // Recognized stdlib modules shadow the filesystem for single-segment
        // imports.
        if use_decl.path.len() == 1
            && let Some(module) = StdlibModule::from_name(&use_decl.path[0])
        {
            let id = self
                .heap
                .allocate(HeapData::Stdlib(module))
                .map_err(RunError::from)?;
            if let Some(old) = self.envs.define(env, bound_name, Value::Ref(id)) {
                self.drop_val(old);
            }
            return Ok(());
        }

        let path = self
            .loader
            .resolve(&use_decl.path, &self.current_file)
            .map_err(|err| self.locate(err, use_decl.loc))?;

        let module_env = if let Some(entry) = self.loader.entry(&path) {
            // Loaded, or mid-load: a cycle participant binds the partially
            // populated environment and does not re-evaluate.
            entry.env
        } else {
            self.load_module(&path, use_decl.loc)?
        };

        let id = self
            .heap
            .allocate(HeapData::Module(module_env))
            .map_err(RunError::from)?;
        self.envs.inc_ref(module_env);
        if let Some(old) = self.envs.define(env, bound_name, Value::Ref(id)) {
            self.drop_val(old);
        }
        Ok(())
    }

    fn load_module(&mut self, path: &std::path::Path, loc: CodeLoc) -> RunResult<EnvId> {
        let source = self.loader.read_source(path).map_err(|err| self.locate(err, loc))?;
        let program = {
            let Some(parser) = &self.parser else {
                return Err(self.error(
                    ErrorKind::ParseError,
                    format!("cannot load {}: no module parser configured", path.display()),
                    loc,
                ));
            };
            parser
                .parse_module(&source, path)
                .map_err(|err| RunError::Exc(Box::new(err)))?
        };

        let module_env = self.envs.new_frame(None);
        self.loader.begin_loading(path.to_path_buf(), module_env);

        let saved_file = std::mem::replace(&mut self.current_file, program.file.clone());
        self.env_stack.push(module_env);
        let outcome = self.eval_decls(&program, module_env, Some(path));
        self.env_stack.pop();
        self.current_file = saved_file;

        match outcome {
            Ok(()) => {
                self.loader.finish_loading(path);
                Ok(module_env)
            }
            Err(err) => {
                if let Some(env) = self.loader.abandon(path) {
                    self.release_env(env);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(crate) fn eval_block(&mut self, stmts: &[StmtLoc], env: EnvId) -> RunResult<Exec> {
        for stmt in stmts {
            self.statement_boundary();
            match self.eval_stmt(stmt, env)? {
                Exec::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Exec::Normal)
    }

    /// Runs the automatic cycle-collector trigger.
    fn statement_boundary(&mut self) {
        if self.options.gc_enabled && self.heap.allocations_since_gc() >= self.options.gc_threshold {
            self.collect_now();
        }
    }

    fn eval_stmt(&mut self, stmt: &StmtLoc, env: EnvId) -> RunResult<Exec> {
        match &stmt.stmt {
            Stmt::Let { name, ty, init } => {
                self.eval_let(name, ty.as_ref(), init.as_ref(), env, stmt.loc)?;
                Ok(Exec::Normal)
            }
            Stmt::Assign { target, value } => {
                self.eval_assign(target, value, env, stmt.loc)?;
                Ok(Exec::Normal)
            }
            Stmt::Expr(expr) => {
                // A bare polyglot block statement runs for side effects.
                if let Expr::Block(block) = &expr.expr {
                    self.run_polyglot(block, env, false, expr.loc)?;
                    return Ok(Exec::Normal);
                }
                let value = self.eval_expr(expr, env)?;
                self.drop_val(value);
                Ok(Exec::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond_value = self.eval_expr(cond, env)?;
                let truthy = cond_value.truthy(&self.heap);
                self.drop_val(cond_value);
                if truthy {
                    self.eval_block(then_body, env)
                } else if let Some(else_body) = else_body {
                    self.eval_block(else_body, env)
                } else {
                    Ok(Exec::Normal)
                }
            }
            Stmt::While { cond, body } => {
                loop {
                    let cond_value = self.eval_expr(cond, env)?;
                    let truthy = cond_value.truthy(&self.heap);
                    self.drop_val(cond_value);
                    if !truthy {
                        break;
                    }
                    match self.eval_block(body, env)? {
                        Exec::Normal | Exec::Continue => {}
                        Exec::Break => break,
                        Exec::Return(value) => return Ok(Exec::Return(value)),
                    }
                }
                Ok(Exec::Normal)
            }
            Stmt::For { bindings, iter, body } => self.eval_for(bindings, iter, body, env, stmt.loc),
            Stmt::Break => Ok(Exec::Break),
            Stmt::Continue => Ok(Exec::Continue),
            Stmt::Return(value) => {
                let result = match value {
                    Some(expr) => self.eval_rhs(expr, env)?,
                    None => Value::Null,
                };
                Ok(Exec::Return(result))
            }
            Stmt::Throw(expr) => {
                let value = self.eval_expr(expr, env)?;
                let payload = to_object(&value, &self.heap, &self.structs, &self.enums, 0);
                self.drop_val(value);
                let payload = payload?;
                Err(RunError::Exc(Box::new(
                    Error::new(ErrorKind::UserError, payload.to_string())
                        .with_payload(payload)
                        .with_frames(self.frames_snapshot(expr.loc)),
                )))
            }
            Stmt::Try { body, catch, finally } => self.eval_try(body, catch.as_ref(), finally.as_deref(), env),
        }
    }

    fn eval_let(
        &mut self,
        name: &str,
        ty: Option<&TypeExpr>,
        init: Option<&ExprLoc>,
        env: EnvId,
        loc: CodeLoc,
    ) -> RunResult<()> {
        let value = match init {
            Some(expr) => self.eval_rhs(expr, env)?,
            None => {
                let Some(ty) = ty else {
                    return Err(self.error(
                        ErrorKind::TypeInferenceError,
                        format!("cannot declare {name} without an initializer or a type annotation"),
                        loc,
                    ));
                };
                if !ty.admits_null() {
                    return Err(self.error(
                        ErrorKind::TypeInferenceError,
                        format!("{name}: missing initializer for non-nullable type {}", ty.display()),
                        loc,
                    ));
                }
                Value::Null
            }
        };

        match ty {
            Some(ty) => {
                if let Err(err) = self.check_declared_type(&value, ty, name, loc) {
                    self.drop_val(value);
                    return Err(err);
                }
                self.envs.declare_type(env, name, ty.clone());
            }
            None => {
                if matches!(value, Value::Null) {
                    return Err(self.error(
                        ErrorKind::TypeInferenceError,
                        format!("cannot infer a type for {name} from null; annotate it as nullable"),
                        loc,
                    ));
                }
            }
        }

        if let Some(old) = self.envs.define(env, name, value) {
            self.drop_val(old);
        }
        Ok(())
    }

    fn eval_assign(&mut self, target: &AssignTarget, value: &ExprLoc, env: EnvId, loc: CodeLoc) -> RunResult<()> {
        let new_value = self.eval_rhs(value, env)?;
        match target {
            AssignTarget::Name(name) => {
                if let Some(ty) = self.envs.declared_type(env, name).cloned()
                    && let Err(err) = self.check_declared_type(&new_value, &ty, name, loc)
                {
                    self.drop_val(new_value);
                    return Err(err);
                }
                match self.envs.assign(env, name, new_value) {
                    AssignOutcome::Replaced(old) => {
                        self.drop_val(old);
                        Ok(())
                    }
                    AssignOutcome::NotFound(rejected) => {
                        self.drop_val(rejected);
                        Err(self.undefined_name(name, env, loc))
                    }
                }
            }
            AssignTarget::Member { object, name } => {
                let object_value = match self.eval_expr(object, env) {
                    Ok(value) => value,
                    Err(err) => {
                        self.drop_val(new_value);
                        return Err(err);
                    }
                };
                let result = self.assign_member(&object_value, name, new_value, loc);
                self.drop_val(object_value);
                result
            }
            AssignTarget::Index { object, index } => {
                let object_value = match self.eval_expr(object, env) {
                    Ok(value) => value,
                    Err(err) => {
                        self.drop_val(new_value);
                        return Err(err);
                    }
                };
                let index_value = match self.eval_expr(index, env) {
                    Ok(value) => value,
                    Err(err) => {
                        self.drop_val(new_value);
                        self.drop_val(object_value);
                        return Err(err);
                    }
                };
                let result = self.assign_index(&object_value, &index_value, new_value, loc);
                self.drop_val(object_value);
                self.drop_val(index_value);
                result
            }
        }
    }

    fn assign_member(&mut self, object: &Value, name: &str, new_value: Value, loc: CodeLoc) -> RunResult<()> {
        let Some(id) = object.ref_id() else {
            self.drop_val(new_value);
            if matches!(object, Value::Null) {
                return Err(self.error(ErrorKind::NullAccess, format!("cannot set field {name} on null"), loc));
            }
            return Err(self.error(ErrorKind::TypeError, format!("cannot set field {name} on this value"), loc));
        };
        let field_index = match self.heap.get(id) {
            HeapData::Struct { def, .. } => {
                let def = self.structs.get(*def);
                def.field_index(name)
            }
            HeapData::Dict(_) => None,
            _ => {
                self.drop_val(new_value);
                return Err(self.error(ErrorKind::TypeError, format!("cannot set field {name} on this value"), loc));
            }
        };

        match self.heap.get_mut(id) {
            HeapData::Struct { fields, .. } => {
                let Some(index) = field_index else {
                    self.drop_val(new_value);
                    return Err(self.error(ErrorKind::TypeError, format!("struct has no field {name}"), loc));
                };
                let old = std::mem::replace(&mut fields[index], new_value);
                self.drop_val(old);
            }
            HeapData::Dict(entries) => {
                if !entries.contains_key(name) {
                    if let Err(err) = check_dict_len(entries.len() + 1) {
                        self.drop_val(new_value);
                        return Err(err);
                    }
                }
                if let Some(old) = self.heap_dict_insert(id, name.to_owned(), new_value) {
                    self.drop_val(old);
                }
            }
            _ => unreachable!("checked above"),
        }
        Ok(())
    }

    fn heap_dict_insert(&mut self, id: HeapId, key: String, value: Value) -> Option<Value> {
        match self.heap.get_mut(id) {
            HeapData::Dict(entries) => entries.insert(key, value),
            _ => None,
        }
    }

    fn assign_index(&mut self, object: &Value, index: &Value, new_value: Value, loc: CodeLoc) -> RunResult<()> {
        let Some(id) = object.ref_id() else {
            self.drop_val(new_value);
            if matches!(object, Value::Null) {
                return Err(self.error(ErrorKind::NullAccess, "cannot index null", loc));
            }
            return Err(self.error(ErrorKind::TypeError, "this value is not indexable", loc));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let len = items.len();
                let Value::Int(i) = index else {
                    self.drop_val(new_value);
                    return Err(self.error(ErrorKind::TypeError, "list index must be an int", loc));
                };
                let idx = match arith::check_array_bounds(*i, len) {
                    Ok(idx) => idx,
                    Err(err) => {
                        self.drop_val(new_value);
                        return Err(self.locate(err, loc));
                    }
                };
                let HeapData::List(items) = self.heap.get_mut(id) else {
                    unreachable!()
                };
                let old = std::mem::replace(&mut items[idx], new_value);
                self.drop_val(old);
                Ok(())
            }
            HeapData::Dict(entries) => {
                let key = match self.read_str(index) {
                    Some(key) => key,
                    None => {
                        self.drop_val(new_value);
                        return Err(self.error(ErrorKind::TypeError, "dict key must be a string", loc));
                    }
                };
                if !entries.contains_key(&key)
                    && let Err(err) = check_dict_len(entries.len() + 1)
                {
                    self.drop_val(new_value);
                    return Err(self.locate(err, loc));
                }
                if let Some(old) = self.heap_dict_insert(id, key, new_value) {
                    self.drop_val(old);
                }
                Ok(())
            }
            _ => {
                self.drop_val(new_value);
                Err(self.error(ErrorKind::TypeError, "this value is not indexable", loc))
            }
        }
    }

    fn eval_for(
        &mut self,
        bindings: &[String],
        iter: &ExprLoc,
        body: &[StmtLoc],
        env: EnvId,
        loc: CodeLoc,
    ) -> RunResult<Exec> {
        let iter_value = self.eval_expr(iter, env)?;

        // Ranges iterate lazily: O(1) memory regardless of span.
        if let Some((start, end)) = as_range(&iter_value, &self.heap) {
            self.drop_val(iter_value);
            let name = bindings.first().cloned().unwrap_or_default();
            let loop_env = self.envs.new_frame(Some(env));
            self.env_stack.push(loop_env);
            let mut outcome = Exec::Normal;
            let mut i = start;
            while i < end {
                if let Some(old) = self.envs.define(loop_env, &name, Value::Int(i)) {
                    self.drop_val(old);
                }
                match self.eval_block(body, loop_env) {
                    Ok(Exec::Normal) | Ok(Exec::Continue) => {}
                    Ok(Exec::Break) => break,
                    Ok(Exec::Return(value)) => {
                        outcome = Exec::Return(value);
                        break;
                    }
                    Err(err) => {
                        self.env_stack.pop();
                        self.release_env(loop_env);
                        return Err(err);
                    }
                }
                i += 1;
            }
            self.env_stack.pop();
            self.release_env(loop_env);
            return Ok(outcome);
        }

        // Lists and dicts iterate over a snapshot, so mutation inside the
        // body does not disturb the traversal.
        enum Snapshot {
            List(Vec<Value>),
            Dict(Vec<(String, Value)>),
        }
        let snapshot = match iter_value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::List(items)) => {
                let peeked: Vec<Value> = items.iter().map(Value::shallow_peek).collect();
                for item in &peeked {
                    if let Some(id) = item.ref_id() {
                        self.heap.inc_ref(id);
                    }
                }
                Snapshot::List(peeked)
            }
            Some(HeapData::Dict(entries)) => {
                let peeked: Vec<(String, Value)> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.shallow_peek()))
                    .collect();
                for (_, item) in &peeked {
                    if let Some(id) = item.ref_id() {
                        self.heap.inc_ref(id);
                    }
                }
                Snapshot::Dict(peeked)
            }
            _ => {
                self.drop_val(iter_value);
                return Err(self.error(
                    ErrorKind::TypeError,
                    "for loops iterate over ranges, lists, or dicts",
                    loc,
                ));
            }
        };
        self.drop_val(iter_value);

        let loop_env = self.envs.new_frame(Some(env));
        self.env_stack.push(loop_env);
        let mut outcome: RunResult<Exec> = Ok(Exec::Normal);

        match snapshot {
            Snapshot::List(items) => {
                let name = bindings.first().cloned().unwrap_or_default();
                let mut items = items.into_iter();
                for item in items.by_ref() {
                    if let Some(old) = self.envs.define(loop_env, &name, item) {
                        self.drop_val(old);
                    }
                    match self.eval_block(body, loop_env) {
                        Ok(Exec::Normal) | Ok(Exec::Continue) => {}
                        Ok(Exec::Break) => break,
                        Ok(Exec::Return(value)) => {
                            outcome = Ok(Exec::Return(value));
                            break;
                        }
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                for leftover in items {
                    self.drop_val(leftover);
                }
            }
            Snapshot::Dict(entries) => {
                let mut entries = entries.into_iter();
                for (key, item) in entries.by_ref() {
                    if let Err(err) = self.bind_dict_entry(bindings, loop_env, key, item) {
                        outcome = Err(err);
                        break;
                    }
                    match self.eval_block(body, loop_env) {
                        Ok(Exec::Normal) | Ok(Exec::Continue) => {}
                        Ok(Exec::Break) => break,
                        Ok(Exec::Return(value)) => {
                            outcome = Ok(Exec::Return(value));
                            break;
                        }
                        Err(err) => {
                            outcome = Err(err);
                            break;
                        }
                    }
                }
                for (_, leftover) in entries {
                    self.drop_val(leftover);
                }
            }
        }

        self.env_stack.pop();
        self.release_env(loop_env);
        outcome
    }

    /// Binds one dict entry: `for k, v in d` binds key and value; a single
    /// binding receives a `[key, value]` pair list. Owns `value` on every
    /// path, including allocation failure.
    fn bind_dict_entry(&mut self, bindings: &[String], env: EnvId, key: String, value: Value) -> RunResult<()> {
        let key_value = match self.heap.allocate(HeapData::Str(key)) {
            Ok(id) => Value::Ref(id),
            Err(err) => {
                self.drop_val(value);
                return Err(RunError::from(err));
            }
        };
        if bindings.len() >= 2 {
            if let Some(old) = self.envs.define(env, &bindings[0], key_value) {
                self.drop_val(old);
            }
            if let Some(old) = self.envs.define(env, &bindings[1], value) {
                self.drop_val(old);
            }
        } else {
            let pair = match self.heap.allocate(HeapData::List(vec![key_value, value])) {
                Ok(id) => Value::Ref(id),
                Err(err) => return Err(RunError::from(err)),
            };
            let name = bindings.first().cloned().unwrap_or_default();
            if let Some(old) = self.envs.define(env, &name, pair) {
                self.drop_val(old);
            }
        }
        Ok(())
    }

    fn eval_try(
        &mut self,
        body: &[StmtLoc],
        catch: Option<&CatchClause>,
        finally: Option<&[StmtLoc]>,
        env: EnvId,
    ) -> RunResult<Exec> {
        let mut outcome = self.eval_block(body, env);

        if let Err(RunError::Exc(err)) = &outcome
            && let Some(clause) = catch
            && catch_matches(clause.kind.as_deref(), err.kind())
        {
            let Err(RunError::Exc(err)) = std::mem::replace(&mut outcome, Ok(Exec::Normal)) else {
                unreachable!("checked above");
            };
            let catch_env = self.envs.new_frame(Some(env));
            self.env_stack.push(catch_env);
            let binding = self.error_binding_value(&err);
            outcome = match binding {
                Ok(binding) => {
                    if let Some(old) = self.envs.define(catch_env, &clause.name, binding) {
                        self.drop_val(old);
                    }
                    self.eval_block(&clause.body, catch_env)
                }
                Err(bind_err) => Err(bind_err),
            };
            self.env_stack.pop();
            self.release_env(catch_env);
        }

        // `finally` runs on every exit path; its own non-normal status
        // supersedes the pending one.
        if let Some(finally_body) = finally {
            match self.eval_block(finally_body, env) {
                Ok(Exec::Normal) => {}
                superseding => {
                    if let Ok(Exec::Return(pending)) = outcome {
                        self.drop_val(pending);
                    }
                    outcome = superseding;
                }
            }
        }
        outcome
    }

    /// The value bound by `catch (e)`: the thrown value verbatim for user
    /// errors, a `{kind, message}` record otherwise.
    fn error_binding_value(&mut self, err: &Error) -> RunResult<Value> {
        if err.kind() == ErrorKind::UserError
            && let Some(payload) = err.payload()
        {
            return from_object(payload, &mut self.heap, &self.structs, &self.enums);
        }
        let mut record = IndexMap::new();
        let kind_id = self
            .heap
            .allocate(HeapData::Str(err.kind().to_string()))
            .map_err(RunError::from)?;
        record.insert("kind".to_owned(), Value::Ref(kind_id));
        let message_id = self
            .heap
            .allocate(HeapData::Str(err.message().to_owned()))
            .map_err(RunError::from)?;
        record.insert("message".to_owned(), Value::Ref(message_id));
        Ok(Value::Ref(
            self.heap.allocate(HeapData::Dict(record)).map_err(RunError::from)?,
        ))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Evaluates a binding right-hand side. Polyglot blocks in this
    /// position execute immediately and substitute their parsed result.
    pub(crate) fn eval_rhs(&mut self, expr: &ExprLoc, env: EnvId) -> RunResult<Value> {
        if let Expr::Block(block) = &expr.expr {
            let result = self.run_polyglot(block, env, true, expr.loc)?;
            return Ok(result.expect("result-bearing polyglot run returns a value"));
        }
        self.eval_expr(expr, env)
    }

    pub(crate) fn eval_expr(&mut self, expr: &ExprLoc, env: EnvId) -> RunResult<Value> {
        let loc = expr.loc;
        // Scoped nesting guard: deeply nested expression trees unwind as
        // StackOverflow instead of exhausting the host stack.
        let _depth = CounterGuard::enter(std::rc::Rc::clone(&self.expr_depth), MAX_EXPR_DEPTH)
            .map_err(|err| self.locate(RunError::from(err), loc))?;
        match &expr.expr {
            Expr::Literal(lit) => self.eval_literal(lit),
            Expr::Name(name) => {
                if let Some(peeked) = self.envs.lookup(env, name).map(Value::shallow_peek) {
                    if let Some(id) = peeked.ref_id() {
                        self.heap.inc_ref(id);
                    }
                    return Ok(peeked);
                }
                Err(self.undefined_name(name, env, loc))
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, env, loc),
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, env)?;
                let result = match op {
                    UnOp::Neg => match &value {
                        Value::Int(i) => arith::safe_neg(*i).map(Value::Int).map_err(|e| self.locate(e, loc)),
                        Value::Float(f) => Ok(Value::Float(-*f)),
                        _ => Err(self.error(ErrorKind::TypeError, "cannot negate this value", loc)),
                    },
                    UnOp::Not => Ok(Value::Bool(!value.truthy(&self.heap))),
                };
                self.drop_val(value);
                result
            }
            Expr::Range { start, end } => {
                let start_value = self.eval_expr(start, env)?;
                let end_value = self.eval_expr(end, env)?;
                let result = match (&start_value, &end_value) {
                    (Value::Int(a), Value::Int(b)) => {
                        if a > b {
                            Err(self.error(
                                ErrorKind::TypeError,
                                format!("range start {a} exceeds end {b}"),
                                loc,
                            ))
                        } else {
                            let mut entries = IndexMap::new();
                            entries.insert(RANGE_MARKER.to_owned(), Value::Bool(true));
                            entries.insert(RANGE_START.to_owned(), Value::Int(*a));
                            entries.insert(RANGE_END.to_owned(), Value::Int(*b));
                            self.heap
                                .allocate(HeapData::Dict(entries))
                                .map(Value::Ref)
                                .map_err(|e| self.locate(RunError::from(e), loc))
                        }
                    }
                    _ => Err(self.error(ErrorKind::TypeError, "range endpoints must be integers", loc)),
                };
                self.drop_val(start_value);
                self.drop_val(end_value);
                result
            }
            Expr::Pipeline { value, func } => {
                // x |> f desugars to f(x).
                let args = std::slice::from_ref(value.as_ref());
                self.eval_call(func, &[], args, env, loc)
            }
            Expr::Call { callee, type_args, args } => self.eval_call(callee, type_args, args, env, loc),
            Expr::Index { object, index } => {
                let object_value = self.eval_expr(object, env)?;
                let index_value = self.eval_expr(index, env)?;
                let result = self.eval_index(&object_value, &index_value, loc);
                self.drop_val(object_value);
                self.drop_val(index_value);
                result
            }
            Expr::Member { object, name } => self.eval_member(object, name, env, loc),
            Expr::StructLit {
                module,
                name,
                type_args,
                fields,
            } => self.eval_struct_lit(module.as_deref(), name, type_args, fields, env, loc),
            Expr::ListLit(items) => {
                check_list_len(items.len()).map_err(|e| self.locate(e, loc))?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval_expr(item, env) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            for value in values {
                                self.drop_val(value);
                            }
                            return Err(err);
                        }
                    }
                }
                self.heap
                    .allocate(HeapData::List(values))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
            Expr::DictLit(entries) => {
                check_dict_len(entries.len()).map_err(|e| self.locate(e, loc))?;
                let mut values: IndexMap<String, Value> = IndexMap::with_capacity(entries.len());
                for (key_expr, value_expr) in entries {
                    let key_value = self.eval_expr(key_expr, env)?;
                    let Some(key) = self.read_str(&key_value) else {
                        self.drop_val(key_value);
                        for (_, value) in values {
                            self.drop_val(value);
                        }
                        return Err(self.error(ErrorKind::TypeError, "dict keys must be strings", key_expr.loc));
                    };
                    self.drop_val(key_value);
                    match self.eval_expr(value_expr, env) {
                        Ok(value) => {
                            if let Some(old) = values.insert(key, value) {
                                self.drop_val(old);
                            }
                        }
                        Err(err) => {
                            for (_, value) in values {
                                self.drop_val(value);
                            }
                            return Err(err);
                        }
                    }
                }
                self.heap
                    .allocate(HeapData::Dict(values))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
            Expr::Block(block) => {
                // Outside binding position a block evaluates to its handle.
                let data = crate::polyglot::BlockData {
                    language: block.language,
                    block_id: Uuid::new_v4(),
                    source: block.source.clone(),
                    captures: block.captures.clone(),
                };
                self.heap
                    .allocate(HeapData::Block(data))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
        }
    }

    fn eval_literal(&mut self, lit: &Literal) -> RunResult<Value> {
        Ok(match lit {
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
            Literal::Str(s) => Value::Ref(self.heap.allocate(HeapData::Str(s.clone())).map_err(RunError::from)?),
        })
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &ExprLoc,
        right: &ExprLoc,
        env: EnvId,
        loc: CodeLoc,
    ) -> RunResult<Value> {
        // Short-circuit forms evaluate the right side conditionally.
        if matches!(op, BinOp::And | BinOp::Or) {
            let left_value = self.eval_expr(left, env)?;
            let left_truthy = left_value.truthy(&self.heap);
            self.drop_val(left_value);
            let decided = match op {
                BinOp::And => !left_truthy,
                _ => left_truthy,
            };
            if decided {
                return Ok(Value::Bool(left_truthy));
            }
            let right_value = self.eval_expr(right, env)?;
            let right_truthy = right_value.truthy(&self.heap);
            self.drop_val(right_value);
            return Ok(Value::Bool(right_truthy));
        }

        let left_value = self.eval_expr(left, env)?;
        let right_value = match self.eval_expr(right, env) {
            Ok(value) => value,
            Err(err) => {
                self.drop_val(left_value);
                return Err(err);
            }
        };
        let result = self.apply_binary(op, &left_value, &right_value, loc);
        self.drop_val(left_value);
        self.drop_val(right_value);
        result
    }

    fn apply_binary(&mut self, op: BinOp, left: &Value, right: &Value, loc: CodeLoc) -> RunResult<Value> {
        use BinOp::*;
        match op {
            Eq => Ok(Value::Bool(value_eq(left, right, &self.heap, 0)?)),
            Ne => Ok(Value::Bool(!value_eq(left, right, &self.heap, 0)?)),
            Lt | Le | Gt | Ge => self.apply_comparison(op, left, right, loc),
            Add | Sub | Mul | Div | Rem => self.apply_arithmetic(op, left, right, loc),
            And | Or => unreachable!("short-circuit forms handled by eval_binary"),
        }
    }

    fn apply_comparison(&mut self, op: BinOp, left: &Value, right: &Value, loc: CodeLoc) -> RunResult<Value> {
        let ordering: Option<std::cmp::Ordering> = match (left, right) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Ref(a), Value::Ref(b)) => match (self.heap.get(*a), self.heap.get(*b)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => Some(s1.cmp(s2)),
                _ => {
                    return Err(self.error(ErrorKind::TypeError, "these values cannot be ordered", loc));
                }
            },
            _ => {
                return Err(self.error(ErrorKind::TypeError, "these values cannot be ordered", loc));
            }
        };
        // NaN comparisons are tri-valued: every ordering test is false.
        let result = match ordering {
            None => false,
            Some(ordering) => match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            },
        };
        Ok(Value::Bool(result))
    }

    fn apply_arithmetic(&mut self, op: BinOp, left: &Value, right: &Value, loc: CodeLoc) -> RunResult<Value> {
        use BinOp::*;
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => {
                let result = match op {
                    Add => arith::safe_add(*a, *b),
                    Sub => arith::safe_sub(*a, *b),
                    Mul => arith::safe_mul(*a, *b),
                    Div => arith::safe_div(*a, *b),
                    Rem => arith::safe_rem(*a, *b),
                    _ => unreachable!(),
                };
                result.map(Value::Int).map_err(|e| self.locate(e, loc))
            }
            (Value::Float(_), Value::Float(_) | Value::Int(_)) | (Value::Int(_), Value::Float(_)) => {
                let a = as_float(left);
                let b = as_float(right);
                // Float arithmetic follows IEEE 754; NaN and infinity are
                // legal here and only rejected at the FFI boundary.
                let result = match op {
                    Add => a + b,
                    Sub => a - b,
                    Mul => a * b,
                    Div => a / b,
                    Rem => a % b,
                    _ => unreachable!(),
                };
                Ok(Value::Float(result))
            }
            (Value::Ref(a), Value::Ref(b)) if op == Add => match (self.heap.get(*a), self.heap.get(*b)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => {
                    let joined = format!("{s1}{s2}");
                    self.heap
                        .allocate(HeapData::Str(joined))
                        .map(Value::Ref)
                        .map_err(|e| self.locate(RunError::from(e), loc))
                }
                (HeapData::List(l1), HeapData::List(l2)) => {
                    check_list_len(l1.len() + l2.len()).map_err(|e| self.locate(e, loc))?;
                    let mut joined: Vec<Value> = Vec::with_capacity(l1.len() + l2.len());
                    let mut ids = Vec::new();
                    for item in l1.iter().chain(l2.iter()) {
                        let peeked = item.shallow_peek();
                        if let Some(id) = peeked.ref_id() {
                            ids.push(id);
                        }
                        joined.push(peeked);
                    }
                    for id in ids {
                        self.heap.inc_ref(id);
                    }
                    self.heap
                        .allocate(HeapData::List(joined))
                        .map(Value::Ref)
                        .map_err(|e| self.locate(RunError::from(e), loc))
                }
                _ => Err(self.error(ErrorKind::TypeError, "cannot add these values", loc)),
            },
            _ => Err(self.error(
                ErrorKind::TypeError,
                format!("unsupported operand types for {op:?}"),
                loc,
            )),
        }
    }

    fn eval_index(&mut self, object: &Value, index: &Value, loc: CodeLoc) -> RunResult<Value> {
        let Some(id) = object.ref_id() else {
            if matches!(object, Value::Null) {
                return Err(self.error(ErrorKind::NullAccess, "cannot index null", loc));
            }
            return Err(self.error(ErrorKind::TypeError, "this value is not indexable", loc));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let Value::Int(i) = index else {
                    return Err(self.error(ErrorKind::TypeError, "list index must be an int", loc));
                };
                let idx = arith::check_array_bounds(*i, items.len()).map_err(|e| self.locate(e, loc))?;
                let peeked = items[idx].shallow_peek();
                if let Some(child) = peeked.ref_id() {
                    self.heap.inc_ref(child);
                }
                Ok(peeked)
            }
            HeapData::Dict(entries) => {
                let Some(key) = self.read_str(index) else {
                    return Err(self.error(ErrorKind::TypeError, "dict key must be a string", loc));
                };
                let Some(value) = entries.get(&key) else {
                    return Err(self.error(ErrorKind::KeyError, format!("missing key {key:?}"), loc));
                };
                let peeked = value.shallow_peek();
                if let Some(child) = peeked.ref_id() {
                    self.heap.inc_ref(child);
                }
                Ok(peeked)
            }
            HeapData::Str(s) => {
                let Value::Int(i) = index else {
                    return Err(self.error(ErrorKind::TypeError, "string index must be an int", loc));
                };
                let chars: Vec<char> = s.chars().collect();
                let idx = arith::check_array_bounds(*i, chars.len()).map_err(|e| self.locate(e, loc))?;
                let single = chars[idx].to_string();
                self.heap
                    .allocate(HeapData::Str(single))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
            _ => Err(self.error(ErrorKind::TypeError, "this value is not indexable", loc)),
        }
    }

    fn eval_member(&mut self, object: &ExprLoc, name: &str, env: EnvId, loc: CodeLoc) -> RunResult<Value> {
        // `Color.Red` where `Color` is an enum type rather than a binding.
        if let Expr::Name(type_name) = &object.expr
            && !self.envs.has(env, type_name)
            && let Some((enum_id, def)) = self.enums.get_by_name(type_name)
        {
            let Some(variant) = def.variant_index(name) else {
                return Err(self.error(
                    ErrorKind::UndefinedName,
                    format!("enum {type_name} has no variant {name}"),
                    loc,
                ));
            };
            return self
                .heap
                .allocate(HeapData::Enum {
                    def: enum_id,
                    variant,
                })
                .map(Value::Ref)
                .map_err(|e| self.locate(RunError::from(e), loc));
        }

        let object_value = self.eval_expr(object, env)?;
        let result = self.member_of_value(&object_value, name, loc);
        self.drop_val(object_value);
        result
    }

    fn member_of_value(&mut self, object: &Value, name: &str, loc: CodeLoc) -> RunResult<Value> {
        let Some(id) = object.ref_id() else {
            if matches!(object, Value::Null) {
                return Err(self.error(ErrorKind::NullAccess, format!("cannot read {name} on null"), loc));
            }
            return Err(self.error(ErrorKind::TypeError, format!("this value has no member {name}"), loc));
        };
        match self.heap.get(id) {
            HeapData::Module(module_env) => {
                let module_env = *module_env;
                if !self.loader.is_exported(module_env, name) {
                    return Err(self.error(
                        ErrorKind::UndefinedName,
                        format!("module has no export {name}"),
                        loc,
                    ));
                }
                let Some(peeked) = self.envs.lookup_local(module_env, name).map(Value::shallow_peek) else {
                    return Err(self.error(
                        ErrorKind::UndefinedName,
                        format!("module has no export {name}"),
                        loc,
                    ));
                };
                if let Some(child) = peeked.ref_id() {
                    self.heap.inc_ref(child);
                }
                Ok(peeked)
            }
            HeapData::Stdlib(module) => {
                let module = *module;
                match stdlib::member_kind(module, name) {
                    // Constants materialize eagerly.
                    Some(MemberKind::Constant) => self.dispatch_stdlib(module, name, &[], loc),
                    Some(MemberKind::Function) => {
                        let marker = stdlib::call_marker(module, name);
                        self.heap
                            .allocate(HeapData::Str(marker))
                            .map(Value::Ref)
                            .map_err(|e| self.locate(RunError::from(e), loc))
                    }
                    None => Err(self.error(
                        ErrorKind::UndefinedName,
                        format!("{module} has no member {name}"),
                        loc,
                    )),
                }
            }
            HeapData::Struct { def, fields } => {
                let def = self.structs.get(*def);
                let Some(index) = def.field_index(name) else {
                    return Err(self.error(
                        ErrorKind::TypeError,
                        format!("{} has no field {name}", def.name),
                        loc,
                    ));
                };
                let peeked = fields[index].shallow_peek();
                if let Some(child) = peeked.ref_id() {
                    self.heap.inc_ref(child);
                }
                Ok(peeked)
            }
            _ => Err(self.error(ErrorKind::TypeError, format!("this value has no member {name}"), loc)),
        }
    }

    fn eval_struct_lit(
        &mut self,
        module: Option<&str>,
        name: &str,
        type_args: &[TypeExpr],
        field_inits: &[(String, ExprLoc)],
        env: EnvId,
        loc: CodeLoc,
    ) -> RunResult<Value> {
        // Module prefixes only gate visibility: definitions are nominal and
        // live in the shared registry.
        if let Some(module_name) = module
            && let Some(peeked) = self.envs.lookup(env, module_name).map(Value::shallow_peek)
            && let Some(module_id) = peeked.ref_id()
            && let HeapData::Module(module_env) = self.heap.get(module_id)
            && !self.loader.is_exported(*module_env, name)
        {
            return Err(self.error(
                ErrorKind::UndefinedName,
                format!("module {module_name} does not export {name}"),
                loc,
            ));
        }

        let Some((base_id, base_def)) = self.structs.get_by_name(name) else {
            return Err(self.error(ErrorKind::UndefinedName, format!("unknown struct {name}"), loc));
        };

        // Evaluate initializers in source order, remembering each value's
        // runtime type for inference.
        let mut values: AHashMap<String, Value> = AHashMap::new();
        let mut value_types: AHashMap<String, TypeExpr> = AHashMap::new();
        for (field_name, init) in field_inits {
            match self.eval_rhs(init, env) {
                Ok(value) => {
                    let tag = type_tag(&value, &self.heap);
                    value_types.insert(
                        field_name.clone(),
                        TypeExpr::simple(tag.display(&self.structs, &self.enums)),
                    );
                    if let Some(old) = values.insert(field_name.clone(), value) {
                        self.drop_val(old);
                    }
                }
                Err(err) => {
                    for (_, value) in values {
                        self.drop_val(value);
                    }
                    return Err(err);
                }
            }
        }

        let cleanup = |interp: &mut Self, values: AHashMap<String, Value>| {
            for (_, value) in values {
                interp.drop_val(value);
            }
        };

        // Generic structs specialize (and register) before materialization.
        let (def_id, def): (crate::structs::StructId, Arc<StructDef>) = if base_def.type_params.is_empty() {
            (base_id, base_def)
        } else {
            let bindings = match generics::infer_struct_bindings(&base_def, type_args, &value_types) {
                Ok(bindings) => bindings,
                Err(err) => {
                    cleanup(self, values);
                    return Err(self.locate(err, loc));
                }
            };
            match generics::specialize_struct(&base_def, &bindings, &self.structs) {
                Ok(found) => found,
                Err(err) => {
                    cleanup(self, values);
                    return Err(self.locate(err, loc));
                }
            }
        };

        // Materialize fields in declaration order; reject missing or extra
        // initializers.
        let mut fields = Vec::with_capacity(def.fields.len());
        let mut values = values;
        for field in &def.fields {
            let Some(value) = values.remove(&field.name) else {
                for value in fields {
                    self.drop_val(value);
                }
                cleanup(self, values);
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("missing field {} in {} literal", field.name, def.name),
                    loc,
                ));
            };
            if let Err(err) = self.check_declared_type(&value, &field.ty, &field.name, loc) {
                self.drop_val(value);
                for value in fields {
                    self.drop_val(value);
                }
                cleanup(self, values);
                return Err(err);
            }
            fields.push(value);
        }
        if let Some(extra) = values.keys().next() {
            let msg = format!("{} has no field {extra}", def.name);
            for value in fields {
                self.drop_val(value);
            }
            cleanup(self, values);
            return Err(self.error(ErrorKind::TypeError, msg, loc));
        }

        self.heap
            .allocate(HeapData::Struct { def: def_id, fields })
            .map(Value::Ref)
            .map_err(|e| self.locate(RunError::from(e), loc))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_call(
        &mut self,
        callee: &ExprLoc,
        type_args: &[TypeExpr],
        args: &[ExprLoc],
        env: EnvId,
        loc: CodeLoc,
    ) -> RunResult<Value> {
        // Resolve a name callee through the environment first, then the
        // builtin table.
        if let Expr::Name(name) = &callee.expr
            && !self.envs.has(env, name)
        {
            if BUILTINS.contains(&name.as_str()) {
                let mut arg_values = self.eval_args(args, env)?;
                let result = self.call_builtin(name, &mut arg_values, loc);
                for value in arg_values {
                    self.drop_val(value);
                }
                return result;
            }
            return Err(self.undefined_name(name, env, loc));
        }

        let callee_value = self.eval_expr(callee, env)?;
        let arg_values = match self.eval_args(args, env) {
            Ok(values) => values,
            Err(err) => {
                self.drop_val(callee_value);
                return Err(err);
            }
        };
        let result = self.call_value(&callee_value, type_args, arg_values, loc);
        self.drop_val(callee_value);
        result
    }

    fn eval_args(&mut self, args: &[ExprLoc], env: EnvId) -> RunResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval_expr(arg, env) {
                Ok(value) => values.push(value),
                Err(err) => {
                    for value in values {
                        self.drop_val(value);
                    }
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    /// Calls a first-class value: a user function or a stdlib call marker.
    fn call_value(
        &mut self,
        callee: &Value,
        type_args: &[TypeExpr],
        args: Vec<Value>,
        loc: CodeLoc,
    ) -> RunResult<Value> {
        let Some(id) = callee.ref_id() else {
            for value in args {
                self.drop_val(value);
            }
            return Err(self.error(ErrorKind::TypeError, "this value is not callable", loc));
        };
        enum Target {
            Function { func: FunctionId, captured_env: EnvId },
            Stdlib(StdlibModule, String),
        }
        let target = match self.heap.get(id) {
            HeapData::Function { func, captured_env } => Target::Function {
                func: *func,
                captured_env: *captured_env,
            },
            HeapData::Str(s) => match stdlib::parse_call_marker(s) {
                Some((module, name)) => Target::Stdlib(module, name.to_owned()),
                None => {
                    for value in args {
                        self.drop_val(value);
                    }
                    return Err(self.error(ErrorKind::TypeError, "this value is not callable", loc));
                }
            },
            _ => {
                for value in args {
                    self.drop_val(value);
                }
                return Err(self.error(ErrorKind::TypeError, "this value is not callable", loc));
            }
        };

        match target {
            Target::Stdlib(module, name) => {
                let result = self.dispatch_stdlib(module, &name, &args, loc);
                for value in args {
                    self.drop_val(value);
                }
                result
            }
            Target::Function { func, captured_env } => self.call_function(func, captured_env, type_args, args, loc),
        }
    }

    fn dispatch_stdlib(
        &mut self,
        module: StdlibModule,
        name: &str,
        args: &[Value],
        loc: CodeLoc,
    ) -> RunResult<Value> {
        let mut ctx = StdlibCtx {
            heap: &mut self.heap,
            options: &self.options,
            audit: &self.audit,
            structs: &self.structs,
            enums: &self.enums,
        };
        stdlib::dispatch(module, name, args, &mut ctx).map_err(|err| self.locate(err, loc))
    }

    fn call_function(
        &mut self,
        func: FunctionId,
        captured_env: EnvId,
        type_args: &[TypeExpr],
        args: Vec<Value>,
        loc: CodeLoc,
    ) -> RunResult<Value> {
        let mut def = self.functions.get(func);

        // Generic functions specialize through the cache first.
        if def.is_generic() {
            let arg_types: Vec<TypeExpr> = args
                .iter()
                .map(|value| TypeExpr::simple(type_tag(value, &self.heap).display(&self.structs, &self.enums)))
                .collect();
            let bindings = match generics::infer_function_bindings(&def, type_args, &arg_types) {
                Ok(bindings) => bindings,
                Err(err) => {
                    for value in args {
                        self.drop_val(value);
                    }
                    return Err(self.locate(err, loc));
                }
            };
            let mangled = generics::mangle(&def.name, &def.type_params, &bindings);
            let specialized_id = match self.functions.specialization(&mangled) {
                Some(existing) => existing,
                None => {
                    let specialized = generics::specialize_function(&def, &bindings);
                    self.functions.register_specialization(mangled, specialized)
                }
            };
            def = self.functions.get(specialized_id);
        }

        if args.len() != def.params.len() {
            let msg = format!("{} takes {} argument(s), got {}", def.name, def.params.len(), args.len());
            for value in args {
                self.drop_val(value);
            }
            return Err(self.error(ErrorKind::TypeError, msg, loc));
        }

        // Depth and frame guards, before any binding work.
        if let Err(err) = self.heap.tracker().check_recursion_depth(self.call_depth) {
            for value in args {
                self.drop_val(value);
            }
            return Err(self.locate(RunError::from(err), loc));
        }
        if self.stack.len() >= MAX_STACK_FRAMES {
            for value in args {
                self.drop_val(value);
            }
            return Err(self.error(ErrorKind::StackOverflow, "call stack frame limit exceeded", loc));
        }

        let call_env = self.envs.new_frame(Some(captured_env));

        // Bind parameters: `ref` parameters alias the argument's value
        // reference; plain parameters receive a deep copy.
        let mut bind_error = None;
        for (param, arg) in def.params.iter().zip(args) {
            if bind_error.is_some() {
                self.drop_val(arg);
                continue;
            }
            let bound = if param.by_ref {
                arg
            } else {
                match deep_copy(&arg, &mut self.heap, 0) {
                    Ok(copy) => {
                        self.drop_val(arg);
                        copy
                    }
                    Err(err) => {
                        self.drop_val(arg);
                        bind_error = Some(err);
                        continue;
                    }
                }
            };
            if let Some(old) = self.envs.define(call_env, &param.name, bound) {
                self.drop_val(old);
            }
        }
        if let Some(err) = bind_error {
            self.release_env(call_env);
            return Err(self.locate(err, loc));
        }

        // Scoped frame: pushed here, popped on every exit path below.
        self.stack.push(Frame::new(
            def.name.clone(),
            self.current_file.clone(),
            loc.line,
            loc.column,
        ));
        self.env_stack.push(call_env);
        self.call_depth += 1;
        let saved_file = std::mem::replace(&mut self.current_file, def.file.clone());
        // Expression nesting restarts inside the callee; only the call-depth
        // guard spans call boundaries.
        let saved_expr_depth = self.expr_depth.get();
        self.expr_depth.set(0);

        let outcome = self.eval_block(&def.body, call_env);

        self.expr_depth.set(saved_expr_depth);
        self.current_file = saved_file;
        self.call_depth -= 1;
        self.env_stack.pop();
        self.stack.pop();
        self.release_env(call_env);

        match outcome {
            Ok(Exec::Return(value)) => Ok(value),
            Ok(Exec::Normal) => Ok(Value::Null),
            Ok(Exec::Break | Exec::Continue) => Err(self.error(
                ErrorKind::ControlFlowError,
                "break or continue escaped the function body",
                loc,
            )),
            Err(err) => Err(err),
        }
    }

    fn call_builtin(&mut self, name: &str, args: &mut Vec<Value>, loc: CodeLoc) -> RunResult<Value> {
        match name {
            "print" => {
                let mut first = true;
                for value in args.iter() {
                    let object = to_object(value, &self.heap, &self.structs, &self.enums, 0)?;
                    if !first {
                        self.print.stdout_push(' ');
                    }
                    self.print.stdout_write(object.to_string().into());
                    first = false;
                }
                self.print.stdout_push('\n');
                Ok(Value::Null)
            }
            "len" => {
                let [value] = args.as_slice() else {
                    return Err(self.error(ErrorKind::TypeError, "len takes 1 argument", loc));
                };
                let len = match value.ref_id().map(|id| self.heap.get(id)) {
                    Some(HeapData::Str(s)) => s.chars().count(),
                    Some(HeapData::List(items)) => items.len(),
                    Some(HeapData::Dict(entries)) => entries.len(),
                    _ => {
                        return Err(self.error(ErrorKind::TypeError, "len takes a string, list, or dict", loc));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            "push" => {
                if args.len() != 2 {
                    return Err(self.error(ErrorKind::TypeError, "push takes 2 arguments", loc));
                }
                let element = args.pop().expect("length checked");
                let target = &args[0];
                let Some(id) = target.ref_id() else {
                    self.drop_val(element);
                    return Err(self.error(ErrorKind::TypeError, "push takes a list", loc));
                };
                let HeapData::List(items) = self.heap.get(id) else {
                    self.drop_val(element);
                    return Err(self.error(ErrorKind::TypeError, "push takes a list", loc));
                };
                if let Err(err) = check_list_len(items.len() + 1) {
                    self.drop_val(element);
                    return Err(self.locate(err, loc));
                }
                let HeapData::List(items) = self.heap.get_mut(id) else {
                    unreachable!()
                };
                items.push(element);
                Ok(Value::Null)
            }
            "str" => {
                let [value] = args.as_slice() else {
                    return Err(self.error(ErrorKind::TypeError, "str takes 1 argument", loc));
                };
                let object = to_object(value, &self.heap, &self.structs, &self.enums, 0)?;
                self.heap
                    .allocate(HeapData::Str(object.to_string()))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
            "type_of" => {
                let [value] = args.as_slice() else {
                    return Err(self.error(ErrorKind::TypeError, "type_of takes 1 argument", loc));
                };
                let tag = type_tag(value, &self.heap).display(&self.structs, &self.enums);
                self.heap
                    .allocate(HeapData::Str(tag))
                    .map(Value::Ref)
                    .map_err(|e| self.locate(RunError::from(e), loc))
            }
            "gc_collect" => {
                let report = self.collect_now();
                Ok(Value::Int(report.collected_values as i64))
            }
            "mark_sensitive" => {
                if args.len() != 1 {
                    return Err(self.error(ErrorKind::TypeError, "mark_sensitive takes 1 argument", loc));
                }
                let value = args.pop().expect("length checked");
                if let Some(id) = value.ref_id() {
                    self.heap.set_sensitive(id);
                }
                Ok(value)
            }
            _ => Err(self.undefined_name(name, self.global_env, loc)),
        }
    }

    // ------------------------------------------------------------------
    // Polyglot dispatch
    // ------------------------------------------------------------------

    /// Executes a polyglot block, resolving its captures in `env`.
    pub(crate) fn run_polyglot(
        &mut self,
        block: &PolyglotBlock,
        env: EnvId,
        want_result: bool,
        loc: CodeLoc,
    ) -> RunResult<Option<Value>> {
        let mut captures = Vec::with_capacity(block.captures.len());
        let mut sensitive = false;
        for name in &block.captures {
            let Some(peeked) = self.envs.lookup(env, name).map(Value::shallow_peek) else {
                return Err(self.undefined_name(name, env, loc));
            };
            if let Some(id) = peeked.ref_id()
                && self.heap.is_sensitive(id)
            {
                sensitive = true;
            }
            let object = marshal::value_to_ffi_object(&peeked, &self.heap, &self.structs, &self.enums, 0)
                .map_err(|failure| {
                    self.audit.log(
                        AuditEventKind::FfiValidationFailure,
                        serde_json::json!({ "language": block.language, "capture": name }),
                    );
                    RunError::Exc(Box::new(
                        failure
                            .into_error(block.language)
                            .with_frames(self.frames_snapshot(loc)),
                    ))
                })?;
            captures.push((name.clone(), object));
        }

        let request = BlockRequest {
            language: block.language,
            block_id: Uuid::new_v4(),
            source: block.source.clone(),
            captures,
            sensitive,
            deadline: self.options.polyglot_deadline,
            grace: self.options.polyglot_grace,
        };

        match self.polyglot.run(&request, want_result, &self.audit) {
            Ok(Some(object)) => {
                let value = from_object(&object, &mut self.heap, &self.structs, &self.enums)?;
                Ok(Some(value))
            }
            Ok(None) => Ok(if want_result { Some(Value::Null) } else { None }),
            Err(error) => Err(RunError::Exc(Box::new(
                error.with_frames(self.frames_snapshot(loc)),
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Type validation
    // ------------------------------------------------------------------

    /// Runtime type check applied at `let`, assignment to declared
    /// variables, and struct-literal field initialization.
    fn check_declared_type(&mut self, value: &Value, ty: &TypeExpr, name: &str, loc: CodeLoc) -> RunResult<()> {
        if self.type_matches(value, ty) {
            return Ok(());
        }
        let actual = type_tag(value, &self.heap).display(&self.structs, &self.enums);
        Err(self.error(
            ErrorKind::TypeError,
            format!("{name}: expected {}, got {actual}", ty.display()),
            loc,
        ))
    }

    fn type_matches(&self, value: &Value, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Nullable(inner) => matches!(value, Value::Null) || self.type_matches(value, inner),
            TypeExpr::Union(members) => members.iter().any(|member| self.type_matches(value, member)),
            TypeExpr::Name { name, args } => {
                let tag = type_tag(value, &self.heap);
                // A dotted spelling (types.Config) matches on its final
                // segment; definitions are nominal and globally named.
                let name = name.rsplit('.').next().unwrap_or(name);
                match name {
                    "any" => true,
                    "null" => matches!(value, Value::Null),
                    "int" => matches!(tag, crate::value::TypeTag::Int),
                    "float" => matches!(tag, crate::value::TypeTag::Float),
                    "bool" => matches!(tag, crate::value::TypeTag::Bool),
                    "string" => matches!(tag, crate::value::TypeTag::Str),
                    "list" => matches!(tag, crate::value::TypeTag::List),
                    "dict" => matches!(tag, crate::value::TypeTag::Dict),
                    "function" => matches!(tag, crate::value::TypeTag::Function),
                    "block" => matches!(tag, crate::value::TypeTag::Block),
                    _ => match tag {
                        crate::value::TypeTag::Struct(id) => {
                            let def = self.structs.get(id);
                            if args.is_empty() {
                                def.name == name
                            } else {
                                // `Pair<int>` matches the specialization
                                // registered as `Pair_int`.
                                let mut expected = name.to_owned();
                                for arg in args {
                                    expected.push('_');
                                    expected.push_str(&arg.display());
                                }
                                def.name == expected
                            }
                        }
                        crate::value::TypeTag::Enum(id) => self.enums.get(id).name == name,
                        _ => false,
                    },
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn read_str(&self, value: &Value) -> Option<String> {
        match value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Captured stack, innermost frame first: the current position, then
    /// the active call sites outward. Errors crossing module boundaries
    /// keep every intervening frame because the stack spans them all.
    pub(crate) fn frames_snapshot(&self, loc: CodeLoc) -> Vec<Frame> {
        let current_function = self
            .stack
            .last()
            .map_or_else(|| "main".to_owned(), |frame| frame.function_name.clone());
        let mut frames = Vec::with_capacity(self.stack.len() + 1);
        frames.push(Frame::new(current_function, self.current_file.clone(), loc.line, loc.column));
        frames.extend(self.stack.iter().rev().cloned());
        frames
    }

    /// Builds a located error with the current stack attached.
    pub(crate) fn error(&self, kind: ErrorKind, message: impl Into<String>, loc: CodeLoc) -> RunError {
        RunError::Exc(Box::new(
            Error::new(kind, message).with_frames(self.frames_snapshot(loc)),
        ))
    }

    /// Attaches location and stack to an error raised by a helper that had
    /// no position in hand.
    pub(crate) fn locate(&self, err: RunError, loc: CodeLoc) -> RunError {
        match err {
            RunError::Exc(inner) => {
                let inner = if inner.frames().is_empty() {
                    inner.with_frames(self.frames_snapshot(loc))
                } else {
                    *inner
                };
                RunError::Exc(Box::new(inner))
            }
            internal => internal,
        }
    }

    fn undefined_name(&self, name: &str, env: EnvId, loc: CodeLoc) -> RunError {
        let mut candidates = self.envs.all_names(env);
        candidates.extend(BUILTINS.iter().map(|s| (*s).to_owned()));
        let suggestion = closest_name(name, &candidates);
        let message = match suggestion {
            Some(candidate) => format!("{name} is not defined; did you mean {candidate}?"),
            None => format!("{name} is not defined"),
        };
        self.error(ErrorKind::UndefinedName, message, loc)
    }
}

/// Whether a catch clause restricted to `kind_label` matches `kind`.
fn catch_matches(kind_label: Option<&str>, kind: ErrorKind) -> bool {
    match kind_label {
        None => true,
        Some(label) => ErrorKind::from_str(label).is_ok_and(|wanted| wanted == kind),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

/// Nearest name by edit distance (≤ 2), for "did you mean" diagnostics.
fn closest_name(target: &str, candidates: &[String]) -> Option<String> {
    let mut best: Option<(usize, &String)> = None;
    for candidate in candidates {
        let distance = edit_distance(target, candidate);
        if distance <= 2 && best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, name)| name.clone())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("count", "cont"), 1);
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("abc", "xyz"), 3);
    }

    #[test]
    fn catch_matching_by_label() {
        assert!(catch_matches(None, ErrorKind::TypeError));
        assert!(catch_matches(Some("TypeError"), ErrorKind::TypeError));
        assert!(!catch_matches(Some("KeyError"), ErrorKind::TypeError));
        assert!(!catch_matches(Some("NotAKind"), ErrorKind::TypeError));
    }
}
