//! Shared helpers for the integration suite: an interpreter wired to a
//! collecting print writer, AST construction shortcuts, and a canned-module
//! parser standing in for the external NAAb parser.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use naab::{
    CollectStringPrint, Error, Interp, InterpOptions, ModuleParser, Object,
    ast::{Expr, ExprLoc, Program, Stmt, StmtLoc},
};

/// An interpreter plus a handle on everything it printed.
pub struct TestRun {
    pub interp: Interp,
    pub output: CollectStringPrint,
}

pub fn interp_with_output(options: InterpOptions) -> TestRun {
    let output = CollectStringPrint::new();
    let mut interp = Interp::new(options);
    interp.set_print(Box::new(output.handle()));
    TestRun { interp, output }
}

/// Runs a `main { ... }` program under default options.
pub fn run_main(stmts: Vec<StmtLoc>) -> (Result<Object, Error>, Vec<String>) {
    run_main_with(InterpOptions::default(), stmts)
}

pub fn run_main_with(options: InterpOptions, stmts: Vec<StmtLoc>) -> (Result<Object, Error>, Vec<String>) {
    let mut run = interp_with_output(options);
    let program = Program::new("test.naab").with_main(stmts);
    let result = run.interp.run_program(&program, "");
    (result, run.output.lines())
}

// AST shorthand ---------------------------------------------------------

pub fn call(name: &str, args: Vec<ExprLoc>) -> Expr {
    Expr::Call {
        callee: Box::new(Expr::name(name).at(1, 1)),
        type_args: Vec::new(),
        args,
    }
}

pub fn print1(arg: Expr) -> Stmt {
    Stmt::Expr(call("print", vec![arg.at(1, 7)]).at(1, 1))
}

pub fn lets(name: &str, init: Expr) -> Stmt {
    Stmt::Let {
        name: name.to_owned(),
        ty: None,
        init: Some(init.at(1, 9)),
    }
}

pub fn binary(op: naab::ast::BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left.at(1, 1)),
        right: Box::new(right.at(1, 5)),
    }
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::Member {
        object: Box::new(object.at(1, 1)),
        name: name.to_owned(),
    }
}

pub fn index(object: Expr, idx: Expr) -> Expr {
    Expr::Index {
        object: Box::new(object.at(1, 1)),
        index: Box::new(idx.at(1, 5)),
    }
}

/// `try { body } catch (e) { handler }`
pub fn try_catch(body: Vec<StmtLoc>, bind: &str, handler: Vec<StmtLoc>) -> Stmt {
    Stmt::Try {
        body,
        catch: Some(naab::ast::CatchClause {
            name: bind.to_owned(),
            kind: None,
            body: handler,
        }),
        finally: None,
    }
}

// Canned-module parser --------------------------------------------------

/// Stands in for the external parser: returns pre-built programs keyed by
/// file name and counts how often each module was parsed (that is, loaded).
#[derive(Debug)]
pub struct MapParser {
    programs: HashMap<String, Program>,
    parse_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl MapParser {
    pub fn new(programs: HashMap<String, Program>) -> Self {
        Self {
            programs,
            parse_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn counts_handle(&self) -> Arc<Mutex<HashMap<String, usize>>> {
        Arc::clone(&self.parse_counts)
    }
}

impl ModuleParser for MapParser {
    fn parse_module(&self, _source: &str, path: &Path) -> Result<Program, Error> {
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        *self.parse_counts.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        let mut program = self
            .programs
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::new(naab::ErrorKind::ParseError, format!("no canned module {key}")))?;
        program.file = path.display().to_string();
        Ok(program)
    }
}
