//! Polyglot execution: validation before dispatch, timeouts, capture
//! round-trips, and the worker-thread wrapper.
//!
//! Tests that need a foreign toolchain probe for it first and return early
//! when it is absent; validation and timeout behavior only need `sh`.

mod common;

use std::time::{Duration, Instant};

use common::{interp_with_output, lets, print1};
use naab::{
    ErrorKind, InterpOptions, LanguageId, Object,
    ast::{Expr, PolyglotBlock, Program, Stmt},
};
use pretty_assertions::assert_eq;

fn block(language: LanguageId, source: &str, captures: &[&str]) -> Expr {
    Expr::Block(PolyglotBlock {
        language,
        source: source.to_owned(),
        captures: captures.iter().map(|s| (*s).to_owned()).collect(),
    })
}

fn toolchain_available(command: &str) -> bool {
    std::process::Command::new(command)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

#[test]
fn nan_capture_fails_validation_before_any_foreign_code_runs() {
    // let x = NaN ; let y = <<python[x] ...>> — rejected even where no
    // python toolchain exists, because validation precedes dispatch.
    let program = Program::new("poly.naab").with_main(vec![
        lets("x", Expr::float(f64::NAN)).at(2, 3),
        lets("y", block(LanguageId::Python, "return x", &["x"])).at(3, 3),
    ]);
    let mut run = interp_with_output(InterpOptions::default());
    let err = run.interp.run_program(&program, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolyglotError);
    assert!(err.message().contains("validation"), "message: {}", err.message());

    let audited = run
        .interp
        .audit()
        .recent()
        .iter()
        .any(|r| r.event_kind == naab::AuditEventKind::FfiValidationFailure);
    assert!(audited);
}

#[test]
fn null_byte_and_deep_nesting_fail_validation() {
    let nul = Program::new("poly.naab").with_main(vec![
        lets("s", Expr::str("a\0b")).at(2, 3),
        lets("y", block(LanguageId::Shell, "echo hi", &["s"])).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    assert_eq!(interp.run_program(&nul, "").unwrap_err().kind(), ErrorKind::PolyglotError);

    // 101 nested lists
    let mut nested = Expr::int(0);
    for _ in 0..101 {
        nested = Expr::ListLit(vec![nested.at(2, 12)]);
    }
    let deep = Program::new("poly.naab").with_main(vec![
        lets("deep", nested).at(2, 3),
        lets("y", block(LanguageId::Shell, "echo hi", &["deep"])).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    assert_eq!(interp.run_program(&deep, "").unwrap_err().kind(), ErrorKind::PolyglotError);
}

#[test]
fn callables_are_rejected_at_the_boundary() {
    let program = Program::new("poly.naab")
        .with_decl(naab::ast::Decl::Function(naab::ast::FunctionDecl {
            name: "f".to_owned(),
            type_params: vec![],
            params: vec![],
            ret: None,
            body: std::sync::Arc::new(vec![Stmt::Return(Some(Expr::int(1).at(1, 25))).at(1, 18)]),
            loc: naab::ast::CodeLoc::new(1, 1),
        }))
        .with_main(vec![lets("y", block(LanguageId::Shell, "echo hi", &["f"])).at(3, 3)]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    let err = interp.run_program(&program, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolyglotError);
}

#[test]
fn shell_round_trip_with_captured_variable() {
    // let x = 21 ; let y = <<shell[x] echo $((x * 2))>> ; print(y)
    let program = Program::new("poly.naab").with_main(vec![
        lets("x", Expr::int(21)).at(2, 3),
        lets("y", block(LanguageId::Shell, "echo $((x * 2))", &["x"])).at(3, 3),
        print1(Expr::name("y")).at(4, 3),
    ]);
    let mut run = interp_with_output(InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["42"]);
}

#[test]
fn python_round_trip_with_captured_variable() {
    if cfg!(not(feature = "python-embed")) && !toolchain_available("python3") {
        eprintln!("skipping: python3 not installed");
        return;
    }
    // let x = 21 ; let y = <<python[x] return x * 2>> ; print(y)
    let program = Program::new("poly.naab").with_main(vec![
        lets("x", Expr::int(21)).at(2, 3),
        lets("y", block(LanguageId::Python, "return x * 2", &["x"])).at(3, 3),
        print1(Expr::name("y")).at(4, 3),
    ]);
    let mut run = interp_with_output(InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["42"]);
}

#[test]
fn python_lists_and_dicts_parse_into_containers() {
    if cfg!(not(feature = "python-embed")) && !toolchain_available("python3") {
        eprintln!("skipping: python3 not installed");
        return;
    }
    let program = Program::new("poly.naab").with_main(vec![
        lets("y", block(LanguageId::Python, "return [1, {\"k\": True}]", &[])).at(2, 3),
        Stmt::Return(Some(Expr::name("y").at(3, 10))).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    let result = interp.run_program(&program, "").unwrap();
    let Object::List(items) = result else {
        panic!("expected a list, got {result:?}");
    };
    assert_eq!(items[0], Object::Int(1));
    let Object::Dict(entries) = &items[1] else {
        panic!("expected a dict, got {:?}", items[1]);
    };
    assert_eq!(entries.get("k"), Some(&Object::Bool(true)));
}

#[test]
fn deadline_kills_a_sleeping_block() {
    // A block sleeping well past the deadline fails with PolyglotTimeout
    // within deadline + grace (plus scheduling slack).
    let options = InterpOptions {
        polyglot_deadline: Duration::from_millis(300),
        polyglot_grace: Duration::from_millis(100),
        ..InterpOptions::default()
    };
    let program = Program::new("poly.naab").with_main(vec![
        lets("y", block(LanguageId::Shell, "sleep 10", &[])).at(2, 3),
    ]);
    let mut run = interp_with_output(options);
    let started = Instant::now();
    let err = run.interp.run_program(&program, "").unwrap_err();
    let elapsed = started.elapsed();
    assert_eq!(err.kind(), ErrorKind::PolyglotTimeout);
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let audited = run
        .interp
        .audit()
        .recent()
        .iter()
        .any(|r| r.event_kind == naab::AuditEventKind::PolyglotTimeout);
    assert!(audited);
}

#[test]
fn failing_block_classifies_as_runtime_error() {
    let program = Program::new("poly.naab").with_main(vec![
        lets("y", block(LanguageId::Shell, "exit 3", &[])).at(2, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    let err = interp.run_program(&program, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolyglotError);
    assert!(err.message().contains("runtime"), "message: {}", err.message());
}

#[test]
fn side_effect_block_statement_returns_nothing() {
    // A bare block statement runs for effect; stdout is not parsed.
    let program = Program::new("poly.naab").with_main(vec![
        Stmt::Expr(block(LanguageId::Shell, "true", &[]).at(2, 3)).at(2, 3),
        Stmt::Return(Some(Expr::int(1).at(3, 10))).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(1));
}

#[test]
fn block_handle_is_a_first_class_value() {
    // Outside binding position the block evaluates to a handle.
    let program = Program::new("poly.naab").with_main(vec![
        lets("xs", Expr::ListLit(vec![block(LanguageId::Ruby, "puts 1", &[]).at(2, 13)])).at(2, 3),
        Stmt::Return(Some(common::call("len", vec![Expr::name("xs").at(3, 14)]).at(3, 10))).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(1));
}

// Worker-thread wrapper ------------------------------------------------

#[test]
fn futures_wait_cancel_and_measure() {
    let pool = naab::WorkerPool::new(2);
    let future = naab::spawn(&pool, |_| 6 * 7);
    assert_eq!(future.wait(), Ok(42));

    let slow = naab::spawn(&pool, |token: &naab::CancelToken| {
        for _ in 0..100 {
            if token.is_cancelled() {
                return "stopped";
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        "finished"
    });
    slow.cancel();
    // Cooperative cancellation: the task observes the flag and stops early.
    assert_eq!(slow.wait(), Ok("stopped"));
}

#[test]
fn parallel_fan_out_and_retry() {
    let pool = naab::WorkerPool::new(4);
    let tasks: Vec<_> = (0..6).map(|i| move |_: &naab::CancelToken| i).collect();
    let results: Vec<_> = naab::run_parallel(&pool, tasks)
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);

    let mut attempts = 0;
    let outcome: Result<&str, &str> = naab::retry_with_backoff(3, Duration::from_millis(1), |_| {
        attempts += 1;
        if attempts < 2 { Err("not yet") } else { Ok("ok") }
    });
    assert_eq!(outcome, Ok("ok"));
}
