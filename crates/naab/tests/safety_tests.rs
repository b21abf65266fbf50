//! Safety-layer behavior visible through the public surface: input caps,
//! sanitized reporting, the guarded regex module, and audit-log integrity.

mod common;

use common::{interp_with_output, lets, print1};
use naab::{
    ErrorKind, InterpOptions, SanitizeMode,
    ast::{CodeLoc, Decl, Expr, Program, Stmt, UseDecl},
};
use pretty_assertions::assert_eq;

fn use_decl(name: &str) -> Decl {
    Decl::Use(UseDecl {
        path: vec![name.to_owned()],
        alias: None,
        loc: CodeLoc::new(1, 1),
    })
}

#[test]
fn oversized_source_lines_are_rejected() {
    let long_line = "x".repeat(10_001);
    let program = Program::new("big.naab").with_main(vec![]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    let err = interp.run_program(&program, &long_line).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
}

#[test]
fn production_mode_scrubs_paths_and_secrets_from_reports() {
    let program = Program::new("safe.naab").with_main(vec![
        Stmt::Throw(Expr::str("leak /srv/deploy/secrets.txt password=hunter2 at 0xdeadbeef").at(2, 9)).at(2, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions {
        sanitize_mode: SanitizeMode::Production,
        ..InterpOptions::default()
    });
    let err = interp.run_program(&program, "").unwrap_err();
    let report = interp.format_uncaught(&err);
    assert!(!report.contains("/srv/deploy"), "report: {report}");
    assert!(!report.contains("hunter2"), "report: {report}");
    assert!(report.contains("<address>"), "report: {report}");
    // The trace is present, most recent call first.
    assert!(report.contains("at main"), "report: {report}");
}

#[test]
fn development_mode_keeps_full_detail() {
    let program = Program::new("safe.naab").with_main(vec![
        Stmt::Throw(Expr::str("leak /srv/deploy/secrets.txt").at(2, 9)).at(2, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions {
        sanitize_mode: SanitizeMode::Development,
        ..InterpOptions::default()
    });
    let err = interp.run_program(&program, "").unwrap_err();
    let report = interp.format_uncaught(&err);
    assert!(report.contains("/srv/deploy/secrets.txt"), "report: {report}");
}

#[test]
fn redos_prone_patterns_are_rejected_through_the_regex_module() {
    // use regex ; regex.is_match("(a+)+$", input) -> RegexComplexity
    let program = Program::new("safe.naab")
        .with_decl(use_decl("regex"))
        .with_main(vec![
            Stmt::Expr(
                Expr::Call {
                    callee: Box::new(common::member(Expr::name("regex"), "is_match").at(3, 9)),
                    type_args: vec![],
                    args: vec![Expr::str("(a+)+b").at(3, 24), Expr::str("aaaa").at(3, 34)],
                }
                .at(3, 3),
            )
            .at(3, 3),
        ]);
    let mut run = interp_with_output(InterpOptions::default());
    let err = run.interp.run_program(&program, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RegexComplexity);

    let audited = run
        .interp
        .audit()
        .recent()
        .iter()
        .any(|r| r.event_kind == naab::AuditEventKind::RegexRejected);
    assert!(audited);
}

#[test]
fn benign_patterns_run_through_the_guard() {
    let program = Program::new("safe.naab")
        .with_decl(use_decl("regex"))
        .with_main(vec![
            print1(Expr::Call {
                callee: Box::new(common::member(Expr::name("regex"), "is_match").at(3, 9)),
                type_args: vec![],
                args: vec![Expr::str(r"\d+").at(3, 24), Expr::str("abc123").at(3, 32)],
            })
            .at(3, 3),
        ]);
    let mut run = interp_with_output(InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["true"]);
}

#[test]
fn audit_chain_on_disk_verifies_and_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.jsonl");

    // Drive a few audited events through a real interpreter run.
    let program = Program::new("safe.naab")
        .with_decl(use_decl("io"))
        .with_main(vec![
            common::try_catch(
                vec![
                    lets(
                        "s",
                        Expr::Call {
                            callee: Box::new(common::member(Expr::name("io"), "read_file").at(3, 13)),
                            type_args: vec![],
                            args: vec![Expr::str("../../etc/passwd").at(3, 26)],
                        },
                    )
                    .at(3, 9),
                ],
                "e",
                vec![],
            )
            .at(3, 3),
        ]);
    let base = tempfile::tempdir().unwrap();
    let mut interp = naab::Interp::new(InterpOptions {
        audit_log_path: Some(log_path.clone()),
        base_dirs: vec![base.path().to_path_buf()],
        ..InterpOptions::default()
    });
    interp.run_program(&program, "").unwrap();
    drop(interp);

    let verified = naab::verify_audit_log(&log_path, None).unwrap();
    assert!(verified.intact_records >= 1);
    assert!(verified.first_corruption.is_none());

    // Flip one byte: the prefix before the flip stays trustworthy.
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let tampered = contents.replacen("path", "hsap", 1);
    std::fs::write(&log_path, tampered).unwrap();
    let verified = naab::verify_audit_log(&log_path, None).unwrap();
    assert!(verified.first_corruption.is_some());
}

#[test]
fn marked_sensitive_values_still_flow_through_programs() {
    // mark_sensitive returns its argument; the flag only affects FFI
    // payload hygiene.
    let program = Program::new("safe.naab").with_main(vec![
        lets("secret", common::call("mark_sensitive", vec![Expr::str("token-abc").at(2, 30)])).at(2, 3),
        Stmt::Return(Some(common::call("len", vec![Expr::name("secret").at(3, 14)]).at(3, 10))).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), naab::Object::Int(9));
}
