//! Evaluator behavior: operators, control flow, parameter passing, error
//! propagation, and the scenario programs that exercise them end to end.

mod common;

use common::{binary, call, index, lets, print1, run_main, try_catch};
use naab::{
    ErrorKind, Object,
    ast::{BinOp, CatchClause, Expr, Param, Program, Stmt, TypeExpr, UnOp},
};
use pretty_assertions::assert_eq;

#[test]
fn arithmetic_and_precedence_free_tree() {
    let (result, _) = run_main(vec![
        Stmt::Return(Some(
            binary(BinOp::Add, Expr::int(40), binary(BinOp::Mul, Expr::int(1), Expr::int(2))).at(1, 1),
        ))
        .at(1, 1),
    ]);
    assert_eq!(result.unwrap(), Object::Int(42));
}

#[test]
fn integer_overflow_is_caught_not_wrapped() {
    // let m = INT64_MAX ; try { let n = m + 1 ; print(n) } catch (e) { print("overflow") }
    let (result, lines) = run_main(vec![
        lets("m", Expr::int(i64::MAX)).at(2, 1),
        try_catch(
            vec![
                lets("n", binary(BinOp::Add, Expr::name("m"), Expr::int(1))).at(3, 9),
                print1(Expr::name("n")).at(3, 25),
            ],
            "e",
            vec![print1(Expr::str("overflow")).at(4, 15)],
        )
        .at(3, 3),
    ]);
    result.unwrap();
    assert_eq!(lines, vec!["overflow"]);
}

#[test]
fn division_by_zero_has_its_own_kind() {
    let (result, _) = run_main(vec![
        Stmt::Expr(binary(BinOp::Div, Expr::int(1), Expr::int(0)).at(1, 1)).at(1, 1),
    ]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::DivisionByZero);
}

#[test]
fn negation_round_trips() {
    let neg = |e: Expr| Expr::Unary {
        op: UnOp::Neg,
        operand: Box::new(e.at(1, 1)),
    };
    let (result, _) = run_main(vec![Stmt::Return(Some(neg(neg(Expr::int(7))).at(1, 1))).at(1, 1)]);
    assert_eq!(result.unwrap(), Object::Int(7));
}

#[test]
fn list_bounds_are_checked_both_ways() {
    for bad_index in [-1, 3] {
        let (result, _) = run_main(vec![
            lets("xs", Expr::ListLit(vec![Expr::int(1).at(1, 1), Expr::int(2).at(1, 4), Expr::int(3).at(1, 7)]))
                .at(1, 1),
            Stmt::Expr(index(Expr::name("xs"), Expr::int(bad_index)).at(2, 1)).at(2, 1),
        ]);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::IndexError, "index {bad_index}");
    }
}

#[test]
fn missing_dict_key_raises_key_error() {
    let (result, _) = run_main(vec![
        lets(
            "d",
            Expr::DictLit(vec![(Expr::str("a").at(1, 1), Expr::int(1).at(1, 6))]),
        )
        .at(1, 1),
        Stmt::Expr(index(Expr::name("d"), Expr::str("missing")).at(2, 1)).at(2, 1),
    ]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::KeyError);
}

#[test]
fn while_loop_with_break_and_continue() {
    // i = 0; total = 0; while true { i = i + 1; if i > 5 { break }
    //   if i % 2 == 0 { continue } ; total = total + i } ; return total
    let assign = |name: &str, e: Expr| Stmt::Assign {
        target: naab::ast::AssignTarget::Name(name.to_owned()),
        value: e.at(1, 1),
    };
    let (result, _) = run_main(vec![
        lets("i", Expr::int(0)).at(1, 1),
        lets("total", Expr::int(0)).at(2, 1),
        Stmt::While {
            cond: Expr::bool(true).at(3, 7),
            body: vec![
                assign("i", binary(BinOp::Add, Expr::name("i"), Expr::int(1))).at(4, 3),
                Stmt::If {
                    cond: binary(BinOp::Gt, Expr::name("i"), Expr::int(5)).at(5, 6),
                    then_body: vec![Stmt::Break.at(5, 14)],
                    else_body: None,
                }
                .at(5, 3),
                Stmt::If {
                    cond: binary(
                        BinOp::Eq,
                        binary(BinOp::Rem, Expr::name("i"), Expr::int(2)),
                        Expr::int(0),
                    )
                    .at(6, 6),
                    then_body: vec![Stmt::Continue.at(6, 20)],
                    else_body: None,
                }
                .at(6, 3),
                assign("total", binary(BinOp::Add, Expr::name("total"), Expr::name("i"))).at(7, 3),
            ],
        }
        .at(3, 1),
        Stmt::Return(Some(Expr::name("total").at(8, 10))).at(8, 1),
    ]);
    // 1 + 3 + 5
    assert_eq!(result.unwrap(), Object::Int(9));
}

#[test]
fn range_iteration_is_half_open() {
    // total = 0 ; for i in 0..5 { total = total + i } ; return total
    let (result, _) = run_main(vec![
        lets("total", Expr::int(0)).at(1, 1),
        Stmt::For {
            bindings: vec!["i".to_owned()],
            iter: Expr::Range {
                start: Box::new(Expr::int(0).at(2, 10)),
                end: Box::new(Expr::int(5).at(2, 13)),
            }
            .at(2, 10),
            body: vec![
                Stmt::Assign {
                    target: naab::ast::AssignTarget::Name("total".to_owned()),
                    value: binary(BinOp::Add, Expr::name("total"), Expr::name("i")).at(3, 11),
                }
                .at(3, 3),
            ],
        }
        .at(2, 1),
        Stmt::Return(Some(Expr::name("total").at(4, 10))).at(4, 1),
    ]);
    assert_eq!(result.unwrap(), Object::Int(10));
}

#[test]
fn dict_iteration_yields_pairs_in_insertion_order() {
    let (result, lines) = run_main(vec![
        lets(
            "d",
            Expr::DictLit(vec![
                (Expr::str("b").at(1, 1), Expr::int(2).at(1, 6)),
                (Expr::str("a").at(1, 10), Expr::int(1).at(1, 15)),
            ]),
        )
        .at(1, 1),
        Stmt::For {
            bindings: vec!["k".to_owned(), "v".to_owned()],
            iter: Expr::name("d").at(2, 13),
            body: vec![Stmt::Expr(
                call("print", vec![Expr::name("k").at(3, 9), Expr::name("v").at(3, 12)]).at(3, 3),
            )
            .at(3, 3)],
        }
        .at(2, 1),
    ]);
    result.unwrap();
    assert_eq!(lines, vec!["b 2", "a 1"]);
}

#[test]
fn pipeline_desugars_to_a_call() {
    let program = Program::new("test.naab")
        .with_decl(naab::ast::Decl::Function(naab::ast::FunctionDecl {
            name: "double".to_owned(),
            type_params: vec![],
            params: vec![Param::new("x", Some(TypeExpr::simple("int")))],
            ret: Some(TypeExpr::simple("int")),
            body: std::sync::Arc::new(vec![
                Stmt::Return(Some(binary(BinOp::Mul, Expr::name("x"), Expr::int(2)).at(2, 10))).at(2, 3),
            ]),
            loc: naab::ast::CodeLoc::new(1, 1),
        }))
        .with_main(vec![Stmt::Return(Some(
            Expr::Pipeline {
                value: Box::new(Expr::int(21).at(5, 10)),
                func: Box::new(Expr::name("double").at(5, 17)),
            }
            .at(5, 10),
        ))
        .at(5, 3)]);
    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(42));
}

fn with_function(decl: naab::ast::FunctionDecl, main: Vec<naab::ast::StmtLoc>) -> (Result<Object, naab::Error>, Vec<String>) {
    with_function_opts(naab::InterpOptions::default(), decl, main)
}

fn with_function_opts(
    options: naab::InterpOptions,
    decl: naab::ast::FunctionDecl,
    main: Vec<naab::ast::StmtLoc>,
) -> (Result<Object, naab::Error>, Vec<String>) {
    let output = naab::CollectStringPrint::new();
    let mut interp = naab::Interp::new(options);
    interp.set_print(Box::new(output.handle()));
    let program = Program::new("test.naab")
        .with_decl(naab::ast::Decl::Function(decl))
        .with_main(main);
    let result = interp.run_program(&program, "");
    (result, output.lines())
}

/// Options with a call-depth limit small enough to exercise the guard
/// without stressing the host thread's stack.
fn shallow_call_depth() -> naab::InterpOptions {
    naab::InterpOptions {
        limits: naab::ResourceLimits {
            max_call_depth: 200,
            ..naab::ResourceLimits::default()
        },
        ..naab::InterpOptions::default()
    }
}

#[test]
fn value_parameters_receive_a_deep_copy() {
    // function f(xs) { push(xs, 99) } ; xs = [1] ; f(xs) ; return len(xs)
    let decl = naab::ast::FunctionDecl {
        name: "f".to_owned(),
        type_params: vec![],
        params: vec![Param::new("xs", Some(TypeExpr::simple("list")))],
        ret: None,
        body: std::sync::Arc::new(vec![Stmt::Expr(
            call("push", vec![Expr::name("xs").at(2, 8), Expr::int(99).at(2, 12)]).at(2, 3),
        )
        .at(2, 3)]),
        loc: naab::ast::CodeLoc::new(1, 1),
    };
    let (result, _) = with_function(
        decl,
        vec![
            lets("xs", Expr::ListLit(vec![Expr::int(1).at(5, 13)])).at(5, 3),
            Stmt::Expr(call("f", vec![Expr::name("xs").at(6, 5)]).at(6, 3)).at(6, 3),
            Stmt::Return(Some(call("len", vec![Expr::name("xs").at(7, 14)]).at(7, 10))).at(7, 3),
        ],
    );
    assert_eq!(result.unwrap(), Object::Int(1));
}

#[test]
fn ref_parameters_alias_the_argument() {
    let decl = naab::ast::FunctionDecl {
        name: "g".to_owned(),
        type_params: vec![],
        params: vec![Param::by_ref("xs", Some(TypeExpr::simple("list")))],
        ret: None,
        body: std::sync::Arc::new(vec![Stmt::Expr(
            call("push", vec![Expr::name("xs").at(2, 8), Expr::int(99).at(2, 12)]).at(2, 3),
        )
        .at(2, 3)]),
        loc: naab::ast::CodeLoc::new(1, 1),
    };
    let (result, _) = with_function(
        decl,
        vec![
            lets("xs", Expr::ListLit(vec![Expr::int(1).at(5, 13)])).at(5, 3),
            Stmt::Expr(call("g", vec![Expr::name("xs").at(6, 5)]).at(6, 3)).at(6, 3),
            Stmt::Return(Some(call("len", vec![Expr::name("xs").at(7, 14)]).at(7, 10))).at(7, 3),
        ],
    );
    assert_eq!(result.unwrap(), Object::Int(2));
}

#[test]
fn unbounded_recursion_raises_stack_overflow_and_unwinds() {
    // function r() { return r() } ; try { r() } catch (e) { print("caught") }
    let decl = naab::ast::FunctionDecl {
        name: "r".to_owned(),
        type_params: vec![],
        params: vec![],
        ret: None,
        body: std::sync::Arc::new(vec![Stmt::Return(Some(call("r", vec![]).at(2, 10))).at(2, 3)]),
        loc: naab::ast::CodeLoc::new(1, 1),
    };
    let (result, lines) = with_function_opts(
        shallow_call_depth(),
        decl,
        vec![
            try_catch(
                vec![Stmt::Expr(call("r", vec![]).at(5, 9)).at(5, 9)],
                "e",
                vec![print1(Expr::str("caught")).at(6, 15)],
            )
            .at(5, 3),
            Stmt::Return(Some(Expr::str("done").at(7, 10))).at(7, 3),
        ],
    );
    assert_eq!(result.unwrap(), Object::Str("done".to_owned()));
    assert_eq!(lines, vec!["caught"]);
}

#[test]
fn stack_overflow_error_carries_the_kind() {
    let decl = naab::ast::FunctionDecl {
        name: "r".to_owned(),
        type_params: vec![],
        params: vec![],
        ret: None,
        body: std::sync::Arc::new(vec![Stmt::Return(Some(call("r", vec![]).at(2, 10))).at(2, 3)]),
        loc: naab::ast::CodeLoc::new(1, 1),
    };
    let (result, _) = with_function_opts(
        shallow_call_depth(),
        decl,
        vec![Stmt::Expr(call("r", vec![]).at(5, 3)).at(5, 3)],
    );
    assert_eq!(result.unwrap_err().kind(), ErrorKind::StackOverflow);
}

#[test]
fn finally_runs_on_every_exit_path() {
    // normal completion
    let (result, lines) = run_main(vec![
        Stmt::Try {
            body: vec![print1(Expr::str("body")).at(2, 5)],
            catch: None,
            finally: Some(vec![print1(Expr::str("finally")).at(3, 15)]),
        }
        .at(2, 3),
    ]);
    result.unwrap();
    assert_eq!(lines, vec!["body", "finally"]);

    // explicit return still runs finally, and the return value survives
    let (result, lines) = run_main(vec![
        Stmt::Try {
            body: vec![Stmt::Return(Some(Expr::int(5).at(2, 12))).at(2, 5)],
            catch: None,
            finally: Some(vec![print1(Expr::str("finally")).at(3, 15)]),
        }
        .at(2, 3),
    ]);
    assert_eq!(result.unwrap(), Object::Int(5));
    assert_eq!(lines, vec!["finally"]);

    // a thrown error runs finally before propagating
    let (result, lines) = run_main(vec![
        Stmt::Try {
            body: vec![Stmt::Throw(Expr::str("boom").at(2, 11)).at(2, 5)],
            catch: None,
            finally: Some(vec![print1(Expr::str("finally")).at(3, 15)]),
        }
        .at(2, 3),
    ]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::UserError);
    assert_eq!(lines, vec!["finally"]);
}

#[test]
fn finally_status_supersedes_the_pending_one() {
    let (result, _) = run_main(vec![
        Stmt::Try {
            body: vec![Stmt::Return(Some(Expr::int(1).at(2, 12))).at(2, 5)],
            catch: None,
            finally: Some(vec![Stmt::Return(Some(Expr::int(2).at(3, 22))).at(3, 15)]),
        }
        .at(2, 3),
    ]);
    assert_eq!(result.unwrap(), Object::Int(2));
}

#[test]
fn catch_binds_the_thrown_value_verbatim() {
    let (result, lines) = run_main(vec![
        try_catch(
            vec![Stmt::Throw(Expr::str("boom").at(2, 11)).at(2, 5)],
            "e",
            vec![print1(Expr::name("e")).at(3, 15)],
        )
        .at(2, 3),
    ]);
    result.unwrap();
    assert_eq!(lines, vec!["boom"]);
}

#[test]
fn catch_can_match_on_the_kind_label() {
    // catch (e: DivisionByZero) only matches that kind
    let matching = Stmt::Try {
        body: vec![Stmt::Expr(binary(BinOp::Div, Expr::int(1), Expr::int(0)).at(2, 5)).at(2, 5)],
        catch: Some(CatchClause {
            name: "e".to_owned(),
            kind: Some("DivisionByZero".to_owned()),
            body: vec![print1(Expr::str("matched")).at(3, 15)],
        }),
        finally: None,
    };
    let (result, lines) = run_main(vec![matching.at(2, 3)]);
    result.unwrap();
    assert_eq!(lines, vec!["matched"]);

    let not_matching = Stmt::Try {
        body: vec![Stmt::Expr(binary(BinOp::Div, Expr::int(1), Expr::int(0)).at(2, 5)).at(2, 5)],
        catch: Some(CatchClause {
            name: "e".to_owned(),
            kind: Some("KeyError".to_owned()),
            body: vec![print1(Expr::str("matched")).at(3, 15)],
        }),
        finally: None,
    };
    let (result, lines) = run_main(vec![not_matching.at(2, 3)]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::DivisionByZero);
    assert!(lines.is_empty());
}

#[test]
fn catch_binds_a_tagged_record_for_runtime_errors() {
    let (result, lines) = run_main(vec![
        try_catch(
            vec![Stmt::Expr(binary(BinOp::Div, Expr::int(1), Expr::int(0)).at(2, 5)).at(2, 5)],
            "e",
            vec![print1(index(Expr::name("e"), Expr::str("kind"))).at(3, 15)],
        )
        .at(2, 3),
    ]);
    result.unwrap();
    assert_eq!(lines, vec!["DivisionByZero"]);
}

#[test]
fn undefined_names_suggest_close_matches() {
    let (result, _) = run_main(vec![
        lets("count", Expr::int(1)).at(1, 1),
        Stmt::Expr(Expr::name("cont").at(2, 1)).at(2, 1),
    ]);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedName);
    assert!(err.message().contains("count"), "message: {}", err.message());
}

#[test]
fn let_null_without_annotation_is_rejected() {
    let (result, _) = run_main(vec![lets("x", Expr::null()).at(1, 1)]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeInferenceError);
}

#[test]
fn nullable_annotation_permits_null_and_plain_rejects_it() {
    let nullable = Stmt::Let {
        name: "x".to_owned(),
        ty: Some(TypeExpr::Nullable(Box::new(TypeExpr::simple("int")))),
        init: Some(Expr::null().at(1, 20)),
    };
    let (result, _) = run_main(vec![nullable.at(1, 1)]);
    result.unwrap();

    let plain = Stmt::Let {
        name: "x".to_owned(),
        ty: Some(TypeExpr::simple("int")),
        init: Some(Expr::null().at(1, 17)),
    };
    let (result, _) = run_main(vec![plain.at(1, 1)]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeError);
}

#[test]
fn assignment_revalidates_declared_types() {
    let (result, _) = run_main(vec![
        Stmt::Let {
            name: "x".to_owned(),
            ty: Some(TypeExpr::simple("int")),
            init: Some(Expr::int(1).at(1, 17)),
        }
        .at(1, 1),
        Stmt::Assign {
            target: naab::ast::AssignTarget::Name("x".to_owned()),
            value: Expr::str("nope").at(2, 5),
        }
        .at(2, 1),
    ]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TypeError);
}

#[test]
fn list_reversal_round_trips() {
    // for x in xs { push(ys, ...) } done twice by index walking
    // reverse(reverse(xs)) == xs expressed with explicit loops
    let reverse_into = |src: &str, dst: &str, line: u32| Stmt::For {
        bindings: vec!["i".to_owned()],
        iter: Expr::Range {
            start: Box::new(Expr::int(0).at(line, 1)),
            end: Box::new(call("len", vec![Expr::name(src).at(line, 5)]).at(line, 5)),
        }
        .at(line, 1),
        body: vec![Stmt::Expr(
            call(
                "push",
                vec![
                    Expr::name(dst).at(line, 10),
                    index(
                        Expr::name(src),
                        binary(
                            BinOp::Sub,
                            binary(BinOp::Sub, call("len", vec![Expr::name(src).at(line, 20)]), Expr::int(1)),
                            Expr::name("i"),
                        ),
                    )
                    .at(line, 14),
                ],
            )
            .at(line, 10),
        )
        .at(line, 10)],
    };
    let (result, _) = run_main(vec![
        lets(
            "xs",
            Expr::ListLit(vec![Expr::int(1).at(1, 12), Expr::int(2).at(1, 15), Expr::int(3).at(1, 18)]),
        )
        .at(1, 1),
        lets("ys", Expr::ListLit(vec![])).at(2, 1),
        lets("zs", Expr::ListLit(vec![])).at(3, 1),
        reverse_into("xs", "ys", 4).at(4, 1),
        reverse_into("ys", "zs", 5).at(5, 1),
        Stmt::Return(Some(
            binary(BinOp::Eq, Expr::name("zs"), Expr::name("xs")).at(6, 10),
        ))
        .at(6, 1),
    ]);
    assert_eq!(result.unwrap(), Object::Bool(true));
}
