//! Cycle-collector behavior through whole programs: reference cycles built
//! from struct instances are reclaimed, reachable data never is.

mod common;

use common::{interp_with_output, lets, print1};
use naab::{
    Object,
    ast::{CodeLoc, Decl, Expr, FieldDecl, FunctionDecl, Program, Stmt, StructDecl, TypeExpr},
};
use pretty_assertions::assert_eq;

fn node_struct() -> Decl {
    Decl::Struct(StructDecl {
        name: "Node".to_owned(),
        type_params: vec![],
        fields: vec![
            FieldDecl {
                name: "value".to_owned(),
                ty: TypeExpr::simple("int"),
            },
            FieldDecl {
                name: "next".to_owned(),
                ty: TypeExpr::Union(vec![TypeExpr::simple("Node"), TypeExpr::simple("null")]),
            },
        ],
        loc: CodeLoc::new(1, 1),
    })
}

fn node_lit(value: i64, next: Expr) -> Expr {
    Expr::StructLit {
        module: None,
        name: "Node".to_owned(),
        type_args: vec![],
        fields: vec![
            ("value".to_owned(), Expr::int(value).at(2, 20)),
            ("next".to_owned(), next.at(2, 30)),
        ],
    }
}

#[test]
fn cycle_of_nodes_is_reclaimed_after_main() {
    // struct Node { value: int, next: Node | null }
    // main { let a = ...; let b = ...; a.next = b; gc_collect(); print("ok") }
    let program = Program::new("cycle.naab").with_decl(node_struct()).with_main(vec![
        lets("a", node_lit(1, Expr::null())).at(3, 3),
        lets("b", node_lit(2, Expr::name("a"))).at(4, 3),
        Stmt::Assign {
            target: naab::ast::AssignTarget::Member {
                object: Expr::name("a").at(5, 3),
                name: "next".to_owned(),
            },
            value: Expr::name("b").at(5, 12),
        }
        .at(5, 3),
        Stmt::Expr(common::call("gc_collect", vec![]).at(6, 3)).at(6, 3),
        print1(Expr::str("ok")).at(7, 3),
    ]);

    let mut run = interp_with_output(naab::InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["ok"]);
    // Everything main allocated is dead: the node cycle was broken by the
    // collector, the rest fell to reference counting.
    assert_eq!(run.interp.live_count(), 0);
}

#[test]
fn explicit_collection_reclaims_an_unrooted_cycle_mid_run() {
    // function make_cycle() { a <-> b ; return 0 }
    // main { make_cycle() ; return gc_collect() }
    let make_cycle = Decl::Function(FunctionDecl {
        name: "make_cycle".to_owned(),
        type_params: vec![],
        params: vec![],
        ret: None,
        body: std::sync::Arc::new(vec![
            lets("a", node_lit(1, Expr::null())).at(3, 3),
            lets("b", node_lit(2, Expr::name("a"))).at(4, 3),
            Stmt::Assign {
                target: naab::ast::AssignTarget::Member {
                    object: Expr::name("a").at(5, 3),
                    name: "next".to_owned(),
                },
                value: Expr::name("b").at(5, 12),
            }
            .at(5, 3),
            Stmt::Return(Some(Expr::int(0).at(6, 10))).at(6, 3),
        ]),
        loc: CodeLoc::new(2, 1),
    });
    let program = Program::new("cycle.naab")
        .with_decl(node_struct())
        .with_decl(make_cycle)
        .with_main(vec![
            Stmt::Expr(common::call("make_cycle", vec![]).at(9, 3)).at(9, 3),
            Stmt::Return(Some(common::call("gc_collect", vec![]).at(10, 10))).at(10, 3),
        ]);

    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    let collected = interp.run_program(&program, "").unwrap();
    // Both cycle members were unreachable once make_cycle returned.
    let Object::Int(collected) = collected else {
        panic!("gc_collect returns a count, got {collected:?}");
    };
    assert!(collected >= 2, "collected {collected}");
}

#[test]
fn rooted_cycles_and_reachable_data_survive_collection() {
    // main { let a = ...; let b = ...; a.next = b; gc_collect(); return a.value }
    let program = Program::new("cycle.naab").with_decl(node_struct()).with_main(vec![
        lets("a", node_lit(7, Expr::null())).at(3, 3),
        lets("b", node_lit(2, Expr::name("a"))).at(4, 3),
        Stmt::Assign {
            target: naab::ast::AssignTarget::Member {
                object: Expr::name("a").at(5, 3),
                name: "next".to_owned(),
            },
            value: Expr::name("b").at(5, 12),
        }
        .at(5, 3),
        Stmt::Expr(common::call("gc_collect", vec![]).at(6, 3)).at(6, 3),
        Stmt::Return(Some(common::member(Expr::name("a"), "value").at(7, 10))).at(7, 3),
    ]);

    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(7));
}

#[test]
fn automatic_trigger_fires_on_allocation_pressure() {
    // A low threshold plus a loop that builds garbage cycles forces the
    // automatic trigger; the program still completes and the heap stays
    // bounded.
    let make_garbage = Stmt::For {
        bindings: vec!["i".to_owned()],
        iter: Expr::Range {
            start: Box::new(Expr::int(0).at(3, 12)),
            end: Box::new(Expr::int(200).at(3, 15)),
        }
        .at(3, 12),
        body: vec![
            lets("a", node_lit(1, Expr::null())).at(4, 5),
            lets("b", node_lit(2, Expr::name("a"))).at(5, 5),
            Stmt::Assign {
                target: naab::ast::AssignTarget::Member {
                    object: Expr::name("a").at(6, 5),
                    name: "next".to_owned(),
                },
                value: Expr::name("b").at(6, 14),
            }
            .at(6, 5),
        ],
    };
    let program = Program::new("cycle.naab")
        .with_decl(node_struct())
        .with_main(vec![make_garbage.at(3, 3), print1(Expr::str("done")).at(8, 3)]);

    let options = naab::InterpOptions {
        gc_threshold: 50,
        ..naab::InterpOptions::default()
    };
    let mut run = interp_with_output(options);
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["done"]);
    assert_eq!(run.interp.live_count(), 0);
}
