//! Generic inference and the monomorphization cache, end to end.

mod common;

use common::print1;
use naab::{
    Object,
    ast::{CodeLoc, Decl, Expr, FieldDecl, FunctionDecl, Param, Program, Stmt, StructDecl, TypeExpr},
};
use pretty_assertions::assert_eq;

fn identity_decl() -> Decl {
    Decl::Function(FunctionDecl {
        name: "identity".to_owned(),
        type_params: vec!["T".to_owned()],
        params: vec![Param::new("x", Some(TypeExpr::simple("T")))],
        ret: Some(TypeExpr::simple("T")),
        body: std::sync::Arc::new(vec![Stmt::Return(Some(Expr::name("x").at(1, 30))).at(1, 23)]),
        loc: CodeLoc::new(1, 1),
    })
}

#[test]
fn inference_specializes_per_concrete_type_and_caches() {
    // print(identity(42)) ; print(identity("hi")) ; print(identity(42))
    let call_identity = |arg: Expr, line: u32| {
        Stmt::Expr(
            common::call("print", vec![common::call("identity", vec![arg.at(line, 20)]).at(line, 11)]).at(line, 3),
        )
        .at(line, 3)
    };
    let program = Program::new("gen.naab").with_decl(identity_decl()).with_main(vec![
        call_identity(Expr::int(42), 3),
        call_identity(Expr::str("hi"), 4),
        call_identity(Expr::int(42), 5),
    ]);

    let mut run = common::interp_with_output(naab::InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["42", "hi", "42"]);

    // Exactly two specializations: the repeat int call hit the cache.
    assert_eq!(run.interp.specialization_count(), 2);
    let mut names = run.interp.specialization_names();
    names.sort();
    assert_eq!(names, vec!["identity_int", "identity_string"]);
}

#[test]
fn explicit_type_arguments_drive_specialization() {
    // identity<int>(42) names the specialization explicitly.
    let program = Program::new("gen.naab").with_decl(identity_decl()).with_main(vec![
        Stmt::Return(Some(
            Expr::Call {
                callee: Box::new(Expr::name("identity").at(3, 10)),
                type_args: vec![TypeExpr::simple("int")],
                args: vec![Expr::int(42).at(3, 24)],
            }
            .at(3, 10),
        ))
        .at(3, 3),
    ]);
    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(42));
    assert_eq!(interp.specialization_names(), vec!["identity_int".to_owned()]);
}

#[test]
fn generic_struct_literals_register_mangled_specializations() {
    // struct Box<T> { item: T } ; let b = Box { item: 42 } ; return b.item
    let boxed = Decl::Struct(StructDecl {
        name: "Box".to_owned(),
        type_params: vec!["T".to_owned()],
        fields: vec![FieldDecl {
            name: "item".to_owned(),
            ty: TypeExpr::simple("T"),
        }],
        loc: CodeLoc::new(1, 1),
    });
    let program = Program::new("gen.naab").with_decl(boxed).with_main(vec![
        common::lets(
            "b",
            Expr::StructLit {
                module: None,
                name: "Box".to_owned(),
                type_args: vec![],
                fields: vec![("item".to_owned(), Expr::int(42).at(3, 22))],
            },
        )
        .at(3, 3),
        Stmt::Return(Some(common::member(Expr::name("b"), "item").at(4, 10))).at(4, 3),
    ]);

    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(42));
    // The specialization landed in the struct registry under its mangled name.
    assert!(interp.struct_registry().get_by_name("Box_int").is_some());
}

#[test]
fn unresolvable_type_parameter_is_an_inference_error() {
    // function pair<T, U>(x: T) -> T  — U never appears in a parameter.
    let decl = Decl::Function(FunctionDecl {
        name: "pair".to_owned(),
        type_params: vec!["T".to_owned(), "U".to_owned()],
        params: vec![Param::new("x", Some(TypeExpr::simple("T")))],
        ret: Some(TypeExpr::simple("T")),
        body: std::sync::Arc::new(vec![Stmt::Return(Some(Expr::name("x").at(1, 40))).at(1, 33)]),
        loc: CodeLoc::new(1, 1),
    });
    let program = Program::new("gen.naab").with_decl(decl).with_main(vec![
        Stmt::Expr(common::call("pair", vec![Expr::int(1).at(3, 8)]).at(3, 3)).at(3, 3),
    ]);
    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    let err = interp.run_program(&program, "").unwrap_err();
    assert_eq!(err.kind(), naab::ErrorKind::TypeInferenceError);
}

#[test]
fn conflicting_inference_warns_and_keeps_the_first_binding() {
    // function first<T>(a: T, b: T) -> T { return a }
    // first(1, "two") infers T=int from `a`; the conflicting string binding
    // only warns.
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).try_init();
    let decl = Decl::Function(FunctionDecl {
        name: "first".to_owned(),
        type_params: vec!["T".to_owned()],
        params: vec![
            Param::new("a", Some(TypeExpr::simple("T"))),
            Param::new("b", Some(TypeExpr::simple("T"))),
        ],
        ret: Some(TypeExpr::simple("T")),
        body: std::sync::Arc::new(vec![Stmt::Return(Some(Expr::name("a").at(1, 44))).at(1, 37)]),
        loc: CodeLoc::new(1, 1),
    });
    let program = Program::new("gen.naab").with_decl(decl).with_main(vec![
        Stmt::Return(Some(
            common::call("first", vec![Expr::int(1).at(3, 16), Expr::str("two").at(3, 19)]).at(3, 10),
        ))
        .at(3, 3),
    ]);
    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    assert_eq!(interp.run_program(&program, "").unwrap(), Object::Int(1));
    assert_eq!(interp.specialization_names(), vec!["first_int".to_owned()]);
}

#[test]
fn nested_generic_calls_reuse_the_cache_across_functions() {
    // Two different call sites of identity<int> share one entry.
    let call_identity = |line: u32| {
        Stmt::Expr(common::call("identity", vec![Expr::int(7).at(line, 20)]).at(line, 3)).at(line, 3)
    };
    let wrapper = Decl::Function(FunctionDecl {
        name: "wrapper".to_owned(),
        type_params: vec![],
        params: vec![],
        ret: None,
        body: std::sync::Arc::new(vec![call_identity(2)]),
        loc: CodeLoc::new(1, 1),
    });
    let program = Program::new("gen.naab")
        .with_decl(identity_decl())
        .with_decl(wrapper)
        .with_main(vec![
            call_identity(5),
            Stmt::Expr(common::call("wrapper", vec![]).at(6, 3)).at(6, 3),
        ]);
    let mut interp = naab::Interp::new(naab::InterpOptions::default());
    interp.run_program(&program, "").unwrap();
    assert_eq!(interp.specialization_count(), 1);
}

#[test]
fn print_formats_identity_results() {
    let program = Program::new("gen.naab").with_decl(identity_decl()).with_main(vec![
        print1(common::call("identity", vec![Expr::float(2.5).at(3, 20)])).at(3, 3),
    ]);
    let mut run = common::interp_with_output(naab::InterpOptions::default());
    run.interp.run_program(&program, "").unwrap();
    assert_eq!(run.output.lines(), vec!["2.5"]);
}
