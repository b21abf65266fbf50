//! Fragment wrapping.
//!
//! Languages that need enclosing scaffolding get it here, and value-bearing
//! blocks are wrapped so `return expr` works uniformly. The conventions are
//! deterministic per language:
//!
//! - **python**: a prologue rebinds captures from the `NAAB_CAPTURES` env
//!   JSON under their original names. Value-bearing blocks run as the body
//!   of a generated function whose result is printed as JSON on the last
//!   stdout line; side-effect blocks run at top level.
//! - **javascript** (node): captures destructured from `NAAB_CAPTURES`;
//!   value-bearing blocks run inside a generated function, result printed
//!   as JSON.
//! - **ruby**: captures assigned as locals; value-bearing blocks run inside
//!   a lambda, result printed with `JSON.generate`.
//! - **shell / bash**: each capture is exported directly as an environment
//!   variable under its original name (scalars verbatim, containers as
//!   JSON text). The block runs as-is; its trimmed stdout is the result
//!   (parsed as JSON when possible, a string otherwise). `return` is not
//!   supported.
//! - **go / cpp / rust / csharp** (compiled or scripted): captures are
//!   inlined into the generated source as typed declarations. A fragment
//!   that already looks like a complete program (recognizable entry point)
//!   runs unwrapped and supports side effects only; otherwise the fragment
//!   becomes the body of a generated function and the wrapper prints the
//!   result as JSON.

use crate::{object::Object, polyglot::LanguageId};

/// A wrapped program ready for the subprocess backend.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WrappedSource {
    pub code: String,
    /// Whether the child expects the `NAAB_CAPTURES` JSON env payload.
    pub wants_env_payload: bool,
    /// Whether each capture is exported as its own env var (shell family).
    pub wants_direct_env: bool,
}

/// Heuristic: does the fragment already contain a recognizable entry point?
pub(crate) fn looks_complete(language: LanguageId, source: &str) -> bool {
    match language {
        LanguageId::Go => source.contains("package "),
        LanguageId::Cpp => source.contains("int main"),
        LanguageId::Rust => source.contains("fn main"),
        LanguageId::CSharp => source.contains("static void Main") || source.contains("static int Main"),
        // Interpreted languages always run wrapped.
        _ => false,
    }
}

/// Wraps `source` for execution. `capture_names` lists the NAAb identifiers
/// the block reads; `captures` carries their values for languages that need
/// them inlined.
pub(crate) fn wrap(
    language: LanguageId,
    source: &str,
    captures: &[(String, Object)],
    want_result: bool,
) -> WrappedSource {
    match language {
        LanguageId::Python => wrap_python(source, want_result),
        LanguageId::JavaScript => wrap_javascript(source, captures, want_result),
        LanguageId::Ruby => wrap_ruby(source, captures, want_result),
        LanguageId::Shell | LanguageId::Bash => WrappedSource {
            code: source.to_owned(),
            wants_env_payload: false,
            wants_direct_env: true,
        },
        LanguageId::Go => wrap_go(source, captures, want_result),
        LanguageId::Cpp => wrap_cpp(source, captures, want_result),
        LanguageId::Rust => wrap_rust(source, captures, want_result),
        LanguageId::CSharp => wrap_csharp(source, captures, want_result),
    }
}

fn indent(source: &str, prefix: &str) -> String {
    source
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_python(source: &str, want_result: bool) -> WrappedSource {
    let prologue = "import json as __naab_json__, os as __naab_os__\n\
                    globals().update(__naab_json__.loads(__naab_os__.environ.pop(\"NAAB_CAPTURES\", \"{}\")))\n";
    let code = if want_result {
        format!(
            "{prologue}def __naab_block__():\n{}\n    return None\n__naab_result__ = __naab_block__()\nprint(__naab_json__.dumps(__naab_result__))\n",
            indent(source, "    ")
        )
    } else {
        format!("{prologue}{source}\n")
    };
    WrappedSource {
        code,
        wants_env_payload: true,
        wants_direct_env: false,
    }
}

fn wrap_javascript(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    let mut prologue = String::from(
        "const __naab_captures__ = JSON.parse(process.env.NAAB_CAPTURES || \"{}\");\n",
    );
    for (name, _) in captures {
        prologue.push_str(&format!("const {name} = __naab_captures__[{:?}];\n", name));
    }
    let code = if want_result {
        format!(
            "{prologue}function __naab_block__() {{\n{}\n}}\nconst __naab_result__ = __naab_block__();\nconsole.log(JSON.stringify(__naab_result__ === undefined ? null : __naab_result__));\n",
            indent(source, "  ")
        )
    } else {
        format!("{prologue}{source}\n")
    };
    WrappedSource {
        code,
        wants_env_payload: true,
        wants_direct_env: false,
    }
}

fn wrap_ruby(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    let mut prologue = String::from(
        "require 'json'\n__naab_captures__ = JSON.parse(ENV.delete('NAAB_CAPTURES') || '{}')\n",
    );
    for (name, _) in captures {
        prologue.push_str(&format!("{name} = __naab_captures__[{:?}]\n", name));
    }
    let code = if want_result {
        format!(
            "{prologue}__naab_block__ = lambda do\n{}\nend\nputs JSON.generate(__naab_block__.call)\n",
            indent(source, "  ")
        )
    } else {
        format!("{prologue}{source}\n")
    };
    WrappedSource {
        code,
        wants_env_payload: true,
        wants_direct_env: false,
    }
}

/// Renders an [`Object`] as a Go literal declaration.
fn go_capture_decl(name: &str, value: &Object) -> String {
    match value {
        Object::Int(i) => format!("{name} := int64({i}); _ = {name}\n"),
        Object::Float(f) => format!("{name} := float64({f}); _ = {name}\n"),
        Object::Bool(b) => format!("{name} := {b}; _ = {name}\n"),
        Object::Str(s) => format!("{name} := {s:?}; _ = {name}\n"),
        // Containers cross as JSON text.
        other => format!("{name} := `{}`; _ = {name}\n", other.to_json()),
    }
}

fn wrap_go(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    if looks_complete(LanguageId::Go, source) {
        return WrappedSource {
            code: source.to_owned(),
            wants_env_payload: false,
            wants_direct_env: false,
        };
    }
    let decls: String = captures.iter().map(|(n, v)| go_capture_decl(n, v)).collect();
    let code = if want_result {
        format!(
            "package main\n\nimport (\n\t\"encoding/json\"\n\t\"fmt\"\n)\n\nfunc __naabBlock() any {{\n{decls}{}\n\treturn nil\n}}\n\nfunc main() {{\n\tout, _ := json.Marshal(__naabBlock())\n\tfmt.Println(string(out))\n}}\n",
            indent(source, "\t")
        )
    } else {
        format!("package main\n\nfunc main() {{\n{decls}{}\n}}\n", indent(source, "\t"))
    };
    WrappedSource {
        code,
        wants_env_payload: false,
        wants_direct_env: false,
    }
}

fn cpp_capture_decl(name: &str, value: &Object) -> String {
    match value {
        Object::Int(i) => format!("long long {name} = {i}LL; (void){name};\n"),
        Object::Float(f) => format!("double {name} = {f}; (void){name};\n"),
        Object::Bool(b) => format!("bool {name} = {b}; (void){name};\n"),
        Object::Str(s) => format!("std::string {name} = {s:?}; (void){name};\n"),
        other => format!("std::string {name} = R\"__naab__({})__naab__\"; (void){name};\n", other.to_json()),
    }
}

fn wrap_cpp(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    if looks_complete(LanguageId::Cpp, source) {
        return WrappedSource {
            code: source.to_owned(),
            wants_env_payload: false,
            wants_direct_env: false,
        };
    }
    let decls: String = captures.iter().map(|(n, v)| cpp_capture_decl(n, v)).collect();
    let printer = "static void __naab_print(long long v) { std::cout << v; }\n\
                   static void __naab_print(double v) { std::cout << v; }\n\
                   static void __naab_print(bool v) { std::cout << (v ? \"true\" : \"false\"); }\n\
                   static void __naab_print(const std::string& v) {\n\
                   \tstd::cout << '\"';\n\
                   \tfor (char c : v) { if (c == '\"' || c == '\\\\') std::cout << '\\\\'; std::cout << c; }\n\
                   \tstd::cout << '\"';\n\
                   }\n";
    let code = if want_result {
        format!(
            "#include <iostream>\n#include <string>\n\n{printer}\nint main() {{\n{decls}\tauto __naab_block = [&]() {{\n{}\n\t}};\n\t__naab_print(__naab_block());\n\tstd::cout << std::endl;\n\treturn 0;\n}}\n",
            indent(source, "\t\t")
        )
    } else {
        format!(
            "#include <iostream>\n#include <string>\n\nint main() {{\n{decls}{}\n\treturn 0;\n}}\n",
            indent(source, "\t")
        )
    };
    WrappedSource {
        code,
        wants_env_payload: false,
        wants_direct_env: false,
    }
}

fn rust_capture_decl(name: &str, value: &Object) -> String {
    match value {
        Object::Int(i) => format!("let {name}: i64 = {i}; let _ = &{name};\n"),
        Object::Float(f) => format!("let {name}: f64 = {f:?}; let _ = &{name};\n"),
        Object::Bool(b) => format!("let {name}: bool = {b}; let _ = &{name};\n"),
        Object::Str(s) => format!("let {name}: &str = {s:?}; let _ = &{name};\n"),
        other => format!("let {name}: &str = {:?}; let _ = &{name};\n", other.to_json().to_string()),
    }
}

fn wrap_rust(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    if looks_complete(LanguageId::Rust, source) {
        return WrappedSource {
            code: source.to_owned(),
            wants_env_payload: false,
            wants_direct_env: false,
        };
    }
    let decls: String = captures.iter().map(|(n, v)| rust_capture_decl(n, v)).collect();
    let printer = "trait NaabJson { fn naab_json(&self) -> String; }\n\
                   impl NaabJson for i64 { fn naab_json(&self) -> String { self.to_string() } }\n\
                   impl NaabJson for f64 { fn naab_json(&self) -> String { self.to_string() } }\n\
                   impl NaabJson for bool { fn naab_json(&self) -> String { self.to_string() } }\n\
                   impl NaabJson for String { fn naab_json(&self) -> String { format!(\"{:?}\", self) } }\n\
                   impl NaabJson for &str { fn naab_json(&self) -> String { format!(\"{:?}\", self) } }\n\
                   impl NaabJson for () { fn naab_json(&self) -> String { \"null\".to_string() } }\n";
    let code = if want_result {
        format!(
            "{printer}\nfn main() {{\n{decls}\tlet __naab_result = (|| {{\n{}\n\t}})();\n\tprintln!(\"{{}}\", __naab_result.naab_json());\n}}\n",
            indent(source, "\t\t")
        )
    } else {
        format!("fn main() {{\n{decls}{}\n}}\n", indent(source, "\t"))
    };
    WrappedSource {
        code,
        wants_env_payload: false,
        wants_direct_env: false,
    }
}

fn csharp_capture_decl(name: &str, value: &Object) -> String {
    match value {
        Object::Int(i) => format!("long {name} = {i};\n"),
        Object::Float(f) => format!("double {name} = {f};\n"),
        Object::Bool(b) => format!("bool {name} = {b};\n"),
        Object::Str(s) => format!("string {name} = {s:?};\n"),
        other => format!("string {name} = {:?};\n", other.to_json().to_string()),
    }
}

fn wrap_csharp(source: &str, captures: &[(String, Object)], want_result: bool) -> WrappedSource {
    if looks_complete(LanguageId::CSharp, source) {
        return WrappedSource {
            code: source.to_owned(),
            wants_env_payload: false,
            wants_direct_env: false,
        };
    }
    let decls: String = captures.iter().map(|(n, v)| csharp_capture_decl(n, v)).collect();
    let code = if want_result {
        format!(
            "object __NaabBlock() {{\n{decls}{}\n\treturn null;\n}}\nvar __naabResult = __NaabBlock();\nSystem.Console.WriteLine(System.Text.Json.JsonSerializer.Serialize(__naabResult));\n",
            indent(source, "\t")
        )
    } else {
        format!("{decls}{source}\n")
    };
    WrappedSource {
        code,
        wants_env_payload: false,
        wants_direct_env: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_result_wrapping_supports_return() {
        let wrapped = wrap(LanguageId::Python, "return x * 2", &[("x".to_owned(), Object::Int(21))], true);
        assert!(wrapped.wants_env_payload);
        assert!(wrapped.code.contains("def __naab_block__():"));
        assert!(wrapped.code.contains("    return x * 2"));
        assert!(wrapped.code.contains("dumps(__naab_result__)"));
    }

    #[test]
    fn shell_uses_direct_env_and_runs_verbatim() {
        let wrapped = wrap(LanguageId::Shell, "echo \"$x\"", &[("x".to_owned(), Object::Int(1))], true);
        assert!(wrapped.wants_direct_env);
        assert_eq!(wrapped.code, "echo \"$x\"");
    }

    #[test]
    fn complete_go_program_is_not_wrapped() {
        let source = "package main\nfunc main() {}\n";
        let wrapped = wrap(LanguageId::Go, source, &[], false);
        assert_eq!(wrapped.code, source);
    }

    #[test]
    fn javascript_surfaces_original_capture_names() {
        let wrapped = wrap(
            LanguageId::JavaScript,
            "return x + 1",
            &[("x".to_owned(), Object::Int(1))],
            true,
        );
        assert!(wrapped.code.contains("const x = __naab_captures__[\"x\"];"));
    }
}
