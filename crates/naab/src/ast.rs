//! AST node types consumed by the evaluator.
//!
//! The lexer and parser live outside this crate; they produce these nodes and
//! hand them to [`crate::run::Interp`] together with the source text and the
//! source file's canonical path. Every node carries a [`CodeLoc`] so runtime
//! errors can point back at the offending line and column.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::polyglot::LanguageId;

/// Line/column position of a node in its source file (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A declared type as written in source.
///
/// `Name` covers primitives (`int`, `string`, ...), struct and enum names,
/// generic applications (`Pair<int, string>`), type parameters, and
/// module-qualified spellings (`types.Config`, stored as a dotted name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    Name { name: String, args: Vec<TypeExpr> },
    /// `T?` — permits `null` in addition to `T`.
    Nullable(Box<TypeExpr>),
    /// `A | B | ...` — matches any member.
    Union(Vec<TypeExpr>),
}

impl TypeExpr {
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self::Name {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// True when `null` is a legal inhabitant of this type.
    #[must_use]
    pub fn admits_null(&self) -> bool {
        match self {
            Self::Nullable(_) => true,
            Self::Union(members) => members.iter().any(Self::admits_null),
            Self::Name { name, .. } => name == "null",
        }
    }

    /// Renders the type the way diagnostics spell it.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Name { name, args } => {
                if args.is_empty() {
                    name.clone()
                } else {
                    let inner: Vec<String> = args.iter().map(Self::display).collect();
                    format!("{name}<{}>", inner.join(", "))
                }
            }
            Self::Nullable(inner) => format!("{}?", inner.display()),
            Self::Union(members) => {
                let inner: Vec<String> = members.iter().map(Self::display).collect();
                inner.join(" | ")
            }
        }
    }
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprLoc {
    pub expr: Expr,
    pub loc: CodeLoc,
}

/// A polyglot code fragment embedded in NAAb source.
///
/// `captures` lists the NAAb identifiers the fragment reads; the executor
/// resolves them in the enclosing environment at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyglotBlock {
    pub language: LanguageId,
    pub source: String,
    pub captures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Binary {
        op: BinOp,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    Unary {
        op: UnOp,
        operand: Box<ExprLoc>,
    },
    /// Half-open integer interval `start..end`.
    Range {
        start: Box<ExprLoc>,
        end: Box<ExprLoc>,
    },
    /// `value |> func`, desugared by the evaluator to `func(value)`.
    Pipeline {
        value: Box<ExprLoc>,
        func: Box<ExprLoc>,
    },
    Call {
        callee: Box<ExprLoc>,
        /// Explicit type arguments (`identity<int>(x)`); empty when inferred.
        type_args: Vec<TypeExpr>,
        args: Vec<ExprLoc>,
    },
    Index {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    Member {
        object: Box<ExprLoc>,
        name: String,
    },
    StructLit {
        /// Optional module prefix (`types.Config { .. }`).
        module: Option<String>,
        name: String,
        type_args: Vec<TypeExpr>,
        fields: Vec<(String, ExprLoc)>,
    },
    ListLit(Vec<ExprLoc>),
    /// Dict literal; keys evaluate to strings.
    DictLit(Vec<(ExprLoc, ExprLoc)>),
    Block(PolyglotBlock),
}

impl Expr {
    /// Attaches a source position, producing an [`ExprLoc`].
    #[must_use]
    pub fn at(self, line: u32, column: u32) -> ExprLoc {
        ExprLoc {
            expr: self,
            loc: CodeLoc::new(line, column),
        }
    }

    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::Literal(Literal::Int(v))
    }

    #[must_use]
    pub fn float(v: f64) -> Self {
        Self::Literal(Literal::Float(v))
    }

    #[must_use]
    pub fn bool(v: bool) -> Self {
        Self::Literal(Literal::Bool(v))
    }

    #[must_use]
    pub fn str(v: impl Into<String>) -> Self {
        Self::Literal(Literal::Str(v.into()))
    }

    #[must_use]
    pub fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    #[must_use]
    pub fn name(v: impl Into<String>) -> Self {
        Self::Name(v.into())
    }
}

/// Assignment targets: a plain name, a struct field, or a container slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(String),
    Member { object: ExprLoc, name: String },
    Index { object: ExprLoc, index: ExprLoc },
}

/// A `catch` clause. `kind` restricts matching to one error kind label
/// (`catch (e: TypeError)`); `None` catches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub name: String,
    pub kind: Option<String>,
    pub body: Vec<StmtLoc>,
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtLoc {
    pub stmt: Stmt,
    pub loc: CodeLoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        init: Option<ExprLoc>,
    },
    Assign {
        target: AssignTarget,
        value: ExprLoc,
    },
    Expr(ExprLoc),
    If {
        cond: ExprLoc,
        then_body: Vec<StmtLoc>,
        else_body: Option<Vec<StmtLoc>>,
    },
    While {
        cond: ExprLoc,
        body: Vec<StmtLoc>,
    },
    For {
        /// One binding (element / key-value pair) or two (key, value).
        bindings: Vec<String>,
        iter: ExprLoc,
        body: Vec<StmtLoc>,
    },
    Break,
    Continue,
    Return(Option<ExprLoc>),
    Throw(ExprLoc),
    Try {
        body: Vec<StmtLoc>,
        catch: Option<CatchClause>,
        finally: Option<Vec<StmtLoc>>,
    },
}

impl Stmt {
    /// Attaches a source position, producing a [`StmtLoc`].
    #[must_use]
    pub fn at(self, line: u32, column: u32) -> StmtLoc {
        StmtLoc {
            stmt: self,
            loc: CodeLoc::new(line, column),
        }
    }
}

/// A function parameter. `by_ref` parameters alias the caller's value;
/// plain parameters receive a deep copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub by_ref: bool,
}

impl Param {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Option<TypeExpr>) -> Self {
        Self {
            name: name.into(),
            ty,
            by_ref: false,
        }
    }

    #[must_use]
    pub fn by_ref(name: impl Into<String>, ty: Option<TypeExpr>) -> Self {
        Self {
            name: name.into(),
            ty,
            by_ref: true,
        }
    }
}

/// A function declaration (`export function` or a nested definition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Arc<Vec<StmtLoc>>,
    pub loc: CodeLoc,
}

/// A field in a struct declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
}

/// A struct declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub loc: CodeLoc,
}

/// An enum declaration: a nominal type whose variants are unit constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
    pub loc: CodeLoc,
}

/// A `use` import: dotted module path plus optional alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseDecl {
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub loc: CodeLoc,
}

impl UseDecl {
    /// The name the import binds in the importer's scope: the alias if given,
    /// otherwise the last path segment.
    #[must_use]
    pub fn bound_name(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or_else(|| self.path.last().map(String::as_str).unwrap_or_default())
    }
}

/// An `export let` constant at module level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub value: ExprLoc,
    pub loc: CodeLoc,
}

/// A top-level item. `Stray` wraps statements the parser accepted
/// syntactically but which are not legal at module level (a free-standing
/// `let`); the evaluator rejects them with a targeted diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Use(UseDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Function(FunctionDecl),
    Const(ConstDecl),
    Stray(StmtLoc),
}

/// A parsed module or entry program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub decls: Vec<Decl>,
    /// The `main` block; present only on executable entry modules.
    pub main: Option<Arc<Vec<StmtLoc>>>,
    /// Canonical path of the source file, as reported in stack frames.
    pub file: String,
}

impl Program {
    #[must_use]
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            decls: Vec::new(),
            main: None,
            file: file.into(),
        }
    }

    #[must_use]
    pub fn with_main(mut self, body: Vec<StmtLoc>) -> Self {
        self.main = Some(Arc::new(body));
        self
    }

    #[must_use]
    pub fn with_decl(mut self, decl: Decl) -> Self {
        self.decls.push(decl);
        self
    }
}
