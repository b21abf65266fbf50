//! Generic monomorphization.
//!
//! Generic functions and structs are specialized on demand, keyed by the
//! concrete type arguments at the call or literal site. Inference is
//! first-binding-wins: the first argument to mention an unbound parameter
//! binds it, later conflicts warn and keep the first binding. Anything still
//! unbound after inference is an error. Specializations land in caches that
//! live until interpreter teardown.

use ahash::AHashMap;

use crate::{
    ast::{AssignTarget, Expr, ExprLoc, Param, Stmt, StmtLoc, TypeExpr},
    exception::{ErrorKind, RunError, RunResult},
    function::FunctionDef,
    structs::{StructDef, StructRegistry},
};

/// Ordered bindings of type parameter name to concrete type.
pub(crate) type TypeBindings = AHashMap<String, TypeExpr>;

/// The mangled name of a specialization: `<Base>_<Arg1>[_<Arg2>...]`.
pub(crate) fn mangle(base: &str, type_params: &[String], bindings: &TypeBindings) -> String {
    let mut out = base.to_owned();
    for param in type_params {
        out.push('_');
        match bindings.get(param) {
            Some(ty) => out.push_str(&ty.display()),
            None => out.push('?'),
        }
    }
    out
}

/// Binds `param` to `concrete`, warning (and keeping the first binding) on a
/// conflicting later binding.
fn bind(bindings: &mut TypeBindings, param: &str, concrete: TypeExpr, context: &str) {
    if let Some(existing) = bindings.get(param) {
        if *existing != concrete {
            tracing::warn!(
                type_param = param,
                first = %existing.display(),
                conflicting = %concrete.display(),
                context,
                "conflicting type inference; keeping the first binding"
            );
        }
        return;
    }
    bindings.insert(param.to_owned(), concrete);
}

/// Infers bindings for a generic function call.
///
/// Explicit type arguments fill parameters positionally first; remaining
/// parameters are inferred from the concrete types of the argument values in
/// slots whose declared type is a bare type parameter.
pub(crate) fn infer_function_bindings(
    def: &FunctionDef,
    explicit: &[TypeExpr],
    arg_types: &[TypeExpr],
) -> RunResult<TypeBindings> {
    let mut bindings = TypeBindings::new();
    if explicit.len() > def.type_params.len() {
        return Err(RunError::err(
            ErrorKind::TypeError,
            format!(
                "{} takes {} type argument(s), got {}",
                def.name,
                def.type_params.len(),
                explicit.len()
            ),
        ));
    }
    for (param, concrete) in def.type_params.iter().zip(explicit) {
        bindings.insert(param.clone(), concrete.clone());
    }

    for (param, arg_type) in def.params.iter().zip(arg_types) {
        if let Some(TypeExpr::Name { name, args }) = &param.ty
            && args.is_empty()
            && def.type_params.contains(name)
        {
            bind(&mut bindings, name, arg_type.clone(), &def.name);
        }
    }

    ensure_fully_bound(&def.name, &def.type_params, &bindings)?;
    Ok(bindings)
}

/// Infers bindings for a generic struct literal from its field initializers.
pub(crate) fn infer_struct_bindings(
    def: &StructDef,
    explicit: &[TypeExpr],
    field_types: &AHashMap<String, TypeExpr>,
) -> RunResult<TypeBindings> {
    let mut bindings = TypeBindings::new();
    if explicit.len() > def.type_params.len() {
        return Err(RunError::err(
            ErrorKind::TypeError,
            format!(
                "{} takes {} type argument(s), got {}",
                def.name,
                def.type_params.len(),
                explicit.len()
            ),
        ));
    }
    for (param, concrete) in def.type_params.iter().zip(explicit) {
        bindings.insert(param.clone(), concrete.clone());
    }

    for field in &def.fields {
        if let TypeExpr::Name { name, args } = &field.ty
            && args.is_empty()
            && def.type_params.contains(name)
            && let Some(field_type) = field_types.get(&field.name)
        {
            bind(&mut bindings, name, field_type.clone(), &def.name);
        }
    }

    ensure_fully_bound(&def.name, &def.type_params, &bindings)?;
    Ok(bindings)
}

fn ensure_fully_bound(base: &str, type_params: &[String], bindings: &TypeBindings) -> RunResult<()> {
    for param in type_params {
        if !bindings.contains_key(param) {
            return Err(RunError::err(
                ErrorKind::TypeInferenceError,
                format!("cannot infer type parameter {param} of {base}"),
            ));
        }
    }
    Ok(())
}

/// Produces the specialized (non-generic) form of a function definition:
/// every occurrence of a bound type parameter in the signature and body is
/// replaced by its concrete type, and the definition is renamed to the
/// mangled form.
pub(crate) fn specialize_function(def: &FunctionDef, bindings: &TypeBindings) -> FunctionDef {
    let params: Vec<Param> = def
        .params
        .iter()
        .map(|p| Param {
            name: p.name.clone(),
            ty: p.ty.as_ref().map(|ty| substitute_type(ty, bindings)),
            by_ref: p.by_ref,
        })
        .collect();
    let body: Vec<StmtLoc> = def.body.iter().map(|s| substitute_stmt(s, bindings)).collect();
    FunctionDef {
        name: mangle(&def.name, &def.type_params, bindings),
        type_params: Vec::new(),
        params,
        ret: def.ret.as_ref().map(|ty| substitute_type(ty, bindings)),
        body: std::sync::Arc::new(body),
        file: def.file.clone(),
        line: def.line,
        column: def.column,
    }
}

/// Produces and registers the specialized form of a generic struct under its
/// mangled name, reusing an existing registration when present.
pub(crate) fn specialize_struct(
    def: &StructDef,
    bindings: &TypeBindings,
    registry: &StructRegistry,
) -> RunResult<(crate::structs::StructId, std::sync::Arc<StructDef>)> {
    let mangled = mangle(&def.name, &def.type_params, bindings);
    if let Some(found) = registry.get_by_name(&mangled) {
        return Ok(found);
    }
    let specialized = StructDef {
        name: mangled.clone(),
        type_params: Vec::new(),
        fields: def
            .fields
            .iter()
            .map(|f| crate::ast::FieldDecl {
                name: f.name.clone(),
                ty: substitute_type(&f.ty, bindings),
            })
            .collect(),
        loc: def.loc,
        file: def.file.clone(),
    };
    let (id, _) = registry.register(specialized)?;
    Ok((id, registry.get(id)))
}

/// Structural substitution over a type node.
pub(crate) fn substitute_type(ty: &TypeExpr, bindings: &TypeBindings) -> TypeExpr {
    match ty {
        TypeExpr::Name { name, args } => {
            if args.is_empty()
                && let Some(bound) = bindings.get(name)
            {
                return bound.clone();
            }
            TypeExpr::Name {
                name: name.clone(),
                args: args.iter().map(|a| substitute_type(a, bindings)).collect(),
            }
        }
        TypeExpr::Nullable(inner) => TypeExpr::Nullable(Box::new(substitute_type(inner, bindings))),
        TypeExpr::Union(members) => {
            TypeExpr::Union(members.iter().map(|m| substitute_type(m, bindings)).collect())
        }
    }
}

fn substitute_stmt(stmt: &StmtLoc, bindings: &TypeBindings) -> StmtLoc {
    let inner = match &stmt.stmt {
        Stmt::Let { name, ty, init } => Stmt::Let {
            name: name.clone(),
            ty: ty.as_ref().map(|t| substitute_type(t, bindings)),
            init: init.as_ref().map(|e| substitute_expr(e, bindings)),
        },
        Stmt::Assign { target, value } => Stmt::Assign {
            target: substitute_target(target, bindings),
            value: substitute_expr(value, bindings),
        },
        Stmt::Expr(expr) => Stmt::Expr(substitute_expr(expr, bindings)),
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => Stmt::If {
            cond: substitute_expr(cond, bindings),
            then_body: then_body.iter().map(|s| substitute_stmt(s, bindings)).collect(),
            else_body: else_body
                .as_ref()
                .map(|body| body.iter().map(|s| substitute_stmt(s, bindings)).collect()),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: substitute_expr(cond, bindings),
            body: body.iter().map(|s| substitute_stmt(s, bindings)).collect(),
        },
        Stmt::For { bindings: names, iter, body } => Stmt::For {
            bindings: names.clone(),
            iter: substitute_expr(iter, bindings),
            body: body.iter().map(|s| substitute_stmt(s, bindings)).collect(),
        },
        Stmt::Break => Stmt::Break,
        Stmt::Continue => Stmt::Continue,
        Stmt::Return(value) => Stmt::Return(value.as_ref().map(|e| substitute_expr(e, bindings))),
        Stmt::Throw(value) => Stmt::Throw(substitute_expr(value, bindings)),
        Stmt::Try { body, catch, finally } => Stmt::Try {
            body: body.iter().map(|s| substitute_stmt(s, bindings)).collect(),
            catch: catch.as_ref().map(|c| crate::ast::CatchClause {
                name: c.name.clone(),
                kind: c.kind.clone(),
                body: c.body.iter().map(|s| substitute_stmt(s, bindings)).collect(),
            }),
            finally: finally
                .as_ref()
                .map(|body| body.iter().map(|s| substitute_stmt(s, bindings)).collect()),
        },
    };
    StmtLoc {
        stmt: inner,
        loc: stmt.loc,
    }
}

fn substitute_target(target: &AssignTarget, bindings: &TypeBindings) -> AssignTarget {
    match target {
        AssignTarget::Name(name) => AssignTarget::Name(name.clone()),
        AssignTarget::Member { object, name } => AssignTarget::Member {
            object: substitute_expr(object, bindings),
            name: name.clone(),
        },
        AssignTarget::Index { object, index } => AssignTarget::Index {
            object: substitute_expr(object, bindings),
            index: substitute_expr(index, bindings),
        },
    }
}

fn substitute_expr(expr: &ExprLoc, bindings: &TypeBindings) -> ExprLoc {
    let inner = match &expr.expr {
        Expr::Literal(lit) => Expr::Literal(lit.clone()),
        Expr::Name(name) => Expr::Name(name.clone()),
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(substitute_expr(left, bindings)),
            right: Box::new(substitute_expr(right, bindings)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(substitute_expr(operand, bindings)),
        },
        Expr::Range { start, end } => Expr::Range {
            start: Box::new(substitute_expr(start, bindings)),
            end: Box::new(substitute_expr(end, bindings)),
        },
        Expr::Pipeline { value, func } => Expr::Pipeline {
            value: Box::new(substitute_expr(value, bindings)),
            func: Box::new(substitute_expr(func, bindings)),
        },
        Expr::Call { callee, type_args, args } => Expr::Call {
            callee: Box::new(substitute_expr(callee, bindings)),
            type_args: type_args.iter().map(|t| substitute_type(t, bindings)).collect(),
            args: args.iter().map(|a| substitute_expr(a, bindings)).collect(),
        },
        Expr::Index { object, index } => Expr::Index {
            object: Box::new(substitute_expr(object, bindings)),
            index: Box::new(substitute_expr(index, bindings)),
        },
        Expr::Member { object, name } => Expr::Member {
            object: Box::new(substitute_expr(object, bindings)),
            name: name.clone(),
        },
        Expr::StructLit {
            module,
            name,
            type_args,
            fields,
        } => Expr::StructLit {
            module: module.clone(),
            // A struct literal naming a bare type parameter specializes to
            // the bound concrete type's name.
            name: match bindings.get(name) {
                Some(TypeExpr::Name { name: bound, args }) if args.is_empty() => bound.clone(),
                _ => name.clone(),
            },
            type_args: type_args.iter().map(|t| substitute_type(t, bindings)).collect(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), substitute_expr(v, bindings)))
                .collect(),
        },
        Expr::ListLit(items) => Expr::ListLit(items.iter().map(|i| substitute_expr(i, bindings)).collect()),
        Expr::DictLit(entries) => Expr::DictLit(
            entries
                .iter()
                .map(|(k, v)| (substitute_expr(k, bindings), substitute_expr(v, bindings)))
                .collect(),
        ),
        Expr::Block(block) => Expr::Block(block.clone()),
    };
    ExprLoc {
        expr: inner,
        loc: expr.loc,
    }
}
