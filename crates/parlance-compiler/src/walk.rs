//! Parcours génériques de l’arbre (statements imbriqués, expressions).

use parlance_ast::{Expr, Line, LineCondition, NodeTarget, Span, Stmt, TextPart};

/// Appelle `f` sur chaque statement, en profondeur, dans l’ordre source.
pub(crate) fn statements<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
    for stmt in stmts {
        f(stmt);
        for child in nested(stmt) {
            statements(child, f);
        }
    }
}

/// Blocs directement imbriqués dans `stmt`.
pub(crate) fn nested(stmt: &Stmt) -> Vec<&[Stmt]> {
    match stmt {
        Stmt::If { clauses, .. } => clauses.iter().map(|c| c.body.as_slice()).collect(),
        Stmt::Options { options, .. } => options.iter().map(|o| o.body.as_slice()).collect(),
        Stmt::LineGroup { items, .. } => items.iter().map(|i| i.body.as_slice()).collect(),
        Stmt::Once { body, alternate, .. } => {
            let mut blocks = vec![body.as_slice()];
            if let Some(alt) = alternate {
                blocks.push(alt.as_slice());
            }
            blocks
        }
        _ => Vec::new(),
    }
}

/// Expressions portées par `stmt` lui-même (pas par ses blocs imbriqués).
pub(crate) fn expressions<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Expr)) {
    match stmt {
        Stmt::Line(line) => line_expressions(line, f),
        Stmt::If { clauses, .. } => clauses.iter().filter_map(|c| c.condition.as_ref()).for_each(f),
        Stmt::Options { options, .. } => options.iter().for_each(|o| line_expressions(&o.line, f)),
        Stmt::LineGroup { items, .. } => items.iter().for_each(|i| line_expressions(&i.line, f)),
        Stmt::Once { condition, .. } => condition.iter().for_each(f),
        Stmt::Set { value, .. } => f(value),
        Stmt::Call { args, .. } => args.iter().for_each(f),
        Stmt::Command { parts, .. } => text_expressions(parts, f),
        Stmt::Jump { target: NodeTarget::Expr(e), .. } | Stmt::Detour { target: NodeTarget::Expr(e), .. } => f(e),
        Stmt::Declare(decl) => f(&decl.value),
        Stmt::Jump { .. } | Stmt::Detour { .. } | Stmt::Return { .. } => {}
    }
}

fn line_expressions<'a>(line: &'a Line, f: &mut impl FnMut(&'a Expr)) {
    match &line.condition {
        Some(LineCondition::If(e) | LineCondition::Once(Some(e))) => f(e),
        Some(LineCondition::Once(None)) | None => {}
    }
    text_expressions(&line.text, f);
}

fn text_expressions<'a>(parts: &'a [TextPart], f: &mut impl FnMut(&'a Expr)) {
    for part in parts {
        if let TextPart::Expr(e) = part {
            f(e);
        }
    }
}

/// Appelle `f` sur `expr` et chacune de ses sous-expressions.
pub(crate) fn subexpressions<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match expr {
        Expr::Call { args, .. } => args.iter().for_each(|a| subexpressions(a, f)),
        Expr::Binary { left, right, .. } => {
            subexpressions(left, f);
            subexpressions(right, f);
        }
        Expr::Unary { expr, .. } => subexpressions(expr, f),
        Expr::Literal(_) | Expr::Variable(_) => {}
    }
}

/// Localisation d’un statement, si connue.
pub(crate) fn span_of(stmt: &Stmt) -> Option<Span> {
    match stmt {
        Stmt::Line(line) => line.span,
        Stmt::Declare(decl) => decl.span,
        Stmt::If { span, .. }
        | Stmt::Options { span, .. }
        | Stmt::LineGroup { span, .. }
        | Stmt::Once { span, .. }
        | Stmt::Set { span, .. }
        | Stmt::Call { span, .. }
        | Stmt::Command { span, .. }
        | Stmt::Jump { span, .. }
        | Stmt::Detour { span, .. }
        | Stmt::Return { span } => *span,
    }
}
