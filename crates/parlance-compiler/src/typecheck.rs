//! Typage statique des expressions et passe de vérification.
//!
//! `Typer` déduit le type d’une expression (littéraux, déclarations, types de
//! retour de la bibliothèque) et nomme la fonction d’un opérateur
//! (`Number.Add`, `Bool.Not`…). `TypeCheck` parcourt chaque nœud et signale :
//! variable non déclarée, fonction inconnue, arité, opérandes incompatibles,
//! opérateur sans implémentation, condition non booléenne, affectation d’une
//! variable smart.

use parlance_ast::{BinaryOp, Expr, Line, LineCondition, Literal, NodeTarget, Span, Stmt, UnaryOp};
use parlance_core::{Signatures, ValueType};
use parlance_runtime::{operator_function, Library};

use crate::declarations::Declarations;
use crate::{walk, Ctx, Diagnostic, Pass};

/// Garde-fou contre les variables smart récursives (signalées ailleurs).
const MAX_SMART_DEPTH: usize = 32;

/* ─────────────────────────── Typer ─────────────────────────── */

/// Inférence de types en lecture seule.
#[derive(Clone, Copy)]
pub(crate) struct Typer<'a> {
    decls: &'a Declarations,
    library: &'a Library,
}

impl<'a> Typer<'a> {
    pub(crate) const fn new(decls: &'a Declarations, library: &'a Library) -> Self { Self { decls, library } }

    /// Type statique de `expr` (`Any` si inconnu).
    pub(crate) fn type_of(&self, expr: &Expr) -> ValueType { self.infer(expr, 0) }

    fn infer(&self, expr: &Expr, depth: usize) -> ValueType {
        match expr {
            Expr::Literal(Literal::Number(_)) => ValueType::Number,
            Expr::Literal(Literal::Str(_)) => ValueType::String,
            Expr::Literal(Literal::Bool(_)) => ValueType::Bool,
            Expr::Literal(Literal::Null) => ValueType::Any,
            Expr::Variable(name) => match self.decls.get(name) {
                Some(info) if info.ty != ValueType::Any => info.ty,
                Some(info) => match &info.smart {
                    Some(smart) if depth < MAX_SMART_DEPTH => self.infer(smart, depth + 1),
                    _ => ValueType::Any,
                },
                None => ValueType::Any,
            },
            Expr::Call { name, .. } => self.library.return_type_of(name).unwrap_or(ValueType::Any),
            Expr::Binary { left, op, right } => {
                if op.is_boolean() {
                    ValueType::Bool
                } else {
                    operand_type(self.infer(left, depth), self.infer(right, depth), ValueType::Number)
                }
            }
            Expr::Unary { op: UnaryOp::Neg, .. } => ValueType::Number,
            Expr::Unary { op: UnaryOp::Not, .. } => ValueType::Bool,
        }
    }

    /// Expression substituée à `name` si c’est une variable smart.
    pub(crate) fn smart_expression(&self, name: &str) -> Option<&'a Expr> {
        let decls: &'a Declarations = self.decls;
        decls.get(name).and_then(|v| v.smart.as_ref())
    }

    /// Type sur lequel un opérateur binaire est résolu.
    pub(crate) fn binary_operand_type(&self, left: &Expr, op: BinaryOp, right: &Expr) -> ValueType {
        let fallback = match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => ValueType::Bool,
            _ => ValueType::Number,
        };
        operand_type(self.type_of(left), self.type_of(right), fallback)
    }

    /// Nom de la fonction implémentant `left op right`.
    pub(crate) fn binary_function(&self, left: &Expr, op: BinaryOp, right: &Expr) -> String {
        operator_function(self.binary_operand_type(left, op, right), op.function_suffix())
    }

    /// Type sur lequel un opérateur unaire est résolu.
    pub(crate) fn unary_operand_type(&self, op: UnaryOp, operand: &Expr) -> ValueType {
        let fallback = match op {
            UnaryOp::Neg => ValueType::Number,
            UnaryOp::Not => ValueType::Bool,
        };
        operand_type(self.type_of(operand), ValueType::Any, fallback)
    }

    /// Nom de la fonction implémentant `op operand`.
    pub(crate) fn unary_function(&self, op: UnaryOp, operand: &Expr) -> String {
        operator_function(self.unary_operand_type(op, operand), op.function_suffix())
    }
}

/// Type de l’opérande gauche, sinon de la droite, sinon `fallback`.
const fn operand_type(left: ValueType, right: ValueType, fallback: ValueType) -> ValueType {
    match (left, right) {
        (ValueType::Any, ValueType::Any) => fallback,
        (ValueType::Any, known) | (known, _) => known,
    }
}

/* ─────────────────────────── Passe : vérification ─────────────────────────── */

pub(crate) struct TypeCheck;

struct Checker<'c, 'x> {
    ctx: &'c mut Ctx<'x>,
    file: &'c str,
    span: Option<Span>,
}

impl Checker<'_, '_> {
    fn error(&mut self, message: String) {
        let d = Diagnostic::error(message, self.span).in_file(self.file);
        self.ctx.diags.push(d);
    }

    fn typer(&self) -> Typer<'_> { Typer::new(self.ctx.decls, self.ctx.library) }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Variable(name) => {
                if !self.ctx.decls.contains(name) {
                    self.error(format!("undeclared variable `{name}`"));
                }
            }
            Expr::Call { name, args } => {
                match self.ctx.library.lookup(name) {
                    None => self.error(format!("unknown function `{name}`")),
                    Some(entry) if !entry.arity.accepts(args.len()) => {
                        let message = format!("`{name}` expects {} argument(s), got {}", entry.arity, args.len());
                        self.error(message);
                    }
                    Some(_) => {}
                }
                args.iter().for_each(|a| self.expr(a));
            }
            Expr::Binary { left, op, right } => {
                self.expr(left);
                self.expr(right);
                let typer = self.typer();
                let (lt, rt) = (typer.type_of(left), typer.type_of(right));
                let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
                if lt != ValueType::Any && rt != ValueType::Any && lt != rt && !equality {
                    self.error(format!("operands of `{}` have different types ({lt}, {rt})", op.symbol()));
                    return;
                }
                let ty = typer.binary_operand_type(left, *op, right);
                if !equality && !self.ctx.library.contains(&operator_function(ty, op.function_suffix())) {
                    self.error(format!("operator `{}` is not defined for {ty}", op.symbol()));
                }
            }
            Expr::Unary { op, expr } => {
                self.expr(expr);
                let ty = self.typer().unary_operand_type(*op, expr);
                if !self.ctx.library.contains(&operator_function(ty, op.function_suffix())) {
                    self.error(format!("operator `{}` is not defined for {ty}", op.symbol().trim()));
                }
            }
        }
    }

    fn condition(&mut self, expr: &Expr) {
        self.expr(expr);
        let ty = self.typer().type_of(expr);
        if ty != ValueType::Any && ty != ValueType::Bool {
            self.error(format!("condition `{expr}` must be a Bool, found {ty}"));
        }
    }

    fn line(&mut self, line: &Line) {
        if line.span.is_some() {
            self.span = line.span;
        }
        match &line.condition {
            Some(LineCondition::If(e) | LineCondition::Once(Some(e))) => self.condition(e),
            Some(LineCondition::Once(None)) | None => {}
        }
        for part in &line.text {
            if let parlance_ast::TextPart::Expr(e) = part {
                self.expr(e);
            }
        }
    }

    fn statement(&mut self, stmt: &Stmt) {
        self.span = walk::span_of(stmt);
        match stmt {
            Stmt::Line(line) => self.line(line),
            Stmt::If { clauses, .. } => clauses.iter().filter_map(|c| c.condition.as_ref()).for_each(|c| self.condition(c)),
            Stmt::Options { options, .. } => options.iter().for_each(|o| self.line(&o.line)),
            Stmt::LineGroup { items, .. } => items.iter().for_each(|i| self.line(&i.line)),
            Stmt::Once { condition, .. } => condition.iter().for_each(|c| self.condition(c)),
            Stmt::Set { variable, op, value, .. } => self.set(variable, op.binary(), value),
            Stmt::Call { name, args, .. } => self.expr(&Expr::call(name.clone(), args.clone())),
            Stmt::Command { parts, .. } => {
                for part in parts {
                    if let parlance_ast::TextPart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Stmt::Jump { target: NodeTarget::Expr(e), .. } | Stmt::Detour { target: NodeTarget::Expr(e), .. } => {
                self.expr(e);
                let ty = self.typer().type_of(e);
                if ty != ValueType::Any && ty != ValueType::String {
                    self.error(format!("node name `{e}` must be a String, found {ty}"));
                }
            }
            Stmt::Jump { .. } | Stmt::Detour { .. } | Stmt::Return { .. } | Stmt::Declare(_) => {}
        }
    }

    fn set(&mut self, variable: &str, compound: Option<BinaryOp>, value: &Expr) {
        let Some(info) = self.ctx.decls.get(variable) else {
            self.error(format!("undeclared variable `{variable}`"));
            self.expr(value);
            return;
        };
        if info.smart.is_some() {
            self.error(format!("cannot assign to smart variable `{variable}`"));
            return;
        }
        let declared = info.ty;
        let value = match compound {
            Some(op) => Expr::binary(Expr::var(variable), op, value.clone()),
            None => value.clone(),
        };
        let errors = self.ctx.diags.len();
        self.expr(&value);
        let found = self.typer().type_of(&value);
        if self.ctx.diags.len() == errors && found != ValueType::Any && found != declared {
            self.error(format!("cannot assign a {found} to `{variable}` ({declared})"));
        }
    }
}

/// Vérifie une condition hors d’un corps de nœud (en-têtes `when:`).
pub(crate) fn check_condition(ctx: &mut Ctx<'_>, file: &str, span: Option<Span>, expr: &Expr) {
    Checker { ctx, file, span }.condition(expr);
}

impl Pass for TypeCheck {
    fn run(&mut self, ctx: &mut Ctx<'_>, scripts: &[parlance_ast::Script]) {
        let smart: Vec<(Expr, String, Option<Span>)> = ctx
            .decls
            .iter()
            .filter_map(|v| v.smart.clone().map(|e| (e, v.file.clone(), v.span)))
            .collect();
        for (expr, file, span) in &smart {
            Checker { ctx: &mut *ctx, file, span: *span }.expr(expr);
        }

        for script in scripts {
            for node in &script.nodes {
                #[cfg(feature = "tracing")]
                tracing::trace!(node = %node.title, "type check");
                let mut checker = Checker { ctx: &mut *ctx, file: &script.file, span: node.span };
                walk::statements(&node.body, &mut |stmt| checker.statement(stmt));
            }
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declarations::VariableInfo;
    use crate::CompilerOptions;
    use parlance_ast::{AssignOp, NodeDecl, Script};
    use parlance_core::Constant;
    use pretty_assertions::assert_eq;

    fn decls() -> Declarations {
        let mut d = Declarations::new();
        for (name, ty, initial) in [
            ("$gold", ValueType::Number, Constant::Number(0.0)),
            ("$name", ValueType::String, Constant::Str(String::new())),
            ("$met", ValueType::Bool, Constant::Bool(false)),
        ] {
            let info = VariableInfo {
                name: name.into(),
                ty,
                initial: Some(initial),
                smart: None,
                file: "intro.parl".into(),
                span: None,
                implicit: false,
            };
            d.declare(info).unwrap();
        }
        let rich = VariableInfo {
            name: "$rich".into(),
            ty: ValueType::Any,
            initial: None,
            smart: Some(Expr::binary(Expr::var("$gold"), BinaryOp::Gt, Expr::number(10.0))),
            file: "intro.parl".into(),
            span: None,
            implicit: false,
        };
        d.declare(rich).unwrap();
        d
    }

    fn check(body: Vec<Stmt>) -> Vec<String> {
        let library = Library::with_defaults();
        let mut decls = decls();
        let mut diags = Vec::new();
        let opts = CompilerOptions::default();
        let script = Script {
            file: "intro.parl".into(),
            declarations: vec![],
            nodes: vec![NodeDecl { title: "Start".into(), body, ..NodeDecl::default() }],
        };
        let mut ctx = Ctx { opts: &opts, library: &library, diags: &mut diags, decls: &mut decls };
        TypeCheck.run(&mut ctx, &[script]);
        diags.into_iter().map(|d| d.message).collect()
    }

    fn set(variable: &str, op: AssignOp, value: Expr) -> Stmt {
        Stmt::Set { variable: variable.into(), op, value, span: None }
    }

    #[test]
    fn operator_names_follow_operand_types() {
        let library = Library::with_defaults();
        let d = decls();
        let t = Typer::new(&d, &library);
        let concat = (Expr::var("$name"), Expr::string("!"));
        assert_eq!(t.binary_function(&concat.0, BinaryOp::Add, &concat.1), "String.Add");
        assert_eq!(t.binary_function(&Expr::number(1.0), BinaryOp::Lt, &Expr::var("$gold")), "Number.LessThan");
        assert_eq!(t.binary_function(&Expr::Literal(Literal::Null), BinaryOp::Eq, &Expr::bool(true)), "Bool.EqualTo");
        assert_eq!(t.unary_function(UnaryOp::Not, &Expr::var("$met")), "Bool.Not");
        assert_eq!(t.type_of(&Expr::var("$rich")), ValueType::Bool);
        assert_eq!(t.type_of(&Expr::call("round", vec![Expr::number(1.5)])), ValueType::Number);
    }

    #[test]
    fn well_typed_statements_pass() {
        let body = vec![
            set("$gold", AssignOp::Add, Expr::number(5.0)),
            set("$name", AssignOp::Assign, Expr::binary(Expr::string("Ada"), BinaryOp::Add, Expr::string("!"))),
            Stmt::If {
                clauses: vec![parlance_ast::IfClause { condition: Some(Expr::var("$rich")), body: vec![] }],
                span: None,
            },
        ];
        assert_eq!(check(body), Vec::<String>::new());
    }

    #[test]
    fn reports_type_and_name_errors() {
        let body = vec![
            set("$gold", AssignOp::Assign, Expr::string("lots")),
            set("$nope", AssignOp::Assign, Expr::number(1.0)),
            set("$rich", AssignOp::Assign, Expr::bool(true)),
            set("$name", AssignOp::Sub, Expr::string("x")),
            Stmt::Call { name: "frobnicate".into(), args: vec![], span: None },
            Stmt::Call { name: "round".into(), args: vec![], span: None },
            Stmt::Once { condition: Some(Expr::var("$gold")), body: vec![], alternate: None, span: None },
            Stmt::Line(parlance_ast::Line {
                text: vec![parlance_ast::TextPart::Expr(Expr::binary(Expr::var("$gold"), BinaryOp::Add, Expr::var("$name")))],
                ..parlance_ast::Line::default()
            }),
        ];
        assert_eq!(
            check(body),
            vec![
                "cannot assign a String to `$gold` (Number)",
                "undeclared variable `$nope`",
                "cannot assign to smart variable `$rich`",
                "operator `-` is not defined for String",
                "unknown function `frobnicate`",
                "`round` expects 1 argument(s), got 0",
                "condition `$gold` must be a Bool, found Number",
                "operands of `+` have different types (Number, String)",
            ]
        );
    }
}
