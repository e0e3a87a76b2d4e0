//! Table des variables déclarées et passes de collecte.
//!
//! - `CollectDeclarations` : `<<declare>>` de haut niveau et dans les nœuds,
//!   puis déclarations implicites (option `implicit_declarations`)
//! - `SmartVariableCycles` : refuse les variables smart récursives

use std::collections::{BTreeMap, BTreeSet};

use parlance_ast::{Declaration, Expr, Literal, Span, Stmt, TypeName, UnaryOp};
use parlance_core::{Constant, Program, ValueType};

use crate::typecheck::Typer;
use crate::{walk, Ctx, Diagnostic, Pass};

/// Préfixe réservé aux variables générées par le compilateur.
pub const INTERNAL_PREFIX: &str = "$Parlance.Internal.";

/// Fichier attribué aux variables reprises d’un programme existant.
const EXISTING_PROGRAM: &str = "<existing program>";

/* ─────────────────────────── Table ─────────────────────────── */

/// Informations sur une variable déclarée.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    /// Nom, avec son `$`.
    pub name: String,
    /// Type statique (`Any` pour une variable smart non annotée : déduit de son expression).
    pub ty: ValueType,
    /// Valeur initiale (absente pour une variable smart).
    pub initial: Option<Constant>,
    /// Expression substituée à chaque lecture d’une variable smart.
    pub smart: Option<Expr>,
    /// Fichier de la déclaration.
    pub file: String,
    /// Localisation de la déclaration.
    pub span: Option<Span>,
    /// Déclarée implicitement par un `<<set>>`.
    pub implicit: bool,
}

impl VariableInfo {
    /// Reprise d’un programme existant (`Declarations::from_program`).
    pub fn is_inherited(&self) -> bool { self.file == EXISTING_PROGRAM }
}

/// Table des variables (nom → infos), triée par nom.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    vars: BTreeMap<String, VariableInfo>,
}

impl Declarations {
    /// Table vide.
    pub fn new() -> Self { Self::default() }

    /// Infos de `name`.
    pub fn get(&self, name: &str) -> Option<&VariableInfo> { self.vars.get(name) }

    /// Vrai si `name` est déclarée.
    pub fn contains(&self, name: &str) -> bool { self.vars.contains_key(name) }

    /// Itère sur les variables, par nom.
    pub fn iter(&self) -> impl Iterator<Item = &VariableInfo> { self.vars.values() }

    /// Nombre de variables.
    pub fn len(&self) -> usize { self.vars.len() }

    /// Vrai si aucune variable.
    pub fn is_empty(&self) -> bool { self.vars.is_empty() }

    /// Ajoute `info` ; rend l’existante si le nom est déjà pris.
    ///
    /// Redéclarer à l’identique une variable d’un programme existant est accepté.
    pub fn declare(&mut self, info: VariableInfo) -> Result<(), &VariableInfo> {
        let same_as_inherited = self
            .vars
            .get(&info.name)
            .map(|existing| existing.is_inherited() && info.smart.is_none() && existing.initial == info.initial);
        if same_as_inherited == Some(false) {
            return Err(&self.vars[&info.name]);
        }
        self.vars.insert(info.name.clone(), info);
        Ok(())
    }

    /// Variables d’un programme déjà compilé, typées par leur valeur initiale.
    ///
    /// Les variables internes (gardes, compteurs) sont ignorées.
    pub fn from_program(program: &Program) -> Self {
        let vars = program
            .initial_values
            .iter()
            .filter(|(name, _)| !name.starts_with(INTERNAL_PREFIX))
            .map(|(name, value)| {
                let info = VariableInfo {
                    name: name.clone(),
                    ty: value.value_type(),
                    initial: Some(value.clone()),
                    smart: None,
                    file: EXISTING_PROGRAM.to_owned(),
                    span: None,
                    implicit: false,
                };
                (name.clone(), info)
            })
            .collect();
        Self { vars }
    }

    /// Valeurs initiales des variables ordinaires.
    pub fn initial_values(&self) -> BTreeMap<String, Constant> {
        self.vars.values().filter_map(|v| v.initial.clone().map(|c| (v.name.clone(), c))).collect()
    }
}

/// Type nommé → type statique.
pub(crate) const fn value_type(name: TypeName) -> ValueType {
    match name {
        TypeName::Number => ValueType::Number,
        TypeName::String => ValueType::String,
        TypeName::Bool => ValueType::Bool,
    }
}

/// Valeur constante d’une expression d’initialisation (`-3` accepté).
pub(crate) fn constant_value(expr: &Expr) -> Option<Constant> {
    match expr {
        Expr::Literal(Literal::Number(n)) => Some(Constant::Number(*n)),
        Expr::Literal(Literal::Bool(b)) => Some(Constant::Bool(*b)),
        Expr::Literal(Literal::Str(s)) => Some(Constant::Str(s.clone())),
        Expr::Literal(Literal::Null) => Some(Constant::Null),
        Expr::Unary { op: UnaryOp::Neg, expr } => match constant_value(expr)? {
            Constant::Number(n) => Some(Constant::Number(-n)),
            _ => None,
        },
        _ => None,
    }
}

/// Valeur par défaut d’un type (déclarations implicites).
const fn default_value(ty: ValueType) -> Option<Constant> {
    match ty {
        ValueType::Number => Some(Constant::Number(0.0)),
        ValueType::String => Some(Constant::Str(String::new())),
        ValueType::Bool => Some(Constant::Bool(false)),
        ValueType::Any => None,
    }
}

/* ─────────────────────────── Passe : collecte ─────────────────────────── */

pub(crate) struct CollectDeclarations;

impl CollectDeclarations {
    fn declare(ctx: &mut Ctx<'_>, file: &str, decl: &Declaration) {
        if decl.name.starts_with(INTERNAL_PREFIX) {
            ctx.diags.push(Diagnostic::error(format!("`{}` uses a reserved name", decl.name), decl.span).in_file(file));
            return;
        }

        let declared = decl.ty.map(value_type);
        let info = if decl.smart {
            VariableInfo {
                name: decl.name.clone(),
                ty: declared.unwrap_or(ValueType::Any),
                initial: None,
                smart: Some(decl.value.clone()),
                file: file.to_owned(),
                span: decl.span,
                implicit: false,
            }
        } else {
            let Some(initial) = constant_value(&decl.value) else {
                ctx.diags.push(
                    Diagnostic::error(format!("initial value of `{}` must be a constant", decl.name), decl.span)
                        .in_file(file),
                );
                return;
            };
            let ty = match (declared, initial.value_type()) {
                (_, ValueType::Any) => {
                    ctx.diags.push(
                        Diagnostic::error(format!("`{}` cannot be initialised with `null`", decl.name), decl.span)
                            .in_file(file),
                    );
                    return;
                }
                (Some(d), found) if d != found => {
                    ctx.diags.push(
                        Diagnostic::error(
                            format!("`{}` is declared as {d} but initialised with a {found}", decl.name),
                            decl.span,
                        )
                        .in_file(file),
                    );
                    return;
                }
                (_, found) => found,
            };
            VariableInfo {
                name: decl.name.clone(),
                ty,
                initial: Some(initial),
                smart: None,
                file: file.to_owned(),
                span: decl.span,
                implicit: false,
            }
        };

        if let Err(existing) = ctx.decls.declare(info) {
            let message = if existing.is_inherited() {
                format!("conflicting declarations for `{}`", decl.name)
            } else {
                format!("`{}` is already declared in {}", decl.name, existing.file)
            };
            ctx.diags.push(Diagnostic::error(message, decl.span).in_file(file));
        }
    }

    fn declare_implicit(ctx: &mut Ctx<'_>, file: &str, variable: &str, value: &Expr, span: Option<Span>) {
        let ty = Typer::new(ctx.decls, ctx.library).type_of(value);
        let Some(initial) = default_value(ty) else {
            ctx.diags.push(
                Diagnostic::error(format!("cannot infer the type of undeclared `{variable}`"), span).in_file(file),
            );
            return;
        };
        ctx.diags.push(
            Diagnostic::warn(format!("`{variable}` is not declared; declaring it implicitly as {ty}"), span).in_file(file),
        );
        let info = VariableInfo {
            name: variable.to_owned(),
            ty,
            initial: Some(initial),
            smart: None,
            file: file.to_owned(),
            span,
            implicit: true,
        };
        // absente : vérifié par l’appelant
        let _ = ctx.decls.declare(info);
    }
}

impl Pass for CollectDeclarations {
    fn run(&mut self, ctx: &mut Ctx<'_>, scripts: &[parlance_ast::Script]) {
        for script in scripts {
            for decl in &script.declarations {
                Self::declare(ctx, &script.file, decl);
            }
            for node in &script.nodes {
                walk::statements(&node.body, &mut |stmt| {
                    if let Stmt::Declare(decl) = stmt {
                        Self::declare(ctx, &script.file, decl);
                    }
                });
            }
        }

        if !ctx.opts.implicit_declarations {
            return;
        }
        for script in scripts {
            for node in &script.nodes {
                walk::statements(&node.body, &mut |stmt| {
                    if let Stmt::Set { variable, value, span, .. } = stmt {
                        if !ctx.decls.contains(variable) {
                            Self::declare_implicit(ctx, &script.file, variable, value, *span);
                        }
                    }
                });
            }
        }
    }
}

/* ─────────────────────────── Passe : variables smart ─────────────────────────── */

pub(crate) struct SmartVariableCycles;

impl SmartVariableCycles {
    /// Variables smart directement lues par l’expression de `name`.
    fn dependencies<'d>(decls: &'d Declarations, name: &str) -> Vec<&'d str> {
        let mut out = Vec::new();
        if let Some(expr) = decls.get(name).and_then(|v| v.smart.as_ref()) {
            walk::subexpressions(expr, &mut |e| {
                if let Expr::Variable(v) = e {
                    if let Some(info) = decls.get(v).filter(|i| i.smart.is_some()) {
                        out.push(info.name.as_str());
                    }
                }
            });
        }
        out
    }

    fn reaches_itself(decls: &Declarations, start: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut todo = Self::dependencies(decls, start);
        while let Some(name) = todo.pop() {
            if name == start {
                return true;
            }
            if seen.insert(name) {
                todo.extend(Self::dependencies(decls, name));
            }
        }
        false
    }
}

impl Pass for SmartVariableCycles {
    fn run(&mut self, ctx: &mut Ctx<'_>, _scripts: &[parlance_ast::Script]) {
        let decls: &Declarations = ctx.decls;
        let recursive: Vec<(String, String, Option<Span>)> = decls
            .iter()
            .filter(|v| v.smart.is_some() && Self::reaches_itself(decls, &v.name))
            .map(|v| (v.name.clone(), v.file.clone(), v.span))
            .collect();
        for (name, file, span) in recursive {
            ctx.diags.push(Diagnostic::error(format!("smart variable `{name}` refers to itself"), span).in_file(&file));
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompilerOptions, Severity};
    use parlance_ast::{AssignOp, BinaryOp, NodeDecl, Script};
    use parlance_runtime::Library;
    use pretty_assertions::assert_eq;

    fn decl(name: &str, value: Expr) -> Declaration {
        Declaration { name: name.into(), ty: None, value, smart: false, span: None }
    }

    fn smart(name: &str, value: Expr) -> Declaration {
        Declaration { smart: true, ..decl(name, value) }
    }

    fn run(scripts: &[Script], opts: &CompilerOptions) -> (Declarations, Vec<Diagnostic>) {
        let library = Library::with_defaults();
        let mut decls = Declarations::new();
        let mut diags = Vec::new();
        let mut ctx = Ctx { opts, library: &library, diags: &mut diags, decls: &mut decls };
        CollectDeclarations.run(&mut ctx, scripts);
        SmartVariableCycles.run(&mut ctx, scripts);
        (decls, diags)
    }

    fn script(declarations: Vec<Declaration>, body: Vec<Stmt>) -> Script {
        Script {
            file: "intro.parl".into(),
            declarations,
            nodes: vec![NodeDecl { title: "Start".into(), body, ..NodeDecl::default() }],
        }
    }

    #[test]
    fn collects_top_level_and_nested_declarations() {
        let nested = Stmt::Declare(decl("$name", Expr::string("Ada")));
        let s = script(vec![decl("$gold", Expr::unary(UnaryOp::Neg, Expr::number(3.0)))], vec![nested]);
        let (decls, diags) = run(&[s], &CompilerOptions::default());
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(decls.get("$gold").map(|v| v.ty), Some(ValueType::Number));
        assert_eq!(decls.initial_values().get("$gold"), Some(&Constant::Number(-3.0)));
        assert_eq!(decls.get("$name").map(|v| v.ty), Some(ValueType::String));
    }

    #[test]
    fn duplicate_and_mistyped_declarations_are_errors() {
        let mut typed = decl("$flag", Expr::number(1.0));
        typed.ty = Some(TypeName::Bool);
        let s = script(vec![decl("$gold", Expr::number(0.0)), decl("$gold", Expr::number(1.0)), typed], vec![]);
        let (decls, diags) = run(&[s], &CompilerOptions::default());
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.severity == Severity::Error));
        assert!(diags[0].message.contains("already declared"));
        assert!(!decls.contains("$flag"));
    }

    #[test]
    fn non_constant_initial_value_is_rejected() {
        let s = script(vec![decl("$x", Expr::binary(Expr::number(1.0), BinaryOp::Add, Expr::number(2.0)))], vec![]);
        let (_, diags) = run(&[s], &CompilerOptions::default());
        assert!(diags[0].message.contains("must be a constant"));
    }

    #[test]
    fn recursive_smart_variables_are_reported() {
        let s = script(
            vec![
                smart("$a", Expr::binary(Expr::var("$b"), BinaryOp::Add, Expr::number(1.0))),
                smart("$b", Expr::var("$a")),
                smart("$ok", Expr::var("$gold")),
                decl("$gold", Expr::number(0.0)),
            ],
            vec![],
        );
        let (_, diags) = run(&[s], &CompilerOptions::default());
        let names: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            names,
            vec!["smart variable `$a` refers to itself", "smart variable `$b` refers to itself"]
        );
    }

    #[test]
    fn implicit_declarations_follow_the_option() {
        let set = Stmt::Set { variable: "$seen".into(), op: AssignOp::Assign, value: Expr::bool(true), span: None };
        let s = script(vec![], vec![set]);

        let (decls, _) = run(std::slice::from_ref(&s), &CompilerOptions::default());
        assert!(!decls.contains("$seen"));

        let opts = CompilerOptions { implicit_declarations: true, ..CompilerOptions::default() };
        let (decls, diags) = run(&[s], &opts);
        assert_eq!(decls.get("$seen").map(|v| (v.ty, v.implicit)), Some((ValueType::Bool, true)));
        assert_eq!(diags[0].severity, Severity::Warning);
    }
}
