// src/lib.rs
//! Parlance Compiler - arbre de script → programme bytecode
//!
//! - Entrée : `parlance_ast::Script` (un par fichier), `parlance_runtime::Library`
//! - Sortie : `parlance_core::Program` + diagnostics (le programme est rendu même partiel)
//! - Passes (trait `Pass`) : collecte des déclarations, cycles de variables smart, typage,
//!   groupes de nœuds (`when:`)
//! - Génération : un `Node` par nœud (plus un pivot par groupe), sauts avant patchés en ligne
//!
//! Features :
//! - `std` (par défaut)
//! - `tracing` (par défaut) : un span par compilation, un événement par nœud
//! - `serde` : options et diagnostics sérialisables
//!
//! API principale :
//! ```
//! use parlance_ast::{Line, NodeDecl, Script, Stmt};
//! use parlance_compiler::compile;
//! use parlance_runtime::Library;
//!
//! let script = Script {
//!     file: "intro.parl".into(),
//!     declarations: vec![],
//!     nodes: vec![NodeDecl {
//!         title: "Start".into(),
//!         body: vec![Stmt::Line(Line::text("Hello!").with_id("line:hello"))],
//!         ..NodeDecl::default()
//!     }],
//! };
//! let result = compile(&[script], &Library::with_defaults(), None);
//! assert!(!result.has_errors());
//! assert_eq!(result.program.line_text("line:hello"), Some("Hello!"));
//! ```

#![deny(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use parlance_ast as ast;
use parlance_core::{Instruction, Program};
use parlance_parser::{ExpressionParser, PResult};
use parlance_runtime::Library;
use thiserror::Error;

mod codegen;
mod declarations;
mod groups;
mod typecheck;
mod walk;

pub use codegen::{tracking_variable, ONCE_PREFIX, VISITING_PREFIX};
pub use declarations::{Declarations, VariableInfo, INTERNAL_PREFIX};
pub use groups::{NODE_GROUP_HEADER, WHEN_HEADER};

use codegen::CodeGenerator;
use declarations::{CollectDeclarations, SmartVariableCycles};
use groups::NodeGroups;
use typecheck::{TypeCheck, Typer};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options du compilateur
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompilerOptions {
    /// Warnings→erreurs pour `CompilationResult::into_result`
    pub deny_warnings: bool,
    /// Un `<<set>>` sur une variable inconnue la déclare (avec un warning)
    pub implicit_declarations: bool,
    /// Préfixe des identifiants de ligne générés (`line:` → `line:intro.parl-Start-1`)
    pub line_id_prefix: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { deny_warnings: false, implicit_declarations: false, line_id_prefix: "line:".into() }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Diagnostics */
// ─────────────────────────────────────────────────────────────────────────────

/// Gravité d’un diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Severity {
    /// Alerte
    Warning,
    /// Erreur (le programme produit est partiel)
    Error,
}

/// Un diagnostic (message, gravité, fichier et span optionnels)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostic {
    /// Gravité
    pub severity: Severity,
    /// Message humain
    pub message: String,
    /// Fichier source
    pub file: Option<String>,
    /// Localisation
    pub span: Option<ast::Span>,
}

impl Diagnostic {
    /// Construit une erreur
    pub fn error(msg: impl Into<String>, span: Option<ast::Span>) -> Self {
        Self { severity: Severity::Error, message: msg.into(), file: None, span }
    }
    /// Construit un warning
    pub fn warn(msg: impl Into<String>, span: Option<ast::Span>) -> Self {
        Self { severity: Severity::Warning, message: msg.into(), file: None, span }
    }
    /// Rattache le diagnostic à un fichier
    #[must_use]
    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}", self.message)?;
        match (&self.file, self.span) {
            (Some(file), Some(span)) => write!(f, " ({file}:{}:{})", span.line, span.column),
            (Some(file), None) => write!(f, " ({file})"),
            (None, Some(span)) => write!(f, " ({}:{})", span.line, span.column),
            (None, None) => Ok(()),
        }
    }
}

/// Échec de compilation (erreurs, ou warnings avec `deny_warnings`)
#[derive(Debug, Error)]
#[error("compilation failed with {} diagnostic(s)", .diagnostics.len())]
pub struct CompileError {
    /// Diagnostics bloquants et warnings
    pub diagnostics: Vec<Diagnostic>,
}

/// Résultat d’une compilation : programme (éventuellement partiel) + diagnostics
#[derive(Debug, Clone)]
pub struct CompilationResult {
    /// Programme produit
    pub program: Program,
    /// Diagnostics, dans l’ordre d’émission
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationResult {
    /// Vrai si au moins une erreur
    pub fn has_errors(&self) -> bool { self.diagnostics.iter().any(|d| d.severity == Severity::Error) }

    /// Diagnostics d’une gravité donnée
    pub fn of_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.severity == severity)
    }

    /// Programme, sauf erreur (ou warning si `deny_warnings`)
    pub fn into_result(self, deny_warnings: bool) -> Result<Program, CompileError> {
        let has_warnings = self.diagnostics.iter().any(|d| d.severity == Severity::Warning);
        if self.has_errors() || (deny_warnings && has_warnings) {
            return Err(CompileError { diagnostics: self.diagnostics });
        }
        Ok(self.program)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
/* Contexte & Passes */
// ─────────────────────────────────────────────────────────────────────────────

/// Contexte mut du compilateur partagé entre passes
pub(crate) struct Ctx<'a> {
    /// Options
    pub opts: &'a CompilerOptions,
    /// Fonctions et opérateurs connus
    pub library: &'a Library,
    /// Diagnostics accumulés
    pub diags: &'a mut Vec<Diagnostic>,
    /// Variables déclarées
    pub decls: &'a mut Declarations,
}

/// Trait générique d’une passe d’analyse
pub(crate) trait Pass {
    /// Exécuter la passe sur l’ensemble des scripts
    fn run(&mut self, ctx: &mut Ctx<'_>, scripts: &[ast::Script]);
}

// ─────────────────────────────────────────────────────────────────────────────
/* Compiler façade */
// ─────────────────────────────────────────────────────────────────────────────

/// Le compilateur Parlance : orchestre passes + génération
#[derive(Debug)]
pub struct Compiler<'l> {
    /// Options
    pub options: CompilerOptions,
    library: &'l Library,
}

impl<'l> Compiler<'l> {
    /// Crée un compilateur adossé à `library`
    pub const fn new(options: CompilerOptions, library: &'l Library) -> Self { Self { options, library } }

    /// Parse une expression isolée (contrôle d’arité contre la bibliothèque)
    pub fn parse_expression(&self, src: &str) -> PResult<ast::Expr> {
        ExpressionParser::new().with_signatures(self.library).parse_str(src)
    }

    /// Compile `scripts`, puis combine avec `existing` s’il est fourni
    pub fn compile(&self, scripts: &[ast::Script], existing: Option<Program>) -> CompilationResult {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("compile", scripts = scripts.len()).entered();

        let mut diags = Vec::new();
        let mut decls = existing.as_ref().map_or_else(Declarations::new, Declarations::from_program);

        // 1) Analyse : déclarations → cycles smart → typage → groupes
        let mut groups = NodeGroups::default();
        {
            let mut ctx = Ctx { opts: &self.options, library: self.library, diags: &mut diags, decls: &mut decls };
            let passes: [&mut dyn Pass; 4] =
                [&mut CollectDeclarations, &mut SmartVariableCycles, &mut TypeCheck, &mut groups];
            for pass in passes {
                pass.run(&mut ctx, scripts);
            }
        }

        // 2) Génération, nœud par nœud
        let tracked = codegen::tracked_nodes(scripts);
        let mut program = Program::new();
        program.initial_values = decls.initial_values();
        for (script_index, script) in scripts.iter().enumerate() {
            for (index, node) in script.nodes.iter().enumerate() {
                let renamed;
                let node = match groups.member(script_index, index, &node.title) {
                    Some(member) => {
                        renamed = member.rename(node);
                        &renamed
                    }
                    // signalé par la passe des groupes
                    None if groups.contains(&node.title) => continue,
                    None => node,
                };
                if program.nodes.contains_key(&node.title) {
                    diags.push(
                        Diagnostic::error(format!("duplicate node `{}`", node.title), node.span).in_file(&script.file),
                    );
                    continue;
                }
                let typer = Typer::new(&decls, self.library);
                let generated =
                    CodeGenerator::new(&script.file, &self.options, typer, &tracked, &mut program).generate(node);
                match generated.and_then(|n| program.insert_node(n)) {
                    Ok(()) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(node = %node.title, "node compiled");
                    }
                    Err(e) => diags.push(Diagnostic::error(e.to_string(), node.span).in_file(&script.file)),
                }
            }
        }

        for (title, members) in groups.iter() {
            let Some(first) = members.first() else { continue };
            let file = &scripts[first.script].file;
            let typer = Typer::new(&decls, self.library);
            let generated =
                CodeGenerator::new(file, &self.options, typer, &tracked, &mut program).generate_group(title, members);
            match generated.and_then(|n| program.insert_node(n)) {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(group = %title, members = members.len(), "node group compiled");
                }
                Err(e) => diags.push(Diagnostic::error(e.to_string(), first.span).in_file(file)),
            }
        }

        // 3) Cibles de saut connues ?
        check_jump_targets(&program, existing.as_ref(), &mut diags);

        // 4) Combinaison avec un programme existant
        let program = match existing {
            None => program,
            Some(mut base) => match base.merge(program.clone()) {
                Ok(()) => base,
                Err(e) => {
                    diags.push(Diagnostic::error(e.to_string(), None));
                    program
                }
            },
        };

        #[cfg(feature = "tracing")]
        tracing::info!(nodes = program.nodes.len(), diagnostics = diags.len(), "compilation finished");

        CompilationResult { program, diagnostics: diags }
    }
}

/// Compile avec les options par défaut
pub fn compile(scripts: &[ast::Script], library: &Library, existing: Option<Program>) -> CompilationResult {
    Compiler::new(CompilerOptions::default(), library).compile(scripts, existing)
}

fn check_jump_targets(program: &Program, existing: Option<&Program>, diags: &mut Vec<Diagnostic>) {
    let known = |name: &str| program.nodes.contains_key(name) || existing.is_some_and(|p| p.nodes.contains_key(name));
    let mut reported = BTreeSet::new();
    for node in program.nodes.values() {
        for instruction in &node.instructions {
            if let Instruction::RunNode { name } | Instruction::DetourToNode { name } = instruction {
                if !known(name) && reported.insert(name.as_str()) {
                    let d = Diagnostic::warn(format!("`{}` jumps to unknown node `{name}`", node.name), None);
                    diags.push(match &node.source_file {
                        Some(file) => d.in_file(file),
                        None => d,
                    });
                }
            }
        }
    }
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Réexports utiles.
pub mod prelude {
    pub use crate::{
        compile, CompilationResult, CompileError, Compiler, CompilerOptions, Declarations, Diagnostic, Severity,
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests;
