// src/lib.rs
//! Parlance AST (arbre syntaxique)
//!
//! Ce crate définit l’arbre d’un script de dialogue tel que produit par la
//! grammaire externe, avant la génération de bytecode.
//!
//! - Consommé par `parlance-compiler`, produit par `parlance-parser` pour les expressions
//! - Inclut `Span` pour localisation (ligne, colonne, offset)
//! - No_std compatible (optionnel)
//!
//! # Features
//! - `std` (par défaut)
//! - `serde` : permet de charger un arbre depuis JSON (CLI)
//!
//! # Exemple
//! ```rust
//! use parlance_ast::{BinaryOp, Expr};
//!
//! let e = Expr::binary(Expr::number(1.0), BinaryOp::Add, Expr::var("$gold"));
//! assert_eq!(e.to_string(), "(1 + $gold)");
//! ```

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

// ─── alloc uniquement en no_std ───
#[cfg(not(feature = "std"))]
extern crate alloc;

// ─── Imports conditionnels ───
#[cfg(feature = "std")]
use std::{boxed::Box, string::String, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::String, vec::Vec};

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Localisation dans le code source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Ligne de début (1-based)
    pub line: u32,
    /// Colonne de début (1-based)
    pub column: u32,
    /// Offset en bytes depuis le début du fichier
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset: u32,
}

impl Span {
    /// Construit un nouveau `Span` à partir d'une position (ligne, colonne, offset).
    pub const fn new(line: u32, column: u32, offset: u32) -> Self {
        Self { line, column, offset }
    }
}

/// Un fichier de script complet
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Script {
    /// Nom du fichier source.
    pub file: String,
    /// Déclarations de variables de haut niveau.
    #[cfg_attr(feature = "serde", serde(default))]
    pub declarations: Vec<Declaration>,
    /// Nœuds du fichier, dans l’ordre source.
    pub nodes: Vec<NodeDecl>,
}

/// Déclaration d’un nœud (`title: …` puis `---` corps `===`)
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeDecl {
    /// Titre du nœud.
    pub title: String,
    /// En-têtes autres que `title`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub headers: Vec<HeaderDecl>,
    /// Corps.
    pub body: Vec<Stmt>,
    /// Localisation du titre.
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Option<Span>,
}

/// En-tête `clé: valeur`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeaderDecl {
    /// Clé.
    pub key: String,
    /// Valeur.
    pub value: String,
}

/// Déclaration de variable (`<<declare $x = 0>>`)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Declaration {
    /// Nom, avec son `$`.
    pub name: String,
    /// Type annoté (sinon déduit de la valeur).
    #[cfg_attr(feature = "serde", serde(default))]
    pub ty: Option<TypeName>,
    /// Valeur initiale, ou expression de substitution pour une variable « smart ».
    pub value: Expr,
    /// Variable « smart » : chaque lecture est remplacée par `value`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub smart: bool,
    /// Localisation.
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Option<Span>,
}

/// Types nommables dans une déclaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TypeName {
    /// `Number`.
    Number,
    /// `String`.
    String,
    /// `Bool`.
    Bool,
}

/// Une instruction de dialogue
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stmt {
    /// Ligne de dialogue.
    Line(Line),
    /// `<<if>> … <<elseif>> … <<else>> … <<endif>>`
    If {
        /// Clauses dans l’ordre ; la clause `else` n’a pas de condition.
        clauses: Vec<IfClause>,
        /// Localisation.
        span: Option<Span>,
    },
    /// Groupe d’options `-> …`
    Options {
        /// Options dans l’ordre.
        options: Vec<ShortcutOption>,
        /// Localisation.
        span: Option<Span>,
    },
    /// Groupe de lignes `=> …` (sélection par saillance)
    LineGroup {
        /// Candidats dans l’ordre.
        items: Vec<LineGroupItem>,
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<once>> … <<else>> … <<endonce>>`
    Once {
        /// Condition supplémentaire (`<<once if …>>`).
        condition: Option<Expr>,
        /// Corps exécuté au plus une fois.
        body: Vec<Stmt>,
        /// Corps exécuté lorsque le garde est déjà posé.
        alternate: Option<Vec<Stmt>>,
        /// Localisation (sert aussi à nommer le garde).
        span: Option<Span>,
    },
    /// `<<set $x = …>>` et affectations composées
    Set {
        /// Variable cible.
        variable: String,
        /// Opérateur d’affectation.
        op: AssignOp,
        /// Valeur.
        value: Expr,
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<call f(…)>>`
    Call {
        /// Nom de la fonction.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
        /// Localisation.
        span: Option<Span>,
    },
    /// Commande libre `<<…>>`, avec expressions `{…}`
    Command {
        /// Morceaux du texte.
        parts: Vec<TextPart>,
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<jump Node>>`
    Jump {
        /// Cible.
        target: NodeTarget,
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<detour Node>>`
    Detour {
        /// Cible.
        target: NodeTarget,
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<return>>`
    Return {
        /// Localisation.
        span: Option<Span>,
    },
    /// `<<declare …>>` à l’intérieur d’un nœud
    Declare(Declaration),
}

/// Ligne de dialogue (texte + substitutions + condition)
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Line {
    /// Texte, morceaux littéraux et expressions interpolées.
    pub text: Vec<TextPart>,
    /// Identifiant explicite (`#line:…`).
    #[cfg_attr(feature = "serde", serde(default))]
    pub line_id: Option<String>,
    /// Autres tags.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tags: Vec<String>,
    /// Condition de ligne.
    #[cfg_attr(feature = "serde", serde(default))]
    pub condition: Option<LineCondition>,
    /// Localisation.
    #[cfg_attr(feature = "serde", serde(default))]
    pub span: Option<Span>,
}

impl Line {
    /// Ligne de texte brut.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Vec::from([TextPart::Text(text.into())]), ..Self::default() }
    }

    /// Fixe l’identifiant.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.line_id = Some(id.into());
        self
    }

    /// Fixe la condition.
    #[must_use]
    pub fn with_condition(mut self, condition: LineCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Fixe la localisation.
    #[must_use]
    pub const fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Morceau de texte d’une ligne ou d’une commande
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextPart {
    /// Texte littéral.
    Text(String),
    /// Expression interpolée `{…}`.
    Expr(Expr),
}

/// Condition attachée à une ligne
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LineCondition {
    /// `<<if …>>`
    If(Expr),
    /// `<<once>>` ou `<<once if …>>`
    Once(Option<Expr>),
}

/// Une clause `if`/`elseif`/`else`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IfClause {
    /// Condition, absente pour `else`.
    pub condition: Option<Expr>,
    /// Corps.
    pub body: Vec<Stmt>,
}

/// Option d’un groupe `->`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShortcutOption {
    /// Ligne affichée.
    pub line: Line,
    /// Corps exécuté si l’option est choisie.
    #[cfg_attr(feature = "serde", serde(default))]
    pub body: Vec<Stmt>,
}

/// Candidat d’un groupe `=>`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineGroupItem {
    /// Ligne affichée.
    pub line: Line,
    /// Instructions suivant la ligne.
    #[cfg_attr(feature = "serde", serde(default))]
    pub body: Vec<Stmt>,
}

/// Cible d’un `jump`/`detour`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeTarget {
    /// Nom littéral.
    Named(String),
    /// Expression calculée (`{$next}`).
    Expr(Expr),
}

/// Opérateurs d’affectation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `%=`
    Mod,
}

impl AssignOp {
    /// Opérateur binaire équivalent pour une affectation composée.
    pub const fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
        }
    }
}

/// Une expression
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expr {
    /// Valeur littérale
    Literal(Literal),
    /// Référence à une variable (`$x`)
    Variable(String),
    /// Appel de fonction
    Call {
        /// Nom de la fonction.
        name: String,
        /// Arguments passés à l'appel.
        args: Vec<Expr>,
    },
    /// Opération binaire
    Binary {
        /// Opérande gauche.
        left: Box<Expr>,
        /// Opérateur appliqué.
        op: BinaryOp,
        /// Opérande droite.
        right: Box<Expr>,
    },
    /// Opération unaire
    Unary {
        /// Opérateur unaire appliqué.
        op: UnaryOp,
        /// Expression ciblée par l'opérateur.
        expr: Box<Expr>,
    },
}

impl Expr {
    /// Littéral nombre.
    pub const fn number(n: f64) -> Self { Expr::Literal(Literal::Number(n)) }
    /// Littéral booléen.
    pub const fn bool(b: bool) -> Self { Expr::Literal(Literal::Bool(b)) }
    /// Littéral chaîne.
    pub fn string(s: impl Into<String>) -> Self { Expr::Literal(Literal::Str(s.into())) }
    /// Variable.
    pub fn var(name: impl Into<String>) -> Self { Expr::Variable(name.into()) }
    /// Appel.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self { Expr::Call { name: name.into(), args } }
    /// Opération binaire.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary { left: Box::new(left), op, right: Box::new(right) }
    }
    /// Opération unaire.
    pub fn unary(op: UnaryOp, expr: Expr) -> Self { Expr::Unary { op, expr: Box::new(expr) } }

    /// Nombre de sous-conditions booléennes (feuilles d’un arbre `and`/`or`/`xor`).
    ///
    /// Sert de score de complexité pour la sélection par saillance.
    pub fn boolean_complexity(&self) -> usize {
        match self {
            Expr::Binary { left, op: BinaryOp::And | BinaryOp::Or | BinaryOp::Xor, right } => {
                left.boolean_complexity() + right.boolean_complexity()
            }
            Expr::Unary { op: UnaryOp::Not, expr } => expr.boolean_complexity(),
            _ => 1,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(l) => write!(f, "{l}"),
            Expr::Variable(v) => f.write_str(v),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
            Expr::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Unary { op, expr } => write!(f, "({}{expr})", op.symbol()),
        }
    }
}

/// Valeurs littérales
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Literal {
    /// Nombre flottant 64 bits.
    Number(f64),
    /// Booléen.
    Bool(bool),
    /// Chaîne UTF-8.
    Str(String),
    /// Valeur nulle (`null`).
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Str(s) => write!(f, "\"{s}\""),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// Opérateurs binaires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Soustraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// Égalité.
    Eq,
    /// Différence.
    Ne,
    /// Inférieur strict.
    Lt,
    /// Inférieur ou égal.
    Le,
    /// Supérieur strict.
    Gt,
    /// Supérieur ou égal.
    Ge,
    /// Conjonction logique.
    And,
    /// Disjonction logique.
    Or,
    /// Ou exclusif.
    Xor,
}

impl BinaryOp {
    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        }
    }

    /// Suffixe de la fonction de bibliothèque (`Number.<suffixe>`).
    pub const fn function_suffix(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Minus",
            BinaryOp::Mul => "Multiply",
            BinaryOp::Div => "Divide",
            BinaryOp::Mod => "Modulo",
            BinaryOp::Eq => "EqualTo",
            BinaryOp::Ne => "NotEqualTo",
            BinaryOp::Lt => "LessThan",
            BinaryOp::Le => "LessThanOrEqualTo",
            BinaryOp::Gt => "GreaterThan",
            BinaryOp::Ge => "GreaterThanOrEqualTo",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
        }
    }

    /// Vrai pour les opérateurs dont le résultat est booléen.
    pub const fn is_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
        )
    }
}

/// Opérateurs unaires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// Négation arithmétique (`-x`).
    Neg,
    /// Négation logique (`not x`).
    Not,
}

impl UnaryOp {
    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not ",
        }
    }

    /// Suffixe de la fonction de bibliothèque.
    pub const fn function_suffix(self) -> &'static str {
        match self {
            UnaryOp::Neg => "UnaryMinus",
            UnaryOp::Not => "Not",
        }
    }
}
