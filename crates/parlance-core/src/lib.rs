//! parlance-core: primitives partagées (no_std-ready)
//!
//! Fournit :
//! - `SourceId`, `Pos`, `Span`, `Spanned<T>`
//! - `ValueType`, `Arity` et le trait `Signatures` (registre de fonctions vu du parseur/compilateur)
//! - `Constant` : valeurs littérales stockées dans un `Program`
//! - Le modèle bytecode : `Instruction`, `Node`, `Program`, `LineInfo` (module [`program`])
//! - Un désassembleur textuel (module [`disasm`])
//! - `crc32_ieee` (compact, sans table), utilisé pour nommer les gardes `once`
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Features :
//! - `std` (par défaut) : impl `std::error::Error` & tests
//! - `serde` : derive (dé)sérialisation sur les structures utiles

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

/* ─────────────────────────── Imports ─────────────────────────── */

use core::fmt;

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::string::String;

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Modèle bytecode : instructions, nœuds, programme, table de chaînes.
pub mod program;

/// Désassemblage textuel d’un `Node` / `Program`.
pub mod disasm;

pub use program::{Header, Instruction, LineInfo, Node, Program, UNPATCHED};

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Identifiant de source (fichier, buffer, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceId(pub u32);

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Pos(0);
    /// Addition saturée.
    #[must_use]
    pub const fn saturating_add(self, v: u32) -> Self { Pos(self.0.saturating_add(v)) }
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Source d’où provient l’item.
    pub source: SourceId,
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(source: SourceId, start: Pos, end: Pos) -> Self { Self { source, start, end } }
    /// Longueur en bytes.
    pub const fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub const fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
    /// Plus petit span couvrant `self` et `other` (même source supposée).
    #[must_use]
    pub fn join(self, other: Span) -> Span {
        Span {
            source: self.source,
            start: if self.start <= other.start { self.start } else { other.start },
            end: if self.end >= other.end { self.end } else { other.end },
        }
    }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
    /// Applique une fonction à la valeur et conserve le span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { value: f(self.value), span: self.span } }
}

/* ─────────────────────────── Types & arités ─────────────────────────── */

/// Type statique d’une valeur, tel que vu par le compilateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValueType {
    /// Nombre flottant 64 bits.
    Number,
    /// Chaîne UTF-8.
    String,
    /// Booléen.
    Bool,
    /// Type inconnu ou dynamique (`null`, appel non typé…).
    Any,
}

impl ValueType {
    /// Préfixe utilisé pour nommer les fonctions d’opérateurs (`Number.Add`…).
    pub const fn type_name(self) -> &'static str {
        match self {
            ValueType::Number => "Number",
            ValueType::String => "String",
            ValueType::Bool => "Bool",
            ValueType::Any => "Any",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.type_name()) }
}

/// Nombre de paramètres attendus par une fonction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Arity {
    /// Exactement `n` paramètres.
    Fixed(usize),
    /// N’importe quel nombre de paramètres.
    Variadic,
}

impl Arity {
    /// Convertit la représentation brute (`-1` = variadique).
    pub const fn from_raw(raw: i32) -> Self {
        if raw < 0 { Arity::Variadic } else { Arity::Fixed(raw.unsigned_abs() as usize) }
    }

    /// Représentation brute (`-1` = variadique).
    pub const fn to_raw(self) -> i32 {
        match self {
            Arity::Fixed(n) => n as i32,
            Arity::Variadic => -1,
        }
    }

    /// Vrai si `count` arguments satisfont cette arité.
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => n == count,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{n}"),
            Arity::Variadic => f.write_str("variadic"),
        }
    }
}

/// Vue « signatures » d’un registre de fonctions.
///
/// Le parseur d’expressions s’en sert pour valider les appels, le compilateur
/// pour typer les résultats. `parlance-runtime::Library` l’implémente.
pub trait Signatures {
    /// Arité déclarée de `name`, ou `None` si la fonction est inconnue.
    fn arity_of(&self, name: &str) -> Option<Arity>;

    /// Type de retour déclaré de `name`, si connu.
    fn return_type_of(&self, _name: &str) -> Option<ValueType> { None }

    /// Vrai si `name` est enregistré.
    fn contains(&self, name: &str) -> bool { self.arity_of(name).is_some() }
}

/* ─────────────────────────── Constantes ─────────────────────────── */

/// Valeur littérale stockée dans un programme (valeurs initiales des variables).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Constant {
    /// `null`.
    Null,
    /// Booléen.
    Bool(bool),
    /// Nombre.
    Number(f64),
    /// Chaîne.
    Str(String),
}

impl Constant {
    /// Type statique de la constante.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Constant::Null => ValueType::Any,
            Constant::Bool(_) => ValueType::Bool,
            Constant::Number(_) => ValueType::Number,
            Constant::Str(_) => ValueType::String,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Number(n) => write!(f, "{n}"),
            Constant::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3), implémentation compacte sans table.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ u32::from(b)) & 0xFF;
        // 8 itérations (bitwise), polynôme 0xEDB88320
        for _ in 0..8 {
            let mask = (x & 1).wrapping_neg() & 0xEDB8_8320;
            x = (x >> 1) ^ mask;
        }
        crc = (crc >> 8) ^ x;
    }
    !crc
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs structurelles du modèle bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CoreError {
    /// Deux programmes déclarent le même nœud.
    DuplicateNode(String),
    /// Deux programmes déclarent la même variable avec des valeurs différentes.
    ConflictingDeclaration(String),
    /// Un saut n’a jamais été résolu.
    UnresolvedJump {
        /// Nœud fautif.
        node: String,
        /// Index de l’instruction.
        index: usize,
    },
    /// La destination d’un saut sort du nœud.
    JumpOutOfRange {
        /// Nœud fautif.
        node: String,
        /// Index de l’instruction.
        index: usize,
        /// Destination invalide.
        destination: usize,
    },
    /// Tentative de patcher une instruction sans destination, ou hors bornes.
    BadPatch {
        /// Index visé.
        index: usize,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DuplicateNode(name) => write!(f, "duplicate node `{name}`"),
            CoreError::ConflictingDeclaration(name) => write!(f, "conflicting declarations for `{name}`"),
            CoreError::UnresolvedJump { node, index } => write!(f, "unresolved jump in `{node}` at {index}"),
            CoreError::JumpOutOfRange { node, index, destination } => {
                write!(f, "jump in `{node}` at {index} targets {destination}, outside the node")
            }
            CoreError::BadPatch { index } => write!(f, "instruction {index} cannot be patched"),
        }
    }
}

/// Implémente `std::error::Error` uniquement avec la feature `std`.
#[cfg(feature = "std")]
impl std::error::Error for CoreError {}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        crc32_ieee, Arity, Constant, CoreError, CoreResult, Header, Instruction, LineInfo, Node, Pos,
        Program, Signatures, SourceId, Span, Spanned, ValueType, UNPATCHED,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_ieee(b"hello"), crc32_ieee(b"hello"));
    }

    #[test]
    fn arity_raw_mapping() {
        assert_eq!(Arity::from_raw(-1), Arity::Variadic);
        assert_eq!(Arity::from_raw(2), Arity::Fixed(2));
        assert_eq!(Arity::Variadic.to_raw(), -1);
        assert!(Arity::Variadic.accepts(7));
        assert!(!Arity::Fixed(2).accepts(3));
    }

    #[test]
    fn span_join() {
        let a = Span::new(SourceId(0), Pos(4), Pos(8));
        let b = Span::new(SourceId(0), Pos(1), Pos(5));
        let j = a.join(b);
        assert_eq!((j.start, j.end), (Pos(1), Pos(8)));
        assert_eq!(j.len(), 7);
    }
}
