//! parlance-runtime: valeurs et bibliothèque de fonctions pour Parlance
//!
//! Feuille commune au compilateur et à la VM :
//!
//! - `Value`   : valeur dynamique (Null/Bool/Number/Str/VariableRef)
//! - `Library` : registre nom → (arité, type de retour, implémentation native)
//! - `Library::with_defaults()` : opérateurs (`Number.Add`, `Bool.Not`…) et fonctions standard
//! - `SharedRng` : générateur injectable des fonctions aléatoires (`Library::with_seed`)
//! - `parlance_native!` : macro pour écrire des natives en 2 lignes
//!
//! ⚠️ Ce crate **n’exécute pas** le bytecode (c’est le rôle de `parlance-vm`).
//! Les fonctions « intrinsèques » (`visited`, `visited_count`) sont déclarées
//! ici pour le contrôle d’arité mais évaluées par la VM.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parlance_core::{Arity, Constant, Signatures, ValueType};
use thiserror::Error;

mod random;
mod stdlib;

pub use random::SharedRng;

/* --------------------------- Types de valeur --------------------------- */

/// Valeur dynamique manipulée par la VM et les natives.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Null / absence de valeur.
    Null,
    /// Booléen.
    Bool(bool),
    /// Nombre flottant 64 bits.
    Number(f64),
    /// Chaîne UTF-8 possédée.
    Str(String),
    /// Référence à une variable (nom, `$` inclus).
    VariableRef(String),
}

impl Value {
    /// Type statique correspondant.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Value::Null | Value::VariableRef(_) => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::Str(_) => ValueType::String,
        }
    }

    /// Nom court du genre de valeur (messages d’erreur).
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "Bool",
            Value::Number(_) => "Number",
            Value::Str(_) => "String",
            Value::VariableRef(_) => "VariableRef",
        }
    }

    /// Vrai pour `Null`.
    pub const fn is_null(&self) -> bool { matches!(self, Value::Null) }

    /// Nombre, ou erreur de type.
    pub fn as_number(&self) -> RResult<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(Error::type_mismatch("Number", other)),
        }
    }

    /// Booléen, ou erreur de type.
    pub fn as_bool(&self) -> RResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch("Bool", other)),
        }
    }

    /// Chaîne, ou erreur de type.
    pub fn as_str(&self) -> RResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::type_mismatch("String", other)),
        }
    }

    /// Égalité définie entre tous les types (types différents ⇒ faux).
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(x) => write!(f, "Number({x})"),
            Value::Str(s) => {
                if s.chars().count() > 64 {
                    let cut: String = s.chars().take(64).collect();
                    write!(f, "Str({cut}…)")
                } else {
                    write!(f, "Str({s})")
                }
            }
            Value::VariableRef(v) => write!(f, "VariableRef({v})"),
        }
    }
}

/// Forme affichée à l’hôte (substitutions, `string()`).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::VariableRef(v) => f.write_str(v),
        }
    }
}

/* Conversions conviviales */
impl From<()> for Value { fn from((): ()) -> Self { Value::Null } }
impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Number(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Number(f64::from(v)) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_owned()) } }

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        match c {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(b),
            Constant::Number(n) => Value::Number(n),
            Constant::Str(s) => Value::Str(s),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> { v.as_bool() }
}
impl TryFrom<Value> for f64 {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> { v.as_number() }
}
impl TryFrom<Value> for String {
    type Error = Error;
    fn try_from(v: Value) -> std::result::Result<Self, Self::Error> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(Error::type_mismatch("String", &other)),
        }
    }
}

/* ------------------------------ Erreurs ------------------------------ */

/// Erreurs runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Fonction introuvable dans la bibliothèque.
    #[error("unknown function `{0}`")]
    NotFound(String),

    /// Arité invalide.
    #[error("`{name}` expects {expected} argument(s), got {got}")]
    Arity {
        /// Fonction appelée.
        name: String,
        /// Arité déclarée.
        expected: Arity,
        /// Nombre d'arguments effectivement fournis lors de l'appel.
        got: usize,
    },

    /// Type inattendu.
    #[error("type mismatch: expected {expected}, got {got}")]
    Type {
        /// Type attendu.
        expected: &'static str,
        /// Valeur reçue (forme debug).
        got: String,
    },

    /// Division ou modulo par zéro.
    #[error("division by zero")]
    DivisionByZero,

    /// Fonction évaluée par la VM, pas par la bibliothèque.
    #[error("`{0}` can only be evaluated by the virtual machine")]
    Intrinsic(String),

    /// Nom déjà enregistré.
    #[error("function `{0}` is already registered")]
    Duplicate(String),

    /// Message générique.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Erreur de type à partir de la valeur fautive.
    pub fn type_mismatch(expected: &'static str, got: &Value) -> Self {
        Error::Type { expected, got: format!("{got:?}") }
    }
}

/// Résultat du runtime.
pub type RResult<T> = std::result::Result<T, Error>;

/* -------------------------- Signature des natives -------------------------- */

/// Fonction native : reçoit les arguments dans l’ordre source.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> RResult<Value> + Send + Sync>;

/// Implémentation d’une entrée de bibliothèque.
#[derive(Clone)]
pub enum FunctionKind {
    /// Implémentation native.
    Native(NativeFn),
    /// Évaluée par la VM (accès à l’état d’exécution).
    Intrinsic,
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Native(_) => f.write_str("Native(..)"),
            FunctionKind::Intrinsic => f.write_str("Intrinsic"),
        }
    }
}

/// Descripteur d’une fonction.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    /// Nom complet (`Number.Add`, `round`…).
    pub name: String,
    /// Arité.
    pub arity: Arity,
    /// Type de retour.
    pub returns: ValueType,
    /// Implémentation.
    pub kind: FunctionKind,
}

/* ------------------------------ Library ------------------------------ */

/// Bibliothèque : registre de fonctions et d’opérateurs.
#[derive(Debug, Clone, Default)]
pub struct Library {
    registry: HashMap<String, FunctionEntry>,
}

impl Library {
    /// Bibliothèque vide.
    pub fn new() -> Self { Self::default() }

    /// Opérateurs + fonctions standard ; tirages aléatoires non reproductibles.
    pub fn with_defaults() -> Self { Self::with_rng(SharedRng::from_entropy()) }

    /// Comme `with_defaults`, tirages reproductibles à partir de `seed`.
    pub fn with_seed(seed: u64) -> Self { Self::with_rng(SharedRng::seeded(seed)) }

    /// Opérateurs + fonctions standard, fonctions aléatoires adossées à `rng`.
    pub fn with_rng(rng: SharedRng) -> Self {
        let mut lib = Self::new();
        stdlib::install(&mut lib, &rng);
        lib
    }

    /// Enregistre une fonction native ; erreur si le nom est déjà pris.
    pub fn register_fn<F>(&mut self, name: &str, arity: Arity, returns: ValueType, func: F) -> RResult<()>
    where
        F: Fn(&[Value]) -> RResult<Value> + Send + Sync + 'static,
    {
        self.try_insert(FunctionEntry { name: name.to_owned(), arity, returns, kind: FunctionKind::Native(Arc::new(func)) })
    }

    /// Déclare une fonction évaluée par la VM ; erreur si le nom est déjà pris.
    pub fn register_intrinsic(&mut self, name: &str, arity: Arity, returns: ValueType) -> RResult<()> {
        self.try_insert(FunctionEntry { name: name.to_owned(), arity, returns, kind: FunctionKind::Intrinsic })
    }

    /// Native de la bibliothèque standard (noms uniques par construction).
    pub(crate) fn define_fn<F>(&mut self, name: &str, arity: Arity, returns: ValueType, func: F)
    where
        F: Fn(&[Value]) -> RResult<Value> + Send + Sync + 'static,
    {
        debug_assert!(!self.registry.contains_key(name), "`{name}` defined twice");
        self.insert(FunctionEntry { name: name.to_owned(), arity, returns, kind: FunctionKind::Native(Arc::new(func)) });
    }

    /// Intrinsèque de la bibliothèque standard.
    pub(crate) fn define_intrinsic(&mut self, name: &str, arity: Arity, returns: ValueType) {
        debug_assert!(!self.registry.contains_key(name), "`{name}` defined twice");
        self.insert(FunctionEntry { name: name.to_owned(), arity, returns, kind: FunctionKind::Intrinsic });
    }

    fn try_insert(&mut self, entry: FunctionEntry) -> RResult<()> {
        if self.registry.contains_key(&entry.name) {
            return Err(Error::Duplicate(entry.name));
        }
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: FunctionEntry) {
        #[cfg(feature = "tracing")]
        tracing::trace!(name = %entry.name, arity = %entry.arity, "register function");
        self.registry.insert(entry.name.clone(), entry);
    }

    /// Importe les entrées de `other` ; erreur si un nom existe déjà.
    pub fn import(&mut self, other: &Library) -> RResult<()> {
        if let Some(dup) = other.registry.keys().find(|k| self.registry.contains_key(*k)) {
            return Err(Error::Duplicate(dup.clone()));
        }
        for entry in other.registry.values() {
            self.insert(entry.clone());
        }
        Ok(())
    }

    /// Entrée par nom.
    pub fn lookup(&self, name: &str) -> Option<&FunctionEntry> { self.registry.get(name) }

    /// Nombre d’entrées.
    pub fn len(&self) -> usize { self.registry.len() }

    /// Vrai si vide.
    pub fn is_empty(&self) -> bool { self.registry.is_empty() }

    /// Appelle `name` avec `args` (arité contrôlée).
    pub fn call(&self, name: &str, args: &[Value]) -> RResult<Value> {
        let entry = self.lookup(name).ok_or_else(|| Error::NotFound(name.to_owned()))?;
        if !entry.arity.accepts(args.len()) {
            return Err(Error::Arity { name: name.to_owned(), expected: entry.arity, got: args.len() });
        }
        match &entry.kind {
            FunctionKind::Native(f) => f(args),
            FunctionKind::Intrinsic => Err(Error::Intrinsic(name.to_owned())),
        }
    }
}

impl Signatures for Library {
    fn arity_of(&self, name: &str) -> Option<Arity> { self.lookup(name).map(|e| e.arity) }

    fn return_type_of(&self, name: &str) -> Option<ValueType> { self.lookup(name).map(|e| e.returns) }
}

/// Nom canonique de la fonction implémentant un opérateur (`Number.Add`).
pub fn operator_function(ty: ValueType, suffix: &str) -> String { format!("{}.{suffix}", ty.type_name()) }

/* ----------------------------- Macro sucrée ----------------------------- */

/// Macro pour déclarer une native rapidement.
///
/// # Exemple
/// ```
/// use parlance_core::{Arity, ValueType};
/// use parlance_runtime::{parlance_native, Library, Value};
///
/// parlance_native!(greet |args| {
///     let name = args.first().cloned().unwrap_or_else(|| "world".into());
///     Ok(format!("Hello, {name}!").into())
/// });
///
/// let mut lib = Library::new();
/// lib.register_fn("greet", Arity::Fixed(1), ValueType::String, greet).unwrap();
/// assert_eq!(lib.call("greet", &["Ada".into()]).unwrap(), Value::from("Hello, Ada!"));
/// ```
#[macro_export]
macro_rules! parlance_native {
    ($name:ident |$args:ident| $body:block) => {
        pub fn $name($args: &[$crate::Value]) -> $crate::RResult<$crate::Value> {
            $body
        }
    };
}

/* -------------------------------- Prelude -------------------------------- */

/// Prelude pratique pour importer d’un coup.
pub mod prelude {
    pub use crate::{
        operator_function, parlance_native, Error, FunctionEntry, FunctionKind, Library, NativeFn, RResult, SharedRng,
        Value,
    };
}

/* --------------------------------- Tests --------------------------------- */
