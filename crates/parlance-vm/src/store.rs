//! Stockage des variables de dialogue.
//!
//! La VM ne possède pas les variables : elle lit/écrit via `VariableStore`,
//! que l’hôte implémente (sauvegarde de partie, synchronisation moteur…).

use std::collections::BTreeMap;

use parlance_runtime::Value;

/// Contrat d’un stockage de variables.
pub trait VariableStore {
    /// Valeur de `name`, `Value::Null` si inconnue.
    fn get(&self, name: &str) -> Value;
    /// Écrit `name`.
    fn set(&mut self, name: &str, value: Value);
    /// Oublie toutes les variables.
    fn clear(&mut self);
}

/// Stockage en mémoire (ordre déterministe).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryVariableStore {
    values: BTreeMap<String, Value>,
}

impl MemoryVariableStore {
    /// Stockage vide.
    pub fn new() -> Self { Self::default() }

    /// Nombre de variables posées.
    pub fn len(&self) -> usize { self.values.len() }

    /// Vrai si aucune variable.
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Parcourt les variables posées, triées par nom.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> { self.values.iter().map(|(k, v)| (k.as_str(), v)) }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, name: &str) -> Value { self.values.get(name).cloned().unwrap_or(Value::Null) }

    fn set(&mut self, name: &str, value: Value) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%name, ?value, "set variable");
        self.values.insert(name.to_owned(), value);
    }

    fn clear(&mut self) { self.values.clear(); }
}

impl<S: VariableStore + ?Sized> VariableStore for &mut S {
    fn get(&self, name: &str) -> Value { (**self).get(name) }
    fn set(&mut self, name: &str, value: Value) { (**self).set(name, value); }
    fn clear(&mut self) { (**self).clear(); }
}
