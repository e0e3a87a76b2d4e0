//! Parlance VM: exécution des programmes de dialogue
//!
//! Objectifs :
//! - Exécuter un nœud d’un `parlance_core::Program` sur une pile d’opérandes
//! - Variables lues/écrites dans un `VariableStore` fourni par l’hôte
//! - Fonctions et opérateurs appelés via une `parlance_runtime::Library`
//! - Suspendre aux lignes, options et commandes ; l’hôte reprend avec
//!   `continue_dialogue()` (état « en attente » explicite, pas de callback réentrant)
//! - Détours (pile d’appels), comptage des visites, sélection par saillance
//!
//! Exemple :
//! ```
//! use std::sync::Arc;
//! use parlance_core::{Instruction, Node, Program};
//! use parlance_runtime::Library;
//! use parlance_vm::{DialogueHandler, DialogueOption, HandlerResult, Line, MemoryVariableStore, VirtualMachine};
//!
//! #[derive(Default)]
//! struct Collect(Vec<String>);
//! impl DialogueHandler for Collect {
//!     fn on_line(&mut self, line: &Line) -> HandlerResult {
//!         self.0.push(line.id.clone());
//!         HandlerResult::Continue
//!     }
//!     fn on_options(&mut self, _options: &[DialogueOption]) {}
//! }
//!
//! let mut start = Node::new("Start");
//! start.emit(Instruction::RunLine { line_id: "line:hi".into(), substitutions: 0 });
//! start.emit(Instruction::Return);
//! let mut program = Program::new();
//! program.insert_node(start).unwrap();
//!
//! let mut vm = VirtualMachine::new(Arc::new(program), Library::with_defaults(), Collect::default(), MemoryVariableStore::new());
//! vm.set_node("Start").unwrap();
//! vm.continue_dialogue().unwrap();
//! assert_eq!(vm.handler().0, vec!["line:hi".to_string()]);
//! assert!(vm.is_stopped());
//! ```

#![deny(missing_docs)]

use std::fmt;

use thiserror::Error;

mod handler;
mod saliency;
mod store;
mod vm;

pub use handler::{DialogueHandler, DialogueOption, HandlerResult, Line};
pub use saliency::{
    Best, BestLeastRecentlyViewed, First, RandomBestLeastRecentlyViewed, SaliencyCandidate, SaliencyKind,
    SaliencyStrategy, VIEW_COUNT_PREFIX,
};
pub use store::{MemoryVariableStore, VariableStore};
pub use vm::VirtualMachine;

/* ─────────────────────────── État ─────────────────────────── */

/// État d’exécution de la VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionState {
    /// Prête à (re)démarrer avec `continue_dialogue`.
    #[default]
    Suspended,
    /// Boucle de dispatch active.
    Running,
    /// Une ligne a été livrée, le handler a demandé une pause.
    WaitingForLineComplete,
    /// Des options ont été présentées ; `select_option` attendu.
    WaitingForOptionSelection,
    /// Une commande a été livrée, le handler a demandé une pause.
    WaitingForCommandComplete,
    /// Dialogue terminé (fin, `stop`, ou erreur).
    Stopped,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Suspended => "suspended",
            Self::Running => "running",
            Self::WaitingForLineComplete => "waiting for line completion",
            Self::WaitingForOptionSelection => "waiting for an option selection",
            Self::WaitingForCommandComplete => "waiting for command completion",
            Self::Stopped => "stopped",
        })
    }
}

/* ─────────────────────────── Config ─────────────────────────── */

/// Configuration de la VM.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmConfig {
    /// Stratégie des groupes de lignes.
    pub saliency: SaliencyKind,
    /// Livrer `on_node_start` / `on_node_complete`.
    pub node_events: bool,
}

impl Default for VmConfig {
    fn default() -> Self { Self { saliency: SaliencyKind::Best, node_events: true } }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs d’exécution.
///
/// La VM passe à `Stopped`, sauf pour un refus de `set_node` ou de
/// `select_option` : l’hôte peut alors réessayer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Nœud absent du programme.
    #[error("unknown node `{0}`")]
    UnknownNode(String),
    /// `continue_dialogue` sans `set_node` préalable.
    #[error("no node selected; call set_node first")]
    NoNodeSelected,
    /// Pile d’opérandes vide.
    #[error("operand stack underflow in `{node}` at {pc}")]
    StackUnderflow {
        /// Nœud courant.
        node: String,
        /// Instruction fautive.
        pc: usize,
    },
    /// Variable ni posée ni déclarée.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    /// Index d’option hors bornes.
    #[error("option {index} does not exist ({count} option(s) shown)")]
    InvalidOption {
        /// Index demandé.
        index: usize,
        /// Options présentées.
        count: usize,
    },
    /// Opération impossible dans l’état courant.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Opération tentée.
        operation: &'static str,
        /// État au moment de l’appel.
        state: ExecutionState,
    },
    /// Destination de saut hors du nœud.
    #[error("jump to {destination} is outside `{node}`")]
    BadJump {
        /// Nœud courant.
        node: String,
        /// Destination lue.
        destination: usize,
    },
    /// Erreur levée par une fonction ou un opérateur.
    #[error(transparent)]
    Runtime(#[from] parlance_runtime::Error),
}

/// Résultat VM.
pub type VmResult<T> = Result<T, VmError>;

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Réexports utiles.
pub mod prelude {
    pub use crate::{
        DialogueHandler, DialogueOption, ExecutionState, HandlerResult, Line, MemoryVariableStore, SaliencyKind,
        VariableStore, VirtualMachine, VmConfig, VmError, VmResult,
    };
}
