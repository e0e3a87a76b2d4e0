//! Bytecode d’un programme de dialogue : instructions, nœuds et table de chaînes.

#[cfg(feature = "std")]
use std::{collections::BTreeMap, string::String, vec::Vec};

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String, vec::Vec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Constant, CoreError, CoreResult};

/// Destination sentinelle d’un saut pas encore patché.
pub const UNPATCHED: usize = usize::MAX;

/* ─────────────────────────── Instructions ─────────────────────────── */

/// Une opération bytecode.
///
/// Les destinations sont des index absolus dans le nœud propriétaire.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Instruction {
    /// Empile un nombre.
    PushNumber(f64),
    /// Empile une chaîne.
    PushString(String),
    /// Empile un booléen.
    PushBool(bool),
    /// Empile `null`.
    PushNull,
    /// Empile la valeur d’une variable.
    PushVariable {
        /// Nom de la variable (`$x`).
        name: String,
    },
    /// Copie le sommet de pile dans une variable (sans dépiler).
    StoreVariable {
        /// Nom de la variable.
        name: String,
    },
    /// Dépile une valeur.
    Pop,
    /// Dépile le nombre d’arguments puis les arguments, appelle, empile le résultat.
    CallFunction {
        /// Nom dans la `Library`.
        name: String,
    },
    /// Saut inconditionnel.
    JumpTo {
        /// Index cible.
        destination: usize,
    },
    /// Saute si le sommet de pile (lu sans dépiler) est faux.
    JumpIfFalse {
        /// Index cible.
        destination: usize,
    },
    /// Lit une destination au sommet de pile et y saute.
    PeekAndJump,
    /// Transmet une ligne à l’hôte.
    RunLine {
        /// Identifiant de ligne.
        line_id: String,
        /// Nombre de substitutions à dépiler.
        substitutions: usize,
    },
    /// Transmet une commande à l’hôte.
    RunCommand {
        /// Texte avec marqueurs `{n}`.
        text: String,
        /// Nombre de substitutions à dépiler.
        substitutions: usize,
    },
    /// Ajoute une option au groupe en cours.
    AddOption {
        /// Identifiant de ligne de l’option.
        line_id: String,
        /// Début du bloc de l’option.
        destination: usize,
        /// Nombre de substitutions à dépiler.
        substitutions: usize,
        /// Un booléen de condition est empilé sous les substitutions.
        has_condition: bool,
    },
    /// Présente les options accumulées et attend un choix.
    ShowOptions,
    /// Saute définitivement vers un autre nœud.
    RunNode {
        /// Nom du nœud cible.
        name: String,
    },
    /// Comme `RunNode`, nom lu au sommet de pile.
    PeekAndRunNode,
    /// Détour vers un nœud, retour attendu via `Return`.
    DetourToNode {
        /// Nom du nœud cible.
        name: String,
    },
    /// Comme `DetourToNode`, nom lu au sommet de pile.
    PeekAndDetourToNode,
    /// Ajoute un candidat de saillance (condition dépilée).
    AddSaliencyCandidate {
        /// Identifiant du contenu.
        content_id: String,
        /// Nombre de sous-conditions booléennes.
        complexity: usize,
        /// Début du bloc du candidat.
        destination: usize,
    },
    /// Choisit un candidat : empile `(destination, true)` ou `false`.
    SelectSaliencyCandidate,
    /// Retour de détour (ou fin du dialogue hors détour).
    Return,
    /// Fin du dialogue.
    Stop,
}

impl Instruction {
    /// Destination portée par l’instruction, si c’est un saut.
    pub const fn destination(&self) -> Option<usize> {
        match self {
            Instruction::JumpTo { destination }
            | Instruction::JumpIfFalse { destination }
            | Instruction::AddOption { destination, .. }
            | Instruction::AddSaliencyCandidate { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// Remplace la destination ; `false` si l’instruction n’en porte pas.
    pub fn set_destination(&mut self, target: usize) -> bool {
        match self {
            Instruction::JumpTo { destination }
            | Instruction::JumpIfFalse { destination }
            | Instruction::AddOption { destination, .. }
            | Instruction::AddSaliencyCandidate { destination, .. } => {
                *destination = target;
                true
            }
            _ => false,
        }
    }

    /// Mnémonique court (désassembleur, logs).
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::PushNumber(_) => "PushNumber",
            Instruction::PushString(_) => "PushString",
            Instruction::PushBool(_) => "PushBool",
            Instruction::PushNull => "PushNull",
            Instruction::PushVariable { .. } => "PushVariable",
            Instruction::StoreVariable { .. } => "StoreVariable",
            Instruction::Pop => "Pop",
            Instruction::CallFunction { .. } => "CallFunc",
            Instruction::JumpTo { .. } => "JumpTo",
            Instruction::JumpIfFalse { .. } => "JumpIfFalse",
            Instruction::PeekAndJump => "PeekAndJump",
            Instruction::RunLine { .. } => "RunLine",
            Instruction::RunCommand { .. } => "RunCommand",
            Instruction::AddOption { .. } => "AddOption",
            Instruction::ShowOptions => "ShowOptions",
            Instruction::RunNode { .. } => "RunNode",
            Instruction::PeekAndRunNode => "PeekAndRunNode",
            Instruction::DetourToNode { .. } => "DetourToNode",
            Instruction::PeekAndDetourToNode => "PeekAndDetourToNode",
            Instruction::AddSaliencyCandidate { .. } => "AddSaliencyCandidate",
            Instruction::SelectSaliencyCandidate => "SelectSaliencyCandidate",
            Instruction::Return => "Return",
            Instruction::Stop => "Stop",
        }
    }
}

/* ─────────────────────────── Nœuds ─────────────────────────── */

/// En-tête `clé: valeur` d’un nœud.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Header {
    /// Clé (`title`, `tags`, `tracking`…).
    pub key: String,
    /// Valeur brute.
    pub value: String,
}

/// Unité de dialogue adressable : un nom et une suite d’instructions.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    /// Nom unique dans le programme.
    pub name: String,
    /// Instructions, dans l’ordre.
    pub instructions: Vec<Instruction>,
    /// Étiquettes de debug (index → nom).
    pub labels: BTreeMap<usize, String>,
    /// En-têtes du nœud source.
    pub headers: Vec<Header>,
    /// Variable de comptage des visites, si le nœud est suivi.
    pub tracking_variable: Option<String>,
    /// Fichier source d’origine.
    pub source_file: Option<String>,
}

impl Node {
    /// Nœud vide.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Ajoute une instruction et renvoie son index (handle stable pour `patch`).
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Index de la prochaine instruction émise.
    pub fn next_index(&self) -> usize { self.instructions.len() }

    /// Écrit `destination` dans le saut situé à `index`.
    pub fn patch(&mut self, index: usize, destination: usize) -> CoreResult<()> {
        match self.instructions.get_mut(index) {
            Some(instruction) => {
                if instruction.set_destination(destination) {
                    Ok(())
                } else {
                    Err(CoreError::BadPatch { index })
                }
            }
            None => Err(CoreError::BadPatch { index }),
        }
    }

    /// Patche `index` vers la prochaine instruction.
    pub fn patch_here(&mut self, index: usize) -> CoreResult<()> {
        let here = self.next_index();
        self.patch(index, here)
    }

    /// Étiquette la prochaine instruction.
    pub fn label_here(&mut self, label: impl Into<String>) {
        let here = self.next_index();
        self.labels.insert(here, label.into());
    }

    /// Valeur d’un en-tête.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|h| h.key == key).map(|h| h.value.as_str())
    }

    /// Identifiants des lignes et options référencées par le nœud.
    pub fn line_ids(&self) -> Vec<&str> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::RunLine { line_id, .. } | Instruction::AddOption { line_id, .. } => Some(line_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Vérifie que chaque destination est résolue et dans le nœud.
    pub fn validate(&self) -> CoreResult<()> {
        let len = self.instructions.len();
        for (index, instruction) in self.instructions.iter().enumerate() {
            match instruction.destination() {
                Some(UNPATCHED) => return Err(CoreError::UnresolvedJump { node: self.name.clone(), index }),
                Some(destination) if destination >= len => {
                    return Err(CoreError::JumpOutOfRange { node: self.name.clone(), index, destination })
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/* ─────────────────────────── Programme ─────────────────────────── */

/// Métadonnées d’une ligne de la table de chaînes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineInfo {
    /// Texte source (substitutions en `{n}`).
    pub text: String,
    /// Fichier source.
    pub file: String,
    /// Nœud propriétaire.
    pub node: String,
    /// Ligne (1-based).
    pub line_number: u32,
    /// Tags `#…` de la ligne.
    pub tags: Vec<String>,
}

/// Programme compilé : nœuds, valeurs initiales et table de chaînes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    /// Nœuds par nom.
    pub nodes: BTreeMap<String, Node>,
    /// Valeurs initiales des variables déclarées.
    pub initial_values: BTreeMap<String, Constant>,
    /// Table de chaînes (id de ligne → métadonnées).
    pub strings: BTreeMap<String, LineInfo>,
}

impl Program {
    /// Programme vide.
    pub fn new() -> Self { Self::default() }

    /// Nœud par nom.
    pub fn node(&self, name: &str) -> Option<&Node> { self.nodes.get(name) }

    /// Ajoute un nœud ; erreur si le nom existe déjà.
    pub fn insert_node(&mut self, node: Node) -> CoreResult<()> {
        if self.nodes.contains_key(&node.name) {
            return Err(CoreError::DuplicateNode(node.name));
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Fusionne `other` dans `self`.
    ///
    /// Échoue sur un nœud dupliqué ou une variable déclarée avec une autre
    /// valeur initiale ; `self` n’est modifié que si tout est compatible.
    pub fn merge(&mut self, other: Program) -> CoreResult<()> {
        if let Some(name) = other.nodes.keys().find(|k| self.nodes.contains_key(*k)) {
            return Err(CoreError::DuplicateNode(name.clone()));
        }
        for (name, value) in &other.initial_values {
            if self.initial_values.get(name).is_some_and(|existing| existing != value) {
                return Err(CoreError::ConflictingDeclaration(name.clone()));
            }
        }
        self.nodes.extend(other.nodes);
        self.initial_values.extend(other.initial_values);
        self.strings.extend(other.strings);
        Ok(())
    }

    /// Combine plusieurs programmes en un seul.
    pub fn combine(programs: impl IntoIterator<Item = Program>) -> CoreResult<Program> {
        let mut out = Program::new();
        for p in programs {
            out.merge(p)?;
        }
        Ok(out)
    }

    /// Valide tous les nœuds.
    pub fn validate(&self) -> CoreResult<()> {
        self.nodes.values().try_for_each(Node::validate)
    }

    /// Texte source d’une ligne.
    pub fn line_text(&self, line_id: &str) -> Option<&str> {
        self.strings.get(line_id).map(|l| l.text.as_str())
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emit_then_patch() -> CoreResult<()> {
        let mut n = Node::new("Start");
        let j = n.emit(Instruction::JumpIfFalse { destination: UNPATCHED });
        n.emit(Instruction::Pop);
        assert!(matches!(n.validate(), Err(CoreError::UnresolvedJump { index: 0, .. })));
        n.label_here("end");
        n.patch_here(j)?;
        n.emit(Instruction::Return);
        n.validate()?;
        assert_eq!(n.instructions[0], Instruction::JumpIfFalse { destination: 2 });
        assert_eq!(n.labels.get(&2).map(String::as_str), Some("end"));
        Ok(())
    }

    #[test]
    fn patch_rewrites_jumps_and_rejects_other_instructions() {
        let mut n = Node::new("A");
        let jump = n.emit(Instruction::JumpTo { destination: UNPATCHED });
        let pop = n.emit(Instruction::Pop);
        n.emit(Instruction::Return);

        assert_eq!(n.patch(jump, 2), Ok(()));
        assert_eq!(n.instructions[jump], Instruction::JumpTo { destination: 2 });
        assert_eq!(n.patch(pop, 0), Err(CoreError::BadPatch { index: pop }));
        assert_eq!(n.instructions[pop], Instruction::Pop);
        assert_eq!(n.patch(5, 0), Err(CoreError::BadPatch { index: 5 }));
        n.validate().unwrap();
    }

    #[test]
    fn out_of_range_jump_is_rejected() {
        let mut n = Node::new("A");
        n.emit(Instruction::JumpTo { destination: 9 });
        assert!(matches!(n.validate(), Err(CoreError::JumpOutOfRange { destination: 9, .. })));
    }

    #[test]
    fn merge_detects_collisions() {
        let mut a = Program::new();
        a.insert_node(Node::new("Start")).unwrap();
        a.initial_values.insert("$gold".into(), Constant::Number(0.0));

        let mut b = Program::new();
        b.insert_node(Node::new("Start")).unwrap();
        assert_eq!(a.clone().merge(b), Err(CoreError::DuplicateNode("Start".into())));

        let mut c = Program::new();
        c.insert_node(Node::new("Other")).unwrap();
        c.initial_values.insert("$gold".into(), Constant::Number(5.0));
        assert_eq!(a.clone().merge(c), Err(CoreError::ConflictingDeclaration("$gold".into())));

        let mut d = Program::new();
        d.insert_node(Node::new("Other")).unwrap();
        d.initial_values.insert("$gold".into(), Constant::Number(0.0));
        let merged = Program::combine([a, d]).unwrap();
        assert_eq!(merged.nodes.keys().cloned().collect::<Vec<_>>(), vec!["Other".to_string(), "Start".to_string()]);
    }

    #[test]
    fn line_ids_collects_lines_and_options() {
        let mut n = Node::new("A");
        n.emit(Instruction::AddOption { line_id: "line:o".into(), destination: 0, substitutions: 0, has_condition: false });
        n.emit(Instruction::RunLine { line_id: "line:l".into(), substitutions: 0 });
        assert_eq!(n.line_ids(), vec!["line:o", "line:l"]);
    }
}
