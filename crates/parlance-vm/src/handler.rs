//! Contrat hôte ↔ VM : événements de dialogue et décision de pause.
//!
//! La VM appelle le handler aux sites d’exécution (ligne, options, commande,
//! entrée/sortie de nœud). Le handler ne peut pas rappeler la VM : il rend
//! `Pause` et l’hôte reprend plus tard avec `continue_dialogue()`.

use parlance_runtime::Value;

/// Décision du handler après un événement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerResult {
    /// La VM poursuit immédiatement.
    #[default]
    Continue,
    /// La VM s’arrête jusqu’au prochain `continue_dialogue()`.
    Pause,
}

/// Ligne à afficher : identifiant + valeurs substituées (forme affichée).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Identifiant dans la table de chaînes.
    pub id: String,
    /// Substitutions, dans l’ordre des marqueurs `{0}`, `{1}`…
    pub substitutions: Vec<String>,
}

impl Line {
    /// Remplace les marqueurs `{n}` de `template` par les substitutions.
    ///
    /// ```
    /// use parlance_vm::Line;
    /// let line = Line { id: "line:gold".into(), substitutions: vec!["3".into()] };
    /// assert_eq!(line.render("You have {0} coins"), "You have 3 coins");
    /// ```
    pub fn render(&self, template: &str) -> String { substitute(template, &self.substitutions) }
}

/// Option présentée à l’hôte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueOption {
    /// Index à passer à `select_option`.
    pub id: usize,
    /// Ligne de l’option.
    pub line: Line,
    /// Début du bloc de l’option dans le nœud.
    pub destination: usize,
    /// Condition satisfaite (une option désactivée reste sélectionnable).
    pub enabled: bool,
}

/// Remplace `{n}` par `values[n]` ; les marqueurs inconnus restent tels quels.
pub(crate) fn substitute<S: AsRef<str>>(template: &str, values: &[S]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let marker = after
            .find('}')
            .and_then(|close| after[..close].parse::<usize>().ok().map(|index| (index, close)));
        match marker.and_then(|(index, close)| values.get(index).map(|v| (v, close))) {
            Some((value, close)) => {
                out.push_str(value.as_ref());
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Points d’extension appelés par la VM.
///
/// Seuls `on_line` et `on_options` sont obligatoires ; les autres sont no-op
/// par défaut et rendent `Continue`.
pub trait DialogueHandler {
    /// Une ligne doit être affichée.
    fn on_line(&mut self, line: &Line) -> HandlerResult;

    /// Des options doivent être présentées ; la VM attend toujours
    /// `select_option` puis `continue_dialogue`.
    fn on_options(&mut self, options: &[DialogueOption]);

    /// Une commande doit être exécutée (texte déjà substitué).
    fn on_command(&mut self, _text: &str, _values: &[Value]) -> HandlerResult { HandlerResult::Continue }

    /// Entrée dans un nœud.
    fn on_node_start(&mut self, _node: &str) -> HandlerResult { HandlerResult::Continue }

    /// Sortie d’un nœud (fin, saut, retour de détour).
    fn on_node_complete(&mut self, _node: &str) -> HandlerResult { HandlerResult::Continue }

    /// Fin du dialogue (une seule fois par exécution).
    fn on_dialogue_complete(&mut self) {}

    /// Lignes susceptibles d’être affichées par le nœud qui démarre.
    fn prepare_for_lines(&mut self, _ids: &[&str]) {}
}
