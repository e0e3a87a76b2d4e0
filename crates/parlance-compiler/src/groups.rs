//! Groupes de nœuds : plusieurs nœuds de même titre portant des en-têtes `when:`.
//!
//! Chaque membre est compilé sous un nom unique (`Titre.xxxxxxxx`). Un nœud
//! pivot garde le titre d’origine : il propose chaque membre comme candidat de
//! saillance, puis fait un détour vers celui que la stratégie retient.
//!
//! Valeurs acceptées par `when:` : `always`, `once`, `once if <expr>`, `<expr>`.
//! Plusieurs en-têtes se combinent par `and`.

use std::collections::BTreeMap;

use parlance_ast::{Expr, HeaderDecl, NodeDecl, Script, Span};
use parlance_core::crc32_ieee;
use parlance_parser::ExpressionParser;
use parlance_runtime::Library;

use crate::codegen::ONCE_PREFIX;
use crate::{typecheck, Ctx, Diagnostic, Pass};

/// Clé d’en-tête des conditions de groupe.
pub const WHEN_HEADER: &str = "when";
/// En-tête ajouté à chaque membre, valeur : titre du groupe.
pub const NODE_GROUP_HEADER: &str = "$Parlance.Internal.NodeGroup";

/* ─────────────────────────── Conditions ─────────────────────────── */

/// Une valeur d’en-tête `when:`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WhenCondition {
    /// `always`
    Always,
    /// `once`, éventuellement `once if <expr>`
    Once(Option<Expr>),
    /// `<expr>`
    If(Expr),
}

impl WhenCondition {
    pub(crate) fn parse(value: &str, library: &Library) -> Result<Self, String> {
        let parse = |src: &str| ExpressionParser::new().with_signatures(library).parse_str(src).map_err(|e| e.message);
        let value = value.trim();
        let mut words = value.splitn(2, char::is_whitespace);
        match (words.next(), words.next().map(str::trim_start)) {
            (Some("always"), None) => Ok(Self::Always),
            (Some("once"), None) => Ok(Self::Once(None)),
            (Some("once"), Some(rest)) => match rest.strip_prefix("if") {
                Some(expr) if expr.starts_with(|c: char| c.is_whitespace() || c == '(') => {
                    parse(expr).map(|e| Self::Once(Some(e)))
                }
                _ => Err(format!("expected `once if <condition>`, found `{value}`")),
            },
            _ if value.is_empty() => Err("empty condition".into()),
            _ => parse(value).map(Self::If),
        }
    }

    /// Score de saillance : feuilles booléennes, plus un pour `once`.
    pub(crate) fn complexity(&self) -> usize {
        match self {
            Self::Always => 0,
            Self::Once(extra) => 1 + extra.as_ref().map_or(0, Expr::boolean_complexity),
            Self::If(e) => e.boolean_complexity(),
        }
    }

    pub(crate) fn expression(&self) -> Option<&Expr> {
        match self {
            Self::Always | Self::Once(None) => None,
            Self::Once(Some(e)) | Self::If(e) => Some(e),
        }
    }
}

/* ─────────────────────────── Membres ─────────────────────────── */

/// Un nœud membre d’un groupe.
#[derive(Debug, Clone)]
pub(crate) struct GroupMember {
    /// Index du script.
    pub script: usize,
    /// Index du nœud dans le script.
    pub index: usize,
    /// Nom unique dans le programme.
    pub name: String,
    pub conditions: Vec<WhenCondition>,
    pub span: Option<Span>,
}

impl GroupMember {
    pub(crate) fn complexity(&self) -> usize { self.conditions.iter().map(WhenCondition::complexity).sum() }

    pub(crate) fn has_once(&self) -> bool { self.conditions.iter().any(|c| matches!(c, WhenCondition::Once(_))) }

    /// Garde `once` du membre.
    pub(crate) fn once_variable(&self) -> String { format!("{ONCE_PREFIX}{}", self.name) }

    /// Copie de `decl` renommée, marquée par `NODE_GROUP_HEADER`.
    pub(crate) fn rename(&self, decl: &NodeDecl) -> NodeDecl {
        let mut renamed = decl.clone();
        renamed.title.clone_from(&self.name);
        renamed.headers.push(HeaderDecl { key: NODE_GROUP_HEADER.into(), value: decl.title.clone() });
        renamed
    }
}

/* ─────────────────────────── Passe ─────────────────────────── */

/// Groupes trouvés, par titre ; membres dans l’ordre des sources.
#[derive(Debug, Default)]
pub(crate) struct NodeGroups {
    groups: BTreeMap<String, Vec<GroupMember>>,
}

impl NodeGroups {
    pub(crate) fn contains(&self, title: &str) -> bool { self.groups.contains_key(title) }

    /// Membre correspondant au nœud `index` du script `script`.
    pub(crate) fn member(&self, script: usize, index: usize, title: &str) -> Option<&GroupMember> {
        self.groups.get(title)?.iter().find(|m| m.script == script && m.index == index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &[GroupMember])> {
        self.groups.iter().map(|(title, members)| (title.as_str(), members.as_slice()))
    }
}

impl Pass for NodeGroups {
    fn run(&mut self, ctx: &mut Ctx<'_>, scripts: &[Script]) {
        let mut ungrouped: Vec<(&str, &str, Option<Span>)> = Vec::new();
        for (script_index, script) in scripts.iter().enumerate() {
            for (index, node) in script.nodes.iter().enumerate() {
                let mut headers = node.headers.iter().filter(|h| h.key == WHEN_HEADER).peekable();
                if headers.peek().is_none() {
                    ungrouped.push((node.title.as_str(), script.file.as_str(), node.span));
                    continue;
                }
                let mut conditions = Vec::new();
                for header in headers {
                    match WhenCondition::parse(&header.value, ctx.library) {
                        Ok(condition) => conditions.push(condition),
                        Err(e) => ctx.diags.push(
                            Diagnostic::error(format!("invalid `when` header on `{}`: {e}", node.title), node.span)
                                .in_file(&script.file),
                        ),
                    }
                }
                for expr in conditions.iter().filter_map(WhenCondition::expression) {
                    typecheck::check_condition(ctx, &script.file, node.span, expr);
                }

                let members = self.groups.entry(node.title.clone()).or_default();
                let key = format!("{}:{}:{}", script.file, node.title, members.len());
                let name = format!("{}.{:08x}", node.title, crc32_ieee(key.as_bytes()));
                #[cfg(feature = "tracing")]
                tracing::trace!(group = %node.title, member = %name, "node group member");
                members.push(GroupMember { script: script_index, index, name, conditions, span: node.span });
            }
        }

        for (title, file, span) in ungrouped {
            if self.contains(title) {
                let message =
                    format!("all nodes in the group `{title}` must have a `when` header (use `when: always` to always run it)");
                ctx.diags.push(Diagnostic::error(message, span).in_file(file));
            }
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
