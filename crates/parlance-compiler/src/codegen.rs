//! Génération de code : un `NodeDecl` → un `Node` de bytecode.
//!
//! Chaque saut avant est émis avec `UNPATCHED`, son index est gardé, puis
//! patché juste avant d’émettre l’instruction cible. Aucune passe de
//! résolution d’étiquettes : à la fin du nœud, toutes les destinations sont
//! des index valides.

use std::collections::BTreeSet;

use parlance_ast::{
    BinaryOp, Expr, IfClause, Line, LineCondition, LineGroupItem, Literal, NodeDecl, NodeTarget, ShortcutOption, Span,
    Stmt, TextPart, UnaryOp,
};
use parlance_core::{crc32_ieee, Constant, CoreResult, Header, Instruction, LineInfo, Node, Program, UNPATCHED};

use crate::groups::{GroupMember, WhenCondition};
use crate::typecheck::Typer;
use crate::{walk, CompilerOptions};

/// Préfixe des gardes `once`.
pub const ONCE_PREFIX: &str = "$Parlance.Internal.Once.";
/// Préfixe des compteurs de visites.
pub const VISITING_PREFIX: &str = "$Parlance.Internal.Visiting.";

/// Variable de comptage des visites de `node`.
pub fn tracking_variable(node: &str) -> String { format!("{VISITING_PREFIX}{node}") }

/// Nœuds ciblés par `visited("…")` / `visited_count("…")` avec un nom littéral.
pub(crate) fn tracked_nodes(scripts: &[parlance_ast::Script]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut visit = |e: &Expr| {
        walk::subexpressions(e, &mut |sub| {
            if let Expr::Call { name, args } = sub {
                if let ([Expr::Literal(Literal::Str(node))], "visited" | "visited_count") = (args.as_slice(), name.as_str()) {
                    out.insert(node.clone());
                }
            }
        });
    };
    for script in scripts {
        script.declarations.iter().for_each(|d| visit(&d.value));
        for node in &script.nodes {
            walk::statements(&node.body, &mut |stmt| walk::expressions(stmt, &mut visit));
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn push_count(count: usize) -> Instruction { Instruction::PushNumber(count as f64) }

/// Texte d’une ligne avec marqueurs `{n}`, et ses expressions dans l’ordre.
fn compose(parts: &[TextPart]) -> (String, Vec<&Expr>) {
    let mut text = String::new();
    let mut exprs = Vec::new();
    for part in parts {
        match part {
            TextPart::Text(s) => text.push_str(s),
            TextPart::Expr(e) => {
                text.push_str(&format!("{{{}}}", exprs.len()));
                exprs.push(e);
            }
        }
    }
    (text, exprs)
}

/* ─────────────────────────── Générateur ─────────────────────────── */

/// Générateur pour un nœud.
///
/// Écrit dans `program` la table de chaînes et les valeurs initiales des
/// variables internes (gardes, compteurs) ; rend le `Node`.
pub(crate) struct CodeGenerator<'a> {
    file: &'a str,
    options: &'a CompilerOptions,
    typer: Typer<'a>,
    tracked: &'a BTreeSet<String>,
    program: &'a mut Program,
    node: Node,
    generated_lines: usize,
    once_sites: usize,
    labels: usize,
    smart_stack: Vec<String>,
}

impl<'a> CodeGenerator<'a> {
    pub(crate) fn new(
        file: &'a str,
        options: &'a CompilerOptions,
        typer: Typer<'a>,
        tracked: &'a BTreeSet<String>,
        program: &'a mut Program,
    ) -> Self {
        Self {
            file,
            options,
            typer,
            tracked,
            program,
            node: Node::default(),
            generated_lines: 0,
            once_sites: 0,
            labels: 0,
            smart_stack: Vec::new(),
        }
    }

    /// Compile `decl` ; le nœud se termine toujours par `Return`.
    pub(crate) fn generate(mut self, decl: &NodeDecl) -> CoreResult<Node> {
        self.node = Node::new(decl.title.clone());
        self.node.source_file = Some(self.file.to_owned());
        self.node.headers = decl.headers.iter().map(|h| Header { key: h.key.clone(), value: h.value.clone() }).collect();
        self.track(&decl.title);

        self.node.label_here("start");
        self.block(&decl.body)?;
        self.node.emit(Instruction::Return);
        Ok(self.node)
    }

    /// Nœud pivot du groupe `title` : un candidat par membre, puis détour
    /// vers l’élu. Sans candidat retenu, le pivot rend la main.
    pub(crate) fn generate_group(mut self, title: &str, members: &[GroupMember]) -> CoreResult<Node> {
        self.node = Node::new(title);
        self.node.source_file = Some(self.file.to_owned());
        self.track(title);
        self.node.label_here("start");

        let mut pending = Vec::with_capacity(members.len());
        for member in members {
            self.when_conditions(member);
            let add = self.node.emit(Instruction::AddSaliencyCandidate {
                content_id: member.name.clone(),
                complexity: member.complexity(),
                destination: UNPATCHED,
            });
            pending.push(add);
        }

        self.node.emit(Instruction::SelectSaliencyCandidate);
        let none_selected = self.node.emit(Instruction::JumpIfFalse { destination: UNPATCHED });
        self.node.emit(Instruction::Pop);
        self.node.emit(Instruction::PeekAndJump);

        for (member, add) in members.iter().zip(pending) {
            self.node.label_here(format!("nodegroup_run_{}", member.name));
            self.node.patch_here(add)?;
            self.node.emit(Instruction::Pop);
            if member.has_once() {
                self.set_guard(&member.once_variable());
            }
            self.node.emit(Instruction::DetourToNode { name: member.name.clone() });
            self.node.emit(Instruction::Return);
        }

        self.node.label_here("nodegroup_none_viable");
        self.node.patch_here(none_selected)?;
        self.node.emit(Instruction::Pop);
        self.node.emit(Instruction::Return);
        Ok(self.node)
    }

    /// Compteur de visites si le nœud est suivi.
    fn track(&mut self, title: &str) {
        let tracking = self.node.header("tracking").map(str::trim);
        if tracking != Some("never") && (tracking == Some("always") || self.tracked.contains(title)) {
            let var = tracking_variable(title);
            self.program.initial_values.insert(var.clone(), Constant::Number(0.0));
            self.node.tracking_variable = Some(var);
        }
    }

    /// Empile la conjonction des `when:` d’un membre (`true` s’il n’y en a pas).
    fn when_conditions(&mut self, member: &GroupMember) {
        let mut pushed = 0;
        for condition in &member.conditions {
            match condition {
                WhenCondition::Always => continue,
                WhenCondition::Once(extra) => {
                    let guard = member.once_variable();
                    self.program.initial_values.insert(guard.clone(), Constant::Bool(false));
                    self.once_condition(&guard, extra.as_ref());
                }
                WhenCondition::If(e) => self.expr(e),
            }
            pushed += 1;
            if pushed > 1 {
                self.node.emit(push_count(2));
                self.node.emit(Instruction::CallFunction { name: "Bool.And".into() });
            }
        }
        if pushed == 0 {
            self.node.emit(Instruction::PushBool(true));
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> CoreResult<()> {
        stmts.iter().try_for_each(|s| self.statement(s))
    }

    fn statement(&mut self, stmt: &Stmt) -> CoreResult<()> {
        match stmt {
            Stmt::Line(line) => self.line(line)?,
            Stmt::If { clauses, .. } => self.if_statement(clauses)?,
            Stmt::Options { options, .. } => self.options(options)?,
            Stmt::LineGroup { items, .. } => self.line_group(items)?,
            Stmt::Once { condition, body, alternate, span } => {
                self.once(condition.as_ref(), body, alternate.as_deref(), *span)?;
            }
            Stmt::Set { variable, op, value, .. } => {
                match op.binary() {
                    Some(bin) => self.binary(&Expr::var(variable.clone()), bin, value),
                    None => self.expr(value),
                }
                self.node.emit(Instruction::StoreVariable { name: variable.clone() });
                self.node.emit(Instruction::Pop);
            }
            Stmt::Call { name, args, .. } => {
                self.call(name, args);
                self.node.emit(Instruction::Pop);
            }
            Stmt::Command { parts, .. } => self.command(parts),
            Stmt::Jump { target, .. } => self.transfer(target, false),
            Stmt::Detour { target, .. } => self.transfer(target, true),
            Stmt::Return { .. } => {
                self.node.emit(Instruction::Return);
            }
            Stmt::Declare(_) => {}
        }
        Ok(())
    }

    fn fresh_label(&mut self, base: &str) -> String {
        self.labels += 1;
        format!("{base}_{}", self.labels)
    }

    /* ───── lignes ───── */

    /// Enregistre `line` dans la table de chaînes et rend son id.
    fn register_line(&mut self, line: &Line) -> String {
        let id = line.line_id.clone().unwrap_or_else(|| {
            self.generated_lines += 1;
            format!("{}{}-{}-{}", self.options.line_id_prefix, self.file, self.node.name, self.generated_lines)
        });
        let (text, _) = compose(&line.text);
        let info = LineInfo {
            text,
            file: self.file.to_owned(),
            node: self.node.name.clone(),
            line_number: line.span.map_or(0, |s| s.line),
            tags: line.tags.clone(),
        };
        self.program.strings.insert(id.clone(), info);
        id
    }

    /// Nom de garde d’un contenu `once`, déclaré à `false`.
    fn guard(&mut self, line_id: Option<&str>, span: Option<Span>) -> String {
        let name = match (line_id, span) {
            (Some(id), _) => format!("{ONCE_PREFIX}{id}"),
            (None, Some(span)) => {
                let key = format!("{}:{}:{}:{}", self.file, self.node.name, span.line, span.column);
                format!("{ONCE_PREFIX}{:08x}", crc32_ieee(key.as_bytes()))
            }
            (None, None) => {
                self.once_sites += 1;
                let key = format!("{}:{}:#{}", self.file, self.node.name, self.once_sites);
                format!("{ONCE_PREFIX}{:08x}", crc32_ieee(key.as_bytes()))
            }
        };
        self.program.initial_values.insert(name.clone(), Constant::Bool(false));
        name
    }

    fn line_guard(&mut self, line: &Line) -> Option<String> {
        match line.condition {
            Some(LineCondition::Once(_)) => Some(self.guard(line.line_id.as_deref(), line.span)),
            _ => None,
        }
    }

    /// `not guard`, éventuellement `and extra`.
    fn once_condition(&mut self, guard: &str, extra: Option<&Expr>) {
        self.node.emit(Instruction::PushVariable { name: guard.to_owned() });
        self.node.emit(push_count(1));
        self.node.emit(Instruction::CallFunction { name: "Bool.Not".into() });
        if let Some(extra) = extra {
            self.expr(extra);
            self.node.emit(push_count(2));
            self.node.emit(Instruction::CallFunction { name: "Bool.And".into() });
        }
    }

    fn set_guard(&mut self, guard: &str) {
        self.node.emit(Instruction::PushBool(true));
        self.node.emit(Instruction::StoreVariable { name: guard.to_owned() });
        self.node.emit(Instruction::Pop);
    }

    /// Empile la condition d’une ligne ; rend sa complexité.
    fn line_condition(&mut self, condition: &LineCondition, guard: Option<&str>) -> usize {
        match (condition, guard) {
            (LineCondition::Once(extra), Some(guard)) => {
                self.once_condition(guard, extra.as_ref());
                1 + extra.as_ref().map_or(0, Expr::boolean_complexity)
            }
            (LineCondition::If(e), _) | (LineCondition::Once(Some(e)), None) => {
                self.expr(e);
                e.boolean_complexity()
            }
            (LineCondition::Once(None), None) => {
                self.node.emit(Instruction::PushBool(true));
                0
            }
        }
    }

    fn substitutions(&mut self, parts: &[TextPart]) -> usize {
        let (_, exprs) = compose(parts);
        for e in &exprs {
            self.expr(e);
        }
        exprs.len()
    }

    fn line(&mut self, line: &Line) -> CoreResult<()> {
        let id = self.register_line(line);
        let guard = self.line_guard(line);
        let skip = match &line.condition {
            Some(condition) => {
                self.line_condition(condition, guard.as_deref());
                Some(self.node.emit(Instruction::JumpIfFalse { destination: UNPATCHED }))
            }
            None => None,
        };
        if let Some(guard) = &guard {
            self.set_guard(guard);
        }
        let substitutions = self.substitutions(&line.text);
        self.node.emit(Instruction::RunLine { line_id: id, substitutions });
        if let Some(skip) = skip {
            // les deux chemins arrivent ici avec la condition sur la pile
            self.node.patch_here(skip)?;
            self.node.emit(Instruction::Pop);
        }
        Ok(())
    }

    /* ───── contrôle ───── */

    fn if_statement(&mut self, clauses: &[IfClause]) -> CoreResult<()> {
        let mut exits = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match &clause.condition {
                Some(condition) => {
                    self.expr(condition);
                    let skip = self.node.emit(Instruction::JumpIfFalse { destination: UNPATCHED });
                    self.node.emit(Instruction::Pop);
                    self.block(&clause.body)?;
                    exits.push(self.node.emit(Instruction::JumpTo { destination: UNPATCHED }));
                    let label = self.fresh_label("skipclause");
                    self.node.label_here(label);
                    self.node.patch_here(skip)?;
                    self.node.emit(Instruction::Pop);
                }
                None => {
                    self.block(&clause.body)?;
                    exits.push(self.node.emit(Instruction::JumpTo { destination: UNPATCHED }));
                }
            }
        }
        let label = self.fresh_label("endif");
        self.node.label_here(label);
        exits.into_iter().try_for_each(|exit| self.node.patch_here(exit))
    }

    fn options(&mut self, options: &[ShortcutOption]) -> CoreResult<()> {
        let mut pending = Vec::with_capacity(options.len());
        for option in options {
            let line_id = self.register_line(&option.line);
            let guard = self.line_guard(&option.line);
            let has_condition = match &option.line.condition {
                Some(condition) => {
                    self.line_condition(condition, guard.as_deref());
                    true
                }
                None => false,
            };
            let substitutions = self.substitutions(&option.line.text);
            let add = self.node.emit(Instruction::AddOption {
                line_id,
                destination: UNPATCHED,
                substitutions,
                has_condition,
            });
            pending.push((add, guard));
        }

        self.node.emit(Instruction::ShowOptions);
        self.node.emit(Instruction::PeekAndJump);

        let mut exits = Vec::with_capacity(options.len());
        for (option, (add, guard)) in options.iter().zip(pending) {
            let label = self.fresh_label("option");
            self.node.label_here(label);
            self.node.patch_here(add)?;
            if let Some(guard) = &guard {
                self.set_guard(guard);
            }
            self.block(&option.body)?;
            exits.push(self.node.emit(Instruction::JumpTo { destination: UNPATCHED }));
        }

        let label = self.fresh_label("group_end");
        self.node.label_here(label);
        for exit in exits {
            self.node.patch_here(exit)?;
        }
        // destination choisie, empilée par la VM
        self.node.emit(Instruction::Pop);
        Ok(())
    }

    fn line_group(&mut self, items: &[LineGroupItem]) -> CoreResult<()> {
        let mut pending = Vec::with_capacity(items.len());
        for item in items {
            let content_id = self.register_line(&item.line);
            let guard = self.line_guard(&item.line);
            let complexity = match &item.line.condition {
                Some(condition) => self.line_condition(condition, guard.as_deref()),
                None => {
                    self.node.emit(Instruction::PushBool(true));
                    0
                }
            };
            let add = self.node.emit(Instruction::AddSaliencyCandidate {
                content_id: content_id.clone(),
                complexity,
                destination: UNPATCHED,
            });
            pending.push((add, content_id, guard));
        }

        self.node.emit(Instruction::SelectSaliencyCandidate);
        let none_selected = self.node.emit(Instruction::JumpIfFalse { destination: UNPATCHED });
        self.node.emit(Instruction::Pop);
        self.node.emit(Instruction::PeekAndJump);

        let mut exits = Vec::with_capacity(items.len());
        for (item, (add, content_id, guard)) in items.iter().zip(pending) {
            let label = self.fresh_label("candidate");
            self.node.label_here(label);
            self.node.patch_here(add)?;
            self.node.emit(Instruction::Pop);
            if let Some(guard) = &guard {
                self.set_guard(guard);
            }
            let substitutions = self.substitutions(&item.line.text);
            self.node.emit(Instruction::RunLine { line_id: content_id, substitutions });
            self.block(&item.body)?;
            exits.push(self.node.emit(Instruction::JumpTo { destination: UNPATCHED }));
        }

        let label = self.fresh_label("no_candidate");
        self.node.label_here(label);
        self.node.patch_here(none_selected)?;
        self.node.emit(Instruction::Pop);

        let label = self.fresh_label("group_end");
        self.node.label_here(label);
        exits.into_iter().try_for_each(|exit| self.node.patch_here(exit))
    }

    fn once(&mut self, condition: Option<&Expr>, body: &[Stmt], alternate: Option<&[Stmt]>, span: Option<Span>) -> CoreResult<()> {
        let guard = self.guard(None, span);
        self.once_condition(&guard, condition);
        let skip = self.node.emit(Instruction::JumpIfFalse { destination: UNPATCHED });
        self.node.emit(Instruction::Pop);
        self.set_guard(&guard);
        self.block(body)?;
        let end = self.node.emit(Instruction::JumpTo { destination: UNPATCHED });

        let label = self.fresh_label("once_else");
        self.node.label_here(label);
        self.node.patch_here(skip)?;
        self.node.emit(Instruction::Pop);
        if let Some(alternate) = alternate {
            self.block(alternate)?;
        }

        let label = self.fresh_label("once_end");
        self.node.label_here(label);
        self.node.patch_here(end)
    }

    fn command(&mut self, parts: &[TextPart]) {
        let (text, exprs) = compose(parts);
        if exprs.is_empty() && text.trim() == "stop" {
            self.node.emit(Instruction::Stop);
            return;
        }
        for e in &exprs {
            self.expr(e);
        }
        self.node.emit(Instruction::RunCommand { text, substitutions: exprs.len() });
    }

    fn transfer(&mut self, target: &NodeTarget, detour: bool) {
        match (target, detour) {
            (NodeTarget::Named(name), false) => {
                self.node.emit(Instruction::RunNode { name: name.clone() });
            }
            (NodeTarget::Named(name), true) => {
                self.node.emit(Instruction::DetourToNode { name: name.clone() });
            }
            (NodeTarget::Expr(e), false) => {
                self.expr(e);
                self.node.emit(Instruction::PeekAndRunNode);
            }
            (NodeTarget::Expr(e), true) => {
                self.expr(e);
                self.node.emit(Instruction::PeekAndDetourToNode);
                // le nom reste sur la pile au retour du détour
                self.node.emit(Instruction::Pop);
            }
        }
    }

    /* ───── expressions ───── */

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(Literal::Number(n)) => {
                self.node.emit(Instruction::PushNumber(*n));
            }
            Expr::Literal(Literal::Str(s)) => {
                self.node.emit(Instruction::PushString(s.clone()));
            }
            Expr::Literal(Literal::Bool(b)) => {
                self.node.emit(Instruction::PushBool(*b));
            }
            Expr::Literal(Literal::Null) => {
                self.node.emit(Instruction::PushNull);
            }
            Expr::Variable(name) => match self.typer.smart_expression(name) {
                Some(_) if self.smart_stack.iter().any(|s| s == name) => {
                    self.node.emit(Instruction::PushNull);
                }
                Some(inline) => {
                    self.smart_stack.push(name.clone());
                    self.expr(inline);
                    self.smart_stack.pop();
                }
                None => {
                    self.node.emit(Instruction::PushVariable { name: name.clone() });
                }
            },
            Expr::Call { name, args } => self.call(name, args),
            Expr::Binary { left, op, right } => self.binary(left, *op, right),
            Expr::Unary { op, expr: operand } => self.unary(*op, operand),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) {
        for arg in args {
            self.expr(arg);
        }
        self.node.emit(push_count(args.len()));
        self.node.emit(Instruction::CallFunction { name: name.to_owned() });
    }

    fn binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) {
        self.expr(left);
        self.expr(right);
        self.node.emit(push_count(2));
        let name = self.typer.binary_function(left, op, right);
        self.node.emit(Instruction::CallFunction { name });
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) {
        self.expr(operand);
        self.node.emit(push_count(1));
        let name = self.typer.unary_function(op, operand);
        self.node.emit(Instruction::CallFunction { name });
    }
}
