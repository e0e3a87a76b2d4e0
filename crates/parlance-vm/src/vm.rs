//! Boucle de dispatch et machine à états.
//!
//! fetch → avance `pc` → exécute. Les sauts réécrivent `pc`. La boucle ne
//! tourne que dans l’état `Running` ; toute livraison à l’hôte qui demande
//! une pause fait sortir de la boucle, et `continue_dialogue` y revient.

use std::sync::Arc;

use parlance_core::{Arity, Instruction, Node, Program};
use parlance_runtime::{Error as RtError, FunctionKind, Library, Value};
use smallvec::SmallVec;

use crate::handler::{substitute, DialogueHandler, DialogueOption, HandlerResult, Line};
use crate::saliency::{SaliencyCandidate, SaliencyStrategy};
use crate::store::{MemoryVariableStore, VariableStore};
use crate::{ExecutionState, VmConfig, VmError, VmResult};

/// Arguments / substitutions dépilés (rarement plus de quatre).
type Args = SmallVec<[Value; 4]>;

/// Position d’exécution : nœud + prochaine instruction.
#[derive(Debug, Clone)]
struct Frame {
    node: String,
    pc: usize,
}

#[allow(clippy::cast_precision_loss)]
fn index_value(index: usize) -> Value { Value::Number(index as f64) }

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn value_index(value: &Value) -> VmResult<usize> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        other => Err(RtError::type_mismatch("non-negative integer", other).into()),
    }
}

fn underflow(node: &Node, pc: usize) -> VmError { VmError::StackUnderflow { node: node.name.clone(), pc } }

/* ─────────────────────────── VM ─────────────────────────── */

/// Machine virtuelle de dialogue.
///
/// `H` reçoit les événements, `S` porte les variables. Le programme est
/// partagé en lecture seule.
pub struct VirtualMachine<H, S = MemoryVariableStore> {
    program: Arc<Program>,
    library: Library,
    handler: H,
    store: S,
    config: VmConfig,
    saliency: Box<dyn SaliencyStrategy>,
    state: ExecutionState,
    current: Option<Frame>,
    call_stack: Vec<Frame>,
    stack: Vec<Value>,
    options: Vec<DialogueOption>,
    candidates: Vec<SaliencyCandidate>,
}

impl<H: DialogueHandler, S: VariableStore> VirtualMachine<H, S> {
    /// VM avec la configuration par défaut.
    pub fn new(program: Arc<Program>, library: Library, handler: H, store: S) -> Self {
        Self::with_config(program, library, handler, store, VmConfig::default())
    }

    /// VM configurée.
    pub fn with_config(program: Arc<Program>, library: Library, handler: H, store: S, config: VmConfig) -> Self {
        Self {
            program,
            library,
            handler,
            store,
            saliency: config.saliency.strategy(),
            config,
            state: ExecutionState::Suspended,
            current: None,
            call_stack: Vec::new(),
            stack: Vec::new(),
            options: Vec::new(),
            candidates: Vec::new(),
        }
    }

    /// Remplace la stratégie de saillance.
    pub fn set_saliency_strategy(&mut self, strategy: Box<dyn SaliencyStrategy>) { self.saliency = strategy; }

    /// Remplace le programme ; la VM attend un nouveau `set_node`.
    pub fn set_program(&mut self, program: Arc<Program>) {
        self.reset();
        self.program = program;
        self.state = ExecutionState::Suspended;
    }

    /* ───── accès ───── */

    /// État courant.
    pub const fn state(&self) -> ExecutionState { self.state }

    /// Vrai une fois le dialogue terminé.
    pub fn is_stopped(&self) -> bool { self.state == ExecutionState::Stopped }

    /// Nœud en cours.
    pub fn current_node(&self) -> Option<&str> { self.current.as_ref().map(|f| f.node.as_str()) }

    /// Programme exécuté.
    pub const fn program(&self) -> &Arc<Program> { &self.program }

    /// Bibliothèque de fonctions.
    pub const fn library(&self) -> &Library { &self.library }

    /// Configuration.
    pub const fn config(&self) -> &VmConfig { &self.config }

    /// Options présentées, en attente de choix.
    pub fn options(&self) -> &[DialogueOption] { &self.options }

    /// Handler.
    pub const fn handler(&self) -> &H { &self.handler }

    /// Handler (mutable).
    pub fn handler_mut(&mut self) -> &mut H { &mut self.handler }

    /// Variables.
    pub const fn variables(&self) -> &S { &self.store }

    /// Variables (mutable).
    pub fn variables_mut(&mut self) -> &mut S { &mut self.store }

    /// Rend handler et variables.
    pub fn into_parts(self) -> (H, S) { (self.handler, self.store) }

    /* ───── pilotage par l’hôte ───── */

    /// Sélectionne le nœud de départ et remet la VM à zéro.
    ///
    /// `prepare_for_lines` puis `on_node_start` sont livrés immédiatement.
    /// Un nœud inconnu est refusé sans toucher à l’état courant.
    pub fn set_node(&mut self, name: &str) -> VmResult<()> {
        self.ensure_node(name)?;
        self.reset();
        self.state = ExecutionState::Suspended;
        self.enter(name);
        Ok(())
    }

    /// Démarre ou reprend l’exécution jusqu’à la prochaine pause.
    ///
    /// Sans effet après la fin du dialogue.
    pub fn continue_dialogue(&mut self) -> VmResult<()> {
        match self.state {
            ExecutionState::Stopped => return Ok(()),
            state @ (ExecutionState::Running | ExecutionState::WaitingForOptionSelection) => {
                return self.fail(VmError::InvalidState { operation: "continue", state });
            }
            _ => {}
        }
        if self.current.is_none() {
            return self.fail(VmError::NoNodeSelected);
        }
        self.state = ExecutionState::Running;
        match self.run() {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Choisit l’option `index` ; reprendre ensuite avec `continue_dialogue`.
    ///
    /// Un index hors bornes est refusé ; les options restent en attente.
    pub fn select_option(&mut self, index: usize) -> VmResult<()> {
        if self.state != ExecutionState::WaitingForOptionSelection {
            return Err(VmError::InvalidState { operation: "select an option", state: self.state });
        }
        let Some(option) = self.options.get(index) else {
            return Err(VmError::InvalidOption { index, count: self.options.len() });
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(index, line = %option.line.id, enabled = option.enabled, "option selected");
        // lue par PeekAndJump
        self.stack.push(index_value(option.destination));
        self.options.clear();
        self.state = ExecutionState::Suspended;
        Ok(())
    }

    /// Arrêt demandé par l’hôte, depuis n’importe quel état.
    pub fn stop(&mut self) {
        if self.state != ExecutionState::Stopped {
            self.finish();
        }
    }

    /* ───── état interne ───── */

    fn reset(&mut self) {
        self.current = None;
        self.call_stack.clear();
        self.stack.clear();
        self.options.clear();
        self.candidates.clear();
    }

    fn fail<T>(&mut self, error: VmError) -> VmResult<T> {
        #[cfg(feature = "tracing")]
        tracing::error!(%error, node = ?self.current_node(), "dialogue stopped on error");
        self.reset();
        self.state = ExecutionState::Stopped;
        Err(error)
    }

    /// Fin du dialogue ; `on_dialogue_complete` une seule fois.
    fn finish(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::info!("dialogue complete");
        self.reset();
        self.state = ExecutionState::Stopped;
        self.handler.on_dialogue_complete();
    }

    fn pause_if(&mut self, result: HandlerResult) {
        if result == HandlerResult::Pause && self.state == ExecutionState::Running {
            self.state = ExecutionState::Suspended;
        }
    }

    fn ensure_node(&self, name: &str) -> VmResult<()> {
        match self.program.node(name) {
            Some(_) => Ok(()),
            None => Err(VmError::UnknownNode(name.to_owned())),
        }
    }

    fn enter(&mut self, name: &str) -> HandlerResult {
        let program = Arc::clone(&self.program);
        if let Some(node) = program.node(name) {
            self.handler.prepare_for_lines(&node.line_ids());
        }
        self.current = Some(Frame { node: name.to_owned(), pc: 0 });
        #[cfg(feature = "tracing")]
        tracing::debug!(node = name, "node start");
        if self.config.node_events {
            self.handler.on_node_start(name)
        } else {
            HandlerResult::Continue
        }
    }

    /// Sortie d’un nœud : compteur de visites, puis événement.
    fn complete(&mut self, name: &str) -> HandlerResult {
        let program = Arc::clone(&self.program);
        if let Some(var) = program.node(name).and_then(|n| n.tracking_variable.as_deref()) {
            let visits = self.visits(var);
            self.store.set(var, Value::Number(visits + 1.0));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(node = name, "node complete");
        if self.config.node_events {
            self.handler.on_node_complete(name)
        } else {
            HandlerResult::Continue
        }
    }

    /// Termine le nœud courant et toute la pile d’appels (sommet d’abord).
    fn unwind(&mut self) -> HandlerResult {
        let frames: Vec<Frame> = self.current.take().into_iter().chain(self.call_stack.drain(..).rev()).collect();
        let mut result = HandlerResult::Continue;
        for frame in frames {
            if self.complete(&frame.node) == HandlerResult::Pause {
                result = HandlerResult::Pause;
            }
        }
        result
    }

    fn return_from_node(&mut self) {
        let Some(frame) = self.current.take() else {
            self.finish();
            return;
        };
        let result = self.complete(&frame.node);
        match self.call_stack.pop() {
            Some(caller) => {
                self.current = Some(caller);
                self.pause_if(result);
            }
            None => self.finish(),
        }
    }

    fn run_node(&mut self, name: &str) -> VmResult<()> {
        self.ensure_node(name)?;
        let unwound = self.unwind();
        self.stack.clear();
        self.options.clear();
        self.candidates.clear();
        let started = self.enter(name);
        self.pause_if(unwound);
        self.pause_if(started);
        Ok(())
    }

    fn detour(&mut self, name: &str) -> VmResult<()> {
        self.ensure_node(name)?;
        if let Some(frame) = self.current.take() {
            self.call_stack.push(frame);
        }
        let started = self.enter(name);
        self.pause_if(started);
        Ok(())
    }

    /* ───── variables & fonctions ───── */

    /// Valeur d’une variable : stockage, sinon valeur initiale du programme.
    fn variable(&self, name: &str) -> VmResult<Value> {
        match self.store.get(name) {
            Value::Null => self
                .program
                .initial_values
                .get(name)
                .cloned()
                .map(Value::from)
                .ok_or_else(|| VmError::UnknownVariable(name.to_owned())),
            value => Ok(value),
        }
    }

    fn visits(&self, tracking_variable: &str) -> f64 {
        match self.variable(tracking_variable) {
            Ok(Value::Number(n)) => n,
            _ => 0.0,
        }
    }

    fn call(&mut self, node: &Node, pc: usize, name: &str) -> VmResult<Value> {
        let count = value_index(&self.pop(node, pc)?)?;
        let args = self.pop_n(node, pc, count)?;
        let entry = self.library.lookup(name).ok_or_else(|| RtError::NotFound(name.to_owned()))?;
        if !entry.arity.accepts(args.len()) {
            return Err(RtError::Arity { name: name.to_owned(), expected: entry.arity, got: args.len() }.into());
        }
        match &entry.kind {
            FunctionKind::Native(f) => Ok(f(args.as_slice())?),
            FunctionKind::Intrinsic => self.intrinsic(name, args.as_slice()),
        }
    }

    /// `visited` / `visited_count` : lecture du compteur du nœud cible.
    fn intrinsic(&self, name: &str, args: &[Value]) -> VmResult<Value> {
        let [target] = args else {
            return Err(RtError::Arity { name: name.to_owned(), expected: Arity::Fixed(1), got: args.len() }.into());
        };
        let target = target.as_str()?;
        let node = self.program.node(target).ok_or_else(|| VmError::UnknownNode(target.to_owned()))?;
        let count = node.tracking_variable.as_deref().map_or(0.0, |var| self.visits(var));
        match name {
            "visited" => Ok(Value::Bool(count > 0.0)),
            "visited_count" => Ok(Value::Number(count)),
            other => Err(RtError::Intrinsic(other.to_owned()).into()),
        }
    }

    /* ───── pile ───── */

    fn pop(&mut self, node: &Node, pc: usize) -> VmResult<Value> { self.stack.pop().ok_or_else(|| underflow(node, pc)) }

    fn peek(&self, node: &Node, pc: usize) -> VmResult<&Value> { self.stack.last().ok_or_else(|| underflow(node, pc)) }

    /// Dépile `count` valeurs, rendues dans l’ordre d’empilement.
    fn pop_n(&mut self, node: &Node, pc: usize, count: usize) -> VmResult<Args> {
        let at = self.stack.len().checked_sub(count).ok_or_else(|| underflow(node, pc))?;
        Ok(self.stack.drain(at..).collect())
    }

    fn line(&mut self, node: &Node, pc: usize, id: &str, substitutions: usize) -> VmResult<Line> {
        let values = self.pop_n(node, pc, substitutions)?;
        Ok(Line { id: id.to_owned(), substitutions: values.iter().map(ToString::to_string).collect() })
    }

    fn jump(&mut self, node: &Node, destination: usize) -> VmResult<()> {
        if destination >= node.instructions.len() {
            return Err(VmError::BadJump { node: node.name.clone(), destination });
        }
        if let Some(frame) = self.current.as_mut() {
            frame.pc = destination;
        }
        Ok(())
    }

    /* ───── dispatch ───── */

    fn run(&mut self) -> VmResult<()> {
        let program = Arc::clone(&self.program);
        while self.state == ExecutionState::Running {
            let Some(frame) = self.current.as_mut() else {
                return Err(VmError::NoNodeSelected);
            };
            let node = program.node(&frame.node).ok_or_else(|| VmError::UnknownNode(frame.node.clone()))?;
            let pc = frame.pc;
            match node.instructions.get(pc) {
                Some(instruction) => {
                    frame.pc += 1;
                    #[cfg(feature = "tracing")]
                    tracing::trace!(node = %node.name, pc, op = instruction.mnemonic(), depth = self.stack.len());
                    self.execute(node, pc, instruction)?;
                }
                // fin de nœud sans Return explicite
                None if pc == node.instructions.len() => self.return_from_node(),
                None => return Err(VmError::BadJump { node: node.name.clone(), destination: pc }),
            }
        }
        Ok(())
    }

    fn execute(&mut self, node: &Node, pc: usize, instruction: &Instruction) -> VmResult<()> {
        match instruction {
            Instruction::PushNumber(n) => self.stack.push(Value::Number(*n)),
            Instruction::PushString(s) => self.stack.push(Value::Str(s.clone())),
            Instruction::PushBool(b) => self.stack.push(Value::Bool(*b)),
            Instruction::PushNull => self.stack.push(Value::Null),
            Instruction::PushVariable { name } => {
                let value = self.variable(name)?;
                self.stack.push(value);
            }
            Instruction::StoreVariable { name } => {
                let value = self.peek(node, pc)?.clone();
                self.store.set(name, value);
            }
            Instruction::Pop => {
                self.pop(node, pc)?;
            }
            Instruction::CallFunction { name } => {
                let result = self.call(node, pc, name)?;
                self.stack.push(result);
            }
            Instruction::JumpTo { destination } => self.jump(node, *destination)?,
            Instruction::JumpIfFalse { destination } => {
                if !self.peek(node, pc)?.as_bool()? {
                    self.jump(node, *destination)?;
                }
            }
            Instruction::PeekAndJump => {
                let destination = value_index(self.peek(node, pc)?)?;
                self.jump(node, destination)?;
            }
            Instruction::RunLine { line_id, substitutions } => {
                let line = self.line(node, pc, line_id, *substitutions)?;
                self.state = ExecutionState::WaitingForLineComplete;
                if self.handler.on_line(&line) == HandlerResult::Continue {
                    self.state = ExecutionState::Running;
                }
            }
            Instruction::RunCommand { text, substitutions } => {
                let values = self.pop_n(node, pc, *substitutions)?;
                let shown: Vec<String> = values.iter().map(ToString::to_string).collect();
                let text = substitute(text, &shown);
                self.state = ExecutionState::WaitingForCommandComplete;
                if self.handler.on_command(&text, &values) == HandlerResult::Continue {
                    self.state = ExecutionState::Running;
                }
            }
            Instruction::AddOption { line_id, destination, substitutions, has_condition } => {
                let line = self.line(node, pc, line_id, *substitutions)?;
                let enabled = if *has_condition { self.pop(node, pc)?.as_bool()? } else { true };
                let id = self.options.len();
                self.options.push(DialogueOption { id, line, destination: *destination, enabled });
            }
            Instruction::ShowOptions => {
                if self.options.is_empty() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(node = %node.name, "no options to show, ending dialogue");
                    self.finish();
                } else {
                    self.state = ExecutionState::WaitingForOptionSelection;
                    self.handler.on_options(&self.options);
                }
            }
            Instruction::RunNode { name } => self.run_node(name)?,
            Instruction::PeekAndRunNode => {
                let name = self.peek(node, pc)?.as_str()?.to_owned();
                self.run_node(&name)?;
            }
            Instruction::DetourToNode { name } => self.detour(name)?,
            Instruction::PeekAndDetourToNode => {
                let name = self.peek(node, pc)?.as_str()?.to_owned();
                self.detour(&name)?;
            }
            Instruction::AddSaliencyCandidate { content_id, complexity, destination } => {
                let passing = self.pop(node, pc)?.as_bool()?;
                self.candidates.push(SaliencyCandidate {
                    content_id: content_id.clone(),
                    complexity: *complexity,
                    destination: *destination,
                    passing,
                });
            }
            Instruction::SelectSaliencyCandidate => {
                let candidates = std::mem::take(&mut self.candidates);
                let chosen = self.saliency.select(&candidates, &self.store).and_then(|i| candidates.get(i));
                match chosen {
                    Some(candidate) => {
                        self.saliency.selected(candidate, &mut self.store);
                        self.stack.push(index_value(candidate.destination));
                        self.stack.push(Value::Bool(true));
                    }
                    None => self.stack.push(Value::Bool(false)),
                }
            }
            Instruction::Return => self.return_from_node(),
            Instruction::Stop => {
                self.unwind();
                self.finish();
            }
        }
        Ok(())
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
