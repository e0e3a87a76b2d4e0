//! parlance-cli: bibliothèque interne du binaire `parlance`
//!
//! But : garder la logique testable hors de `main.rs` (qui ne fait que le
//! parsing d'arguments et l'initialisation).
//!
//! Points clés :
//! - Chargement des scripts (AST JSON : un script ou un tableau de scripts)
//! - `compile` : diagnostics colorés, sortie désassemblée ou JSON
//! - `run` : joue un dialogue sur un terminal (options numérotées)
//! - `eval` : évalue une expression isolée via compilateur + VM
//! - Traces (`feature = "trace"`) et couleurs (`feature = "color"`) optionnelles

#![deny(unused_must_use)]
#![forbid(unsafe_code)]

use std::{
    fmt,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

use parlance_ast::{Line as LineDecl, NodeDecl, Script, Stmt, TextPart};
#[cfg(feature = "color")]
use parlance_compiler::Severity;
use parlance_compiler::{Compiler, CompilerOptions, Diagnostic};
use parlance_core::disasm::disassemble_program;
use parlance_core::Program;
use parlance_runtime::Library;
use parlance_vm::{
    DialogueHandler, DialogueOption, ExecutionState, HandlerResult, Line, MemoryVariableStore,
    RandomBestLeastRecentlyViewed, SaliencyKind, VirtualMachine, VmConfig,
};

// ───────────────────────────── Types publics ─────────────────────────────

/// Représente une commande haut-niveau (le parsing CLI reste dans main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// Compiler des scripts vers un programme.
    Compile(CompileTask),
    /// Jouer un dialogue en interactif.
    Run(RunTask),
    /// Évaluer une expression.
    Eval(EvalTask),
}

/// Paramètres de `compile`.
#[derive(Clone, Debug, Default)]
pub struct CompileTask {
    /// Scripts à compiler ensemble.
    pub inputs: Vec<Input>,
    /// Destination du programme.
    pub output: Output,
    /// Format de sortie.
    pub format: ProgramFormat,
    /// Options du compilateur.
    pub options: CompilerOptions,
    /// Afficher le temps de compilation.
    pub time: bool,
}

/// Paramètres de `run`.
#[derive(Clone, Debug)]
pub struct RunTask {
    /// Scripts à compiler puis jouer.
    pub inputs: Vec<Input>,
    /// Nœud de départ.
    pub start: String,
    /// Options du compilateur.
    pub options: CompilerOptions,
    /// Configuration de la VM.
    pub vm: VmConfig,
    /// Afficher les variables en fin de dialogue.
    pub dump_variables: bool,
    /// Graine des fonctions aléatoires et de la saillance aléatoire.
    pub seed: Option<u64>,
}

impl Default for RunTask {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            start: "Start".into(),
            options: CompilerOptions::default(),
            vm: VmConfig::default(),
            dump_variables: false,
            seed: None,
        }
    }
}

/// Paramètres de `eval`.
#[derive(Clone, Debug, Default)]
pub struct EvalTask {
    /// Expression source.
    pub expression: String,
    /// Afficher aussi l'arbre parsé.
    pub tree: bool,
}

/// Format d'un programme écrit par `compile`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgramFormat {
    /// Listing lisible (`parlance_core::disassemble_program`).
    #[default]
    Disassembly,
    /// Programme sérialisé en JSON.
    Json,
}

/// Entrée texte : fichier ou `-` (=stdin).
#[derive(Clone, Debug, Default)]
pub enum Input {
    /// Fichier.
    Path(PathBuf),
    /// Entrée standard.
    #[default]
    Stdin,
}

impl Input {
    fn name(&self) -> String {
        match self {
            Self::Path(p) => p.file_name().map_or_else(|| display(p), |n| n.to_string_lossy().into_owned()),
            Self::Stdin => "<stdin>".into(),
        }
    }
}

/// Sortie générique.
#[derive(Clone, Debug, Default)]
pub enum Output {
    /// Fichier (écriture atomique).
    Path(PathBuf),
    /// Sortie standard.
    #[default]
    Stdout,
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Initialise le logger selon la feature `trace`.
pub fn init_logger() {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .try_init();
    }
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute une commande. Retourne un code de sortie.
pub fn execute(cmd: Command) -> Result<i32> {
    match cmd {
        Command::Compile(t) => compile_entry(t),
        Command::Run(t) => run_entry(t),
        Command::Eval(t) => {
            eval_entry(&t)?;
            Ok(0)
        }
    }
}

fn compile_entry(task: CompileTask) -> Result<i32> {
    let CompileTask { inputs, output, format, options, time } = task;
    let scripts = load_scripts(&inputs)?;

    let start = Instant::now();
    let Some(program) = compile_scripts(&scripts, options)? else { return Ok(1) };
    let elapsed = start.elapsed();

    let text = render_program(&program, format)?;
    match output {
        Output::Stdout => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(text.as_bytes())?;
            w.flush()?;
        }
        Output::Path(path) => {
            write_text_atomic(&path, &text).with_context(|| format!("écriture de {}", display(&path)))?;
            status_ok("COMPILE", &format!("{} ({} node(s))", display(&path), program.nodes.len()));
        }
    }

    if time {
        status_info("TIME", &format!("compile: {} ms", elapsed.as_millis()));
    }
    Ok(0)
}

fn run_entry(task: RunTask) -> Result<i32> {
    let scripts = load_scripts(&task.inputs)?;
    let Some(program) = compile_scripts(&scripts, task.options.clone())? else { return Ok(1) };

    let stdin = io::stdin();
    let (_, variables) = run_dialogue(program, &task, stdin.lock(), io::stdout().lock())?;
    if task.dump_variables {
        for (name, value) in variables.iter() {
            status_info("VAR", &format!("{name} = {value}"));
        }
    }
    Ok(0)
}

fn eval_entry(task: &EvalTask) -> Result<()> {
    let library = Library::with_defaults();
    if task.tree {
        let expr = Compiler::new(CompilerOptions::default(), &library)
            .parse_expression(&task.expression)
            .map_err(|e| anyhow!("{e}"))?;
        status_info("TREE", &format!("{expr:?}"));
    }
    println!("{}", evaluate(&task.expression)?);
    Ok(())
}

// ───────────────────────────── Chargement & compilation ─────────────────────────────

/// Lit les scripts de chaque entrée ; un fichier sans nom reçoit celui de l'entrée.
pub fn load_scripts(inputs: &[Input]) -> Result<Vec<Script>> {
    if inputs.is_empty() {
        return load_scripts(&[Input::Stdin]);
    }
    let mut scripts = Vec::new();
    for input in inputs {
        let text = read_source(input).with_context(|| format!("lecture de {}", input.name()))?;
        let parsed = parse_scripts(&text, &input.name()).with_context(|| format!("AST invalide: {}", input.name()))?;
        scripts.extend(parsed);
    }
    Ok(scripts)
}

/// Décode un AST JSON : un objet `Script` ou un tableau de scripts.
pub fn parse_scripts(text: &str, file_name: &str) -> Result<Vec<Script>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let mut scripts = if value.is_array() {
        serde_json::from_value::<Vec<Script>>(value)?
    } else {
        vec![serde_json::from_value::<Script>(value)?]
    };
    for script in &mut scripts {
        if script.file.is_empty() {
            script.file = file_name.to_string();
        }
    }
    Ok(scripts)
}

/// Compile et affiche les diagnostics sur stderr ; `None` si la compilation échoue.
pub fn compile_scripts(scripts: &[Script], options: CompilerOptions) -> Result<Option<Program>> {
    let library = Library::with_defaults();
    let deny_warnings = options.deny_warnings;
    let result = Compiler::new(options, &library).compile(scripts, None);
    for diagnostic in &result.diagnostics {
        print_diagnostic(diagnostic);
    }
    match result.into_result(deny_warnings) {
        Ok(program) => {
            #[cfg(feature = "trace")]
            log::info!("compiled {} script(s) into {} node(s)", scripts.len(), program.nodes.len());
            Ok(Some(program))
        }
        Err(e) => {
            status_error("FAILED", &e.to_string());
            Ok(None)
        }
    }
}

/// Rend un programme dans le format demandé.
pub fn render_program(program: &Program, format: ProgramFormat) -> Result<String> {
    match format {
        ProgramFormat::Disassembly => Ok(disassemble_program(program)),
        ProgramFormat::Json => {
            let mut text = serde_json::to_string_pretty(program).context("sérialisation du programme")?;
            text.push('\n');
            Ok(text)
        }
    }
}

// ───────────────────────────── Dialogue interactif ─────────────────────────────

/// Handler console : écrit lignes, options et commandes dans `out`.
struct ConsoleHandler<W> {
    program: Arc<Program>,
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> ConsoleHandler<W> {
    fn emit(&mut self, args: fmt::Arguments<'_>) {
        if self.error.is_none() {
            if let Err(e) = self.out.write_fmt(args) {
                self.error = Some(e);
            }
        }
    }

    fn text(&self, line: &Line) -> String {
        line.render(self.program.line_text(&line.id).unwrap_or(&line.id))
    }
}

impl<W: Write> DialogueHandler for ConsoleHandler<W> {
    fn on_line(&mut self, line: &Line) -> HandlerResult {
        let text = self.text(line);
        self.emit(format_args!("{text}\n"));
        HandlerResult::Continue
    }

    fn on_options(&mut self, options: &[DialogueOption]) {
        for option in options {
            let text = self.text(&option.line);
            let suffix = if option.enabled { "" } else { " (unavailable)" };
            self.emit(format_args!("  {}) {text}{suffix}\n", option.id + 1));
        }
    }

    fn on_command(&mut self, text: &str, _values: &[parlance_runtime::Value]) -> HandlerResult {
        self.emit(format_args!("<<{text}>>\n"));
        HandlerResult::Continue
    }

    fn on_node_start(&mut self, _node: &str) -> HandlerResult {
        #[cfg(feature = "trace")]
        log::debug!("entering node `{_node}`");
        HandlerResult::Continue
    }

    fn on_node_complete(&mut self, _node: &str) -> HandlerResult {
        #[cfg(feature = "trace")]
        log::debug!("leaving node `{_node}`");
        HandlerResult::Continue
    }
}

/// Joue `program` depuis `task.start` : les choix sont lus sur `input`
/// (numéros à partir de 1), le dialogue est écrit sur `output`.
pub fn run_dialogue<R: BufRead, W: Write>(
    program: Program,
    task: &RunTask,
    input: R,
    output: W,
) -> Result<(W, MemoryVariableStore)> {
    let program = Arc::new(program);
    let handler = ConsoleHandler { program: Arc::clone(&program), out: output, error: None };
    let library = task.seed.map_or_else(Library::with_defaults, Library::with_seed);
    let mut vm = VirtualMachine::with_config(program, library, handler, MemoryVariableStore::new(), task.vm.clone());
    if let (Some(seed), SaliencyKind::RandomBestLeastRecentlyViewed) = (task.seed, task.vm.saliency) {
        vm.set_saliency_strategy(Box::new(RandomBestLeastRecentlyViewed::seeded(seed)));
    }
    vm.set_node(&task.start).with_context(|| format!("nœud de départ `{}`", task.start))?;

    let mut lines = input.lines();
    while !vm.is_stopped() {
        if vm.state() == ExecutionState::WaitingForOptionSelection {
            let enabled: Vec<bool> = vm.options().iter().map(|o| o.enabled).collect();
            let choice = loop {
                vm.handler_mut().emit(format_args!("> "));
                vm.handler_mut().out.flush()?;
                let Some(answer) = lines.next().transpose()? else {
                    bail!("entrée fermée pendant le choix d'une option");
                };
                match answer.trim().parse::<usize>() {
                    Ok(n) if (1..=enabled.len()).contains(&n) && enabled[n - 1] => break n - 1,
                    Ok(n) if (1..=enabled.len()).contains(&n) => {
                        vm.handler_mut().emit(format_args!("option {n} is unavailable\n"));
                    }
                    _ => vm.handler_mut().emit(format_args!("pick a number between 1 and {}\n", enabled.len())),
                }
            };
            vm.select_option(choice)?;
        }
        vm.continue_dialogue()?;
        if let Some(e) = vm.handler_mut().error.take() {
            return Err(e).context("écriture du dialogue");
        }
    }

    let (mut handler, variables) = vm.into_parts();
    handler.out.flush()?;
    Ok((handler.out, variables))
}

// ───────────────────────────── Évaluation ─────────────────────────────

/// Capture la première substitution de la ligne d'évaluation.
#[derive(Default)]
struct Capture(Option<String>);

impl DialogueHandler for Capture {
    fn on_line(&mut self, line: &Line) -> HandlerResult {
        self.0 = line.substitutions.first().cloned();
        HandlerResult::Continue
    }

    fn on_options(&mut self, _options: &[DialogueOption]) {}
}

/// Évalue une expression sans variables : elle est compilée comme la
/// substitution d'une ligne `{expr}` puis exécutée.
pub fn evaluate(src: &str) -> Result<String> {
    let library = Library::with_defaults();
    let compiler = Compiler::new(CompilerOptions::default(), &library);
    let expr = compiler.parse_expression(src).map_err(|e| anyhow!("{e}"))?;

    let line = LineDecl { text: vec![TextPart::Expr(expr)], ..LineDecl::default() }.with_id("line:eval");
    let script = Script {
        file: "<eval>".into(),
        declarations: Vec::new(),
        nodes: vec![NodeDecl { title: "Eval".into(), body: vec![Stmt::Line(line)], ..NodeDecl::default() }],
    };
    let program = compiler.compile(&[script], None).into_result(false).map_err(|e| {
        let messages: Vec<String> = e.diagnostics.iter().map(ToString::to_string).collect();
        anyhow!("{}", messages.join("\n"))
    })?;

    let config = VmConfig { node_events: false, ..VmConfig::default() };
    let mut vm =
        VirtualMachine::with_config(Arc::new(program), library, Capture::default(), MemoryVariableStore::new(), config);
    vm.set_node("Eval")?;
    vm.continue_dialogue()?;
    let (capture, _) = vm.into_parts();
    capture.0.ok_or_else(|| anyhow!("l'expression n'a produit aucune valeur"))
}

/// Parse un nom de stratégie de saillance (`first`, `best`, `least-recent`).
pub fn parse_saliency(s: &str) -> Result<SaliencyKind> { s.parse::<SaliencyKind>().map_err(|e| anyhow!(e)) }

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn read_source(input: &Input) -> Result<String> {
    match input {
        Input::Stdin => {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s)?;
            Ok(s)
        }
        Input::Path(p) => {
            let f = File::open(p).with_context(|| format!("ouverture: {}", display(p)))?;
            let mut r = BufReader::new(f);
            let mut s = String::new();
            r.read_to_string(&mut s)?;
            Ok(s)
        }
    }
}

fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or_default());
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(text.as_bytes())?;
        w.flush()?;
    }
    if path.exists() {
        // Windows : Rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path)
        .or_else(|_| fs::copy(&tmp, path).map(|_| ()).and_then(|()| fs::remove_file(&tmp)))?;
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &std::ffi::OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn display(p: &Path) -> String { p.to_string_lossy().to_string() }

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn print_diagnostic(d: &Diagnostic) {
    let text = d.to_string();
    #[cfg(feature = "color")]
    let text = match d.severity {
        Severity::Error => text.red().to_string(),
        Severity::Warning => text.yellow().to_string(),
    };
    eprintln!("{text}");
}

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_error(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.red().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────
