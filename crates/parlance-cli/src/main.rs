//! `parlance`: CLI principal de Parlance
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation (logger,
//! couleur), et délégation à `parlance_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use parlance_cli as cli;
use parlance_compiler::CompilerOptions;
use parlance_vm::VmConfig;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "parlance", version, about = "Parlance CLI : compiler, jouer et évaluer des dialogues", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Force la couleur (si la feature `color` est compilée)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Sous-commandes
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

/// Options de compilation partagées par `compile` et `run`.
#[derive(Debug, clap::Args)]
struct CompileFlags {
    /// Scripts (AST JSON) ; `-` ou rien pour stdin
    inputs: Vec<PathBuf>,
    /// Les warnings font échouer la compilation
    #[arg(long = "deny-warnings")]
    deny_warnings: bool,
    /// `<<set>>` sur une variable inconnue la déclare
    #[arg(long = "implicit-declarations")]
    implicit_declarations: bool,
    /// Préfixe des identifiants de ligne générés
    #[arg(long = "line-id-prefix", default_value = "line:")]
    line_id_prefix: String,
}

impl CompileFlags {
    fn inputs(&self) -> Vec<cli::Input> {
        self.inputs
            .iter()
            .map(|p| if p.as_os_str() == "-" { cli::Input::Stdin } else { cli::Input::Path(p.clone()) })
            .collect()
    }

    fn options(&self) -> CompilerOptions {
        CompilerOptions {
            deny_warnings: self.deny_warnings,
            implicit_declarations: self.implicit_declarations,
            line_id_prefix: self.line_id_prefix.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compiler des scripts et écrire le programme
    Compile {
        #[command(flatten)]
        flags: CompileFlags,
        /// Fichier de sortie (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Programme JSON au lieu du listing
        #[arg(long)]
        json: bool,
        /// Afficher le temps de compilation
        #[arg(long)]
        time: bool,
    },

    /// Compiler puis jouer un dialogue dans le terminal
    Run {
        #[command(flatten)]
        flags: CompileFlags,
        /// Nœud de départ
        #[arg(long = "node", default_value = "Start")]
        node: String,
        /// Stratégie des groupes de lignes (first, best, least-recent, random)
        #[arg(long, default_value = "best", value_parser = cli::parse_saliency)]
        saliency: parlance_vm::SaliencyKind,
        /// Ne pas émettre les événements d'entrée/sortie de nœud
        #[arg(long = "no-node-events")]
        no_node_events: bool,
        /// Afficher les variables en fin de dialogue
        #[arg(long = "dump-variables")]
        dump_variables: bool,
        /// Graine des tirages aléatoires (dice, random, saillance `random`)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Évaluer une expression (`1 + 2 * 3`, `min(4, 2)`…)
    Eval {
        /// Expression
        expression: String,
        /// Afficher l'arbre parsé
        #[arg(long)]
        tree: bool,
    },
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) {
    #[cfg(feature = "trace")]
    {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        std::env::set_var("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()));
        cli::init_logger();
    }
    #[cfg(not(feature = "trace"))]
    let _ = (verbose, quiet);
}

fn init_color(choice: ColorChoice) {
    // `owo-colors` détecte le TTY ; on ne force que sur demande.
    match choice {
        ColorChoice::Auto => {}
        ColorChoice::Always => {
            std::env::set_var("CLICOLOR_FORCE", "1");
            std::env::remove_var("NO_COLOR");
        }
        ColorChoice::Never => {
            std::env::set_var("NO_COLOR", "1");
            std::env::remove_var("CLICOLOR_FORCE");
        }
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    let command = match opt.cmd {
        Command::Compile { flags, output, json, time } => cli::Command::Compile(cli::CompileTask {
            inputs: flags.inputs(),
            output: output.map_or(cli::Output::Stdout, cli::Output::Path),
            format: if json { cli::ProgramFormat::Json } else { cli::ProgramFormat::Disassembly },
            options: flags.options(),
            time,
        }),
        Command::Run { flags, node, saliency, no_node_events, dump_variables, seed } => cli::Command::Run(cli::RunTask {
            inputs: flags.inputs(),
            start: node,
            options: flags.options(),
            vm: VmConfig { saliency, node_events: !no_node_events },
            dump_variables,
            seed,
        }),
        Command::Eval { expression, tree } => cli::Command::Eval(cli::EvalTask { expression, tree }),
    };

    cli::execute(command).context("échec d'exécution de la commande")
}
