//! draftloop CLI.
//!
//! Every command operates on `.draftloop/` in the current directory. Exit
//! codes are stable; see [`draftloop::exit_codes`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use draftloop::core::secrets::scan;
use draftloop::core::types::{CheckResult, HumanDecision};
use draftloop::core::validator;
use draftloop::engine::{Engine, RunOutcome, RunRequest};
use draftloop::exit_codes;
use draftloop::io::analyze::{Analysis, WorkspaceExtents, analyze};
use draftloop::io::checkpoint::{CheckpointStore, CheckpointSummary};
use draftloop::io::collaborators::{CommandDrafter, CommandReviewer};
use draftloop::io::config::load_config;
use draftloop::io::human_gate::{FileHumanGate, write_decision};
use draftloop::io::init::{InitOptions, init_state};
use draftloop::io::input::read_input;
use draftloop::io::paths::{StatePaths, validate_id};
use draftloop::logging;

#[derive(Parser)]
#[command(
    name = "draftloop",
    version,
    about = "Draft, validate, and review loop with bounded revisions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.draftloop/` with a default config.
    Init {
        /// Rewrite the config even if `.draftloop/` exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a run for an input artifact.
    Run {
        input: PathBuf,
        /// Run id; defaults to the input's frontmatter `id` or file stem.
        #[arg(long)]
        run_id: Option<String>,
        /// Pause for a human decision after validation.
        #[arg(long)]
        human_gate: bool,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Continue a run from its last checkpoint.
    Resume { run_id: String },
    /// Show the last checkpoint of one run, or of every run.
    Status { run_id: Option<String> },
    /// Run the mechanical checks on a draft without a collaborator.
    Check {
        draft: PathBuf,
        /// Input artifact whose references the draft must cover.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Scan a file for secrets.
    Scan { file: PathBuf },
    /// Record the human decision for a suspended run.
    Decide {
        run_id: String,
        decision: DecisionKind,
        /// Revision feedback or abort reason.
        #[arg(short, long, default_value = "")]
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionKind {
    Proceed,
    Revise,
    Abort,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            input,
            run_id,
            human_gate,
            max_iterations,
        } => {
            let request = RunRequest {
                input_path: input,
                run_id,
                max_iterations,
                human_gate: human_gate.then_some(true),
            };
            with_engine(&root, |engine| engine.run(&request))
        }
        Command::Resume { run_id } => with_engine(&root, |engine| engine.resume(&run_id)),
        Command::Status { run_id } => cmd_status(&root, run_id.as_deref()),
        Command::Check { draft, input } => cmd_check(&root, &draft, input.as_deref()),
        Command::Scan { file } => cmd_scan(&file),
        Command::Decide {
            run_id,
            decision,
            message,
        } => cmd_decide(&root, &run_id, decision, message),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_state(root, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

type CommandEngine = Engine<CommandDrafter, CommandReviewer, FileHumanGate>;

fn with_engine(root: &Path, drive: impl FnOnce(&CommandEngine) -> Result<RunOutcome>) -> Result<i32> {
    let paths = StatePaths::new(root);
    let config = load_config(&paths.config_path)?;
    let engine = Engine::new(
        paths.clone(),
        config.clone(),
        CommandDrafter::new(&config, root),
        CommandReviewer::new(&config, root),
        FileHumanGate::new(&paths),
    );
    let outcome = drive(&engine)?;
    Ok(report(&outcome))
}

fn report(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Finalized {
            run_id,
            path,
            iterations,
        } => {
            println!(
                "{run_id}: finalized {} after {iterations} revision(s)",
                path.display()
            );
            exit_codes::OK
        }
        RunOutcome::Aborted {
            run_id,
            error,
            last_feedback,
        } => {
            println!("{run_id}: aborted: {error}");
            if let Some(feedback) = last_feedback {
                println!("last feedback:\n{feedback}");
            }
            exit_codes::ABORTED
        }
        RunOutcome::AwaitingHuman { run_id, iterations } => {
            println!(
                "{run_id}: awaiting human decision (iteration {iterations}); record one with `draftloop decide {run_id} <proceed|revise|abort>`"
            );
            exit_codes::AWAITING_HUMAN
        }
    }
}

fn cmd_status(root: &Path, run_id: Option<&str>) -> Result<i32> {
    let store = CheckpointStore::new(&StatePaths::new(root));
    let summaries: Vec<CheckpointSummary> = match run_id {
        Some(run_id) => {
            let checkpoint = store
                .load(run_id)?
                .with_context(|| format!("no checkpoint for run '{run_id}'"))?;
            vec![CheckpointSummary {
                run_id: checkpoint.run_id,
                stage: checkpoint.stage,
                saved_at: checkpoint.saved_at,
                iteration_count: checkpoint.state.iteration_count,
            }]
        }
        None => store.list()?,
    };
    for summary in &summaries {
        println!(
            "{}\t{}\titeration {}\t{}",
            summary.run_id, summary.stage, summary.iteration_count, summary.saved_at
        );
    }
    Ok(exit_codes::OK)
}

#[derive(Serialize)]
struct CheckReport<'a> {
    passed: bool,
    results: &'a [CheckResult],
}

fn cmd_check(root: &Path, draft_path: &Path, input_path: Option<&Path>) -> Result<i32> {
    let draft = fs::read_to_string(draft_path)
        .with_context(|| format!("read draft {}", draft_path.display()))?;
    let config = load_config(&StatePaths::new(root).config_path)?;
    let analysis = match input_path {
        Some(path) => {
            let input = read_input(path)?;
            analyze(root, &input.contents, config.max_excerpt_lines)?
        }
        None => Analysis {
            context_snapshots: BTreeMap::new(),
            pattern_references: Vec::new(),
        },
    };
    let extents = WorkspaceExtents::new(root);
    let results = validator::validate(
        &draft,
        &analysis.context_snapshots,
        &analysis.pattern_references,
        &extents,
        &config.validator,
    );
    let passed = validator::issues(&results).is_empty();
    let report = CheckReport {
        passed,
        results: &results,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize check report")?
    );
    Ok(if passed {
        exit_codes::OK
    } else {
        exit_codes::FINDINGS
    })
}

fn cmd_scan(path: &Path) -> Result<i32> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let findings = scan(&text);
    for finding in &findings {
        println!(
            "{}:{}: {} {}",
            path.display(),
            finding.line,
            finding.category,
            finding.redacted_snippet
        );
    }
    Ok(if findings.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::FINDINGS
    })
}

fn cmd_decide(root: &Path, run_id: &str, kind: DecisionKind, message: String) -> Result<i32> {
    validate_id(run_id).with_context(|| format!("invalid run id '{run_id}'"))?;
    let decision = match kind {
        DecisionKind::Proceed => HumanDecision::Proceed,
        DecisionKind::Revise => HumanDecision::Revise { feedback: message },
        DecisionKind::Abort => HumanDecision::Abort { reason: message },
    };
    let path = write_decision(&StatePaths::new(root), run_id, &decision)?;
    println!("recorded decision at {}", path.display());
    Ok(exit_codes::OK)
}
