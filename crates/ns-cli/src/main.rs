mod provider;
mod reader;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ns_core::{
    Capability, CycleError, CycleManager, CycleOutcome, ExportDocument, LexicalProvider,
    Persistence, RunOptions, RunStatus, SynthesisConfig, export_json,
};
use ns_store::WorkspaceStore;
use uuid::Uuid;

use crate::provider::{HttpConfig, HttpProvider};

/// The run committed, but at least one stage fell back.
const EXIT_DEGRADED: u8 = 2;
/// EX_TEMPFAIL: another run holds the workspace lock.
const EXIT_LOCK_HELD: u8 = 75;

#[derive(Parser)]
#[command(name = "neon-soul", about = "Distil identity axioms from memory files")]
struct Cli {
    /// Workspace directory (default: current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Override workspace id auto-detection
    #[arg(long, global = true)]
    workspace_id: Option<String>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synthesis cycle over the memory sources
    Run(RunArgs),

    /// Show the committed cycle state and lock owner
    Status,

    /// List promoted axioms and blocked candidates of the last run
    Axioms,

    /// Render the last run as a SOUL.md identity document
    Render {
        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export the last run to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Source directories or files (default: <workspace>/memory)
    #[arg(long, num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Rebuild from scratch regardless of how much changed
    #[arg(long)]
    force_resynthesis: bool,

    #[arg(long)]
    concurrency: Option<i64>,

    #[arg(long)]
    n_threshold: Option<usize>,

    #[arg(long)]
    match_threshold: Option<f64>,

    #[arg(long)]
    cognitive_load_cap: Option<usize>,

    #[arg(long, value_enum, default_value_t = ProviderKind::Lexical)]
    provider: ProviderKind,
}

impl RunArgs {
    fn apply(&self, config: &mut SynthesisConfig) {
        if let Some(n) = self.concurrency {
            config.extraction.concurrency = n;
        }
        if let Some(n) = self.n_threshold {
            config.promotion.n_threshold = n;
        }
        if let Some(t) = self.match_threshold {
            config.clustering.match_threshold = t;
        }
        if let Some(cap) = self.cognitive_load_cap {
            config.promotion.cognitive_load_cap = cap;
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    /// Offline keyword heuristics
    Lexical,
    /// OpenAI-compatible API configured through NEON_SOUL_LLM_* variables
    Http,
}

/// Resolved workspace: where sources and config live, and its store id.
struct Workspace {
    dir: PathBuf,
    id: String,
}

impl Workspace {
    fn resolve(cli: &Cli) -> Result<Self> {
        let dir = match &cli.workspace {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("failed to read current directory")?,
        };
        if !dir.is_dir() {
            bail!("workspace {} is not a directory", dir.display());
        }
        let id = ns_store::resolve_workspace_id(cli.workspace_id.as_deref(), &dir);
        Ok(Self { dir, id })
    }
}

fn open_store() -> Result<WorkspaceStore> {
    let data_dir = ns_store::default_data_dir();
    WorkspaceStore::open(&data_dir)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args).await,
        Commands::Status => cmd_status(&cli).map(|()| ExitCode::SUCCESS),
        Commands::Axioms => cmd_axioms(&cli).map(|()| ExitCode::SUCCESS),
        Commands::Render { output } => cmd_render(&cli, output.as_deref()).map(|()| ExitCode::SUCCESS),
        Commands::Export { path } => cmd_export(&cli, path).map(|()| ExitCode::SUCCESS),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    let ws = Workspace::resolve(cli)?;
    let mut config = ns_store::load_config(&ws.dir)
        .with_context(|| format!("failed to load {}", ns_store::CONFIG_FILE))?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let sources = if args.sources.is_empty() {
        vec![ws.dir.join("memory")]
    } else {
        args.sources.clone()
    };
    let blocks = reader::read_sources(&sources, &ws.dir)?;
    tracing::info!(workspace = %ws.id, blocks = blocks.len(), "read sources");

    let capability: Arc<dyn Capability> = match args.provider {
        ProviderKind::Lexical => Arc::new(LexicalProvider::new()),
        ProviderKind::Http => Arc::new(HttpProvider::new(HttpConfig::from_env()?)),
    };
    let store = Arc::new(open_store()?);
    let manager = CycleManager::new(store, capability, config);

    let options = RunOptions {
        force_resynthesis: args.force_resynthesis,
        ..RunOptions::default()
    };
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            cancel.cancel();
        }
    });

    match manager.run_cycle(&ws.id, blocks, options).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(match outcome.report.status {
                RunStatus::Success => ExitCode::SUCCESS,
                RunStatus::Degraded => ExitCode::from(EXIT_DEGRADED),
            })
        }
        Err(CycleError::LockHeld { owner_pid }) => {
            eprintln!(
                "workspace '{}' is locked by another run (pid {owner_pid}); try again later",
                ws.id
            );
            Ok(ExitCode::from(EXIT_LOCK_HELD))
        }
        Err(CycleError::Cancelled) => {
            eprintln!("run cancelled; no state written");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("run failed"),
    }
}

fn print_outcome(outcome: &CycleOutcome) {
    let r = &outcome.report;
    println!("run:        {}", r.run_id);
    println!("mode:       {}", r.mode);
    println!("status:     {}", r.status.as_str());
    println!(
        "blocks:     {} scanned, {} new ({:.0}% changed)",
        r.blocks_scanned,
        r.blocks_new,
        r.content_delta * 100.0
    );
    println!(
        "signals:    {} total, {} extracted, {} not identity-bearing",
        r.signals_total, r.signals_extracted, r.dropped_non_identity
    );
    println!("principles: {} ({} merges)", r.principles, r.merges);
    println!("tensions:   {}", r.tensions);
    println!(
        "axioms:     {} promoted, {} blocked, {} below threshold",
        r.promoted,
        r.blocked_total(),
        r.below_threshold
    );
    if r.degradation.total() > 0 || r.degraded_signals > 0 {
        let d = &r.degradation;
        println!(
            "degraded:   {} signals; classification={} similarity={} generalization={} tension={} canonical={}",
            r.degraded_signals,
            d.classification,
            d.similarity,
            d.generalization,
            d.tension,
            d.canonical_forms
        );
    }
    if let Some(b) = &r.baseline {
        println!(
            "baseline:   {} retained, {} added, {} dropped",
            b.retained.len(),
            b.added.len(),
            b.dropped.len()
        );
    }
    for note in &r.notes {
        println!("note:       {note}");
    }
}

/// Committed run id of the workspace, or an error telling the user to run.
fn last_run(store: &WorkspaceStore, ws: &Workspace) -> Result<Uuid> {
    store
        .load_state(&ws.id)
        .context("failed to load cycle state")?
        .and_then(|s| s.last_run_id)
        .with_context(|| {
            format!(
                "workspace '{}' has no committed run; run `neon-soul run` first",
                ws.id
            )
        })
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let store = open_store()?;
    let state = store
        .load_state(&ws.id)
        .context("failed to load cycle state")?;

    println!("workspace:  {}", ws.id);
    println!("data_dir:   {}", store.paths(&ws.id).dir.display());
    match state.filter(|s| s.last_run_id.is_some()) {
        Some(s) => {
            if let Some(id) = s.last_run_id {
                println!("last_run:   {id}");
            }
            println!("last_at:    {}", s.last_run_at);
            println!("mode:       {}", s.mode);
            println!("runs:       {} ({} kept)", s.run_count, s.run_history.len());
            println!("sources:    {} blocks, {} bytes", s.source_hashes.len(), s.source_bytes);
            println!("contradictions: {}", s.contradiction_count);
        }
        None => println!("last_run:   (none)"),
    }
    match store.lock_owner(&ws.id) {
        Some((pid, true)) => println!("lock:       held by pid {pid}"),
        Some((pid, false)) => println!("lock:       stale (pid {pid} is dead)"),
        None => println!("lock:       free"),
    }
    Ok(())
}

fn cmd_axioms(cli: &Cli) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let store = open_store()?;
    let run_id = last_run(&store, &ws)?;
    let axioms = store
        .load_axioms(&ws.id, run_id)
        .context("failed to load axioms")?;
    let (promoted, blocked): (Vec<_>, Vec<_>) = axioms.iter().partition(|a| a.is_promoted());

    println!("run {run_id}: {} promoted, {} blocked", promoted.len(), blocked.len());
    for a in &promoted {
        println!(
            "  [{}] {} ({}, n={}, weight={:.2})",
            a.dimension.as_str(),
            a.text(),
            a.centrality.as_str(),
            a.n_count,
            a.weight
        );
    }
    if !blocked.is_empty() {
        println!("blocked:");
        for a in &blocked {
            let reason = a
                .block_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".into());
            println!("  {} (n={}): {reason}", a.text(), a.n_count);
        }
    }
    Ok(())
}

fn cmd_render(cli: &Cli, output: Option<&Path>) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let store = open_store()?;
    let run_id = last_run(&store, &ws)?;
    let report = store
        .load_report(&ws.id, run_id)
        .context("failed to load run report")?
        .unwrap_or_default();
    let axioms = store
        .load_axioms(&ws.id, run_id)
        .context("failed to load axioms")?;

    let doc = render::render_soul(&report, &axioms);
    match output {
        Some(path) => {
            std::fs::write(path, &doc)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("rendered to {}", path.display());
        }
        None => print!("{doc}"),
    }
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let ws = Workspace::resolve(cli)?;
    let store = open_store()?;
    let run_id = last_run(&store, &ws)?;
    let load = || -> ns_core::PersistenceResult<ExportDocument> {
        let report = store.load_report(&ws.id, run_id)?.unwrap_or_default();
        let mut doc = ExportDocument::new(&ws.id, report)
            .with_axioms(store.load_axioms(&ws.id, run_id)?);
        doc.principles = store.load_principles(&ws.id, run_id)?;
        doc.signals = store.load_signals(&ws.id, run_id)?;
        doc.tensions = store.load_tensions(&ws.id, run_id)?;
        Ok(doc)
    };
    let doc = load().context("failed to load run artifacts")?;

    let json = export_json(&doc).context("failed to serialize export")?;
    std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;

    println!("exported run {run_id} to {}", path.display());
    Ok(())
}
