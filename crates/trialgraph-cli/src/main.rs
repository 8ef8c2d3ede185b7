//! Trialgraph CLI
//!
//! - `enrich`: reconcile a fact bundle into a study design and write the
//!   enriched graph plus its Issue list.
//! - `validate`: run the integrity checks alone over an existing graph.
//! - `config`: print the effective reconciliation config.
//!
//! Exit status is 2 when any Blocking issue was reported.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use trialgraph_model::{FactBundle, Issue, Severity, StudyDesign};
use trialgraph_reconcile::{DocumentContext, Enricher, ReconcileConfig};

const LOG_ENV: &str = "TRIALGRAPH_LOG";
const BLOCKING_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "trialgraph")]
#[command(author, version, about = "Trialgraph: reconcile extracted study-design facts into one graph")]
struct Cli {
    /// Log at debug level (overridden by TRIALGRAPH_LOG / RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a fact bundle into a study design.
    Enrich(EnrichArgs),

    /// Run integrity checks over a design without changing it.
    Validate {
        /// Study design JSON.
        #[arg(long)]
        design: PathBuf,

        /// Reconciliation config JSON (partial files keep defaults).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the Issue list here instead of stdout.
        #[arg(long)]
        issues: Option<PathBuf>,
    },

    /// Print the effective reconciliation config as JSON.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct EnrichArgs {
    /// Study design JSON.
    #[arg(long)]
    design: PathBuf,

    /// Fact bundle JSON.
    #[arg(long)]
    facts: PathBuf,

    /// Reconciliation config JSON (partial files keep defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enriched design output (default: overwrite `--design`).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Full enrichment report (issues + stats). Issues go to stdout when omitted.
    #[arg(long)]
    issues: Option<PathBuf>,

    /// Document context for the semantic resolver (plain text summary).
    #[arg(long)]
    context: Option<PathBuf>,

    /// Ollama model used for semantic label resolution; alias-only when omitted.
    #[arg(long)]
    ollama_model: Option<String>,

    #[arg(long, default_value = "http://127.0.0.1:11434")]
    ollama_host: String,

    /// LLM request timeout in seconds (0 disables; default from TRIALGRAPH_LLM_TIMEOUT_SECS or 120).
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let blocking = match cli.command {
        Commands::Enrich(args) => cmd_enrich(&args)?,
        Commands::Validate {
            design,
            config,
            issues,
        } => cmd_validate(&design, config.as_deref(), issues.as_deref())?,
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            0
        }
    };

    if blocking > 0 {
        eprintln!("{blocking} blocking issue(s); graph should not be published");
        std::process::exit(BLOCKING_EXIT_CODE);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_enrich(args: &EnrichArgs) -> Result<usize> {
    let config = load_config(args.config.as_deref())?;
    let mut design = load_design(&args.design)?;
    let text = fs::read_to_string(&args.facts)
        .with_context(|| format!("failed to read {}", args.facts.display()))?;
    let bundle = FactBundle::from_json(&text)
        .with_context(|| format!("invalid fact bundle {}", args.facts.display()))?;

    let context = DocumentContext {
        summary: match &args.context {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => format!("{} ({} epochs, {} arms)", design.name, design.epochs.len(), design.arms.len()),
        },
        excerpt: String::new(),
    };

    let mut enricher = Enricher::new(config);
    if let Some(model) = &args.ollama_model {
        enricher = enricher.with_resolver(ollama_resolver(&args.ollama_host, model, args.timeout_secs)?);
    }

    let report = enricher.enrich(&mut design, &bundle, &context);

    let out = args.out.as_ref().unwrap_or(&args.design);
    fs::write(out, design.to_json_pretty()?).with_context(|| format!("failed to write {}", out.display()))?;
    tracing::info!(out = %out.display(), "wrote enriched design");

    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.issues {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
            print_summary(&report.issues);
        }
        None => println!("{rendered}"),
    }
    Ok(report.count(Severity::Blocking))
}

fn cmd_validate(design: &Path, config: Option<&Path>, issues_out: Option<&Path>) -> Result<usize> {
    let config = load_config(config)?;
    let design = load_design(design)?;
    let issues = trialgraph_reconcile::validate(&design, &config);

    let rendered = serde_json::to_string_pretty(&issues)?;
    match issues_out {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
            print_summary(&issues);
        }
        None => println!("{rendered}"),
    }
    Ok(issues.iter().filter(|i| i.severity == Severity::Blocking).count())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<ReconcileConfig> {
    let Some(path) = path else {
        return Ok(ReconcileConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    ReconcileConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn load_design(path: &Path) -> Result<StudyDesign> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    StudyDesign::from_json(&text).map_err(|e| anyhow!("invalid study design {}: {e}", path.display()))
}

fn print_summary(issues: &[Issue]) {
    let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
    println!(
        "issues: {} blocking, {} warning, {} info",
        count(Severity::Blocking),
        count(Severity::Warning),
        count(Severity::Info)
    );
    for issue in issues.iter().filter(|i| i.severity == Severity::Blocking) {
        println!("  [{}] {} {}: {}", issue.severity, issue.category, issue.path, issue.message);
    }
}

#[cfg(feature = "llm-ollama")]
fn ollama_resolver(
    host: &str,
    model: &str,
    timeout_secs: Option<u64>,
) -> Result<Arc<dyn trialgraph_reconcile::SemanticResolver>> {
    use trialgraph_reconcile::ollama::{llm_timeout, OllamaResolver};
    let timeout = llm_timeout(timeout_secs)?;
    tracing::info!(model, host, ?timeout, "semantic resolution via ollama");
    Ok(Arc::new(OllamaResolver::new(host, model, timeout)))
}

#[cfg(not(feature = "llm-ollama"))]
fn ollama_resolver(
    _host: &str,
    _model: &str,
    _timeout_secs: Option<u64>,
) -> Result<Arc<dyn trialgraph_reconcile::SemanticResolver>> {
    Err(anyhow!(
        "--ollama-model requires the `llm-ollama` feature (rebuild with `--features llm-ollama`)"
    ))
}
