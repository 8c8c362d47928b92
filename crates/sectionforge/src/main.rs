//! Partition a captured page and build its sections with an external agent.
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level);
//! results go to stdout.
//!
//! # Examples
//!
//! ```sh
//! # Inspect how a page would be cut
//! sectionforge partition --dom page.json
//! sectionforge partition --dom page.json --json > sections.json
//!
//! # Show the task payloads
//! sectionforge tasks --dom page.json --source-id example.com
//!
//! # Build every section in parallel, retrying failures twice
//! sectionforge build --dom page.json --workdir ./site \
//!   --worker-cmd "my-agent --task {{task_file}} --out {{output_dir}}" \
//!   --concurrency 4 --retries 2
//! ```

use clap::{Args, Parser, Subcommand};
use sectionforge::prelude::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Partition a captured page and build its sections in parallel.
#[derive(Parser)]
#[command(name = "sectionforge", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cut a DOM snapshot into sections and print them
    Partition {
        #[command(flatten)]
        input: InputArgs,

        /// Print the full partition as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the tasks built from a DOM snapshot as JSON
    Tasks {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        source: SourceArgs,
    },
    /// Partition, dispatch every section to the worker command, integrate
    Build {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// Project directory the sections are written into
        #[arg(long)]
        workdir: PathBuf,

        /// Worker command template ({{task_file}}, {{output_dir}}, {{section}}, {{task_id}})
        #[arg(long)]
        worker_cmd: String,

        /// Per-task timeout in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Maximum tasks running at once (default: all)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Scoped retries of failed sections after the first dispatch
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Command that serves the live preview
        #[arg(long)]
        preview_cmd: Option<String>,

        /// URL the preview is served at
        #[arg(long, default_value = "http://localhost:5173")]
        preview_url: String,
    },
}

#[derive(Args)]
struct InputArgs {
    /// DOM snapshot JSON produced by the extractor
    #[arg(long)]
    dom: PathBuf,

    /// Token budget per section
    #[arg(long, default_value_t = 10_000)]
    max_tokens: usize,
}

#[derive(Args)]
struct SourceArgs {
    /// Identifier of the page (default: the snapshot URL)
    #[arg(long)]
    source_id: Option<String>,

    /// Path of a preserved original stylesheet, imported first
    #[arg(long)]
    stylesheet: Option<String>,

    /// CSS custom property shared by every section, as NAME=VALUE
    #[arg(long = "css-var")]
    css_vars: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Partition { input, json } => run_partition(&input, json),
        Command::Tasks { input, source } => run_tasks(&input, &source),
        Command::Build {
            input,
            source,
            workdir,
            worker_cmd,
            timeout,
            concurrency,
            retries,
            preview_cmd,
            preview_url,
        } => {
            let sandbox = match preview_cmd {
                Some(cmd) => LocalSandbox::new(workdir).with_preview(cmd, preview_url),
                None => LocalSandbox::new(workdir),
            };
            let mut config =
                OrchestratorConfig::default().with_worker_timeout(Duration::from_secs(timeout));
            if let Some(n) = concurrency {
                config = config.with_max_concurrency(n);
            }
            run_build(&input, &source, Arc::new(sandbox), &worker_cmd, config, retries).await
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load(input: &InputArgs) -> Result<(DomSnapshot, Partition), String> {
    let json = std::fs::read_to_string(&input.dom)
        .map_err(|e| format!("cannot read {}: {e}", input.dom.display()))?;
    let snapshot = DomSnapshot::from_json(&json)?;
    let config = PartitionConfig::default().with_max_section_tokens(input.max_tokens);
    let partition = partition_snapshot(&snapshot, &config);
    Ok((snapshot, partition))
}

fn source_context(snapshot: &DomSnapshot, args: &SourceArgs) -> Result<SourceContext, String> {
    let source_id = args
        .source_id
        .clone()
        .or_else(|| snapshot.url.clone())
        .ok_or("no --source-id given and the snapshot has no url")?;
    let mut source = SourceContext::new(source_id);
    if let Some(ref url) = snapshot.url {
        source = source.with_base_url(url);
    }
    if let Some(ref sheet) = args.stylesheet {
        source = source.with_stylesheet(sheet);
    }
    for var in &args.css_vars {
        let (name, value) = var
            .split_once('=')
            .ok_or_else(|| format!("--css-var expects NAME=VALUE, got '{var}'"))?;
        source = source.with_css_variable(name.trim(), value.trim());
    }
    Ok(source)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("serialize output: {e}"))
}

fn run_partition(input: &InputArgs, json: bool) -> Result<(), String> {
    let (_, partition) = load(input)?;
    if json {
        println!("{}", to_json(&partition)?);
        return Ok(());
    }
    println!("{}", partition.to_log_string());
    for section in &partition.sections {
        println!(
            "{:>4}  y={:<7.0} h={:<7.0} {:>6} tokens  {}{}",
            section.id,
            section.rect.top(),
            section.rect.height,
            section.tokens,
            section.selector,
            if section.is_oversized() { "  [oversized]" } else { "" }
        );
    }
    for diagnostic in &partition.diagnostics {
        println!("  ! {diagnostic}");
    }
    Ok(())
}

fn run_tasks(input: &InputArgs, args: &SourceArgs) -> Result<(), String> {
    let (snapshot, partition) = load(input)?;
    let source = source_context(&snapshot, args)?;
    let tasks = build_tasks(&partition.sections, &source, &OutputLayout::default());
    println!("{}", to_json(&tasks)?);
    Ok(())
}

async fn run_build(
    input: &InputArgs,
    args: &SourceArgs,
    sandbox: Arc<dyn Sandbox>,
    worker_cmd: &str,
    config: OrchestratorConfig,
    retries: u32,
) -> Result<(), String> {
    let (snapshot, partition) = load(input)?;
    info!("{}", partition.to_log_string());
    let source = source_context(&snapshot, args)?;
    let tasks = build_tasks(&partition.sections, &source, &config.layout);

    let worker =
        CommandWorker::new(sandbox.clone(), worker_cmd).with_timeout(config.command_timeout());
    let orchestrator = Orchestrator::new(sandbox, Arc::new(worker))
        .with_config(config)
        .with_event_handler(Arc::new(LoggingHandler));

    let source_id = source.source_id.as_str();
    let mut summary = orchestrator
        .dispatch(tasks, source_id)
        .await
        .map_err(|e| e.to_string())?;
    for attempt in 1..=retries {
        if summary.state != RunState::PartiallyFailed {
            break;
        }
        warn!("Retry {attempt}/{retries}: {:?}", summary.retryable());
        summary = orchestrator
            .retry(source_id, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    println!("{}", to_json(&summary)?);
    for error in &summary.errors {
        warn!("{error}");
    }
    if summary.is_success() {
        Ok(())
    } else {
        Err(summary
            .next_action
            .map(|next| format!("build incomplete; next: {next}"))
            .unwrap_or_else(|| "build finished with errors".into()))
    }
}
