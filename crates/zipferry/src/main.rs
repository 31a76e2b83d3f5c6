use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use zipferry::{logging, parse_event, ArchiveRef, InvocationError, Pipeline, Settings};
use zipferry_platform::{MemoryCircuitBreaker, SysinfoProbe};
use zipferry_store::{LocalStore, ObjectLocation};

#[derive(Parser)]
#[command(
    name = "zipferry",
    version,
    about = "Unpack zip archives from object storage and republish their entries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); overrides ZIPFERRY_LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process archives from a local directory-backed store
    Process {
        /// Container (top-level directory under --root) holding the archives
        #[arg(required_unless_present = "event")]
        container: Option<String>,
        /// Archive keys within the container
        #[arg(required_unless_present = "event")]
        keys: Vec<String>,
        /// Object-created notification (JSON) naming the archives instead
        #[arg(long, value_name = "FILE", conflicts_with_all = ["container", "keys"])]
        event: Option<PathBuf>,
        /// Store root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Request id attached to published objects
        #[arg(long)]
        request_id: Option<String>,
        /// Time budget for the whole invocation, in seconds
        #[arg(long, default_value_t = 900)]
        budget_secs: u64,
    },
    /// Print the output grouping stem of each file name
    Stem {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stem { names } => {
            for name in names {
                println!("{}\t{}", zipferry_archive::extract_stem(&name), name);
            }
            Ok(())
        }
        Commands::Process {
            container,
            keys,
            event,
            root,
            request_id,
            budget_secs,
        } => {
            let settings = Settings::from_env().context("Failed to load ZIPFERRY_* settings")?;
            let level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
            logging::init(level, settings.log_format, settings.redact_keys);

            let mut probe = SysinfoProbe::new().context("Failed to initialise memory probe")?;
            if let Some(budget) = settings.memory_budget_bytes {
                probe = probe.budget_bytes(budget);
            }
            let breaker = Arc::new(MemoryCircuitBreaker::new(settings.memory, probe));
            let store = Arc::new(LocalStore::new(root));
            let pipeline = Pipeline::new(store, breaker, settings.pipeline_config());

            let archives = match event {
                Some(path) => {
                    let document = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read event {}", path.display()))?;
                    parse_event(&document).context("Invalid event document")?
                }
                None => {
                    let container = container.context("Missing container")?;
                    keys.into_iter()
                        .map(|key| ArchiveRef::new(ObjectLocation::new(container.clone(), key)))
                        .collect()
                }
            };
            tracing::info!(archives = archives.len(), "invocation resolved");
            let request_id = request_id.unwrap_or_else(|| format!("cli-{}", std::process::id()));

            let report = match pipeline
                .process_invocation(&archives, &request_id, Duration::from_secs(budget_secs))
                .await
            {
                Ok(report) => report,
                Err(InvocationError::AllFailed { attempted, report }) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    anyhow::bail!("all {attempted} archive(s) failed");
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
