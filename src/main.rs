use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_curator::{
    database::StabilityStore,
    pipeline::{
        Deduplicator, DescriptorParser, DisabledVerifier, GeoLocator, NetProber, OutputAssembler,
        Pipeline, ProcessVerifier, ProtocolVerifier, Validator, ValidatorConfig,
    },
    Config,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A proxy validation and curation pipeline with multi-threading support
#[derive(Parser)]
#[command(name = "proxy-curator")]
#[command(about = "A proxy validation and curation pipeline with multi-threading support")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stability database file path
    #[arg(short, long, default_value = "stability.db")]
    database: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: fetch, parse, validate, rank, and emit sets
    Run {
        /// File listing subscription URLs, one per line
        #[arg(short, long, default_value = "sources.txt")]
        sources: PathBuf,
        /// Directory for the curated output sets
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// Size of the top-N curated set
        #[arg(long, default_value = "100")]
        top: usize,
        /// Number of descriptors validated concurrently
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
        /// Per-stage probe timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Timeout for delegated protocol verification in seconds
        #[arg(long, default_value = "12")]
        verify_timeout: u64,
        /// Path to the proxy core binary used for protocol verification
        #[arg(long)]
        core: Option<PathBuf>,
        /// Skip the delegated protocol verification stage
        #[arg(long)]
        no_verify: bool,
        /// Path to an MMDB country database for geographic tagging
        #[arg(long)]
        mmdb: Option<PathBuf>,
    },
    /// Parse and deduplicate descriptors from a file, without validating
    Parse {
        /// Input file containing proxy URIs or a subscription payload
        input: PathBuf,
        /// Output file for the unique descriptors
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate descriptors from a file and print the survivors
    Check {
        /// Input file containing proxy URIs or a subscription payload
        input: PathBuf,
        /// Number of descriptors validated concurrently
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
        /// Per-stage probe timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Timeout for delegated protocol verification in seconds
        #[arg(long, default_value = "12")]
        verify_timeout: u64,
        /// Path to the proxy core binary used for protocol verification
        #[arg(long)]
        core: Option<PathBuf>,
        /// Skip the delegated protocol verification stage
        #[arg(long)]
        no_verify: bool,
    },
    /// Show the most reliable endpoints from the stability store
    Stats {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config {
        database_url: cli.database,
    };

    match cli.command {
        Commands::Run {
            sources,
            output,
            top,
            concurrency,
            timeout,
            verify_timeout,
            core,
            no_verify,
            mmdb,
        } => {
            let store = StabilityStore::open(&config.database_url).await?;
            let validator = build_validator(concurrency, timeout, verify_timeout, core, no_verify)?;
            install_cancel_handler(&validator);

            let geo = match mmdb {
                Some(path) => Some(GeoLocator::from_path(&path)?),
                None => None,
            };
            let assembler = OutputAssembler::new(&output, top);
            let pipeline = Pipeline::new(validator, geo, assembler);

            let summary = pipeline.run(&sources, &store).await?;

            println!(
                "Sources: {} fetched, {} failed",
                summary.sources_ok, summary.sources_failed
            );
            println!(
                "Descriptors: {} parsed, {} unique",
                summary.parsed, summary.unique
            );
            println!(
                "Results: {} valid, {} invalid, {} not attempted",
                summary.valid, summary.invalid, summary.not_attempted
            );
            println!("Wrote {} curated sets to {:?}", summary.sets_written.len(), output);
        }
        Commands::Parse { input, output } => {
            let content = std::fs::read_to_string(&input)?;
            let parsed = DescriptorParser::parse_payload(&content);
            let parsed_count = parsed.len();
            let unique = Deduplicator::dedup(parsed);

            println!(
                "Parsed {} descriptors from {:?}, {} unique",
                parsed_count,
                input,
                unique.len()
            );

            if let Some(output_path) = output {
                let lines: Vec<&str> = unique.iter().map(|d| d.raw.as_str()).collect();
                std::fs::write(&output_path, lines.join("\n") + "\n")?;
                println!("Saved unique descriptors to {:?}", output_path);
            } else {
                for descriptor in &unique {
                    println!("{}", descriptor.raw);
                }
            }
        }
        Commands::Check {
            input,
            concurrency,
            timeout,
            verify_timeout,
            core,
            no_verify,
        } => {
            let content = std::fs::read_to_string(&input)?;
            let unique = Deduplicator::dedup(DescriptorParser::parse_payload(&content));

            println!("Loaded {} unique descriptors from {:?}", unique.len(), input);
            println!("Checking with {} tasks, timeout: {}s", concurrency, timeout);
            println!();

            let validator = build_validator(concurrency, timeout, verify_timeout, core, no_verify)?;
            install_cancel_handler(&validator);

            let (valid, invalid) = validator.validate_and_partition(unique).await;

            println!("Results: {} valid, {} invalid", valid.len(), invalid.len());
            if !valid.is_empty() {
                println!("\nValid endpoints:");
                for outcome in &valid {
                    println!(
                        "  {} ({:.0}ms)",
                        outcome.descriptor.endpoint(),
                        outcome.mean_latency_ms()
                    );
                }
            }
        }
        Commands::Stats { limit } => {
            let store = StabilityStore::open(&config.database_url).await?;
            let records = store.top_by_score(limit).await?;

            if records.is_empty() {
                println!("No stability records found.");
            } else {
                println!("Tracked endpoints: {}", store.count().await?);
                println!();
                for record in records {
                    println!(
                        "{:.3}  {}/{} ok, streak {}  {}",
                        record.reliability_score,
                        record.success_count,
                        record.success_count + record.failure_count,
                        record.success_streak,
                        record.canonical_key
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_validator(
    concurrency: usize,
    timeout: u64,
    verify_timeout: u64,
    core: Option<PathBuf>,
    no_verify: bool,
) -> Result<Validator> {
    let config = ValidatorConfig::new()
        .with_concurrency(concurrency)
        .with_ping_timeout(Duration::from_secs(timeout))
        .with_connect_timeout(Duration::from_secs(timeout))
        .with_tls_timeout(Duration::from_secs(timeout))
        .with_verify_timeout(Duration::from_secs(verify_timeout));

    let verifier = select_verifier(no_verify, core)?;
    Ok(Validator::new(config, Arc::new(NetProber::new()), verifier))
}

/// A missing proxy core is refused outright: silently auto-passing would
/// record a false success for every reachable endpoint. Auto-pass is only
/// available through the explicit `--no-verify` opt-out.
fn select_verifier(
    no_verify: bool,
    core: Option<PathBuf>,
) -> Result<Arc<dyn ProtocolVerifier>> {
    match (no_verify, core) {
        (true, _) => {
            tracing::warn!("protocol verification disabled, endpoints auto-pass the final stage");
            Ok(Arc::new(DisabledVerifier))
        }
        (false, Some(binary)) => Ok(Arc::new(ProcessVerifier::new(binary))),
        (false, None) => Err(anyhow!(
            "no proxy core configured. Pass --core <path> to enable protocol \
             verification, or --no-verify to explicitly skip it"
        )),
    }
}

/// First Ctrl-C stops scheduling new validations; descriptors already in
/// flight finish and their outcomes are still recorded.
fn install_cancel_handler(validator: &Validator) {
    let flag = validator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing in-flight checks...");
            flag.store(true, Ordering::SeqCst);
        }
    });
}
