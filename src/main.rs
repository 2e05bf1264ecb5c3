mod cli;

use vodforge::config::{self, Config};
use vodforge::{AdvanceContext, AdvanceOutcome, JobPayload, JobQueue, Pipeline};
use vodforge_av::FfmpegEncoder;
use vodforge_db::models::JobStatus;
use vodforge_db::pool::{init_pool, DbPool};
use vodforge_db::queries::jobs;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn open_database(config: &Config) -> Result<DbPool> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    tracing::info!("Opening database at {}", path.display());
    init_pool(&path.to_string_lossy())
        .with_context(|| format!("Failed to open database {:?}", path))
}

fn build_pipeline(config: Config) -> Result<Pipeline> {
    let pool = open_database(&config)?;
    let encoder = FfmpegEncoder::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
        config.ffmpeg_settings(),
    )
    .context("ffmpeg/ffprobe are required; see `vodforge check-tools`")?;
    Ok(Pipeline::builder(config, pool, Arc::new(encoder)).build())
}

async fn start(config: Config) -> Result<()> {
    tracing::info!("Starting vodforge");
    let retention = config.jobs.retention_days;
    let pipeline = Arc::new(build_pipeline(config)?);

    {
        let conn = vodforge_db::pool::get_conn(pipeline.pool())?;
        let pruned = jobs::prune_old_jobs(&conn, retention)?;
        if pruned > 0 {
            tracing::info!("Pruned {} finished jobs older than {} days", pruned, retention);
        }
    }

    pipeline.recover().await.context("Recovery scan failed")?;
    let purged = pipeline.purge_removals().await?;
    if purged > 0 {
        tracing::info!("Removed {} files left over from earlier runs", purged);
    }

    let cancel = CancellationToken::new();
    let workers = vodforge::jobs::spawn_workers(pipeline.clone(), cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!("Worker task ended abnormally: {}", e);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodforge=trace,vodforge_av=debug,vodforge_db=debug,vodforge_common=debug".to_string()
        } else {
            "vodforge=info,vodforge_av=info,vodforge_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start => runtime()?.block_on(start(load(config_path)?)),
        Commands::Advance { asset_id } => {
            let pipeline = build_pipeline(load(config_path)?)?;
            let outcome = runtime()?.block_on(pipeline.advance(asset_id, AdvanceContext::default()))?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Recover => {
            let pipeline = build_pipeline(load(config_path)?)?;
            let scanned = runtime()?.block_on(pipeline.recover())?;
            println!("Re-advanced {} assets", scanned);
            Ok(())
        }
        Commands::Ingest { file, owner, name } => {
            if !file.exists() {
                anyhow::bail!("File does not exist: {:?}", file);
            }
            let name = match name {
                Some(name) => name,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string()),
            };
            let pipeline = build_pipeline(load(config_path)?)?;
            let outcome = runtime()?
                .block_on(pipeline.ingest(owner, &name, &file))
                .with_context(|| format!("Failed to ingest {:?}", file))?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Enqueue { payload } => enqueue(config_path, &payload),
        Commands::Jobs { failed, limit } => list_jobs(config_path, failed, limit),
        Commands::PurgeRemovals => {
            let pipeline = build_pipeline(load(config_path)?)?;
            let purged = runtime()?.block_on(pipeline.purge_removals())?;
            println!("Removed {} files", purged);
            Ok(())
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or_else(|| config_path.map(Path::to_path_buf));
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vodforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn load(path: Option<&Path>) -> Result<Config> {
    config::load_config_or_default(path)
}

fn print_outcome(outcome: &AdvanceOutcome) {
    match outcome {
        AdvanceOutcome::Missing => println!("Asset not found"),
        AdvanceOutcome::Waiting {
            state,
            stage,
            pending,
        } => println!("{}: waiting for {} {} job(s)", state, pending, stage),
        AdvanceOutcome::ToTranscode { asset, jobs } => {
            println!("{} -> {} ({} job(s) queued)", asset.id, asset.state, jobs)
        }
        AdvanceOutcome::Republished(asset) => println!("{} re-announced", asset.id),
        AdvanceOutcome::ToExternalStorage(asset) | AdvanceOutcome::Published(asset) => {
            println!("{} -> {}", asset.id, asset.state)
        }
    }
}

fn enqueue(config_path: Option<&Path>, payload: &str) -> Result<()> {
    let payload: JobPayload =
        serde_json::from_str(payload).context("Payload is not a valid job")?;
    let config = load(config_path)?;
    let pool = open_database(&config)?;
    let queue = JobQueue::new(pool, config.retry_policy());
    let job = runtime()?.block_on(queue.register_job(&payload))?;
    println!("Queued {} job {}", job.kind, job.id);
    Ok(())
}

fn list_jobs(config_path: Option<&Path>, failed: bool, limit: usize) -> Result<()> {
    let config = load(config_path)?;
    let pool = open_database(&config)?;
    let conn = vodforge_db::pool::get_conn(&pool)?;

    let mut statuses = vec![JobStatus::Running, JobStatus::Queued];
    if failed {
        statuses.push(JobStatus::Failed);
    }

    let mut shown = 0;
    for status in statuses {
        for job in jobs::list_jobs_by_status(&conn, status, limit)? {
            let asset = job
                .asset_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            print!("{}  {:<9} {:<20} {}", job.id, job.status.to_string(), job.kind, asset);
            if let Some(ref error) = job.error_message {
                print!("  {}", error);
            }
            println!();
            shown += 1;
        }
    }
    if shown == 0 {
        println!("No active jobs");
    }

    let counts = jobs::count_by_status(&conn)?;
    if !counts.is_empty() {
        let summary: Vec<String> = counts
            .iter()
            .map(|(status, n)| format!("{}={}", status, n))
            .collect();
        println!("\n{}", summary.join(" "));
    }
    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = vodforge_av::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Data dir: {}", config.storage.data_dir.display());
    println!("  Database: {}", config.database_path().display());
    println!(
        "  Transcoding: {} (resolutions {:?}, web videos {}, HLS {})",
        config.transcoding.enabled,
        config.transcoding.resolutions,
        config.transcoding.web_videos,
        config.transcoding.hls
    );
    println!("  Object storage: {}", config.object_storage.enabled);
    println!("  Storyboards: {}", config.storyboard.enabled);
    println!("  Workers: {}", config.jobs.concurrency);
    Ok(())
}
