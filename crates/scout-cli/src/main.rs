use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use scout_client::{HttpAdapterFactory, HttpEnrichmentFetcher, ProviderConfig};
use scout_core::enrichment::{EnrichmentRequest, EnrichmentService};
use scout_core::job::{CreateSearchJobRequest, JobStatus, SearchJob, WorkerConfig};
use scout_core::orchestrator::TracingStepReporter;
use scout_core::throttle::{ThrottleConfig, ThrottledAdapterFactory};
use scout_core::worker::{RelayWorker, TracingWorkerReporter};
use scout_core::{ContinuationMessage, EngineConfig, JobStore, Orchestrator, Platform};
use scout_db::{
    ContinuationRepository, Database, DatabaseConfig, EnrichmentRepository, PlanRepository,
    SearchJobRepository,
};

type JobOrchestrator = Orchestrator<
    SearchJobRepository,
    ContinuationRepository,
    ThrottledAdapterFactory<HttpAdapterFactory>,
>;

#[derive(Parser)]
#[command(name = "scout", version, about = "Multi-keyword creator search engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim and execute continuations until interrupted
    Worker {
        /// Number of concurrent worker loops
        #[arg(short, long, default_value_t = 1)]
        concurrency: usize,

        /// Worker ID prefix (defaults to a random one)
        #[arg(long, env = "SCOUT_WORKER_ID")]
        worker_id: Option<String>,

        /// Idle poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,
    },

    /// Submit a search job
    Create {
        /// tiktok, instagram or youtube
        #[arg(short, long)]
        platform: Platform,

        /// Keyword to search (repeat for several, searched in order)
        #[arg(short, long = "keyword", conflicts_with = "similar")]
        keywords: Vec<String>,

        /// Find creators similar to this handle instead
        #[arg(short, long)]
        similar: Option<String>,

        /// Number of unique creators wanted
        #[arg(short, long)]
        target: u32,

        /// Job time limit in seconds
        #[arg(long)]
        timeout_secs: Option<u32>,
    },

    /// Show a job's status and progress
    Status { job_id: Uuid },

    /// List recent jobs
    Jobs {
        /// Filter by stored status
        #[arg(short, long)]
        status: Option<JobStatus>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a pending or processing job
    Cancel { job_id: Uuid },

    /// Print the creators a job has found
    Results {
        job_id: Uuid,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Run a single step of a job in this process
    Step { job_id: Uuid },

    /// Fetch a creator profile, counting against the owner's monthly limit
    Enrich {
        /// Account the lookup is charged to
        #[arg(short, long)]
        owner: String,

        #[arg(short, long)]
        platform: Platform,

        /// Creator handle, with or without a leading @
        #[arg(long)]
        handle: String,

        /// Ignore the cached profile
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Show an owner's enrichment usage this month
    Quota { owner: String },

    /// Set an owner's monthly enrichment limit (-1 for unlimited)
    SetLimit {
        owner: String,

        #[arg(allow_hyphen_values = true)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Worker {
            concurrency,
            worker_id,
            poll_interval_ms,
        } => {
            let prefix = worker_id
                .unwrap_or_else(|| format!("scout-{}", &Uuid::new_v4().simple().to_string()[..8]));
            let config = WorkerConfig::default()
                .with_poll_interval(std::time::Duration::from_millis(poll_interval_ms));
            cmd_worker(&db, prefix, concurrency.max(1), config).await?;
        }
        Commands::Create {
            platform,
            keywords,
            similar,
            target,
            timeout_secs,
        } => {
            let request = match similar {
                Some(handle) => CreateSearchJobRequest::similar(platform, handle, target),
                None => CreateSearchJobRequest::keywords(platform, keywords, target),
            };
            let request = match timeout_secs {
                Some(secs) => request.with_timeout(chrono_secs(secs)),
                None => request,
            };
            let job = orchestrator(&db)?.submit(request).await?;
            println!("{}", job.id);
        }
        Commands::Status { job_id } => {
            let job = find_job(&db, job_id).await?;
            print_json(&job_summary(&job))?;
        }
        Commands::Jobs { status, limit } => {
            let jobs = db.job_repo().list_jobs(status, limit).await?;
            for job in jobs {
                println!(
                    "{}  {:<17}  {:>3}%  {}/{}  {}",
                    job.id,
                    job.reported_status(),
                    job.progress(),
                    job.processed_result_count,
                    job.target_result_count,
                    job.terms().join(", ")
                );
            }
        }
        Commands::Cancel { job_id } => {
            let job = find_job(&db, job_id).await?;
            if !db.job_repo().cancel_job(job_id).await? {
                anyhow::bail!("Job {job_id} is already {}", job.status);
            }
            tracing::info!(%job_id, "Job cancelled");
        }
        Commands::Results { job_id, limit } => {
            find_job(&db, job_id).await?;
            let results = db.job_repo().results(job_id, limit).await?;
            print_json(&results)?;
        }
        Commands::Step { job_id } => {
            let outcome = orchestrator(&db)?
                .step(&ContinuationMessage::new(job_id), &TracingStepReporter)
                .await?;
            println!("{outcome:?}");
        }
        Commands::Enrich {
            owner,
            platform,
            handle,
            force,
        } => {
            let request = EnrichmentRequest {
                owner_id: owner,
                platform,
                handle,
                force_refresh: force,
            };
            let response = enrichment(&db)?.get_or_fetch(&request).await?;
            print_json(&serde_json::json!({
                "payload": response.payload,
                "cached_at": response.cached_at,
                "from_cache": response.from_cache,
                "quota_used": response.quota_used,
                "quota_limit": response.quota_limit,
            }))?;
        }
        Commands::Quota { owner } => {
            let counter = enrichment(&db)?.quota(&owner).await?;
            print_json(&counter)?;
        }
        Commands::SetLimit { owner, limit } => {
            if limit < scout_core::models::UNLIMITED {
                anyhow::bail!("Limit must be >= 0, or -1 for unlimited");
            }
            let engine = EngineConfig::from_env()?;
            db.plan_repo(engine.default_enrichment_limit)
                .set_limit(&owner, limit)
                .await?;
            tracing::info!(%owner, limit, "Enrichment limit updated");
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn orchestrator(db: &Database) -> Result<JobOrchestrator> {
    let engine = EngineConfig::from_env()?;
    let adapters = HttpAdapterFactory::new(&ProviderConfig::from_env()?)?;
    Ok(Orchestrator::new(
        db.job_repo(),
        db.relay(),
        ThrottledAdapterFactory::new(adapters, ThrottleConfig::default()),
        engine.orchestrator,
    ))
}

type Enrichment = EnrichmentService<EnrichmentRepository, HttpEnrichmentFetcher, PlanRepository>;

fn enrichment(db: &Database) -> Result<Enrichment> {
    let engine = EngineConfig::from_env()?;
    let adapters = HttpAdapterFactory::new(&ProviderConfig::from_env()?)?;
    Ok(EnrichmentService::new(
        db.enrichment_repo(),
        HttpEnrichmentFetcher::new(adapters.client().clone()),
        db.plan_repo(engine.default_enrichment_limit),
        engine.enrichment,
    ))
}

async fn find_job(db: &Database, job_id: Uuid) -> Result<SearchJob> {
    db.job_repo()
        .get_job(job_id)
        .await?
        .with_context(|| format!("Job not found: {job_id}"))
}

fn job_summary(job: &SearchJob) -> serde_json::Value {
    serde_json::json!({
        "id": job.id,
        "platform": job.platform,
        "search_mode": job.search_mode,
        "status": job.reported_status(),
        "progress": job.progress(),
        "processed_result_count": job.processed_result_count,
        "target_result_count": job.target_result_count,
        "per_keyword_breakdown": job.per_keyword_counts,
        "attempted_keywords": job.attempted_keywords,
        "last_error": job.last_error,
        "created_at": job.created_at,
        "timeout_at": job.timeout_at,
        "completed_at": job.completed_at,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn chrono_secs(secs: u32) -> chrono::TimeDelta {
    chrono::TimeDelta::seconds(i64::from(secs))
}

/// Run `concurrency` worker loops sharing one pool until Ctrl+C.
async fn cmd_worker(
    db: &Database,
    prefix: String,
    concurrency: usize,
    config: WorkerConfig,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(concurrency);

    for i in 0..concurrency {
        let worker_config = config.clone().with_worker_id(format!("{prefix}-{i}"));
        let worker = RelayWorker::new(db.relay(), orchestrator(db)?, worker_config);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker.run(cancel, &TracingWorkerReporter).await
        }));
    }

    tracing::info!(%prefix, concurrency, "Workers running; press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Worker stopped with error"),
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        }
    }

    Ok(())
}
