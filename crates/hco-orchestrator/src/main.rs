//! `hcod`: the orchestrator binary — a `clap` CLI that either serves the
//! HTTP API (the default) or runs a single reconciliation pass and exits,
//! for operators who want the chain-of-custody gate without standing up
//! the whole service.

use std::future::Future;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hco_artifact_store::fs::FilesystemArtifactStore;
use hco_artifact_store::ArtifactStore;
use hco_manifest::{HmacSigner, ManifestSigner, UnsignedSigner};
use hco_models::clock::SystemClock;
use hco_orchestrator::api::{build_router, App};
use hco_orchestrator::config::settings;
use hco_orchestrator::JobController;
use hco_store::MetadataStore;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "hcod", about = "Hybrid Collection Orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and background lease reaper. The default if no
    /// subcommand is given.
    Serve,
    /// Run a single reconciliation pass against two manifest files and
    /// exit; does not touch the database or start the HTTP server.
    Reconcile {
        custodian: String,
        job_id: Uuid,
        source_path: String,
        collected_path: String,
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => runtime.block_on(serve()),
        Command::Reconcile {
            custodian,
            job_id,
            source_path,
            collected_path,
            dry_run,
        } => runtime.block_on(reconcile_once(custodian, job_id, source_path, collected_path, dry_run)),
    }
}

async fn build_store(settings: &hco_orchestrator::config::Settings) -> anyhow::Result<Arc<dyn MetadataStore>> {
    #[cfg(feature = "postgres")]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&settings.storage.database_url)
            .await?;
        return Ok(Arc::new(hco_store::postgres::PgMetadataStore::new(pool)));
    }
    #[cfg(not(feature = "postgres"))]
    {
        let _ = settings;
        Ok(Arc::new(hco_store::fake::FakeStore::new()))
    }
}

fn build_signer(settings: &hco_orchestrator::config::Settings) -> Arc<dyn ManifestSigner> {
    match &settings.manifest_hmac_key {
        Some(key) => Arc::new(HmacSigner::new(key.as_bytes().to_vec())),
        None => Arc::new(UnsignedSigner),
    }
}

async fn serve() -> anyhow::Result<()> {
    let settings = settings();
    let store = build_store(settings).await?;
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FilesystemArtifactStore::new(settings.storage.artifact_root.clone()));
    let signer = build_signer(settings);
    let clock = Arc::new(SystemClock);

    let controller = Arc::new(JobController::new(
        store,
        artifacts,
        clock,
        signer,
        settings.orchestrator.clone(),
        settings.server.max_concurrent_shards,
    ));

    let reaper = {
        let scheduler = controller.scheduler();
        let interval = settings.orchestrator.scheduler.reap_interval();
        tokio::spawn(async move {
            hco_scheduler::run_reaper_loop(scheduler, interval, shutdown_signal()).await;
        })
    };

    let app = App::new(controller);
    let router = build_router(app);

    let listener = tokio::net::TcpListener::bind(settings.server.address()).await?;
    tracing::info!(address = %settings.server.address(), "hcod listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    Ok(())
}

fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    }
}

async fn reconcile_once(
    custodian: String,
    job_id: Uuid,
    source_path: String,
    collected_path: String,
    dry_run: bool,
) -> anyhow::Result<()> {
    let settings = settings();
    let source_bytes = tokio::fs::read(&source_path).await?;
    let collected_bytes = tokio::fs::read(&collected_path).await?;

    let options = hco_reconciler::ReconcileOptions {
        job_id: job_id.to_string(),
        custodian: Some(custodian),
        reports_dir: Some(format!("./var/hco/logs/reconcile/{job_id}")),
        dry_run,
    };
    let report = hco_reconciler::reconcile(
        &source_bytes,
        &collected_bytes,
        &settings.orchestrator.reconcile,
        &options,
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.overall_passed {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
