mod core;
mod interfaces;
mod jobs;
mod logging;

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::core::credentials::CredentialResolver;
use crate::core::modules::builtin_registry;
use crate::core::storage::Storage;
use crate::core::vault::CredentialVault;
use crate::core::workflow::executor::WorkflowExecutor;
use crate::interfaces::web;
use crate::jobs::JobContext;
use crate::logging::BroadcastMakeWriter;

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

async fn run() -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(BroadcastMakeWriter {
            sender: log_tx.clone(),
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let data_dir = std::path::PathBuf::from(env_or("FLOWDECK_DATA_DIR", "./data"));
    std::fs::create_dir_all(&data_dir)?;
    let storage = Storage::open(data_dir.join("flowdeck.db"))?;
    info!("storage ready at {}", data_dir.display());

    let vault = CredentialVault::new(storage.clone());
    let resolver = CredentialResolver::new(vault.clone());
    let registry = Arc::new(builtin_registry(storage.clone()));
    let executor = Arc::new(WorkflowExecutor::new(
        Arc::clone(&registry),
        resolver.clone(),
    ));
    info!("module registry loaded with {} modules", registry.len());

    let scheduler = JobScheduler::new().await?;
    jobs::register_jobs(
        &scheduler,
        JobContext {
            storage: storage.clone(),
            executor: Arc::clone(&executor),
        },
    )
    .await?;
    scheduler.start().await?;

    let api_host = env_or("FLOWDECK_API_HOST", "127.0.0.1");
    let api_port: u16 = env_or("FLOWDECK_API_PORT", "8990").parse()?;
    let public_url = std::env::var("FLOWDECK_PUBLIC_URL")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let llm_base_url = std::env::var("OPENAI_BASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty());

    web::serve(web::ApiServerConfig {
        storage,
        registry,
        executor,
        resolver,
        vault,
        log_tx,
        api_host,
        api_port,
        public_url,
        llm_base_url,
    })
    .await
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("flowdeck failed to start: {e:#}");
        std::process::exit(1);
    }
}
