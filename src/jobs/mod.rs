mod post;
mod reply;

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::core::settings::bool_setting;
use crate::core::storage::Storage;
use crate::core::workflow::executor::WorkflowExecutor;

pub use post::{PostJobParams, run_post_job};
pub use reply::{ReplyJobParams, run_reply_job};

/// Jobs run on behalf of the local operator, like the loopback HTTP user.
pub const JOB_USER: &str = "local";

const DEFAULT_REPLY_CRON: &str = "0 0/30 * * * *";
const DEFAULT_POST_CRON: &str = "0 0 */4 * * *";

#[derive(Clone)]
pub struct JobContext {
    pub storage: Storage,
    pub executor: Arc<WorkflowExecutor>,
}

fn cron_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Whether a job's settings ask for a dry run. Off unless set.
pub(crate) fn dry_run_requested(
    settings: &std::collections::HashMap<String, serde_json::Value>,
) -> bool {
    bool_setting(settings, "dryRun").unwrap_or(false)
}

pub async fn register_jobs(scheduler: &JobScheduler, ctx: JobContext) -> Result<()> {
    let reply_cron = cron_from_env("FLOWDECK_REPLY_CRON", DEFAULT_REPLY_CRON);
    let post_cron = cron_from_env("FLOWDECK_POST_CRON", DEFAULT_POST_CRON);

    let reply_ctx = ctx.clone();
    let reply_job = Job::new_async(reply_cron.as_str(), move |_uuid, mut _l| {
        let ctx = reply_ctx.clone();
        Box::pin(async move {
            if let Err(e) = run_reply_job(&ctx, None).await {
                error!("reply job failed: {e:#}");
            }
        })
    })?;
    scheduler.add(reply_job).await?;
    info!(cron = reply_cron, "scheduled reply-to-tweets job");

    let post_ctx = ctx;
    let post_job = Job::new_async(post_cron.as_str(), move |_uuid, mut _l| {
        let ctx = post_ctx.clone();
        Box::pin(async move {
            if let Err(e) = run_post_job(&ctx, None).await {
                error!("post job failed: {e:#}");
            }
        })
    })?;
    scheduler.add(post_job).await?;
    info!(cron = post_cron, "scheduled post-tweets job");

    Ok(())
}
