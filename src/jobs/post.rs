use anyhow::{Result, anyhow};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{JOB_USER, JobContext, dry_run_requested};
use crate::core::settings::{bool_setting, load_job_settings, string_setting};
use crate::core::workflow::executor::RunOptions;
use crate::core::workflow::{RunStatus, WorkflowConfig, WorkflowStep};

const JOB_NAME: &str = "post_tweets";

/// Call-time overrides for one post run; unset fields fall back to stored
/// settings, then the environment.
#[derive(Debug, Clone, Default)]
pub struct PostJobParams {
    pub prompt: Option<String>,
    pub include_news: Option<bool>,
    pub dry_run: Option<bool>,
}

fn effective_prompt(
    params: &PostJobParams,
    settings: &HashMap<String, serde_json::Value>,
) -> Option<String> {
    params
        .prompt
        .clone()
        .filter(|p| !p.trim().is_empty())
        .or_else(|| string_setting(settings, &["prompt", "systemPrompt"]))
        .or_else(|| std::env::var("TWITTER_POST_PROMPT").ok())
}

/// Compose and publish a standalone tweet from the configured prompt,
/// optionally seeded with current news headlines.
pub async fn run_post_job(ctx: &JobContext, params: Option<PostJobParams>) -> Result<()> {
    let params = params.unwrap_or_default();
    let settings = load_job_settings(&ctx.storage, JOB_NAME).await?;

    let Some(prompt) = effective_prompt(&params, &settings) else {
        warn!("post job has no prompt configured, skipping");
        return Ok(());
    };
    let include_news = params
        .include_news
        .unwrap_or_else(|| bool_setting(&settings, "includeNews").unwrap_or(false));
    let dry_run = params
        .dry_run
        .unwrap_or_else(|| dry_run_requested(&settings));

    // News is flavor, not a hard dependency: fetched in its own run so a
    // broken news lookup never blocks the post itself.
    let headlines = if include_news {
        fetch_headlines(ctx).await
    } else {
        None
    };

    let mut draft = WorkflowStep::new("ai.text.generate")
        .with_id("draft")
        .literal("prompt", json!(prompt))
        .literal(
            "system",
            json!("You write tweets. Stay under 280 characters. No hashtag spam."),
        );
    if let Some(headlines) = headlines {
        draft = draft.literal("material", headlines);
    }

    let config = WorkflowConfig {
        steps: vec![
            draft,
            WorkflowStep::new("twitter.tweets.post").binding("text", "draft", Some("text")),
        ],
    };
    let report = ctx
        .executor
        .run(
            &config,
            JOB_USER,
            &RunOptions {
                dry_run,
                context: None,
            },
        )
        .await;

    match report.status {
        RunStatus::Failed => Err(anyhow!(
            "post run failed: {}",
            report.error.unwrap_or_default()
        )),
        status => {
            info!(?status, dry_run, include_news, "post job finished");
            Ok(())
        }
    }
}

async fn fetch_headlines(ctx: &JobContext) -> Option<serde_json::Value> {
    let config = WorkflowConfig {
        steps: vec![WorkflowStep::new("news.articles.top_headlines").with_id("news")],
    };
    let report = ctx
        .executor
        .run(&config, JOB_USER, &RunOptions::default())
        .await;

    match report.output_of("news").and_then(|o| o.get("headlines")) {
        Some(headlines) => Some(headlines.clone()),
        None => {
            warn!(
                error = report.error.as_deref().unwrap_or("no output"),
                "news lookup failed, posting without headlines"
            );
            None
        }
    }
}
