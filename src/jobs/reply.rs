use anyhow::{Result, anyhow};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{JOB_USER, JobContext, dry_run_requested};
use crate::core::ranker::{EngagementCandidate, FilterParams, select_candidate};
use crate::core::settings::{bool_setting, load_job_settings, string_setting, u64_setting};
use crate::core::workflow::executor::RunOptions;
use crate::core::workflow::{RunStatus, WorkflowConfig, WorkflowStep};

const JOB_NAME: &str = "reply_to_tweets";

/// Call-time overrides for one reply run. Anything left unset falls back to
/// the stored job settings, then the environment.
#[derive(Debug, Clone, Default)]
pub struct ReplyJobParams {
    pub search_query: Option<String>,
    pub system_prompt: Option<String>,
    pub filters: FilterParams,
    pub dry_run: Option<bool>,
}

/// Merge filter predicates: explicit overrides first, stored settings second.
/// Stored values may be raw strings (the loader's JSON fallback); the typed
/// setting helpers accept both forms.
fn filter_params(
    explicit: &FilterParams,
    settings: &HashMap<String, serde_json::Value>,
) -> FilterParams {
    FilterParams {
        minimum_likes_count: explicit
            .minimum_likes_count
            .or_else(|| u64_setting(settings, "minimumLikesCount")),
        minimum_retweets_count: explicit
            .minimum_retweets_count
            .or_else(|| u64_setting(settings, "minimumRetweetsCount")),
        search_from_today: explicit
            .search_from_today
            .or_else(|| bool_setting(settings, "searchFromToday")),
        remove_posts_with_links: explicit
            .remove_posts_with_links
            .or_else(|| bool_setting(settings, "removePostsWithLinks")),
        remove_posts_with_media: explicit
            .remove_posts_with_media
            .or_else(|| bool_setting(settings, "removePostsWithMedia")),
    }
}

/// Find the hottest recent tweet for the configured query and reply to it
/// with generated text. Skips quietly when no query is configured or nothing
/// passes the filters.
pub async fn run_reply_job(ctx: &JobContext, params: Option<ReplyJobParams>) -> Result<()> {
    let params = params.unwrap_or_default();
    let settings = load_job_settings(&ctx.storage, JOB_NAME).await?;

    let Some(query) = params
        .search_query
        .filter(|q| !q.trim().is_empty())
        .or_else(|| string_setting(&settings, &["searchQuery"]))
        .or_else(|| std::env::var("TWITTER_REPLY_SEARCH_QUERY").ok())
    else {
        warn!("reply job has no search query configured, skipping");
        return Ok(());
    };
    let system_prompt = params
        .system_prompt
        .or_else(|| string_setting(&settings, &["systemPrompt", "prompt"]))
        .unwrap_or_else(|| "You reply to tweets. Be brief, specific and friendly.".to_string());
    let filters = filter_params(&params.filters, &settings);
    let dry_run = params
        .dry_run
        .unwrap_or_else(|| dry_run_requested(&settings));

    let search = WorkflowConfig {
        steps: vec![
            WorkflowStep::new("twitter.tweets.search")
                .with_id("search")
                .literal("query", json!(query)),
        ],
    };
    let report = ctx
        .executor
        .run(&search, JOB_USER, &RunOptions::default())
        .await;
    if report.status == RunStatus::Failed {
        return Err(anyhow!(
            "tweet search failed: {}",
            report.error.unwrap_or_default()
        ));
    }

    let candidates: Vec<EngagementCandidate> = report
        .output_of("search")
        .and_then(|output| output.get("tweets"))
        .map(|tweets| serde_json::from_value(tweets.clone()))
        .transpose()?
        .unwrap_or_default();

    let Some(target) = select_candidate(&candidates, &filters, Utc::now()) else {
        info!(query, "no eligible tweet to reply to");
        return Ok(());
    };

    let reply = WorkflowConfig {
        steps: vec![
            WorkflowStep::new("ai.text.generate")
                .with_id("draft")
                .literal("system", json!(system_prompt))
                .literal(
                    "prompt",
                    json!(format!("Write a reply to this tweet:\n\n{}", target.text)),
                ),
            WorkflowStep::new("twitter.tweets.reply")
                .binding("text", "draft", Some("text"))
                .literal("reply_to", json!(target.id)),
        ],
    };
    let report = ctx
        .executor
        .run(
            &reply,
            JOB_USER,
            &RunOptions {
                dry_run,
                context: None,
            },
        )
        .await;

    match report.status {
        RunStatus::Failed => Err(anyhow!(
            "reply run failed: {}",
            report.error.unwrap_or_default()
        )),
        status => {
            info!(tweet_id = target.id, ?status, dry_run, "reply job finished");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_string_settings_survive_into_filters() {
        let mut settings = HashMap::new();
        settings.insert("minimumLikesCount".to_string(), json!(100));
        // The loader keeps unquoted stored values as raw strings.
        settings.insert("removePostsWithLinks".to_string(), json!("true"));
        settings.insert("minimumRetweetsCount".to_string(), json!("7"));

        let filters = filter_params(&FilterParams::default(), &settings);
        assert_eq!(filters.minimum_likes_count, Some(100));
        assert_eq!(filters.minimum_retweets_count, Some(7));
        assert_eq!(filters.remove_posts_with_links, Some(true));
        assert_eq!(filters.search_from_today, None);
    }

    #[test]
    fn explicit_filters_beat_stored_settings() {
        let mut settings = HashMap::new();
        settings.insert("minimumLikesCount".to_string(), json!(5));
        settings.insert("searchFromToday".to_string(), json!(true));

        let explicit = FilterParams {
            minimum_likes_count: Some(50),
            ..Default::default()
        };
        let merged = filter_params(&explicit, &settings);
        assert_eq!(merged.minimum_likes_count, Some(50));
        // Fields without an explicit override still come from storage.
        assert_eq!(merged.search_from_today, Some(true));
    }
}
