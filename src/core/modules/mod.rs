use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::core::credentials::Platform;
use crate::core::llm::{ChatMessage, DEFAULT_MODEL, OpenAiGenerator, TextGenerator};
use crate::core::ranker::EngagementCandidate;
use crate::core::registry::{Invocation, ModuleDescriptor, ModuleHandler, ModuleRegistry};
use crate::core::storage::{PostRecord, Storage};

const TWITTER_API_BASE: &str = "https://api.twitter.com/2";
const NEWS_API_BASE: &str = "https://newsapi.org/v2";

/// Flatten the Twitter v2 recent-search payload into self-contained
/// candidates the ranker understands.
pub fn normalize_tweets(payload: &serde_json::Value) -> Vec<EngagementCandidate> {
    let Some(tweets) = payload.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    tweets
        .iter()
        .filter_map(|tweet| {
            let metrics = tweet.get("public_metrics");
            let count = |key: &str| {
                metrics
                    .and_then(|m| m.get(key))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
            };
            Some(EngagementCandidate {
                id: tweet.get("id")?.as_str()?.to_string(),
                text: tweet.get("text")?.as_str()?.to_string(),
                like_count: count("like_count"),
                retweet_count: count("retweet_count"),
                created_at: tweet
                    .get("created_at")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                has_links: tweet
                    .pointer("/entities/urls")
                    .and_then(|u| u.as_array())
                    .is_some_and(|urls| !urls.is_empty()),
                has_media: tweet
                    .pointer("/attachments/media_keys")
                    .and_then(|k| k.as_array())
                    .is_some_and(|keys| !keys.is_empty()),
            })
        })
        .collect()
}

struct SearchTweets;

#[async_trait]
impl ModuleHandler for SearchTweets {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::Twitter)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let query = invocation
            .param_str("query")
            .ok_or_else(|| anyhow!("missing 'query' parameter"))?;
        let max_results = invocation
            .params
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(25)
            .clamp(10, 100);
        let token = invocation.credential("access_token")?;

        let response = reqwest::Client::new()
            .get(format!("{TWITTER_API_BASE}/tweets/search/recent"))
            .bearer_auth(token)
            .query(&[
                ("query", query),
                ("max_results", &max_results.to_string()),
                (
                    "tweet.fields",
                    "public_metrics,created_at,entities,attachments",
                ),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("Twitter search failed (HTTP {status}): {body}"));
        }

        let tweets = normalize_tweets(&body);
        info!(query, count = tweets.len(), "searched tweets");
        Ok(json!({ "tweets": tweets, "count": tweets.len() }))
    }
}

struct PostTweet {
    storage: Storage,
}

impl PostTweet {
    async fn post(&self, invocation: &Invocation, body: serde_json::Value) -> Result<String> {
        let token = invocation.credential("access_token")?;
        let response = reqwest::Client::new()
            .post(format!("{TWITTER_API_BASE}/tweets"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("Tweet post failed (HTTP {status}): {payload}"));
        }
        payload
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no tweet id in response: {payload}"))
    }
}

#[async_trait]
impl ModuleHandler for PostTweet {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::Twitter)
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let text = invocation
            .param_str("text")
            .ok_or_else(|| anyhow!("missing 'text' parameter"))?;

        let id = self.post(invocation, json!({ "text": text })).await?;
        self.storage
            .record_post(&PostRecord::posted(text, &id))
            .await?;
        info!(tweet_id = id, "posted tweet");
        Ok(json!({ "id": id, "text": text }))
    }

    async fn dry_run(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let text = invocation
            .param_str("text")
            .ok_or_else(|| anyhow!("missing 'text' parameter"))?;
        self.storage.record_post(&PostRecord::dry_run(text)).await?;
        info!("dry run: tweet recorded but not posted");
        Ok(json!({ "id": "dry-run", "text": text, "dry_run": true }))
    }
}

struct ReplyTweet {
    storage: Storage,
}

#[async_trait]
impl ModuleHandler for ReplyTweet {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::Twitter)
    }

    fn side_effecting(&self) -> bool {
        true
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let text = invocation
            .param_str("text")
            .ok_or_else(|| anyhow!("missing 'text' parameter"))?;
        let reply_to = invocation
            .param_str("reply_to")
            .ok_or_else(|| anyhow!("missing 'reply_to' parameter"))?;

        let poster = PostTweet {
            storage: self.storage.clone(),
        };
        let id = poster
            .post(
                invocation,
                json!({ "text": text, "reply": { "in_reply_to_tweet_id": reply_to } }),
            )
            .await?;
        self.storage
            .record_post(&PostRecord::posted(text, &id))
            .await?;
        info!(tweet_id = id, reply_to, "posted reply");
        Ok(json!({ "id": id, "text": text, "reply_to": reply_to }))
    }

    async fn dry_run(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let text = invocation
            .param_str("text")
            .ok_or_else(|| anyhow!("missing 'text' parameter"))?;
        let reply_to = invocation.param_str("reply_to").unwrap_or("unknown");
        self.storage.record_post(&PostRecord::dry_run(text)).await?;
        info!(reply_to, "dry run: reply recorded but not posted");
        Ok(json!({ "id": "dry-run", "text": text, "reply_to": reply_to, "dry_run": true }))
    }
}

struct GenerateText;

#[async_trait]
impl ModuleHandler for GenerateText {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::OpenAi)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let prompt = invocation
            .param_str("prompt")
            .ok_or_else(|| anyhow!("missing 'prompt' parameter"))?;
        let model = invocation.param_str("model").unwrap_or(DEFAULT_MODEL);
        let api_key = invocation.credential("api_key")?;

        let mut messages = Vec::new();
        if let Some(system) = invocation.param_str("system") {
            messages.push(ChatMessage::system(system));
        }
        // Bound step outputs arrive as 'material'; the run context (e.g. the
        // chat input) rides along too. Both are appended as user content.
        let mut prompt = prompt.to_string();
        if let Some(material) = invocation.params.get("material") {
            prompt.push_str("\n\n");
            prompt.push_str(&material.to_string());
        }
        if let Some(context) = &invocation.context {
            prompt.push_str("\n\n");
            prompt.push_str(context);
        }
        messages.push(ChatMessage::user(&prompt));

        let generator = OpenAiGenerator::new(api_key.to_string());
        let text = generator.generate(model, &messages).await?;
        Ok(json!({ "text": text, "model": model }))
    }
}

struct NewsHeadlines;

#[async_trait]
impl ModuleHandler for NewsHeadlines {
    fn platform(&self) -> Option<Platform> {
        Some(Platform::NewsApi)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let api_key = invocation.credential("api_key")?;
        let category = invocation.param_str("category").unwrap_or("technology");
        let country = invocation.param_str("country").unwrap_or("us");

        let response = reqwest::Client::new()
            .get(format!("{NEWS_API_BASE}/top-headlines"))
            .header("X-Api-Key", api_key)
            .query(&[("category", category), ("country", country)])
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("News lookup failed (HTTP {status}): {body}"));
        }

        let headlines: Vec<serde_json::Value> = body
            .get("articles")
            .and_then(|a| a.as_array())
            .map(|articles| {
                articles
                    .iter()
                    .filter_map(|article| {
                        Some(json!({
                            "title": article.get("title")?.as_str()?,
                            "description": article.get("description").and_then(|d| d.as_str()),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({ "headlines": headlines, "count": headlines.len() }))
    }
}

/// The capability catalog every executor and API surface shares.
pub fn builtin_registry(storage: Storage) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    registry.register(
        ModuleDescriptor::new(
            "twitter",
            "tweets",
            "search",
            "Search recent tweets matching a query, with engagement metrics",
            "(query: string, max_results?: number)",
        ),
        Arc::new(SearchTweets),
    );
    registry.register(
        ModuleDescriptor::new(
            "twitter",
            "tweets",
            "post",
            "Post a new tweet",
            "(text: string)",
        ),
        Arc::new(PostTweet {
            storage: storage.clone(),
        }),
    );
    registry.register(
        ModuleDescriptor::new(
            "twitter",
            "tweets",
            "reply",
            "Post a reply to an existing tweet",
            "(text: string, reply_to: string)",
        ),
        Arc::new(ReplyTweet { storage }),
    );
    registry.register(
        ModuleDescriptor::new(
            "ai",
            "text",
            "generate",
            "Generate text from a prompt with an LLM",
            "(prompt: string, system?: string, model?: string, material?: any)",
        ),
        Arc::new(GenerateText),
    );
    registry.register(
        ModuleDescriptor::new(
            "news",
            "articles",
            "top_headlines",
            "Fetch current top news headlines",
            "(category?: string, country?: string)",
        ),
        Arc::new(NewsHeadlines),
    );

    registry
}
