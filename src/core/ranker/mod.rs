use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

/// A scored item under consideration for engagement, e.g. a tweet to reply
/// to. Produced and discarded within a single ranking call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementCandidate {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_links: bool,
    #[serde(default)]
    pub has_media: bool,
}

/// Filter predicates; any predicate left unset is vacuously satisfied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterParams {
    pub minimum_likes_count: Option<u64>,
    pub minimum_retweets_count: Option<u64>,
    pub search_from_today: Option<bool>,
    pub remove_posts_with_links: Option<bool>,
    pub remove_posts_with_media: Option<bool>,
}

fn is_eligible(candidate: &EngagementCandidate, params: &FilterParams, now: DateTime<Utc>) -> bool {
    if let Some(min) = params.minimum_likes_count {
        if candidate.like_count < min {
            return false;
        }
    }
    if let Some(min) = params.minimum_retweets_count {
        if candidate.retweet_count < min {
            return false;
        }
    }
    if params.search_from_today == Some(true) && candidate.created_at.date_naive() != now.date_naive()
    {
        return false;
    }
    if params.remove_posts_with_links == Some(true) && candidate.has_links {
        return false;
    }
    if params.remove_posts_with_media == Some(true) && candidate.has_media {
        return false;
    }
    true
}

/// Engagement score: likes plus double-weighted retweets. Retweets are the
/// costlier signal. Strictly monotonic in both metrics and deterministic.
fn engagement_score(candidate: &EngagementCandidate) -> u64 {
    candidate.like_count + 2 * candidate.retweet_count
}

/// Pick the single hottest eligible candidate, newest first on score ties.
/// `None` is the normal empty-set outcome, not a failure.
pub fn select_candidate<'a>(
    candidates: &'a [EngagementCandidate],
    params: &FilterParams,
    now: DateTime<Utc>,
) -> Option<&'a EngagementCandidate> {
    let selected = candidates
        .iter()
        .filter(|c| is_eligible(c, params, now))
        .max_by_key(|c| (engagement_score(c), c.created_at));

    match selected {
        Some(candidate) => debug!(
            id = candidate.id,
            score = engagement_score(candidate),
            "selected engagement candidate"
        ),
        None => debug!("no eligible engagement candidate"),
    }
    selected
}
