//! Trigger and skip detection.
//!
//! Both detectors are split into a pure decision over already-fetched data
//! and, for the skip check, an async wrapper that fetches and never fails.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::{SkipPhrase, WatchConfig};
use crate::gh_bridge::ReviewSource;
use crate::model::{Comment, PullRequestRef, Review};

/// Result of inspecting the latest human comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCheck {
    /// No human has commented yet.
    NoComments,
    /// The latest human comment does not ask for a review.
    NotTriggered { author: String },
    /// The latest human comment asked for a review at `at`.
    Triggered { at: DateTime<Utc> },
}

/// Decide whether the latest non-bot comment contains the trigger phrase.
///
/// The match is a case-insensitive substring search, so the phrase may appear
/// anywhere in the comment.
pub fn check_trigger(comments: &[Comment], config: &WatchConfig) -> TriggerCheck {
    // max_by_key keeps the last of equal timestamps, i.e. list order breaks ties.
    let latest = comments
        .iter()
        .filter(|c| !c.is_authored_by(&config.automation_login))
        .max_by_key(|c| c.created_at);

    let Some(latest) = latest else {
        return TriggerCheck::NoComments;
    };

    let phrase = config.trigger_phrase.to_lowercase();
    if latest.body.to_lowercase().contains(&phrase) {
        TriggerCheck::Triggered {
            at: latest.created_at,
        }
    } else {
        TriggerCheck::NotTriggered {
            author: latest.author_login().to_string(),
        }
    }
}

/// Where the bot said it would not review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipNotice {
    pub phrase: String,
    pub in_review: bool,
}

fn first_match<'a>(text: &str, phrases: &'a [SkipPhrase]) -> Option<&'a SkipPhrase> {
    phrases.iter().find(|p| p.matches(text))
}

/// Scan bot-authored comments and reviews for a skip phrase.
pub fn find_skip_notice(
    comments: &[Comment],
    reviews: &[Review],
    config: &WatchConfig,
) -> Option<SkipNotice> {
    let bot = config.automation_login.as_str();

    let from_comments = comments
        .iter()
        .filter(|c| c.is_authored_by(bot))
        .find_map(|c| first_match(&c.body, &config.skip_phrases))
        .map(|p| SkipNotice {
            phrase: p.text.clone(),
            in_review: false,
        });

    from_comments.or_else(|| {
        reviews
            .iter()
            .filter(|r| r.is_authored_by(bot))
            .find_map(|r| {
                first_match(&r.body, &config.skip_phrases).or_else(|| {
                    r.comments
                        .iter()
                        .find_map(|c| first_match(&c.body, &config.skip_phrases))
                })
            })
            .map(|p| SkipNotice {
                phrase: p.text.clone(),
                in_review: true,
            })
    })
}

/// Fetch comments and reviews and report whether the bot declined to review.
///
/// A failing fetch counts as "nothing found" for that source.
pub async fn automation_declined(
    source: &dyn ReviewSource,
    pr: &PullRequestRef,
    config: &WatchConfig,
) -> Option<SkipNotice> {
    let comments = source.list_comments(pr).await.unwrap_or_else(|e| {
        warn!(%pr, kind = e.kind(), error = %e, "Skip check: comment fetch failed");
        Vec::new()
    });
    let reviews = source
        .list_reviews(pr, &config.automation_login)
        .await
        .unwrap_or_else(|e| {
            warn!(%pr, kind = e.kind(), error = %e, "Skip check: review fetch failed");
            Vec::new()
        });

    find_skip_notice(&comments, &reviews, config)
}
