//! Review aggregation: which bot reviews still need attention.

use tracing::warn;

use crate::gh_bridge::ReviewSource;
use crate::model::{PullRequestRef, Review, ReviewState};

/// Keep actionable reviews, preserving the order they were received in.
pub fn actionable(reviews: Vec<Review>) -> Vec<Review> {
    reviews.into_iter().filter(Review::is_actionable).collect()
}

/// How much feedback is still open, for progress logging only.
///
/// A `CHANGES_REQUESTED` review without inline comments counts as one item;
/// every other review contributes its unresolved comments.
pub fn count_unresolved_threads(reviews: &[Review]) -> usize {
    reviews
        .iter()
        .map(|r| {
            if r.state == ReviewState::ChangesRequested && r.comments.is_empty() {
                1
            } else {
                r.unresolved_comments()
            }
        })
        .sum()
}

/// Fetch the bot's reviews and keep the actionable ones.
///
/// Query failures are logged and read as "no reviews yet" so the poll loop
/// keeps going.
pub async fn fetch_actionable_reviews(
    source: &dyn ReviewSource,
    pr: &PullRequestRef,
    author: &str,
) -> Vec<Review> {
    match source.list_reviews(pr, author).await {
        Ok(reviews) => actionable(reviews),
        Err(e) => {
            warn!(%pr, kind = e.kind(), error = %e, "Review query failed, treating as no reviews");
            Vec::new()
        }
    }
}
