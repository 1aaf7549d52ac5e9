//! GitHub bridge: the watchdog's only view of the review service.
//!
//! `ReviewSource` is the seam the loop depends on. `GhCli` implements it by
//! shelling out to the GitHub CLI, which already owns authentication and
//! host configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

use crate::errors::SourceError;
use crate::model::{Author, Comment, PullRequestRef, Review, ReviewComment, ReviewState};

/// One page of reviews and review threads. The two connections page
/// independently; a cursor left unset starts that connection from the top.
const REVIEWS_QUERY: &str = r#"
query($owner: String!, $name: String!, $number: Int!, $reviewsAfter: String, $threadsAfter: String) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      reviews(first: 100, after: $reviewsAfter) {
        pageInfo { hasNextPage endCursor }
        nodes { id state submittedAt body author { login } }
      }
      reviewThreads(first: 100, after: $threadsAfter) {
        pageInfo { hasNextPage endCursor }
        nodes {
          isResolved
          comments(first: 100) {
            nodes { body pullRequestReview { id } }
          }
        }
      }
    }
  }
}
"#;

/// Upper bound on GraphQL round-trips per `list_reviews` call.
const MAX_REVIEW_PAGES: usize = 20;

/// Read access to a pull request's conversation and reviews.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Top-level conversation comments, oldest first.
    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<Comment>, SourceError>;

    /// Reviews submitted by `author`, each carrying its inline comments with
    /// their thread's resolution flag. Order is as received.
    async fn list_reviews(
        &self,
        pr: &PullRequestRef,
        author: &str,
    ) -> Result<Vec<Review>, SourceError>;
}

#[async_trait]
impl<T: ReviewSource + ?Sized> ReviewSource for std::sync::Arc<T> {
    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<Comment>, SourceError> {
        (**self).list_comments(pr).await
    }

    async fn list_reviews(
        &self,
        pr: &PullRequestRef,
        author: &str,
    ) -> Result<Vec<Review>, SourceError> {
        (**self).list_reviews(pr, author).await
    }
}

/// Bridge to the `gh` CLI binary.
pub struct GhCli {
    bin: String,
}

impl GhCli {
    /// Use the binary named by `GH_BIN`, falling back to `gh` on `PATH`.
    pub fn from_env() -> Self {
        Self::with_bin(std::env::var("GH_BIN").unwrap_or_else(|_| "gh".into()))
    }

    /// Use an explicit binary path.
    pub fn with_bin(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[String]) -> Result<T, SourceError> {
        let command = format!("{} {}", self.bin, summarize_args(args));
        tracing::debug!(%command, "Running GitHub CLI");

        let output = Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                program: self.bin.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|source| SourceError::Malformed { command, source })
    }

    /// Walk both connections until neither reports another page.
    async fn fetch_pull(&self, pr: &PullRequestRef) -> Result<PullRequestNode, SourceError> {
        let mut pull = PullRequestNode::default();
        let mut reviews = PageCursor::default();
        let mut threads = PageCursor::default();

        for page in 1..=MAX_REVIEW_PAGES {
            let node = self.fetch_page(pr, &reviews, &threads).await?;
            reviews.absorb(node.reviews, &mut pull.reviews.nodes);
            threads.absorb(node.review_threads, &mut pull.review_threads.nodes);
            if reviews.done && threads.done {
                return Ok(pull);
            }
            tracing::debug!(%pr, page, "Fetching next review page");
        }

        tracing::warn!(
            %pr,
            pages = MAX_REVIEW_PAGES,
            reviews = pull.reviews.nodes.len(),
            threads = pull.review_threads.nodes.len(),
            "Review paging cap reached, newest entries may be missing"
        );
        Ok(pull)
    }

    async fn fetch_page(
        &self,
        pr: &PullRequestRef,
        reviews: &PageCursor,
        threads: &PageCursor,
    ) -> Result<PullRequestNode, SourceError> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={REVIEWS_QUERY}"),
            "-f".to_string(),
            format!("owner={}", pr.repo.owner),
            "-f".to_string(),
            format!("name={}", pr.repo.name),
            "-F".to_string(),
            format!("number={}", pr.number),
        ];
        for (var, cursor) in [("reviewsAfter", reviews), ("threadsAfter", threads)] {
            if let Some(after) = &cursor.after {
                args.push("-f".to_string());
                args.push(format!("{var}={after}"));
            }
        }

        let response: GraphQlResponse = self.run_json(&args).await?;
        response
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.pull_request)
            .ok_or_else(|| SourceError::NotFound(pr.to_string()))
    }
}

/// Position in one paged GraphQL connection.
#[derive(Debug, Default)]
struct PageCursor {
    after: Option<String>,
    done: bool,
}

impl PageCursor {
    /// Append a page's nodes unless the connection was already exhausted.
    fn absorb<T>(&mut self, page: Connection<T>, into: &mut Vec<T>) {
        if self.done {
            return;
        }
        into.extend(page.nodes);
        let PageInfo {
            has_next_page,
            end_cursor,
        } = page.page_info;
        self.done = !has_next_page || end_cursor.is_none();
        if end_cursor.is_some() {
            self.after = end_cursor;
        }
    }
}

#[async_trait]
impl ReviewSource for GhCli {
    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<Comment>, SourceError> {
        let args = vec![
            "pr".to_string(),
            "view".to_string(),
            pr.number.to_string(),
            "--repo".to_string(),
            pr.repo.to_string(),
            "--json".to_string(),
            "comments".to_string(),
        ];
        let view: PrCommentsView = self.run_json(&args).await?;
        Ok(view.comments)
    }

    async fn list_reviews(
        &self,
        pr: &PullRequestRef,
        author: &str,
    ) -> Result<Vec<Review>, SourceError> {
        let pull = self.fetch_pull(pr).await?;
        Ok(join_reviews(pull, author))
    }
}

/// Bounds every call of an inner source by a fixed deadline.
///
/// A call still pending at the deadline is dropped, which kills any child
/// process it spawned, and reported as `SourceError::DeadlineExceeded`.
pub struct DeadlineSource<'a> {
    inner: &'a dyn ReviewSource,
    deadline: Instant,
}

impl<'a> DeadlineSource<'a> {
    pub fn new(inner: &'a dyn ReviewSource, deadline: Instant) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<'a> ReviewSource for DeadlineSource<'a> {
    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<Comment>, SourceError> {
        match timeout_at(self.deadline, self.inner.list_comments(pr)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::DeadlineExceeded {
                call: "list_comments",
            }),
        }
    }

    async fn list_reviews(
        &self,
        pr: &PullRequestRef,
        author: &str,
    ) -> Result<Vec<Review>, SourceError> {
        match timeout_at(self.deadline, self.inner.list_reviews(pr, author)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::DeadlineExceeded {
                call: "list_reviews",
            }),
        }
    }
}

/// Keep `query=` payloads out of log lines.
fn summarize_args(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.starts_with("query=") {
                "query=<graphql>"
            } else {
                a.as_str()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Attach each thread comment to the review it was posted in, then keep the
/// reviews written by `author`.
fn join_reviews(pull: PullRequestNode, author: &str) -> Vec<Review> {
    let mut by_review: HashMap<String, Vec<ReviewComment>> = HashMap::new();
    for thread in pull.review_threads.nodes {
        for comment in thread.comments.nodes {
            let Some(review) = comment.pull_request_review else {
                continue;
            };
            by_review.entry(review.id).or_default().push(ReviewComment {
                is_resolved: thread.is_resolved,
                body: comment.body,
            });
        }
    }

    pull.reviews
        .nodes
        .into_iter()
        .map(|node| Review {
            comments: by_review.remove(&node.id).unwrap_or_default(),
            id: node.id,
            author: node.author,
            state: node.state,
            submitted_at: node.submitted_at,
            body: node.body,
        })
        .filter(|review| review.is_authored_by(author))
        .collect()
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PrCommentsView {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    pull_request: Option<PullRequestNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    reviews: Connection<ReviewNode>,
    review_threads: Connection<ThreadNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
    #[serde(default)]
    page_info: PageInfo,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewNode {
    id: String,
    state: ReviewState,
    #[serde(default)]
    submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadNode {
    is_resolved: bool,
    comments: Connection<ThreadCommentNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadCommentNode {
    #[serde(default)]
    body: String,
    #[serde(default)]
    pull_request_review: Option<ReviewIdNode>,
}

#[derive(Debug, Deserialize)]
struct ReviewIdNode {
    id: String,
}
