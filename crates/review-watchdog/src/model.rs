//! Pull request conversation data as seen by the watchdog.
//!
//! Field names follow the GitHub CLI's JSON (`createdAt`, `submittedAt`,
//! `isResolved`), so the same types decode `gh` output and serialize the
//! stdout handoff.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ArgError;

/// `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoSlug {
    type Err = ArgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ArgError::InvalidRepo(s.to_string())),
        }
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A review request: one pull request in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    pub repo: RepoSlug,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(repo: RepoSlug, number: u64) -> Result<Self, ArgError> {
        if number == 0 {
            return Err(ArgError::ZeroPullNumber);
        }
        Ok(Self { repo, number })
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Account reference as returned by GitHub. Deleted accounts come back as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
}

/// Compare two logins, treating `name` and `name[bot]` as the same account.
///
/// The REST API reports app accounts with the `[bot]` suffix while GraphQL
/// drops it.
pub fn same_login(a: &str, b: &str) -> bool {
    fn bare(login: &str) -> &str {
        login.strip_suffix("[bot]").unwrap_or(login)
    }
    bare(a).eq_ignore_ascii_case(bare(b))
}

/// Top-level conversation comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn author_login(&self) -> &str {
        self.author.as_ref().map_or("", |a| a.login.as_str())
    }

    pub fn is_authored_by(&self, login: &str) -> bool {
        same_login(self.author_login(), login)
    }
}

/// Review verdict. Values GitHub may add later are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    Other(String),
}

impl From<String> for ReviewState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "APPROVED" => Self::Approved,
            "CHANGES_REQUESTED" => Self::ChangesRequested,
            "COMMENTED" => Self::Commented,
            "DISMISSED" => Self::Dismissed,
            "PENDING" => Self::Pending,
            _ => Self::Other(raw),
        }
    }
}

impl From<ReviewState> for String {
    fn from(state: ReviewState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "APPROVED"),
            Self::ChangesRequested => write!(f, "CHANGES_REQUESTED"),
            Self::Commented => write!(f, "COMMENTED"),
            Self::Dismissed => write!(f, "DISMISSED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// One inline comment attached to a review, with its thread's resolution flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub is_resolved: bool,
    #[serde(default)]
    pub body: String,
}

/// A submitted pull request review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    #[serde(default)]
    pub author: Option<Author>,
    pub state: ReviewState,
    /// Absent while a review is still pending.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub comments: Vec<ReviewComment>,
}

impl Review {
    pub fn author_login(&self) -> &str {
        self.author.as_ref().map_or("", |a| a.login.as_str())
    }

    pub fn is_authored_by(&self, login: &str) -> bool {
        same_login(self.author_login(), login)
    }

    /// Blocks merge or still carries open feedback.
    pub fn is_actionable(&self) -> bool {
        self.state == ReviewState::ChangesRequested || self.unresolved_comments() > 0
    }

    pub fn unresolved_comments(&self) -> usize {
        self.comments.iter().filter(|c| !c.is_resolved).count()
    }

    /// Strictly after `instant`. Pending reviews never qualify.
    pub fn submitted_after(&self, instant: DateTime<Utc>) -> bool {
        self.submitted_at.is_some_and(|at| at > instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(state: ReviewState, resolved: &[bool]) -> Review {
        Review {
            id: "r".into(),
            author: None,
            state,
            submitted_at: None,
            body: String::new(),
            comments: resolved
                .iter()
                .map(|&is_resolved| ReviewComment {
                    is_resolved,
                    body: "nit".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn repo_slug_parses_owner_and_name() {
        let slug: RepoSlug = "octo/widgets".parse().unwrap();
        assert_eq!(slug.owner, "octo");
        assert_eq!(slug.name, "widgets");
        assert_eq!(slug.to_string(), "octo/widgets");
    }

    #[test]
    fn repo_slug_rejects_malformed_input() {
        for bad in ["widgets", "/widgets", "octo/", "a/b/c", ""] {
            assert!(bad.parse::<RepoSlug>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn pull_request_number_must_be_positive() {
        let slug: RepoSlug = "octo/widgets".parse().unwrap();
        assert_eq!(
            PullRequestRef::new(slug.clone(), 0),
            Err(ArgError::ZeroPullNumber)
        );
        let pr = PullRequestRef::new(slug, 42).unwrap();
        assert_eq!(pr.to_string(), "octo/widgets#42");
    }

    #[test]
    fn bot_suffix_is_ignored_when_comparing_logins() {
        assert!(same_login("gemini-code-assist[bot]", "gemini-code-assist"));
        assert!(same_login("Gemini-Code-Assist", "gemini-code-assist[bot]"));
        assert!(!same_login("gemini-code-assist", "octocat"));
    }

    #[test]
    fn unknown_review_state_is_preserved() {
        let state: ReviewState = serde_json::from_str("\"ESCALATED\"").unwrap();
        assert_eq!(state, ReviewState::Other("ESCALATED".into()));
        assert_eq!(serde_json::to_string(&state).unwrap(), "\"ESCALATED\"");
    }

    #[test]
    fn changes_requested_is_actionable_without_comments() {
        assert!(review(ReviewState::ChangesRequested, &[]).is_actionable());
    }

    #[test]
    fn commented_review_needs_an_open_thread() {
        assert!(!review(ReviewState::Commented, &[true, true]).is_actionable());
        assert!(review(ReviewState::Commented, &[true, false]).is_actionable());
        assert!(!review(ReviewState::Approved, &[]).is_actionable());
    }

    #[test]
    fn pending_review_is_never_after_trigger() {
        let r = review(ReviewState::Pending, &[]);
        assert!(!r.submitted_after(DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn comment_decodes_gh_json() {
        let json = r#"{
            "author": {"login": "octocat"},
            "authorAssociation": "MEMBER",
            "body": "/gemini review",
            "createdAt": "2025-03-01T10:00:00Z"
        }"#;
        let c: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(c.author_login(), "octocat");
        assert_eq!(c.body, "/gemini review");
    }

    #[test]
    fn comment_from_deleted_account_has_empty_login() {
        let json = r#"{"author": null, "body": "hi", "createdAt": "2025-03-01T10:00:00Z"}"#;
        let c: Comment = serde_json::from_str(json).unwrap();
        assert_eq!(c.author_login(), "");
    }
}
