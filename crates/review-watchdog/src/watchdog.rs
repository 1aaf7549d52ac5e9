//! The poll loop: trigger check, skip check, baseline, then timed polling.
//!
//! Outcomes are a tagged `WatchOutcome`; only `main` turns them into exit
//! codes and stdout output.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::aggregator::{count_unresolved_threads, fetch_actionable_reviews};
use crate::config::WatchConfig;
use crate::detectors::{automation_declined, check_trigger, TriggerCheck};
use crate::gh_bridge::{DeadlineSource, ReviewSource};
use crate::model::{PullRequestRef, Review};
use crate::state_machine::{StateMachine, WatchState};

/// How the run decides that a review was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Require the latest human comment to contain the trigger phrase.
    AwaitComment,
    /// Freshly opened pull request: the bot reviews without being asked.
    AssumeTriggered,
}

/// Why there was nothing to wait for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    NoComments,
    NotTriggered,
    AutomationDeclined { phrase: String },
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoComments => write!(f, "no human comments"),
            Self::NotTriggered => write!(f, "latest comment did not request a review"),
            Self::AutomationDeclined { phrase } => {
                write!(f, "review bot declined (\"{phrase}\")")
            }
        }
    }
}

/// Point in the run where the reviews were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundAt {
    Baseline,
    Poll { iteration: u32 },
}

/// Terminal result of one watchdog run.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// Actionable bot reviews are available. `reviews` is the full current
    /// list, not just the new entries.
    Reviews {
        reviews: Vec<Review>,
        found_at: FoundAt,
    },
    /// Nothing to wait for.
    NoOp { reason: NoOpReason },
    /// The time budget ran out first.
    TimedOut { elapsed: Duration },
}

impl WatchOutcome {
    /// 0 for every success or no-op, 1 for timeout.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Reviews { .. } | Self::NoOp { .. } => 0,
            Self::TimedOut { .. } => 1,
        }
    }

    /// Single JSON line for stdout, present only when reviews were found.
    pub fn handoff_line(&self) -> Result<Option<String>> {
        match self {
            Self::Reviews { reviews, .. } => serde_json::to_string(reviews)
                .map(Some)
                .context("Failed to serialize reviews"),
            _ => Ok(None),
        }
    }
}

/// Process-local bookkeeping for one run.
#[derive(Debug)]
pub struct PollState {
    start_time: Instant,
    trigger_timestamp: DateTime<Utc>,
    seen_review_ids: HashSet<String>,
}

impl PollState {
    /// Empty seen set anchored at `start_time`.
    pub fn new(start_time: Instant, trigger_timestamp: DateTime<Utc>) -> Self {
        Self {
            start_time,
            trigger_timestamp,
            seen_review_ids: HashSet::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time left before `timeout` is reached, zero once it has passed.
    pub fn remaining(&self, timeout: Duration) -> Duration {
        timeout.saturating_sub(self.elapsed())
    }

    pub fn trigger_timestamp(&self) -> DateTime<Utc> {
        self.trigger_timestamp
    }

    /// Insert-only: ids are never forgotten within a run.
    pub fn record(&mut self, reviews: &[Review]) {
        self.seen_review_ids
            .extend(reviews.iter().map(|r| r.id.clone()));
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen_review_ids.contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen_review_ids.len()
    }

    /// Ids in `reviews` that were not part of any earlier snapshot.
    pub fn unseen<'a>(&self, reviews: &'a [Review]) -> Vec<&'a str> {
        reviews
            .iter()
            .map(|r| r.id.as_str())
            .filter(|id| !self.has_seen(id))
            .collect()
    }
}

/// Drives one run of the poll loop against a `ReviewSource`.
pub struct Watchdog {
    source: Box<dyn ReviewSource>,
    config: WatchConfig,
}

impl Watchdog {
    /// Build a watchdog reading from `source` with fixed `config`.
    pub fn new(source: Box<dyn ReviewSource>, config: WatchConfig) -> Self {
        Self { source, config }
    }

    /// Run until the bot has reviewed, declined, or the budget is spent.
    ///
    /// Errors only on internal faults; every external-call failure is
    /// absorbed by the detectors and the aggregator. No call outlives the
    /// run's deadline.
    pub async fn run(&self, pr: &PullRequestRef, mode: TriggerMode) -> Result<WatchOutcome> {
        let started = Instant::now();
        let source = DeadlineSource::new(self.source.as_ref(), started + self.config.timeout);
        let mut sm = StateMachine::new();
        info!(
            %pr,
            ?mode,
            bot = %self.config.automation_login,
            interval_secs = self.config.poll_interval.as_secs(),
            timeout_secs = self.config.timeout.as_secs(),
            "Review watchdog starting"
        );

        let trigger_timestamp = match mode {
            TriggerMode::AssumeTriggered => {
                sm.advance(WatchState::CheckSkip, Some("assume triggered"))?;
                Utc::now()
            }
            TriggerMode::AwaitComment => {
                sm.advance(WatchState::CheckTrigger, None)?;
                let comments = source.list_comments(pr).await.unwrap_or_else(|e| {
                    warn!(%pr, kind = e.kind(), error = %e, "Comment fetch failed");
                    Vec::new()
                });
                match check_trigger(&comments, &self.config) {
                    TriggerCheck::Triggered { at } => {
                        info!(%at, "Review was requested");
                        sm.advance(WatchState::CheckSkip, Some("trigger phrase found"))?;
                        at
                    }
                    TriggerCheck::NoComments => {
                        return finish(sm, no_op(NoOpReason::NoComments));
                    }
                    TriggerCheck::NotTriggered { author } => {
                        info!(%author, "Latest comment is not a review request");
                        return finish(sm, no_op(NoOpReason::NotTriggered));
                    }
                }
            }
        };

        let mut state = PollState::new(started, trigger_timestamp);

        if let Some(outcome) = self.declined(&source, pr).await {
            return finish(sm, outcome);
        }

        sm.advance(WatchState::Baseline, None)?;
        let baseline = fetch_actionable_reviews(&source, pr, &self.config.automation_login).await;
        state.record(&baseline);
        info!(
            reviews = baseline.len(),
            unresolved = count_unresolved_threads(&baseline),
            "Baseline captured"
        );

        if baseline
            .iter()
            .any(|r| r.submitted_after(state.trigger_timestamp()))
        {
            return finish(
                sm,
                WatchOutcome::Reviews {
                    reviews: baseline,
                    found_at: FoundAt::Baseline,
                },
            );
        }

        sm.advance(WatchState::Polling, None)?;
        let mut iteration: u32 = 0;
        loop {
            if let Some(outcome) = self.out_of_time(&state, iteration) {
                return finish(sm, outcome);
            }

            // never sleep past the deadline
            let nap = self.config.poll_interval.min(state.remaining(self.config.timeout));
            tokio::time::sleep(nap).await;
            if let Some(outcome) = self.out_of_time(&state, iteration) {
                return finish(sm, outcome);
            }

            iteration += 1;
            sm.set_iteration(iteration);

            if let Some(outcome) = self.declined(&source, pr).await {
                return finish(sm, outcome);
            }

            let current = fetch_actionable_reviews(&source, pr, &self.config.automation_login).await;
            let fresh = state.unseen(&current);
            if !fresh.is_empty() {
                info!(iteration, new = ?fresh, total = current.len(), "New review arrived");
                return finish(
                    sm,
                    WatchOutcome::Reviews {
                        reviews: current,
                        found_at: FoundAt::Poll { iteration },
                    },
                );
            }

            info!(
                iteration,
                elapsed_secs = state.elapsed().as_secs(),
                seen = state.seen_count(),
                reviews = current.len(),
                unresolved = count_unresolved_threads(&current),
                "Still waiting for review"
            );
        }
    }

    fn out_of_time(&self, state: &PollState, iterations: u32) -> Option<WatchOutcome> {
        let elapsed = state.elapsed();
        if elapsed < self.config.timeout {
            return None;
        }
        warn!(
            elapsed_secs = elapsed.as_secs(),
            iterations,
            "Timed out waiting for an automated review"
        );
        Some(WatchOutcome::TimedOut { elapsed })
    }

    async fn declined(
        &self,
        source: &dyn ReviewSource,
        pr: &PullRequestRef,
    ) -> Option<WatchOutcome> {
        let notice = automation_declined(source, pr, &self.config).await?;
        info!(phrase = %notice.phrase, in_review = notice.in_review, "Review bot declined");
        Some(no_op(NoOpReason::AutomationDeclined {
            phrase: notice.phrase,
        }))
    }
}

fn no_op(reason: NoOpReason) -> WatchOutcome {
    WatchOutcome::NoOp { reason }
}

/// Record the terminal transition and log the run summary.
fn finish(mut sm: StateMachine, outcome: WatchOutcome) -> Result<WatchOutcome> {
    let (to, reason) = match &outcome {
        WatchOutcome::Reviews { reviews, .. } => {
            (WatchState::Done, format!("{} actionable review(s)", reviews.len()))
        }
        WatchOutcome::NoOp { reason } => (WatchState::Done, reason.to_string()),
        WatchOutcome::TimedOut { .. } => (WatchState::TimedOut, "budget exhausted".to_string()),
    };
    sm.advance(to, Some(reason.as_str()))?;
    info!(
        state = %sm.current(),
        iterations = sm.iteration(),
        transitions = sm.transitions().len(),
        summary = %sm.summary(),
        "Watchdog finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SkipPhrase;
    use crate::errors::SourceError;
    use crate::gh_bridge::MockReviewSource;
    use crate::model::{Author, Comment, RepoSlug, ReviewComment, ReviewState};
    use chrono::TimeZone;

    fn config() -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
            trigger_phrase: "/gemini review".into(),
            automation_login: "gemini-code-assist".into(),
            skip_phrases: vec![SkipPhrase::insensitive("unable to generate a review")],
        }
    }

    fn pr() -> PullRequestRef {
        let repo: RepoSlug = "octo/widgets".parse().unwrap();
        PullRequestRef::new(repo, 7).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    fn human(body: &str) -> Comment {
        Comment {
            author: Some(Author {
                login: "octocat".into(),
            }),
            body: body.into(),
            created_at: t0(),
        }
    }

    fn blocking_review(id: &str, submitted_at: DateTime<Utc>) -> Review {
        Review {
            id: id.into(),
            author: Some(Author {
                login: "gemini-code-assist".into(),
            }),
            state: ReviewState::ChangesRequested,
            submitted_at: Some(submitted_at),
            body: String::new(),
            comments: vec![],
        }
    }

    #[tokio::test]
    async fn untriggered_run_never_queries_reviews() {
        let mut source = MockReviewSource::new();
        source
            .expect_list_comments()
            .times(1)
            .returning(|_| Ok(vec![human("looks good")]));
        source.expect_list_reviews().never();

        let watchdog = Watchdog::new(Box::new(source), config());
        let outcome = watchdog.run(&pr(), TriggerMode::AwaitComment).await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::NoOp {
                reason: NoOpReason::NotTriggered
            }
        );
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.handoff_line().unwrap(), None);
    }

    #[tokio::test]
    async fn comment_fetch_failure_reads_as_no_comments() {
        let mut source = MockReviewSource::new();
        source.expect_list_comments().times(1).returning(|_| {
            Err(SourceError::NotFound("octo/widgets#7".into()))
        });
        source.expect_list_reviews().never();

        let watchdog = Watchdog::new(Box::new(source), config());
        let outcome = watchdog.run(&pr(), TriggerMode::AwaitComment).await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::NoOp {
                reason: NoOpReason::NoComments
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn review_query_failures_do_not_abort_polling() {
        let mut source = MockReviewSource::new();
        source
            .expect_list_comments()
            .returning(|_| Ok(vec![human("/gemini review")]));
        let mut calls = 0;
        source.expect_list_reviews().returning(move |_, _| {
            calls += 1;
            // skip check and aggregator each query once per round
            if calls < 6 {
                Err(SourceError::CommandFailed {
                    command: "gh api graphql".into(),
                    status: "exit status: 1".into(),
                    stderr: "HTTP 502".into(),
                })
            } else {
                Ok(vec![blocking_review("PRR_9", t0())])
            }
        });

        let watchdog = Watchdog::new(Box::new(source), config());
        let outcome = watchdog.run(&pr(), TriggerMode::AwaitComment).await.unwrap();
        match outcome {
            WatchOutcome::Reviews { reviews, found_at } => {
                assert_eq!(reviews.len(), 1);
                assert!(matches!(found_at, FoundAt::Poll { .. }));
            }
            other => panic!("expected reviews, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assume_triggered_skips_comment_trigger() {
        let mut source = MockReviewSource::new();
        // only the skip check reads comments
        source.expect_list_comments().times(1).returning(|_| {
            Ok(vec![Comment {
                author: Some(Author {
                    login: "gemini-code-assist[bot]".into(),
                }),
                body: "Gemini is unable to generate a review for this pull request".into(),
                created_at: t0(),
            }])
        });
        source.expect_list_reviews().times(1).returning(|_, _| Ok(vec![]));

        let watchdog = Watchdog::new(Box::new(source), config());
        let outcome = watchdog
            .run(&pr(), TriggerMode::AssumeTriggered)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WatchOutcome::NoOp {
                reason: NoOpReason::AutomationDeclined { .. }
            }
        ));
    }

    #[test]
    fn poll_state_only_grows() {
        let mut state = PollState::new(Instant::now(), t0());
        state.record(&[blocking_review("a", t0())]);
        state.record(&[]);
        state.record(&[blocking_review("b", t0())]);
        assert_eq!(state.seen_count(), 2);
        assert!(state.has_seen("a"));

        let current = [blocking_review("a", t0()), blocking_review("c", t0())];
        assert_eq!(state.unseen(&current), ["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_budget_saturates_at_zero() {
        let state = PollState::new(Instant::now(), t0());
        let timeout = Duration::from_secs(45);
        assert_eq!(state.remaining(timeout), timeout);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.remaining(timeout), Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.remaining(timeout), Duration::ZERO);
    }

    #[test]
    fn handoff_line_is_single_json_array() {
        let outcome = WatchOutcome::Reviews {
            reviews: vec![Review {
                comments: vec![ReviewComment {
                    is_resolved: false,
                    body: "nit".into(),
                }],
                ..blocking_review("PRR_1", t0())
            }],
            found_at: FoundAt::Baseline,
        };
        let line = outcome.handoff_line().unwrap().unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value[0]["id"], "PRR_1");
        assert_eq!(value[0]["state"], "CHANGES_REQUESTED");
        assert_eq!(value[0]["comments"][0]["isResolved"], false);
    }

    #[test]
    fn timeout_is_the_only_failing_exit() {
        let timed_out = WatchOutcome::TimedOut {
            elapsed: Duration::from_secs(600),
        };
        assert_eq!(timed_out.exit_code(), 1);
        assert_eq!(
            no_op(NoOpReason::NoComments).exit_code(),
            0,
            "no-op outcomes are successes"
        );
    }
}
