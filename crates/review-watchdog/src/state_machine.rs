//! Watchdog state machine: explicit states and legal transition guards.
//!
//! Every run starts at `Init` and ends at `Done` or `TimedOut`. The loop calls
//! `advance()` to move between states; each call checks the edge against the
//! transition table and appends it to the log so a finished run can be
//! summarised on stderr.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The set of watchdog states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Start time captured, nothing fetched yet.
    Init,
    /// Reading the latest human comment for the trigger phrase.
    CheckTrigger,
    /// Looking for a "cannot review" notice from the bot.
    CheckSkip,
    /// First review snapshot.
    Baseline,
    /// Sleeping and re-querying until something new shows up.
    Polling,
    /// Finished without failure. Terminal.
    Done,
    /// Time budget exhausted. Terminal.
    TimedOut,
}

impl WatchState {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::TimedOut)
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::CheckTrigger => write!(f, "CheckTrigger"),
            Self::CheckSkip => write!(f, "CheckSkip"),
            Self::Baseline => write!(f, "Baseline"),
            Self::Polling => write!(f, "Polling"),
            Self::Done => write!(f, "Done"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Legal transitions between watchdog states.
///
/// ```text
/// Init         → CheckTrigger | CheckSkip
/// CheckTrigger → CheckSkip | Done
/// CheckSkip    → Baseline | Done
/// Baseline     → Polling | Done
/// Polling      → Done | TimedOut
/// ```
fn is_legal_transition(from: WatchState, to: WatchState) -> bool {
    use WatchState::*;

    if from.is_terminal() {
        return false;
    }

    matches!(
        (from, to),
        (Init, CheckTrigger)
            // assume-triggered mode skips the comment check
            | (Init, CheckSkip)
            | (CheckTrigger, CheckSkip)
            | (CheckTrigger, Done)
            | (CheckSkip, Baseline)
            | (CheckSkip, Done)
            | (Baseline, Polling)
            | (Baseline, Done)
            | (Polling, Done)
            | (Polling, TimedOut)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state transitioned from.
    pub from: WatchState,
    /// The state transitioned to.
    pub to: WatchState,
    /// Poll iteration at the time of transition (0 before polling).
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an edge is missing from the transition table.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: WatchState,
    pub to: WatchState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The watchdog state machine.
///
/// Tracks the current state, enforces legal transitions, and keeps the full
/// transition log for the end-of-run summary.
pub struct StateMachine {
    current: WatchState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Init`.
    pub fn new() -> Self {
        Self {
            current: WatchState::Init,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn current(&self) -> WatchState {
        self.current
    }

    /// Get the current poll iteration.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Set the poll iteration recorded with subsequent transitions.
    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Move to `to`, or fail if the edge is not in the transition table.
    pub fn advance(
        &mut self,
        to: WatchState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            reason = reason.unwrap_or(""),
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Full transition log, oldest first.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. `Init → Done (1200ms, 3 transitions) [...]`.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            WatchState::Init,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
