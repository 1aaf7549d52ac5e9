//! Review watchdog: waits for an automated pull request review.
//!
//! After a pull request is opened, or a human comments the trigger phrase,
//! the review bot either posts feedback, declares it cannot review, or stays
//! silent. The watchdog polls until one of the first two happens or the time
//! budget runs out, and reports the outcome through a single JSON line on
//! stdout plus the process exit status.
//!
//! ```text
//! Init → CheckTrigger → CheckSkip → Baseline ─┬─→ Done
//!                                             └─→ Polling ─┬─→ Done
//!                                                          └─→ TimedOut
//! ```

pub mod aggregator;
pub mod config;
pub mod detectors;
pub mod errors;
pub mod gh_bridge;
pub mod model;
pub mod state_machine;
pub mod watchdog;

pub use config::{SkipPhrase, WatchConfig};
pub use errors::{ArgError, SourceError};
pub use gh_bridge::{DeadlineSource, GhCli, ReviewSource};
pub use model::{Comment, PullRequestRef, RepoSlug, Review, ReviewComment, ReviewState};
pub use watchdog::{NoOpReason, TriggerMode, WatchOutcome, Watchdog};
