use std::env;
use std::time::Duration;

/// Default delay between two review polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// Default wall-clock budget for one watchdog run (10 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Comment text that asks the bot for a review.
const DEFAULT_TRIGGER_PHRASE: &str = "/gemini review";
/// Login of the review bot.
const DEFAULT_AUTOMATION_LOGIN: &str = "gemini-code-assist";

const ENV_POLL_INTERVAL: &str = "REVIEW_WATCHDOG_POLL_SECS";
const ENV_TIMEOUT: &str = "REVIEW_WATCHDOG_TIMEOUT_SECS";
const ENV_TRIGGER: &str = "REVIEW_WATCHDOG_TRIGGER";
const ENV_BOT: &str = "REVIEW_WATCHDOG_BOT";

/// Text the bot posts when it declines to review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipPhrase {
    pub text: String,
    pub case_sensitive: bool,
}

impl SkipPhrase {
    pub fn sensitive(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            case_sensitive: true,
        }
    }

    pub fn insensitive(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            case_sensitive: false,
        }
    }

    /// Substring match honouring this phrase's case sensitivity.
    pub fn matches(&self, haystack: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(&self.text)
        } else {
            haystack
                .to_lowercase()
                .contains(&self.text.to_lowercase())
        }
    }
}

/// Immutable settings for one watchdog run.
///
/// `Default` yields the built-in constants. Unlike those constants, the poll
/// interval, timeout, trigger phrase and bot login can be overridden from the
/// environment (`REVIEW_WATCHDOG_POLL_SECS`, `REVIEW_WATCHDOG_TIMEOUT_SECS`,
/// `REVIEW_WATCHDOG_TRIGGER`, `REVIEW_WATCHDOG_BOT`). The variables are read
/// once, when the config is built; skip phrases are not overridable.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Sleep between two polls.
    pub poll_interval: Duration,
    /// Give up once this much time has passed since start.
    pub timeout: Duration,
    /// Case-insensitive substring a human comment must contain.
    pub trigger_phrase: String,
    /// Login of the review bot (with or without `[bot]`).
    pub automation_login: String,
    pub skip_phrases: Vec<SkipPhrase>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(secs_from_env(
                ENV_POLL_INTERVAL,
                DEFAULT_POLL_INTERVAL_SECS,
            )),
            timeout: Duration::from_secs(secs_from_env(ENV_TIMEOUT, DEFAULT_TIMEOUT_SECS)),
            trigger_phrase: env::var(ENV_TRIGGER)
                .unwrap_or_else(|_| DEFAULT_TRIGGER_PHRASE.to_string()),
            automation_login: env::var(ENV_BOT)
                .unwrap_or_else(|_| DEFAULT_AUTOMATION_LOGIN.to_string()),
            skip_phrases: default_skip_phrases(),
        }
    }
}

fn default_skip_phrases() -> Vec<SkipPhrase> {
    vec![
        SkipPhrase::insensitive("unable to generate a review"),
        SkipPhrase::insensitive("file types involved not being currently supported"),
        SkipPhrase::insensitive("daily quota limit"),
    ]
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                tracing::warn!(key, value = %raw, default, "Ignoring invalid duration override");
                default
            }
        },
        Err(_) => default,
    }
}
