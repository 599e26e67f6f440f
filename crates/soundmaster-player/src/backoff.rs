//! Error classifier and exponential backoff policy.
//!
//! Each failure on the current source either schedules a retry against the
//! same source or, once `max_retries` consecutive retries have been spent,
//! escalates to the fallback rotator.  Reaching `Playing` clears the history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use soundmaster_proto::config::RetryConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The engine could not open the source.
    Load,
    /// The source opened but playback failed or dropped.
    Playback,
    /// The engine could not even create a session.
    Construction,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} failure: {message}")]
pub struct PlaybackError {
    pub kind: FailureKind,
    pub message: String,
}

impl PlaybackError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
    pub jitter_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_retries: config.max_retries,
            jitter_max: Duration::from_millis(config.jitter_ms),
        }
    }

    /// `min(initial * 2^k, max)`, before jitter.
    pub fn base_delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let base = self.base_delay(consecutive_failures);
        let jitter_ms = self.jitter_max.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    RetrySameSource,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDecision {
    pub action: FailureAction,
    /// Wait before the retry; zero when escalating.
    pub delay: Duration,
    /// 1-based retry number for `RetrySameSource`, the exhausted count for
    /// `Escalate`.
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub struct ErrorClassifier {
    policy: BackoffPolicy,
    state: RetryState,
}

impl ErrorClassifier {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: RetryState::default(),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn on_failure(&mut self, error: &PlaybackError) -> FailureDecision {
        let k = self.state.consecutive_failures;
        self.state.last_failure_at = Some(Utc::now());

        if k < self.policy.max_retries {
            self.state.consecutive_failures = k + 1;
            let delay = self.policy.delay(k);
            debug!(
                "classifier: {} → retry {}/{} in {:?}",
                error,
                k + 1,
                self.policy.max_retries,
                delay
            );
            FailureDecision {
                action: FailureAction::RetrySameSource,
                delay,
                attempt: k + 1,
            }
        } else {
            self.state.consecutive_failures = 0;
            debug!("classifier: {} → retries exhausted, escalating", error);
            FailureDecision {
                action: FailureAction::Escalate,
                delay: Duration::ZERO,
                attempt: k,
            }
        }
    }

    /// A session reached `Playing`.
    pub fn on_playing(&mut self) {
        if self.state.consecutive_failures > 0 {
            debug!(
                "classifier: playing again after {} failures, clearing history",
                self.state.consecutive_failures
            );
        }
        self.state.consecutive_failures = 0;
    }

    /// Forget failure history, e.g. after an explicit source switch.
    pub fn reset(&mut self) {
        self.state.consecutive_failures = 0;
    }
}
