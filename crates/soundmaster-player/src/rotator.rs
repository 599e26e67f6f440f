//! Fallback source rotator.
//!
//! Keeps an index into the fallback list (`None` = primary).  Rotation is
//! circular: advancing past the last fallback lands back on the primary, so
//! the controller never runs out of candidates.

use std::time::Duration;

use soundmaster_proto::protocol::{SourceRole, StreamSource};
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub url: String,
    pub index: Option<usize>,
    /// All fallbacks were exhausted and the rotation returned to the primary.
    pub wrapped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotatorError {
    #[error("source list is empty")]
    NoSources,
    #[error("first source must be the primary, got {0:?}")]
    MissingPrimary(SourceRole),
}

pub struct FallbackRotator {
    primary: StreamSource,
    fallbacks: Vec<StreamSource>,
    fallback_index: Option<usize>,
    last_switch_at: Option<Instant>,
    debounce: Duration,
}

impl FallbackRotator {
    /// `sources` must start with the primary, followed by fallbacks in order
    /// (the shape produced by `soundmaster_proto::state::stream_sources`).
    pub fn new(sources: Vec<StreamSource>, debounce: Duration) -> Result<Self, RotatorError> {
        let mut iter = sources.into_iter();
        let primary = iter.next().ok_or(RotatorError::NoSources)?;
        if primary.role != SourceRole::Primary {
            return Err(RotatorError::MissingPrimary(primary.role));
        }
        let fallbacks = iter
            .enumerate()
            .map(|(i, s)| StreamSource {
                url: s.url,
                role: SourceRole::Fallback(i),
            })
            .collect();
        Ok(Self {
            primary,
            fallbacks,
            fallback_index: None,
            last_switch_at: None,
            debounce,
        })
    }

    pub fn fallback_index(&self) -> Option<usize> {
        self.fallback_index
    }

    pub fn is_on_fallback(&self) -> bool {
        self.fallback_index.is_some()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    pub fn primary_url(&self) -> &str {
        &self.primary.url
    }

    pub fn current_source(&self) -> &StreamSource {
        match self.fallback_index {
            Some(i) => &self.fallbacks[i],
            None => &self.primary,
        }
    }

    pub fn desired_url(&self) -> &str {
        &self.current_source().url
    }

    /// Move to the next candidate after automatic escalation.  Returns `None`
    /// without touching state when called again within the debounce window,
    /// which absorbs duplicate error events for one outage.
    pub fn advance(&mut self, now: Instant) -> Option<Rotation> {
        if let Some(last) = self.last_switch_at {
            let since = now.saturating_duration_since(last);
            if since < self.debounce {
                debug!("rotator: advance debounced ({:?} since last switch)", since);
                return None;
            }
        }
        Some(self.rotate(now))
    }

    /// Move to the next candidate on explicit user request.  Not debounced.
    pub fn advance_manual(&mut self, now: Instant) -> Rotation {
        self.rotate(now)
    }

    /// Return to the primary source unconditionally.
    pub fn restore_primary(&mut self) -> String {
        if let Some(i) = self.fallback_index.take() {
            info!("rotator: restoring primary (was fallback {})", i);
        }
        self.primary.url.clone()
    }

    fn rotate(&mut self, now: Instant) -> Rotation {
        let next = self.fallback_index.map_or(0, |i| i + 1);
        self.last_switch_at = Some(now);

        if next < self.fallbacks.len() {
            self.fallback_index = Some(next);
            info!("rotator: fallback {} → {}", next, self.fallbacks[next].url);
            Rotation {
                url: self.fallbacks[next].url.clone(),
                index: Some(next),
                wrapped: false,
            }
        } else {
            self.fallback_index = None;
            info!("rotator: fallbacks exhausted, back to primary");
            Rotation {
                url: self.primary.url.clone(),
                index: None,
                wrapped: true,
            }
        }
    }
}
