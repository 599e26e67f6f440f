//! Status reporter: the single published `PlayerState`.
//!
//! Writes go through `update`, which bumps `rev` only when something actually
//! changed, so watchers are not woken for no-op updates.

use soundmaster_proto::protocol::{ConnectionState, PlaybackStatus, PlayerState, StreamMetadata};
use tokio::sync::watch;
use tracing::debug;

pub struct StatusReporter {
    tx: watch::Sender<PlayerState>,
}

impl StatusReporter {
    pub fn new(initial: PlayerState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PlayerState {
        self.tx.borrow().clone()
    }

    pub fn current_status(&self) -> PlaybackStatus {
        self.tx.borrow().status
    }

    /// Apply `f` and publish if the state changed.  Returns whether it did.
    pub fn update(&self, f: impl FnOnce(&mut PlayerState)) -> bool {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            if *state == before {
                return false;
            }
            state.rev = before.rev + 1;
            true
        })
    }

    pub fn set_status(&self, status: PlaybackStatus) {
        let changed = self.update(|state| {
            state.status = status;
            state.is_playing = status == PlaybackStatus::Playing;
            state.is_buffering = status == PlaybackStatus::Buffering;
        });
        if changed {
            debug!("status: {:?}", status);
        }
    }

    /// Overwrite the metadata record.  Idempotent.
    pub fn update_metadata(&self, metadata: StreamMetadata) {
        self.update(|state| state.metadata = metadata);
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        self.update(|state| state.metadata.connection = connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::select_quality;
    use soundmaster_proto::protocol::{QualityTier, SourceRole};

    fn initial() -> PlayerState {
        PlayerState {
            rev: 0,
            status: PlaybackStatus::Idle,
            is_playing: false,
            is_buffering: false,
            volume: 0.8,
            is_muted: false,
            current_url: "https://primary.test".to_string(),
            source_role: SourceRole::Primary,
            fallback_index: None,
            quality: select_quality(QualityTier::Medium),
            metadata: StreamMetadata::default(),
            is_initializing: false,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn status_flags_follow_status() {
        let reporter = StatusReporter::new(initial());
        reporter.set_status(PlaybackStatus::Buffering);
        let state = reporter.snapshot();
        assert!(state.is_buffering && !state.is_playing);

        reporter.set_status(PlaybackStatus::Playing);
        let state = reporter.snapshot();
        assert!(state.is_playing && !state.is_buffering);
        assert_eq!(state.rev, 2);
    }

    #[test]
    fn metadata_updates_are_idempotent() {
        let reporter = StatusReporter::new(initial());
        let metadata = StreamMetadata {
            title: Some("Night Shift".to_string()),
            artist: None,
            connection: ConnectionState::Playing,
        };
        reporter.update_metadata(metadata.clone());
        reporter.update_metadata(metadata.clone());
        let state = reporter.snapshot();
        assert_eq!(state.metadata, metadata);
        assert_eq!(state.rev, 1);
    }

    #[tokio::test]
    async fn watchers_see_changes() {
        let reporter = StatusReporter::new(initial());
        let mut rx = reporter.subscribe();
        reporter.set_connection(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().metadata.connection,
            ConnectionState::Connected
        );

        reporter.set_connection(ConnectionState::Connected);
        assert!(!rx.has_changed().unwrap());
    }
}
