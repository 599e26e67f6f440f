//! Persists listener preferences whenever the published state changes them.

use soundmaster_proto::protocol::PlayerState;
use soundmaster_proto::state::{PreferenceStore, Preferences};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

pub fn preferences_of(state: &PlayerState) -> Preferences {
    Preferences {
        volume: state.volume,
        muted: state.is_muted,
        quality: state.quality.tier,
    }
}

/// Write preferences each time volume, mute or quality change.  Exits when
/// the state channel closes.
pub fn spawn_writer(store: PreferenceStore, mut state_rx: watch::Receiver<PlayerState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = preferences_of(&state_rx.borrow_and_update());
        while state_rx.changed().await.is_ok() {
            let prefs = preferences_of(&state_rx.borrow_and_update());
            if prefs == last {
                continue;
            }
            if let Err(e) = store.save(&prefs).await {
                warn!("Failed to save preferences to {:?}: {}", store.path(), e);
            }
            last = prefs;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::select_quality;
    use soundmaster_proto::protocol::{
        PlaybackStatus, QualityTier, SourceRole, StreamMetadata,
    };
    use std::time::Duration;

    fn state(volume: f32) -> PlayerState {
        PlayerState {
            rev: 0,
            status: PlaybackStatus::Idle,
            is_playing: false,
            is_buffering: false,
            volume,
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

    #[tokio::test]
    async fn saves_only_preference_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let (tx, rx) = watch::channel(state(0.8));
        let writer = spawn_writer(PreferenceStore::new(path.clone()), rx);

        // status churn alone is not persisted
        tx.send_modify(|s| s.status = PlaybackStatus::Playing);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!path.exists());

        tx.send_modify(|s| {
            s.volume = 0.3;
            s.is_muted = true;
            s.quality = select_quality(QualityTier::High);
        });
        drop(tx);
        writer.await.unwrap();

        let saved = PreferenceStore::new(path).load().unwrap();
        assert_eq!(
            saved,
            Preferences {
                volume: 0.3,
                muted: true,
                quality: QualityTier::High,
            }
        );
    }
}
