use crate::config::StreamsConfig;
use crate::protocol::{QualityTier, SourceRole, StreamSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Listener preferences that survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub quality: QualityTier,
}

pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read saved preferences.  A missing or unreadable file yields `None`
    /// and the caller falls back to config defaults.
    pub fn load(&self) -> Option<Preferences> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Preferences>(&content) {
            Ok(mut prefs) => {
                prefs.volume = prefs.volume.clamp(0.0, 1.0);
                Some(prefs)
            }
            Err(e) => {
                warn!("Ignoring malformed preferences {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub async fn save(&self, prefs: &Preferences) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        tokio::fs::write(&self.path, json).await?;
        debug!("Saved preferences to {:?}", self.path);
        Ok(())
    }
}

// ── source list ───────────────────────────────────────────────────────────────

/// Extract stream URLs from an m3u playlist, skipping comments and
/// `#EXTINF` headers.
pub fn parse_m3u_from_str(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_fallback_playlist(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_m3u_from_str(&content))
}

/// Build the ordered source list: primary first, then configured fallbacks,
/// then playlist entries.  Duplicates of earlier entries are dropped so the
/// rotation never retries the same URL twice in one cycle.
pub fn stream_sources(streams: &StreamsConfig) -> anyhow::Result<Vec<StreamSource>> {
    let mut urls = streams.fallbacks.clone();
    if let Some(playlist) = &streams.fallback_playlist {
        urls.extend(load_fallback_playlist(playlist)?);
    }

    let mut sources = vec![StreamSource {
        url: streams.primary.clone(),
        role: SourceRole::Primary,
    }];
    for url in urls {
        if sources.iter().any(|s| s.url == url) {
            debug!("Skipping duplicate stream source {}", url);
            continue;
        }
        let role = SourceRole::Fallback(sources.len() - 1);
        sources.push(StreamSource { url, role });
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn m3u_skips_headers_and_blank_lines() {
        let urls = parse_m3u_from_str(
            "#EXTM3U\n#EXTINF:-1,Mirror A\nhttps://a.test/live\n\n#EXTINF:-1,Mirror B\nhttps://b.test/live\n",
        );
        assert_eq!(urls, vec!["https://a.test/live", "https://b.test/live"]);
    }

    #[test]
    fn sources_are_ordered_and_deduplicated() {
        let streams = StreamsConfig {
            primary: "https://p.test".to_string(),
            fallbacks: vec![
                "https://f1.test".to_string(),
                "https://p.test".to_string(),
                "https://f2.test".to_string(),
            ],
            fallback_playlist: None,
        };
        let sources = stream_sources(&streams).unwrap();
        let roles: Vec<_> = sources.iter().map(|s| s.role).collect();
        assert_eq!(
            roles,
            vec![
                SourceRole::Primary,
                SourceRole::Fallback(0),
                SourceRole::Fallback(1)
            ]
        );
        assert_eq!(sources[2].url, "https://f2.test");
    }

    #[test]
    fn playlist_entries_extend_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("mirrors.m3u");
        std::fs::write(&playlist, "#EXTM3U\nhttps://f3.test\n").unwrap();
        let streams = StreamsConfig {
            primary: "https://p.test".to_string(),
            fallbacks: vec!["https://f1.test".to_string()],
            fallback_playlist: Some(playlist),
        };
        let sources = stream_sources(&streams).unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[2].role, SourceRole::Fallback(1));
    }

    #[tokio::test]
    async fn preferences_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("nested").join("prefs.json"));
        assert!(store.load().is_none());

        let prefs = Preferences {
            volume: 0.3,
            muted: true,
            quality: QualityTier::High,
        };
        store.save(&prefs).await.unwrap();
        assert_eq!(store.load(), Some(prefs));
    }

    #[test]
    fn malformed_preferences_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PreferenceStore::new(path).load().is_none());
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, r#"{"volume": 4.0}"#).unwrap();
        let prefs = PreferenceStore::new(path).load().unwrap();
        assert_eq!(prefs.volume, 1.0);
        assert!(!prefs.muted);
        assert_eq!(prefs.quality, QualityTier::Medium);
    }
}
