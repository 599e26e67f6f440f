use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Playback status as seen by the presentation layer.
///
/// Derived from session events, plus the watchdog and retry timers that act
/// when the expected event never arrives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing requested, or a connection attempt timed out
    Buffering, // session opening, stalled, or waiting on a retry
    Playing,   // audio flowing
    Paused,    // explicitly paused
    Error,     // retries exhausted on the current source
}

// ── quality ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality tier '{0}' (expected low, medium or high)")]
pub struct UnknownQualityTier(pub String);

impl FromStr for QualityTier {
    type Err = UnknownQualityTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            _ => Err(UnknownQualityTier(s.to_string())),
        }
    }
}

/// Bitrate/format pair handed to the playback engine as session hints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualitySetting {
    pub tier: QualityTier,
    pub bitrate_kbps: u32,
    pub format: String,
}

// ── sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum SourceRole {
    Primary,
    /// Zero-based position in the fallback list.
    Fallback(usize),
    /// URL set explicitly through `switch_to_stream`, outside the rotation.
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSource {
    pub url: String,
    pub role: SourceRole,
}

// ── metadata ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Playing,
    Paused,
}

/// Now-playing information, push-updated from session events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub connection: ConnectionState,
}

// ── notifications ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QualityChanged,
    RetryScheduled,
    RetryExhausted,
    SwitchingToFallback,
    RestoringPrimary,
    ManualRetry,
    StreamSwitched,
    ConnectionTimeout,
}

/// Transient user-facing message (toast).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

// ── state snapshot ────────────────────────────────────────────────────────────

/// Reactive status object consumed by the UI.  `rev` increases on every
/// published change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub rev: u64,
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub volume: f32,
    pub is_muted: bool,
    pub current_url: String,
    pub source_role: SourceRole,
    /// `None` while on the primary source.
    pub fallback_index: Option<usize>,
    pub quality: QualitySetting,
    pub metadata: StreamMetadata,
    /// Set for a short window after an explicit source switch; UIs should
    /// hold back error displays while it is true.
    pub is_initializing: bool,
    pub consecutive_failures: u32,
}

// ── broadcasts ────────────────────────────────────────────────────────────────

/// Push messages fanned out to every connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    State { data: PlayerState },
    Notification { data: Notification },
    Log { message: String },
}

// ── commands ──────────────────────────────────────────────────────────────────

/// Control requests accepted by the stream controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Pause,
    TogglePlayback,
    SetVolume { value: f32 },
    ToggleMute,
    ChangeQuality { tier: QualityTier },
    SwitchToStream { url: String },
    RetryStreams,
}
