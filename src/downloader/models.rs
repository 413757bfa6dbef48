use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether a URL resolves to a single video or a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Video,
    Playlist,
}

/// A classified media URL. Classification happens once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    pub kind: SourceKind,
}

impl MediaSource {
    pub fn video(url: impl Into<String>) -> Self {
        Self { url: url.into(), kind: SourceKind::Video }
    }

    pub fn playlist(url: impl Into<String>) -> Self {
        Self { url: url.into(), kind: SourceKind::Playlist }
    }
}

/// The fixed set of quality tiers the UI offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Best,
    P1080,
    P720,
    P480,
    P360,
    P240,
    DataSaver,
    AudioOnly,
}

impl QualityTier {
    pub const ALL: [QualityTier; 8] = [
        QualityTier::Best,
        QualityTier::P1080,
        QualityTier::P720,
        QualityTier::P480,
        QualityTier::P360,
        QualityTier::P240,
        QualityTier::DataSaver,
        QualityTier::AudioOnly,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            QualityTier::Best => "Best available",
            QualityTier::P1080 => "1080p",
            QualityTier::P720 => "720p",
            QualityTier::P480 => "480p",
            QualityTier::P360 => "360p",
            QualityTier::P240 => "240p",
            QualityTier::DataSaver => "Data saver",
            QualityTier::AudioOnly => "Audio only (mp3)",
        }
    }

    /// Nominal height this tier targets, if it is height-bound.
    pub fn target_height(&self) -> Option<u32> {
        match self {
            QualityTier::P1080 => Some(1080),
            QualityTier::P720 => Some(720),
            QualityTier::P480 => Some(480),
            QualityTier::P360 => Some(360),
            QualityTier::P240 => Some(240),
            _ => None,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, QualityTier::AudioOnly)
    }

    /// Format selector handed to the extractor. Without a muxing tool the
    /// selectors never ask for two streams to be merged.
    pub fn format_spec(&self, mux_available: bool) -> String {
        match (self, mux_available) {
            (QualityTier::Best, true) => "bestvideo+bestaudio/best".into(),
            (QualityTier::Best, false) => "best/bestaudio".into(),
            (QualityTier::DataSaver, true) => "worstvideo[height>=144]+bestaudio/worst".into(),
            (QualityTier::DataSaver, false) => "worst/bestaudio".into(),
            (QualityTier::AudioOnly, _) => "bestaudio/best".into(),
            (tier, true) => {
                let h = tier.target_height().unwrap_or(0);
                format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]/best")
            }
            (tier, false) => {
                let h = tier.target_height().unwrap_or(0);
                format!("best[height<={h}]/bestaudio")
            }
        }
    }
}

/// One raw stream as reported by the extractor's JSON probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub tbr: Option<f64>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        match self.vcodec.as_deref() {
            None | Some("none") => false,
            Some(_) => true,
        }
    }

    pub fn has_audio(&self) -> bool {
        match self.acodec.as_deref() {
            None | Some("none") => false,
            Some(_) => true,
        }
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    /// A progressive stream carrying both video and audio.
    pub fn is_combined(&self) -> bool {
        self.has_video() && self.has_audio()
    }

    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// One entry in a playlist, ordered as the source orders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// 1-based position within the playlist.
    pub index: usize,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
}

/// A quality tier the analyzed source can actually satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierOption {
    pub tier: QualityTier,
    pub label: String,
    /// Estimated download size in bytes, when the probe reports one.
    pub size: Option<u64>,
}

/// Result of analyzing a URL, cached for the rest of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub source: MediaSource,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    pub tiers: Vec<TierOption>,
    /// Present only for playlist sources.
    #[serde(default)]
    pub entries: Vec<PlaylistEntry>,
}

/// A validated request to download one source at one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub source: MediaSource,
    pub tier: QualityTier,
    /// 1-based inclusive playlist range, video sources never carry one.
    #[serde(default)]
    pub range: Option<(usize, usize)>,
    /// Explicit 1-based playlist indices, used by the browser selection.
    #[serde(default)]
    pub items: Option<Vec<usize>>,
    #[serde(default)]
    pub subtitles: bool,
    pub output_dir: PathBuf,
}

/// Lifecycle of a job. Stopped and Failed are both terminal, but only
/// Failed surfaces an error to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed { message: String },
}

/// Normalized progress handed to the UI, one per raw extractor event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 0.0 to 100.0, monotonically non-decreasing within one item.
    pub percent: f64,
    /// Smoothed transfer rate in bytes per second.
    pub speed_bps: Option<f64>,
    /// Seconds remaining, absent while the total size is unknown.
    pub eta_seconds: Option<u64>,
    /// (current, total) fragment counters when the transfer is fragmented.
    #[serde(default)]
    pub fragment: Option<(u64, u64)>,
    pub status: String,
}

impl ProgressSnapshot {
    pub fn idle(status: impl Into<String>) -> Self {
        Self {
            percent: 0.0,
            speed_bps: None,
            eta_seconds: None,
            fragment: None,
            status: status.into(),
        }
    }
}
