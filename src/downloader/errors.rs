// Error taxonomy for the downloader.
//
// Analysis and playlist errors surface directly to the UI. Download errors
// only surface after the coordinator's bounded retry/fallback. A missing
// muxing tool is never an error, only a capability reduction.

use thiserror::Error;

/// Probing a URL for streams failed.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("Not a supported video or playlist URL: {0}")]
    InvalidUrl(String),

    #[error("The extractor does not support this URL: {0}")]
    Unsupported(String),

    #[error("Could not reach the source: {0}")]
    Unreachable(String),

    #[error("No downloadable streams were found")]
    NoStreams,

    #[error("Failed to parse extractor output: {0}")]
    Parse(String),
}

impl AnalysisError {
    /// Map raw yt-dlp stderr onto the taxonomy.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("unsupported url") {
            return Self::Unsupported(first_error_line(stderr));
        }
        if lower.contains("is not a valid url") || lower.contains("invalid url") {
            return Self::InvalidUrl(first_error_line(stderr));
        }
        Self::Unreachable(first_error_line(stderr))
    }
}

/// Starting a job that was never validated against an analysis.
#[derive(Debug, Clone, Error)]
pub enum InvalidJobError {
    #[error("URL has not been analyzed yet: {0}")]
    NotAnalyzed(String),

    #[error("Quality tier '{0}' is not available for this source")]
    TierUnavailable(String),

    #[error("Another download is already running")]
    AlreadyRunning,

    #[error("A playlist range was given for a single-video source")]
    RangeOnVideo,
}

/// Transfer failed after the bounded retry/fallback.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    #[error("Network timeout: the source is not responding")]
    NetworkTimeout,

    #[error("Requested format is not available")]
    FormatUnavailable,

    #[error("Video unavailable: it may be private, deleted, or region-locked")]
    Unavailable,

    #[error("Tool not found: {0}")]
    ToolMissing(String),

    #[error("Download failed: {0}")]
    Transfer(String),

    #[error("Failed to launch the extractor: {0}")]
    Spawn(String),
}

impl DownloadError {
    /// Whether the coordinator should spend its bounded fallback retry on
    /// this failure. Unavailable sources and broken tooling never recover
    /// on a second attempt, so they surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout | Self::FormatUnavailable | Self::Transfer(_)
        )
    }

    /// Classify raw yt-dlp stderr, keeping only the first actionable line.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::NetworkTimeout;
        }
        if lower.contains("requested format is not available") {
            return Self::FormatUnavailable;
        }
        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("this video is not available")
        {
            return Self::Unavailable;
        }
        if lower.contains("no such file") || lower.contains("command not found") {
            return Self::ToolMissing(first_error_line(stderr));
        }
        Self::Transfer(first_error_line(stderr))
    }
}

/// Loading or classifying a playlist failed.
#[derive(Debug, Clone, Error)]
pub enum PlaylistError {
    #[error("The URL does not resolve to a playlist")]
    NotAPlaylist,

    #[error("Could not load the playlist: {0}")]
    Unreachable(String),

    #[error("Failed to parse playlist metadata: {0}")]
    Parse(String),
}

/// A 1-based inclusive selection over playlist entries was out of bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid selection {from}-{to} for a playlist of {len} entries")]
pub struct RangeError {
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:") || l.starts_with("error:"))
        .or_else(|| stderr.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("unknown error")
        .chars()
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unsupported_url() {
        let err = AnalysisError::classify("ERROR: Unsupported URL: https://example.com");
        assert!(matches!(err, AnalysisError::Unsupported(_)));
    }

    #[test]
    fn classifies_timeout_as_network() {
        let err = DownloadError::classify("ERROR: Connection timed out after 30s");
        assert!(matches!(err, DownloadError::NetworkTimeout));
    }

    #[test]
    fn classifies_missing_format() {
        let err = DownloadError::classify("ERROR: Requested format is not available");
        assert!(matches!(err, DownloadError::FormatUnavailable));
    }

    #[test]
    fn network_and_transfer_failures_are_retryable() {
        assert!(DownloadError::NetworkTimeout.is_retryable());
        assert!(DownloadError::FormatUnavailable.is_retryable());
        assert!(DownloadError::Transfer("ERROR: boom".into()).is_retryable());
        assert!(!DownloadError::Unavailable.is_retryable());
        assert!(!DownloadError::Spawn("no exec".into()).is_retryable());
        assert!(!DownloadError::ToolMissing("yt-dlp".into()).is_retryable());
    }

    #[test]
    fn keeps_first_error_line_only() {
        let err = DownloadError::classify("WARNING: noise\nERROR: boom\nmore noise");
        match err {
            DownloadError::Transfer(msg) => assert_eq!(msg, "ERROR: boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
