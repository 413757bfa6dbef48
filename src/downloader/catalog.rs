// Format catalog adapter.
//
// Turns a raw stream list into the fixed tier menu the UI shows. A tier is
// offered only when the probed streams can actually satisfy it, taking the
// muxing tool's presence into account.

use crate::downloader::backend::ExtractionBackend;
use crate::downloader::errors::{AnalysisError, PlaylistError};
use crate::downloader::models::{
    Analysis, MediaSource, QualityTier, RawFormat, TierOption,
};
use crate::downloader::utils::{format_size, is_valid_media_url, looks_like_playlist};
use std::sync::Arc;

/// Height tolerance when matching a stream against a tier's target.
const HEIGHT_TOLERANCE: f64 = 0.10;

fn height_bound(target: u32) -> u32 {
    (target as f64 * (1.0 + HEIGHT_TOLERANCE)).round() as u32
}

fn height_floor(target: u32) -> u32 {
    (target as f64 * (1.0 - HEIGHT_TOLERANCE)).round() as u32
}

/// A stream satisfies a height tier only inside the tolerance band around
/// the target; anything lower belongs to a lower tier.
fn in_band(height: Option<u32>, target: u32) -> bool {
    height
        .map(|h| h >= height_floor(target) && h <= height_bound(target))
        .unwrap_or(false)
}

fn tier_matches(tier: QualityTier, formats: &[RawFormat], mux_available: bool) -> bool {
    match tier {
        QualityTier::Best => {
            if mux_available {
                !formats.is_empty()
            } else {
                formats.iter().any(|f| f.is_combined())
            }
        }
        QualityTier::DataSaver => !formats.is_empty(),
        QualityTier::AudioOnly => formats.iter().any(|f| f.has_audio()),
        tier => {
            let target = match tier.target_height() {
                Some(h) => h,
                None => return false,
            };
            let fits = |f: &RawFormat| in_band(f.height, target);
            if mux_available {
                formats.iter().any(|f| f.has_video() && fits(f))
            } else {
                formats.iter().any(|f| f.is_combined() && fits(f))
            }
        }
    }
}

fn best_audio_size(formats: &[RawFormat]) -> Option<u64> {
    formats
        .iter()
        .filter(|f| f.is_audio_only())
        .filter_map(|f| f.effective_size())
        .max()
}

fn estimate_size(tier: QualityTier, formats: &[RawFormat], mux_available: bool) -> Option<u64> {
    match tier {
        QualityTier::AudioOnly => best_audio_size(formats).or_else(|| {
            formats
                .iter()
                .filter(|f| f.has_audio())
                .filter_map(|f| f.effective_size())
                .min()
        }),
        QualityTier::DataSaver => formats
            .iter()
            .filter(|f| f.has_video())
            .filter_map(|f| f.effective_size())
            .min(),
        tier => {
            let bound = tier.target_height().map(height_bound);
            let fits = |f: &&RawFormat| match bound {
                Some(b) => f.height.map(|h| h <= b).unwrap_or(false),
                None => true,
            };
            if mux_available {
                // Best video-only candidate plus the best audio stream,
                // mirroring what the merged output will weigh.
                let video = formats
                    .iter()
                    .filter(|f| f.has_video())
                    .filter(fits)
                    .max_by_key(|f| (f.height.unwrap_or(0), f.effective_size().unwrap_or(0)));
                let video = video?;
                let video_size = video.effective_size()?;
                if video.is_combined() {
                    Some(video_size)
                } else {
                    Some(video_size + best_audio_size(formats).unwrap_or(0))
                }
            } else {
                formats
                    .iter()
                    .filter(|f| f.is_combined())
                    .filter(fits)
                    .max_by_key(|f| f.height.unwrap_or(0))
                    .and_then(|f| f.effective_size())
            }
        }
    }
}

/// Walk the fixed tier table and keep the tiers this stream list satisfies.
pub fn offered_tiers(formats: &[RawFormat], mux_available: bool) -> Vec<TierOption> {
    QualityTier::ALL
        .iter()
        .copied()
        .filter(|t| tier_matches(*t, formats, mux_available))
        .map(|tier| {
            let size = estimate_size(tier, formats, mux_available);
            let label = match size {
                Some(bytes) => format!("{} (~{})", tier.label(), format_size(bytes)),
                None => tier.label().to_string(),
            };
            TierOption { tier, label, size }
        })
        .collect()
}

/// Playlists are probed flat, so their tier menu carries no sizes.
fn playlist_tiers(mux_available: bool) -> Vec<TierOption> {
    let tiers: &[QualityTier] = if mux_available {
        &QualityTier::ALL
    } else {
        &[QualityTier::Best, QualityTier::DataSaver, QualityTier::AudioOnly]
    };
    tiers
        .iter()
        .map(|tier| TierOption { tier: *tier, label: tier.label().to_string(), size: None })
        .collect()
}

/// Classify a URL and probe it once. Callers cache the result per session.
pub async fn analyze(
    backend: &Arc<dyn ExtractionBackend>,
    url: &str,
    mux_available: bool,
) -> Result<Analysis, AnalysisError> {
    let url = url.trim();
    if !is_valid_media_url(url) {
        return Err(AnalysisError::InvalidUrl(url.to_string()));
    }

    if looks_like_playlist(url) {
        let probe = backend.probe_playlist(url).await.map_err(|e| match e {
            PlaylistError::NotAPlaylist => AnalysisError::Unsupported(e.to_string()),
            PlaylistError::Parse(msg) => AnalysisError::Parse(msg),
            PlaylistError::Unreachable(msg) => AnalysisError::Unreachable(msg),
        })?;
        return Ok(Analysis {
            source: MediaSource::playlist(url),
            title: probe.title,
            uploader: None,
            duration_seconds: None,
            tiers: playlist_tiers(mux_available),
            entries: probe.entries,
        });
    }

    let probe = backend.probe_video(url).await?;
    let tiers = offered_tiers(&probe.formats, mux_available);
    if tiers.is_empty() {
        return Err(AnalysisError::NoStreams);
    }

    Ok(Analysis {
        source: MediaSource::video(url),
        title: probe.title,
        uploader: probe.uploader,
        duration_seconds: probe.duration_seconds,
        tiers,
        entries: Vec::new(),
    })
}
