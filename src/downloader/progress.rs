// Raw extractor output to normalized progress.
//
// The backend asks yt-dlp for machine-readable progress lines via
// `--progress-template`; everything else on stdout is matched against
// the handful of human-readable markers we still care about.

use crate::downloader::models::ProgressSnapshot;
use lazy_static::lazy_static;
use regex::Regex;

/// Template handed to `--progress-template`. Missing fields print "NA".
pub const PROGRESS_TEMPLATE: &str = "download:progress|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.fragment_index)s|%(progress.fragment_count)s|%(progress.speed)s";

lazy_static! {
    static ref DEST_RE: Regex =
        Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex =
        Regex::new(r#"\[Merger\]\s+Merging formats into\s+"(.+)""#).unwrap();
    static ref ALREADY_RE: Regex =
        Regex::new(r"\[download\]\s+(.+)\s+has already been downloaded").unwrap();
    static ref EXTRACT_AUDIO_RE: Regex =
        Regex::new(r"\[ExtractAudio\]\s+Destination:\s+(.+)").unwrap();
}

/// One event recovered from a single stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// A new item started writing to the given destination file.
    Started { destination: String },
    /// Byte-level progress during a transfer.
    Chunk {
        downloaded: u64,
        total: Option<u64>,
        speed_bps: Option<f64>,
    },
    /// Fragment counters for fragmented (HLS/DASH) transfers.
    Fragment {
        downloaded: u64,
        total: Option<u64>,
        fragment: u64,
        fragment_count: Option<u64>,
        speed_bps: Option<f64>,
    },
    /// Post-processing is combining the video and audio streams.
    Merging { destination: String },
    /// The file already exists on disk; treated as success for that item.
    AlreadyDownloaded { destination: String },
    /// One item's transfer finished.
    Finished,
    /// Informational line worth surfacing verbatim.
    Info(String),
}

fn parse_field_u64(field: &str) -> Option<u64> {
    // yt-dlp prints floats for byte counts in some builds
    field.parse::<f64>().ok().map(|v| v.max(0.0) as u64)
}

/// Parse one stdout line. Returns None for lines with no progress meaning.
pub fn parse_line(line: &str) -> Option<RawEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("download:progress|") {
        let fields: Vec<&str> = rest.split('|').collect();
        if fields.len() < 7 {
            return None;
        }
        let status = fields[0];
        let downloaded = parse_field_u64(fields[1]).unwrap_or(0);
        let total = parse_field_u64(fields[2]).or_else(|| parse_field_u64(fields[3]));
        let frag_index = parse_field_u64(fields[4]);
        let frag_count = parse_field_u64(fields[5]);
        let speed = fields[6].parse::<f64>().ok().filter(|s| *s > 0.0);

        return match status {
            "finished" => Some(RawEvent::Finished),
            "downloading" => {
                if let Some(frag) = frag_index {
                    Some(RawEvent::Fragment {
                        downloaded,
                        total,
                        fragment: frag,
                        fragment_count: frag_count,
                        speed_bps: speed,
                    })
                } else {
                    Some(RawEvent::Chunk { downloaded, total, speed_bps: speed })
                }
            }
            _ => None,
        };
    }

    if let Some(caps) = DEST_RE.captures(line) {
        return Some(RawEvent::Started { destination: caps[1].trim().to_string() });
    }
    if let Some(caps) = MERGE_RE.captures(line) {
        return Some(RawEvent::Merging { destination: caps[1].trim().to_string() });
    }
    if let Some(caps) = ALREADY_RE.captures(line) {
        return Some(RawEvent::AlreadyDownloaded { destination: caps[1].trim().to_string() });
    }
    if let Some(caps) = EXTRACT_AUDIO_RE.captures(line) {
        return Some(RawEvent::Info(format!("Extracting audio to {}", caps[1].trim())));
    }
    if line.starts_with("[download] Downloading item ") {
        return Some(RawEvent::Info(line.trim_start_matches("[download] ").to_string()));
    }

    None
}

const EWMA_ALPHA: f64 = 0.3;

/// Folds raw events into UI snapshots. Percent never moves backwards
/// within one item; speed is smoothed with an exponential average.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    last_percent: f64,
    ewma_bps: Option<f64>,
    current_item: Option<String>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn smooth(&mut self, speed: Option<f64>) -> Option<f64> {
        if let Some(s) = speed {
            let next = match self.ewma_bps {
                Some(prev) => prev + EWMA_ALPHA * (s - prev),
                None => s,
            };
            self.ewma_bps = Some(next);
        }
        self.ewma_bps
    }

    fn clamp_percent(&mut self, raw: f64) -> f64 {
        let p = raw.clamp(0.0, 100.0);
        if p > self.last_percent {
            self.last_percent = p;
        }
        self.last_percent
    }

    /// Turn one raw event into a snapshot, or None when there is nothing
    /// new to show.
    pub fn normalize(&mut self, event: &RawEvent) -> Option<ProgressSnapshot> {
        match event {
            RawEvent::Started { destination } => {
                // New item, progress starts over.
                self.last_percent = 0.0;
                self.ewma_bps = None;
                self.current_item = Some(destination.clone());
                Some(ProgressSnapshot::idle(format!("Downloading {}", destination)))
            }
            RawEvent::Chunk { downloaded, total, speed_bps } => {
                let speed = self.smooth(*speed_bps);
                match total {
                    Some(total) if *total > 0 => {
                        let percent =
                            self.clamp_percent(*downloaded as f64 / *total as f64 * 100.0);
                        let eta = speed.filter(|s| *s > 0.0).map(|s| {
                            ((total.saturating_sub(*downloaded)) as f64 / s).round() as u64
                        });
                        Some(ProgressSnapshot {
                            percent,
                            speed_bps: speed,
                            eta_seconds: eta,
                            fragment: None,
                            status: "downloading".into(),
                        })
                    }
                    _ => Some(ProgressSnapshot {
                        // Total unknown, hold the last known percent.
                        percent: self.last_percent,
                        speed_bps: speed,
                        eta_seconds: None,
                        fragment: None,
                        status: "downloading".into(),
                    }),
                }
            }
            RawEvent::Fragment { downloaded, total, fragment, fragment_count, speed_bps } => {
                let speed = self.smooth(*speed_bps);
                let percent = match (total, fragment_count) {
                    (Some(t), _) if *t > 0 => {
                        self.clamp_percent(*downloaded as f64 / *t as f64 * 100.0)
                    }
                    (_, Some(count)) if *count > 0 => {
                        self.clamp_percent(*fragment as f64 / *count as f64 * 100.0)
                    }
                    _ => self.last_percent,
                };
                let eta = match (total, speed) {
                    (Some(t), Some(s)) if *t > 0 && s > 0.0 => {
                        Some(((t.saturating_sub(*downloaded)) as f64 / s).round() as u64)
                    }
                    _ => None,
                };
                Some(ProgressSnapshot {
                    percent,
                    speed_bps: speed,
                    eta_seconds: eta,
                    fragment: Some((*fragment, fragment_count.unwrap_or(0))),
                    status: "downloading".into(),
                })
            }
            RawEvent::Merging { destination } => Some(ProgressSnapshot {
                percent: self.clamp_percent(100.0),
                speed_bps: None,
                eta_seconds: None,
                fragment: None,
                status: format!("Merging into {}", destination),
            }),
            RawEvent::AlreadyDownloaded { destination } => Some(ProgressSnapshot {
                percent: self.clamp_percent(100.0),
                speed_bps: None,
                eta_seconds: None,
                fragment: None,
                status: format!("{} already downloaded", destination),
            }),
            RawEvent::Finished => Some(ProgressSnapshot {
                percent: self.clamp_percent(100.0),
                speed_bps: self.ewma_bps,
                eta_seconds: Some(0),
                fragment: None,
                status: "finished".into(),
            }),
            RawEvent::Info(msg) => Some(ProgressSnapshot {
                percent: self.last_percent,
                speed_bps: self.ewma_bps,
                eta_seconds: None,
                fragment: None,
                status: msg.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_template_chunk_line() {
        let line = "download:progress|downloading|512000|1024000|NA|NA|NA|256000.5";
        match parse_line(line) {
            Some(RawEvent::Chunk { downloaded, total, speed_bps }) => {
                assert_eq!(downloaded, 512000);
                assert_eq!(total, Some(1024000));
                assert!(speed_bps.unwrap() > 256000.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn estimate_fills_in_for_missing_total() {
        let line = "download:progress|downloading|10|NA|200|NA|NA|NA";
        match parse_line(line) {
            Some(RawEvent::Chunk { total, .. }) => assert_eq!(total, Some(200)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fragment_counters_are_recovered() {
        let line = "download:progress|downloading|1000|NA|NA|3|12|50000";
        match parse_line(line) {
            Some(RawEvent::Fragment { fragment, fragment_count, .. }) => {
                assert_eq!(fragment, 3);
                assert_eq!(fragment_count, Some(12));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_destination_and_merge_lines() {
        assert_eq!(
            parse_line("[download] Destination: /tmp/video.f137.mp4"),
            Some(RawEvent::Started { destination: "/tmp/video.f137.mp4".into() })
        );
        assert_eq!(
            parse_line(r#"[Merger] Merging formats into "/tmp/video.mp4""#),
            Some(RawEvent::Merging { destination: "/tmp/video.mp4".into() })
        );
        assert_eq!(
            parse_line("[download] /tmp/video.mp4 has already been downloaded"),
            Some(RawEvent::AlreadyDownloaded { destination: "/tmp/video.mp4".into() })
        );
    }

    #[test]
    fn ignores_noise_lines() {
        assert_eq!(parse_line("[youtube] abc123: Downloading webpage"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn percent_never_goes_backwards() {
        let mut agg = ProgressAggregator::new();
        let a = agg
            .normalize(&RawEvent::Chunk { downloaded: 80, total: Some(100), speed_bps: None })
            .unwrap();
        assert!((a.percent - 80.0).abs() < 1e-9);
        // A later event with a smaller ratio must not regress the bar.
        let b = agg
            .normalize(&RawEvent::Chunk { downloaded: 40, total: Some(100), speed_bps: None })
            .unwrap();
        assert!((b.percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn new_item_resets_percent() {
        let mut agg = ProgressAggregator::new();
        agg.normalize(&RawEvent::Chunk { downloaded: 90, total: Some(100), speed_bps: None });
        let snap = agg
            .normalize(&RawEvent::Started { destination: "next.mp4".into() })
            .unwrap();
        assert_eq!(snap.percent, 0.0);
    }

    #[test]
    fn unknown_total_means_no_eta() {
        let mut agg = ProgressAggregator::new();
        let snap = agg
            .normalize(&RawEvent::Chunk { downloaded: 500, total: None, speed_bps: Some(1000.0) })
            .unwrap();
        assert_eq!(snap.eta_seconds, None);
        assert!(snap.speed_bps.is_some());
    }

    #[test]
    fn speed_is_smoothed() {
        let mut agg = ProgressAggregator::new();
        agg.normalize(&RawEvent::Chunk { downloaded: 1, total: Some(100), speed_bps: Some(1000.0) });
        let snap = agg
            .normalize(&RawEvent::Chunk {
                downloaded: 2,
                total: Some(100),
                speed_bps: Some(2000.0),
            })
            .unwrap();
        let s = snap.speed_bps.unwrap();
        assert!(s > 1000.0 && s < 2000.0);
    }

    #[test]
    fn late_total_never_regresses_fragment_percent() {
        let mut agg = ProgressAggregator::new();
        // No totals at all yet, counter-driven percent.
        agg.normalize(&RawEvent::Fragment {
            downloaded: 1000,
            total: None,
            fragment: 6,
            fragment_count: Some(10),
            speed_bps: None,
        });
        // Byte total appears and implies a smaller ratio.
        let snap = agg
            .normalize(&RawEvent::Fragment {
                downloaded: 1200,
                total: Some(10_000),
                fragment: 7,
                fragment_count: Some(10),
                speed_bps: None,
            })
            .unwrap();
        assert!(snap.percent >= 60.0);
    }

    #[test]
    fn fragments_fall_back_to_fragment_ratio() {
        let mut agg = ProgressAggregator::new();
        let snap = agg
            .normalize(&RawEvent::Fragment {
                downloaded: 1000,
                total: None,
                fragment: 5,
                fragment_count: Some(10),
                speed_bps: None,
            })
            .unwrap();
        assert!((snap.percent - 50.0).abs() < 1e-9);
        assert_eq!(snap.fragment, Some((5, 10)));
    }
}
