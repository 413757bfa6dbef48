// Extraction backend seam.
//
// Everything that talks to yt-dlp lives behind `ExtractionBackend`, so the
// coordinator and the tests never spawn a real process unless they want to.

use crate::downloader::errors::{AnalysisError, DownloadError, PlaylistError};
use crate::downloader::models::{PlaylistEntry, RawFormat};
use crate::downloader::progress::{parse_line, RawEvent, PROGRESS_TEMPLATE};
use crate::downloader::utils::run_output_with_timeout;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc::UnboundedSender;

const PROBE_TIMEOUT_SECS: u64 = 60;

/// Metadata and stream list for a single video.
#[derive(Debug, Clone)]
pub struct VideoProbe {
    pub title: String,
    pub uploader: Option<String>,
    pub duration_seconds: Option<f64>,
    pub formats: Vec<RawFormat>,
}

/// Flat metadata for a playlist, entries in source order.
#[derive(Debug, Clone)]
pub struct PlaylistProbe {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

/// One transfer request, already reduced to extractor terms.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub format_spec: String,
    pub output_dir: PathBuf,
    /// yt-dlp `--playlist-items` expression, e.g. "2-5" or "1,3,7".
    pub playlist_items: Option<String>,
    pub subtitles: bool,
    /// Extract audio and transcode to mp3 after download.
    pub extract_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed,
    Cancelled,
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn probe_video(&self, url: &str) -> Result<VideoProbe, AnalysisError>;

    async fn probe_playlist(&self, url: &str) -> Result<PlaylistProbe, PlaylistError>;

    /// Run one transfer, streaming raw events out as they happen. The
    /// cancel flag is honored between output lines.
    async fn download(
        &self,
        request: &DownloadRequest,
        cancel: Arc<AtomicBool>,
        events: UnboundedSender<RawEvent>,
    ) -> Result<DownloadOutcome, DownloadError>;
}

#[derive(Debug, Deserialize)]
struct ProbeJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct FlatEntryJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylistJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<FlatEntryJson>,
}

/// The real backend, shelling out to yt-dlp.
pub struct YtDlpBackend {
    program: String,
    ffmpeg_path: Option<String>,
}

impl YtDlpBackend {
    pub fn new(program: String, ffmpeg_path: Option<String>) -> Self {
        Self { program, ffmpeg_path }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["--no-warnings".to_string(), "--no-color".to_string()];
        if let Some(ffmpeg) = &self.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        args
    }
}

#[async_trait]
impl ExtractionBackend for YtDlpBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn probe_video(&self, url: &str) -> Result<VideoProbe, AnalysisError> {
        let mut args = self.base_args();
        args.extend([
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            url.to_string(),
        ]);

        let output = run_output_with_timeout(&self.program, args, PROBE_TIMEOUT_SECS)
            .await
            .map_err(AnalysisError::Unreachable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::classify(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe: ProbeJson = serde_json::from_str(stdout.trim())
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;

        if probe.formats.is_empty() {
            return Err(AnalysisError::NoStreams);
        }

        Ok(VideoProbe {
            title: probe.title.unwrap_or_else(|| "Untitled".to_string()),
            uploader: probe.uploader.or(probe.channel),
            duration_seconds: probe.duration,
            formats: probe.formats,
        })
    }

    async fn probe_playlist(&self, url: &str) -> Result<PlaylistProbe, PlaylistError> {
        let mut args = self.base_args();
        args.extend([
            "--flat-playlist".to_string(),
            "-J".to_string(),
            url.to_string(),
        ]);

        let output = run_output_with_timeout(&self.program, args, PROBE_TIMEOUT_SECS * 2)
            .await
            .map_err(PlaylistError::Unreachable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlaylistError::Unreachable(
                stderr.lines().next().unwrap_or("unknown error").to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe: FlatPlaylistJson = serde_json::from_str(stdout.trim())
            .map_err(|e| PlaylistError::Parse(e.to_string()))?;

        if probe.kind.as_deref() != Some("playlist") {
            return Err(PlaylistError::NotAPlaylist);
        }

        let entries = probe
            .entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                let url = e.url.or_else(|| {
                    e.id.as_ref()
                        .map(|id| format!("https://www.youtube.com/watch?v={}", id))
                });
                PlaylistEntry {
                    index: i + 1,
                    title: e.title.unwrap_or_else(|| "Untitled".to_string()),
                    url: url.unwrap_or_default(),
                    duration_seconds: e.duration,
                    uploader: e.uploader.or(e.channel),
                }
            })
            .collect();

        Ok(PlaylistProbe {
            title: probe.title.unwrap_or_else(|| "Playlist".to_string()),
            entries,
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        cancel: Arc<AtomicBool>,
        events: UnboundedSender<RawEvent>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut args = self.base_args();
        args.extend([
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-f".to_string(),
            request.format_spec.clone(),
            "-P".to_string(),
            request.output_dir.to_string_lossy().to_string(),
            "-o".to_string(),
            "%(title)s.%(ext)s".to_string(),
        ]);

        if request.extract_audio {
            args.extend(["-x".to_string(), "--audio-format".to_string(), "mp3".to_string()]);
        }
        if request.subtitles {
            args.extend([
                "--write-subs".to_string(),
                "--write-auto-subs".to_string(),
                "--sub-langs".to_string(),
                "en.*,ru.*".to_string(),
            ]);
        }
        if let Some(items) = &request.playlist_items {
            args.extend(["--playlist-items".to_string(), items.clone()]);
        } else {
            args.push("--no-playlist".to_string());
        }
        args.push(request.url.clone());

        log::info!("spawning {} {:?}", self.program, args);

        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DownloadError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Spawn("failed to capture stdout".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Spawn("failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut tick = tokio::time::interval(tokio::time::Duration::from_millis(200));

        loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = child.kill().await;
                stderr_task.abort();
                return Ok(DownloadOutcome::Cancelled);
            }
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if let Some(event) = parse_line(&text) {
                                // receiver gone means the job was torn down
                                if events.send(event).is_err() {
                                    let _ = child.kill().await;
                                    stderr_task.abort();
                                    return Ok(DownloadOutcome::Cancelled);
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = child.kill().await;
                            stderr_task.abort();
                            return Err(DownloadError::Transfer(e.to_string()));
                        }
                    }
                }
                _ = tick.tick() => {}
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::Transfer(e.to_string()))?;

        if cancel.load(Ordering::SeqCst) {
            return Ok(DownloadOutcome::Cancelled);
        }

        if status.success() {
            Ok(DownloadOutcome::Completed)
        } else {
            let stderr = stderr_task.await.unwrap_or_default();
            Err(DownloadError::classify(&stderr))
        }
    }
}
