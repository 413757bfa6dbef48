pub mod config;
pub mod downloader;

use crate::config::AppConfig;
use crate::downloader::backend::{ExtractionBackend, YtDlpBackend};
use crate::downloader::catalog;
use crate::downloader::errors::{InvalidJobError, PlaylistError};
use crate::downloader::coordinator::{DownloadCoordinator, JobSlot, ProgressSink};
use crate::downloader::models::{
    Analysis, DownloadJob, JobState, PlaylistEntry, ProgressSnapshot, QualityTier, SourceKind,
};
use crate::downloader::playlist::{filter_entries, select_entries, select_range};
use crate::downloader::tools::{ToolInfo, ToolLocator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tauri::{AppHandle, Emitter, State};

#[derive(Default)]
struct Session {
    analyses: HashMap<String, Analysis>,
}

struct AppState {
    config: Mutex<AppConfig>,
    session: Mutex<Session>,
    jobs: JobSlot,
}

impl AppState {
    fn new() -> Self {
        Self {
            config: Mutex::new(AppConfig::load()),
            session: Mutex::new(Session::default()),
            jobs: JobSlot::default(),
        }
    }
}

impl ProgressSink for AppHandle {
    fn emit_progress(&self, snapshot: &ProgressSnapshot) {
        let _ = self.emit("download-progress", snapshot);
    }
    fn emit_state(&self, state: &JobState) {
        let _ = self.emit("download-state", state);
    }
    fn emit_info(&self, message: &str) {
        let _ = self.emit("download-info", message);
    }
}

fn locator_for(config: &AppConfig) -> ToolLocator {
    ToolLocator::with_ffmpeg_override(config.ffmpeg_path.clone())
}

fn build_backend(config: &AppConfig) -> Result<(Arc<dyn ExtractionBackend>, bool), String> {
    let locator = locator_for(config);
    let ytdlp = locator
        .ytdlp_path()
        .ok_or_else(|| "yt-dlp not found. Install it and try again.".to_string())?;
    let mux_available = locator.mux_available();
    let ffmpeg = locator.ffmpeg_path();
    Ok((Arc::new(YtDlpBackend::new(ytdlp, ffmpeg)), mux_available))
}

#[tauri::command]
async fn analyze_url(url: String, state: State<'_, AppState>) -> Result<Analysis, String> {
    let url = url.trim().to_string();

    if let Ok(session) = state.session.lock() {
        if let Some(cached) = session.analyses.get(&url) {
            return Ok(cached.clone());
        }
    }

    let (backend, mux_available) = {
        let config = state.config.lock().map_err(|_| "state lock poisoned")?;
        build_backend(&config)?
    };

    log::info!("analyzing {url}");
    let analysis = catalog::analyze(&backend, &url, mux_available)
        .await
        .map_err(|e| e.to_string())?;

    if let Ok(mut session) = state.session.lock() {
        session.analyses.insert(url, analysis.clone());
    }
    Ok(analysis)
}

#[tauri::command]
fn filter_playlist(
    url: String,
    query: String,
    state: State<'_, AppState>,
) -> Result<Vec<PlaylistEntry>, String> {
    let session = state.session.lock().map_err(|_| "state lock poisoned")?;
    let analysis = session
        .analyses
        .get(url.trim())
        .ok_or_else(|| InvalidJobError::NotAnalyzed(url.clone()).to_string())?;
    if analysis.source.kind != SourceKind::Playlist {
        return Err(PlaylistError::NotAPlaylist.to_string());
    }
    Ok(filter_entries(&analysis.entries, &query)
        .into_iter()
        .cloned()
        .collect())
}

#[tauri::command]
fn select_playlist_range(
    url: String,
    from: usize,
    to: usize,
    state: State<'_, AppState>,
) -> Result<Vec<PlaylistEntry>, String> {
    let session = state.session.lock().map_err(|_| "state lock poisoned")?;
    let analysis = session
        .analyses
        .get(url.trim())
        .ok_or_else(|| InvalidJobError::NotAnalyzed(url.clone()).to_string())?;
    select_entries(&analysis.entries, from, to)
        .map(|slice| slice.to_vec())
        .map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
struct StartedJob {
    id: u64,
}

#[tauri::command]
async fn start_download(
    app: AppHandle,
    url: String,
    tier: QualityTier,
    range: Option<(usize, usize)>,
    items: Option<Vec<usize>>,
    state: State<'_, AppState>,
) -> Result<StartedJob, String> {
    let url = url.trim().to_string();

    let (config, analysis) = {
        let config = state.config.lock().map_err(|_| "state lock poisoned")?.clone();
        let session = state.session.lock().map_err(|_| "state lock poisoned")?;
        let analysis = session
            .analyses
            .get(&url)
            .cloned()
            .ok_or_else(|| InvalidJobError::NotAnalyzed(url.clone()).to_string())?;
        (config, analysis)
    };

    if !analysis.tiers.iter().any(|t| t.tier == tier) {
        return Err(InvalidJobError::TierUnavailable(tier.label().to_string()).to_string());
    }
    if analysis.source.kind == SourceKind::Video && (range.is_some() || items.is_some()) {
        return Err(InvalidJobError::RangeOnVideo.to_string());
    }
    if let Some((from, to)) = range {
        select_range(analysis.entries.len(), from, to).map_err(|e| e.to_string())?;
    }

    let (backend, mux_available) = build_backend(&config)?;
    let coordinator = DownloadCoordinator::new(backend, config.retry_attempts);

    let job = DownloadJob {
        source: analysis.source.clone(),
        tier,
        range,
        items,
        subtitles: config.subtitles,
        output_dir: config.effective_output_dir(),
    };

    log::info!("starting download of {} at {:?}", job.source.url, tier);
    let sink = Arc::new(app);
    let id = state
        .jobs
        .install(|| coordinator.start(job, mux_available, sink))
        .map_err(|e| e.to_string())?;

    {
        let mut config = state.config.lock().map_err(|_| "state lock poisoned")?;
        if config.last_tier != Some(tier) {
            config.last_tier = Some(tier);
            if let Err(e) = config.save() {
                log::warn!("could not persist settings: {e}");
            }
        }
    }

    Ok(StartedJob { id })
}

#[tauri::command]
fn stop_download(state: State<'_, AppState>) -> Result<(), String> {
    if state.jobs.stop_active() {
        log::info!("stop requested for active job");
        Ok(())
    } else {
        Err("No download is running".to_string())
    }
}

#[tauri::command]
fn job_state(state: State<'_, AppState>) -> Result<Option<JobState>, String> {
    Ok(state.jobs.state())
}

#[tauri::command]
fn get_tools_status(state: State<'_, AppState>) -> Result<Vec<ToolInfo>, String> {
    let config = state.config.lock().map_err(|_| "state lock poisoned")?;
    Ok(locator_for(&config).get_all_tools())
}

#[tauri::command]
fn get_settings(state: State<'_, AppState>) -> Result<AppConfig, String> {
    let config = state.config.lock().map_err(|_| "state lock poisoned")?;
    Ok(config.clone())
}

#[tauri::command]
fn update_settings(new_config: AppConfig, state: State<'_, AppState>) -> Result<(), String> {
    new_config.save()?;
    let mut config = state.config.lock().map_err(|_| "state lock poisoned")?;
    *config = new_config;
    Ok(())
}

/// Fresh start: forget cached analyses and stop any running job.
#[tauri::command]
fn reset_session(state: State<'_, AppState>) -> Result<(), String> {
    state.jobs.shutdown();
    let mut session = state.session.lock().map_err(|_| "state lock poisoned")?;
    session.analyses.clear();
    Ok(())
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .manage(AppState::new())
        .invoke_handler(tauri::generate_handler![
            analyze_url,
            filter_playlist,
            select_playlist_range,
            start_download,
            stop_download,
            job_state,
            get_tools_status,
            get_settings,
            update_settings,
            reset_session,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
