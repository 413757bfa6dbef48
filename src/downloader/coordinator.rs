// Download coordinator.
//
// Owns the lifecycle of one job: Pending -> Running -> Completed, Stopped
// or Failed. Stopping is cooperative, surfaces neither a completion nor an
// error, and cleans up partial files the extractor left behind.

use crate::downloader::backend::{
    DownloadOutcome, DownloadRequest, ExtractionBackend,
};
use crate::downloader::errors::{DownloadError, InvalidJobError};
use crate::downloader::models::{
    DownloadJob, JobState, ProgressSnapshot, QualityTier,
};
use crate::downloader::playlist::items_expression;
use crate::downloader::progress::{ProgressAggregator, RawEvent};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Where job output goes. The Tauri shell forwards these as window events;
/// tests collect them in memory.
pub trait ProgressSink: Send + Sync {
    fn emit_progress(&self, snapshot: &ProgressSnapshot);
    fn emit_state(&self, state: &JobState);
    fn emit_info(&self, message: &str);
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// A running job. Dropping the handle does not stop the job.
pub struct JobHandle {
    pub id: u64,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<JobState>>,
    task: tokio::task::JoinHandle<()>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(JobState::Failed { message: "state lock poisoned".to_string() })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), JobState::Pending | JobState::Running)
    }

    /// Request a cooperative stop. Returns immediately; the worker notices
    /// between output lines and kills the child.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker to finish, whatever the outcome.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Holds at most one job for the session. The active check and the handle
/// installation happen under one lock, so two concurrent starts cannot both
/// get through.
#[derive(Default)]
pub struct JobSlot {
    inner: Mutex<Option<JobHandle>>,
}

impl JobSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JobHandle>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim the slot and start the job in one critical section. `make` is
    /// only invoked when the slot is free.
    pub fn install<F>(&self, make: F) -> Result<u64, InvalidJobError>
    where
        F: FnOnce() -> JobHandle,
    {
        let mut slot = self.lock();
        if slot.as_ref().map(|h| h.is_active()).unwrap_or(false) {
            return Err(InvalidJobError::AlreadyRunning);
        }
        let handle = make();
        let id = handle.id;
        *slot = Some(handle);
        Ok(id)
    }

    /// Stop the active job, if any. Returns whether a stop was issued.
    pub fn stop_active(&self) -> bool {
        let slot = self.lock();
        match slot.as_ref() {
            Some(handle) if handle.is_active() => {
                handle.stop();
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> Option<JobState> {
        self.lock().as_ref().map(|h| h.state())
    }

    /// Stop and forget whatever the slot holds.
    pub fn shutdown(&self) {
        let mut slot = self.lock();
        if let Some(handle) = slot.take() {
            if handle.is_active() {
                handle.stop();
            }
        }
    }
}

pub struct DownloadCoordinator {
    backend: Arc<dyn ExtractionBackend>,
    retry_attempts: u32,
}

impl DownloadCoordinator {
    pub fn new(backend: Arc<dyn ExtractionBackend>, retry_attempts: u32) -> Self {
        Self { backend, retry_attempts }
    }

    /// Spawn the worker for a validated job.
    pub fn start(
        &self,
        job: DownloadJob,
        mux_available: bool,
        sink: Arc<dyn ProgressSink>,
    ) -> JobHandle {
        let id = NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(JobState::Pending));

        let backend = Arc::clone(&self.backend);
        let retry_attempts = self.retry_attempts;
        let cancel_worker = Arc::clone(&cancel);
        let state_worker = Arc::clone(&state);

        let task = tokio::spawn(async move {
            run_job(
                backend,
                job,
                mux_available,
                retry_attempts,
                cancel_worker,
                state_worker,
                sink,
            )
            .await;
        });

        JobHandle { id, cancel, state, task }
    }
}

fn set_state(state: &Arc<Mutex<JobState>>, sink: &Arc<dyn ProgressSink>, next: JobState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next.clone();
    }
    sink.emit_state(&next);
}

fn build_request(job: &DownloadJob, format_spec: String) -> DownloadRequest {
    let playlist_items = match (&job.items, job.range) {
        (Some(items), _) if !items.is_empty() => Some(items_expression(items)),
        (_, Some((from, to))) => Some(format!("{from}-{to}")),
        _ => None,
    };
    DownloadRequest {
        url: job.source.url.clone(),
        format_spec,
        output_dir: job.output_dir.clone(),
        playlist_items,
        subtitles: job.subtitles,
        extract_audio: job.tier.is_audio_only(),
    }
}

async fn run_job(
    backend: Arc<dyn ExtractionBackend>,
    job: DownloadJob,
    mux_available: bool,
    retry_attempts: u32,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<JobState>>,
    sink: Arc<dyn ProgressSink>,
) {
    set_state(&state, &sink, JobState::Running);

    if !mux_available
        && !job.tier.is_audio_only()
        && job.tier.format_spec(true) != job.tier.format_spec(false)
    {
        sink.emit_info(
            "No muxing tool found; downloading a single stream instead of merging",
        );
    }

    let mut format_spec = job.tier.format_spec(mux_available);
    let mut attempt: u32 = 0;
    let destinations: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));

    let outcome = loop {
        let request = build_request(&job, format_spec.clone());
        let (tx, rx) = mpsc::unbounded_channel::<RawEvent>();

        let pump = spawn_pump(rx, Arc::clone(&sink), Arc::clone(&destinations), job.output_dir.clone());

        let result = backend.download(&request, Arc::clone(&cancel), tx).await;
        let _ = pump.await;

        match result {
            Ok(DownloadOutcome::Completed) => break Ok(()),
            Ok(DownloadOutcome::Cancelled) => {
                let recorded = destinations.lock().map(|d| d.clone()).unwrap_or_default();
                remove_partial_output(&job.output_dir, &recorded);
                set_state(&state, &sink, JobState::Stopped);
                return;
            }
            Err(err) if err.is_retryable() && attempt < retry_attempts => {
                attempt += 1;
                log::warn!(
                    "attempt with '{}' failed ({}), retrying with best audio (attempt {})",
                    format_spec,
                    err,
                    attempt
                );
                sink.emit_info("Download failed; retrying with best audio");
                format_spec = QualityTier::AudioOnly.format_spec(mux_available);
            }
            Err(err) => break Err(err),
        }
    };

    match outcome {
        Ok(()) => {
            sink.emit_progress(&ProgressSnapshot {
                percent: 100.0,
                speed_bps: None,
                eta_seconds: Some(0),
                fragment: None,
                status: "finished".into(),
            });
            set_state(&state, &sink, JobState::Completed);
        }
        Err(err) => {
            log::error!("download failed: {err}");
            let recorded = destinations.lock().map(|d| d.clone()).unwrap_or_default();
            remove_partial_output(&job.output_dir, &recorded);
            set_state(&state, &sink, JobState::Failed { message: err.to_string() });
        }
    }
}

fn spawn_pump(
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
    sink: Arc<dyn ProgressSink>,
    destinations: Arc<Mutex<Vec<PathBuf>>>,
    output_dir: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut aggregator = ProgressAggregator::new();
        while let Some(event) = rx.recv().await {
            match &event {
                RawEvent::Started { destination } | RawEvent::Merging { destination } => {
                    let path = resolve_destination(&output_dir, destination);
                    if let Ok(mut recorded) = destinations.lock() {
                        recorded.push(path);
                    }
                }
                RawEvent::AlreadyDownloaded { destination } => {
                    sink.emit_info(&format!("{destination} was already downloaded"));
                }
                _ => {}
            }
            if let Some(snapshot) = aggregator.normalize(&event) {
                sink.emit_progress(&snapshot);
            }
        }
    })
}

fn resolve_destination(output_dir: &Path, destination: &str) -> PathBuf {
    let path = Path::new(destination);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        output_dir.join(path)
    }
}

/// Best-effort removal of the extractor's in-flight artifacts. Finished
/// files from earlier playlist items are left alone.
fn remove_partial_output(output_dir: &Path, recorded: &[PathBuf]) {
    for dest in recorded {
        for suffix in [".part", ".ytdl"] {
            let mut artifact = dest.as_os_str().to_owned();
            artifact.push(suffix);
            let artifact = PathBuf::from(artifact);
            if artifact.exists() {
                if let Err(e) = std::fs::remove_file(&artifact) {
                    log::warn!("could not remove {}: {e}", artifact.display());
                }
            }
        }
    }

    // Stray fragment temp files land next to the destination.
    let stems: Vec<String> = recorded
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_partial = name.ends_with(".part") || name.ends_with(".ytdl");
        if is_partial && stems.iter().any(|s| name.starts_with(s.as_str())) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("could not remove {}: {e}", entry.path().display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::backend::{PlaylistProbe, VideoProbe};
    use crate::downloader::errors::{AnalysisError, PlaylistError};
    use crate::downloader::models::MediaSource;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct TestSink {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
        states: Mutex<Vec<JobState>>,
        infos: Mutex<Vec<String>>,
    }

    impl ProgressSink for TestSink {
        fn emit_progress(&self, snapshot: &ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
        fn emit_state(&self, state: &JobState) {
            self.states.lock().unwrap().push(state.clone());
        }
        fn emit_info(&self, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }
    }

    enum Script {
        Succeed(Vec<RawEvent>),
        FailThenSucceed(DownloadError),
        WaitForCancel { destination: String },
    }

    struct MockBackend {
        script: Script,
        specs: Mutex<Vec<String>>,
    }

    impl MockBackend {
        fn new(script: Script) -> Self {
            Self { script, specs: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ExtractionBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn probe_video(&self, _url: &str) -> Result<VideoProbe, AnalysisError> {
            Err(AnalysisError::NoStreams)
        }

        async fn probe_playlist(&self, _url: &str) -> Result<PlaylistProbe, PlaylistError> {
            Err(PlaylistError::NotAPlaylist)
        }

        async fn download(
            &self,
            request: &DownloadRequest,
            cancel: Arc<AtomicBool>,
            events: mpsc::UnboundedSender<RawEvent>,
        ) -> Result<DownloadOutcome, DownloadError> {
            let call = {
                let mut specs = self.specs.lock().unwrap();
                specs.push(request.format_spec.clone());
                specs.len()
            };
            match &self.script {
                Script::Succeed(script_events) => {
                    for event in script_events {
                        let _ = events.send(event.clone());
                    }
                    Ok(DownloadOutcome::Completed)
                }
                Script::FailThenSucceed(err) => {
                    if call == 1 {
                        Err(err.clone())
                    } else {
                        let _ = events.send(RawEvent::Finished);
                        Ok(DownloadOutcome::Completed)
                    }
                }
                Script::WaitForCancel { destination } => {
                    let _ = events.send(RawEvent::Started { destination: destination.clone() });
                    loop {
                        if cancel.load(Ordering::SeqCst) {
                            return Ok(DownloadOutcome::Cancelled);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    fn job(tier: QualityTier, output_dir: PathBuf) -> DownloadJob {
        DownloadJob {
            source: MediaSource::video("https://www.youtube.com/watch?v=abc"),
            tier,
            range: None,
            items: None,
            subtitles: false,
            output_dir,
        }
    }

    #[tokio::test]
    async fn completed_job_reaches_terminal_state() {
        let backend = Arc::new(MockBackend::new(Script::Succeed(vec![
            RawEvent::Started { destination: "video.mp4".into() },
            RawEvent::Chunk { downloaded: 50, total: Some(100), speed_bps: Some(1000.0) },
            RawEvent::Finished,
        ])));
        let coordinator = DownloadCoordinator::new(backend, 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P720, std::env::temp_dir()),
            true,
            sink.clone(),
        );
        handle.join().await;

        let states = sink.states.lock().unwrap().clone();
        assert_eq!(states.first(), Some(&JobState::Running));
        assert_eq!(states.last(), Some(&JobState::Completed));
        let snapshots = sink.snapshots.lock().unwrap();
        assert!((snapshots.last().unwrap().percent - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn retry_falls_back_to_best_audio() {
        let backend = Arc::new(MockBackend::new(Script::FailThenSucceed(
            DownloadError::FormatUnavailable,
        )));
        let coordinator = DownloadCoordinator::new(backend.clone(), 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P1080, std::env::temp_dir()),
            true,
            sink.clone(),
        );
        handle.join().await;

        let specs = backend.specs.lock().unwrap().clone();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1], "bestaudio/best");
        let states = sink.states.lock().unwrap();
        assert_eq!(states.last(), Some(&JobState::Completed));
    }

    #[tokio::test]
    async fn network_failure_triggers_one_retry() {
        let backend = Arc::new(MockBackend::new(Script::FailThenSucceed(
            DownloadError::NetworkTimeout,
        )));
        let coordinator = DownloadCoordinator::new(backend.clone(), 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P1080, std::env::temp_dir()),
            true,
            sink.clone(),
        );
        handle.join().await;

        let specs = backend.specs.lock().unwrap().clone();
        assert_eq!(specs.len(), 2);
        let states = sink.states.lock().unwrap();
        assert_eq!(states.last(), Some(&JobState::Completed));
    }

    #[tokio::test]
    async fn unavailable_source_is_not_retried() {
        let backend = Arc::new(MockBackend::new(Script::FailThenSucceed(
            DownloadError::Unavailable,
        )));
        let coordinator = DownloadCoordinator::new(backend.clone(), 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P720, std::env::temp_dir()),
            true,
            sink.clone(),
        );
        handle.join().await;

        let specs = backend.specs.lock().unwrap();
        assert_eq!(specs.len(), 1);
        let states = sink.states.lock().unwrap();
        assert!(matches!(states.last(), Some(JobState::Failed { .. })));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_job() {
        let backend = Arc::new(MockBackend::new(Script::FailThenSucceed(
            DownloadError::FormatUnavailable,
        )));
        let coordinator = DownloadCoordinator::new(backend, 0);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P1080, std::env::temp_dir()),
            true,
            sink.clone(),
        );
        handle.join().await;

        let states = sink.states.lock().unwrap();
        assert!(matches!(states.last(), Some(JobState::Failed { .. })));
    }

    #[tokio::test]
    async fn stopped_job_cleans_partials_and_emits_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("video.mp4.part");
        std::fs::write(&partial, b"half").unwrap();
        let finished = dir.path().join("other.mp4");
        std::fs::write(&finished, b"done").unwrap();

        let backend = Arc::new(MockBackend::new(Script::WaitForCancel {
            destination: "video.mp4".into(),
        }));
        let coordinator = DownloadCoordinator::new(backend, 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::Best, dir.path().to_path_buf()),
            true,
            sink.clone(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        handle.join().await;

        assert!(!partial.exists());
        assert!(finished.exists());
        let states = sink.states.lock().unwrap();
        assert_eq!(states.last(), Some(&JobState::Stopped));
        assert!(!states.iter().any(|s| matches!(s, JobState::Failed { .. })));
        assert!(!states.contains(&JobState::Completed));
    }

    #[tokio::test]
    async fn missing_muxer_emits_single_notice() {
        let backend = Arc::new(MockBackend::new(Script::Succeed(vec![RawEvent::Finished])));
        let coordinator = DownloadCoordinator::new(backend.clone(), 1);
        let sink = Arc::new(TestSink::default());

        let handle = coordinator.start(
            job(QualityTier::P720, std::env::temp_dir()),
            false,
            sink.clone(),
        );
        handle.join().await;

        let infos = sink.infos.lock().unwrap();
        assert_eq!(
            infos.iter().filter(|m| m.contains("muxing tool")).count(),
            1
        );
        let specs = backend.specs.lock().unwrap();
        assert_eq!(specs[0], "best[height<=720]/bestaudio");
    }

    #[tokio::test]
    async fn slot_rejects_second_job_while_first_runs() {
        let backend = Arc::new(MockBackend::new(Script::WaitForCancel {
            destination: "busy.mp4".into(),
        }));
        let coordinator = DownloadCoordinator::new(backend, 0);
        let sink = Arc::new(TestSink::default());
        let slot = JobSlot::default();

        slot.install(|| {
            coordinator.start(job(QualityTier::Best, std::env::temp_dir()), true, sink.clone())
        })
        .unwrap();

        let second = slot.install(|| unreachable!("slot must stay claimed"));
        assert!(matches!(second, Err(InvalidJobError::AlreadyRunning)));

        assert!(slot.stop_active());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while slot.state() != Some(JobState::Stopped) {
            assert!(tokio::time::Instant::now() < deadline, "job never stopped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn slot_frees_after_terminal_state() {
        let backend = Arc::new(MockBackend::new(Script::Succeed(vec![RawEvent::Finished])));
        let coordinator = DownloadCoordinator::new(backend, 0);
        let sink = Arc::new(TestSink::default());
        let slot = JobSlot::default();

        slot.install(|| {
            coordinator.start(job(QualityTier::Best, std::env::temp_dir()), true, sink.clone())
        })
        .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while slot.state() != Some(JobState::Completed) {
            assert!(tokio::time::Instant::now() < deadline, "job never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let again = slot.install(|| {
            coordinator.start(job(QualityTier::Best, std::env::temp_dir()), true, sink.clone())
        });
        assert!(again.is_ok());
    }

    #[test]
    fn playlist_range_becomes_items_argument() {
        let mut j = job(QualityTier::Best, std::env::temp_dir());
        j.source = MediaSource::playlist("https://www.youtube.com/playlist?list=PL1");
        j.range = Some((2, 5));
        let request = build_request(&j, "best".into());
        assert_eq!(request.playlist_items.as_deref(), Some("2-5"));
    }

    #[test]
    fn explicit_items_win_over_range() {
        let mut j = job(QualityTier::Best, std::env::temp_dir());
        j.range = Some((1, 10));
        j.items = Some(vec![1, 2, 5]);
        let request = build_request(&j, "best".into());
        assert_eq!(request.playlist_items.as_deref(), Some("1-2,5"));
    }

    #[test]
    fn single_video_disables_playlist_expansion() {
        let j = job(QualityTier::Best, std::env::temp_dir());
        let request = build_request(&j, "best".into());
        assert_eq!(request.playlist_items, None);
    }
}
