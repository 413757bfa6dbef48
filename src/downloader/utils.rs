// Helper functions shared by the backend and the commands layer.

use lazy_static::lazy_static;
use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};

lazy_static! {
    static ref VIDEO_URL_RE: Regex = Regex::new(
        r"^https?://(www\.)?(youtube\.com/watch\?|youtu\.be/|youtube\.com/shorts/|youtube\.com/live/)"
    )
    .unwrap();
    static ref PLAYLIST_URL_RE: Regex =
        Regex::new(r"^https?://(www\.)?youtube\.com/(playlist\?|.*[?&]list=)").unwrap();
    static ref GENERIC_URL_RE: Regex = Regex::new(r"^https?://\S+\.\S+").unwrap();
}

/// Run a command and collect its output, killing it on timeout.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| format!("Failed to capture stdout from {}", program))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| format!("Failed to capture stderr from {}", program))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stdout: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stderr: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res.map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
            let stdout = stdout_task
                .await
                .map_err(|e| format!("stdout task failed: {}", e))??;
            let stderr = stderr_task
                .await
                .map_err(|e| format!("stderr task failed: {}", e))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(format!("Timed out after {}s", timeout_secs))
        }
    }
}

/// Accepts anything that looks like an http(s) media URL.
pub fn is_valid_media_url(url: &str) -> bool {
    let url = url.trim();
    VIDEO_URL_RE.is_match(url) || PLAYLIST_URL_RE.is_match(url) || GENERIC_URL_RE.is_match(url)
}

/// URL-level heuristic used before any network probe.
pub fn looks_like_playlist(url: &str) -> bool {
    PLAYLIST_URL_RE.is_match(url.trim()) || url.contains("/playlist")
}

/// Bytes to a human label, MB below one gigabyte.
pub fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}
