use serde::{Deserialize, Serialize};
use std::process::Command;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Locates the external tools on disk. A user-supplied ffmpeg path from
/// settings wins over autodetection.
pub struct ToolLocator {
    ffmpeg_override: Option<String>,
}

impl ToolLocator {
    pub fn new() -> Self {
        Self { ffmpeg_override: None }
    }

    pub fn with_ffmpeg_override(path: Option<String>) -> Self {
        Self { ffmpeg_override: path.filter(|p| !p.trim().is_empty()) }
    }

    pub fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let name = tool_type.as_str().to_string();
        let (path, version) = self.detect_tool(tool_type);
        ToolInfo {
            name,
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    pub fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp),
            self.get_tool_info(ToolType::Ffmpeg),
        ]
    }

    /// True when ffmpeg is present, so two-stream tiers can be merged.
    pub fn mux_available(&self) -> bool {
        self.get_tool_info(ToolType::Ffmpeg).is_available
    }

    pub fn ytdlp_path(&self) -> Option<String> {
        self.get_tool_info(ToolType::YtDlp).path
    }

    pub fn ffmpeg_path(&self) -> Option<String> {
        self.get_tool_info(ToolType::Ffmpeg).path
    }

    fn detect_tool(&self, tool_type: ToolType) -> (Option<String>, Option<String>) {
        if tool_type == ToolType::Ffmpeg {
            if let Some(p) = &self.ffmpeg_override {
                if std::path::Path::new(p).exists() {
                    let version = self.get_version(p, tool_type);
                    return (Some(p.clone()), version);
                }
            }
        }

        let binary_name = tool_type.as_str();

        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];

        for path in common_paths {
            if std::path::Path::new(&path).exists() {
                let version = self.get_version(&path, tool_type);
                return (Some(path), version);
            }
        }

        if let Ok(output) = Command::new("which").arg(binary_name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    let version = self.get_version(&path, tool_type);
                    return (Some(path), version);
                }
            }
        }

        (None, None)
    }

    fn get_version(&self, path: &str, tool_type: ToolType) -> Option<String> {
        let arg = match tool_type {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        };

        match Command::new(path).arg(arg).output() {
            Ok(output) if output.status.success() => {
                let out = String::from_utf8_lossy(&output.stdout);
                // ffmpeg prints a banner, keep only the first line
                out.lines().next().map(|l| l.trim().to_string())
            }
            _ => None,
        }
    }
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_ignored_when_missing() {
        let locator = ToolLocator::with_ffmpeg_override(Some("/nonexistent/ffmpeg".into()));
        // Falls through to autodetection rather than reporting a dead path.
        let info = locator.get_tool_info(ToolType::Ffmpeg);
        assert_ne!(info.path.as_deref(), Some("/nonexistent/ffmpeg"));
    }

    #[test]
    fn blank_override_is_dropped() {
        let locator = ToolLocator::with_ffmpeg_override(Some("   ".into()));
        assert!(locator.ffmpeg_override.is_none());
    }
}
