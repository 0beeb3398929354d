//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the engines
//! (ImageMagick, ffmpeg, fc-match) and provides lookup methods for the rest
//! of the crate.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use mf_core::config::ToolsConfig;
use mf_core::{EngineErrorKind, Error};
use serde::{Deserialize, Serialize};

/// The external engines the adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// ImageMagick 7 `magick`, or the ImageMagick 6 `convert` fallback.
    Magick,
    Ffmpeg,
    FcMatch,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Magick, Tool::Ffmpeg, Tool::FcMatch];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Magick => "magick",
            Tool::Ffmpeg => "ffmpeg",
            Tool::FcMatch => "fc-match",
        }
    }

    /// Executable names searched in `PATH`, in preference order.
    fn candidates(self) -> &'static [&'static str] {
        match self {
            Tool::Magick => &["magick", "convert"],
            Tool::Ffmpeg => &["ffmpeg"],
            Tool::FcMatch => &["fc-match"],
        }
    }

    /// Whether the service cannot start without this tool.
    pub fn is_required(self) -> bool {
        !matches!(self, Tool::FcMatch)
    }

    fn version_arg(self) -> &'static str {
        match self {
            Tool::Magick | Tool::Ffmpeg => "-version",
            Tool::FcMatch => "--version",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discovered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tool: Tool,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Whether the service refuses to start without it.
    pub required: bool,
    /// Version string (first line of the version output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<Tool, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path is used when it exists; otherwise each candidate
    /// executable name is looked up with [`which::which`]. Tools that are not
    /// found are omitted from the registry.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for tool in Tool::ALL {
            let custom_path = match tool {
                Tool::Magick => tools_config.magick_path.as_deref(),
                Tool::Ffmpeg => tools_config.ffmpeg_path.as_deref(),
                Tool::FcMatch => tools_config.fc_match_path.as_deref(),
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!("Configured {} path {} does not exist; searching PATH", tool, p.display());
                    search_path(tool)
                }
                None => search_path(tool),
            };

            if let Some(path) = resolved {
                tracing::debug!("Found {} at {}", tool, path.display());
                tools.insert(tool, ToolConfig { tool, path });
            }
        }

        Self { tools }
    }

    /// Build a registry from explicit paths without touching `PATH`.
    pub fn with_paths(paths: impl IntoIterator<Item = (Tool, PathBuf)>) -> Self {
        let tools = paths
            .into_iter()
            .map(|(tool, path)| (tool, ToolConfig { tool, path }))
            .collect();
        Self { tools }
    }

    /// Return the [`ToolConfig`] for `tool`, or `EngineNotFound` if it was not
    /// found during discovery.
    pub fn require(&self, tool: Tool) -> mf_core::Result<&ToolConfig> {
        self.tools.get(&tool).ok_or_else(|| {
            Error::engine(
                EngineErrorKind::NotFound,
                tool.name(),
                format!("{tool} not found; is it installed and in PATH?"),
            )
        })
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.tools.contains_key(&tool)
    }

    /// Fail with `EngineNotFound` for the first missing required tool.
    ///
    /// Optional tools that are missing are only logged.
    pub fn health_check(&self) -> mf_core::Result<()> {
        for tool in Tool::ALL {
            if tool.is_required() {
                self.require(tool)?;
            } else if !self.is_available(tool) {
                tracing::warn!("{} not found; text overlays will fail", tool);
            }
        }
        Ok(())
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        Tool::ALL
            .iter()
            .map(|&tool| match self.tools.get(&tool) {
                Some(cfg) => ToolInfo {
                    name: tool.name().to_string(),
                    available: true,
                    required: tool.is_required(),
                    version: detect_version(tool, &cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: tool.name().to_string(),
                    available: false,
                    required: tool.is_required(),
                    version: None,
                    path: None,
                },
            })
            .collect()
    }

    /// Iterate over all registered tool configs.
    pub fn iter(&self) -> impl Iterator<Item = (&Tool, &ToolConfig)> {
        self.tools.iter()
    }
}

fn search_path(tool: Tool) -> Option<PathBuf> {
    tool.candidates().iter().find_map(|name| which::which(name).ok())
}

/// Run the tool's version flag and return the first non-empty line of its
/// output. fc-match prints its version on stderr.
fn detect_version(tool: Tool, path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg(tool.version_arg())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    [output.stdout, output.stderr]
        .into_iter()
        .find_map(|stream| first_line(&stream))
}

fn first_line(stream: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stream)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::ErrorKind;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        // No tool is guaranteed to be installed; the call must not panic.
        let _ = registry.check_all();
    }

    #[test]
    fn require_missing_tool_is_engine_not_found() {
        let registry = ToolRegistry::default();
        let err = registry.require(Tool::Ffmpeg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineNotFound);
    }

    #[test]
    fn health_check_requires_magick_and_ffmpeg() {
        let registry = ToolRegistry::with_paths([(Tool::Magick, PathBuf::from("/usr/bin/magick"))]);
        let err = registry.health_check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineNotFound);
        assert!(err.to_string().contains("ffmpeg"));

        let registry = ToolRegistry::with_paths([
            (Tool::Magick, PathBuf::from("/usr/bin/magick")),
            (Tool::Ffmpeg, PathBuf::from("/usr/bin/ffmpeg")),
        ]);
        assert!(registry.health_check().is_ok());
    }

    #[test]
    fn check_all_returns_known_tools() {
        let infos = ToolRegistry::default().check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["magick", "ffmpeg", "fc-match"]);
        assert!(infos.iter().all(|i| !i.available));
        assert!(!infos[2].required);
    }

    #[test]
    fn missing_configured_path_falls_back_to_search() {
        let cfg = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..Default::default()
        };
        let registry = ToolRegistry::discover(&cfg);
        if let Ok(found) = registry.require(Tool::Ffmpeg) {
            assert_ne!(found.path, PathBuf::from("/nonexistent/ffmpeg"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn version_falls_back_to_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fc-match");
        let body = "#!/bin/sh\necho\necho '  fontconfig version 2.14.2  ' >&2\n";
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(
            detect_version(Tool::FcMatch, &script).as_deref(),
            Some("fontconfig version 2.14.2")
        );
    }

    #[test]
    fn first_line_skips_blank_lines() {
        let output = b"\n  \nffmpeg version 6.1\nbuilt with gcc\n";
        assert_eq!(first_line(output).as_deref(), Some("ffmpeg version 6.1"));
        assert_eq!(first_line(b"\n\n"), None);
    }

    #[test]
    fn tool_config_serialization() {
        let cfg = ToolConfig {
            tool: Tool::FcMatch,
            path: PathBuf::from("/usr/bin/fc-match"),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("fc_match"));
        let back: ToolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool, Tool::FcMatch);
    }
}
