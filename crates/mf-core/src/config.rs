//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON or TOML and
//! carries all sub-configs for tools, policy, scheduling, pipeline and
//! delivery. Every section defaults sensibly so a completely empty `{}` file
//! is valid. Configuration is read once at startup and never mutated while
//! requests are handled.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::{MediaFormat, Operation};
use crate::Error;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub policy: PolicyConfig,
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Read and parse a config file; `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    ///
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        match Self::load(path) {
            Ok(cfg) => Ok(cfg),
            Err(Error::Io { source }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.scheduler.pool_size == 0 {
            warnings.push("scheduler.pool_size is 0; no job will ever run".into());
        }
        if self.scheduler.backlog == 0 {
            warnings.push("scheduler.backlog is 0; every submission beyond the pool is rejected".into());
        }
        if self.scheduler.job_timeout_secs == 0 {
            warnings.push("scheduler.job_timeout_secs is 0; every job will time out".into());
        }
        if self.pipeline.fan_out == 0 {
            warnings.push("pipeline.fan_out is 0; treated as 1".into());
        }
        if self.pipeline.default_dpi > self.policy.max_dpi {
            warnings.push(format!(
                "pipeline.default_dpi ({}) exceeds policy.max_dpi ({})",
                self.pipeline.default_dpi, self.policy.max_dpi
            ));
        }
        if !(1..=100).contains(&self.pipeline.default_quality) {
            warnings.push("pipeline.default_quality should be between 1 and 100".into());
        }
        if self.policy.rules.is_empty() {
            warnings.push("policy.rules is empty; every request will be rejected".into());
        }

        for (i, rule) in self.policy.rules.iter().enumerate() {
            if rule.operations.is_empty() {
                warnings.push(format!("policy.rules[{i}] ({}) lists no operations", rule.format));
            }
            if rule.memory_cap == 0 || rule.disk_cap == 0 {
                warnings.push(format!("policy.rules[{i}] ({}) has a zero resource cap", rule.format));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools. Unset paths are resolved through `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub magick_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub fc_match_path: Option<PathBuf>,
}

/// One allow-list entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRuleConfig {
    pub format: MediaFormat,
    /// Operations this format is permitted for.
    pub operations: Vec<Operation>,
    /// Operations explicitly denied (takes precedence over `operations`).
    #[serde(default)]
    pub deny: Vec<Operation>,
    #[serde(default = "default_memory_cap")]
    pub memory_cap: u64,
    #[serde(default = "default_disk_cap")]
    pub disk_cap: u64,
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_memory_cap() -> u64 {
    2 * GIB
}
fn default_disk_cap() -> u64 {
    4 * GIB
}
fn default_max_dimension() -> u32 {
    16_384
}
fn default_max_pages() -> u32 {
    500
}

impl PolicyRuleConfig {
    /// A rule with default caps.
    pub fn new(format: MediaFormat, operations: &[Operation]) -> Self {
        Self {
            format,
            operations: operations.to_vec(),
            deny: Vec::new(),
            memory_cap: default_memory_cap(),
            disk_cap: default_disk_cap(),
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            max_pages: default_max_pages(),
        }
    }
}

/// Allow-list and resource ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub rules: Vec<PolicyRuleConfig>,
    pub max_dpi: u32,
    /// Upper bound on composition elements.
    pub max_elements: usize,
    /// Upper bound on frames a composition renders.
    pub max_frames: u64,
}

impl Default for PolicyConfig {
    /// Mirrors the provisioning-time ImageMagick policy relaxation: PDF read
    /// and write, raster formats with LABEL text, video and audio via ffmpeg.
    fn default() -> Self {
        use MediaFormat::*;
        use Operation::*;

        let raster = [TranscodeImage, CompositeText];
        let rules = vec![
            PolicyRuleConfig::new(Pdf, &[RasterizePage, TranscodeImage]),
            PolicyRuleConfig::new(Png, &raster),
            PolicyRuleConfig::new(Jpeg, &raster),
            PolicyRuleConfig::new(Gif, &[TranscodeImage, CompositeText, EncodeVideo]),
            PolicyRuleConfig::new(Webp, &raster),
            PolicyRuleConfig::new(Tiff, &raster),
            PolicyRuleConfig::new(Mp4, &[EncodeVideo, CompositeText]),
            PolicyRuleConfig::new(Webm, &[EncodeVideo, CompositeText]),
            PolicyRuleConfig::new(Mov, &[EncodeVideo, CompositeText]),
            PolicyRuleConfig::new(Mkv, &[EncodeVideo, CompositeText]),
            PolicyRuleConfig::new(Mp3, &[EncodeVideo]),
            PolicyRuleConfig::new(Wav, &[EncodeVideo]),
            PolicyRuleConfig::new(Aac, &[EncodeVideo]),
        ];

        Self {
            rules,
            max_dpi: 600,
            max_elements: 64,
            // Ten minutes at 30 fps.
            max_frames: 18_000,
        }
    }
}

/// Job scheduling and isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running jobs.
    pub pool_size: usize,
    /// Maximum number of jobs waiting for a slot before `Overloaded`.
    pub backlog: usize,
    /// Per-attempt deadline.
    pub job_timeout_secs: u64,
    /// Retry recoverable engine failures once with degraded options.
    pub retry_degraded: bool,
    /// Finished job records kept for status queries; older ones are evicted.
    pub retain_finished: usize,
    /// Parent of per-job scratch directories; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            backlog: 16,
            job_timeout_secs: 300,
            retry_degraded: true,
            retain_finished: 256,
            scratch_dir: None,
        }
    }
}

/// Conversion pipeline defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent pages/frames per stage within one job.
    pub fan_out: usize,
    pub default_dpi: u32,
    pub default_quality: u8,
    /// Font family used for overlays that do not name one.
    pub default_font: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fan_out: 4,
            default_dpi: 150,
            default_quality: 90,
            default_font: "DejaVu Sans".into(),
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.pool_size, 2);
        assert_eq!(cfg.scheduler.backlog, 16);
        assert_eq!(cfg.scheduler.retain_finished, 256);
        assert_eq!(cfg.pipeline.default_dpi, 150);
        assert_eq!(cfg.pipeline.default_font, "DejaVu Sans");
        assert!(cfg.policy.rules.iter().any(|r| r.format == MediaFormat::Pdf));
    }

    #[test]
    fn default_config_no_warnings() {
        let warnings = Config::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn zero_pool_warns() {
        let mut cfg = Config::default();
        cfg.scheduler.pool_size = 0;
        assert!(cfg.validate().iter().any(|w| w.contains("pool_size")));
    }

    #[test]
    fn dpi_above_cap_warns() {
        let mut cfg = Config::default();
        cfg.pipeline.default_dpi = 1200;
        assert!(cfg.validate().iter().any(|w| w.contains("max_dpi")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"scheduler": {"pool_size": 8}, "pipeline": {"fan_out": 2}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.scheduler.pool_size, 8);
        assert_eq!(cfg.scheduler.backlog, 16);
        assert_eq!(cfg.pipeline.fan_out, 2);
    }

    #[test]
    fn parse_toml_policy_rules() {
        let toml = r#"
            [scheduler]
            backlog = 4

            [[policy.rules]]
            format = "png"
            operations = ["transcode_image"]
            max_width = 800

            [[policy.rules]]
            format = "pdf"
            operations = ["rasterize_page"]
            deny = ["transcode_image"]
        "#;
        let cfg = Config::from_toml(toml).unwrap();
        assert_eq!(cfg.scheduler.backlog, 4);
        assert_eq!(cfg.policy.rules.len(), 2);
        assert_eq!(cfg.policy.rules[0].max_width, 800);
        assert_eq!(cfg.policy.rules[0].max_height, 16_384);
        assert_eq!(cfg.policy.rules[1].deny, vec![Operation::TranscodeImage]);
        assert_eq!(cfg.policy.max_dpi, 600);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.scheduler.job_timeout_secs, 300);
    }

    #[test]
    fn bad_json_is_config_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None).unwrap();
        assert_eq!(cfg.scheduler.pool_size, 2);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/mediaforge.json"))).unwrap();
        assert_eq!(cfg.scheduler.pool_size, 2);
    }
}
