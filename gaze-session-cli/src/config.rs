//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use gaze_session_core::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub zone_mapping: ZoneMappingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Process every Nth frame of the input
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
    /// Log level used when no -v/-q flag is given ("error" ... "trace")
    pub log_level: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            frame_skip: default_frame_skip(),
            log_level: None,
        }
    }
}

fn default_fps() -> f64 {
    30.0
}

fn default_frame_skip() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_missing_grace")]
    pub missing_grace: u32,
    #[serde(default)]
    pub min_session_duration: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            match_threshold: defaults.match_threshold,
            missing_grace: defaults.missing_grace,
            min_session_duration: defaults.min_session_duration,
        }
    }
}

fn default_match_threshold() -> f64 {
    TrackerConfig::default().match_threshold
}

fn default_missing_grace() -> u32 {
    TrackerConfig::default().missing_grace
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detector_type")]
    pub detector_type: String,
    /// Faces below this confidence are dropped before tracking
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_frame_width")]
    pub frame_width: f64,
    #[serde(default = "default_frame_height")]
    pub frame_height: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detector_type: default_detector_type(),
            min_confidence: 0.0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
        }
    }
}

fn default_detector_type() -> String {
    "replay".to_string()
}

fn default_frame_width() -> f64 {
    1280.0
}

fn default_frame_height() -> f64 {
    720.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZoneMappingConfig {
    #[serde(default = "default_mapper_type")]
    pub mapper_type: String,
}

impl Default for ZoneMappingConfig {
    fn default() -> Self {
        Self {
            mapper_type: default_mapper_type(),
        }
    }
}

fn default_mapper_type() -> String {
    "bakery".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub console_output: bool,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default = "default_json_output_dir")]
    pub json_output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub verbose: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            console_output: true,
            json_output: false,
            json_output_dir: default_json_output_dir(),
            verbose: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_json_output_dir() -> PathBuf {
    PathBuf::from("analytics_output")
}

impl AppConfig {
    /// Tracker configuration assembled from `[system]` and `[tracking]`
    ///
    /// With `frame_skip` N the tracker sees every Nth frame, so each update
    /// stands for N source frames.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::new()
            .with_fps(self.system.fps)
            .with_frame_stride(self.system.frame_skip)
            .with_match_threshold(self.tracking.match_threshold)
            .with_missing_grace(self.tracking.missing_grace)
            .with_min_session_duration(self.tracking.min_session_duration)
    }

    /// Check cross-field rules before anything is constructed
    pub fn validate(&self) -> Result<()> {
        self.tracker_config()
            .validate()
            .context("Invalid [system]/[tracking] configuration")?;

        if self.system.frame_skip == 0 {
            bail!("[system] frame_skip must be at least 1");
        }
        if !(self.detection.frame_width > 0.0 && self.detection.frame_height > 0.0) {
            bail!(
                "[detection] frame size must be positive, got {}x{}",
                self.detection.frame_width,
                self.detection.frame_height
            );
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            bail!(
                "[detection] min_confidence must be in [0, 1], got {}",
                self.detection.min_confidence
            );
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
