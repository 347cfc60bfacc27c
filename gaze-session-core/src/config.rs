//! Tracker configuration types
//!
//! The tracker reads its configuration once at construction. Loading it from
//! a file is the application's job; this module only defines the values, their
//! defaults and the rules that make a configuration usable.

use crate::types::{Result, TrackerError};
use serde::{Deserialize, Serialize};

/// Configuration for the face tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track (default: 0.3)
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Consecutive missed frames before a track is completed (default: 20)
    #[serde(default = "default_missing_grace")]
    pub missing_grace: u32,

    /// Frames per second of the source stream (default: 30.0)
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Sessions shorter than this many seconds are discarded (default: 0.0, disabled)
    #[serde(default)]
    pub min_session_duration: f64,

    /// Source frames represented by each `update` call (default: 1)
    ///
    /// Set when the caller feeds only every Nth frame. Dwell time and the
    /// grace period are then counted in source frames.
    #[serde(default = "default_frame_stride")]
    pub frame_stride: u32,
}

fn default_match_threshold() -> f64 {
    0.3
}

fn default_missing_grace() -> u32 {
    20
}

fn default_fps() -> f64 {
    30.0
}

fn default_frame_stride() -> u32 {
    1
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            missing_grace: default_missing_grace(),
            fps: default_fps(),
            min_session_duration: 0.0,
            frame_stride: default_frame_stride(),
        }
    }
}

impl TrackerConfig {
    /// Create a new tracker configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the IoU match threshold
    pub fn with_match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = threshold;
        self
    }

    /// Builder method: set the grace period in frames
    pub fn with_missing_grace(mut self, frames: u32) -> Self {
        self.missing_grace = frames;
        self
    }

    /// Builder method: set the stream frame rate
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Builder method: set the minimum session duration in seconds
    pub fn with_min_session_duration(mut self, seconds: f64) -> Self {
        self.min_session_duration = seconds;
        self
    }

    /// Builder method: set how many source frames each update stands for
    pub fn with_frame_stride(mut self, stride: u32) -> Self {
        self.frame_stride = stride;
        self
    }

    /// Seconds represented by a single `update` call
    pub fn frame_duration(&self) -> f64 {
        f64::from(self.frame_stride) / self.fps
    }

    /// Whether `streak` missed updates use up the grace period
    pub fn grace_exhausted(&self, streak: u32) -> bool {
        u64::from(streak) * u64::from(self.frame_stride) >= u64::from(self.missing_grace)
    }

    /// Check that the configuration can drive a tracker
    ///
    /// `fps` must be finite and positive, `match_threshold` must lie in
    /// (0, 1], `min_session_duration` must be finite and non-negative and
    /// `frame_stride` at least 1.
    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "fps must be a positive number, got {}",
                self.fps
            )));
        }

        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }

        if !self.min_session_duration.is_finite() || self.min_session_duration < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "min_session_duration must be non-negative, got {}",
                self.min_session_duration
            )));
        }

        if self.frame_stride == 0 {
            return Err(TrackerError::InvalidConfig(
                "frame_stride must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_builder() {
        let config = TrackerConfig::new()
            .with_match_threshold(0.5)
            .with_missing_grace(5)
            .with_fps(25.0)
            .with_min_session_duration(1.0);

        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.missing_grace, 5);
        assert_eq!(config.fps, 25.0);
        assert!((config.frame_duration() - 0.04).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert_eq!(config.missing_grace, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_fps() {
        for fps in [0.0, -30.0, f64::NAN, f64::INFINITY] {
            let err = TrackerConfig::new().with_fps(fps).validate().unwrap_err();
            assert!(matches!(err, TrackerError::InvalidConfig(_)), "fps {}", fps);
        }
    }

    #[test]
    fn test_frame_stride_scales_dwell_and_grace() {
        let config = TrackerConfig::new()
            .with_fps(30.0)
            .with_missing_grace(20)
            .with_frame_stride(3);

        assert!((config.frame_duration() - 0.1).abs() < 1e-12);
        assert!(!config.grace_exhausted(6));
        assert!(config.grace_exhausted(7));
        assert!(TrackerConfig::new().with_missing_grace(0).grace_exhausted(1));
        assert!(TrackerConfig::new().with_frame_stride(0).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(TrackerConfig::new().with_match_threshold(0.0).validate().is_err());
        assert!(TrackerConfig::new().with_match_threshold(1.2).validate().is_err());
        assert!(TrackerConfig::new().with_match_threshold(1.0).validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: TrackerConfig = serde_json::from_str(r#"{"fps": 15.0}"#).unwrap();
        assert_eq!(config.fps, 15.0);
        assert_eq!(config.match_threshold, 0.3);
        assert_eq!(config.missing_grace, 20);
        assert_eq!(config.min_session_duration, 0.0);
    }
}
