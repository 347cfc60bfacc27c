//! Core types for the gaze session tracker
//!
//! This module defines the value types that flow through the tracker: the
//! per-frame detections it consumes and the tracks/sessions it produces.
//! Detections are immutable inputs; tracks are owned and mutated only by the
//! `FaceTracker` until they are completed.

use crate::config::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Unique, monotonically assigned track identifier
pub type TrackId = u64;

/// Zone label used when nothing better is known
pub const UNKNOWN_ZONE: &str = "Unknown";

/// Errors that can occur in the tracker library
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Axis-aligned rectangle in pixel units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its top-left corner and size
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True if every coordinate is finite and both dimensions are positive
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Center point (x, y)
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Intersection-over-union with another box, in [0, 1]
    ///
    /// Boxes that only touch along an edge have zero intersection.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            (intersection / union).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Head orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
}

/// A single face detected in one frame
///
/// Produced fresh every frame by the detector. The zone label is already
/// resolved when the detection reaches the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Face bounding box
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Zone the face is attributed to in this frame
    pub zone: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Optional head pose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<HeadPose>,
}

impl Detection {
    /// Create a detection without head pose
    pub fn new(bbox: BoundingBox, zone: impl Into<String>, confidence: f64) -> Self {
        Self {
            bbox,
            zone: zone.into(),
            confidence,
            pose: None,
        }
    }

    /// Builder method: attach a head pose
    pub fn with_pose(mut self, yaw: f64, pitch: f64) -> Self {
        self.pose = Some(HeadPose { yaw, pitch });
        self
    }

    /// Reason this detection must be skipped, if any
    pub fn validation_error(&self) -> Option<String> {
        if !self.bbox.is_valid() {
            return Some(format!(
                "degenerate box ({}, {}, {}x{})",
                self.bbox.x, self.bbox.y, self.bbox.width, self.bbox.height
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Some(format!("confidence {} outside [0, 1]", self.confidence));
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.validation_error().is_none()
    }
}

/// One observation appended to a track's gaze history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeRecord {
    /// Frame index of the observation
    pub frame: u64,
    /// Zone the face was attributed to
    pub zone: String,
    /// Detector confidence
    pub confidence: f64,
    /// Head pose, if the detector supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<HeadPose>,
    /// Stream time in seconds (frame / fps)
    pub timestamp: f64,
}

/// Lifecycle state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackState {
    /// Matched in the most recent frame
    Active,
    /// Unmatched for `missing_streak` consecutive frames, still inside the grace period
    Missing,
    /// Finalized; immutable from here on
    Completed,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackState::Active => write!(f, "ACTIVE"),
            TrackState::Missing => write!(f, "MISSING"),
            TrackState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// The continuous record of one subject's presence
///
/// While open (`Active` or `Missing`) a track is owned by the tracker. Once
/// `Completed` it is a session: an immutable snapshot handed to sinks and kept
/// in the tracker's completed sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    pub start_frame: u64,
    pub last_seen_frame: u64,
    pub missing_streak: u32,
    /// Most recent matched box
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Accumulated dwell seconds per zone
    pub zone_durations: BTreeMap<String, f64>,
    pub gaze_history: Vec<GazeRecord>,
    pub unique_zones: BTreeSet<String>,
    /// Seconds from first to last sighting; zero until completed
    pub total_duration: f64,
}

impl Track {
    /// Open a new track seeded with its first observation
    pub(crate) fn open(
        id: TrackId,
        detection: &Detection,
        frame_index: u64,
        config: &TrackerConfig,
    ) -> Self {
        let mut track = Self {
            id,
            state: TrackState::Active,
            start_frame: frame_index,
            last_seen_frame: frame_index,
            missing_streak: 0,
            bbox: detection.bbox,
            zone_durations: BTreeMap::new(),
            gaze_history: Vec::new(),
            unique_zones: BTreeSet::new(),
            total_duration: 0.0,
        };
        track.observe(detection, frame_index, config);
        track
    }

    /// Record a matched detection for this frame
    pub(crate) fn observe(&mut self, detection: &Detection, frame_index: u64, config: &TrackerConfig) {
        self.state = TrackState::Active;
        self.missing_streak = 0;
        self.last_seen_frame = self.last_seen_frame.max(frame_index);
        self.bbox = detection.bbox;

        *self
            .zone_durations
            .entry(detection.zone.clone())
            .or_insert(0.0) += config.frame_duration();
        self.unique_zones.insert(detection.zone.clone());
        self.gaze_history.push(GazeRecord {
            frame: frame_index,
            zone: detection.zone.clone(),
            confidence: detection.confidence,
            pose: detection.pose,
            timestamp: frame_index as f64 / config.fps,
        });
    }

    /// Record a frame without a matching detection; returns the new streak
    pub(crate) fn miss(&mut self) -> u32 {
        self.missing_streak += 1;
        self.state = TrackState::Missing;
        self.missing_streak
    }

    /// Transition to `Completed` and compute the summary fields
    pub(crate) fn complete(&mut self, fps: f64) {
        self.state = TrackState::Completed;
        self.total_duration = self.frame_span() as f64 / fps;
    }

    /// Number of frames from first to last sighting, inclusive
    pub fn frame_span(&self) -> u64 {
        self.last_seen_frame.saturating_sub(self.start_frame) + 1
    }

    /// Mean detector confidence over the gaze history
    pub fn avg_confidence(&self) -> f64 {
        if self.gaze_history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.gaze_history.iter().map(|g| g.confidence).sum();
        sum / self.gaze_history.len() as f64
    }

    /// Number of consecutive gaze records whose zone differs
    pub fn zone_transitions(&self) -> usize {
        self.gaze_history
            .windows(2)
            .filter(|pair| pair[0].zone != pair[1].zone)
            .count()
    }

    /// Top `n` zones by dwell time (ties broken by zone name)
    pub fn peak_interest_zones(&self, n: usize) -> Vec<(String, f64)> {
        let mut zones: Vec<(String, f64)> = self
            .zone_durations
            .iter()
            .map(|(zone, secs)| (zone.clone(), *secs))
            .collect();
        zones.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        zones.truncate(n);
        zones
    }

    /// Zone with the longest dwell time
    pub fn primary_zone(&self) -> Option<(String, f64)> {
        self.peak_interest_zones(1).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f64, zone: &str, confidence: f64) -> Detection {
        Detection::new(BoundingBox::new(x, 0.0, 10.0, 10.0), zone, confidence)
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-12);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        // Overlap 5x10 = 50, union 100 + 100 - 50 = 150
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-12);
        assert_eq!(a.iou(&b), b.iou(&a));
    }

    #[test]
    fn test_iou_touching_edges() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_detection_validation() {
        assert!(det(0.0, "A", 0.9).is_valid());
        assert!(!det(0.0, "A", 1.5).is_valid());
        assert!(!det(0.0, "A", -0.1).is_valid());
        assert!(!det(0.0, "A", f64::NAN).is_valid());

        let flat = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 0.0), "A", 0.9);
        assert!(flat.validation_error().unwrap().contains("degenerate"));
    }

    #[test]
    fn test_track_metrics() {
        let config = TrackerConfig::new().with_fps(10.0);
        let mut track = Track::open(7, &det(0.0, "A", 0.8), 1, &config);
        track.observe(&det(0.0, "A", 0.6), 2, &config);
        track.observe(&det(0.0, "B", 1.0), 3, &config);
        track.complete(config.fps);

        assert_eq!(track.state, TrackState::Completed);
        assert!((track.total_duration - 0.3).abs() < 1e-9);
        assert!((track.avg_confidence() - 0.8).abs() < 1e-9);
        assert_eq!(track.zone_transitions(), 1);
        assert_eq!(track.primary_zone().map(|(z, _)| z), Some("A".to_string()));
        assert_eq!(track.unique_zones.len(), 2);
    }

    #[test]
    fn test_detection_json_uses_box_field() {
        let json = r#"{"box":{"x":1.0,"y":2.0,"width":3.0,"height":4.0},"zone":"Entrance","confidence":0.5}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.bbox.height, 4.0);
        assert!(detection.pose.is_none());
    }

    #[test]
    fn test_track_state_display() {
        assert_eq!(format!("{}", TrackState::Missing), "MISSING");
    }
}
