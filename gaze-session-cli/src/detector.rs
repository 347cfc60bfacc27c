//! Detection input
//!
//! Reads recorded detector output (JSON Lines, one frame per line) and turns
//! it into tracker detections. Frames are never decoded here: each record
//! already carries the faces found in it.
//!
//! Line format:
//! ```text
//! {"frame": 12, "faces": [{"box": [x, y, w, h], "confidence": 0.91, "yaw": -12.5, "pitch": 3.0}]}
//! ```
//! A face may carry a `zone` label; unlabeled faces go through the zone mapper.

use crate::zones::{GazeContext, ZoneMapper};
use anyhow::{Context, Result};
use gaze_session_core::{BoundingBox, Detection, HeadPose};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One recorded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: u64,
    #[serde(default)]
    pub faces: Vec<RawFace>,
}

/// One face as recorded by the upstream detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFace {
    /// [x, y, width, height] in pixels
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
    pub confidence: f64,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub yaw: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
}

impl RawFace {
    fn bounding_box(&self) -> BoundingBox {
        let [x, y, width, height] = self.bbox;
        BoundingBox::new(x, y, width, height)
    }

    fn pose(&self) -> Option<HeadPose> {
        match (self.yaw, self.pitch) {
            (None, None) => None,
            (yaw, pitch) => Some(HeadPose {
                yaw: yaw.unwrap_or(0.0),
                pitch: pitch.unwrap_or(0.0),
            }),
        }
    }
}

/// Detection capability
///
/// Returns an empty list, never an error, when a frame has no faces.
pub trait Detector: Send {
    fn detect(&mut self, frame: &FrameRecord) -> Vec<Detection>;

    /// Release any resources held by the detector
    fn close(&mut self) {}
}

/// Detector that replays recorded faces
pub struct ReplayDetector {
    zone_mapper: Box<dyn ZoneMapper>,
    min_confidence: f64,
    frame_width: f64,
    frame_height: f64,
    frames_seen: u64,
}

impl ReplayDetector {
    pub fn new(
        zone_mapper: Box<dyn ZoneMapper>,
        min_confidence: f64,
        frame_width: f64,
        frame_height: f64,
    ) -> Self {
        Self {
            zone_mapper,
            min_confidence,
            frame_width,
            frame_height,
            frames_seen: 0,
        }
    }

    fn resolve_zone(&self, face: &RawFace) -> String {
        if let Some(zone) = &face.zone {
            return zone.clone();
        }

        let bbox = face.bounding_box();
        let (cx, cy) = bbox.center();
        let pose = face.pose().unwrap_or(HeadPose {
            yaw: 0.0,
            pitch: 0.0,
        });
        self.zone_mapper.map_to_zone(&GazeContext {
            yaw: pose.yaw,
            pitch: pose.pitch,
            face_center_x: cx,
            face_center_y: cy,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            confidence: face.confidence,
        })
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &FrameRecord) -> Vec<Detection> {
        self.frames_seen += 1;

        frame
            .faces
            .iter()
            .filter(|face| {
                let keep = face.confidence >= self.min_confidence;
                if !keep {
                    log::trace!(
                        "Frame {}: dropping face with confidence {:.2} < {:.2}",
                        frame.frame,
                        face.confidence,
                        self.min_confidence
                    );
                }
                keep
            })
            .map(|face| Detection {
                bbox: face.bounding_box(),
                zone: self.resolve_zone(face),
                confidence: face.confidence,
                pose: face.pose(),
            })
            .collect()
    }

    fn close(&mut self) {
        log::debug!("Replay detector closed after {} frame(s)", self.frames_seen);
    }
}

/// Open a detection log and iterate over its frames
pub fn read_frames(path: &Path) -> Result<impl Iterator<Item = Result<FrameRecord>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open detection log: {:?}", path))?;
    log::info!("Reading detections from {:?}", path);
    Ok(parse_frames(BufReader::new(file)))
}

/// Parse JSON Lines frame records
///
/// Blank lines are skipped. Lines that do not parse are logged and skipped;
/// read errors end up in the iterator.
pub fn parse_frames<R: BufRead>(reader: R) -> impl Iterator<Item = Result<FrameRecord>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line_no = index + 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e)
                        .context(format!("Failed to read detection log line {}", line_no))))
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }

            match serde_json::from_str::<FrameRecord>(trimmed) {
                Ok(record) => Some(Ok(record)),
                Err(e) => {
                    log::warn!("Skipping malformed detection log line {}: {}", line_no, e);
                    None
                }
            }
        })
}
