//! Face tracker: frame-to-frame association and session lifecycle
//!
//! The tracker turns per-frame detections into sessions. Each call to
//! [`FaceTracker::update`] processes one frame:
//! 1. Score every open track against every valid detection by IoU
//! 2. Greedily accept the best-scoring (track, detection) pairs above the threshold
//! 3. Extend matched tracks with the frame's observation
//! 4. Age unmatched tracks and complete those whose grace period ran out
//! 5. Open new tracks for the detections nobody claimed
//!
//! Completed sessions are appended to the completed sequence and announced on
//! the event bus as `session_completed`.

use crate::config::TrackerConfig;
use crate::event_bus::{EventBus, EventPayload, SESSION_COMPLETED};
use crate::types::{Detection, Result, Track, TrackId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters describing the tracker's state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Tracks currently open (ACTIVE or MISSING)
    pub active: usize,
    /// Sessions completed so far
    pub completed: usize,
    /// Tracks dropped for being shorter than the minimum session duration
    pub discarded: usize,
    /// Tracks ever opened
    pub total_tracked: usize,
    /// Calls to `update`
    pub frames_processed: u64,
}

/// A scored (track, detection) candidate for assignment
#[derive(Debug, Clone, Copy)]
struct Candidate {
    track_id: TrackId,
    detection_index: usize,
    iou: f64,
}

/// Greedy IoU tracker producing one session per visit
pub struct FaceTracker {
    config: TrackerConfig,
    bus: Arc<EventBus>,
    /// Open tracks keyed by id; iteration order is ascending id
    active: BTreeMap<TrackId, Track>,
    /// Finalized sessions in completion order
    completed: Vec<Track>,
    next_id: TrackId,
    discarded: usize,
    frames_processed: u64,
    last_frame: Option<u64>,
}

impl FaceTracker {
    /// Create a tracker publishing completed sessions on `bus`
    ///
    /// # Errors
    /// Returns `TrackerError::InvalidConfig` if the configuration is unusable
    /// (for example a non-positive `fps`).
    ///
    /// # Example
    /// ```
    /// use gaze_session_core::{EventBus, FaceTracker, TrackerConfig};
    /// use std::sync::Arc;
    ///
    /// let bus = Arc::new(EventBus::new());
    /// let tracker = FaceTracker::new(TrackerConfig::new().with_fps(25.0), bus).unwrap();
    /// assert!(tracker.get_active_faces().is_empty());
    /// ```
    pub fn new(config: TrackerConfig, bus: Arc<EventBus>) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Face tracker created: match_threshold={}, missing_grace={}, fps={}",
            config.match_threshold,
            config.missing_grace,
            config.fps
        );

        Ok(Self {
            config,
            bus,
            active: BTreeMap::new(),
            completed: Vec::new(),
            next_id: 0,
            discarded: 0,
            frames_processed: 0,
            last_frame: None,
        })
    }

    /// Process the detections of one frame
    ///
    /// Must be called once per processed frame with a strictly increasing
    /// `frame_index`. A non-increasing index is logged and processed anyway;
    /// durations computed from such a stream are not meaningful.
    pub fn update(&mut self, detections: &[Detection], frame_index: u64) {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                log::warn!(
                    "Frame index {} is not greater than previous frame {}; durations may be inaccurate",
                    frame_index,
                    last
                );
            }
        }
        self.last_frame = Some(frame_index);
        self.frames_processed += 1;

        let valid: Vec<bool> = detections
            .iter()
            .enumerate()
            .map(|(index, detection)| match detection.validation_error() {
                Some(reason) => {
                    log::warn!(
                        "Skipping detection {} in frame {}: {}",
                        index,
                        frame_index,
                        reason
                    );
                    false
                }
                None => true,
            })
            .collect();

        let assignments = self.assign(detections, &valid);

        // Matched tracks
        let mut claimed = vec![false; detections.len()];
        for (&track_id, &detection_index) in &assignments {
            claimed[detection_index] = true;
            if let Some(track) = self.active.get_mut(&track_id) {
                track.observe(&detections[detection_index], frame_index, &self.config);
            }
        }

        // Unmatched tracks: age them, then complete the expired ones in id order
        let grace = self.config.missing_grace;
        let mut expired = Vec::new();
        for (&track_id, track) in self.active.iter_mut() {
            if assignments.contains_key(&track_id) {
                continue;
            }
            let streak = track.miss();
            log::debug!(
                "Track {} missing in frame {} (streak {}/{})",
                track_id,
                frame_index,
                streak,
                grace
            );
            if self.config.grace_exhausted(streak) {
                expired.push(track_id);
            }
        }
        for track_id in expired {
            if let Some(track) = self.active.remove(&track_id) {
                self.finalize(track);
            }
        }

        // Unclaimed valid detections open new tracks
        for (index, detection) in detections.iter().enumerate() {
            if !valid[index] || claimed[index] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            log::debug!(
                "Opening track {} in frame {} (zone '{}')",
                id,
                frame_index,
                detection.zone
            );
            self.active
                .insert(id, Track::open(id, detection, frame_index, &self.config));
        }
    }

    /// Greedy assignment of detections to open tracks
    ///
    /// Candidates are ranked by IoU (highest first), then by track id, then by
    /// detection index. Each accepted pair removes its track and detection
    /// from further consideration. Returns track id → detection index.
    fn assign(&self, detections: &[Detection], valid: &[bool]) -> BTreeMap<TrackId, usize> {
        let threshold = self.config.match_threshold;
        let mut candidates = Vec::new();

        for (&track_id, track) in &self.active {
            for (detection_index, detection) in detections.iter().enumerate() {
                if !valid[detection_index] {
                    continue;
                }
                let iou = track.bbox.iou(&detection.bbox);
                log::trace!(
                    "IoU track {} / detection {}: {:.4}",
                    track_id,
                    detection_index,
                    iou
                );
                if iou >= threshold {
                    candidates.push(Candidate {
                        track_id,
                        detection_index,
                        iou,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.iou
                .total_cmp(&a.iou)
                .then_with(|| a.track_id.cmp(&b.track_id))
                .then_with(|| a.detection_index.cmp(&b.detection_index))
        });

        let mut assignments = BTreeMap::new();
        let mut taken = vec![false; detections.len()];
        for candidate in candidates {
            if assignments.contains_key(&candidate.track_id) || taken[candidate.detection_index] {
                continue;
            }
            taken[candidate.detection_index] = true;
            assignments.insert(candidate.track_id, candidate.detection_index);
        }

        assignments
    }

    /// Complete every open track, in ascending id order
    ///
    /// Call on every shutdown path so in-flight sessions are not lost.
    /// Calling it again with nothing open is a no-op.
    pub fn finalize_all_sessions(&mut self) {
        if self.active.is_empty() {
            log::debug!("finalize_all_sessions: no open tracks");
            return;
        }

        log::info!("Finalizing {} open track(s)", self.active.len());
        let open = std::mem::take(&mut self.active);
        for (_, track) in open {
            self.finalize(track);
        }
    }

    /// Complete a track that has already left `active`
    fn finalize(&mut self, mut track: Track) {
        track.complete(self.config.fps);

        if self.is_below_minimum(&track) {
            self.discarded += 1;
            log::debug!(
                "Discarding track {}: {:.2}s with {} observation(s) is below the minimum session",
                track.id,
                track.total_duration,
                track.gaze_history.len()
            );
            return;
        }

        log::info!(
            "Session {} completed: frames {}..={}, {:.2}s, zones {:?}",
            track.id,
            track.start_frame,
            track.last_seen_frame,
            track.total_duration,
            track.unique_zones
        );

        self.completed.push(track.clone());
        let outcome = self
            .bus
            .publish(SESSION_COMPLETED, &EventPayload::SessionCompleted(track));
        if outcome.failed > 0 {
            log::warn!(
                "{} handler(s) failed while publishing {}",
                outcome.failed,
                SESSION_COMPLETED
            );
        }
    }

    fn is_below_minimum(&self, track: &Track) -> bool {
        let minimum = self.config.min_session_duration;
        if minimum <= 0.0 {
            return false;
        }
        track.total_duration < minimum || track.gaze_history.len() < 2
    }

    /// Snapshot of the open tracks, in ascending id order
    pub fn get_active_faces(&self) -> Vec<Track> {
        self.active.values().cloned().collect()
    }

    /// Look up a single open track
    pub fn get_active_face(&self, id: TrackId) -> Option<&Track> {
        self.active.get(&id)
    }

    /// Completed sessions in completion order
    pub fn get_completed_sessions(&self) -> &[Track] {
        &self.completed
    }

    /// Give up the tracker, returning ownership of the completed sessions
    pub fn into_completed_sessions(self) -> Vec<Track> {
        self.completed
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            active: self.active.len(),
            completed: self.completed.len(),
            discarded: self.discarded,
            total_tracked: self.next_id as usize,
            frames_processed: self.frames_processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, TrackState, TrackerError};

    fn tracker(grace: u32) -> FaceTracker {
        let config = TrackerConfig::new()
            .with_fps(10.0)
            .with_missing_grace(grace)
            .with_match_threshold(0.3);
        FaceTracker::new(config, Arc::new(EventBus::new())).unwrap()
    }

    fn face_at(x: f64, zone: &str) -> Detection {
        Detection::new(BoundingBox::new(x, 50.0, 40.0, 40.0), zone, 0.9)
    }

    #[test]
    fn test_rejects_invalid_fps() {
        let result = FaceTracker::new(
            TrackerConfig::new().with_fps(0.0),
            Arc::new(EventBus::new()),
        );
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_detection_opens_track() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A")], 1);

        let active = t.get_active_faces();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 0);
        assert_eq!(active[0].state, TrackState::Active);
        assert_eq!(active[0].start_frame, 1);
        assert_eq!(active[0].gaze_history.len(), 1);
        assert!((active[0].zone_durations["A"] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_missing_state_before_expiry() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A")], 1);
        t.update(&[], 2);

        let track = t.get_active_face(0).unwrap();
        assert_eq!(track.state, TrackState::Missing);
        assert_eq!(track.missing_streak, 1);
        assert_eq!(track.last_seen_frame, 1);
    }

    #[test]
    fn test_greedy_prefers_highest_iou() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A"), face_at(100.0, "B")], 1);

        // Detection 0 overlaps track 1 far better than track 0
        t.update(&[face_at(90.0, "B2"), face_at(5.0, "A2")], 2);

        let a = t.get_active_face(0).unwrap();
        let b = t.get_active_face(1).unwrap();
        assert_eq!(a.gaze_history.last().unwrap().zone, "A2");
        assert_eq!(b.gaze_history.last().unwrap().zone, "B2");
        assert_eq!(t.stats().total_tracked, 2);
    }

    #[test]
    fn test_tie_breaks_by_track_id() {
        let mut t = tracker(3);
        // Two identical boxes open tracks 0 and 1
        t.update(&[face_at(0.0, "A"), face_at(0.0, "B")], 1);
        // A single identical detection goes to the lower track id
        t.update(&[face_at(0.0, "C")], 2);

        assert_eq!(t.get_active_face(0).unwrap().state, TrackState::Active);
        assert_eq!(t.get_active_face(1).unwrap().state, TrackState::Missing);
    }

    #[test]
    fn test_tie_breaks_by_detection_index() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A")], 1);
        // Two identical detections for one track: the lower index wins
        t.update(&[face_at(0.0, "X"), face_at(0.0, "Y")], 2);

        let first = t.get_active_face(0).unwrap();
        assert_eq!(first.gaze_history.last().unwrap().zone, "X");
        let second = t.get_active_face(1).unwrap();
        assert_eq!(second.start_frame, 2);
        assert_eq!(second.gaze_history[0].zone, "Y");
        assert_eq!(t.stats().total_tracked, 2);
    }

    #[test]
    fn test_frame_stride_counts_source_frames() {
        let config = TrackerConfig::new()
            .with_fps(30.0)
            .with_missing_grace(6)
            .with_frame_stride(3);
        let mut t = FaceTracker::new(config, Arc::new(EventBus::new())).unwrap();

        for frame in (0..30).step_by(3) {
            t.update(&[face_at(0.0, "A")], frame);
        }
        // Two missed updates cover six source frames
        t.update(&[], 30);
        assert_eq!(t.get_active_faces().len(), 1);
        t.update(&[], 33);

        let sessions = t.get_completed_sessions();
        assert_eq!(sessions.len(), 1);
        assert!((sessions[0].zone_durations["A"] - 1.0).abs() < 1e-9);
        assert!((sessions[0].total_duration - 28.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_detection_is_skipped() {
        let mut t = tracker(3);
        let degenerate = Detection::new(BoundingBox::new(0.0, 0.0, 0.0, 10.0), "A", 0.9);
        let overconfident = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "A", 2.0);
        t.update(&[degenerate, overconfident, face_at(200.0, "B")], 1);

        let active = t.get_active_faces();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].unique_zones.iter().next().map(String::as_str), Some("B"));
    }

    #[test]
    fn test_min_session_duration_discards_short_tracks() {
        let config = TrackerConfig::new()
            .with_fps(10.0)
            .with_missing_grace(1)
            .with_min_session_duration(0.5);
        let mut t = FaceTracker::new(config, Arc::new(EventBus::new())).unwrap();

        t.update(&[face_at(0.0, "A")], 1);
        t.update(&[], 2);

        assert!(t.get_completed_sessions().is_empty());
        assert!(t.get_active_faces().is_empty());
        assert_eq!(t.stats().discarded, 1);
    }

    #[test]
    fn test_non_increasing_frame_is_tolerated() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A")], 5);
        t.update(&[face_at(0.0, "A")], 5);

        assert_eq!(t.stats().frames_processed, 2);
        assert_eq!(t.get_active_faces().len(), 1);
    }

    #[test]
    fn test_zero_grace_completes_on_first_miss() {
        let mut t = tracker(0);
        t.update(&[face_at(0.0, "A")], 1);
        t.update(&[], 2);

        assert_eq!(t.get_completed_sessions().len(), 1);
        assert!((t.get_completed_sessions()[0].total_duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_into_completed_sessions() {
        let mut t = tracker(3);
        t.update(&[face_at(0.0, "A")], 1);
        t.finalize_all_sessions();

        let sessions = t.into_completed_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, TrackState::Completed);
    }
}
