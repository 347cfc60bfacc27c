//! Processing pipeline
//!
//! Wires detector → tracker → event bus → analytics writer and drives frames
//! through them. Sessions leave the tracker only through the bus.

use crate::config::AppConfig;
use crate::detector::{Detector, FrameRecord};
use crate::registry;
use crate::sinks::{lock_writer, subscribe_writer, AnalyticsWriter, SharedWriter};
use anyhow::{Context, Result};
use gaze_session_core::{
    AggregateAnalytics, EventBus, EventPayload, FaceTracker, TrackerStats, AGGREGATE_READY,
    SESSION_COMPLETED,
};
use std::sync::{Arc, Mutex};

/// Progress is logged every this many processed frames
const PROGRESS_INTERVAL: u64 = 100;

pub struct Pipeline {
    detector: Box<dyn Detector>,
    tracker: FaceTracker,
    bus: Arc<EventBus>,
    writer: SharedWriter,
    frame_skip: u64,
    max_frames: Option<u64>,
    frames_read: u64,
    aggregate: Option<AggregateAnalytics>,
}

impl Pipeline {
    /// Build every component described by `config`
    ///
    /// `max_frames` caps the number of input frames read, skipped ones included.
    pub fn new(
        config: &AppConfig,
        writer: Box<dyn AnalyticsWriter>,
        max_frames: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;

        let detector = registry::build_detector(config)?;
        let bus = Arc::new(EventBus::new());
        let tracker = FaceTracker::new(config.tracker_config(), Arc::clone(&bus))
            .context("Failed to create face tracker")?;

        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        subscribe_writer(&bus, Arc::clone(&writer));
        bus.subscribe_fn(SESSION_COMPLETED, |_, payload| {
            if let Some(session) = payload.as_session() {
                log::info!(
                    "Visitor {} left after {:.1}s, primary zone: {}",
                    session.id,
                    session.total_duration,
                    session
                        .primary_zone()
                        .map(|(zone, _)| zone)
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        });

        log::debug!("Event types wired: {:?}", bus.list_event_types());

        Ok(Self {
            detector,
            tracker,
            bus,
            writer,
            frame_skip: u64::from(config.system.frame_skip),
            max_frames,
            frames_read: 0,
            aggregate: None,
        })
    }

    /// Feed one input frame
    ///
    /// Returns `false` once `max_frames` has been reached and the frame was
    /// not consumed.
    pub fn process_frame(&mut self, record: &FrameRecord) -> bool {
        if self.max_frames.is_some_and(|max| self.frames_read >= max) {
            return false;
        }

        let position = self.frames_read;
        self.frames_read += 1;
        if position % self.frame_skip != 0 {
            return true;
        }

        let detections = self.detector.detect(record);
        self.tracker.update(&detections, record.frame);

        let stats = self.tracker.stats();
        if stats.frames_processed % PROGRESS_INTERVAL == 0 {
            log::info!(
                "Processed {} frames: {} active, {} completed",
                stats.frames_processed,
                stats.active,
                stats.completed
            );
        }
        true
    }

    /// Drive every frame of `frames` through the pipeline, then finish
    ///
    /// A source error stops reading; sessions seen so far are still
    /// finalized and reported before the error is returned.
    pub fn run<I>(&mut self, frames: I) -> Result<AggregateAnalytics>
    where
        I: IntoIterator<Item = Result<FrameRecord>>,
    {
        let mut source_error = None;
        for frame in frames {
            match frame {
                Ok(record) => {
                    if !self.process_frame(&record) {
                        log::info!("Reached max frames limit ({})", self.frames_read);
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Frame source failed after {} frames: {:#}", self.frames_read, e);
                    source_error = Some(e);
                    break;
                }
            }
        }

        let aggregate = self.finish()?;
        match source_error {
            Some(e) => Err(e),
            None => Ok(aggregate),
        }
    }

    /// Finalize open sessions, publish the aggregate and close the outputs
    ///
    /// Idempotent: later calls return the aggregate computed by the first.
    pub fn finish(&mut self) -> Result<AggregateAnalytics> {
        if let Some(aggregate) = &self.aggregate {
            return Ok(aggregate.clone());
        }

        self.tracker.finalize_all_sessions();
        let aggregate = AggregateAnalytics::from_sessions(self.tracker.get_completed_sessions());
        self.aggregate = Some(aggregate.clone());

        let outcome = self
            .bus
            .publish(AGGREGATE_READY, &EventPayload::AggregateReady(aggregate.clone()));
        if outcome.failed > 0 {
            log::warn!("{} handler(s) failed while publishing {}", outcome.failed, AGGREGATE_READY);
        }

        self.detector.close();
        lock_writer(&self.writer)
            .close()
            .context("Failed to close analytics writer")?;

        log::info!(
            "Pipeline finished: {} frames read, {} processed, {} session(s)",
            self.frames_read,
            self.tracker.stats().frames_processed,
            aggregate.total_sessions
        );
        Ok(aggregate)
    }

    pub fn tracking_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.aggregate.is_none() {
            if let Err(e) = self.finish() {
                log::error!("Failed to finish pipeline on drop: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{parse_frames, RawFace};
    use gaze_session_core::Track;
    use std::io::Cursor;

    /// Records what reached the writer
    #[derive(Default)]
    struct Captured {
        sessions: Vec<Track>,
        aggregates: Vec<AggregateAnalytics>,
        closed: usize,
    }

    struct CapturingWriter(Arc<Mutex<Captured>>);

    impl AnalyticsWriter for CapturingWriter {
        fn write_session(&mut self, session: &Track) -> Result<()> {
            self.0.lock().unwrap().sessions.push(session.clone());
            Ok(())
        }
        fn write_aggregate(&mut self, aggregate: &AggregateAnalytics) -> Result<()> {
            self.0.lock().unwrap().aggregates.push(aggregate.clone());
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.0.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    fn pipeline(config: &AppConfig, max_frames: Option<u64>) -> (Pipeline, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let writer = Box::new(CapturingWriter(Arc::clone(&captured)));
        (Pipeline::new(config, writer, max_frames).unwrap(), captured)
    }

    fn frame(index: u64, faces: usize) -> FrameRecord {
        FrameRecord {
            frame: index,
            faces: (0..faces)
                .map(|i| RawFace {
                    bbox: [i as f64 * 300.0, 0.0, 100.0, 100.0],
                    confidence: 0.9,
                    zone: Some("Cake_Display".to_string()),
                    yaw: None,
                    pitch: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_run_reports_sessions_and_aggregate() {
        let (mut pipeline, captured) = pipeline(&AppConfig::default(), None);
        let frames = (0..30).map(|i| Ok(frame(i, 2)));

        let aggregate = pipeline.run(frames).unwrap();
        assert_eq!(aggregate.total_sessions, 2);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.sessions.len(), 2);
        assert_eq!(captured.aggregates, vec![aggregate]);
        assert_eq!(captured.closed, 1);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (mut pipeline, captured) = pipeline(&AppConfig::default(), None);
        pipeline.process_frame(&frame(0, 1));

        let first = pipeline.finish().unwrap();
        let second = pipeline.finish().unwrap();
        assert_eq!(first, second);
        drop(pipeline);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.aggregates.len(), 1);
        assert_eq!(captured.closed, 1);
    }

    #[test]
    fn test_frame_skip_and_max_frames() {
        let mut config = AppConfig::default();
        config.system.frame_skip = 3;
        let (mut pipeline, _captured) = pipeline(&config, Some(10));

        pipeline.run((0..50).map(|i| Ok(frame(i, 1)))).unwrap();
        assert_eq!(pipeline.frames_read(), 10);
        // positions 0, 3, 6, 9
        assert_eq!(pipeline.tracking_stats().frames_processed, 4);
    }

    #[test]
    fn test_frame_skip_keeps_dwell_in_step_with_duration() {
        let mut config = AppConfig::default();
        config.system.frame_skip = 3;
        let (mut pipeline, captured) = pipeline(&config, None);

        pipeline.run((0..30).map(|i| Ok(frame(i, 1)))).unwrap();

        let captured = captured.lock().unwrap();
        let session = &captured.sessions[0];
        let dwell: f64 = session.zone_durations.values().sum();
        // Within one processed frame's worth of source frames
        let tolerance = 3.0 / config.system.fps;
        assert!(
            (dwell - session.total_duration).abs() <= tolerance,
            "dwell {} vs duration {}",
            dwell,
            session.total_duration
        );
    }

    #[test]
    fn test_source_error_still_finalizes() {
        let (mut pipeline, captured) = pipeline(&AppConfig::default(), None);
        let frames = (0..5)
            .map(|i| Ok(frame(i, 1)))
            .chain(std::iter::once(Err(anyhow::anyhow!("disk unplugged"))));

        assert!(pipeline.run(frames).is_err());

        let captured = captured.lock().unwrap();
        assert_eq!(captured.sessions.len(), 1);
        assert_eq!(captured.aggregates.len(), 1);
        assert_eq!(pipeline.tracking_stats().active, 0);
    }

    #[test]
    fn test_drop_finishes_pipeline() {
        let (mut pipeline, captured) = pipeline(&AppConfig::default(), None);
        pipeline.process_frame(&frame(0, 1));
        drop(pipeline);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.sessions.len(), 1);
        assert_eq!(captured.closed, 1);
    }

    #[test]
    fn test_run_from_detection_log() {
        let log = concat!(
            "{\"frame\": 0, \"faces\": [{\"box\": [0, 0, 100, 100], \"confidence\": 0.9, \"zone\": \"Till\"}]}\n",
            "{\"frame\": 1, \"faces\": [{\"box\": [2, 0, 100, 100], \"confidence\": 0.9, \"zone\": \"Till\"}]}\n",
        );
        let (mut pipeline, captured) = pipeline(&AppConfig::default(), None);

        let aggregate = pipeline.run(parse_frames(Cursor::new(log))).unwrap();
        assert_eq!(aggregate.total_sessions, 1);
        assert_eq!(captured.lock().unwrap().sessions[0].gaze_history.len(), 2);
    }

    #[test]
    fn test_unknown_detector_is_rejected() {
        let mut config = AppConfig::default();
        config.detection.detector_type = "webcam".to_string();
        let writer = Box::new(CapturingWriter(Arc::default()));
        assert!(Pipeline::new(&config, writer, None).is_err());
    }
}
