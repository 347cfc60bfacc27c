//! Gaze Session Core Library
//!
//! Turns a noisy stream of per-frame face detections into stable sessions:
//! one record per real-world visit, with per-zone dwell time, a gaze history
//! and a finalized duration.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on association and
//! session lifecycle:
//! - `FaceTracker` matches detections to open tracks by IoU, frame by frame
//! - Tracks survive a configurable grace period of missed frames
//! - Completed sessions are announced on an `EventBus`
//! - `AggregateAnalytics` summarizes a run's completed sessions
//!
//! The library does NOT:
//! - Detect faces or estimate head pose
//! - Map gaze to zones (detections arrive with a zone label)
//! - Persist sessions or render anything
//! - Spawn threads
//!
//! All of that lives in the application layer (gaze-session-cli).
//!
//! # Example Usage
//!
//! ```
//! use gaze_session_core::{
//!     BoundingBox, Detection, EventBus, EventPayload, FaceTracker, TrackerConfig,
//!     SESSION_COMPLETED,
//! };
//! use std::sync::Arc;
//!
//! let bus = Arc::new(EventBus::new());
//! bus.subscribe_fn(SESSION_COMPLETED, |_, payload: &EventPayload| {
//!     if let Some(session) = payload.as_session() {
//!         println!("session {} lasted {:.2}s", session.id, session.total_duration);
//!     }
//!     Ok(())
//! });
//!
//! let config = TrackerConfig::new().with_fps(30.0).with_missing_grace(10);
//! let mut tracker = FaceTracker::new(config, Arc::clone(&bus)).unwrap();
//!
//! let face = Detection::new(BoundingBox::new(100.0, 80.0, 64.0, 64.0), "Cake_Display", 0.92);
//! for frame in 0..30 {
//!     tracker.update(&[face.clone()], frame);
//! }
//! tracker.finalize_all_sessions();
//!
//! assert_eq!(tracker.get_completed_sessions().len(), 1);
//! ```

// Public modules
pub mod analytics;
pub mod config;
pub mod event_bus;
pub mod tracker;
pub mod types;

// Re-export main types for convenience
pub use analytics::{AggregateAnalytics, SessionAnalytics};
pub use config::TrackerConfig;
pub use event_bus::{
    EventBus, EventPayload, Handler, HandlerError, HandlerResult, PublishOutcome,
    AGGREGATE_READY, SESSION_COMPLETED,
};
pub use tracker::{FaceTracker, TrackerStats};
pub use types::{
    BoundingBox, Detection, GazeRecord, HeadPose, Result, Track, TrackId, TrackState,
    TrackerError, UNKNOWN_ZONE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
