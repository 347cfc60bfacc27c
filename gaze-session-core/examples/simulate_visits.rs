//! Simulated bakery visits
//!
//! Drives the tracker with synthetic detections: a few visitors walk in,
//! look at different displays, briefly drop out of view and leave.
//! Completed sessions and the final aggregate are printed as they arrive.
//!
//! Usage:
//!   cargo run --example simulate_visits [frames]
//!
//! Example:
//!   cargo run --example simulate_visits 600

use gaze_session_core::{
    AggregateAnalytics, BoundingBox, Detection, EventBus, EventPayload, FaceTracker,
    TrackerConfig, SESSION_COMPLETED,
};
use std::env;
use std::sync::Arc;

/// One synthetic visitor
struct Visitor {
    enter: u64,
    leave: u64,
    x: f64,
    zones: &'static [&'static str],
    /// Frames where the detector misses this visitor
    dropout: Option<(u64, u64)>,
}

impl Visitor {
    fn detection(&self, frame: u64) -> Option<Detection> {
        if frame < self.enter || frame > self.leave {
            return None;
        }
        if let Some((from, to)) = self.dropout {
            if (from..=to).contains(&frame) {
                return None;
            }
        }

        let progress = (frame - self.enter) as f64 / (self.leave - self.enter + 1) as f64;
        let zone = self.zones[(progress * self.zones.len() as f64) as usize];
        // slow drift to the right
        let x = self.x + progress * 40.0;
        Some(
            Detection::new(BoundingBox::new(x, 200.0, 90.0, 90.0), zone, 0.85)
                .with_pose(progress * 60.0 - 30.0, 0.0),
        )
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let frames: u64 = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 450,
    };

    let visitors = [
        Visitor {
            enter: 0,
            leave: 180,
            x: 50.0,
            zones: &["Entrance", "Cake_Display", "Cookie_Shelves"],
            dropout: Some((60, 70)),
        },
        Visitor {
            enter: 90,
            leave: 400,
            x: 600.0,
            zones: &["Cookie_Shelves", "Right_sandwich_and_bread_shelves"],
            dropout: None,
        },
        Visitor {
            enter: 250,
            leave: 600,
            x: 1000.0,
            zones: &["Cake_Display"],
            dropout: Some((300, 330)),
        },
    ];

    let bus = Arc::new(EventBus::new());
    bus.subscribe_fn(SESSION_COMPLETED, |_, payload: &EventPayload| {
        if let Some(session) = payload.as_session() {
            println!(
                "Session {:>2}: frames {:>4}..={:<4} {:>6.2}s  zones: {}",
                session.id,
                session.start_frame,
                session.last_seen_frame,
                session.total_duration,
                session.unique_zones.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(())
    });

    let config = TrackerConfig::new().with_fps(30.0).with_missing_grace(20);
    let mut tracker = FaceTracker::new(config, Arc::clone(&bus))?;

    println!("Simulating {} frames with {} visitors\n", frames, visitors.len());
    for frame in 0..frames {
        let detections: Vec<Detection> = visitors
            .iter()
            .filter_map(|visitor| visitor.detection(frame))
            .collect();
        tracker.update(&detections, frame);
    }
    tracker.finalize_all_sessions();

    let aggregate = AggregateAnalytics::from_sessions(tracker.get_completed_sessions());
    println!("\n{}", serde_json::to_string_pretty(&aggregate)?);

    let stats = tracker.stats();
    println!(
        "\nTracked {} face(s) over {} frame(s), {} session(s) completed",
        stats.total_tracked, stats.frames_processed, stats.completed
    );
    Ok(())
}
