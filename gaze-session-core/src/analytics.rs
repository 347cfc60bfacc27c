//! Session and aggregate analytics
//!
//! Pure computations over completed sessions. The tracker never calls into
//! this module; the application runs it on the completed sequence at shutdown
//! and hands the result to sinks.

use crate::types::Track;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Duration (seconds) at which the duration factor of the engagement score saturates
const ENGAGEMENT_FULL_DURATION: f64 = 60.0;
/// Zone count at which the exploration factor saturates
const ENGAGEMENT_FULL_ZONES: f64 = 5.0;
/// Number of zones reported as conversion zones
const CONVERSION_ZONE_COUNT: usize = 3;

/// Derived analytics for one completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub session_id: u64,
    pub duration: f64,
    pub zones_visited: usize,
    pub zone_transitions: usize,
    pub avg_confidence: f64,
    pub primary_zone: Option<String>,
    pub primary_zone_duration: f64,
    /// Share of the session's total duration spent in each zone, in percent
    pub zone_shares: BTreeMap<String, f64>,
    pub engagement_score: f64,
    pub path_complexity: f64,
}

impl SessionAnalytics {
    pub fn from_session(session: &Track) -> Self {
        let (primary_zone, primary_zone_duration) = match session.primary_zone() {
            Some((zone, secs)) => (Some(zone), secs),
            None => (None, 0.0),
        };
        let zones_visited = session.unique_zones.len();
        let zone_transitions = session.zone_transitions();

        let zone_shares = session
            .zone_durations
            .iter()
            .map(|(zone, secs)| {
                let share = if session.total_duration > 0.0 {
                    secs / session.total_duration * 100.0
                } else {
                    0.0
                };
                (zone.clone(), share)
            })
            .collect();

        Self {
            session_id: session.id,
            duration: session.total_duration,
            zones_visited,
            zone_transitions,
            avg_confidence: session.avg_confidence(),
            primary_zone,
            primary_zone_duration,
            zone_shares,
            engagement_score: engagement_score(session),
            path_complexity: zone_transitions as f64 / zones_visited.max(1) as f64,
        }
    }
}

/// Engagement score in [0, 1]
///
/// Weighted sum of session length, zone exploration, detector confidence
/// and how concentrated the dwell time was in a single zone.
pub fn engagement_score(session: &Track) -> f64 {
    let duration_factor = (session.total_duration / ENGAGEMENT_FULL_DURATION).min(1.0);
    let exploration_factor = (session.unique_zones.len() as f64 / ENGAGEMENT_FULL_ZONES).min(1.0);
    let confidence_factor = session.avg_confidence();

    let concentration_factor = match session.primary_zone() {
        Some((_, secs)) if session.total_duration > 0.0 => {
            (secs / session.total_duration).min(1.0)
        }
        _ => 0.0,
    };

    duration_factor * 0.3
        + exploration_factor * 0.2
        + confidence_factor * 0.2
        + concentration_factor * 0.3
}

/// Aggregate analytics across all completed sessions of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateAnalytics {
    pub total_sessions: usize,
    pub total_time_tracked: f64,
    pub avg_session_duration: f64,
    /// Summed dwell seconds per zone across sessions
    pub zone_popularity: BTreeMap<String, f64>,
    /// Mean dwell seconds per zone, over the sessions that visited it
    pub avg_zone_duration: BTreeMap<String, f64>,
    pub avg_zones_per_session: f64,
    pub avg_engagement_score: f64,
    /// Zones with the most total dwell time, longest first
    pub conversion_zones: Vec<String>,
}

impl AggregateAnalytics {
    /// Summarize sessions in completion order
    pub fn from_sessions(sessions: &[Track]) -> Self {
        if sessions.is_empty() {
            return Self::default();
        }

        let count = sessions.len() as f64;
        let total_time: f64 = sessions.iter().map(|s| s.total_duration).sum();

        let mut zone_popularity: BTreeMap<String, f64> = BTreeMap::new();
        let mut zone_visits: BTreeMap<String, usize> = BTreeMap::new();
        for session in sessions {
            for (zone, secs) in &session.zone_durations {
                *zone_popularity.entry(zone.clone()).or_insert(0.0) += secs;
                *zone_visits.entry(zone.clone()).or_insert(0) += 1;
            }
        }

        let avg_zone_duration = zone_popularity
            .iter()
            .map(|(zone, total)| {
                let visits = zone_visits.get(zone).copied().unwrap_or(1).max(1);
                (zone.clone(), total / visits as f64)
            })
            .collect();

        let mut ranked: Vec<(&String, &f64)> = zone_popularity.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let conversion_zones = ranked
            .into_iter()
            .take(CONVERSION_ZONE_COUNT)
            .map(|(zone, _)| zone.clone())
            .collect();

        let zones_sum: usize = sessions.iter().map(|s| s.unique_zones.len()).sum();
        let engagement_sum: f64 = sessions.iter().map(engagement_score).sum();

        Self {
            total_sessions: sessions.len(),
            total_time_tracked: total_time,
            avg_session_duration: total_time / count,
            zone_popularity,
            avg_zone_duration,
            avg_zones_per_session: zones_sum as f64 / count,
            avg_engagement_score: engagement_sum / count,
            conversion_zones,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::types::{BoundingBox, Detection};

    fn session(id: u64, zones: &[&str], fps: f64) -> Track {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let config = TrackerConfig::new().with_fps(fps);
        let mut track = Track::open(id, &Detection::new(bbox, zones[0], 1.0), 0, &config);
        for (i, zone) in zones.iter().enumerate().skip(1) {
            track.observe(&Detection::new(bbox, *zone, 1.0), i as u64, &config);
        }
        track.complete(fps);
        track
    }

    #[test]
    fn test_empty_aggregate() {
        let aggregate = AggregateAnalytics::from_sessions(&[]);
        assert_eq!(aggregate.total_sessions, 0);
        assert_eq!(aggregate.avg_session_duration, 0.0);
        assert!(aggregate.zone_popularity.is_empty());
    }

    #[test]
    fn test_aggregate_zone_averages() {
        // Session 0: 2 frames in A. Session 1: 4 frames in A, 2 frames in B.
        let sessions = vec![
            session(0, &["A", "A"], 2.0),
            session(1, &["A", "A", "A", "A", "B", "B"], 2.0),
        ];
        let aggregate = AggregateAnalytics::from_sessions(&sessions);

        assert_eq!(aggregate.total_sessions, 2);
        assert!((aggregate.total_time_tracked - 4.0).abs() < 1e-9);
        assert!((aggregate.avg_session_duration - 2.0).abs() < 1e-9);
        assert!((aggregate.zone_popularity["A"] - 3.0).abs() < 1e-9);
        assert!((aggregate.avg_zone_duration["A"] - 1.5).abs() < 1e-9);
        assert!((aggregate.avg_zone_duration["B"] - 1.0).abs() < 1e-9);
        assert!((aggregate.avg_zones_per_session - 1.5).abs() < 1e-9);
        assert_eq!(aggregate.conversion_zones, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_session_analytics() {
        let s = session(3, &["A", "B", "B", "A"], 1.0);
        let analytics = SessionAnalytics::from_session(&s);

        assert_eq!(analytics.session_id, 3);
        assert_eq!(analytics.zones_visited, 2);
        assert_eq!(analytics.zone_transitions, 2);
        assert!((analytics.path_complexity - 1.0).abs() < 1e-9);
        assert!((analytics.zone_shares["A"] - 50.0).abs() < 1e-9);
        // Equal dwell: primary zone falls back to name order
        assert_eq!(analytics.primary_zone.as_deref(), Some("A"));
        assert!(analytics.engagement_score > 0.0 && analytics.engagement_score <= 1.0);
    }
}
