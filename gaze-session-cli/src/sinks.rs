//! Analytics sinks
//!
//! Writers receive completed sessions and the final aggregate through the
//! event bus. `subscribe_writer` wires a writer to the bus; the tracker never
//! sees writer types.

use crate::config::AnalyticsConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use gaze_session_core::{
    AggregateAnalytics, EventBus, EventPayload, Handler, SessionAnalytics, Track,
    AGGREGATE_READY, SESSION_COMPLETED,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Output capability for analytics
pub trait AnalyticsWriter: Send {
    fn write_session(&mut self, session: &Track) -> Result<()>;
    fn write_aggregate(&mut self, aggregate: &AggregateAnalytics) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// A writer shared between the bus handlers and the pipeline
pub type SharedWriter = Arc<Mutex<Box<dyn AnalyticsWriter>>>;

/// Subscribe `writer` to session and aggregate events
///
/// Returns the handler handles in case the caller wants to unsubscribe.
pub fn subscribe_writer(bus: &EventBus, writer: SharedWriter) -> Vec<Handler> {
    let session_writer = Arc::clone(&writer);
    let on_session = bus.subscribe_fn(SESSION_COMPLETED, move |_, payload| {
        if let Some(session) = payload.as_session() {
            lock_writer(&session_writer).write_session(session)?;
        }
        Ok(())
    });

    let on_aggregate = bus.subscribe_fn(AGGREGATE_READY, move |_, payload: &EventPayload| {
        if let Some(aggregate) = payload.as_aggregate() {
            lock_writer(&writer).write_aggregate(aggregate)?;
        }
        Ok(())
    });

    vec![on_session, on_aggregate]
}

/// Lock a shared writer, recovering from a poisoned lock
pub fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, Box<dyn AnalyticsWriter>> {
    writer.lock().unwrap_or_else(|e| e.into_inner())
}

/// Build the writer described by `[analytics]`
///
/// Falls back to a console writer when every output is disabled.
pub fn build_writer(config: &AnalyticsConfig) -> Result<Box<dyn AnalyticsWriter>> {
    let mut writers: Vec<Box<dyn AnalyticsWriter>> = Vec::new();

    if config.console_output {
        writers.push(Box::new(ConsoleWriter::stdout(config.verbose)));
    }
    if config.json_output {
        writers.push(Box::new(JsonWriter::new(&config.json_output_dir)?));
    }

    let writer: Box<dyn AnalyticsWriter> = match writers.len() {
        0 => Box::new(ConsoleWriter::stdout(config.verbose)),
        1 => writers.remove(0),
        _ => Box::new(CompositeWriter::new(writers)),
    };
    Ok(writer)
}

// ============================================================================
// Console
// ============================================================================

/// Human-readable report
pub struct ConsoleWriter<W: Write + Send = io::Stdout> {
    out: W,
    verbose: bool,
    session_count: usize,
}

impl ConsoleWriter<io::Stdout> {
    pub fn stdout(verbose: bool) -> Self {
        Self::new(io::stdout(), verbose)
    }
}

impl<W: Write + Send> ConsoleWriter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            session_count: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> AnalyticsWriter for ConsoleWriter<W> {
    fn write_session(&mut self, session: &Track) -> Result<()> {
        self.session_count += 1;
        let out = &mut self.out;

        writeln!(out, "\n{}", "═".repeat(60))?;
        writeln!(out, "SESSION COMPLETED - ID: {}", session.id)?;
        writeln!(out, "{}", "═".repeat(60))?;
        writeln!(out, "Total Duration: {:.2} seconds", session.total_duration)?;
        writeln!(out, "Frames: {} to {}", session.start_frame, session.last_seen_frame)?;
        writeln!(out, "Average Confidence: {:.2}", session.avg_confidence())?;
        writeln!(
            out,
            "Zones Visited: {}",
            session.unique_zones.iter().cloned().collect::<Vec<_>>().join(", ")
        )?;

        if session.total_duration > 0.0 {
            writeln!(out, "\nTime Spent in Each Zone:")?;
            for (zone, secs) in session.peak_interest_zones(usize::MAX) {
                let share = secs / session.total_duration * 100.0;
                writeln!(out, "  {}: {:.2}s ({:.1}%)", zone, secs, share)?;
            }
        }

        if self.verbose {
            let analytics = SessionAnalytics::from_session(session);
            writeln!(out, "\nZone Transitions: {}", analytics.zone_transitions)?;
            writeln!(out, "Engagement Score: {:.2}", analytics.engagement_score)?;
            writeln!(out, "Peak Interest Zones:")?;
            for (zone, secs) in session.peak_interest_zones(3) {
                writeln!(out, "  - {}: {:.2}s", zone, secs)?;
            }
        }

        writeln!(out, "{}", "═".repeat(60))?;
        Ok(())
    }

    fn write_aggregate(&mut self, aggregate: &AggregateAnalytics) -> Result<()> {
        let out = &mut self.out;

        writeln!(out, "\n{}", "═".repeat(60))?;
        writeln!(out, "OVERALL STATISTICS ({})", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(out, "{}", "═".repeat(60))?;
        writeln!(out, "Total Sessions: {}", aggregate.total_sessions)?;
        writeln!(out, "Average Session Duration: {:.2}s", aggregate.avg_session_duration)?;
        writeln!(out, "Total Time Tracked: {:.2}s", aggregate.total_time_tracked)?;
        writeln!(out, "Average Zones per Session: {:.1}", aggregate.avg_zones_per_session)?;
        writeln!(out, "Average Engagement Score: {:.2}", aggregate.avg_engagement_score)?;

        if !aggregate.zone_popularity.is_empty() {
            writeln!(out, "\nZone Popularity (by total time):")?;
            let mut zones: Vec<(&String, &f64)> = aggregate.zone_popularity.iter().collect();
            zones.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (zone, secs) in zones {
                let average = aggregate.avg_zone_duration.get(zone).copied().unwrap_or(0.0);
                let share = if aggregate.total_time_tracked > 0.0 {
                    secs / aggregate.total_time_tracked * 100.0
                } else {
                    0.0
                };
                writeln!(
                    out,
                    "  {}: {:.2}s total ({:.1}%), {:.2}s average per visit",
                    zone, secs, share, average
                )?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        log::debug!("Console writer closed after {} session(s)", self.session_count);
        Ok(())
    }
}

// ============================================================================
// JSON files
// ============================================================================

/// Per-session JSON document
#[derive(Debug, Clone, Serialize)]
struct SessionRecord {
    id: u64,
    written_at: String,
    start_frame: u64,
    end_frame: u64,
    total_duration: f64,
    zone_durations: BTreeMap<String, f64>,
    unique_zones_visited: Vec<String>,
    avg_confidence: f64,
    total_zone_transitions: usize,
    peak_interest_zones: Vec<(String, f64)>,
    analytics: SessionAnalytics,
}

impl SessionRecord {
    fn from_session(session: &Track) -> Self {
        Self {
            id: session.id,
            written_at: Utc::now().to_rfc3339(),
            start_frame: session.start_frame,
            end_frame: session.last_seen_frame,
            total_duration: session.total_duration,
            zone_durations: session.zone_durations.clone(),
            unique_zones_visited: session.unique_zones.iter().cloned().collect(),
            avg_confidence: session.avg_confidence(),
            total_zone_transitions: session.zone_transitions(),
            peak_interest_zones: session.peak_interest_zones(3),
            analytics: SessionAnalytics::from_session(session),
        }
    }
}

#[derive(Debug, Serialize)]
struct AggregateRecord<'a> {
    generated_at: String,
    #[serde(flatten)]
    aggregate: &'a AggregateAnalytics,
}

/// Writes `session_<id>.json` per session, then `aggregate_analytics.json`
/// and `all_sessions.json` when the aggregate arrives
pub struct JsonWriter {
    output_dir: PathBuf,
    sessions: Vec<SessionRecord>,
}

impl JsonWriter {
    pub const AGGREGATE_FILE: &'static str = "aggregate_analytics.json";
    pub const ALL_SESSIONS_FILE: &'static str = "all_sessions.json";

    pub fn new(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;
        log::info!("Writing JSON analytics to {:?}", output_dir);

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            sessions: Vec::new(),
        })
    }

    pub fn session_path(&self, id: u64) -> PathBuf {
        self.output_dir.join(format!("session_{}.json", id))
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to serialize {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

impl AnalyticsWriter for JsonWriter {
    fn write_session(&mut self, session: &Track) -> Result<()> {
        let record = SessionRecord::from_session(session);
        Self::write_json(&self.session_path(session.id), &record)?;
        log::debug!("Wrote session {} to {:?}", session.id, self.output_dir);
        self.sessions.push(record);
        Ok(())
    }

    fn write_aggregate(&mut self, aggregate: &AggregateAnalytics) -> Result<()> {
        let record = AggregateRecord {
            generated_at: Utc::now().to_rfc3339(),
            aggregate,
        };
        Self::write_json(&self.output_dir.join(Self::AGGREGATE_FILE), &record)?;
        Self::write_json(&self.output_dir.join(Self::ALL_SESSIONS_FILE), &self.sessions)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        log::debug!("JSON writer closed after {} session(s)", self.sessions.len());
        Ok(())
    }
}

// ============================================================================
// Composite
// ============================================================================

/// Fans every call out to several writers
///
/// A failing writer does not stop the others; the first error is returned
/// after all writers have been called.
pub struct CompositeWriter {
    writers: Vec<Box<dyn AnalyticsWriter>>,
}

impl CompositeWriter {
    pub fn new(writers: Vec<Box<dyn AnalyticsWriter>>) -> Self {
        Self { writers }
    }

    fn for_each<F>(&mut self, mut call: F) -> Result<()>
    where
        F: FnMut(&mut dyn AnalyticsWriter) -> Result<()>,
    {
        let mut first_error = None;
        for writer in &mut self.writers {
            if let Err(e) = call(writer.as_mut()) {
                log::error!("Analytics writer failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl AnalyticsWriter for CompositeWriter {
    fn write_session(&mut self, session: &Track) -> Result<()> {
        self.for_each(|w| w.write_session(session))
    }

    fn write_aggregate(&mut self, aggregate: &AggregateAnalytics) -> Result<()> {
        self.for_each(|w| w.write_aggregate(aggregate))
    }

    fn close(&mut self) -> Result<()> {
        self.for_each(|w| w.close())
    }
}
