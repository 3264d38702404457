//! File sink: writes each finished session as JSON.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output_dir>/<task_id>/<episode_id>_events.json    full session record
//! <output_dir>/<task_id>/<episode_id>_timeline.json  label -> [start, end] rows
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semlog_core::{EventSink, SinkError};
use semlog_types::{SemanticEvent, SessionRecord};
use serde::Serialize;
use tracing::debug;

/// One timeline row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    /// Event start.
    pub start: f64,
    /// Event end.
    pub end: f64,
    /// Participant classes, subject first.
    pub participants: Vec<String>,
}

/// Sink writing JSON files on close.
#[derive(Debug)]
pub struct JsonSessionSink {
    output_dir: PathBuf,
    write_timelines: bool,
    published: usize,
    written: Vec<PathBuf>,
}

impl JsonSessionSink {
    /// Sink writing below `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, write_timelines: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            write_timelines,
            published: 0,
            written: Vec::new(),
        }
    }

    /// Number of events published so far.
    pub const fn published(&self) -> usize {
        self.published
    }

    /// Files written by `close`.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_json<T: Serialize>(&mut self, path: PathBuf, value: &T) -> Result<(), SinkError> {
        let body = serde_json::to_string_pretty(value).map_err(|e| SinkError::Encode {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, body)?;
        debug!(path = %path.display(), "Session file written");
        self.written.push(path);
        Ok(())
    }
}

impl EventSink for JsonSessionSink {
    fn publish(&mut self, event: &SemanticEvent) {
        self.published = self.published.saturating_add(1);
        debug!(event_id = %event.id, kind = %event.kind, published = self.published, "Event queued for export");
    }

    fn close(&mut self, record: &SessionRecord) -> Result<(), SinkError> {
        let dir = self.output_dir.join(record.task_id.to_string());
        std::fs::create_dir_all(&dir)?;
        let episode = record.episode_id.to_string();
        self.write_json(session_file(&dir, &episode, "events"), record)?;
        if self.write_timelines {
            let timeline = timeline(&record.events);
            self.write_json(session_file(&dir, &episode, "timeline"), &timeline)?;
        }
        Ok(())
    }
}

fn session_file(dir: &Path, episode: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{episode}_{suffix}.json"))
}

/// Group closed events by kind label, each group sorted by start.
pub fn timeline(events: &[SemanticEvent]) -> BTreeMap<&'static str, Vec<TimelineRow>> {
    let mut rows: BTreeMap<&'static str, Vec<TimelineRow>> = BTreeMap::new();
    for event in events {
        let Some(end) = event.end else {
            continue;
        };
        rows.entry(event.kind.label()).or_default().push(TimelineRow {
            start: event.start,
            end,
            participants: event.participants.iter().map(|p| p.class.clone()).collect(),
        });
    }
    for group in rows.values_mut() {
        group.sort_by(|a, b| a.start.total_cmp(&b.start));
    }
    rows
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use semlog_types::{EpisodeId, EventKind, Individual, IndividualKind, TaskId};

    use super::*;

    fn closed(kind: EventKind, start: f64, end: f64) -> SemanticEvent {
        let mut event = SemanticEvent::open(
            kind,
            start,
            vec![
                Individual::new("hand", "RightHand", IndividualKind::Skeletal),
                Individual::new("cup", "Cup", IndividualKind::Rigid),
            ],
        );
        event.end = Some(end);
        event
    }

    fn record(events: Vec<SemanticEvent>) -> SessionRecord {
        SessionRecord {
            task_id: TaskId::new(),
            episode_id: EpisodeId::new(),
            started_at: Some(Utc::now()),
            finished_at: Utc::now(),
            session_time: 3.0,
            forced: false,
            events,
        }
    }

    #[test]
    fn timeline_groups_by_label_and_sorts() {
        let events = vec![
            closed(EventKind::Grasp, 2.0, 3.0),
            closed(EventKind::Contact, 1.5, 2.5),
            closed(EventKind::Grasp, 0.5, 1.0),
        ];
        let rows = timeline(&events);
        let grasps = rows.get(EventKind::Grasp.label()).unwrap();
        assert_eq!(grasps.len(), 2);
        assert!(grasps.first().unwrap().start < grasps.get(1).unwrap().start);
        assert_eq!(grasps.first().unwrap().participants, vec!["RightHand", "Cup"]);
        assert_eq!(rows.get(EventKind::Contact.label()).unwrap().len(), 1);
    }

    #[test]
    fn close_writes_events_and_timeline() {
        let dir = std::env::temp_dir().join(format!("semlog-sink-{}", TaskId::new()));
        let mut sink = JsonSessionSink::new(&dir, true);
        let event = closed(EventKind::Contact, 0.1, 0.4);
        sink.publish(&event);
        let record = record(vec![event]);
        sink.close(&record).unwrap();

        assert_eq!(sink.published(), 1);
        assert_eq!(sink.written().len(), 2);
        let events_path = sink.written().first().unwrap();
        assert!(events_path.starts_with(dir.join(record.task_id.to_string())));
        let body = std::fs::read_to_string(events_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.get("events").and_then(serde_json::Value::as_array).unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn timelines_can_be_disabled() {
        let dir = std::env::temp_dir().join(format!("semlog-sink-{}", TaskId::new()));
        let mut sink = JsonSessionSink::new(&dir, false);
        sink.close(&record(Vec::new())).unwrap();
        assert_eq!(sink.written().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
