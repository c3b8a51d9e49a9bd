//! Append-only session event file
//!
//! Each event is serialized to a single line and written with one
//! `write_all` while holding the writer mutex, so concurrent emitters never
//! interleave and a tailing reader sees either the whole line or nothing
//! terminated by a newline.

use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::cursor::EventCursor;
use super::types::{Event, EventType};
use crate::error::{ConductorError, ConductorResult};

struct Writer {
    file: File,
    appended: u64,
}

/// Durable, append-only event sequence
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl EventLog {
    /// Open (or create) the event file, keeping any existing history
    pub fn open(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, appended: 0 }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a fully built event
    pub fn append(&self, event: &Event) -> ConductorResult<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut writer = self.writer.lock();
        writer.file.write_all(line.as_bytes())?;
        writer.file.flush()?;
        writer.appended += 1;
        Ok(())
    }

    /// Build and append an event, returning it
    pub fn emit(
        &self,
        event_type: EventType,
        agent_name: &str,
        data: Value,
    ) -> ConductorResult<Event> {
        let event = Event::new(event_type, agent_name, data);
        debug!(event_type = %event_type, agent = agent_name, "event");
        self.append(&event)?;
        Ok(event)
    }

    /// Events appended through this handle
    pub fn appended(&self) -> u64 {
        self.writer.lock().appended
    }

    /// Cursor positioned at the start of the file
    pub fn cursor(&self) -> EventCursor {
        EventCursor::new(&self.path)
    }

    /// Load every event currently in the file
    pub fn read_all(&self) -> ConductorResult<Vec<Event>> {
        read_events(&self.path)
    }
}

/// Read a complete event file, ignoring a trailing partial line
pub fn read_events(path: impl AsRef<Path>) -> ConductorResult<Vec<Event>> {
    let file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || !line.ends_with('\n') {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(trimmed).map_err(|e| {
            ConductorError::Serialization(format!("corrupt event line: {}", e))
        })?;
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path().join("logs").join("events.jsonl")).unwrap();

        log.emit(EventType::LevelStart, "", json!({"level": 0}))
            .unwrap();
        log.emit(EventType::AgentStart, "db", json!({"attempt": 1}))
            .unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::LevelStart);
        assert!(events[0].is_scheduler_event());
        assert_eq!(events[1].agent_name, "db");
        assert_eq!(log.appended(), 2);
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");

        {
            let log = EventLog::open(&path).unwrap();
            log.emit(EventType::RunStart, "", json!({})).unwrap();
        }
        let log = EventLog::open(&path).unwrap();
        log.emit(EventType::RunComplete, "", json!({})).unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::RunComplete);
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        log.emit(
                            EventType::AgentStart,
                            &format!("agent-{}", i),
                            json!({"n": n, "padding": "x".repeat(256)}),
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 400);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_events(dir.path().join("nope.jsonl")).unwrap().is_empty());
    }
}
