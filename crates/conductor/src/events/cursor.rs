//! Cursor reader for the event file
//!
//! Monitors poll the cursor instead of watching file sizes. Each poll returns
//! only complete events appended since the previous poll; a trailing line
//! without its newline is left for the next poll. Complete lines that do
//! not parse are logged and passed over.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::Event;
use crate::error::ConductorResult;

#[derive(Debug, Clone)]
pub struct EventCursor {
    path: PathBuf,
    offset: u64,
    consumed: u64,
    skipped: u64,
}

impl EventCursor {
    /// Cursor at the beginning of `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
            consumed: 0,
            skipped: 0,
        }
    }

    /// Byte offset of the next unread event
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of events returned so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Number of unparseable lines passed over
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Return the events appended since the last poll
    pub fn poll(&mut self) -> ConductorResult<Vec<Event>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // The file was replaced; start over
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(Vec::new()),
        };

        let mut events = Vec::new();
        for line in buf[..complete].split(|b| *b == b'\n') {
            let text = String::from_utf8_lossy(line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(text) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping corrupt event line");
                    self.skipped += 1;
                }
            }
        }

        self.offset += complete as u64;
        self.consumed += events.len() as u64;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, EventType};
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_poll_returns_only_new_events() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path().join("events.jsonl")).unwrap();
        let mut cursor = log.cursor();

        assert!(cursor.poll().unwrap().is_empty());

        log.emit(EventType::RunStart, "", json!({})).unwrap();
        log.emit(EventType::LevelStart, "", json!({"level": 0}))
            .unwrap();
        let first = cursor.poll().unwrap();
        assert_eq!(first.len(), 2);

        assert!(cursor.poll().unwrap().is_empty());

        log.emit(EventType::AgentStart, "db", json!({})).unwrap();
        let second = cursor.poll().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].agent_name, "db");
        assert_eq!(cursor.consumed(), 3);
    }

    #[test]
    fn test_partial_line_is_deferred() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::open(&path).unwrap();
        log.emit(EventType::RunStart, "", json!({})).unwrap();

        let full = serde_json::to_string(&crate::events::Event::new(
            EventType::AgentStart,
            "api",
            json!({"attempt": 1}),
        ))
        .unwrap();
        let (head, tail) = full.split_at(full.len() / 2);

        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(head.as_bytes()).unwrap();
        raw.flush().unwrap();

        let mut cursor = EventCursor::new(&path);
        assert_eq!(cursor.poll().unwrap().len(), 1);

        raw.write_all(tail.as_bytes()).unwrap();
        raw.write_all(b"\n").unwrap();
        raw.flush().unwrap();

        let rest = cursor.poll().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].agent_name, "api");
    }

    #[test]
    fn test_corrupt_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::open(&path).unwrap();
        log.emit(EventType::RunStart, "", json!({})).unwrap();

        let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(b"{\"eventType\": oops\n").unwrap();
        raw.flush().unwrap();
        log.emit(EventType::AgentStart, "api", json!({})).unwrap();

        let mut cursor = EventCursor::new(&path);
        let first = cursor.poll().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].agent_name, "api");
        assert_eq!(cursor.skipped(), 1);

        log.emit(EventType::AgentComplete, "api", json!({})).unwrap();
        let next = cursor.poll().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].event_type, EventType::AgentComplete);
        assert_eq!(cursor.consumed(), 3);
    }

    #[test]
    fn test_missing_file_polls_empty() {
        let dir = TempDir::new().unwrap();
        let mut cursor = EventCursor::new(dir.path().join("later.jsonl"));
        assert!(cursor.poll().unwrap().is_empty());
        assert_eq!(cursor.offset(), 0);
    }
}
