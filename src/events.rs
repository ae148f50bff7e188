use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

/// One entry of the audit trail shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: u64,
    pub timestamp: SystemTime,
    pub level: Level,
    pub message: String,
}

/// Append-only, ordered record of state changes and notable conditions.
///
/// Ids start at 1 and grow by one per append, so a consumer can tail the
/// log with [`EventLog::since`]. Every entry is mirrored to `tracing` and,
/// when a broadcast sender is attached, published to live subscribers.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<Event>,
    next_id: u64,
    publisher: Option<broadcast::Sender<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publisher(publisher: broadcast::Sender<Event>) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    pub fn append(&mut self, level: Level, message: impl Into<String>) -> Event {
        self.next_id += 1;
        let event = Event {
            id: self.next_id,
            timestamp: SystemTime::now(),
            level,
            message: message.into(),
        };
        match level {
            Level::Info | Level::Success => info!(target: "events", "[{}] {}", level, event.message),
            Level::Warn => warn!(target: "events", "{}", event.message),
            Level::Error => error!(target: "events", "{}", event.message),
        }
        self.entries.push(event.clone());
        if let Some(tx) = &self.publisher {
            // no subscribers is fine
            let _ = tx.send(event.clone());
        }
        event
    }

    pub fn all(&self) -> Vec<Event> {
        self.entries.clone()
    }

    /// Events appended after the one with id `after`.
    pub fn since(&self, after: u64) -> Vec<Event> {
        // ids are dense and start at 1, so id n sits at index n - 1
        let start = usize::try_from(after)
            .unwrap_or(usize::MAX)
            .min(self.entries.len());
        self.entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
