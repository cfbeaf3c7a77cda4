//! Structured simulation events.
//!
//! Everything worth analysing after a run (actions, stance moves,
//! satisfaction scores, migrations) is emitted as a [`SimEvent`] into an
//! [`EventSink`]. Sinks never abort the simulation: failures are logged and
//! swallowed by [`emit`].
//!
//! ```text
//! Agent / Simulation ──> emit() ──> Vec<Box<dyn EventSink>> ──┬──> TracingSink (tracing events)
//!                                                             └──> JsonlSink   (events.jsonl)
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::agent::{Stance, StanceChange};
use crate::error::{Result, SimError};
use crate::network::{PostId, ServerId, UserId};
use crate::oracle::UsageTotals;

/// One observable thing that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// An original post or a retweet was published
    PostCreated {
        /// Round
        round: u32,
        /// Author
        user: UserId,
        /// Server posted on
        server: ServerId,
        /// New post id
        post_id: PostId,
        /// Text
        content: String,
    },
    /// An action parsed from a decision reply
    ActionTaken {
        /// Round
        round: u32,
        /// Actor
        user: UserId,
        /// Action type
        action: String,
        /// Target post or user, content
        details: Value,
    },
    /// Accepted stance move
    StanceChanged {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// Transition
        change: StanceChange,
    },
    /// Accepted move of two or more steps
    DramaticStanceChange {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// Transition
        change: StanceChange,
    },
    /// Proposed move that was not applied
    StanceRejected {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// Stance kept
        current: Stance,
        /// Raw proposed value
        proposed: Value,
        /// Why it was refused
        reason: String,
    },
    /// Environment evaluation
    Satisfaction {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// Server evaluated
        server: ServerId,
        /// Score, 0 when unparseable
        score: i64,
        /// Oracle's reason
        reason: String,
    },
    /// Server change
    Migration {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// Old server
        from: ServerId,
        /// New server
        to: ServerId,
        /// Score that triggered it
        score: i64,
        /// Dissatisfaction reason
        reason: String,
    },
    /// Reflection attempt
    MemoryCompression {
        /// Round
        round: u32,
        /// Agent
        user: UserId,
        /// generated, skipped or failed
        outcome: String,
        /// Reflections held afterwards
        reflections: usize,
    },
    /// End of a round
    RoundCompleted {
        /// Round
        round: u32,
        /// Posts across all servers
        total_posts: usize,
        /// Agents that gained an interaction edge
        active_users: usize,
        /// Migrations this round
        migrations: usize,
    },
    /// Token usage so far
    TokenUsage {
        /// Round
        round: u32,
        /// Running totals
        usage: UsageTotals,
    },
}

impl SimEvent {
    /// Tag name, as serialized.
    pub fn name(&self) -> &'static str {
        match self {
            SimEvent::PostCreated { .. } => "post_created",
            SimEvent::ActionTaken { .. } => "action_taken",
            SimEvent::StanceChanged { .. } => "stance_changed",
            SimEvent::DramaticStanceChange { .. } => "dramatic_stance_change",
            SimEvent::StanceRejected { .. } => "stance_rejected",
            SimEvent::Satisfaction { .. } => "satisfaction",
            SimEvent::Migration { .. } => "migration",
            SimEvent::MemoryCompression { .. } => "memory_compression",
            SimEvent::RoundCompleted { .. } => "round_completed",
            SimEvent::TokenUsage { .. } => "token_usage",
        }
    }
}

/// Destination for events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &SimEvent) -> Result<()>;
}

/// Send `event` to `sink`, logging instead of failing.
pub fn emit(sink: &dyn EventSink, event: &SimEvent) {
    if let Err(e) = sink.emit(event) {
        tracing::warn!("Failed to record {} event: {}", event.name(), e);
    }
}

/// Emits each event as a tracing event with the JSON payload attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SimEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        match event {
            SimEvent::DramaticStanceChange { .. } | SimEvent::Migration { .. } => {
                tracing::info!(target: "fedisim::events", kind = event.name(), %payload)
            }
            _ => tracing::debug!(target: "fedisim::events", kind = event.name(), %payload),
        }
        Ok(())
    }
}

/// Appends one JSON object per line, stamped with the write time.
#[derive(Debug)]
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SimError::Persistence(format!("Failed to open {}: {e}", path.display())))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &SimEvent) -> Result<()> {
        let mut line = serde_json::to_value(event)?;
        line["timestamp"] = Value::String(Utc::now().to_rfc3339());
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SimError::Persistence("event log lock poisoned".to_string()))?;
        serde_json::to_writer(&mut *writer, &line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for Vec<Box<dyn EventSink>> {
    fn emit(&self, event: &SimEvent) -> Result<()> {
        let mut first_error = None;
        for sink in self {
            if let Err(e) = sink.emit(event) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Keeps every event in memory. Handy in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SimEvent>>,
}

impl RecordingSink {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events with the given tag.
    pub fn named(&self, name: &str) -> Vec<SimEvent> {
        self.events().into_iter().filter(|e| e.name() == name).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &SimEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| SimError::Persistence("recording lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn emit(&self, event: &SimEvent) -> Result<()> {
        (**self).emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl EventSink for Broken {
        fn emit(&self, _event: &SimEvent) -> Result<()> {
            Err(SimError::Persistence("disk full".to_string()))
        }
    }

    fn migration() -> SimEvent {
        SimEvent::Migration {
            round: 2,
            user: UserId::from("user_1"),
            from: ServerId::from("A"),
            to: ServerId::from("C"),
            score: 3,
            reason: "too hostile".to_string(),
        }
    }

    #[test]
    fn test_event_tagging() {
        let value = serde_json::to_value(migration()).unwrap();
        assert_eq!(value["event"], "migration");
        assert_eq!(value["from"], "A");
        assert_eq!(value["score"], 3);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlSink::open(&path).unwrap();
        sink.emit(&migration()).unwrap();
        sink.emit(&SimEvent::TokenUsage {
            round: 2,
            usage: UsageTotals::default(),
        })
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["event"], "token_usage");
        assert!(lines[0]["timestamp"].is_string());
    }

    #[test]
    fn test_fan_out_reaches_all_sinks_despite_failure() {
        let recorder = std::sync::Arc::new(RecordingSink::new());
        let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(Broken), Box::new(recorder.clone())];
        assert!(sinks.emit(&migration()).is_err());
        assert_eq!(recorder.events().len(), 1);

        // the helper swallows the failure
        emit(&sinks, &migration());
        assert_eq!(recorder.named("migration").len(), 2);
    }
}
