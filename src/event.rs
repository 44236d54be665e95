//! Structured, append-only event log and its batched hand-off to an [`EventSink`].

use crate::store::{EventSink, SinkError};
use crate::subsystems::AcsMode;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Run,
    Classification,
    DegradedSample,
    SafeMode,
    Queue,
    Observation,
    Charging,
    Command,
    CommandRejected,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Run,
        EventType::Classification,
        EventType::DegradedSample,
        EventType::SafeMode,
        EventType::Queue,
        EventType::Observation,
        EventType::Charging,
        EventType::Command,
        EventType::CommandRejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Run => "RUN",
            EventType::Classification => "CLASSIFICATION",
            EventType::DegradedSample => "DEGRADED_SAMPLE",
            EventType::SafeMode => "SAFE_MODE",
            EventType::Queue => "QUEUE",
            EventType::Observation => "OBSERVATION",
            EventType::Charging => "CHARGING",
            EventType::Command => "COMMAND",
            EventType::CommandRejected => "COMMAND_REJECTED",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_uppercase().replace('-', "_");
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| alloc::format!("unknown event type '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64,
    pub event_type: EventType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obsid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs_mode: Option<AcsMode>,
}

impl Event {
    pub fn new(timestamp: f64, event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            timestamp,
            event_type,
            description: description.into(),
            obsid: None,
            acs_mode: None,
        }
    }

    pub fn with_obsid(mut self, obsid: Option<u32>) -> Self {
        self.obsid = obsid;
        self
    }

    pub fn with_acs_mode(mut self, mode: AcsMode) -> Self {
        self.acs_mode = Some(mode);
        self
    }
}

/// A contiguous run of events handed to a sink in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub batch_id: u32,
    pub run_id: String,
    /// Position of the first event of the batch within the run.
    pub first_sequence: u64,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogStats {
    pub total_events: u64,
    pub total_batches_flushed: u32,
    pub total_events_flushed: u64,
}

/// Append-only, timestamp-ordered event record of one run.
///
/// Every event is retained in memory; `flushed` marks how far the log has been
/// handed to a sink. Flushing never reorders and never drops events.
#[derive(Debug)]
pub struct EventLog {
    run_id: String,
    events: Vec<Event>,
    flushed: usize,
    batch_size: usize,
    next_batch_id: u32,
    stats: EventLogStats,
}

impl EventLog {
    pub fn new(run_id: impl Into<String>, batch_size: usize) -> Self {
        Self {
            run_id: run_id.into(),
            events: Vec::new(),
            flushed: 0,
            batch_size: batch_size.max(1),
            next_batch_id: 1,
            stats: EventLogStats::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append an event. Timestamps must not go backwards.
    pub fn append(&mut self, event: Event) {
        debug_assert!(
            self.events
                .last()
                .map_or(true, |last| last.timestamp <= event.timestamp),
            "event at {} appended after event at {}",
            event.timestamp,
            self.events.last().map_or(f64::NAN, |e| e.timestamp)
        );
        self.events.push(event);
        self.stats.total_events += 1;
    }

    pub fn record(&mut self, timestamp: f64, event_type: EventType, description: impl Into<String>) {
        self.append(Event::new(timestamp, event_type, description));
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn of_type(&self, event_type: EventType) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }

    /// Events not yet handed to a sink.
    pub fn pending(&self) -> &[Event] {
        &self.events[self.flushed..]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> &EventLogStats {
        &self.stats
    }

    /// Flush full batches only. Used between ticks to bound the backlog.
    pub fn flush_full_batches(&mut self, sink: &mut dyn EventSink) -> Result<usize, SinkError> {
        let mut written = 0;
        while self.pending().len() >= self.batch_size {
            written += self.flush_one(sink, self.batch_size)?;
        }
        Ok(written)
    }

    /// Flush every pending event, including a final partial batch.
    pub fn flush_all(&mut self, sink: &mut dyn EventSink) -> Result<usize, SinkError> {
        let mut written = 0;
        while !self.pending().is_empty() {
            let count = self.pending().len().min(self.batch_size);
            written += self.flush_one(sink, count)?;
        }
        Ok(written)
    }

    fn flush_one(&mut self, sink: &mut dyn EventSink, count: usize) -> Result<usize, SinkError> {
        let batch = EventBatch {
            batch_id: self.next_batch_id,
            run_id: self.run_id.clone(),
            first_sequence: self.flushed as u64,
            events: self.events[self.flushed..self.flushed + count].to_vec(),
        };

        // Only advance once the sink accepted the batch, so a failed store can
        // be retried without losing events.
        sink.store(&batch)?;

        self.flushed += count;
        self.next_batch_id = self.next_batch_id.wrapping_add(1);
        self.stats.total_batches_flushed += 1;
        self.stats.total_events_flushed += count as u64;
        debug!(
            batch_id = batch.batch_id,
            events = count,
            run_id = %self.run_id,
            "event batch flushed"
        );

        Ok(count)
    }
}
