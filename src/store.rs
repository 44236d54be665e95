//! Event persistence: the sink interface and two stores.

use crate::event::{Event, EventBatch, EventType};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("batch {batch_id} for run '{run_id}' is out of order (expected sequence {expected}, got {got})")]
    OutOfOrder {
        run_id: String,
        batch_id: u32,
        expected: u64,
        got: u64,
    },
    #[error("run '{0}' already has events in this store")]
    RunExists(String),
}

/// One persisted event, tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub run_id: String,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// Persistence collaborator for event logs.
///
/// Batches of a run arrive in order; stores must keep that order for queries.
pub trait EventSink {
    fn store(&mut self, batch: &EventBatch) -> Result<(), SinkError>;

    fn events_for_run(&self, run_id: &str) -> Result<Vec<Event>, SinkError>;

    /// Events of one type, optionally restricted to a single run.
    fn events_of_type(
        &self,
        run_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<StoredEvent>, SinkError>;

    /// Distinct run ids in first-seen order.
    fn runs(&self) -> Result<Vec<String>, SinkError>;

    /// Refuse a run id the store already holds events for.
    fn ensure_new_run(&self, run_id: &str) -> Result<(), SinkError> {
        if self.runs()?.iter().any(|existing| existing == run_id) {
            return Err(SinkError::RunExists(run_id.to_string()));
        }
        Ok(())
    }
}

fn check_sequence(records: &[StoredEvent], batch: &EventBatch) -> Result<(), SinkError> {
    let expected = records
        .iter()
        .filter(|r| r.run_id == batch.run_id)
        .map(|r| r.sequence + 1)
        .max()
        .unwrap_or(0);

    if batch.first_sequence != expected {
        return Err(SinkError::OutOfOrder {
            run_id: batch.run_id.clone(),
            batch_id: batch.batch_id,
            expected,
            got: batch.first_sequence,
        });
    }
    Ok(())
}

fn to_records(batch: &EventBatch) -> impl Iterator<Item = StoredEvent> + '_ {
    batch
        .events
        .iter()
        .enumerate()
        .map(move |(offset, event)| StoredEvent {
            run_id: batch.run_id.clone(),
            sequence: batch.first_sequence + offset as u64,
            event: event.clone(),
        })
}

fn distinct_runs(records: &[StoredEvent]) -> Vec<String> {
    let mut runs: Vec<String> = Vec::new();
    for record in records {
        if !runs.contains(&record.run_id) {
            runs.push(record.run_id.clone());
        }
    }
    runs
}

/// In-memory store, mostly for tests and short runs.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    records: Vec<StoredEvent>,
    batches: u32,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[StoredEvent] {
        &self.records
    }

    pub fn batch_count(&self) -> u32 {
        self.batches
    }
}

impl EventSink for MemoryEventStore {
    fn store(&mut self, batch: &EventBatch) -> Result<(), SinkError> {
        check_sequence(&self.records, batch)?;
        self.records.extend(to_records(batch));
        self.batches += 1;
        Ok(())
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<Event>, SinkError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.run_id == run_id)
            .map(|r| r.event.clone())
            .collect())
    }

    fn events_of_type(
        &self,
        run_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<StoredEvent>, SinkError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.event.event_type == event_type)
            .filter(|r| run_id.map_or(true, |id| r.run_id == id))
            .cloned()
            .collect())
    }

    fn runs(&self) -> Result<Vec<String>, SinkError> {
        Ok(distinct_runs(&self.records))
    }
}

/// Append-only JSON-lines file, one [`StoredEvent`] per line.
#[derive(Debug)]
pub struct JsonLinesEventStore {
    path: PathBuf,
    // Next expected sequence per run, seeded from the file on open
    next_sequence: std::collections::BTreeMap<String, u64>,
}

impl JsonLinesEventStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            path,
            next_sequence: std::collections::BTreeMap::new(),
        };

        if store.path.exists() {
            for record in store.read_all()? {
                store
                    .next_sequence
                    .insert(record.run_id.clone(), record.sequence + 1);
            }
        } else {
            File::create(&store.path)?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<StoredEvent>, SinkError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }
}

impl EventSink for JsonLinesEventStore {
    fn store(&mut self, batch: &EventBatch) -> Result<(), SinkError> {
        let expected = self.next_sequence.get(&batch.run_id).copied().unwrap_or(0);
        if batch.first_sequence != expected {
            return Err(SinkError::OutOfOrder {
                run_id: batch.run_id.clone(),
                batch_id: batch.batch_id,
                expected,
                got: batch.first_sequence,
            });
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in to_records(batch) {
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        self.next_sequence.insert(
            batch.run_id.clone(),
            batch.first_sequence + batch.events.len() as u64,
        );
        Ok(())
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<Event>, SinkError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.run_id == run_id)
            .map(|r| r.event)
            .collect())
    }

    fn events_of_type(
        &self,
        run_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<StoredEvent>, SinkError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.event.event_type == event_type)
            .filter(|r| run_id.map_or(true, |id| r.run_id == id))
            .collect())
    }

    fn runs(&self) -> Result<Vec<String>, SinkError> {
        Ok(distinct_runs(&self.read_all()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(run_id: &str, first_sequence: u64, timestamps: &[f64]) -> EventBatch {
        EventBatch {
            batch_id: 1,
            run_id: run_id.into(),
            first_sequence,
            events: timestamps
                .iter()
                .map(|t| Event::new(*t, EventType::Command, "cmd"))
                .collect(),
        }
    }

    #[test]
    fn test_memory_store_rejects_gaps() {
        let mut store = MemoryEventStore::new();
        store.store(&batch("a", 0, &[0.0, 1.0])).unwrap();

        let err = store.store(&batch("a", 5, &[2.0])).unwrap_err();
        assert!(matches!(err, SinkError::OutOfOrder { expected: 2, got: 5, .. }));

        // Other runs have their own sequence
        store.store(&batch("b", 0, &[0.0])).unwrap();
        assert_eq!(store.runs().unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_query_by_type() {
        let mut store = MemoryEventStore::new();
        let mut b = batch("a", 0, &[0.0]);
        b.events.push(Event::new(1.0, EventType::SafeMode, "entered"));
        store.store(&b).unwrap();
        store.store(&batch("b", 0, &[0.0])).unwrap();

        let safe = store.events_of_type(None, EventType::SafeMode).unwrap();
        assert_eq!(safe.len(), 1);
        assert_eq!(safe[0].sequence, 1);

        let commands = store.events_of_type(Some("b"), EventType::Command).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].run_id, "b");
    }
}
