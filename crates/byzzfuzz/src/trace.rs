//! The trace boundary: step and vote records for external analysis.
//!
//! A run emits an ordered sequence of records — step transitions and
//! received votes — that a downstream analyzer consumes to compute
//! round/height coverage. Records travel through a bounded FIFO buffer;
//! the analyzer drains it, a JSONL sink persists it. The capitalized
//! JSON field names are part of the analyzer contract. Tracing must
//! never block or abort a run: on overflow the newest record is counted
//! and discarded.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::harness::ReplicaId;
use crate::oracle::LivenessFlag;

/// Default buffer capacity; a slow analyzer loses records rather than
/// stalling the run.
pub const DEFAULT_TRACE_CAPACITY: usize = 65_536;

// ============================================================================
// Records
// ============================================================================

/// One record in the run trace.
///
/// Serialized untagged: the analyzer distinguishes the two shapes by
/// the `Replica` field's presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceRecord {
    /// A replica entered a step.
    Step {
        #[serde(rename = "Replica")]
        replica: String,
        #[serde(rename = "Height")]
        height: u64,
        #[serde(rename = "Round")]
        round: i64,
    },
    /// A vote arrived at its receiver.
    Message {
        #[serde(rename = "From")]
        from: String,
        #[serde(rename = "To")]
        to: String,
        #[serde(rename = "Height")]
        height: u64,
        #[serde(rename = "Round")]
        round: i64,
    },
}

// ============================================================================
// Buffer
// ============================================================================

/// Bounded FIFO hand-off between the engine and the analyzer.
///
/// Clones share the queue.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    queue: Arc<ArrayQueue<TraceRecord>>,
}

impl TraceBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Pops the oldest record, if any.
    pub fn pop(&self) -> Option<TraceRecord> {
        self.queue.pop()
    }

    /// Drains everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<TraceRecord> {
        let mut records = Vec::with_capacity(self.queue.len());
        while let Some(record) = self.queue.pop() {
            records.push(record);
        }
        records
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(&self, record: TraceRecord) -> Result<(), TraceRecord> {
        self.queue.push(record)
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// The engine-side producer of trace records.
///
/// Goes quiet once the fault window ends: post-window traffic is not
/// part of the analyzed schedule.
#[derive(Debug)]
pub struct TraceRecorder {
    buffer: TraceBuffer,
    finished: LivenessFlag,
    emitted: u64,
    dropped: u64,
}

impl TraceRecorder {
    pub fn new(buffer: TraceBuffer, finished: LivenessFlag) -> Self {
        Self {
            buffer,
            finished,
            emitted: 0,
            dropped: 0,
        }
    }

    /// Records a step transition.
    pub fn record_step(&mut self, replica: ReplicaId, height: u64, round: u32) {
        self.push(TraceRecord::Step {
            replica: replica.label(),
            height,
            round: i64::from(round),
        });
    }

    /// Records a received vote. Callers filter to vote kinds with
    /// non-negative rounds.
    pub fn record_vote(&mut self, from: ReplicaId, to: ReplicaId, height: u64, round: i64) {
        self.push(TraceRecord::Message {
            from: from.label(),
            to: to.label(),
            height,
            round,
        });
    }

    /// Records emitted into the buffer.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Records lost to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn push(&mut self, record: TraceRecord) {
        if self.finished.is_set() {
            return;
        }
        match self.buffer.push(record) {
            Ok(()) => self.emitted += 1,
            Err(_) => {
                if self.dropped == 0 {
                    tracing::warn!("trace buffer full, discarding records");
                }
                self.dropped += 1;
            }
        }
    }
}

// ============================================================================
// JSONL Sink
// ============================================================================

/// Writes trace records to a JSON-lines file, one record per line.
#[derive(Debug)]
pub struct JsonlTraceSink {
    writer: BufWriter<File>,
    written: u64,
}

impl JsonlTraceSink {
    /// Creates (truncates) the trace file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Appends one record.
    pub fn append(&mut self, record: &TraceRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Drains a buffer into the file. Returns records written.
    pub fn drain_from(&mut self, buffer: &TraceBuffer) -> io::Result<u64> {
        let mut count = 0;
        while let Some(record) = buffer.pop() {
            self.append(&record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Flushes buffered lines to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Lines written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_field_names_follow_the_analyzer_contract() {
        let step = TraceRecord::Step {
            replica: "node0".to_owned(),
            height: 2,
            round: 1,
        };
        assert_eq!(
            serde_json::to_string(&step).unwrap(),
            r#"{"Replica":"node0","Height":2,"Round":1}"#
        );

        let message = TraceRecord::Message {
            from: "node1".to_owned(),
            to: "node2".to_owned(),
            height: 2,
            round: 0,
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"From":"node1","To":"node2","Height":2,"Round":0}"#
        );
    }

    #[test]
    fn untagged_decode_distinguishes_shapes() {
        let record: TraceRecord =
            serde_json::from_str(r#"{"Replica":"node3","Height":1,"Round":0}"#).unwrap();
        assert!(matches!(record, TraceRecord::Step { .. }));
        let record: TraceRecord =
            serde_json::from_str(r#"{"From":"node0","To":"node1","Height":1,"Round":0}"#).unwrap();
        assert!(matches!(record, TraceRecord::Message { .. }));
    }

    #[test]
    fn recorder_preserves_order() {
        let buffer = TraceBuffer::with_capacity(16);
        let mut recorder = TraceRecorder::new(buffer.clone(), LivenessFlag::new());
        recorder.record_step(ReplicaId::new(0), 1, 0);
        recorder.record_vote(ReplicaId::new(1), ReplicaId::new(0), 1, 0);
        let records = buffer.drain();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], TraceRecord::Step { .. }));
        assert!(matches!(records[1], TraceRecord::Message { .. }));
        assert_eq!(recorder.emitted(), 2);
    }

    #[test]
    fn recorder_goes_quiet_after_the_fault_window() {
        let buffer = TraceBuffer::with_capacity(16);
        let flag = LivenessFlag::new();
        let mut recorder = TraceRecorder::new(buffer.clone(), flag.clone());
        recorder.record_step(ReplicaId::new(0), 1, 0);
        flag.set();
        recorder.record_step(ReplicaId::new(0), 2, 0);
        assert_eq!(buffer.len(), 1);
        assert_eq!(recorder.emitted(), 1);
    }

    #[test]
    fn overflow_drops_and_counts() {
        let buffer = TraceBuffer::with_capacity(2);
        let mut recorder = TraceRecorder::new(buffer.clone(), LivenessFlag::new());
        for _ in 0..5 {
            recorder.record_step(ReplicaId::new(0), 1, 0);
        }
        assert_eq!(recorder.emitted(), 2);
        assert_eq!(recorder.dropped(), 3);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn sink_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");

        let buffer = TraceBuffer::with_capacity(16);
        let mut recorder = TraceRecorder::new(buffer.clone(), LivenessFlag::new());
        recorder.record_step(ReplicaId::new(0), 1, 0);
        recorder.record_vote(ReplicaId::new(1), ReplicaId::new(2), 1, 0);

        let mut sink = JsonlTraceSink::create(&path).unwrap();
        assert_eq!(sink.drain_from(&buffer).unwrap(), 2);
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"Replica\""));
        assert!(lines[1].contains("\"From\""));
    }
}
