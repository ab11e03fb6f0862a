//! Fixed-capacity batching of fetched records in front of a [`BatchSink`].

use std::sync::Arc;

use anyhow::Result;
use hsync_core::{BatchWriteResult, RawRecord};
use hsync_storage::BatchSink;

/// Buffers records and flushes them to the sink as numbered batches, 1..N in flush order.
pub struct BatchAccumulator {
    sink: Arc<dyn BatchSink>,
    capacity: usize,
    buffer: Vec<RawRecord>,
    next_sequence: u32,
}

impl BatchAccumulator {
    /// A zero capacity is treated as 1.
    pub fn new(sink: Arc<dyn BatchSink>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            capacity,
            buffer: Vec::with_capacity(capacity),
            next_sequence: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn append(&mut self, records: &[RawRecord]) {
        self.buffer.extend_from_slice(records);
    }

    /// Flushes the whole buffer once it holds at least `capacity` records.
    pub async fn flush_if_full(&mut self) -> Result<Option<BatchWriteResult>> {
        if self.buffer.is_empty() || self.buffer.len() < self.capacity {
            return Ok(None);
        }
        self.flush().await.map(Some)
    }

    pub async fn flush_remainder(&mut self) -> Result<Option<BatchWriteResult>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.flush().await.map(Some)
    }

    // The buffer is kept when the write fails, so a sequence number is never skipped.
    async fn flush(&mut self) -> Result<BatchWriteResult> {
        let result = self.sink.write_batch(self.next_sequence, &self.buffer).await?;
        self.buffer.clear();
        self.next_sequence += 1;
        Ok(result)
    }
}
