//! Single sequential writer for ingested face records
//!
//! Only the writer touches the store during a run. Records are buffered and
//! committed in fixed-size transactions, so a crash loses at most the batch
//! currently in the buffer.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::storage::{FaceRecord, FaceStore};

pub struct BatchWriter {
    store: Arc<dyn FaceStore>,
    buffer: Vec<FaceRecord>,
    batch_size: usize,
    flushes: usize,
    inserted: u64,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn FaceStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            flushes: 0,
            inserted: 0,
        }
    }

    /// Buffer records, committing every full batch
    pub async fn push(&mut self, records: Vec<FaceRecord>) -> Result<()> {
        self.buffer.extend(records);

        while self.buffer.len() >= self.batch_size {
            let batch: Vec<FaceRecord> = self.buffer.drain(..self.batch_size).collect();
            self.flush(&batch).await?;
        }
        Ok(())
    }

    /// Commit whatever is left and return `(flushes, inserted)`
    pub async fn finish(mut self) -> Result<(usize, u64)> {
        if !self.buffer.is_empty() {
            let batch = std::mem::take(&mut self.buffer);
            self.flush(&batch).await?;
        }
        Ok((self.flushes, self.inserted))
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }

    async fn flush(&mut self, batch: &[FaceRecord]) -> Result<()> {
        let inserted = self.store.insert_batch(batch).await?;
        self.flushes += 1;
        self.inserted += inserted;
        info!("Committed batch of {} faces ({} total)", inserted, self.inserted);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records batch sizes instead of persisting
    #[derive(Default)]
    pub(crate) struct RecordingStore {
        pub batches: Mutex<Vec<usize>>,
        pub records: Mutex<Vec<FaceRecord>>,
    }

    #[async_trait]
    impl FaceStore for RecordingStore {
        async fn insert_batch(&self, records: &[FaceRecord]) -> Result<u64> {
            self.batches.lock().push(records.len());
            self.records.lock().extend_from_slice(records);
            Ok(records.len() as u64)
        }

        async fn load_all(&self) -> Result<Vec<FaceRecord>> {
            Ok(self.records.lock().clone())
        }

        async fn count_faces(&self) -> Result<i64> {
            Ok(self.records.lock().len() as i64)
        }
    }

    fn records(n: usize) -> Vec<FaceRecord> {
        (0..n)
            .map(|i| FaceRecord::new(format!("file-{}", i), format!("{}.jpg", i), "folder", vec![1.0, 0.0]))
            .collect()
    }

    #[tokio::test]
    async fn test_250_records_flush_three_times() {
        let store = Arc::new(RecordingStore::default());
        let mut writer = BatchWriter::new(store.clone(), 100);

        writer.push(records(250)).await.unwrap();
        assert_eq!(*store.batches.lock(), vec![100, 100]);
        assert_eq!(writer.pending(), 50);

        let (flushes, inserted) = writer.finish().await.unwrap();
        assert_eq!(flushes, 3);
        assert_eq!(inserted, 250);
        assert_eq!(*store.batches.lock(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_small_pushes_accumulate() {
        let store = Arc::new(RecordingStore::default());
        let mut writer = BatchWriter::new(store.clone(), 4);

        for _ in 0..3 {
            writer.push(records(3)).await.unwrap();
        }
        assert_eq!(*store.batches.lock(), vec![4, 4]);

        writer.finish().await.unwrap();
        assert_eq!(*store.batches.lock(), vec![4, 4, 1]);

        // insertion order is preserved
        let ids: Vec<String> = store.records.lock().iter().map(|r| r.file_id.clone()).collect();
        assert_eq!(ids[..3], ["file-0", "file-1", "file-2"]);
    }

    #[tokio::test]
    async fn test_finish_without_records_does_not_flush() {
        let store = Arc::new(RecordingStore::default());
        let writer = BatchWriter::new(store.clone(), 100);
        assert_eq!(writer.finish().await.unwrap(), (0, 0));
        assert!(store.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exact_multiple_leaves_nothing_pending() {
        let store = Arc::new(RecordingStore::default());
        let mut writer = BatchWriter::new(store.clone(), 100);
        writer.push(records(200)).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), (2, 200));
    }
}
