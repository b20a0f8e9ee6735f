use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pbs_base::Result;
use pbs_storage::ObjectStore;

use crate::entry::JournalEntry;

fn key_for(journal_id: u64) -> String {
    format!("journal/{journal_id:020}")
}

/// Single-writer append to one partition's journal. `journal_id` assignment
/// is local to this writer: only one node may ever hold this role for a
/// given partition, so there is no cross-process coordination here, just
/// the lease manager ensuring at most one node holds it.
pub struct JournalWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    partition: String,
    next_id: AtomicU64,
}

impl JournalWriter {
    /// `starting_at` is one past the highest journal_id already durable,
    /// typically recovered by replaying the partition before a writer takes
    /// over.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String, partition: String, starting_at: u64) -> Self {
        JournalWriter { store, bucket, partition, next_id: AtomicU64::new(starting_at) }
    }

    pub async fn append(&self, mut entry: JournalEntry) -> Result<u64> {
        let journal_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entry.journal_id = journal_id;
        let bytes = serde_json::to_vec(&entry)?;
        let bucket = format!("{}/{}", self.bucket, self.partition);
        self.store.put(&bucket, &key_for(journal_id), bytes).await?;
        Ok(journal_id)
    }

    pub fn next_journal_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

/// Replays entries from a partition in journal_id order, starting from
/// `from_id` (the id immediately after the last garbage-collected
/// checkpoint).
pub struct JournalReader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    partition: String,
}

impl JournalReader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String, partition: String) -> Self {
        JournalReader { store, bucket, partition }
    }

    pub async fn replay_from(&self, from_id: u64) -> Result<Vec<JournalEntry>> {
        let bucket = format!("{}/{}", self.bucket, self.partition);
        let mut keys = self.store.list(&bucket, "journal/").await?;
        keys.sort();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = self.store.get(&bucket, &key).await?;
            let entry: JournalEntry = serde_json::from_slice(&bytes)?;
            if entry.journal_id >= from_id {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn garbage_collect_up_to(&self, checkpointed_id: u64) -> Result<()> {
        let bucket = format!("{}/{}", self.bucket, self.partition);
        let keys = self.store.list(&bucket, "journal/").await?;
        for key in keys {
            if let Some(id_str) = key.strip_prefix("journal/") {
                if let Ok(id) = id_str.parse::<u64>() {
                    if id <= checkpointed_id {
                        self.store.delete(&bucket, &key).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryType;
    use pbs_base::TransactionId;
    use pbs_storage_local::RedbObjectStore;
    use std::collections::BTreeMap;

    fn entry(id: u64) -> JournalEntry {
        JournalEntry {
            journal_id: id,
            entry_type: EntryType::PhaseEntered,
            transaction_id: TransactionId::new(),
            phase: "begin".to_string(),
            last_execution_timestamp: id,
            per_command_timestamps: BTreeMap::new(),
            wall_clock_millis: 0,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn appended_entries_replay_in_order() {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let writer = JournalWriter::new(store.clone(), "bucket".to_string(), "p0".to_string(), 0);
        for i in 0..5 {
            writer.append(entry(i)).await.unwrap();
        }
        let reader = JournalReader::new(store, "bucket".to_string(), "p0".to_string());
        let entries = reader.replay_from(0).await.unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.journal_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn garbage_collection_removes_entries_at_or_below_checkpoint() {
        let store: Arc<dyn ObjectStore> = Arc::new(RedbObjectStore::in_memory().unwrap());
        let writer = JournalWriter::new(store.clone(), "bucket".to_string(), "p0".to_string(), 0);
        for i in 0..5 {
            writer.append(entry(i)).await.unwrap();
        }
        let reader = JournalReader::new(store, "bucket".to_string(), "p0".to_string());
        reader.garbage_collect_up_to(2).await.unwrap();
        let remaining = reader.replay_from(0).await.unwrap();
        let ids: Vec<u64> = remaining.iter().map(|e| e.journal_id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
