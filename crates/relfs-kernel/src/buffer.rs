//! Pending writes, keyed by field path.
//!
//! Writes to a field accumulate here until a flush commits them. Every open
//! handle on the same field shares one entry, so the last flush wins.
//!
//! Each entry has its own async mutex. Write, truncate and commit hold it for
//! their whole read-modify-write, including the database round-trip of a
//! commit. A committed entry is marked retired before it leaves the map;
//! a writer that raced the commit and ends up holding a retired entry starts
//! over on a fresh one instead of writing into a buffer nobody will flush.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::vfs::{VfsError, VfsResult};

/// How a write's offset is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Offsets are ignored; every write appends to the pending buffer, which
    /// starts empty.
    #[default]
    Append,
    /// Writes land at their offset in a buffer seeded with the stored value;
    /// gaps are zero-filled.
    Positional,
}

/// Identifies one field: `schema/relation/pk_value/column`.
///
/// No component can contain `/` (such names never resolve), so the joined
/// form is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(schema: &str, relation: &str, pk_value: &str, column: &str) -> Self {
        Self(format!("{schema}/{relation}/{pk_value}/{column}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct EntryState {
    /// `None` until something is written; a fresh entry holds no pending data.
    data: Option<Vec<u8>>,
    retired: bool,
}

type Entry = Arc<Mutex<EntryState>>;

/// Process-wide table of uncommitted field content.
#[derive(Debug)]
pub struct WriteBufferStore {
    entries: DashMap<FieldKey, Entry>,
    max_bytes: usize,
}

impl Default for WriteBufferStore {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl WriteBufferStore {
    /// Create an empty store. No single entry may grow past `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_bytes,
        }
    }

    /// Number of fields with an entry (pending or about to be reused).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lock the live entry for `key`, creating it if needed.
    async fn lock_live(&self, key: &FieldKey) -> OwnedMutexGuard<EntryState> {
        loop {
            let entry = Arc::clone(&self.entries.entry(key.clone()).or_default());
            let guard = entry.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Lock the existing entry for `key` without creating one.
    async fn lock_existing(&self, key: &FieldKey) -> Option<(Entry, OwnedMutexGuard<EntryState>)> {
        let entry = self.entries.get(key).map(|e| Arc::clone(&e))?;
        let guard = Arc::clone(&entry).lock_owned().await;
        if guard.retired {
            return None;
        }
        Some((entry, guard))
    }

    fn check_size(&self, key: &FieldKey, size: usize) -> VfsResult<()> {
        if size > self.max_bytes {
            return Err(VfsError::FileTooLarge(format!(
                "{key}: {size} bytes exceeds buffer limit of {}",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Append `data` to the pending buffer. Returns the bytes accepted.
    pub async fn append(&self, key: &FieldKey, data: &[u8]) -> VfsResult<usize> {
        let mut guard = self.lock_live(key).await;
        let pending = guard.data.as_ref().map_or(0, Vec::len);
        self.check_size(key, pending.saturating_add(data.len()))?;
        guard
            .data
            .get_or_insert_with(Vec::new)
            .extend_from_slice(data);
        Ok(data.len())
    }

    /// Write `data` at `offset`. A fresh entry is first filled from `seed`,
    /// which is only awaited when needed.
    pub async fn write_at<F>(
        &self,
        key: &FieldKey,
        offset: u64,
        data: &[u8],
        seed: F,
    ) -> VfsResult<usize>
    where
        F: Future<Output = VfsResult<Vec<u8>>>,
    {
        let start = usize::try_from(offset)
            .map_err(|_| VfsError::FileTooLarge(format!("{key}: offset {offset}")))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| VfsError::FileTooLarge(format!("{key}: offset {offset}")))?;
        self.check_size(key, end)?;

        let mut guard = self.lock_live(key).await;
        if guard.data.is_none() {
            // The stored value counts against the limit too; a rejected
            // write leaves the entry unseeded.
            let seeded = seed.await?;
            self.check_size(key, seeded.len().max(end))?;
            guard.data = Some(seeded);
        }
        let buf = guard.data.get_or_insert_with(Vec::new);
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    /// Resize the pending buffer to `size`, seeding a fresh entry from `seed`.
    pub async fn truncate<F>(&self, key: &FieldKey, size: u64, seed: F) -> VfsResult<()>
    where
        F: Future<Output = VfsResult<Vec<u8>>>,
    {
        let size = usize::try_from(size)
            .map_err(|_| VfsError::FileTooLarge(format!("{key}: size {size}")))?;
        self.check_size(key, size)?;

        let mut guard = self.lock_live(key).await;
        match guard.data.as_mut() {
            Some(buf) => buf.resize(size, 0),
            None if size == 0 => guard.data = Some(Vec::new()),
            None => {
                let mut buf = seed.await?;
                buf.resize(size, 0);
                guard.data = Some(buf);
            }
        }
        Ok(())
    }

    /// Pending content for `key`, if any.
    pub async fn snapshot(&self, key: &FieldKey) -> Option<Vec<u8>> {
        let (_, guard) = self.lock_existing(key).await?;
        guard.data.clone()
    }

    /// Length of the pending content for `key`, if any.
    pub async fn pending_len(&self, key: &FieldKey) -> Option<u64> {
        let (_, guard) = self.lock_existing(key).await?;
        guard.data.as_ref().map(|buf| buf.len() as u64)
    }

    /// Hand the pending content to `commit` and clear the entry if it succeeds.
    ///
    /// Returns `Ok(false)` without calling `commit` when nothing is pending.
    /// When `commit` fails the content stays buffered for a retry.
    pub async fn commit<F, Fut>(&self, key: &FieldKey, commit: F) -> VfsResult<bool>
    where
        F: FnOnce(Vec<u8>) -> Fut,
        Fut: Future<Output = VfsResult<()>>,
    {
        let Some((entry, mut guard)) = self.lock_existing(key).await else {
            return Ok(false);
        };

        let Some(data) = guard.data.clone() else {
            self.retire(key, &entry, &mut guard);
            return Ok(false);
        };

        commit(data).await?;
        self.retire(key, &entry, &mut guard);
        Ok(true)
    }

    /// Drop any pending content for `key` without committing it.
    pub async fn discard(&self, key: &FieldKey) -> bool {
        match self.lock_existing(key).await {
            Some((entry, mut guard)) => {
                let had_data = guard.data.is_some();
                self.retire(key, &entry, &mut guard);
                had_data
            }
            None => false,
        }
    }

    fn retire(&self, key: &FieldKey, entry: &Entry, guard: &mut OwnedMutexGuard<EntryState>) {
        guard.data = None;
        guard.retired = true;
        self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(column: &str) -> FieldKey {
        FieldKey::new("main", "users", "1", column)
    }

    async fn no_seed() -> VfsResult<Vec<u8>> {
        Ok(Vec::new())
    }

    #[test]
    fn test_field_key_format() {
        assert_eq!(key("bio").as_str(), "main/users/1/bio");
        assert_eq!(key("bio").to_string(), "main/users/1/bio");
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let store = WriteBufferStore::default();
        assert_eq!(store.append(&key("bio"), b"hello").await.unwrap(), 5);
        assert_eq!(store.append(&key("bio"), b" world").await.unwrap(), 6);
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"hello world");
        assert_eq!(store.pending_len(&key("bio")).await, Some(11));
    }

    #[tokio::test]
    async fn test_fields_are_isolated() {
        let store = WriteBufferStore::default();
        store.append(&key("bio"), b"one").await.unwrap();
        store.append(&key("name"), b"two").await.unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"one");
        assert_eq!(store.snapshot(&key("name")).await.unwrap(), b"two");
        assert_eq!(store.snapshot(&key("other")).await, None);
    }

    #[tokio::test]
    async fn test_write_at_seeds_and_overwrites() {
        let store = WriteBufferStore::default();
        store
            .write_at(&key("bio"), 6, b"there", async { Ok(b"hello world".to_vec()) })
            .await
            .unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"hello there");

        // Seed is ignored once the entry holds data.
        store
            .write_at(&key("bio"), 0, b"J", async { Ok(b"zzzzz".to_vec()) })
            .await
            .unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"Jello there");
    }

    #[tokio::test]
    async fn test_write_at_zero_fills_gap() {
        let store = WriteBufferStore::default();
        store.write_at(&key("bio"), 3, b"x", no_seed()).await.unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"\0\0\0x");
    }

    #[tokio::test]
    async fn test_failed_seed_leaves_nothing_pending() {
        let store = WriteBufferStore::default();
        let err = store
            .write_at(&key("bio"), 0, b"x", async { Err(VfsError::not_found("gone")) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.snapshot(&key("bio")).await, None);
    }

    #[tokio::test]
    async fn test_truncate() {
        let store = WriteBufferStore::default();
        store
            .truncate(&key("bio"), 4, async { Ok(b"stored value".to_vec()) })
            .await
            .unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"stor");

        store.truncate(&key("bio"), 6, no_seed()).await.unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"stor\0\0");

        store
            .truncate(&key("name"), 0, async { Err(VfsError::InvalidData("seed not needed".into())) })
            .await
            .unwrap();
        assert_eq!(store.snapshot(&key("name")).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_size_limit() {
        let store = WriteBufferStore::new(8);
        store.append(&key("bio"), b"12345678").await.unwrap();
        let err = store.append(&key("bio"), b"9").await.unwrap_err();
        assert!(matches!(err, VfsError::FileTooLarge(_)));
        assert_eq!(store.pending_len(&key("bio")).await, Some(8));

        let err = store
            .write_at(&key("name"), u64::MAX, b"x", no_seed())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::FileTooLarge(_)));
    }

    #[tokio::test]
    async fn test_size_limit_counts_seeded_value() {
        let store = WriteBufferStore::new(4);
        let stored = || async { Ok(b"ada lovelace".to_vec()) };

        let err = store.write_at(&key("name"), 0, b"A", stored()).await.unwrap_err();
        assert!(matches!(err, VfsError::FileTooLarge(_)), "{err}");
        assert_eq!(store.pending_len(&key("name")).await, None);
        assert_eq!(store.snapshot(&key("name")).await, None);

        // A stored value within the limit still seeds normally.
        store
            .write_at(&key("bio"), 0, b"N", async { Ok(b"navy".to_vec()) })
            .await
            .unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"Navy");
    }

    #[tokio::test]
    async fn test_commit_clears_on_success() {
        let store = WriteBufferStore::default();
        store.append(&key("bio"), b"data").await.unwrap();

        let committed = store
            .commit(&key("bio"), |data| async move {
                assert_eq!(data, b"data");
                Ok(())
            })
            .await
            .unwrap();
        assert!(committed);
        assert!(store.is_empty());

        let again = store
            .commit(&key("bio"), |_| async { Err(VfsError::InvalidData("nothing to commit".into())) })
            .await
            .unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_buffer() {
        let store = WriteBufferStore::default();
        store.append(&key("bio"), b"keep me").await.unwrap();

        let err = store
            .commit(&key("bio"), |_| async { Err(VfsError::commit_conflict("row gone")) })
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::CommitConflict(_)));
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_write_after_commit_starts_fresh() {
        let store = WriteBufferStore::default();
        store.append(&key("bio"), b"first").await.unwrap();
        store.commit(&key("bio"), |_| async { Ok(()) }).await.unwrap();
        store.append(&key("bio"), b"second").await.unwrap();
        assert_eq!(store.snapshot(&key("bio")).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_discard() {
        let store = WriteBufferStore::default();
        store.append(&key("bio"), b"x").await.unwrap();
        assert!(store.discard(&key("bio")).await);
        assert!(!store.discard(&key("bio")).await);
        assert_eq!(store.snapshot(&key("bio")).await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(WriteBufferStore::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.append(&key("bio"), b"ab").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.pending_len(&key("bio")).await, Some(16 * 50 * 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_appends_racing_commits_land_exactly_once() {
        let store = Arc::new(WriteBufferStore::default());
        let committed = Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..200 {
                    store.append(&key("bio"), b"x").await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let flusher = {
            let store = Arc::clone(&store);
            let committed = Arc::clone(&committed);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let sink = Arc::clone(&committed);
                    store
                        .commit(&key("bio"), |data| async move {
                            sink.lock().extend_from_slice(&data);
                            Ok(())
                        })
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        writer.await.unwrap();
        flusher.await.unwrap();

        let sink = Arc::clone(&committed);
        store
            .commit(&key("bio"), |data| async move {
                sink.lock().extend_from_slice(&data);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(committed.lock().len(), 200);
    }
}
