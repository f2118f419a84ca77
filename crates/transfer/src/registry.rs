//! Concurrency-safe map from transfer id to its [`ChunkManager`].
//!
//! The map lock only guards bookkeeping. Each transfer carries its own
//! mutex, which serializes appends, reverts and sweeps for that id while
//! leaving other transfers untouched.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use pondrelay_protocol::UploadMetadata;

use crate::manager::{AppendOutcome, ChunkManager, drain};
use crate::staging::UploadDirs;
use crate::store::{ChunkStore, TransferMetadata};
use crate::TransferError;
use crate::validation::{validate_file_name, validate_transfer_id};

/// A manager shared between the registry and in-flight requests.
pub type SharedManager = Arc<Mutex<ChunkManager>>;

/// What a [`TransferRegistry::sweep`] pass removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Registered transfers evicted for inactivity.
    pub evicted: Vec<String>,
    /// Untracked transfer directories deleted for age.
    pub removed_dirs: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.removed_dirs.is_empty()
    }
}

/// Tracks every transfer that has started receiving data.
pub struct TransferRegistry {
    dirs: UploadDirs,
    transfers: Mutex<HashMap<String, SharedManager>>,
}

impl TransferRegistry {
    pub fn new(dirs: UploadDirs) -> Self {
        Self {
            dirs,
            transfers: Mutex::new(HashMap::new()),
        }
    }

    /// Temp and save roots backing this registry.
    pub fn dirs(&self) -> &UploadDirs {
        &self.dirs
    }

    /// Returns the manager for `id`, building it with `creator` if absent.
    ///
    /// Check and insert happen under one lock: concurrent first requests for
    /// the same id run `creator` once and all receive the same manager. A
    /// failing `creator` leaves the id absent.
    pub fn get_or_create<F>(&self, id: &str, creator: F) -> Result<SharedManager, TransferError>
    where
        F: FnOnce() -> Result<ChunkManager, TransferError>,
    {
        let mut transfers = lock(&self.transfers);
        if let Some(existing) = transfers.get(id) {
            return Ok(Arc::clone(existing));
        }
        let manager = Arc::new(Mutex::new(creator()?));
        transfers.insert(id.to_string(), Arc::clone(&manager));
        Ok(manager)
    }

    /// Looks up a registered transfer without creating it.
    pub fn lookup(&self, id: &str) -> Option<SharedManager> {
        lock(&self.transfers).get(id).cloned()
    }

    /// Evicts `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<SharedManager> {
        lock(&self.transfers).remove(id)
    }

    /// Number of registered transfers.
    pub fn len(&self) -> usize {
        lock(&self.transfers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all registered transfers.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.transfers).keys().cloned().collect()
    }

    /// Appends one chunk to the transfer `id`.
    ///
    /// The first chunk for an id captures its metadata; later chunks must
    /// repeat the same `Upload-Length`. A differing `Upload-Name` is ignored.
    /// When `meta.offset` is present it must equal the current offset.
    /// A completed transfer is evicted before this returns, and further
    /// chunks for it fail with [`TransferError::NotActive`].
    ///
    /// The reader is consumed to the end on every path.
    pub fn append<R: Read>(
        &self,
        id: &str,
        meta: &UploadMetadata,
        mut reader: R,
    ) -> Result<AppendOutcome, TransferError> {
        let resolved = validate_transfer_id(id).and_then(|id| {
            let manager = self.get_or_create(&id, || self.create_manager(&id, meta))?;
            Ok((id, manager))
        });
        let (id, manager) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                drain(&mut reader);
                return Err(e);
            }
        };

        let mut guard = lock(&manager);
        if let Err(e) = check_continuation(&guard, meta) {
            drain(&mut reader);
            return Err(e);
        }

        let outcome = guard.append(reader)?;
        if let AppendOutcome::Complete(_) = &outcome {
            // Lock order is always manager, then map.
            self.remove(&id);
        }
        Ok(outcome)
    }

    /// Next expected offset for `id`, without side effects.
    ///
    /// A reserved transfer that has not received data yet reports 0; a
    /// finished one reports the size of its file.
    pub fn offset(&self, id: &str) -> Result<u64, TransferError> {
        let id = validate_transfer_id(id)?;
        if let Some(manager) = self.lookup(&id) {
            return Ok(lock(&manager).offset());
        }
        match self.dirs.find_artifact(&id) {
            Ok(path) => Ok(std::fs::metadata(path)?.len()),
            Err(TransferError::NotFound(_)) if self.dirs.transfer_dir(&id).is_dir() => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Cancels `id`: evicts it and deletes its directory.
    ///
    /// Waits for an in-flight append on the same id to finish first. The
    /// directory is deleted under the map lock, so no first chunk can
    /// register the id while it disappears. Reverting an unknown or already
    /// reverted id succeeds.
    pub fn revert(&self, id: &str) -> Result<(), TransferError> {
        let id = validate_transfer_id(id)?;
        loop {
            let manager = self.lookup(&id);
            let mut guard = manager.as_ref().map(|m| lock(m));
            let mut transfers = lock(&self.transfers);

            // Registered after the lookup; take that manager's lock first.
            if let Some(current) = transfers.get(&id) {
                if !manager.as_ref().is_some_and(|m| Arc::ptr_eq(m, current)) {
                    continue;
                }
            }

            if let Some(guard) = guard.as_mut() {
                guard.mark_reverted();
            }
            transfers.remove(&id);
            let removed = self.dirs.remove_transfer_dir(&id)?;
            tracing::info!(id = %id, removed, "transfer reverted");
            return Ok(());
        }
    }

    /// Moves the assembled file of a finished transfer to the save root.
    pub fn commit(&self, id: &str) -> Result<PathBuf, TransferError> {
        let id = validate_transfer_id(id)?;
        if self.lookup(&id).is_some() {
            return Err(TransferError::NotActive(format!("{id} is still uploading")));
        }
        self.dirs.commit(&id)
    }

    /// Finished file of `id`, before commit.
    ///
    /// A transfer still registered has no trustworthy file yet.
    pub fn restore(&self, id: &str) -> Result<PathBuf, TransferError> {
        let id = validate_transfer_id(id)?;
        if self.lookup(&id).is_some() {
            return Err(TransferError::NotActive(format!("{id} is still uploading")));
        }
        self.dirs.find_artifact(&id)
    }

    /// Evicts transfers idle for at least `ttl` and deletes untracked
    /// transfer directories not modified for at least `ttl`.
    pub fn sweep(&self, ttl: Duration) -> Result<SweepReport, TransferError> {
        let mut report = SweepReport::default();

        let candidates: Vec<(String, SharedManager)> = {
            let transfers = lock(&self.transfers);
            transfers
                .iter()
                .filter(|(_, manager)| {
                    // A busy manager is not idle.
                    manager.try_lock().is_ok_and(|m| m.idle_for() >= ttl)
                })
                .map(|(id, manager)| (id.clone(), Arc::clone(manager)))
                .collect()
        };

        for (id, manager) in candidates {
            let mut guard = lock(&manager);
            if guard.idle_for() < ttl {
                continue;
            }
            guard.mark_reverted();
            {
                let mut transfers = lock(&self.transfers);
                transfers.remove(&id);
                if let Err(e) = self.dirs.remove_transfer_dir(&id) {
                    tracing::warn!(id = %id, error = %e, "failed to delete stale transfer");
                }
            }
            tracing::info!(id = %id, offset = guard.offset(), "evicted idle transfer");
            report.evicted.push(id);
        }

        // Hold the map so no first chunk can claim a directory mid-delete.
        let transfers = lock(&self.transfers);
        let now = SystemTime::now();
        for id in self.dirs.list_temp_ids()? {
            if transfers.contains_key(&id) {
                continue;
            }
            let dir = self.dirs.transfer_dir(&id);
            let age = std::fs::metadata(&dir)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_none_or(|age| age < ttl) {
                continue;
            }
            match self.dirs.remove_transfer_dir(&id) {
                Ok(_) => {
                    tracing::info!(id = %id, "removed stale transfer directory");
                    report.removed_dirs.push(id);
                }
                Err(e) => tracing::warn!(id = %id, error = %e, "failed to delete stale directory"),
            }
        }

        Ok(report)
    }

    /// Registers a manager built from already-recovered state.
    pub(crate) fn insert(&self, id: String, manager: ChunkManager) {
        lock(&self.transfers).insert(id, Arc::new(Mutex::new(manager)));
    }

    fn create_manager(
        &self,
        id: &str,
        meta: &UploadMetadata,
    ) -> Result<ChunkManager, TransferError> {
        validate_file_name(&meta.filename)?;
        let store = ChunkStore::open(&self.dirs.transfer_dir(id))
            .map_err(|_| TransferError::NotFound(id.to_string()))?;

        // Evicted after assembly; the directory now only holds the result.
        match self.dirs.find_artifact(id) {
            Ok(_) => {
                return Err(TransferError::NotActive(format!("{id} is already assembled")));
            }
            Err(TransferError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        if let Some(claimed) = meta.offset.filter(|&claimed| claimed != 0) {
            return Err(TransferError::OffsetMismatch {
                expected: 0,
                got: claimed,
            });
        }

        store.write_metadata(&TransferMetadata {
            filename: meta.filename.clone(),
            total_size: meta.total_size,
        })?;

        tracing::info!(
            id = %id,
            filename = %meta.filename,
            total_size = meta.total_size,
            "transfer receiving"
        );
        Ok(ChunkManager::new(
            id.to_string(),
            store,
            meta.filename.clone(),
            meta.total_size,
        ))
    }
}

/// Checks a chunk request against the metadata the transfer started with.
fn check_continuation(manager: &ChunkManager, meta: &UploadMetadata) -> Result<(), TransferError> {
    if manager.total_size() != meta.total_size {
        return Err(TransferError::Validation(format!(
            "Upload-Length changed from {} to {}",
            manager.total_size(),
            meta.total_size
        )));
    }
    if manager.filename() != meta.filename {
        tracing::warn!(
            id = %manager.id(),
            recorded = manager.filename(),
            sent = %meta.filename,
            "ignoring changed Upload-Name"
        );
    }
    if let Some(claimed) = meta.offset.filter(|&claimed| claimed != manager.offset()) {
        return Err(TransferError::OffsetMismatch {
            expected: manager.offset(),
            got: claimed,
        });
    }
    Ok(())
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TransferRegistry) {
        let tmp = TempDir::new().unwrap();
        let dirs = UploadDirs::create(&tmp.path().join("temp"), &tmp.path().join("save")).unwrap();
        (tmp, TransferRegistry::new(dirs))
    }

    fn meta(total: u64, offset: Option<u64>) -> UploadMetadata {
        UploadMetadata {
            total_size: total,
            filename: "greeting.txt".into(),
            offset,
        }
    }

    #[test]
    fn hello_world_end_to_end() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();

        let outcome = registry.append(&id, &meta(10, Some(0)), &b"HELLO"[..]).unwrap();
        assert!(matches!(outcome, AppendOutcome::Partial { offset: 5 }));
        assert!(registry.lookup(&id).is_some());

        let outcome = registry.append(&id, &meta(10, Some(5)), &b"WORLD"[..]).unwrap();
        let AppendOutcome::Complete(assembled) = outcome else {
            panic!("transfer should be complete");
        };
        assert_eq!(std::fs::read(&assembled.path).unwrap(), b"HELLOWORLD");
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());

        let leftovers: Vec<_> = std::fs::read_dir(registry.dirs().transfer_dir(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(leftovers, vec!["greeting.txt".to_string()]);
        assert_eq!(registry.offset(&id).unwrap(), 10);
    }

    #[test]
    fn oversize_leaves_transfer_registered() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();

        let err = registry
            .append(&id, &meta(10, Some(0)), &b"HELLOWORLD!"[..])
            .unwrap_err();
        assert!(matches!(err, TransferError::Oversize { .. }));
        assert_eq!(registry.offset(&id).unwrap(), 11);
        assert!(registry.lookup(&id).is_some());

        registry.revert(&id).unwrap();
        assert!(registry.lookup(&id).is_none());
        assert!(!registry.dirs().transfer_dir(&id).exists());
    }

    #[test]
    fn resume_query_reports_persisted_offset() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        assert_eq!(registry.offset(&id).unwrap(), 0);

        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();
        assert_eq!(registry.offset(&id).unwrap(), 5);
        assert_eq!(registry.offset(&id).unwrap(), 5);

        let outcome = registry
            .append(&id, &meta(10, Some(5)), &b"WORLD"[..])
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Complete(_)));
    }

    #[test]
    fn offset_of_unknown_transfer_is_not_found() {
        let (_tmp, registry) = setup();
        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            registry.offset(&id),
            Err(TransferError::NotFound(_))
        ));
        assert!(matches!(
            registry.offset("not-a-uuid"),
            Err(TransferError::Validation(_))
        ));
    }

    #[test]
    fn mismatched_offset_is_rejected_without_mutation() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, Some(0)), &b"HELLO"[..]).unwrap();

        let err = registry
            .append(&id, &meta(10, Some(0)), &b"HELLO"[..])
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::OffsetMismatch {
                expected: 5,
                got: 0
            }
        ));
        assert_eq!(registry.offset(&id).unwrap(), 5);
    }

    #[test]
    fn changed_length_is_rejected() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();

        let err = registry.append(&id, &meta(12, None), &b"WORLD"[..]).unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
        assert_eq!(registry.offset(&id).unwrap(), 5);
    }

    #[test]
    fn changed_name_keeps_first_name() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();

        let renamed = UploadMetadata {
            filename: "other.txt".into(),
            ..meta(10, None)
        };
        let AppendOutcome::Complete(assembled) =
            registry.append(&id, &renamed, &b"WORLD"[..]).unwrap()
        else {
            panic!("transfer should be complete");
        };
        assert!(assembled.path.ends_with("greeting.txt"));
    }

    #[test]
    fn unreserved_transfer_is_not_created() {
        let (_tmp, registry) = setup();
        let id = uuid::Uuid::new_v4().to_string();

        let err = registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
        assert!(registry.lookup(&id).is_none());
    }

    #[test]
    fn unsafe_file_name_is_rejected() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        let evil = UploadMetadata {
            filename: "../escape.txt".into(),
            ..meta(10, None)
        };

        let err = registry.append(&id, &evil, &b"HELLO"[..]).unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_get_or_create_builds_one_manager() {
        let (_tmp, registry) = setup();
        let registry = Arc::new(registry);
        let id = registry.dirs().reserve().unwrap();
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let created = Arc::clone(&created);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_create(&id, || {
                            created.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            let store = ChunkStore::open(&registry.dirs().transfer_dir(&id))?;
                            Ok(ChunkManager::new(id.clone(), store, "f.bin".into(), 4))
                        })
                        .unwrap()
                })
            })
            .collect();

        let managers: Vec<SharedManager> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
        for m in &managers {
            assert!(Arc::ptr_eq(m, &managers[0]));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_transfers_are_independent() {
        let (_tmp, registry) = setup();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let id = registry.dirs().reserve().unwrap();
                    let body = vec![i; 64];
                    for (n, part) in body.chunks(16).enumerate() {
                        registry
                            .append(&id, &meta(64, Some(n as u64 * 16)), part)
                            .unwrap();
                    }
                    (id, body)
                })
            })
            .collect();

        for handle in handles {
            let (id, body) = handle.join().unwrap();
            let path = registry.dirs().transfer_dir(&id).join("greeting.txt");
            assert_eq!(std::fs::read(path).unwrap(), body);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn revert_is_idempotent() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();

        registry.revert(&id).unwrap();
        registry.revert(&id).unwrap();
        registry.revert(&uuid::Uuid::new_v4().to_string()).unwrap();
        assert!(!registry.dirs().transfer_dir(&id).exists());
    }

    #[test]
    fn append_after_revert_fails_cleanly() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        let stale = registry
            .get_or_create(&id, || registry.create_manager(&id, &meta(10, None)))
            .unwrap();
        registry.revert(&id).unwrap();

        // A request that grabbed the manager before the revert.
        let err = lock(&stale).append(&b"HELLO"[..]).unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));

        // A request that arrives after the revert.
        let err = registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn retried_final_chunk_after_completion_is_refused() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, Some(0)), &b"HELLO"[..]).unwrap();
        registry.append(&id, &meta(10, Some(5)), &b"WORLD"[..]).unwrap();

        // The client never saw the last 200 and sends the chunk again.
        let err = registry
            .append(&id, &meta(10, Some(5)), &b"WORLD"[..])
            .unwrap_err();
        assert!(matches!(err, TransferError::NotActive(_)));
        let err = registry.append(&id, &meta(10, None), &b""[..]).unwrap_err();
        assert!(matches!(err, TransferError::NotActive(_)));

        assert!(registry.lookup(&id).is_none());
        assert_eq!(registry.offset(&id).unwrap(), 10);
        let path = registry.restore(&id).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"HELLOWORLD");

        let contents: Vec<_> = std::fs::read_dir(registry.dirs().transfer_dir(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(contents, vec!["greeting.txt".to_string()]);
    }

    #[test]
    fn first_chunk_must_start_at_zero() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();

        let err = registry
            .append(&id, &meta(10, Some(5)), &b"WORLD"[..])
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::OffsetMismatch {
                expected: 0,
                got: 5
            }
        ));
        assert!(registry.is_empty());
        let store = ChunkStore::open(&registry.dirs().transfer_dir(&id)).unwrap();
        assert!(store.read_metadata().unwrap().is_none());
        assert_eq!(registry.offset(&id).unwrap(), 0);
    }

    #[test]
    fn rejected_chunks_are_consumed() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, Some(0)), &b"HELLO"[..]).unwrap();

        let mut body = std::io::Cursor::new(b"WORLD".to_vec());
        registry
            .append(&id, &meta(10, Some(0)), &mut body)
            .unwrap_err();
        assert_eq!(body.position(), 5);

        let mut body = std::io::Cursor::new(b"WORLD".to_vec());
        registry
            .append(&id, &meta(99, Some(5)), &mut body)
            .unwrap_err();
        assert_eq!(body.position(), 5);

        let mut body = std::io::Cursor::new(b"WORLD".to_vec());
        registry
            .append("not-a-uuid", &meta(10, None), &mut body)
            .unwrap_err();
        assert_eq!(body.position(), 5);
    }

    #[test]
    fn revert_racing_first_chunk_leaves_nothing_behind() {
        for _ in 0..50 {
            let (_tmp, registry) = setup();
            let registry = Arc::new(registry);
            let id = registry.dirs().reserve().unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let appender = {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.append(&id, &meta(10, Some(0)), &b"HELLO"[..])
                })
            };
            let reverter = {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.revert(&id)
                })
            };

            reverter.join().unwrap().unwrap();
            match appender.join().unwrap() {
                Ok(AppendOutcome::Partial { offset: 5 }) | Err(TransferError::NotFound(_)) => {}
                other => panic!("unexpected append result: {other:?}"),
            }

            assert!(registry.lookup(&id).is_none());
            assert!(!registry.dirs().transfer_dir(&id).exists());
            assert!(matches!(
                registry.offset(&id),
                Err(TransferError::NotFound(_))
            ));
        }
    }

    #[test]
    fn commit_moves_finished_transfer() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();
        assert!(matches!(
            registry.commit(&id),
            Err(TransferError::NotActive(_))
        ));

        registry.append(&id, &meta(10, None), &b"WORLD"[..]).unwrap();
        let saved = registry.commit(&id).unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"HELLOWORLD");
        assert!(!registry.dirs().transfer_dir(&id).exists());
    }

    #[test]
    fn restore_waits_for_assembly() {
        let (_tmp, registry) = setup();
        let id = registry.dirs().reserve().unwrap();
        registry.append(&id, &meta(10, None), &b"HELLO"[..]).unwrap();
        assert!(matches!(
            registry.restore(&id),
            Err(TransferError::NotActive(_))
        ));

        registry.append(&id, &meta(10, None), &b"WORLD"[..]).unwrap();
        let path = registry.restore(&id).unwrap();
        assert!(path.ends_with("greeting.txt"));
    }

    #[test]
    fn sweep_evicts_idle_transfers() {
        let (_tmp, registry) = setup();
        let active = registry.dirs().reserve().unwrap();
        registry.append(&active, &meta(10, None), &b"HELLO"[..]).unwrap();
        let reserved = registry.dirs().reserve().unwrap();

        let report = registry.sweep(Duration::from_secs(3600)).unwrap();
        assert!(report.is_empty());
        assert!(registry.lookup(&active).is_some());

        let report = registry.sweep(Duration::ZERO).unwrap();
        assert_eq!(report.evicted, vec![active.clone()]);
        assert_eq!(report.removed_dirs, vec![reserved.clone()]);
        assert!(registry.is_empty());
        assert!(!registry.dirs().transfer_dir(&active).exists());
        assert!(!registry.dirs().transfer_dir(&reserved).exists());
    }
}
