//! Rebuilding the registry from disk after a restart.
//!
//! Only the longest run of chunks that starts at offset 0 and has no gaps
//! is trusted. Anything after a gap is deleted, so a resuming client is
//! told to continue from the last byte actually persisted.

use crate::TransferError;
use crate::manager::{ChunkManager, TransferState};
use crate::registry::TransferRegistry;
use crate::store::{ChunkStore, StoredChunk};

/// What [`TransferRegistry::recover`] found on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transfers registered again and waiting for more chunks.
    pub resumed: Vec<String>,
    /// Transfers that had every byte and were assembled during recovery.
    pub assembled: Vec<String>,
}

enum Recovered {
    Resumed,
    Assembled,
    Skipped,
}

impl TransferRegistry {
    /// Registers every transfer a previous process left mid-upload.
    ///
    /// Directories without metadata (reserved but never written, or already
    /// assembled) are left alone. A transfer that fails to recover is
    /// logged and skipped.
    pub fn recover(&self) -> Result<RecoveryReport, TransferError> {
        let mut report = RecoveryReport::default();
        for id in self.dirs().list_temp_ids()? {
            if self.lookup(&id).is_some() {
                continue;
            }
            match self.recover_one(&id) {
                Ok(Recovered::Resumed) => report.resumed.push(id),
                Ok(Recovered::Assembled) => report.assembled.push(id),
                Ok(Recovered::Skipped) => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "failed to recover transfer"),
            }
        }

        tracing::info!(
            resumed = report.resumed.len(),
            assembled = report.assembled.len(),
            "transfer recovery finished"
        );
        Ok(report)
    }

    fn recover_one(&self, id: &str) -> Result<Recovered, TransferError> {
        let store = ChunkStore::open(&self.dirs().transfer_dir(id))?;
        let Some(meta) = store.read_metadata()? else {
            return Ok(Recovered::Skipped);
        };

        let chunks = contiguous_prefix(&store)?;
        let mut manager = ChunkManager::resume(id.to_string(), store, meta, chunks);

        // Crashed after the last chunk landed but before assembly ran.
        if manager.is_complete() && manager.state() == TransferState::Receiving {
            match manager.finish() {
                Ok(_) => return Ok(Recovered::Assembled),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "assembly failed during recovery");
                }
            }
        }

        tracing::info!(id = %id, offset = manager.offset(), "transfer resumed from disk");
        self.insert(id.to_string(), manager);
        Ok(Recovered::Resumed)
    }
}

fn contiguous_prefix(store: &ChunkStore) -> Result<Vec<StoredChunk>, TransferError> {
    let mut kept = Vec::new();
    let mut expected = 0u64;

    for chunk in store.scan_chunks()? {
        if chunk.len > 0 && chunk.offset == expected {
            expected += chunk.len;
            kept.push(chunk);
            continue;
        }
        tracing::warn!(
            path = %chunk.path.display(),
            offset = chunk.offset,
            expected,
            "discarding chunk outside the persisted prefix"
        );
        store.remove_chunk(&chunk)?;
    }

    Ok(kept)
}
