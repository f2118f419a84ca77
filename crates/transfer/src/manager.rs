//! Per-transfer state machine: offset tracking, assembly and cleanup.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::store::{ChunkStore, StoredChunk, TransferMetadata};
use crate::{COPY_BUFFER_SIZE, TransferError};

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Accepting chunks.
    Receiving,
    /// More bytes arrived than were declared; only a revert clears it.
    Broken,
    /// The final file has been written and the chunks removed.
    Assembled,
    /// Cancelled by the client.
    Reverted,
}

/// Result of a successful [`ChunkManager::append`].
#[derive(Debug)]
pub enum AppendOutcome {
    /// More data is expected; `offset` is where the next chunk starts.
    Partial { offset: u64 },
    /// The declared length was reached and the file assembled.
    Complete(Assembled),
}

/// An assembled transfer.
#[derive(Debug)]
pub struct Assembled {
    /// Location of the final file.
    pub path: PathBuf,
    /// Bytes written, always equal to the declared total.
    pub size: u64,
    /// Hex SHA-256 of the assembled contents.
    pub sha256: String,
    /// Artifacts that could not be removed after assembly.
    pub warnings: Vec<CleanupWarning>,
}

/// A leftover artifact. The assembled file is unaffected; only disk usage is.
#[derive(Debug)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub error: io::Error,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to remove {}: {}", self.path.display(), self.error)
    }
}

/// Owns the state of exactly one transfer.
///
/// Chunks are named by the offset at which they were appended, and offsets
/// only grow, so insertion order is also offset order.
pub struct ChunkManager {
    id: String,
    filename: String,
    total_size: u64,
    store: ChunkStore,
    offset: u64,
    chunks: Vec<StoredChunk>,
    state: TransferState,
    last_activity: Instant,
}

impl ChunkManager {
    /// Creates a manager for a transfer that has not received any data yet.
    pub fn new(id: String, store: ChunkStore, filename: String, total_size: u64) -> Self {
        Self {
            id,
            filename,
            total_size,
            store,
            offset: 0,
            chunks: Vec::new(),
            state: TransferState::Receiving,
            last_activity: Instant::now(),
        }
    }

    /// Rebuilds a manager from chunks found on disk.
    ///
    /// `chunks` must be contiguous from offset 0.
    pub(crate) fn resume(
        id: String,
        store: ChunkStore,
        meta: TransferMetadata,
        chunks: Vec<StoredChunk>,
    ) -> Self {
        let offset = chunks.iter().map(|c| c.len).sum();
        let state = if offset > meta.total_size {
            TransferState::Broken
        } else {
            TransferState::Receiving
        };
        Self {
            id,
            filename: meta.filename,
            total_size: meta.total_size,
            store,
            offset,
            chunks,
            state,
            last_activity: Instant::now(),
        }
    }

    /// Stores `reader` as the next chunk.
    ///
    /// The reader is consumed to the end on every path. Reaching the declared
    /// length assembles the file and removes the chunks before returning. If
    /// assembly fails the chunks are kept, and a later zero-byte append
    /// retries it.
    pub fn append<R: Read>(&mut self, mut reader: R) -> Result<AppendOutcome, TransferError> {
        match self.state {
            TransferState::Receiving => {}
            TransferState::Broken => {
                drain(&mut reader);
                return Err(TransferError::Oversize {
                    received: self.offset,
                    total: self.total_size,
                });
            }
            TransferState::Assembled => {
                drain(&mut reader);
                return Err(TransferError::NotActive(self.id.clone()));
            }
            TransferState::Reverted => {
                drain(&mut reader);
                return Err(TransferError::NotFound(self.id.clone()));
            }
        }

        let chunk = match self.store.write_chunk(self.offset, &mut reader) {
            Ok(chunk) => chunk,
            Err(e) => {
                drain(&mut reader);
                return Err(e);
            }
        };
        self.last_activity = Instant::now();

        // An empty artifact would share its name with the next chunk.
        if chunk.len == 0 {
            self.store.remove_chunk(&chunk)?;
        } else {
            self.offset += chunk.len;
            self.chunks.push(chunk);
        }

        if self.offset > self.total_size {
            self.state = TransferState::Broken;
            tracing::warn!(
                id = %self.id,
                received = self.offset,
                total = self.total_size,
                "transfer exceeded its declared length"
            );
            return Err(TransferError::Oversize {
                received: self.offset,
                total: self.total_size,
            });
        }

        if !self.is_complete() {
            return Ok(AppendOutcome::Partial {
                offset: self.offset,
            });
        }

        self.finish().map(AppendOutcome::Complete)
    }

    /// Concatenates every chunk, in order, into the final file.
    ///
    /// The byte count must equal the declared total. On mismatch the
    /// partially written file is left in place.
    pub fn assemble(&self) -> Result<Assembled, TransferError> {
        let path = self.store.artifact_path(&self.filename);
        let mut dest = File::create(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied: u64 = 0;

        for chunk in &self.chunks {
            let mut src = self.store.open_chunk(chunk)?;
            loop {
                let n = match src.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                hasher.update(&buf[..n]);
                dest.write_all(&buf[..n])?;
                copied += n as u64;
            }
        }
        dest.sync_all()?;

        if copied != self.total_size {
            tracing::error!(
                id = %self.id,
                copied,
                total = self.total_size,
                "assembled size does not match declared length"
            );
            return Err(TransferError::SizeMismatch {
                copied,
                total: self.total_size,
            });
        }

        Ok(Assembled {
            path,
            size: copied,
            sha256: hex::encode(hasher.finalize()),
            warnings: Vec::new(),
        })
    }

    /// Assembles, then removes chunks and metadata.
    pub(crate) fn finish(&mut self) -> Result<Assembled, TransferError> {
        let mut assembled = self.assemble()?;
        assembled.warnings = self.cleanup();
        self.chunks.clear();
        self.state = TransferState::Assembled;

        tracing::info!(
            id = %self.id,
            path = %assembled.path.display(),
            bytes = assembled.size,
            sha256 = %assembled.sha256,
            "transfer assembled"
        );
        Ok(assembled)
    }

    /// Best effort: every artifact is attempted even after a failure, and
    /// nothing already removed is restored.
    fn cleanup(&self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        for chunk in &self.chunks {
            if let Err(error) = self.store.remove_chunk(chunk) {
                warnings.push(CleanupWarning {
                    path: chunk.path.clone(),
                    error,
                });
            }
        }
        if let Err(error) = self.store.remove_metadata() {
            warnings.push(CleanupWarning {
                path: self.store.dir().join(pondrelay_protocol::constants::METADATA_FILE),
                error,
            });
        }

        for warning in &warnings {
            tracing::warn!(id = %self.id, "{warning}");
        }
        warnings
    }

    pub(crate) fn mark_reverted(&mut self) {
        self.state = TransferState::Reverted;
        self.chunks.clear();
    }

    /// Bytes persisted so far; the offset a resuming client continues from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns `true` once exactly the declared length has been received.
    pub fn is_complete(&self) -> bool {
        self.offset == self.total_size
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Chunks stored and not yet cleaned up, in assembly order.
    pub fn chunks(&self) -> &[StoredChunk] {
        &self.chunks
    }

    /// Transfer directory.
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Time since the last chunk was stored.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Reads `reader` to the end, discarding the data.
pub(crate) fn drain<R: Read>(reader: &mut R) {
    let _ = io::copy(reader, &mut io::sink());
}
