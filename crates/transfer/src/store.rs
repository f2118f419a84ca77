//! Durable per-transfer chunk storage.
//!
//! Every transfer owns one directory. Each chunk lands in its own file named
//! after the offset it starts at, so names never collide within a transfer
//! and sort back into upload order.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pondrelay_protocol::constants::{METADATA_FILE, chunk_file_name, parse_chunk_file_name};

use crate::TransferError;

/// A chunk artifact persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// Offset within the transfer the chunk starts at.
    pub offset: u64,
    /// Bytes actually written.
    pub len: u64,
    /// Location of the artifact.
    pub path: PathBuf,
}

/// Transfer metadata captured from the first chunk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub filename: String,
    pub total_size: u64,
}

/// Reads and writes the artifacts of a single transfer directory.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Binds to an existing transfer directory.
    ///
    /// Fails with [`TransferError::NotFound`] if the directory was never
    /// reserved or has since been reverted.
    pub fn open(dir: &Path) -> Result<Self, TransferError> {
        if !dir.is_dir() {
            return Err(TransferError::NotFound(dir.display().to_string()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the transfer directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the artifact path of the chunk starting at `offset`.
    pub fn chunk_path(&self, offset: u64) -> PathBuf {
        self.dir.join(chunk_file_name(offset))
    }

    /// Returns the path of the assembled file.
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Streams `reader` to the chunk artifact for `offset`.
    ///
    /// A stale artifact at the same offset (left by an interrupted write) is
    /// truncated. The data is flushed to disk before returning.
    pub fn write_chunk<R: Read>(
        &self,
        offset: u64,
        reader: &mut R,
    ) -> Result<StoredChunk, TransferError> {
        let path = self.chunk_path(offset);
        let mut file = File::create(&path)?;
        let len = io::copy(reader, &mut file)?;
        file.sync_data()?;

        tracing::debug!(path = %path.display(), offset, bytes = len, "chunk stored");
        Ok(StoredChunk { offset, len, path })
    }

    /// Opens a stored chunk for reading.
    pub fn open_chunk(&self, chunk: &StoredChunk) -> Result<File, TransferError> {
        Ok(File::open(&chunk.path)?)
    }

    /// Deletes a chunk artifact. A chunk that is already gone is not an error.
    pub fn remove_chunk(&self, chunk: &StoredChunk) -> io::Result<()> {
        remove_if_exists(&chunk.path)
    }

    /// Lists every chunk artifact in the directory, sorted by offset.
    pub fn scan_chunks(&self) -> Result<Vec<StoredChunk>, TransferError> {
        let mut chunks = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(offset) = name.to_str().and_then(parse_chunk_file_name) else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            chunks.push(StoredChunk {
                offset,
                len: meta.len(),
                path: entry.path(),
            });
        }
        chunks.sort_by_key(|c| c.offset);
        Ok(chunks)
    }

    /// Persists the transfer metadata next to the chunks.
    pub fn write_metadata(&self, meta: &TransferMetadata) -> Result<(), TransferError> {
        let json = serde_json::to_vec(meta)?;
        std::fs::write(self.dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Reads the transfer metadata, if the first chunk ever arrived.
    pub fn read_metadata(&self) -> Result<Option<TransferMetadata>, TransferError> {
        match std::fs::read(self.dir.join(METADATA_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes the metadata file. A missing file is not an error.
    pub fn remove_metadata(&self) -> io::Result<()> {
        remove_if_exists(&self.dir.join(METADATA_FILE))
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_requires_existing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ChunkStore::open(&missing),
            Err(TransferError::NotFound(_))
        ));
        assert!(ChunkStore::open(dir.path()).is_ok());
    }

    #[test]
    fn write_chunk_names_by_offset() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();

        let chunk = store.write_chunk(42, &mut &b"hello"[..]).unwrap();
        assert_eq!(chunk.offset, 42);
        assert_eq!(chunk.len, 5);
        assert_eq!(chunk.path, dir.path().join("42.chunk"));
        assert_eq!(std::fs::read(&chunk.path).unwrap(), b"hello");
    }

    #[test]
    fn write_chunk_truncates_stale_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();

        store.write_chunk(0, &mut &b"partial write"[..]).unwrap();
        let chunk = store.write_chunk(0, &mut &b"ok"[..]).unwrap();
        assert_eq!(chunk.len, 2);
        assert_eq!(std::fs::read(&chunk.path).unwrap(), b"ok");
    }

    #[test]
    fn scan_chunks_sorts_numerically() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();

        store.write_chunk(10, &mut &b"cc"[..]).unwrap();
        store.write_chunk(0, &mut &b"aaaaa"[..]).unwrap();
        store.write_chunk(5, &mut &b"bbbbb"[..]).unwrap();
        std::fs::write(dir.path().join("holiday.jpg"), b"not a chunk").unwrap();

        let chunks = store.scan_chunks().unwrap();
        let offsets: Vec<u64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 5, 10]);
        assert_eq!(chunks[2].len, 2);
    }

    #[test]
    fn metadata_roundtrip_and_removal() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();
        assert_eq!(store.read_metadata().unwrap(), None);

        let meta = TransferMetadata {
            filename: "movie.mkv".into(),
            total_size: 1 << 30,
        };
        store.write_metadata(&meta).unwrap();
        assert_eq!(store.read_metadata().unwrap(), Some(meta));

        let raw = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        assert!(raw.contains("totalSize"));

        store.remove_metadata().unwrap();
        store.remove_metadata().unwrap();
        assert_eq!(store.read_metadata().unwrap(), None);
    }

    #[test]
    fn remove_chunk_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path()).unwrap();
        let chunk = store.write_chunk(0, &mut &b"x"[..]).unwrap();

        store.remove_chunk(&chunk).unwrap();
        store.remove_chunk(&chunk).unwrap();
        assert!(!chunk.path.exists());
    }
}
