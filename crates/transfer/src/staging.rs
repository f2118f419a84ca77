//! Temporary and permanent upload roots.
//!
//! Uploads live in `<temp>/<id>/` until the form that owns them is
//! submitted; committing moves the finished file to `<save>/<id>/`.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use pondrelay_protocol::constants::is_reserved_name;

use crate::TransferError;
use crate::validation::{validate_file_name, validate_transfer_id};

/// The two directory roots every transfer moves between.
#[derive(Debug, Clone)]
pub struct UploadDirs {
    temp_dir: PathBuf,
    save_dir: PathBuf,
}

impl UploadDirs {
    /// Creates both roots if needed.
    pub fn create(temp_dir: &Path, save_dir: &Path) -> Result<Self, TransferError> {
        std::fs::create_dir_all(temp_dir)?;
        std::fs::create_dir_all(save_dir)?;
        Ok(Self {
            temp_dir: temp_dir.to_path_buf(),
            save_dir: save_dir.to_path_buf(),
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Directory of transfer `id`. The id must already be validated.
    pub fn transfer_dir(&self, id: &str) -> PathBuf {
        self.temp_dir.join(id)
    }

    /// Mints a transfer id and creates its empty directory.
    pub fn reserve(&self) -> Result<String, TransferError> {
        let id = uuid::Uuid::new_v4().to_string();
        std::fs::create_dir(self.transfer_dir(&id))?;
        tracing::info!(id = %id, "transfer reserved");
        Ok(id)
    }

    /// Stores a complete file received in a single request.
    ///
    /// Returns the new transfer id. A failed write removes the directory.
    pub fn store_single<R: Read>(
        &self,
        filename: &str,
        mut reader: R,
    ) -> Result<String, TransferError> {
        validate_file_name(filename)?;
        let id = self.reserve()?;
        let path = self.transfer_dir(&id).join(filename);

        let written = File::create(&path).and_then(|mut file| {
            let n = io::copy(&mut reader, &mut file)?;
            file.sync_all()?;
            Ok(n)
        });

        match written {
            Ok(bytes) => {
                tracing::info!(id = %id, path = %path.display(), bytes, "single upload stored");
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self.remove_transfer_dir(&id) {
                    tracing::warn!(id = %id, error = %cleanup, "failed to remove partial upload");
                }
                Err(e.into())
            }
        }
    }

    /// Deletes the directory of transfer `id`.
    ///
    /// Returns `false` if it was already gone.
    pub fn remove_transfer_dir(&self, id: &str) -> Result<bool, TransferError> {
        match std::fs::remove_dir_all(self.transfer_dir(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Finished file of a transfer still in the temp root.
    pub fn find_artifact(&self, id: &str) -> Result<PathBuf, TransferError> {
        let id = validate_transfer_id(id)?;
        find_single_file(&self.transfer_dir(&id), &id)
    }

    /// Committed file of a transfer in the save root.
    pub fn find_committed(&self, id: &str) -> Result<PathBuf, TransferError> {
        let id = validate_transfer_id(id)?;
        find_single_file(&self.save_dir.join(&id), &id)
    }

    /// Moves the finished file of `id` into the save root and drops the
    /// temp directory.
    pub(crate) fn commit(&self, id: &str) -> Result<PathBuf, TransferError> {
        let src = find_single_file(&self.transfer_dir(id), id)?;
        let dest_dir = self.save_dir.join(id);
        std::fs::create_dir_all(&dest_dir)?;
        let dest = match src.file_name() {
            Some(name) => dest_dir.join(name),
            None => return Err(TransferError::InvalidPath(src.display().to_string())),
        };

        // Rename fails across filesystems; fall back to a copy.
        if std::fs::rename(&src, &dest).is_err() {
            std::fs::copy(&src, &dest)?;
        }
        self.remove_transfer_dir(id)?;

        tracing::info!(id = %id, path = %dest.display(), "transfer committed");
        Ok(dest)
    }

    /// Ids of all transfers in the temp root.
    pub fn list_temp_ids(&self) -> Result<Vec<String>, TransferError> {
        list_ids(&self.temp_dir)
    }

    /// Ids of all committed transfers.
    pub fn list_saved_ids(&self) -> Result<Vec<String>, TransferError> {
        list_ids(&self.save_dir)
    }
}

/// Returns the one user file in `dir`, skipping chunk bookkeeping.
fn find_single_file(dir: &Path, id: &str) -> Result<PathBuf, TransferError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TransferError::NotFound(id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_reserved_name(name) || !entry.file_type()?.is_file() {
            continue;
        }
        return Ok(entry.path());
    }

    Err(TransferError::NotFound(id.to_string()))
}

fn list_ids(root: &Path) -> Result<Vec<String>, TransferError> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if validate_transfer_id(&name).is_ok_and(|canonical| canonical == name) {
            ids.push(name);
        }
    }
    ids.sort();
    Ok(ids)
}
