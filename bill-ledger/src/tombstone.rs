use std::{
    collections::{BTreeMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
};

use core_types::DeletedBill;

use crate::error::{LedgerError, Result};

/// Soft-deleted bills of one group, persisted as a single JSON object keyed by bill id.
///
/// Every mutation rewrites the whole file; a failed write rolls the in-memory map back.
#[derive(Debug)]
pub struct TombstoneStore {
    path: PathBuf,
    entries: BTreeMap<String, DeletedBill>,
    restoring: HashSet<String>,
}

impl TombstoneStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice::<Option<BTreeMap<String, DeletedBill>>>(&bytes)
                .map_err(|err| LedgerError::json(&path, err))?
                .unwrap_or_default(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(LedgerError::io(&path, err)),
        };
        Ok(Self {
            path,
            entries,
            restoring: HashSet::new(),
        })
    }

    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| LedgerError::io(parent, err))?;
        }
        let bytes =
            serde_json::to_vec(&self.entries).map_err(|err| LedgerError::json(&self.path, err))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes).map_err(|err| LedgerError::io(&tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| LedgerError::io(&self.path, err))?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DeletedBill> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, deleted: DeletedBill) -> Result<()> {
        let id = deleted.id().to_string();
        let previous = self.entries.insert(id.clone(), deleted);
        if let Err(err) = self.persist() {
            match previous {
                Some(previous) => self.entries.insert(id, previous),
                None => self.entries.remove(&id),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<DeletedBill>> {
        let Some(removed) = self.entries.remove(id) else {
            return Ok(None);
        };
        if let Err(err) = self.persist() {
            self.entries.insert(id.to_string(), removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    /// Drops an entry for good. Entries claimed by a running restore are left alone and
    /// reported as absent.
    pub fn purge(&mut self, id: &str) -> Result<Option<DeletedBill>> {
        if self.restoring.contains(id) {
            return Ok(None);
        }
        self.remove(id)
    }

    /// Claims an entry for restoring; `None` if it is absent or already being restored.
    pub fn begin_restore(&mut self, id: &str) -> Option<DeletedBill> {
        let deleted = self.entries.get(id)?.clone();
        self.restoring.insert(id.to_string()).then_some(deleted)
    }

    pub fn end_restore(&mut self, id: &str) {
        self.restoring.remove(id);
    }

    /// Most recently deleted first.
    pub fn list(&self) -> Vec<DeletedBill> {
        let mut bills: Vec<DeletedBill> = self.entries.values().cloned().collect();
        bills.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        bills
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
