use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use core_types::GroupId;
use log::debug;
use parking_lot::Mutex;

use crate::{
    config::{backup_path, LedgerConfig},
    error::Result,
    shard_key::ShardKey,
    storage::ShardFile,
};

type ShardHandle = Arc<Mutex<ShardFile>>;

/// Open shard handles for one group.
///
/// The map lock is only held to look up or insert handles; loading and rewriting happen under
/// the per-shard lock, so different shards never wait on each other.
pub(crate) struct ShardCache {
    group: GroupId,
    config: Arc<LedgerConfig>,
    handles: Mutex<HashMap<ShardKey, ShardHandle>>,
}

impl ShardCache {
    pub(crate) fn new(group: GroupId, config: Arc<LedgerConfig>) -> Self {
        Self {
            group,
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `op` against the shard, creating it if needed.
    pub(crate) fn with_shard<R>(
        &self,
        key: &ShardKey,
        op: impl FnOnce(&mut ShardFile) -> Result<R>,
    ) -> Result<R> {
        let handle = self.get_or_create(key);
        self.run(key, &handle, op)
    }

    /// Runs `op` only when the shard is cached or present on disk.
    pub(crate) fn with_existing_shard<R>(
        &self,
        key: &ShardKey,
        op: impl FnOnce(&mut ShardFile) -> Result<R>,
    ) -> Result<Option<R>> {
        match self.existing(key) {
            Some(handle) => self.run(key, &handle, op).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.handles.lock().len()
    }

    fn get_or_create(&self, key: &ShardKey) -> ShardHandle {
        let mut handles = self.handles.lock();
        match handles.get(key) {
            Some(handle) => Arc::clone(handle),
            None => self.insert(&mut handles, key),
        }
    }

    fn existing(&self, key: &ShardKey) -> Option<ShardHandle> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(key) {
            return Some(Arc::clone(handle));
        }
        let path = self.config.shard_path(self.group, key);
        if !path.exists() && !backup_path(&path).exists() {
            return None;
        }
        Some(self.insert(&mut handles, key))
    }

    fn insert(&self, handles: &mut HashMap<ShardKey, ShardHandle>, key: &ShardKey) -> ShardHandle {
        self.evict_idle(handles);
        let path = self.config.shard_path(self.group, key);
        let handle = Arc::new(Mutex::new(ShardFile::unopened(key.clone(), path)));
        handles.insert(key.clone(), Arc::clone(&handle));
        handle
    }

    fn run<R>(
        &self,
        key: &ShardKey,
        handle: &ShardHandle,
        op: impl FnOnce(&mut ShardFile) -> Result<R>,
    ) -> Result<R> {
        let mut shard = handle.lock();
        shard.touch();
        let result = shard
            .ensure_open(Utc::now().timestamp())
            .and_then(|()| op(&mut shard));
        let broken = !shard.is_open();
        drop(shard);
        if broken {
            self.discard(key, handle);
        }
        result
    }

    /// Drops a handle whose file could not be reopened so the next access starts from disk.
    fn discard(&self, key: &ShardKey, handle: &ShardHandle) {
        let mut handles = self.handles.lock();
        let ours = handles
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, handle));
        // Another caller may still be queued on this handle; it reopens the file itself.
        if ours && Arc::strong_count(handle) <= 2 {
            handles.remove(key);
            debug!("[group {}] evicted broken shard {}", self.group, key);
        }
    }

    /// Closes least recently used handles nobody else holds once the cap is reached.
    fn evict_idle(&self, handles: &mut HashMap<ShardKey, ShardHandle>) {
        let cap = self.config.max_open_shards;
        if cap == 0 || handles.len() < cap {
            return;
        }
        let mut idle: Vec<_> = handles
            .iter()
            .filter(|(_, handle)| Arc::strong_count(handle) == 1)
            .map(|(key, handle)| (handle.lock().last_access_at(), key.clone()))
            .collect();
        idle.sort();
        let excess = handles.len() + 1 - cap;
        for (_, key) in idle.into_iter().take(excess) {
            if let Some(handle) = handles.remove(&key) {
                let mut shard = handle.lock();
                debug!("[group {}] closing idle shard {}", self.group, shard.key());
                shard.close();
            }
        }
    }
}
