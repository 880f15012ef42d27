use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::FixedOffset;
use core_types::{AppConfig, GroupId};

use crate::{
    error::{LedgerError, Result},
    shard_key::{ShardKey, ShardZone},
};

pub const DEFAULT_MAX_OPEN_SHARDS: usize = 256;
pub const DELETED_FILE_SUFFIX: &str = "deleted-records";
pub const BACKUP_SUFFIX: &str = ".bak";

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub bills_dir: PathBuf,
    pub zone: ShardZone,
    /// 0 keeps every handle open for the process lifetime.
    pub max_open_shards: usize,
}

impl LedgerConfig {
    pub fn new(bills_dir: PathBuf) -> Self {
        Self {
            bills_dir,
            zone: ShardZone::Local,
            max_open_shards: DEFAULT_MAX_OPEN_SHARDS,
        }
    }

    pub fn with_zone(mut self, zone: ShardZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn from_app(app: &AppConfig) -> Result<Self> {
        let zone = match app.ledger.utc_offset_minutes {
            Some(minutes) => FixedOffset::east_opt(minutes * 60)
                .map(ShardZone::Fixed)
                .ok_or(LedgerError::InvalidZoneOffset { minutes })?,
            None => ShardZone::Local,
        };
        Ok(Self {
            bills_dir: app.bills_dir(),
            zone,
            max_open_shards: app.ledger.max_open_shards,
        })
    }

    pub fn bills_dir(&self) -> &Path {
        &self.bills_dir
    }

    pub fn shard_file_name(group: GroupId, key: &ShardKey) -> String {
        format!("{group}-{key}")
    }

    pub fn shard_path(&self, group: GroupId, key: &ShardKey) -> PathBuf {
        self.bills_dir.join(Self::shard_file_name(group, key))
    }

    pub fn tombstone_path(&self, group: GroupId) -> PathBuf {
        self.bills_dir
            .join(format!("{group}-{DELETED_FILE_SUFFIX}"))
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        if !self.bills_dir.exists() {
            fs::create_dir_all(&self.bills_dir).map_err(|source| LedgerError::Io {
                path: self.bills_dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}
