use std::{
    collections::BTreeSet,
    fs, io,
};

use core_types::{Bill, GroupId};

use crate::{
    config::{LedgerConfig, BACKUP_SUFFIX},
    error::{LedgerError, Result},
    shard_key::ShardKey,
};

/// One page of a cursor scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BillPage {
    pub bills: Vec<Bill>,
    pub has_more: bool,
}

impl BillPage {
    /// Cursor for the following page, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        if !self.has_more {
            return None;
        }
        self.bills.last().map(|bill| bill.id.as_str())
    }
}

/// Splits `<group>-<YYYYMMDD>` (optionally with a rebuild backup suffix).
fn parse_shard_file_name(name: &str) -> Option<(GroupId, ShardKey)> {
    let name = name.strip_suffix(BACKUP_SUFFIX).unwrap_or(name);
    let (group, key) = name.split_once('-')?;
    if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let group = group.parse().ok()?;
    let key = ShardKey::parse(key).ok()?;
    Some((group, key))
}

fn shard_files(config: &LedgerConfig) -> Result<Vec<(GroupId, ShardKey)>> {
    let dir = config.bills_dir();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LedgerError::io(dir, err)),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| LedgerError::io(dir, err))?;
        let name = entry.file_name();
        if let Some(parsed) = name.to_str().and_then(parse_shard_file_name) {
            found.push(parsed);
        }
    }
    Ok(found)
}

/// Shard keys of `group` present on disk, ascending. Orphaned backups count as shards.
pub(crate) fn shard_keys(config: &LedgerConfig, group: GroupId) -> Result<Vec<ShardKey>> {
    let keys: BTreeSet<ShardKey> = shard_files(config)?
        .into_iter()
        .filter(|(owner, _)| *owner == group)
        .map(|(_, key)| key)
        .collect();
    Ok(keys.into_iter().collect())
}

/// Every group owning at least one shard file, ascending.
pub fn groups_on_disk(config: &LedgerConfig) -> Result<Vec<GroupId>> {
    let groups: BTreeSet<GroupId> = shard_files(config)?
        .into_iter()
        .map(|(group, _)| group)
        .collect();
    Ok(groups.into_iter().collect())
}

/// Drops the cursor and everything already returned before it.
///
/// `bills` must already be in traversal order. An unknown cursor keeps the whole shard.
pub(crate) fn past_cursor(mut bills: Vec<Bill>, cursor: &str) -> Vec<Bill> {
    match bills.iter().position(|bill| bill.id == cursor) {
        Some(pos) => bills.split_off(pos + 1),
        None => bills,
    }
}

/// Accumulates shards in traversal order until `limit + 1` bills are seen.
pub(crate) struct PageCollector {
    limit: usize,
    bills: Vec<Bill>,
}

impl PageCollector {
    /// `limit == 0` collects everything.
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            bills: Vec::new(),
        }
    }

    /// Returns true once enough bills are collected to stop scanning.
    pub(crate) fn extend(&mut self, bills: Vec<Bill>) -> bool {
        if self.limit == 0 {
            self.bills.extend(bills);
            return false;
        }
        let wanted = self.limit + 1;
        let room = wanted.saturating_sub(self.bills.len());
        self.bills.extend(bills.into_iter().take(room));
        self.bills.len() >= wanted
    }

    pub(crate) fn finish(mut self) -> BillPage {
        let has_more = self.limit > 0 && self.bills.len() > self.limit;
        if has_more {
            self.bills.truncate(self.limit);
        }
        BillPage {
            bills: self.bills,
            has_more,
        }
    }
}
