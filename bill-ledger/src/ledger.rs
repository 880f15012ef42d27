use std::sync::Arc;

use chrono::Utc;
use core_types::{Bill, DeletedBill, GroupId, InvalidBill};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    cache::ShardCache,
    config::LedgerConfig,
    error::{LedgerError, Result},
    id::BillIdGenerator,
    scan::{self, BillPage, PageCollector},
    shard_key::ShardKey,
    storage::ShardFile,
    tombstone::TombstoneStore,
};

/// All bills of one group: day shards plus the tombstone file.
pub struct GroupLedger {
    group: GroupId,
    config: Arc<LedgerConfig>,
    shards: ShardCache,
    tombstones: Mutex<Option<TombstoneStore>>,
    ids: Arc<BillIdGenerator>,
}

impl GroupLedger {
    pub fn new(group: GroupId, config: Arc<LedgerConfig>, ids: Arc<BillIdGenerator>) -> Self {
        Self {
            group,
            shards: ShardCache::new(group, Arc::clone(&config)),
            config,
            tombstones: Mutex::new(None),
            ids,
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Validates `bill`, assigns its id and stores it. Returns the stored record.
    pub fn append(&self, mut bill: Bill) -> Result<Bill> {
        let now = Utc::now().timestamp();
        bill.normalize(now)?;
        let key = self
            .config
            .zone
            .shard_key(bill.at)
            .ok_or(InvalidBill::TimestampOutOfRange { at: bill.at })?;
        bill.id = self.ids.next_id(&key);
        self.shards
            .with_shard(&key, |shard| insert_bill(shard, now, bill.clone()))?;
        debug!("[group {}] appended bill {}", self.group, bill.id);
        Ok(bill)
    }

    pub fn get(&self, id: &str) -> Result<Bill> {
        let key = ShardKey::from_bill_id(id)?;
        self.shards
            .with_existing_shard(&key, |shard| shard.read_all())?
            .and_then(|bills| bills.into_iter().find(|bill| bill.id == id))
            .ok_or_else(|| self.not_found(id))
    }

    /// Moves a live bill into the tombstone file.
    ///
    /// The tombstone is persisted before the shard is rewritten; if the rewrite then fails the
    /// tombstone entry is withdrawn again, so the bill always survives in one of the two files.
    pub fn delete(&self, id: &str) -> Result<DeletedBill> {
        let key = ShardKey::from_bill_id(id)?;
        let deleted_at = Utc::now();
        let outcome = self.shards.with_existing_shard(&key, |shard| {
            let mut tombstoned = false;
            let result = shard.rebuild(deleted_at.timestamp(), |bills| {
                let pos = bills
                    .iter()
                    .position(|bill| bill.id == id)
                    .ok_or_else(|| self.not_found(id))?;
                let deleted = DeletedBill::new(bills.remove(pos), deleted_at);
                self.with_tombstones(|store| store.insert(deleted.clone()))?;
                tombstoned = true;
                Ok(deleted)
            });
            if result.is_err() && tombstoned {
                self.withdraw_tombstone(id);
            }
            result
        })?;
        let deleted = outcome.ok_or_else(|| self.not_found(id))?;
        info!("[group {}] deleted bill {}", self.group, id);
        Ok(deleted)
    }

    /// Puts a deleted bill back under its original id.
    ///
    /// The bill returns to the shard its id points at so later lookups by id find it. Restore
    /// always goes through a rebuild, never the append fast path: the shard may still hold a
    /// record with the same id (a delete whose tombstone removal did not finish), and the
    /// rebuild replaces it instead of writing a duplicate. The tombstone entry is claimed for
    /// the whole operation, so a concurrent purge or restore of the same id sees not-found, and
    /// it is dropped under the shard lock once the rewrite succeeded.
    pub fn restore(&self, id: &str) -> Result<Bill> {
        let deleted = self
            .with_tombstones(|store| Ok(store.begin_restore(id)))?
            .ok_or_else(|| self.deleted_not_found(id))?;
        let bill = deleted.bill;
        let reinserted = self.reinsert(&bill);
        self.with_tombstones(|store| {
            store.end_restore(id);
            Ok(())
        })?;
        if let Err(err) = reinserted {
            error!("[group {}] restore of bill {} failed: {}", self.group, id, err);
            return Err(err);
        }
        info!("[group {}] restored bill {}", self.group, id);
        Ok(bill)
    }

    /// Drops a tombstoned bill for good. A bill that is being restored is reported as not found.
    pub fn purge(&self, id: &str) -> Result<DeletedBill> {
        let purged = self
            .with_tombstones(|store| store.purge(id))?
            .ok_or_else(|| self.deleted_not_found(id))?;
        info!("[group {}] purged bill {}", self.group, id);
        Ok(purged)
    }

    pub fn get_deleted(&self, id: &str) -> Result<DeletedBill> {
        self.with_tombstones(|store| Ok(store.get(id).cloned()))?
            .ok_or_else(|| self.deleted_not_found(id))
    }

    /// Tombstoned bills, most recently deleted first.
    pub fn list_deleted(&self) -> Result<Vec<DeletedBill>> {
        self.with_tombstones(|store| Ok(store.list()))
    }

    /// Cursor pagination across day shards.
    ///
    /// With `newest_first` the scan runs from the newest bill towards the oldest, otherwise the
    /// other way round. `cursor` is the id of the last bill of the previous page (empty to start
    /// from the beginning); `limit == 0` returns everything.
    pub fn list(&self, cursor: &str, limit: usize, newest_first: bool) -> Result<BillPage> {
        let cursor_key = if cursor.is_empty() {
            None
        } else {
            Some(ShardKey::from_bill_id(cursor)?)
        };
        let mut keys = scan::shard_keys(&self.config, self.group)?;
        if newest_first {
            keys.reverse();
        }

        let mut page = PageCollector::new(limit);
        for key in keys {
            if let Some(cursor_key) = &cursor_key {
                let already_seen = if newest_first {
                    key > *cursor_key
                } else {
                    key < *cursor_key
                };
                if already_seen {
                    continue;
                }
            }
            let Some(mut bills) = self
                .shards
                .with_existing_shard(&key, |shard| shard.read_all())?
            else {
                continue;
            };
            if newest_first {
                bills.reverse();
            }
            if cursor_key.as_ref() == Some(&key) {
                bills = scan::past_cursor(bills, cursor);
            }
            if page.extend(bills) {
                break;
            }
        }
        Ok(page.finish())
    }

    /// Every bill in the inclusive `YYYYMMDD` day range, oldest first. Empty bounds are open.
    pub fn range(&self, start: &str, finish: &str) -> Result<Vec<Bill>> {
        let start = parse_bound(start)?;
        let finish = parse_bound(finish)?;
        let mut bills = Vec::new();
        for key in scan::shard_keys(&self.config, self.group)? {
            if start.as_ref().is_some_and(|start| key < *start) {
                continue;
            }
            if finish.as_ref().is_some_and(|finish| key > *finish) {
                break;
            }
            let shard = self
                .shards
                .with_existing_shard(&key, |shard| shard.read_all())?;
            if let Some(shard) = shard {
                bills.extend(shard);
            }
        }
        Ok(bills)
    }

    /// Re-sorts and rewrites every shard of the group, dropping malformed lines.
    pub fn compact(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut compacted = 0;
        for key in scan::shard_keys(&self.config, self.group)? {
            let done = self
                .shards
                .with_existing_shard(&key, |shard| shard.rebuild(now, |_| Ok(())))?;
            if done.is_some() {
                compacted += 1;
            }
        }
        debug!(
            "[group {}] compacted {} shards, {} handles open",
            self.group,
            compacted,
            self.shards.open_count()
        );
        Ok(compacted)
    }

    fn reinsert(&self, bill: &Bill) -> Result<()> {
        let key = ShardKey::from_bill_id(&bill.id)?;
        let now = Utc::now().timestamp();
        self.shards.with_shard(&key, |shard| {
            shard.rebuild(now, |bills| {
                bills.retain(|existing| existing.id != bill.id);
                bills.push(bill.clone());
                Ok(())
            })?;
            if self.with_tombstones(|store| store.remove(&bill.id))?.is_none() {
                warn!(
                    "[group {}] tombstone of bill {} was gone after restore",
                    self.group, bill.id
                );
            }
            Ok(())
        })
    }

    fn with_tombstones<R>(&self, op: impl FnOnce(&mut TombstoneStore) -> Result<R>) -> Result<R> {
        let mut guard = self.tombstones.lock();
        let store = match &mut *guard {
            Some(store) => store,
            slot @ None => {
                let store = TombstoneStore::load(self.config.tombstone_path(self.group))?;
                debug!("[group {}] loaded {} tombstones", self.group, store.len());
                slot.insert(store)
            }
        };
        op(store)
    }

    fn withdraw_tombstone(&self, id: &str) {
        if let Err(err) = self.with_tombstones(|store| store.remove(id)) {
            error!(
                "[group {}] failed to withdraw tombstone for bill {}: {}",
                self.group, id, err
            );
        }
    }

    fn not_found(&self, id: &str) -> LedgerError {
        LedgerError::BillNotFound {
            group: self.group,
            id: id.to_string(),
        }
    }

    fn deleted_not_found(&self, id: &str) -> LedgerError {
        LedgerError::DeletedBillNotFound {
            group: self.group,
            id: id.to_string(),
        }
    }
}

/// Appends in place when `bill` is newer than everything in the shard, otherwise rebuilds.
fn insert_bill(shard: &mut ShardFile, now: i64, bill: Bill) -> Result<()> {
    if bill.at > shard.latest_record_at() {
        return shard.append_line(&bill);
    }
    shard.rebuild(now, |bills| {
        bills.push(bill);
        Ok(())
    })
}

fn parse_bound(value: &str) -> Result<Option<ShardKey>> {
    if value.is_empty() {
        return Ok(None);
    }
    ShardKey::parse(value).map(Some)
}

#[cfg(test)]
mod tests {
    use core_types::Direction;
    use tempfile::tempdir;

    use super::*;
    use crate::shard_key::ShardZone;

    // 2024-01-10T12:00:00Z
    const NOON: i64 = 1_704_888_000;

    fn ledger(dir: &std::path::Path) -> GroupLedger {
        let config = LedgerConfig::new(dir.to_path_buf()).with_zone(ShardZone::utc());
        GroupLedger::new(3, Arc::new(config), Arc::new(BillIdGenerator::new()))
    }

    fn bill(at: i64) -> Bill {
        Bill::new(10, 20, Direction::Outgoing, 1_250, at)
    }

    #[test]
    fn append_assigns_id_with_shard_prefix() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let stored = ledger.append(bill(NOON).with_remark("coffee")).unwrap();
        assert!(stored.id.starts_with("20240110"));
        assert_eq!(ledger.get(&stored.id).unwrap(), stored);
        assert!(dir.path().join("3-20240110").exists());
    }

    #[test]
    fn invalid_bill_touches_nothing() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let err = ledger.append(Bill::new(0, 20, Direction::Incoming, 5, NOON));
        assert_eq!(
            err.unwrap_err().kind(),
            crate::error::ErrorKind::InvalidArgument
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn get_rejects_malformed_and_unknown_ids() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        assert!(matches!(
            ledger.get("bad"),
            Err(LedgerError::MalformedBillId { .. })
        ));
        let err = ledger.get("2024011000000000000000000001").unwrap_err();
        assert!(err.is_not_found());
        assert!(!dir.path().join("3-20240110").exists());
    }

    #[test]
    fn delete_of_unknown_id_leaves_tombstones_alone() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let stored = ledger.append(bill(NOON)).unwrap();
        let unknown = "2024011000000000000000000001";
        assert!(ledger.delete(unknown).unwrap_err().is_not_found());
        assert!(ledger.list_deleted().unwrap().is_empty());
        assert_eq!(ledger.get(&stored.id).unwrap(), stored);
    }

    #[test]
    fn restore_replaces_a_lingering_copy() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let stored = ledger.append(bill(NOON)).unwrap();
        ledger.delete(&stored.id).unwrap();

        // Simulate a crash after the shard rewrite but before the tombstone was dropped.
        let key = ShardKey::from_bill_id(&stored.id).unwrap();
        ledger
            .shards
            .with_shard(&key, |shard| shard.append_line(&stored))
            .unwrap();

        ledger.restore(&stored.id).unwrap();
        let page = ledger.list("", 0, true).unwrap();
        assert_eq!(page.bills, vec![stored]);
        assert!(ledger.list_deleted().unwrap().is_empty());
    }

    #[test]
    fn restore_requires_tombstone() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let err = ledger.restore("2024011000000000000000000001").unwrap_err();
        assert!(matches!(err, LedgerError::DeletedBillNotFound { .. }));
        assert!(matches!(
            ledger.purge("2024011000000000000000000001"),
            Err(LedgerError::DeletedBillNotFound { .. })
        ));
    }

    #[test]
    fn purge_skips_a_bill_being_restored() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let stored = ledger.append(bill(NOON)).unwrap();
        ledger.delete(&stored.id).unwrap();

        ledger
            .with_tombstones(|store| Ok(store.begin_restore(&stored.id)))
            .unwrap()
            .unwrap();
        assert!(matches!(
            ledger.purge(&stored.id),
            Err(LedgerError::DeletedBillNotFound { .. })
        ));
        assert!(matches!(
            ledger.restore(&stored.id),
            Err(LedgerError::DeletedBillNotFound { .. })
        ));
        assert_eq!(ledger.list_deleted().unwrap().len(), 1);

        ledger
            .with_tombstones(|store| {
                store.end_restore(&stored.id);
                Ok(())
            })
            .unwrap();
        assert_eq!(ledger.restore(&stored.id).unwrap(), stored);
        assert_eq!(ledger.get(&stored.id).unwrap(), stored);
        assert!(ledger.purge(&stored.id).unwrap_err().is_not_found());
    }

    #[test]
    fn range_rejects_bad_bounds_and_filters_days() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        for day in 0..4 {
            ledger.append(bill(NOON + day * 86_400)).unwrap();
        }
        assert!(matches!(
            ledger.range("2024011", ""),
            Err(LedgerError::MalformedDateKey { .. })
        ));
        assert_eq!(ledger.range("20240111", "20240112").unwrap().len(), 2);
        assert_eq!(ledger.range("", "20240110").unwrap().len(), 1);
        assert_eq!(ledger.range("20240113", "").unwrap().len(), 1);
        assert_eq!(ledger.range("", "").unwrap().len(), 4);
    }

    #[test]
    fn compact_drops_garbage_lines() {
        let dir = tempdir().unwrap();
        let ledger = ledger(dir.path());
        let stored = ledger.append(bill(NOON)).unwrap();
        let path = dir.path().join("3-20240110");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("not json\n");
        std::fs::write(&path, raw).unwrap();

        assert_eq!(ledger.compact().unwrap(), 1);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert_eq!(ledger.get(&stored.id).unwrap(), stored);
    }
}
