use std::{collections::HashMap, path::PathBuf, sync::Arc};

use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use core_types::{Bill, DeletedBill, GroupId};
use log::{error, info, warn};
use parking_lot::RwLock;

use crate::{
    config::LedgerConfig,
    error::{LedgerError, Result},
    id::BillIdGenerator,
    ledger::GroupLedger,
    scan::{self, BillPage},
    shard_key::ShardKey,
    stats::{BillDelta, DeltaKind, DeltaSink, PeriodSummary, Statistics},
};

/// Entry point for every group: lazily creates one [`GroupLedger`] per group and fans
/// statistics deltas out to subscribers.
pub struct LedgerController {
    config: Arc<LedgerConfig>,
    ids: Arc<BillIdGenerator>,
    groups: RwLock<HashMap<GroupId, Arc<GroupLedger>>>,
    sinks: RwLock<Vec<Arc<dyn DeltaSink>>>,
}

impl LedgerController {
    pub fn bootstrap(config: LedgerConfig) -> Result<(Self, LedgerStorageReport)> {
        config.ensure_dirs()?;
        let groups = scan::groups_on_disk(&config)?;
        let report = LedgerStorageReport {
            bills_dir: config.bills_dir().to_path_buf(),
            groups: groups.len(),
        };
        info!(
            "ledger ready at {} ({} groups on disk)",
            report.bills_dir.display(),
            report.groups
        );
        Ok((
            Self {
                config: Arc::new(config),
                ids: Arc::new(BillIdGenerator::new()),
                groups: RwLock::new(HashMap::new()),
                sinks: RwLock::new(Vec::new()),
            },
            report,
        ))
    }

    /// Ledger of `group`, created on first use and shared afterwards.
    pub fn ledger(&self, group: GroupId) -> Arc<GroupLedger> {
        if let Some(ledger) = self.groups.read().get(&group) {
            return Arc::clone(ledger);
        }
        let mut groups = self.groups.write();
        let ledger = groups.entry(group).or_insert_with(|| {
            Arc::new(GroupLedger::new(
                group,
                Arc::clone(&self.config),
                Arc::clone(&self.ids),
            ))
        });
        Arc::clone(ledger)
    }

    pub fn subscribe(&self, sink: Arc<dyn DeltaSink>) {
        self.sinks.write().push(sink);
    }

    pub fn append(&self, group: GroupId, bill: Bill) -> Result<Bill> {
        let stored = self.ledger(group).append(bill)?;
        self.notify(group, DeltaKind::Add, &stored);
        Ok(stored)
    }

    pub fn get(&self, group: GroupId, id: &str) -> Result<Bill> {
        self.ledger(group).get(id)
    }

    pub fn delete(&self, group: GroupId, id: &str) -> Result<DeletedBill> {
        let deleted = self.ledger(group).delete(id)?;
        self.notify(group, DeltaKind::Remove, &deleted.bill);
        Ok(deleted)
    }

    pub fn restore(&self, group: GroupId, id: &str) -> Result<Bill> {
        let restored = self.ledger(group).restore(id)?;
        self.notify(group, DeltaKind::Add, &restored);
        Ok(restored)
    }

    pub fn purge(&self, group: GroupId, id: &str) -> Result<DeletedBill> {
        self.ledger(group).purge(id)
    }

    pub fn get_deleted(&self, group: GroupId, id: &str) -> Result<DeletedBill> {
        self.ledger(group).get_deleted(id)
    }

    pub fn list_deleted(&self, group: GroupId) -> Result<Vec<DeletedBill>> {
        self.ledger(group).list_deleted()
    }

    pub fn list(
        &self,
        group: GroupId,
        cursor: &str,
        limit: usize,
        newest_first: bool,
    ) -> Result<BillPage> {
        self.ledger(group).list(cursor, limit, newest_first)
    }

    pub fn range(&self, group: GroupId, start: &str, finish: &str) -> Result<Vec<Bill>> {
        self.ledger(group).range(start, finish)
    }

    pub fn summarize(&self, group: GroupId, start: &str, finish: &str) -> Result<Statistics> {
        let bills = self.range(group, start, finish)?;
        Ok(Statistics::from_bills(&bills))
    }

    /// Day, week and month totals around `today`, weeks starting on Monday.
    pub fn summarize_periods(&self, group: GroupId, today: NaiveDate) -> Result<PeriodSummary> {
        let windows = PeriodWindows::containing(today).ok_or_else(|| {
            LedgerError::MalformedDateKey {
                value: today.to_string(),
            }
        })?;
        let window_stats = |(start, finish): (NaiveDate, NaiveDate)| {
            self.summarize(
                group,
                ShardKey::from_date(start).as_str(),
                ShardKey::from_date(finish).as_str(),
            )
        };
        Ok(PeriodSummary {
            day: window_stats((today, today))?,
            week: window_stats(windows.week)?,
            month: window_stats(windows.month)?,
        })
    }

    /// Current calendar day in the ledger's zone.
    pub fn today(&self) -> Option<NaiveDate> {
        self.config.zone.date_of(Utc::now().timestamp())
    }

    pub fn groups_on_disk(&self) -> Result<Vec<GroupId>> {
        scan::groups_on_disk(&self.config)
    }

    /// Rewrites every shard of every group. Failures are logged and reported, never fatal.
    pub fn compact_all(&self) -> Result<CompactReport> {
        let mut report = CompactReport::default();
        for group in self.groups_on_disk()? {
            match self.ledger(group).compact() {
                Ok(shards) => {
                    report.groups += 1;
                    report.shards += shards;
                }
                Err(err) => {
                    error!("[group {}] compaction failed: {}", group, err);
                    report.failures.push((group, err));
                }
            }
        }
        info!(
            "compacted {} shards across {} groups ({} failed)",
            report.shards,
            report.groups,
            report.failures.len()
        );
        Ok(report)
    }

    /// Streams an add delta for every live bill into `sink`. Returns the number of bills sent.
    pub fn replay(&self, sink: &dyn DeltaSink) -> Result<usize> {
        let mut replayed = 0;
        for group in self.groups_on_disk()? {
            let bills = match self.range(group, "", "") {
                Ok(bills) => bills,
                Err(err) => {
                    warn!("[group {}] skipped during replay: {}", group, err);
                    continue;
                }
            };
            for bill in &bills {
                sink.on_bill_delta(&BillDelta::new(group, DeltaKind::Add, bill));
            }
            replayed += bills.len();
        }
        Ok(replayed)
    }

    fn notify(&self, group: GroupId, kind: DeltaKind, bill: &Bill) {
        let sinks = self.sinks.read();
        if sinks.is_empty() {
            return;
        }
        let delta = BillDelta::new(group, kind, bill);
        for sink in sinks.iter() {
            sink.on_bill_delta(&delta);
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerStorageReport {
    pub bills_dir: PathBuf,
    pub groups: usize,
}

#[derive(Debug, Default)]
pub struct CompactReport {
    pub groups: usize,
    pub shards: usize,
    pub failures: Vec<(GroupId, LedgerError)>,
}

struct PeriodWindows {
    week: (NaiveDate, NaiveDate),
    month: (NaiveDate, NaiveDate),
}

impl PeriodWindows {
    fn containing(today: NaiveDate) -> Option<Self> {
        let from_monday = u64::from(today.weekday().num_days_from_monday());
        let week_start = today.checked_sub_days(Days::new(from_monday))?;
        let week_end = week_start.checked_add_days(Days::new(6))?;
        let month_start = today.with_day(1)?;
        let month_end = month_start.checked_add_months(Months::new(1))?.pred_opt()?;
        Some(Self {
            week: (week_start, week_end),
            month: (month_start, month_end),
        })
    }
}

#[cfg(test)]
mod tests {
    use core_types::Direction;
    use tempfile::tempdir;

    use super::*;
    use crate::{shard_key::ShardZone, stats::LabelTotals};

    // 2024-02-14T09:00:00Z, a Wednesday.
    const WEDNESDAY: i64 = 1_707_901_200;
    const DAY: i64 = 86_400;

    fn controller(dir: &std::path::Path) -> LedgerController {
        let config = LedgerConfig::new(dir.join("bills")).with_zone(ShardZone::utc());
        LedgerController::bootstrap(config).unwrap().0
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bootstrap_reports_existing_groups() {
        let dir = tempdir().unwrap();
        {
            let controller = controller(dir.path());
            controller
                .append(4, Bill::new(1, 2, Direction::Incoming, 10, WEDNESDAY))
                .unwrap();
            controller
                .append(9, Bill::new(1, 2, Direction::Incoming, 10, WEDNESDAY))
                .unwrap();
        }
        let config = LedgerConfig::new(dir.path().join("bills")).with_zone(ShardZone::utc());
        let (controller, report) = LedgerController::bootstrap(config).unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(controller.groups_on_disk().unwrap(), vec![4, 9]);
    }

    #[test]
    fn ledgers_are_shared_per_group() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        assert!(Arc::ptr_eq(&controller.ledger(1), &controller.ledger(1)));
        assert!(!Arc::ptr_eq(&controller.ledger(1), &controller.ledger(2)));
    }

    #[test]
    fn groups_do_not_see_each_other() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        let stored = controller
            .append(1, Bill::new(1, 2, Direction::Outgoing, 10, WEDNESDAY))
            .unwrap();
        assert!(controller.get(2, &stored.id).unwrap_err().is_not_found());
        assert!(controller.list(2, "", 0, true).unwrap().bills.is_empty());
    }

    #[test]
    fn sinks_see_add_remove_and_restore() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        let totals = Arc::new(LabelTotals::new());
        controller.subscribe(totals.clone());

        let bill = Bill::new(1, 2, Direction::Outgoing, 40, WEDNESDAY).with_labels([8]);
        let stored = controller.append(5, bill).unwrap();
        assert_eq!(totals.label(5, 8).outgoing_amount, 40);

        controller.delete(5, &stored.id).unwrap();
        assert!(totals.group(5).is_empty());

        controller.restore(5, &stored.id).unwrap();
        assert_eq!(totals.group(5).outgoing_count, 1);

        controller.purge(5, "2024021400000000000000000001").unwrap_err();
        assert_eq!(totals.group(5).outgoing_count, 1);
    }

    #[test]
    fn huge_amounts_saturate_totals_and_summaries() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        let totals = Arc::new(LabelTotals::new());
        controller.subscribe(totals.clone());

        controller
            .append(6, Bill::new(1, 2, Direction::Incoming, i64::MAX, WEDNESDAY))
            .unwrap();
        controller
            .append(6, Bill::new(1, 2, Direction::Incoming, 1, WEDNESDAY + 60))
            .unwrap();
        assert_eq!(totals.group(6).incoming_amount, i64::MAX);
        assert_eq!(totals.group(6).incoming_count, 2);

        let stats = controller.summarize(6, "", "").unwrap();
        assert_eq!(stats.incoming_amount, i64::MAX);
        assert_eq!(stats.balance(), i64::MAX);
    }

    #[test]
    fn repeated_labels_are_stored_and_counted_once() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        let totals = Arc::new(LabelTotals::new());
        controller.subscribe(totals.clone());

        let bill = Bill::new(1, 2, Direction::Outgoing, 25, WEDNESDAY).with_labels([3, 3, 7]);
        let stored = controller.append(8, bill).unwrap();
        assert_eq!(stored.label_ids, vec![3, 7]);
        assert_eq!(controller.get(8, &stored.id).unwrap().label_ids, vec![3, 7]);
        assert_eq!(totals.label(8, 3).outgoing_amount, 25);
    }

    #[test]
    fn period_windows_start_on_monday() {
        let windows = PeriodWindows::containing(date(2024, 2, 14)).unwrap();
        assert_eq!(windows.week, (date(2024, 2, 12), date(2024, 2, 18)));
        assert_eq!(windows.month, (date(2024, 2, 1), date(2024, 2, 29)));

        let sunday = PeriodWindows::containing(date(2024, 3, 31)).unwrap();
        assert_eq!(sunday.week, (date(2024, 3, 25), date(2024, 3, 31)));
    }

    #[test]
    fn summarize_periods_splits_windows() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        // Wednesday, Monday of the same week, the previous Sunday, and Feb 1st.
        for (at, direction, amount) in [
            (WEDNESDAY, Direction::Incoming, 100),
            (WEDNESDAY - 2 * DAY, Direction::Outgoing, 30),
            (WEDNESDAY - 3 * DAY, Direction::Outgoing, 7),
            (WEDNESDAY - 13 * DAY, Direction::InGroup, 50),
        ] {
            controller
                .append(3, Bill::new(1, 2, direction, amount, at))
                .unwrap();
        }
        let summary = controller.summarize_periods(3, date(2024, 2, 14)).unwrap();
        assert_eq!(summary.day.incoming_amount, 100);
        assert_eq!(summary.day.outgoing_count, 0);
        assert_eq!(summary.week.outgoing_amount, 30);
        assert_eq!(summary.month.outgoing_amount, 37);
        assert_eq!(summary.month.group_trans_count, 1);
    }

    #[test]
    fn compact_all_and_replay_cover_every_group() {
        let dir = tempdir().unwrap();
        let controller = controller(dir.path());
        for group in [1, 2] {
            for offset in 0..3 {
                controller
                    .append(
                        group,
                        Bill::new(1, 2, Direction::Incoming, 10, WEDNESDAY + offset * DAY),
                    )
                    .unwrap();
            }
        }
        let report = controller.compact_all().unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.shards, 6);
        assert!(report.failures.is_empty());

        let totals = LabelTotals::new();
        assert_eq!(controller.replay(&totals).unwrap(), 6);
        assert_eq!(totals.group(1).incoming_amount, 30);
        assert_eq!(totals.label(2, crate::stats::UNLABELED).incoming_count, 3);
    }
}
