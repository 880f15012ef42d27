//! Statistics deltas emitted by the controller and the aggregates built from them.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use core_types::{Bill, Direction, GroupId, LabelId};
use parking_lot::Mutex;

/// Label key used for bills that carry no label.
pub const UNLABELED: LabelId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaKind {
    Add,
    Remove,
}

impl DeltaKind {
    pub fn sign(self) -> i64 {
        match self {
            DeltaKind::Add => 1,
            DeltaKind::Remove => -1,
        }
    }
}

/// A bill entering or leaving the live ledger of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillDelta {
    pub group: GroupId,
    pub kind: DeltaKind,
    pub bill_id: String,
    pub label_ids: Vec<LabelId>,
    pub direction: Direction,
    pub amount: i64,
    pub at: i64,
}

impl BillDelta {
    pub fn new(group: GroupId, kind: DeltaKind, bill: &Bill) -> Self {
        Self {
            group,
            kind,
            bill_id: bill.id.clone(),
            label_ids: bill.label_ids.clone(),
            direction: bill.direction,
            amount: bill.amount,
            at: bill.at,
        }
    }
}

/// Receives deltas after each successful append, delete and restore.
///
/// Called on the mutating thread once the shard lock is released; implementations should not
/// block for long.
pub trait DeltaSink: Send + Sync {
    fn on_bill_delta(&self, delta: &BillDelta);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub group_trans_count: i64,
    pub incoming_count: i64,
    pub incoming_amount: i64,
    pub outgoing_count: i64,
    pub outgoing_amount: i64,
}

impl Statistics {
    pub fn from_bills<'a>(bills: impl IntoIterator<Item = &'a Bill>) -> Self {
        let mut stats = Self::default();
        for bill in bills {
            stats.record(bill.direction, bill.amount);
        }
        stats
    }

    pub fn record(&mut self, direction: Direction, amount: i64) {
        self.apply(DeltaKind::Add, direction, amount);
    }

    /// In-group transfers move money inside the group, so only their count is tracked.
    ///
    /// Totals saturate at the `i64` bounds instead of wrapping.
    pub fn apply(&mut self, kind: DeltaKind, direction: Direction, amount: i64) {
        let sign = kind.sign();
        let signed = amount.saturating_mul(sign);
        let (count, total) = match direction {
            Direction::InGroup => {
                self.group_trans_count = self.group_trans_count.saturating_add(sign);
                return;
            }
            Direction::Incoming => (&mut self.incoming_count, &mut self.incoming_amount),
            Direction::Outgoing => (&mut self.outgoing_count, &mut self.outgoing_amount),
        };
        *count = count.saturating_add(sign);
        *total = total.saturating_add(signed);
    }

    /// Incoming minus outgoing.
    pub fn balance(&self) -> i64 {
        self.incoming_amount.saturating_sub(self.outgoing_amount)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in-group {} | incoming {} ({}) | outgoing {} ({}) | balance {}",
            self.group_trans_count,
            self.incoming_count,
            self.incoming_amount,
            self.outgoing_count,
            self.outgoing_amount,
            self.balance()
        )
    }
}

/// Day, week (Monday start) and month windows containing a reference date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodSummary {
    pub day: Statistics,
    pub week: Statistics,
    pub month: Statistics,
}

#[derive(Default)]
struct Totals {
    groups: HashMap<GroupId, Statistics>,
    labels: HashMap<(GroupId, LabelId), Statistics>,
}

/// In-memory running totals per group and per `(group, label)`.
#[derive(Default)]
pub struct LabelTotals {
    totals: Mutex<Totals>,
}

impl LabelTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, group: GroupId) -> Statistics {
        self.totals
            .lock()
            .groups
            .get(&group)
            .copied()
            .unwrap_or_default()
    }

    /// Totals for one label; [`UNLABELED`] collects bills without labels.
    pub fn label(&self, group: GroupId, label: LabelId) -> Statistics {
        self.totals
            .lock()
            .labels
            .get(&(group, label))
            .copied()
            .unwrap_or_default()
    }

    /// Labels with a non-empty total, ascending.
    pub fn labels(&self, group: GroupId) -> Vec<(LabelId, Statistics)> {
        let totals = self.totals.lock();
        let mut labels: Vec<_> = totals
            .labels
            .iter()
            .filter(|((owner, _), stats)| *owner == group && !stats.is_empty())
            .map(|((_, label), stats)| (*label, *stats))
            .collect();
        labels.sort_by_key(|(label, _)| *label);
        labels
    }

    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<_> = self.totals.lock().groups.keys().copied().collect();
        groups.sort_unstable();
        groups
    }
}

impl DeltaSink for LabelTotals {
    fn on_bill_delta(&self, delta: &BillDelta) {
        let mut totals = self.totals.lock();
        totals
            .groups
            .entry(delta.group)
            .or_default()
            .apply(delta.kind, delta.direction, delta.amount);
        let mut labels: BTreeSet<LabelId> = delta.label_ids.iter().copied().collect();
        if labels.is_empty() {
            labels.insert(UNLABELED);
        }
        for label in labels {
            totals
                .labels
                .entry((delta.group, label))
                .or_default()
                .apply(delta.kind, delta.direction, delta.amount);
        }
    }
}
