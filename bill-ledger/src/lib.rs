//! Append-only bill ledger sharded by group and calendar day.
//!
//! Each group's bills live in newline-delimited JSON files named `<group>-<YYYYMMDD>`, kept
//! sorted by bill timestamp. Bill ids start with their shard key, so a point lookup opens exactly
//! one file and an id doubles as a pagination cursor.
//!
//! The crate exposes:
//! - [`LedgerController`]: multi-group entry point with statistics delta fan-out and bulk
//!   maintenance.
//! - [`GroupLedger`]: append, lookup, delete/restore/purge, cursor pagination and day ranges for
//!   one group.
//! - [`LabelTotals`]: a [`DeltaSink`] keeping running per-label totals.

mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod id;
pub mod ledger;
pub mod scan;
pub mod shard_key;
pub mod stats;
mod storage;
pub mod tombstone;

pub use config::LedgerConfig;
pub use controller::{CompactReport, LedgerController, LedgerStorageReport};
pub use error::{ErrorKind, LedgerError, Result};
pub use id::BillIdGenerator;
pub use ledger::GroupLedger;
pub use scan::{groups_on_disk, BillPage};
pub use shard_key::{ShardKey, ShardZone};
pub use stats::{
    BillDelta, DeltaKind, DeltaSink, LabelTotals, PeriodSummary, Statistics, UNLABELED,
};
