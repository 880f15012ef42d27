//! Sortable bill identifiers: `<YYYYMMDD><20 digit sequence>`.

use chrono::Utc;
use parking_lot::Mutex;

use crate::shard_key::ShardKey;

pub const SEQUENCE_WIDTH: usize = 20;

/// Issues strictly increasing sequences seeded from wall-clock microseconds.
///
/// Zero padding keeps string order equal to numeric order, so an id minted later always sorts
/// after an earlier one with the same shard prefix.
#[derive(Debug, Default)]
pub struct BillIdGenerator {
    last: Mutex<u64>,
}

impl BillIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default();
        let mut last = self.last.lock();
        let next = now.max(last.saturating_add(1));
        *last = next;
        next
    }

    pub fn next_id(&self, key: &ShardKey) -> String {
        format!("{key}{:0width$}", self.next_sequence(), width = SEQUENCE_WIDTH)
    }
}
