use std::fmt;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};

use crate::error::{LedgerError, Result};

pub const SHARD_KEY_LEN: usize = 8;
const SHARD_KEY_FORMAT: &str = "%Y%m%d";

/// Time zone used to cut bills into calendar-day shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShardZone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl ShardZone {
    pub fn utc() -> Self {
        ShardZone::Fixed(Utc.fix())
    }

    /// Calendar day containing `at` (unix seconds), or `None` outside chrono's range.
    pub fn date_of(&self, at: i64) -> Option<NaiveDate> {
        let utc = DateTime::<Utc>::from_timestamp(at, 0)?;
        Some(match self {
            ShardZone::Local => utc.with_timezone(&Local).date_naive(),
            ShardZone::Fixed(offset) => utc.with_timezone(offset).date_naive(),
        })
    }

    pub fn shard_key(&self, at: i64) -> Option<ShardKey> {
        self.date_of(at).map(ShardKey::from_date)
    }
}

/// Eight digit `YYYYMMDD` shard identifier. Bill ids start with the key of their shard.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey(String);

impl ShardKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format(SHARD_KEY_FORMAT).to_string())
    }

    /// Validates a caller supplied date bound.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != SHARD_KEY_LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::MalformedDateKey {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Shard holding the bill with the given id.
    pub fn from_bill_id(id: &str) -> Result<Self> {
        let malformed = || LedgerError::MalformedBillId { id: id.to_string() };
        if id.len() <= SHARD_KEY_LEN || !id.is_char_boundary(SHARD_KEY_LEN) {
            return Err(malformed());
        }
        Self::parse(&id[..SHARD_KEY_LEN]).map_err(|_| malformed())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
