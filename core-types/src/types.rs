// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type GroupId = u64;
pub type WalletId = u64;
pub type LabelId = u64;
pub type PersonId = u64;

/// Latest timestamp (9999-12-31T23:59:59Z) a bill may carry.
pub const MAX_BILL_TIMESTAMP: i64 = 253_402_300_799;

/// Classification of a transfer relative to the group that owns the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    InGroup,
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn code(self) -> u8 {
        match self {
            Direction::InGroup => 1,
            Direction::Incoming => 2,
            Direction::Outgoing => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::InGroup => "in-group",
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = InvalidBill;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::InGroup),
            2 => Ok(Direction::Incoming),
            3 => Ok(Direction::Outgoing),
            other => Err(InvalidBill::UnknownDirection { code: other }),
        }
    }
}

impl From<Direction> for u8 {
    fn from(value: Direction) -> Self {
        value.code()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidBill {
    #[error("from wallet id must be non-zero")]
    MissingFromWallet,
    #[error("to wallet id must be non-zero")]
    MissingToWallet,
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount { amount: i64 },
    #[error("unknown direction code {code}")]
    UnknownDirection { code: u8 },
    #[error("timestamp {at} is out of range")]
    TimestampOutOfRange { at: i64 },
}

/// One ledger entry: a transfer between two wallets.
///
/// `id` is assigned by the ledger when the bill is first appended; callers leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "fromWalletID")]
    pub from_wallet_id: WalletId,
    #[serde(rename = "toWalletID")]
    pub to_wallet_id: WalletId,
    pub direction: Direction,
    pub amount: i64,
    #[serde(rename = "labelIDs", default)]
    pub label_ids: Vec<LabelId>,
    #[serde(default)]
    pub remark: String,
    #[serde(rename = "lossAmount", default, skip_serializing_if = "Option::is_none")]
    pub loss_amount: Option<i64>,
    #[serde(rename = "lossWalletID", default, skip_serializing_if = "Option::is_none")]
    pub loss_wallet_id: Option<WalletId>,
    #[serde(default)]
    pub at: i64,
    #[serde(rename = "operatorPersonID", default)]
    pub operator_person_id: PersonId,
}

impl Bill {
    pub fn new(
        from_wallet_id: WalletId,
        to_wallet_id: WalletId,
        direction: Direction,
        amount: i64,
        at: i64,
    ) -> Self {
        Self {
            id: String::new(),
            from_wallet_id,
            to_wallet_id,
            direction,
            amount,
            label_ids: Vec::new(),
            remark: String::new(),
            loss_amount: None,
            loss_wallet_id: None,
            at,
            operator_person_id: 0,
        }
    }

    pub fn with_labels(mut self, label_ids: impl IntoIterator<Item = LabelId>) -> Self {
        self.label_ids = label_ids.into_iter().collect();
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn with_loss(mut self, amount: i64, wallet_id: WalletId) -> Self {
        self.loss_amount = Some(amount);
        self.loss_wallet_id = Some(wallet_id);
        self
    }

    pub fn with_operator(mut self, person_id: PersonId) -> Self {
        self.operator_person_id = person_id;
        self
    }

    /// Checks field invariants, defaults a missing timestamp to `now` and drops repeated label
    /// ids (first occurrence wins).
    ///
    /// Nothing is modified when validation fails.
    pub fn normalize(&mut self, now: i64) -> Result<(), InvalidBill> {
        if self.from_wallet_id == 0 {
            return Err(InvalidBill::MissingFromWallet);
        }
        if self.to_wallet_id == 0 {
            return Err(InvalidBill::MissingToWallet);
        }
        if self.amount <= 0 {
            return Err(InvalidBill::NonPositiveAmount {
                amount: self.amount,
            });
        }
        let at = if self.at <= 0 { now } else { self.at };
        if at <= 0 || at > MAX_BILL_TIMESTAMP {
            return Err(InvalidBill::TimestampOutOfRange { at });
        }
        self.at = at;
        let mut seen = HashSet::with_capacity(self.label_ids.len());
        self.label_ids.retain(|label| seen.insert(*label));
        Ok(())
    }
}

/// A soft-deleted bill held in the group's tombstone file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedBill {
    #[serde(flatten)]
    pub bill: Bill,
    #[serde(rename = "deletedAt")]
    pub deleted_at: DateTime<Utc>,
}

impl DeletedBill {
    pub fn new(bill: Bill, deleted_at: DateTime<Utc>) -> Self {
        Self { bill, deleted_at }
    }

    pub fn id(&self) -> &str {
        &self.bill.id
    }
}
