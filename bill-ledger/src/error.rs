use std::{io, path::PathBuf};

use core_types::{GroupId, InvalidBill};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse classification callers map onto their own response codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid bill: {0}")]
    InvalidBill(#[from] InvalidBill),
    #[error("malformed bill id {id:?}")]
    MalformedBillId { id: String },
    #[error("malformed date key {value:?} (expected YYYYMMDD)")]
    MalformedDateKey { value: String },
    #[error("utc offset of {minutes} minutes is out of range")]
    InvalidZoneOffset { minutes: i32 },
    #[error("bill {id} not found in group {group}")]
    BillNotFound { group: GroupId, id: String },
    #[error("deleted bill {id} not found in group {group}")]
    DeletedBillNotFound { group: GroupId, id: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("json error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidBill(_)
            | LedgerError::MalformedBillId { .. }
            | LedgerError::MalformedDateKey { .. }
            | LedgerError::InvalidZoneOffset { .. } => ErrorKind::InvalidArgument,
            LedgerError::BillNotFound { .. } | LedgerError::DeletedBillNotFound { .. } => {
                ErrorKind::NotFound
            }
            LedgerError::Io { .. } | LedgerError::Json { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        LedgerError::Json {
            path: path.into(),
            source,
        }
    }
}
