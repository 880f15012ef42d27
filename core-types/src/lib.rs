// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared bill model and configuration for the lifecost ledger.

pub mod config;
pub mod types;

pub use config::{AppConfig, LedgerSettings};
pub use types::{Bill, DeletedBill, Direction, GroupId, InvalidBill, LabelId, PersonId, WalletId};
