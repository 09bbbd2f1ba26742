//! Campus Points Wallet Engine
//!
//! Ledger and balance-mutation core for a campus points platform. Students,
//! lecturers, merchants and admins hold integer point balances that change
//! through missions, marketplace purchases, peer transfers, QR payments,
//! external syncs and admin adjustments.
//!
//! # Architecture
//!
//! - **Ledger Store**: balances plus an append-only transaction log in SQLite
//! - **Balance Mutator**: the single path that changes a balance
//! - **Payment Tokens**: single-use QR tokens with a ten minute lifetime
//! - **Orchestrators**: business flows composed inside one unit of work
//! - **Reporting**: read-only listings and dashboard statistics
//!
//! # Invariants
//!
//! - A balance never goes below zero
//! - Every balance change is paired with exactly one ledger entry
//! - Ledger entries are never modified or deleted
//! - A payment token is consumed at most once

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod mutator;
pub mod payment_tokens;
pub mod reporting;
pub mod services;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use database::{LedgerStore, Page, TransactionFilter, UnitOfWork};
pub use engine::WalletEngine;
pub use errors::{Result, WalletEngineError};
pub use mutator::BalanceMutator;
pub use payment_tokens::{PaymentTokenEngine, TokenExpectation, TokenSettlement};
