//! OpenSASE Storefront
//!
//! Concurrency-safe claiming of limited resources for a storefront.
//!
//! ## Features
//! - Coupon rushes: first come, first served, one coupon per customer
//! - Group-buy: open or join a group, closing it when the target is reached
//! - Default address switching under the same transaction discipline
//! - Postgres ledger with row locks, or an in-process ledger for development

pub mod addresses;
pub mod api;
pub mod claims;
pub mod clock;
pub mod config;
pub mod domain;
pub mod groups;
pub mod ledger;
pub mod publisher;

pub use claims::{ClaimContext, ClaimFailure, ClaimOrchestrator, ClaimResult, RetryPolicy};
pub use groups::{GroupDetail, GroupJoin, GroupOrder, GroupTracker};
pub use ledger::{Ledger, LedgerTx, MemoryLedger, PgLedger, StoreError};
