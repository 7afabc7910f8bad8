//! Durable store of active and historical transfer records.
//!
//! The in-memory map answers `query_active`; the history file holds an
//! ordered sequence of record snapshots rewritten in full on each
//! mutation. Persistence is best-effort from the caller's point of view:
//! a ledger failure is logged and never fails a transfer that otherwise
//! succeeded.

pub mod error;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::DownloadLedger;
