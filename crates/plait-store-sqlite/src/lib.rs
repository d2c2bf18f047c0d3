//! SQLite backend for the plait communication ledger.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. The person registry is held
//! in memory (loaded at open) and written through to SQLite, keeping
//! resolution order deterministic under the single-writer model.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteLedger;

#[cfg(test)]
mod tests;
