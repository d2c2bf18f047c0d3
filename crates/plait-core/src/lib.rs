//! Core types and trait definitions for the plait communication ledger.
//!
//! This crate is deliberately free of database and I/O dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod event;
pub mod ledger;
pub mod normalize;
pub mod person;
pub mod resolve;
pub mod source;
pub mod validate;

pub use error::{Error, Result};
