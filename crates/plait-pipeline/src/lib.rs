//! Resumable chunked batch processing.
//!
//! Drives adapter output through validation, identity resolution, and
//! ledger insertion in bounded-size chunks, persisting progress so a
//! crashed or interrupted run continues without reprocessing or
//! duplicating. One bad record never stops the batch.

// Native `async fn` in traits; see plait-core for the rationale.
#![allow(async_fn_in_trait)]

mod checkpoint;
mod interrupt;
mod processor;

pub mod error;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{Error, Result};
pub use interrupt::Interrupt;
pub use processor::{
  ChunkConfig, Failure, ItemTransform, Processor, RunOutcome, RunStats,
  TransformOutcome,
};

#[cfg(test)]
mod tests;
