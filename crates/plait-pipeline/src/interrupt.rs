//! Cooperative cancellation.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

/// A shared flag the processor checks between items (never mid-item: an
/// in-flight transform always runs to completion). Typically tripped from
/// a ctrl-c handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
  pub fn new() -> Self { Self::default() }

  pub fn trip(&self) { self.0.store(true, Ordering::Relaxed); }

  pub fn is_tripped(&self) -> bool { self.0.load(Ordering::Relaxed) }
}
