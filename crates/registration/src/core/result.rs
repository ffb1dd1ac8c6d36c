use std::sync::Arc;
use std::time::Duration;

use bulkreg_core::AccountRecord;

use super::context::{AttemptContext, StateTransition};

/// Outcome of a successful attempt
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub account: Arc<AccountRecord>,
    pub trail: Vec<StateTransition>,
    pub candidates_tried: usize,
    pub duration: Duration,
}

impl AttemptReport {
    pub fn new<S>(account: Arc<AccountRecord>, context: AttemptContext<S>) -> Self {
        Self {
            account,
            candidates_tried: context.index + 1,
            duration: context.duration(),
            trail: context.trail,
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "registered {} after {} candidate(s) in {}ms",
            self.account.email,
            self.candidates_tried,
            self.duration.as_millis()
        )
    }
}
