//! Index-based selection helpers shared by the balancer strategies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use agentgrid_core::Instance;

/// Lock-free round-robin over a candidate list whose length may change
/// between calls.
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    counter: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index in `0..count`, or `None` when `count` is zero.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }

    pub fn current(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

/// Smooth weighted round-robin.
///
/// Every pick adds each candidate's weight to its running score, selects
/// the highest score (first on ties) and subtracts the total weight from
/// the winner. Over `sum(weights)` picks each instance is chosen exactly
/// `weight` times, interleaved rather than in bursts.
#[derive(Debug, Default)]
pub struct SmoothWeighted {
    scores: HashMap<String, i64>,
}

impl SmoothWeighted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick an index into `candidates`.
    pub fn pick(&mut self, candidates: &[&Instance]) -> Option<usize> {
        let total: i64 = candidates.iter().map(|i| i64::from(i.weight)).sum();
        let mut best: Option<(usize, i64)> = None;

        for (idx, instance) in candidates.iter().enumerate() {
            let score = self.scores.entry(instance.id.clone()).or_insert(0);
            *score += i64::from(instance.weight);
            if best.is_none_or(|(_, top)| *score > top) {
                best = Some((idx, *score));
            }
        }

        let (idx, _) = best?;
        if let Some(score) = self.scores.get_mut(&candidates[idx].id) {
            *score -= total;
        }
        Some(idx)
    }

    /// Drop the running score of an instance that left the pool.
    pub fn forget(&mut self, id: &str) {
        self.scores.remove(id);
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }
}
