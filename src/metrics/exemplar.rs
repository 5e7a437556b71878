//! Bounded uniform sampling of raw measurements.
//!
//! Classic reservoir sampling (algorithm R): every measurement offered
//! within a collection window has equal probability of being retained,
//! without replacement. The reservoir is drained and reset on collect.

use crate::core::AttributeSet;
use crate::metrics::aggregation::{Exemplar, SpanContext};
use rand::Rng;

/// One reservoir slot, keyed by the post-view attribute set it belongs to.
#[derive(Debug, Clone)]
pub(crate) struct ReservoirEntry {
    pub key: AttributeSet,
    pub exemplar: Exemplar,
}

/// Fixed-capacity uniform random sample of measurements.
#[derive(Debug)]
pub struct ExemplarReservoir {
    capacity: usize,
    seen: u64,
    slots: Vec<ReservoirEntry>,
}

impl ExemplarReservoir {
    /// Create a reservoir holding at most `capacity` exemplars.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Offer a measurement for sampling.
    ///
    /// `key` is the attribute set after view processing, used to join the
    /// exemplar back onto its data point at collection time; `attributes`
    /// is the full pre-processing set the exemplar preserves.
    pub(crate) fn offer(
        &mut self,
        key: &AttributeSet,
        value: f64,
        attributes: &AttributeSet,
        context: Option<&SpanContext>,
        timestamp: u64,
    ) {
        if self.capacity == 0 {
            return;
        }
        self.seen += 1;
        let entry = ReservoirEntry {
            key: key.clone(),
            exemplar: Exemplar {
                value,
                timestamp,
                attributes: attributes.clone(),
                trace_id: context.map(|c| c.trace_id),
                span_id: context.map(|c| c.span_id),
            },
        };
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
            return;
        }
        let slot = rand::thread_rng().gen_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.slots[slot as usize] = entry;
        }
    }

    /// Drain the sampled exemplars and reset the window.
    pub(crate) fn drain(&mut self) -> Vec<ReservoirEntry> {
        self.seen = 0;
        std::mem::take(&mut self.slots)
    }
}
