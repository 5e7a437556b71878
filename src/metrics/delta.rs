//! Per-collection delta ledger with multi-reader fan-out.
//!
//! Every collection appends one node tagged with the readers registered at
//! that moment. A reader's collect merges all nodes still carrying its
//! bit, oldest first, clearing the bit as it goes; a node whose mask
//! empties is unlinked immediately. Cumulative readers additionally fold
//! the merged delta into a running total and receive a clone of it.

use crate::metrics::aggregation::{Aggregation, Metric};
use crate::metrics::mask::ReaderMask;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::collections::VecDeque;

#[derive(Debug)]
struct DeltaNode {
    metric: Metric,
    readers: ReaderMask,
}

/// Buffer of uncollected deltas plus per-cumulative-reader running sums.
#[derive(Debug)]
pub(crate) struct DeltaStorage {
    aggregation: Aggregation,
    nodes: VecDeque<DeltaNode>,
    cumulative: HashMap<usize, Metric>,
}

impl DeltaStorage {
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            nodes: VecDeque::new(),
            cumulative: HashMap::new(),
        }
    }

    /// Append a collected delta visible to `readers`.
    ///
    /// Empty metrics and empty reader sets are skipped: neither would ever
    /// be observed.
    pub fn add(&mut self, metric: Metric, readers: &ReaderMask) {
        if metric.is_empty() || readers.is_empty() {
            return;
        }
        self.nodes.push_back(DeltaNode {
            metric,
            readers: readers.clone(),
        });
    }

    /// Merge every delta still pending for `reader_id`, oldest first.
    ///
    /// Returns `None` when nothing was pending (and, for cumulative
    /// readers, no total has accumulated yet).
    pub fn collect(&mut self, reader_id: usize, cumulative: bool) -> Option<Metric> {
        let mut merged: Option<Metric> = None;
        for node in self.nodes.iter_mut() {
            if !node.readers.test(reader_id) {
                continue;
            }
            node.readers.clear(reader_id);
            let delta = node.metric.clone();
            match merged.as_mut() {
                Some(acc) => self.aggregation.merge_metric(acc, delta),
                None => merged = Some(delta),
            }
        }
        self.nodes.retain(|node| !node.readers.is_empty());

        if !cumulative {
            return merged;
        }
        if let Some(delta) = merged {
            match self.cumulative.entry(reader_id) {
                Entry::Occupied(mut total) => self.aggregation.merge_metric(total.get_mut(), delta),
                Entry::Vacant(slot) => {
                    slot.insert(delta);
                },
            }
        }
        self.cumulative.get(&reader_id).cloned()
    }

    /// Drop all state held for a departing reader.
    pub fn remove_reader(&mut self, reader_id: usize) {
        for node in self.nodes.iter_mut() {
            node.readers.clear(reader_id);
        }
        self.nodes.retain(|node| !node.readers.is_empty());
        self.cumulative.remove(&reader_id);
    }

    /// Number of buffered delta nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
