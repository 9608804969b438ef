use ordered_float::OrderedFloat;
use tracing::{debug, info};

use crate::archive::Fragment;
use crate::{EventRecord, Query};

/// Triggers selected by one query, ordered by ascending `time`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerTable {
    records: Vec<EventRecord>,
}

impl TriggerTable {
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn max_snr(&self) -> Option<f64> {
        self.records.iter().map(|r| r.snr).reduce(f64::max)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub fragments: usize,
    pub loaded: usize,
    pub kept: usize,
}

/// Filters each fragment's triggers to the query window and SNR cut, then
/// orders the survivors by time. Fragments are consumed in the order given,
/// which decides ties on equal `time`.
pub fn merge(query: &Query, loaded: Vec<(Fragment, Vec<EventRecord>)>) -> (TriggerTable, MergeStats) {
    let mut stats = MergeStats {
        fragments: loaded.len(),
        ..MergeStats::default()
    };
    let mut all = Vec::new();
    for (fragment, records) in loaded {
        stats.loaded += records.len();
        let before = all.len();
        all.extend(records.into_iter().filter(|r| query.accepts(r)));
        debug!(
            path = %fragment.path.display(),
            kept = all.len() - before,
            "Filtered fragment"
        );
    }
    // sort_by_key is stable: equal times keep fragment order
    all.sort_by_key(|r| OrderedFloat(r.time));
    stats.kept = all.len();

    if all.is_empty() {
        info!(
            start = query.window_start(),
            end = query.window_end(),
            fragments = stats.fragments,
            "No triggers found for window"
        );
    }
    (TriggerTable { records: all }, stats)
}
