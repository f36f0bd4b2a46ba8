//! Merge per-partition records with the aggregate listing.
//!
//! Records are keyed by card number. Row order differs between the two views,
//! so membership is checked against a key map rather than by merging sorted
//! lists.

use farecard_core::{CardRecord, RecordOrigin};
use std::collections::HashMap;

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// Partition records followed by aggregate-only extras.
    pub records: Vec<CardRecord>,
    /// Number of records taken from the aggregate listing.
    pub extras: usize,
}

/// All of `partition_records`, plus every aggregate record whose card number
/// none of them carries.
///
/// Extras are tagged [`RecordOrigin::ReconciledExtra`]. A card repeated within
/// the aggregate listing is added once. An empty aggregate returns the
/// partition records unchanged.
#[must_use]
pub fn reconcile(partition_records: &[CardRecord], aggregate_records: &[CardRecord]) -> Reconciled {
    let mut seen: HashMap<&str, &CardRecord> = partition_records
        .iter()
        .map(|r| (r.card_number.as_str(), r))
        .collect();

    let mut records = partition_records.to_vec();
    let mut extras = 0;
    for record in aggregate_records {
        if seen.contains_key(record.card_number.as_str()) {
            continue;
        }
        seen.insert(record.card_number.as_str(), record);

        let mut extra = record.clone();
        if extra.origin == RecordOrigin::Partition {
            extra.origin = RecordOrigin::ReconciledExtra;
        }
        records.push(extra);
        extras += 1;
    }

    if extras > 0 {
        tracing::info!(
            "Reconciliation added {} records only present in the aggregate listing",
            extras
        );
    }

    Reconciled { records, extras }
}
