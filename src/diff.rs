use std::collections::BTreeSet;

use crate::record::Record;

/// A record field that can differ between two snapshots. Ordered so changed
/// field sets render deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordField {
    Name,
    Type,
    Content,
    Ttl,
    Priority,
    ChangeTimestamp,
}

/// Returns the set of fields that differ between the two snapshots, using
/// strict comparison. Drives the per-cell highlighting when an edit renders
/// as two stacked rows.
pub fn changed_fields(prior: &Record, after: &Record) -> BTreeSet<RecordField> {
    let mut changed = BTreeSet::new();
    if prior.name != after.name {
        changed.insert(RecordField::Name);
    }
    if prior.record_type != after.record_type {
        changed.insert(RecordField::Type);
    }
    if prior.content != after.content {
        changed.insert(RecordField::Content);
    }
    if prior.ttl != after.ttl {
        changed.insert(RecordField::Ttl);
    }
    if prior.priority != after.priority {
        changed.insert(RecordField::Priority);
    }
    if prior.change_timestamp != after.change_timestamp {
        changed.insert(RecordField::ChangeTimestamp);
    }
    changed
}
