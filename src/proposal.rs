use anyhow::Result;

use crate::record::Record;
use crate::store::ProposalStore;

/// What a change unit does to the live record set. Never stored; always
/// derived from which snapshots are present so the resolver, the acceptor
/// and the audit renderer agree on the classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Edit,
    Delete,
    /// Whole-zone deletion. The double-null sentinel: a unit carrying
    /// neither snapshot. Only ever created through
    /// ChangeProposal::add_zone_delete_change.
    ZoneDelete,
}

impl ChangeKind {
    pub fn from_snapshots(prior: Option<&Record>, after: Option<&Record>) -> ChangeKind {
        match (prior, after) {
            (None, Some(_)) => ChangeKind::Insert,
            (Some(_), Some(_)) => ChangeKind::Edit,
            (Some(_), None) => ChangeKind::Delete,
            (None, None) => ChangeKind::ZoneDelete,
        }
    }
}

/// One proposed record-level edit, owned by its proposal.
#[derive(Clone, Debug)]
pub struct Change {
    pub zone_id: i64,
    /// The zone's SOA serial when the change was proposed. Staleness is
    /// detected by comparing it against the zone's current serial.
    pub base_serial: String,
    pub prior: Option<Record>,
    pub after: Option<Record>,
    pub live_record_id: Option<i64>,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        ChangeKind::from_snapshots(self.prior.as_ref(), self.after.as_ref())
    }
}

/// A batch of pending record changes awaiting approval, attributed to the
/// user who submitted it. Persisted as a unit and destroyed together with
/// its shadow rows on accept or discard.
#[derive(Clone, Debug)]
pub struct ChangeProposal {
    /// Assigned at persistence.
    pub proposal_id: Option<i64>,
    pub initiator: String,
    pub created_at: i64,
    /// Derived at load time; true when any change unit's base serial no
    /// longer matches the zone's current serial.
    pub expired: bool,
    changes: Vec<Change>,
}

impl ChangeProposal {
    pub fn new(initiator: &str, created_at: i64) -> Self {
        ChangeProposal {
            proposal_id: None,
            initiator: initiator.to_string(),
            created_at,
            expired: false,
            changes: Vec::new(),
        }
    }

    /// Change units in display order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Appends an insert, edit or delete shaped unit; the kind is derived
    /// from which snapshots are present.
    pub fn add_change(
        &mut self,
        zone_id: i64,
        base_serial: &str,
        prior: Option<Record>,
        after: Option<Record>,
        live_record_id: Option<i64>,
    ) {
        self.changes.push(Change {
            zone_id,
            base_serial: base_serial.to_string(),
            prior,
            after,
            live_record_id,
        });
    }

    /// Appends a whole-zone deletion unit (no snapshots).
    pub fn add_zone_delete_change(&mut self, zone_id: i64, base_serial: &str) {
        self.changes.push(Change {
            zone_id,
            base_serial: base_serial.to_string(),
            prior: None,
            after: None,
            live_record_id: None,
        });
    }

    /// Persists the proposal and all of its change units in one
    /// transaction, assigns the generated proposal id and returns it.
    ///
    /// A proposal with no changes is a defined no-op, not an error: nothing
    /// is written and Ok(None) is returned so the caller can tell the user
    /// there is nothing to propose.
    pub fn persist(&mut self, store: &ProposalStore) -> Result<Option<i64>> {
        if self.changes.is_empty() {
            return Ok(None);
        }

        let proposal_id = store.transaction(|txn| {
            let proposal_id = store.insert_proposal(txn, &self.initiator, self.created_at)?;
            for change in &self.changes {
                let prior_shadow_id = store.insert_shadow_record(txn, change.prior.as_ref())?;
                // Back-fill the change timestamp on snapshots that have
                // never been persisted before.
                let after = change.after.as_ref().map(|record| {
                    if record.change_timestamp.is_none() {
                        record.clone().with_change_timestamp(self.created_at)
                    } else {
                        record.clone()
                    }
                });
                let after_shadow_id = store.insert_shadow_record(txn, after.as_ref())?;
                store.insert_change_unit(
                    txn,
                    proposal_id,
                    change.zone_id,
                    &change.base_serial,
                    prior_shadow_id,
                    after_shadow_id,
                    change.live_record_id,
                )?;
            }
            Ok(proposal_id)
        })?;

        self.proposal_id = Some(proposal_id);
        Ok(Some(proposal_id))
    }
}
