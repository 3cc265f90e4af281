use std::collections::{BTreeSet, HashMap};

use anyhow::Result;

use crate::audit::{HistoryEntry, HistoryStore};
use crate::proposal::{Change, ChangeKind, ChangeProposal};
use crate::serial;
use crate::store::ProposalStore;
use crate::zone::{LiveRecords, ZoneDirectory};

/// Applies an accepted proposal to the live record set.
///
/// Acceptance is all-or-nothing at the proposal level: if any change unit
/// fails to dispatch the proposal is left stored and can be retried. On
/// full success the applied changes are written to the permanent history
/// log, each distinct affected zone's serial is bumped exactly once, and
/// the proposal is removed together with its shadow rows.
pub struct ProposalAcceptor<'a, Z: ZoneDirectory, L: LiveRecords> {
    store: &'a ProposalStore,
    history: &'a HistoryStore,
    zones: &'a Z,
    live: &'a L,
}

impl<'a, Z: ZoneDirectory, L: LiveRecords> ProposalAcceptor<'a, Z, L> {
    pub fn new(
        store: &'a ProposalStore,
        history: &'a HistoryStore,
        zones: &'a Z,
        live: &'a L,
    ) -> Self {
        ProposalAcceptor {
            store,
            history,
            zones,
            live,
        }
    }

    /// Applies the proposal. Returns Ok(false) without touching anything
    /// when the proposal has gone stale since it was displayed: another
    /// actor changed one of its zones, so it needs re-review.
    pub fn accept(&self, proposal: &ChangeProposal, approved_by: &str) -> Result<bool> {
        if self.is_stale(proposal)? {
            log::warn!(
                "refusing proposal {:?}: this proposal is out of date",
                proposal.proposal_id
            );
            return Ok(false);
        }
        self.apply(proposal, approved_by)
    }

    /// Applies the proposal even when it is stale. The staleness check is
    /// advisory; an approver who has reviewed the conflict may override it.
    pub fn accept_with_override(
        &self,
        proposal: &ChangeProposal,
        approved_by: &str,
    ) -> Result<bool> {
        self.apply(proposal, approved_by)
    }

    /// True when any change unit's base serial no longer matches its
    /// zone's current serial. A zone with no readable serial counts as
    /// stale. Re-checked here immediately before applying; the resolver's
    /// check only covers display time.
    pub fn is_stale(&self, proposal: &ChangeProposal) -> Result<bool> {
        let mut serials: HashMap<i64, Option<String>> = HashMap::new();
        for change in proposal.changes() {
            let current = match serials.get(&change.zone_id) {
                Some(current) => current.clone(),
                None => {
                    let current = self.zones.current_serial(change.zone_id)?;
                    serials.insert(change.zone_id, current.clone());
                    current
                }
            };
            match current {
                Some(current) if current == change.base_serial => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    fn apply(&self, proposal: &ChangeProposal, approved_by: &str) -> Result<bool> {
        let proposal_id = proposal
            .proposal_id
            .ok_or_else(|| anyhow::anyhow!("cannot accept a proposal that was never persisted"))?;

        // Resolve zone names up front; a zone-delete unit erases the name
        // we want to show in the history log.
        let mut zone_names: HashMap<i64, Option<String>> = HashMap::new();
        for change in proposal.changes() {
            if !zone_names.contains_key(&change.zone_id) {
                zone_names.insert(change.zone_id, self.zones.zone_name(change.zone_id)?);
            }
        }

        for change in proposal.changes() {
            if let Err(error) = self.dispatch(change) {
                log::warn!(
                    "could not apply this proposal (id {:?}): {}",
                    proposal.proposal_id,
                    error
                );
                return Ok(false);
            }
        }

        // Everything applied; from here on the accept must become visible.
        let occurred_at = chrono::Utc::now().timestamp();
        for change in proposal.changes() {
            self.history.append(&HistoryEntry {
                occurred_at,
                user: proposal.initiator.clone(),
                approved_by: Some(approved_by.to_string()),
                zone_name: zone_names.get(&change.zone_id).cloned().flatten(),
                prior: change.prior.clone(),
                after: change.after.clone(),
            })?;
        }

        self.bump_serials(proposal)?;
        self.store.delete_proposal(proposal_id)?;
        Ok(true)
    }

    fn dispatch(&self, change: &Change) -> Result<()> {
        match change.kind() {
            ChangeKind::Insert => {
                let after = change
                    .after
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("insert change without an after snapshot"))?;
                self.live.insert_record(after)?;
            }
            ChangeKind::Edit => {
                let after = change
                    .after
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("edit change without an after snapshot"))?;
                let target = change
                    .live_record_id
                    .ok_or_else(|| anyhow::anyhow!("edit change without a live record id"))?;
                self.live.update_record(target, after)?;
            }
            ChangeKind::Delete => {
                let target = change
                    .live_record_id
                    .ok_or_else(|| anyhow::anyhow!("delete change without a live record id"))?;
                self.live.delete_record(target)?;
            }
            ChangeKind::ZoneDelete => {
                self.live.delete_zone(change.zone_id)?;
            }
        }
        Ok(())
    }

    /// Bumps each distinct affected zone's serial exactly once, not once
    /// per change unit. This intentionally expires other pending proposals
    /// on the same zones, forcing their re-review. Zones removed by a
    /// zone-delete unit no longer exist and are not bumped.
    fn bump_serials(&self, proposal: &ChangeProposal) -> Result<()> {
        let affected: BTreeSet<i64> = proposal.changes().iter().map(|c| c.zone_id).collect();
        for zone_id in affected {
            if !self.zones.zone_exists(zone_id)? {
                continue;
            }
            if let Some(current) = self.zones.current_serial(zone_id)? {
                let next = serial::next_serial_now(&current);
                self.zones.update_serial(zone_id, &next)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde::{Deserialize, Serialize};

    use super::ProposalAcceptor;
    use crate::audit::HistoryStore;
    use crate::db::Db;
    use crate::proposal::ChangeProposal;
    use crate::record::Record;
    use crate::store::ProposalStore;
    use crate::zone::testing::MemoryZones;

    #[derive(Serialize, Deserialize)]
    struct Count {
        n: i64,
    }

    fn row_count(db: &Db, table: &str) -> Result<i64> {
        let rows: Vec<Count> = db.query(&format!("SELECT COUNT(*) AS n FROM {}", table), [])?;
        Ok(rows[0].n)
    }

    fn a_record(zone_id: i64, name: &str, content: &str) -> Record {
        Record::new(None, zone_id, name, "A", content, 3600, 0)
    }

    fn setup() -> Result<(Db, ProposalStore, HistoryStore, MemoryZones)> {
        let db = Db::open_memory()?;
        let store = ProposalStore::new(db.clone());
        let history = HistoryStore::new(db.clone());
        let zones = MemoryZones::new();
        zones.add_zone(1, "example.com", "2024031000");
        Ok((db, store, history, zones))
    }

    #[test]
    fn accept_applies_insert_and_removes_proposal() -> Result<()> {
        let (db, store, history, zones) = setup()?;

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "www.example.com", "10.0.0.1")), None);
        proposal.persist(&store)?.unwrap();

        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(acceptor.accept(&proposal, "root")?);

        assert_eq!(zones.record_count(), 1);
        assert_eq!(row_count(&db, "proposals")?, 0);
        assert_eq!(row_count(&db, "shadow_records")?, 0);
        assert_eq!(row_count(&db, "history_events")?, 1);
        Ok(())
    }

    #[test]
    fn accept_refuses_stale_proposal() -> Result<()> {
        let (db, store, history, zones) = setup()?;

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "www.example.com", "10.0.0.1")), None);
        proposal.persist(&store)?.unwrap();

        // Concurrent edit bumps the zone's serial before acceptance.
        zones.set_serial(1, "2024031001");

        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(!acceptor.accept(&proposal, "root")?);

        // Nothing applied, proposal intact.
        assert_eq!(zones.record_count(), 0);
        assert_eq!(row_count(&db, "proposals")?, 1);

        // An approver who reviewed the conflict can still push it through.
        assert!(acceptor.accept_with_override(&proposal, "root")?);
        assert_eq!(zones.record_count(), 1);
        assert_eq!(row_count(&db, "proposals")?, 0);
        Ok(())
    }

    #[test]
    fn dispatch_failure_keeps_proposal_for_retry() -> Result<()> {
        let (db, store, history, zones) = setup()?;

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "www.example.com", "10.0.0.1")), None);
        proposal.persist(&store)?.unwrap();

        zones.fail_next_write();
        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(!acceptor.accept(&proposal, "root")?);

        assert_eq!(row_count(&db, "proposals")?, 1);
        assert_eq!(row_count(&db, "history_events")?, 0);
        assert_eq!(zones.serial(1), Some("2024031000".to_string()));

        // Retriable: the fault is gone, the same proposal applies cleanly.
        assert!(acceptor.accept(&proposal, "root")?);
        assert_eq!(row_count(&db, "proposals")?, 0);
        Ok(())
    }

    #[test]
    fn accept_dispatches_each_kind() -> Result<()> {
        let (_db, store, history, zones) = setup()?;
        zones.add_zone(2, "example.org", "2024031000");
        let edit_id = zones.add_record(a_record(1, "mail.example.com", "10.0.0.2"));
        let delete_id = zones.add_record(a_record(1, "ftp.example.com", "10.0.0.3"));

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "www.example.com", "10.0.0.1")), None);
        proposal.add_change(
            1,
            "2024031000",
            Some(a_record(1, "mail.example.com", "10.0.0.2")),
            Some(a_record(1, "mail.example.com", "10.0.0.9")),
            Some(edit_id),
        );
        proposal.add_change(
            1,
            "2024031000",
            Some(a_record(1, "ftp.example.com", "10.0.0.3")),
            None,
            Some(delete_id),
        );
        proposal.add_zone_delete_change(2, "2024031000");
        proposal.persist(&store)?.unwrap();

        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(acceptor.accept(&proposal, "root")?);

        assert_eq!(zones.record(edit_id).unwrap().content, "10.0.0.9");
        assert!(zones.record(delete_id).is_none());
        assert!(zones.serial(2).is_none()); // zone 2 deleted, not bumped
        Ok(())
    }

    #[test]
    fn accept_bumps_each_affected_zone_once() -> Result<()> {
        let (_db, store, history, zones) = setup()?;
        zones.add_zone(2, "example.org", "2024031000");

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "a.example.com", "10.0.0.1")), None);
        proposal.add_change(1, "2024031000", None, Some(a_record(1, "b.example.com", "10.0.0.2")), None);
        proposal.add_change(2, "2024031000", None, Some(a_record(2, "a.example.org", "10.0.0.3")), None);
        proposal.persist(&store)?.unwrap();

        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(acceptor.accept(&proposal, "root")?);

        // One bump per zone regardless of how many units touched it.
        let expected = crate::serial::next_serial_now("2024031000");
        assert_eq!(zones.serial(1), Some(expected.clone()));
        assert_eq!(zones.serial(2), Some(expected));
        Ok(())
    }

    #[test]
    fn accept_records_history_with_approver() -> Result<()> {
        let (db, store, history, zones) = setup()?;
        let edit_id = zones.add_record(a_record(1, "mail.example.com", "10.0.0.2"));

        let mut proposal = ChangeProposal::new("alice", 1700000000);
        proposal.add_change(
            1,
            "2024031000",
            Some(a_record(1, "mail.example.com", "10.0.0.2")),
            Some(a_record(1, "mail.example.com", "10.0.0.9")),
            Some(edit_id),
        );
        proposal.persist(&store)?.unwrap();

        let acceptor = ProposalAcceptor::new(&store, &history, &zones, &zones);
        assert!(acceptor.accept(&proposal, "root")?);

        #[derive(Serialize, Deserialize)]
        struct EventRow {
            event: String,
            user: String,
            approved_by: Option<String>,
            zone_name: Option<String>,
        }
        let events: Vec<EventRow> = db.query(
            "SELECT event, user, approved_by, zone_name FROM history_events",
            [],
        )?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "record_edit");
        assert_eq!(events[0].user, "alice");
        assert_eq!(events[0].approved_by, Some("root".to_string()));
        assert_eq!(events[0].zone_name, Some("example.com".to_string()));
        Ok(())
    }
}
