use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::proposal::{ChangeKind, ChangeProposal};
use crate::record::Record;
use crate::store::ProposalStore;
use crate::zone::ZoneDirectory;

/// Loads stored proposals back into memory: one denormalized query over the
/// three staging tables, regrouped into ChangeProposal objects and flagged
/// for staleness against each zone's current serial.
pub struct ProposalResolver<'a, Z: ZoneDirectory> {
    store: &'a ProposalStore,
    zones: &'a Z,
}

/// Navigation badge counters over non-expired proposals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveCounts {
    pub own: usize,
    pub others: usize,
}

/// One row of the proposal/change-unit/shadow join. Unit and shadow columns
/// are all nullable: a proposal whose unit rows are gone still produces one
/// row, and each shadow side is independently optional.
#[derive(Debug, Serialize, Deserialize)]
struct ProposalRow {
    proposal_id: i64,
    initiator: String,
    created_at: i64,
    unit_id: Option<i64>,
    zone_id: Option<i64>,
    base_serial: Option<String>,
    live_record_id: Option<i64>,
    prior_shadow_id: Option<i64>,
    prior_zone_id: Option<i64>,
    prior_name: Option<String>,
    prior_type: Option<String>,
    prior_content: Option<String>,
    prior_ttl: Option<i64>,
    prior_priority: Option<i64>,
    prior_change_timestamp: Option<i64>,
    after_shadow_id: Option<i64>,
    after_zone_id: Option<i64>,
    after_name: Option<String>,
    after_type: Option<String>,
    after_content: Option<String>,
    after_ttl: Option<i64>,
    after_priority: Option<i64>,
    after_change_timestamp: Option<i64>,
}

const LOAD_SQL: &str = "
    SELECT
        p.id                AS proposal_id,
        p.initiator         AS initiator,
        p.created_at        AS created_at,
        u.id                AS unit_id,
        u.zone_id           AS zone_id,
        u.base_serial       AS base_serial,
        u.live_record_id    AS live_record_id,
        u.prior_shadow_id   AS prior_shadow_id,
        sp.zone_id          AS prior_zone_id,
        sp.name             AS prior_name,
        sp.type             AS prior_type,
        sp.content          AS prior_content,
        sp.ttl              AS prior_ttl,
        sp.priority         AS prior_priority,
        sp.change_timestamp AS prior_change_timestamp,
        u.after_shadow_id   AS after_shadow_id,
        sa.zone_id          AS after_zone_id,
        sa.name             AS after_name,
        sa.type             AS after_type,
        sa.content          AS after_content,
        sa.ttl              AS after_ttl,
        sa.priority         AS after_priority,
        sa.change_timestamp AS after_change_timestamp
    FROM proposals p
    LEFT JOIN change_units u   ON u.proposal_id = p.id
    LEFT JOIN shadow_records sp ON sp.id = u.prior_shadow_id
    LEFT JOIN shadow_records sa ON sa.id = u.after_shadow_id
    ORDER BY p.id, u.id
";

impl ProposalRow {
    fn prior_record(&self) -> Option<Record> {
        Some(Record {
            id: Some(self.prior_shadow_id?),
            zone_id: self.prior_zone_id?,
            name: self.prior_name.clone()?,
            record_type: self.prior_type.clone()?,
            content: self.prior_content.clone()?,
            ttl: self.prior_ttl?,
            priority: self.prior_priority?,
            change_timestamp: self.prior_change_timestamp,
        })
    }

    fn after_record(&self) -> Option<Record> {
        Some(Record {
            id: Some(self.after_shadow_id?),
            zone_id: self.after_zone_id?,
            name: self.after_name.clone()?,
            record_type: self.after_type.clone()?,
            content: self.after_content.clone()?,
            ttl: self.after_ttl?,
            priority: self.after_priority?,
            change_timestamp: self.after_change_timestamp,
        })
    }
}

/// Cached per-zone state, one directory lookup per zone per load.
#[derive(Clone, Debug)]
enum ZoneState {
    Missing,
    Serial(Option<String>),
}

impl<'a, Z: ZoneDirectory> ProposalResolver<'a, Z> {
    pub fn new(store: &'a ProposalStore, zones: &'a Z) -> Self {
        ProposalResolver { store, zones }
    }

    /// All stored proposals in display order: active proposals first, then
    /// expired ones, each bucket keeping its stored relative order.
    ///
    /// Change units whose zone no longer exists are skipped with a warning
    /// rather than failing the whole load. A proposal whose unit rows are
    /// all gone still surfaces as an empty proposal.
    pub fn load_all(&self) -> Result<Vec<ChangeProposal>> {
        let rows: Vec<ProposalRow> = self.store.db().query(LOAD_SQL, [])?;

        let mut zone_cache: HashMap<i64, ZoneState> = HashMap::new();
        let mut surviving: Vec<&ProposalRow> = Vec::new();
        for row in &rows {
            if let Some(zone_id) = row.zone_id {
                if matches!(self.zone_state(&mut zone_cache, zone_id)?, ZoneState::Missing) {
                    log::warn!(
                        "skipping change unit {:?} of proposal {}: zone {} no longer exists",
                        row.unit_id,
                        row.proposal_id,
                        zone_id
                    );
                    continue;
                }
            }
            surviving.push(row);
        }

        // Pass 1: one shell per proposal, in first-occurrence order.
        let mut order: Vec<i64> = Vec::new();
        let mut shells: HashMap<i64, ChangeProposal> = HashMap::new();
        for row in &surviving {
            shells.entry(row.proposal_id).or_insert_with(|| {
                order.push(row.proposal_id);
                let mut shell = ChangeProposal::new(&row.initiator, row.created_at);
                shell.proposal_id = Some(row.proposal_id);
                shell
            });
        }

        // Pass 2: append change units and accumulate staleness.
        for row in &surviving {
            let (zone_id, base_serial) = match (row.zone_id, row.base_serial.as_deref()) {
                (Some(zone_id), Some(base_serial)) => (zone_id, base_serial),
                _ => continue, // empty proposal row
            };
            let proposal = match shells.get_mut(&row.proposal_id) {
                Some(proposal) => proposal,
                None => continue,
            };

            let stale = match self.zone_state(&mut zone_cache, zone_id)? {
                ZoneState::Serial(Some(current)) => current != base_serial,
                // A zone without a readable serial cannot anchor the
                // optimistic check; treat its units as stale.
                _ => true,
            };
            if stale {
                proposal.expired = true;
            }

            let prior = row.prior_record();
            let after = row.after_record();
            match ChangeKind::from_snapshots(prior.as_ref(), after.as_ref()) {
                ChangeKind::ZoneDelete => proposal.add_zone_delete_change(zone_id, base_serial),
                _ => proposal.add_change(zone_id, base_serial, prior, after, row.live_record_id),
            }
        }

        // Active before expired, relative order preserved within each bucket.
        let mut active = Vec::new();
        let mut expired = Vec::new();
        for proposal_id in order {
            if let Some(proposal) = shells.remove(&proposal_id) {
                if proposal.expired {
                    expired.push(proposal);
                } else {
                    active.push(proposal);
                }
            }
        }
        active.extend(expired);
        Ok(active)
    }

    /// Counts non-expired proposals initiated by `user` versus by others.
    pub fn active_counts(&self, user: &str) -> Result<ActiveCounts> {
        let mut counts = ActiveCounts::default();
        for proposal in self.load_all()? {
            if proposal.expired {
                continue;
            }
            if proposal.initiator == user {
                counts.own += 1;
            } else {
                counts.others += 1;
            }
        }
        Ok(counts)
    }

    fn zone_state(
        &self,
        cache: &mut HashMap<i64, ZoneState>,
        zone_id: i64,
    ) -> Result<ZoneState> {
        if let Some(state) = cache.get(&zone_id) {
            return Ok(state.clone());
        }
        let state = if self.zones.zone_exists(zone_id)? {
            ZoneState::Serial(self.zones.current_serial(zone_id)?)
        } else {
            ZoneState::Missing
        };
        cache.insert(zone_id, state.clone());
        Ok(state)
    }
}
