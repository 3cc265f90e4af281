use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db::{Db, DbTransaction};
use crate::record::Record;

/// Persists proposals across the proposal, change-unit and shadow-record
/// tables. Shadow rows exist solely to support a pending proposal, so
/// accept and discard both go through delete_proposal, which removes all
/// three layers in one transaction.
pub struct ProposalStore {
    db: Db,
}

/// Flat change_units row, as stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeUnitRow {
    pub id: i64,
    pub proposal_id: i64,
    pub zone_id: i64,
    pub base_serial: String,
    pub prior_shadow_id: Option<i64>,
    pub after_shadow_id: Option<i64>,
    pub live_record_id: Option<i64>,
}

impl ProposalStore {
    pub fn new(db: Db) -> Self {
        ProposalStore { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DbTransaction) -> Result<R>,
    {
        self.db.transaction(f)
    }

    pub fn insert_proposal(
        &self,
        txn: &DbTransaction,
        initiator: &str,
        created_at: i64,
    ) -> Result<i64> {
        txn.execute(
            "INSERT INTO proposals (initiator, created_at) VALUES (?, ?)",
            rusqlite::params![initiator, created_at],
        )?;
        Ok(txn.last_insert_rowid())
    }

    /// Writes one shadow snapshot and returns its id. A missing record
    /// (an insert's "prior", a delete's "after") legitimately produces no
    /// row and returns None.
    pub fn insert_shadow_record(
        &self,
        txn: &DbTransaction,
        record: Option<&Record>,
    ) -> Result<Option<i64>> {
        let record = match record {
            Some(record) => record,
            None => return Ok(None),
        };
        txn.execute(
            "INSERT INTO shadow_records (zone_id, name, type, content, ttl, priority, change_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                record.zone_id,
                record.name,
                record.record_type,
                record.content,
                record.ttl,
                record.priority,
                record.change_timestamp,
            ],
        )?;
        Ok(Some(txn.last_insert_rowid()))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_change_unit(
        &self,
        txn: &DbTransaction,
        proposal_id: i64,
        zone_id: i64,
        base_serial: &str,
        prior_shadow_id: Option<i64>,
        after_shadow_id: Option<i64>,
        live_record_id: Option<i64>,
    ) -> Result<i64> {
        txn.execute(
            "INSERT INTO change_units
                 (proposal_id, zone_id, base_serial, prior_shadow_id, after_shadow_id, live_record_id)
             VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                proposal_id,
                zone_id,
                base_serial,
                prior_shadow_id,
                after_shadow_id,
                live_record_id,
            ],
        )?;
        Ok(txn.last_insert_rowid())
    }

    pub fn change_units(&self, proposal_id: i64) -> Result<Vec<ChangeUnitRow>> {
        self.db.query(
            "SELECT * FROM change_units WHERE proposal_id = ? ORDER BY id",
            [proposal_id],
        )
    }

    /// Removes a proposal together with its change-unit rows and shadow
    /// rows, all inside one transaction. Partial failure rolls back
    /// completely: no orphaned shadow rows, no dangling proposal row, and
    /// the proposal stays fully intact for a retry.
    ///
    /// A proposal id that no longer exists is a no-op, so a crash between
    /// applying an accepted proposal and deleting it can be retried.
    pub fn delete_proposal(&self, proposal_id: i64) -> Result<()> {
        self.db.transaction(|txn| {
            let units: Vec<ChangeUnitRow> = txn.query(
                "SELECT * FROM change_units WHERE proposal_id = ? ORDER BY id",
                [proposal_id],
            )?;
            for unit in &units {
                // The unit row references its shadows, so it goes first.
                txn.execute("DELETE FROM change_units WHERE id = ?", [unit.id])?;
                if let Some(shadow_id) = unit.prior_shadow_id {
                    txn.execute("DELETE FROM shadow_records WHERE id = ?", [shadow_id])?;
                }
                if let Some(shadow_id) = unit.after_shadow_id {
                    txn.execute("DELETE FROM shadow_records WHERE id = ?", [shadow_id])?;
                }
            }
            txn.execute("DELETE FROM proposals WHERE id = ?", [proposal_id])?;
            Ok(())
        })
    }
}
