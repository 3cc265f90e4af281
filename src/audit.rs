use std::cell::Cell;
use std::collections::BTreeSet;

use anyhow::Result;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::diff::{changed_fields, RecordField};
use crate::proposal::ChangeKind;
use crate::record::Record;

/// Append-only permanent log of applied changes, separate from the proposal
/// shadow tables: shadow rows die with their proposal, history rows never do.
pub struct HistoryStore {
    db: Db,
}

/// One applied change about to enter the history log.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub occurred_at: i64,
    /// The user who proposed the change.
    pub user: String,
    /// The user who approved it, when it went through review.
    pub approved_by: Option<String>,
    /// Resolved at append time; still available after the zone is gone.
    pub zone_name: Option<String>,
    pub prior: Option<Record>,
    pub after: Option<Record>,
}

impl HistoryEntry {
    fn event_name(&self) -> &'static str {
        match ChangeKind::from_snapshots(self.prior.as_ref(), self.after.as_ref()) {
            ChangeKind::Insert => "record_create",
            ChangeKind::Edit => "record_edit",
            ChangeKind::Delete => "record_delete",
            ChangeKind::ZoneDelete => "zone_delete",
        }
    }
}

impl HistoryStore {
    pub fn new(db: Db) -> Self {
        HistoryStore { db }
    }

    /// Appends one event: snapshot rows first, then the event row, in one
    /// transaction. Returns the event id.
    pub fn append(&self, entry: &HistoryEntry) -> Result<i64> {
        self.db.transaction(|txn| {
            let prior_id = self.insert_snapshot(txn, entry.prior.as_ref())?;
            let after_id = self.insert_snapshot(txn, entry.after.as_ref())?;
            txn.execute(
                "INSERT INTO history_events
                     (occurred_at, event, user, approved_by, zone_name, prior_id, after_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    entry.occurred_at,
                    entry.event_name(),
                    entry.user,
                    entry.approved_by,
                    entry.zone_name,
                    prior_id,
                    after_id,
                ],
            )?;
            Ok(txn.last_insert_rowid())
        })
    }

    fn insert_snapshot(
        &self,
        txn: &crate::db::DbTransaction,
        record: Option<&Record>,
    ) -> Result<Option<i64>> {
        let record = match record {
            Some(record) => record,
            None => return Ok(None),
        };
        txn.execute(
            "INSERT INTO history_records (zone_id, name, type, content, ttl, priority, change_timestamp)
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

    pub fn db(&self) -> &Db {
        &self.db
    }
}

/// How a history event renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditEventKind {
    Create,
    Edit,
    Delete,
    ZoneDelete,
}

/// Pre-formatted record cells, ready for a templating layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditCells {
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: String,
    pub priority: String,
    pub change_timestamp: String,
}

/// One rendered history row. Create carries only `after`, Delete only
/// `prior`, Edit both (two stacked display rows) plus the changed-field
/// set for cell highlighting, ZoneDelete neither (one collapsed row).
#[derive(Clone, Debug)]
pub struct AuditRow {
    pub time: String,
    pub kind: AuditEventKind,
    pub user: String,
    /// "-" when the change did not go through review.
    pub approved_by: String,
    pub zone: String,
    pub prior: Option<AuditCells>,
    pub after: Option<AuditCells>,
    pub changed: BTreeSet<RecordField>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryRow {
    occurred_at: i64,
    user: String,
    approved_by: Option<String>,
    zone_name: Option<String>,
    prior_id: Option<i64>,
    prior_zone_id: Option<i64>,
    prior_name: Option<String>,
    prior_type: Option<String>,
    prior_content: Option<String>,
    prior_ttl: Option<i64>,
    prior_priority: Option<i64>,
    prior_change_timestamp: Option<i64>,
    after_id: Option<i64>,
    after_zone_id: Option<i64>,
    after_name: Option<String>,
    after_type: Option<String>,
    after_content: Option<String>,
    after_ttl: Option<i64>,
    after_priority: Option<i64>,
    after_change_timestamp: Option<i64>,
}

const RENDER_SQL: &str = "
    SELECT
        e.occurred_at       AS occurred_at,
        e.user              AS user,
        e.approved_by       AS approved_by,
        e.zone_name         AS zone_name,
        e.prior_id          AS prior_id,
        hp.zone_id          AS prior_zone_id,
        hp.name             AS prior_name,
        hp.type             AS prior_type,
        hp.content          AS prior_content,
        hp.ttl              AS prior_ttl,
        hp.priority         AS prior_priority,
        hp.change_timestamp AS prior_change_timestamp,
        e.after_id          AS after_id,
        ha.zone_id          AS after_zone_id,
        ha.name             AS after_name,
        ha.type             AS after_type,
        ha.content          AS after_content,
        ha.ttl              AS after_ttl,
        ha.priority         AS after_priority,
        ha.change_timestamp AS after_change_timestamp
    FROM history_events e
    LEFT JOIN history_records hp ON hp.id = e.prior_id
    LEFT JOIN history_records ha ON ha.id = e.after_id
    WHERE e.occurred_at >= ?
    ORDER BY e.occurred_at DESC, e.id DESC
";

impl HistoryRow {
    fn prior_record(&self) -> Option<Record> {
        Some(Record {
            id: Some(self.prior_id?),
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
            id: Some(self.after_id?),
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

/// Renders the applied change history for display, newest first. Pure
/// transformation over the history store; never mutates it.
pub struct AuditRenderer<'a> {
    history: &'a HistoryStore,
    rendered_any: Cell<bool>,
}

impl<'a> AuditRenderer<'a> {
    pub fn new(history: &'a HistoryStore) -> Self {
        AuditRenderer {
            history,
            rendered_any: Cell::new(false),
        }
    }

    /// All events at or after `since` (epoch seconds), newest first.
    /// Events are classified by which snapshots are present, the same
    /// derivation the proposal model uses, with Insert relabeled Create.
    pub fn render(&self, since: i64) -> Result<Vec<AuditRow>> {
        let rows: Vec<HistoryRow> = self.history.db().query(RENDER_SQL, [since])?;

        let mut rendered = Vec::with_capacity(rows.len());
        for row in rows {
            let prior = row.prior_record();
            let after = row.after_record();
            let kind = match ChangeKind::from_snapshots(prior.as_ref(), after.as_ref()) {
                ChangeKind::Insert => AuditEventKind::Create,
                ChangeKind::Edit => AuditEventKind::Edit,
                ChangeKind::Delete => AuditEventKind::Delete,
                ChangeKind::ZoneDelete => AuditEventKind::ZoneDelete,
            };
            let changed = match (prior.as_ref(), after.as_ref()) {
                (Some(prior), Some(after)) => changed_fields(prior, after),
                _ => BTreeSet::new(),
            };
            rendered.push(AuditRow {
                time: format_epoch(row.occurred_at),
                kind,
                user: row.user,
                approved_by: row.approved_by.unwrap_or_else(|| "-".to_string()),
                zone: row.zone_name.unwrap_or_default(),
                prior: prior.as_ref().map(cells),
                after: after.as_ref().map(cells),
                changed,
            });
        }

        if !rendered.is_empty() {
            self.rendered_any.set(true);
        }
        Ok(rendered)
    }

    /// Whether any render so far produced rows; drives the empty-state
    /// placeholder in the display layer.
    pub fn has_rendered_any_rows(&self) -> bool {
        self.rendered_any.get()
    }
}

fn cells(record: &Record) -> AuditCells {
    AuditCells {
        name: record.name.clone(),
        record_type: record.record_type.clone(),
        content: record.content.clone(),
        ttl: record.ttl.to_string(),
        priority: record.priority.to_string(),
        change_timestamp: record
            .change_timestamp
            .map(format_epoch)
            .unwrap_or_default(),
    }
}

fn format_epoch(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}
