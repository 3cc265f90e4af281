pub mod acceptor;
pub mod audit;
pub mod db;
pub mod diff;
pub mod proposal;
pub mod record;
pub mod resolver;
pub mod serial;
pub mod store;
pub mod zone;

pub use acceptor::ProposalAcceptor;
pub use audit::{AuditRenderer, HistoryStore};
pub use db::Db;
pub use proposal::{Change, ChangeKind, ChangeProposal};
pub use record::Record;
pub use resolver::ProposalResolver;
pub use store::ProposalStore;
pub use zone::{LiveRecords, ZoneDirectory};

pub use rusqlite;
pub use rusqlite_migration;
pub use serde_rusqlite;
