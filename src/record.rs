use serde::{Deserialize, Serialize};

/// One immutable DNS record snapshot.
///
/// The same type is built from live-table rows and from shadow-table rows;
/// the serde aliases absorb the `rid`/`zid` column names some queries use.
/// Names are fully qualified and lower-cased at construction, before
/// persistence. The caller is responsible for the name actually belonging
/// to the zone; no validation happens here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(alias = "rid")]
    pub id: Option<i64>,
    #[serde(alias = "zid")]
    pub zone_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    pub ttl: i64,
    pub priority: i64,
    /// Unset until the record is first persisted.
    pub change_timestamp: Option<i64>,
}

impl Record {
    pub fn new(
        id: Option<i64>,
        zone_id: i64,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: i64,
        priority: i64,
    ) -> Self {
        Record {
            id,
            zone_id,
            name: name.to_lowercase(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl,
            priority,
            change_timestamp: None,
        }
    }

    /// One-time back-fill of the change timestamp at persistence.
    pub fn with_change_timestamp(mut self, timestamp: i64) -> Self {
        self.change_timestamp = Some(timestamp);
        self
    }
}
