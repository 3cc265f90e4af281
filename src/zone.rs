use anyhow::Result;

use crate::record::Record;

/// Read/update access to the zone catalog the proposals are made against.
/// Implemented by the surrounding application; zonedraft only consumes it.
pub trait ZoneDirectory {
    fn zone_exists(&self, zone_id: i64) -> Result<bool>;
    fn zone_name(&self, zone_id: i64) -> Result<Option<String>>;
    /// The zone's current SOA serial, the anchor for staleness detection.
    fn current_serial(&self, zone_id: i64) -> Result<Option<String>>;
    fn update_serial(&self, zone_id: i64, serial: &str) -> Result<()>;
}

/// CRUD on the live record set, supplied by the surrounding application.
/// The acceptor dispatches each approved change unit to exactly one of
/// these operations.
pub trait LiveRecords {
    fn insert_record(&self, record: &Record) -> Result<i64>;
    fn update_record(&self, record_id: i64, record: &Record) -> Result<()>;
    fn delete_record(&self, record_id: i64) -> Result<()>;
    fn delete_zone(&self, zone_id: i64) -> Result<()>;
}

/// In-memory stand-ins for the zone catalog and live record set, shared by
/// the unit tests of the resolver and the acceptor.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    use anyhow::Result;

    use crate::record::Record;

    use super::{LiveRecords, ZoneDirectory};

    #[derive(Clone, Debug)]
    struct Zone {
        name: String,
        serial: String,
    }

    #[derive(Default)]
    pub struct MemoryZones {
        zones: RefCell<BTreeMap<i64, Zone>>,
        records: RefCell<BTreeMap<i64, Record>>,
        next_record_id: Cell<i64>,
        fail_next_write: Cell<bool>,
    }

    impl MemoryZones {
        pub fn new() -> Self {
            MemoryZones {
                next_record_id: Cell::new(1),
                ..Default::default()
            }
        }

        pub fn add_zone(&self, zone_id: i64, name: &str, serial: &str) {
            self.zones.borrow_mut().insert(
                zone_id,
                Zone {
                    name: name.to_string(),
                    serial: serial.to_string(),
                },
            );
        }

        pub fn remove_zone(&self, zone_id: i64) {
            self.zones.borrow_mut().remove(&zone_id);
        }

        pub fn set_serial(&self, zone_id: i64, serial: &str) {
            if let Some(zone) = self.zones.borrow_mut().get_mut(&zone_id) {
                zone.serial = serial.to_string();
            }
        }

        pub fn serial(&self, zone_id: i64) -> Option<String> {
            self.zones.borrow().get(&zone_id).map(|z| z.serial.clone())
        }

        pub fn add_record(&self, record: Record) -> i64 {
            let id = self.next_record_id.get();
            self.next_record_id.set(id + 1);
            self.records
                .borrow_mut()
                .insert(id, Record { id: Some(id), ..record });
            id
        }

        pub fn record(&self, record_id: i64) -> Option<Record> {
            self.records.borrow().get(&record_id).cloned()
        }

        pub fn record_count(&self) -> usize {
            self.records.borrow().len()
        }

        /// Makes the next live-record write fail, for dispatch-failure tests.
        pub fn fail_next_write(&self) {
            self.fail_next_write.set(true);
        }

        fn check_fault(&self) -> Result<()> {
            if self.fail_next_write.replace(false) {
                anyhow::bail!("injected live record fault");
            }
            Ok(())
        }
    }

    impl ZoneDirectory for MemoryZones {
        fn zone_exists(&self, zone_id: i64) -> Result<bool> {
            Ok(self.zones.borrow().contains_key(&zone_id))
        }

        fn zone_name(&self, zone_id: i64) -> Result<Option<String>> {
            Ok(self.zones.borrow().get(&zone_id).map(|z| z.name.clone()))
        }

        fn current_serial(&self, zone_id: i64) -> Result<Option<String>> {
            Ok(self.zones.borrow().get(&zone_id).map(|z| z.serial.clone()))
        }

        fn update_serial(&self, zone_id: i64, serial: &str) -> Result<()> {
            match self.zones.borrow_mut().get_mut(&zone_id) {
                Some(zone) => {
                    zone.serial = serial.to_string();
                    Ok(())
                }
                None => anyhow::bail!("no such zone: {}", zone_id),
            }
        }
    }

    impl LiveRecords for MemoryZones {
        fn insert_record(&self, record: &Record) -> Result<i64> {
            self.check_fault()?;
            Ok(self.add_record(record.clone()))
        }

        fn update_record(&self, record_id: i64, record: &Record) -> Result<()> {
            self.check_fault()?;
            match self.records.borrow_mut().get_mut(&record_id) {
                Some(existing) => {
                    *existing = Record {
                        id: Some(record_id),
                        ..record.clone()
                    };
                    Ok(())
                }
                None => anyhow::bail!("no such record: {}", record_id),
            }
        }

        fn delete_record(&self, record_id: i64) -> Result<()> {
            self.check_fault()?;
            match self.records.borrow_mut().remove(&record_id) {
                Some(_) => Ok(()),
                None => anyhow::bail!("no such record: {}", record_id),
            }
        }

        fn delete_zone(&self, zone_id: i64) -> Result<()> {
            self.check_fault()?;
            self.zones.borrow_mut().remove(&zone_id);
            self.records
                .borrow_mut()
                .retain(|_, record| record.zone_id != zone_id);
            Ok(())
        }
    }
}
