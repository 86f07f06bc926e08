use anyhow::Result;

use crate::record::Record;

/// Durable destination for finished records.
pub trait RecordSink {
    #[allow(clippy::missing_errors_doc)]
    fn append(&mut self, record: &Record) -> Result<()>;
}

/// Keeps records in memory. Useful for hosts that post-process records
/// themselves and for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordSink {
    records: Vec<Record>,
}

impl InMemoryRecordSink {
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl RecordSink for InMemoryRecordSink {
    fn append(&mut self, record: &Record) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
