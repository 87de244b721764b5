//! Persistence of harvested records. The driver treats every call as
//! opaque, observing only the datestamp the writer reports back.

mod postgres;

pub use postgres::PgRecordWriter;

use async_trait::async_trait;

use crate::error::WriterError;
use crate::oai::RawRecord;

/// `write(records) -> latestDatestamp | null`. Input is the ordered
/// `<record>` children of one `ListRecords` response; output is the most
/// recent record header datestamp observed across all batches written so
/// far (a running maximum, not just this batch's maximum), or `None` if
/// unavailable.
///
/// Implementations should be idempotent per record identifier — safe
/// mid-response cancellation depends on it.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(&self, records: &[RawRecord]) -> Result<Option<String>, WriterError>;
}
