//! The reference [`RecordWriter`]: upserts each record into a
//! `harvested_records` table keyed on `(endpoint, metadata_prefix,
//! identifier)` (see `migrations/0001_harvested_records.sql`).

use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::error::WriterError;
use crate::oai::RawRecord;

use super::RecordWriter;

pub struct PgRecordWriter {
    pool: PgPool,
    endpoint: String,
    metadata_prefix: String,
    latest_datestamp: Mutex<Option<String>>,
}

impl PgRecordWriter {
    pub fn new(pool: PgPool, endpoint: impl Into<String>, metadata_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            endpoint: endpoint.into(),
            metadata_prefix: metadata_prefix.into(),
            latest_datestamp: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecordWriter for PgRecordWriter {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn write(&self, records: &[RawRecord]) -> Result<Option<String>, WriterError> {
        for record in records {
            let status = if record.header.status.as_deref() == Some("deleted") {
                "deleted"
            } else {
                "available"
            };

            sqlx::query(
                r#"
                INSERT INTO harvested_records
                    (endpoint, metadata_prefix, identifier, datestamp, status, payload, fetched_at)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                ON CONFLICT (endpoint, metadata_prefix, identifier)
                DO UPDATE SET
                    datestamp = excluded.datestamp,
                    status = excluded.status,
                    payload = excluded.payload,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(&self.endpoint)
            .bind(&self.metadata_prefix)
            .bind(&record.header.identifier)
            .bind(&record.header.datestamp)
            .bind(status)
            .bind(&record.xml)
            .execute(&self.pool)
            .await
            .map_err(|source| WriterError::Persistence(source.into()))?;

            let mut latest = self.latest_datestamp.lock().unwrap();
            if latest.as_deref() < Some(record.header.datestamp.as_str()) {
                *latest = Some(record.header.datestamp.clone());
            }
        }

        let latest = self.latest_datestamp.lock().unwrap().clone();
        debug!(latest = ?latest, "wrote batch");
        Ok(latest)
    }
}
