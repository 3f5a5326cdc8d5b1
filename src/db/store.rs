//! Record store abstraction consumed by the import pipeline.
//!
//! `ContactStore` is the only surface the import runner talks to; the
//! Postgres implementation lives here, an in-memory one backs the runner
//! tests.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::types::{ContactGroup, ContactRecord};

/// Options applied to bulk mutations.
#[derive(Debug, Clone, Copy)]
pub struct BulkInsertOptions {
    /// When false, the store's secondary audit logging is suppressed for
    /// the operation. Import runs set this to false.
    pub log_events: bool,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self { log_events: true }
    }
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// All known contact GUIDs, loaded once per insert run.
    async fn existing_contact_guids(&self) -> Result<HashSet<Uuid>>;

    /// Resolve a contact group by GUID, or None if it does not exist.
    async fn resolve_group(&self, guid: Uuid) -> Result<Option<ContactGroup>>;

    /// Insert one batch of contacts.
    async fn bulk_insert(
        &self,
        records: &[ContactRecord],
        options: &BulkInsertOptions,
    ) -> Result<()>;

    /// Link contacts into a group. Idempotent with respect to contacts that
    /// are already members.
    async fn link_to_group(&self, contact_guids: &[Uuid], group: &ContactGroup) -> Result<()>;

    /// Delete contacts matched by GUID, honoring `batch_limit` per
    /// statement. Returns the number of rows deleted.
    async fn bulk_delete(&self, contact_guids: &[Uuid], batch_limit: usize) -> Result<u64>;
}

/// PostgreSQL-backed store.
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn existing_contact_guids(&self) -> Result<HashSet<Uuid>> {
        queries::contact::existing_contact_guids(&self.pool).await
    }

    async fn resolve_group(&self, guid: Uuid) -> Result<Option<ContactGroup>> {
        queries::contact::find_group_by_guid(&self.pool, guid).await
    }

    async fn bulk_insert(
        &self,
        records: &[ContactRecord],
        options: &BulkInsertOptions,
    ) -> Result<()> {
        queries::contact::bulk_insert_contacts(&self.pool, records).await?;
        if options.log_events {
            queries::contact::record_audit(&self.pool, "bulk_insert", records.len() as i64)
                .await?;
        }
        Ok(())
    }

    async fn link_to_group(&self, contact_guids: &[Uuid], group: &ContactGroup) -> Result<()> {
        queries::contact::link_contacts_to_group(&self.pool, contact_guids, group.id).await?;
        Ok(())
    }

    async fn bulk_delete(&self, contact_guids: &[Uuid], batch_limit: usize) -> Result<u64> {
        queries::contact::bulk_delete_contacts(&self.pool, contact_guids, batch_limit).await
    }
}
