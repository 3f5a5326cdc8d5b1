//! Import pipeline: streams CSV batches from a byte source into bulk store
//! operations.
//!
//! CSV parsing runs on a blocking thread and hands classified batches over
//! a capacity-1 channel to the async side, so parsing the next batch
//! overlaps the previous batch's store write while keeping at most one
//! batch in flight.

pub mod batcher;

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::store::{BulkInsertOptions, ContactStore};
use crate::services::import::batcher::Classified;
use crate::services::pipe::PipeGauge;
use crate::types::{
    ContactDeleteRecord, ContactGroup, ContactRecord, ImportContext, ImportError, ImportKind,
    ImportResult,
};

const NOTICE_BUFFER: usize = 64;

/// Best-effort notices emitted while an import runs. Delivery is not
/// awaited and may lag or drop under load; import correctness never
/// depends on them.
#[derive(Debug, Clone)]
pub enum ImportNotice {
    Progress {
        total_processed: u64,
        buffered_chunks: usize,
    },
    RecordFailed(ImportResult),
}

/// Fire-and-forget sender for [`ImportNotice`] values.
#[derive(Clone)]
pub struct ImportNotifier {
    tx: mpsc::Sender<ImportNotice>,
    gauge: PipeGauge,
}

impl ImportNotifier {
    pub fn channel(gauge: PipeGauge) -> (Self, mpsc::Receiver<ImportNotice>) {
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
        (Self { tx, gauge }, rx)
    }

    fn progress(&self, total_processed: u64) {
        let _ = self.tx.try_send(ImportNotice::Progress {
            total_processed,
            buffered_chunks: self.gauge.pending_chunks(),
        });
    }

    fn record_failed(&self, message: String) {
        let _ = self
            .tx
            .try_send(ImportNotice::RecordFailed(ImportResult::failure(message)));
    }
}

/// Orchestrates insert and delete imports against a [`ContactStore`].
pub struct ImportService {
    store: Arc<dyn ContactStore>,
}

impl ImportService {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    /// Run one import to completion, reading CSV bytes from `source`.
    /// Returns the total number of records processed.
    pub async fn run_import<R>(
        &self,
        source: R,
        context: ImportContext,
        notifier: ImportNotifier,
    ) -> Result<u64>
    where
        R: Read + Send + 'static,
    {
        match context.kind {
            ImportKind::InsertAndSkipExisting => {
                self.insert_contacts(source, &context, notifier).await
            }
            ImportKind::Delete => self.delete_contacts(source, &context, notifier).await,
        }
    }

    async fn insert_contacts<R>(
        &self,
        source: R,
        context: &ImportContext,
        notifier: ImportNotifier,
    ) -> Result<u64>
    where
        R: Read + Send + 'static,
    {
        // Resolve every target group before touching contact data; a
        // missing group aborts the run with nothing written.
        let mut groups: Vec<ContactGroup> = Vec::with_capacity(context.groups.len());
        for guid in &context.groups {
            let group = self
                .store
                .resolve_group(*guid)
                .await?
                .ok_or(ImportError::ContactGroupNotFound(*guid))?;
            groups.push(group);
        }

        let existing = self.store.existing_contact_guids().await?;
        info!("loaded {} existing contact GUIDs", existing.len());

        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<Classified<ContactRecord>>>(1);
        let delimiter = context.delimiter;
        let batch_size = context.batch_size;
        let parse_notifier = notifier.clone();
        let parser = tokio::task::spawn_blocking(move || {
            batcher::process(
                source,
                delimiter,
                batch_size,
                |record: &ContactRecord| !existing.contains(&record.contact_guid),
                |batch| {
                    batch_tx
                        .blocking_send(batch)
                        .map_err(|_| anyhow::anyhow!("batch consumer stopped"))
                },
                |total| parse_notifier.progress(total),
                |message| parse_notifier.record_failed(message),
            )
        });

        let options = BulkInsertOptions { log_events: false };
        while let Some(batch) = batch_rx.recv().await {
            if batch.is_empty() {
                continue;
            }
            let skipped = batch.iter().filter(|c| !c.is_new).count();
            let to_insert: Vec<ContactRecord> = batch
                .into_iter()
                .filter(|c| c.is_new)
                .map(|c| c.record)
                .collect();
            if to_insert.is_empty() {
                continue;
            }

            self.store.bulk_insert(&to_insert, &options).await?;
            debug!(
                "inserted batch of {} contacts ({} skipped as existing)",
                to_insert.len(),
                skipped
            );

            if !groups.is_empty() {
                let inserted_guids: Vec<Uuid> =
                    to_insert.iter().map(|c| c.contact_guid).collect();
                for group in &groups {
                    self.store.link_to_group(&inserted_guids, group).await?;
                    debug!(
                        "linked {} contacts into group '{}' ({})",
                        inserted_guids.len(),
                        group.name,
                        group.guid
                    );
                }
            }
        }

        let total = parser.await.context("csv parser task failed")??;
        info!("insert import finished: {} records processed", total);
        Ok(total)
    }

    async fn delete_contacts<R>(
        &self,
        source: R,
        context: &ImportContext,
        notifier: ImportNotifier,
    ) -> Result<u64>
    where
        R: Read + Send + 'static,
    {
        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<Classified<ContactDeleteRecord>>>(1);
        let delimiter = context.delimiter;
        let batch_size = context.batch_size;
        let parse_notifier = notifier.clone();
        let parser = tokio::task::spawn_blocking(move || {
            batcher::process(
                source,
                delimiter,
                batch_size,
                |_: &ContactDeleteRecord| true,
                |batch| {
                    batch_tx
                        .blocking_send(batch)
                        .map_err(|_| anyhow::anyhow!("batch consumer stopped"))
                },
                |total| parse_notifier.progress(total),
                |message| parse_notifier.record_failed(message),
            )
        });

        // One delete in flight at a time; the capacity-1 batch channel lets
        // parsing of the next batch overlap the current delete.
        let mut deleted_total = 0u64;
        while let Some(batch) = batch_rx.recv().await {
            if batch.is_empty() {
                continue;
            }
            let guids: Vec<Uuid> = batch.into_iter().map(|c| c.record.contact_guid).collect();
            deleted_total += self.store.bulk_delete(&guids, context.batch_size).await?;
        }

        let total = parser.await.context("csv parser task failed")??;
        info!(
            "delete import finished: {} rows processed, {} contacts deleted",
            total, deleted_total
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// In-memory store tracking every call the pipeline makes.
    #[derive(Default)]
    struct MockStore {
        contacts: Mutex<Vec<ContactRecord>>,
        groups: Mutex<HashMap<Uuid, ContactGroup>>,
        links: Mutex<HashSet<(Uuid, Uuid)>>,
        insert_batch_sizes: Mutex<Vec<usize>>,
        audited_inserts: Mutex<u32>,
    }

    impl MockStore {
        fn with_contacts(guids: &[Uuid]) -> Self {
            let store = Self::default();
            {
                let mut contacts = store.contacts.lock().unwrap();
                for guid in guids {
                    contacts.push(contact(*guid));
                }
            }
            store
        }

        fn add_group(&self, guid: Uuid) {
            let mut groups = self.groups.lock().unwrap();
            let id = groups.len() as i64 + 1;
            groups.insert(
                guid,
                ContactGroup {
                    id,
                    guid,
                    name: format!("group-{id}"),
                },
            );
        }

        fn contact_count(&self) -> usize {
            self.contacts.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl ContactStore for MockStore {
        async fn existing_contact_guids(&self) -> Result<HashSet<Uuid>> {
            Ok(self
                .contacts
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.contact_guid)
                .collect())
        }

        async fn resolve_group(&self, guid: Uuid) -> Result<Option<ContactGroup>> {
            Ok(self.groups.lock().unwrap().get(&guid).cloned())
        }

        async fn bulk_insert(
            &self,
            records: &[ContactRecord],
            options: &BulkInsertOptions,
        ) -> Result<()> {
            self.insert_batch_sizes.lock().unwrap().push(records.len());
            if options.log_events {
                *self.audited_inserts.lock().unwrap() += 1;
            }
            self.contacts.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        async fn link_to_group(
            &self,
            contact_guids: &[Uuid],
            group: &ContactGroup,
        ) -> Result<()> {
            let mut links = self.links.lock().unwrap();
            for guid in contact_guids {
                links.insert((group.guid, *guid));
            }
            Ok(())
        }

        async fn bulk_delete(&self, contact_guids: &[Uuid], _batch_limit: usize) -> Result<u64> {
            let wanted: HashSet<Uuid> = contact_guids.iter().copied().collect();
            let mut contacts = self.contacts.lock().unwrap();
            let before = contacts.len();
            contacts.retain(|c| !wanted.contains(&c.contact_guid));
            Ok((before - contacts.len()) as u64)
        }
    }

    fn contact(guid: Uuid) -> ContactRecord {
        ContactRecord {
            contact_guid: guid,
            contact_created: None,
            first_name: Some("Test".to_string()),
            middle_name: None,
            last_name: Some("Contact".to_string()),
            email: Some("test@example.com".to_string()),
            address_line: None,
            age: None,
        }
    }

    fn insert_csv(guids: &[Uuid]) -> String {
        let mut text = String::from("ContactGUID,ContactFirstName,ContactEmail\n");
        for (i, guid) in guids.iter().enumerate() {
            text.push_str(&format!("{guid},Name{i},user{i}@example.com\n"));
        }
        text
    }

    fn delete_csv(guids: &[Uuid]) -> String {
        let mut text = String::from("ContactGUID\n");
        for guid in guids {
            text.push_str(&format!("{guid}\n"));
        }
        text
    }

    fn context(kind: ImportKind, batch_size: usize, groups: Vec<Uuid>) -> ImportContext {
        ImportContext::new(groups, batch_size, ",", kind).unwrap()
    }

    fn notifier() -> ImportNotifier {
        ImportNotifier::channel(PipeGauge::default()).0
    }

    fn service(store: Arc<MockStore>) -> ImportService {
        ImportService::new(store)
    }

    #[tokio::test]
    async fn insert_skips_existing_and_batches_the_rest() {
        let guids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MockStore::with_contacts(&guids[..2]));
        let service = service(Arc::clone(&store));

        let total = service
            .run_import(
                Cursor::new(insert_csv(&guids).into_bytes()),
                context(ImportKind::InsertAndSkipExisting, 2, vec![]),
                notifier(),
            )
            .await
            .unwrap();

        assert_eq!(total, 5);
        assert_eq!(store.contact_count(), 5);
        let inserted: usize = store.insert_batch_sizes.lock().unwrap().iter().sum();
        assert_eq!(inserted, 3);
        // Insert runs suppress the audit side channel.
        assert_eq!(*store.audited_inserts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_twice_is_idempotent() {
        let guids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MockStore::default());
        let service = service(Arc::clone(&store));
        let ctx = context(ImportKind::InsertAndSkipExisting, 2, vec![]);

        service
            .run_import(
                Cursor::new(insert_csv(&guids).into_bytes()),
                ctx.clone(),
                notifier(),
            )
            .await
            .unwrap();
        assert_eq!(store.contact_count(), 5);

        service
            .run_import(Cursor::new(insert_csv(&guids).into_bytes()), ctx, notifier())
            .await
            .unwrap();
        assert_eq!(store.contact_count(), 5, "second run inserts nothing");
    }

    #[tokio::test]
    async fn missing_group_aborts_before_any_write() {
        let guids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MockStore::default());
        let service = service(Arc::clone(&store));

        let err = service
            .run_import(
                Cursor::new(insert_csv(&guids).into_bytes()),
                context(ImportKind::InsertAndSkipExisting, 10, vec![Uuid::new_v4()]),
                notifier(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not found"));
        assert_eq!(store.contact_count(), 0);
        assert!(store.insert_batch_sizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inserted_contacts_are_linked_into_each_group() {
        let guids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MockStore::with_contacts(&guids[..1]));
        let group_a = Uuid::new_v4();
        let group_b = Uuid::new_v4();
        store.add_group(group_a);
        store.add_group(group_b);
        let service = service(Arc::clone(&store));

        service
            .run_import(
                Cursor::new(insert_csv(&guids).into_bytes()),
                context(
                    ImportKind::InsertAndSkipExisting,
                    10,
                    vec![group_a, group_b],
                ),
                notifier(),
            )
            .await
            .unwrap();

        let links = store.links.lock().unwrap();
        // Only the 3 newly inserted contacts are linked, into both groups.
        assert_eq!(links.len(), 6);
        assert!(!links.contains(&(group_a, guids[0])));
    }

    #[tokio::test]
    async fn delete_removes_only_matching_contacts() {
        let existing: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MockStore::with_contacts(&existing));
        let service = service(Arc::clone(&store));

        let mut listed = existing.clone();
        listed.push(Uuid::new_v4()); // one GUID the store has never seen

        let total = service
            .run_import(
                Cursor::new(delete_csv(&listed).into_bytes()),
                context(ImportKind::Delete, 2, vec![]),
                notifier(),
            )
            .await
            .unwrap();

        assert_eq!(total, 4);
        assert_eq!(store.contact_count(), 0);
    }

    #[tokio::test]
    async fn header_only_csv_triggers_no_store_writes() {
        let store = Arc::new(MockStore::default());
        let service = service(Arc::clone(&store));

        let total = service
            .run_import(
                Cursor::new(insert_csv(&[]).into_bytes()),
                context(ImportKind::InsertAndSkipExisting, 10, vec![]),
                notifier(),
            )
            .await
            .unwrap();

        assert_eq!(total, 0);
        assert!(store.insert_batch_sizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_rows_surface_as_notices() {
        let store = Arc::new(MockStore::default());
        let service = service(Arc::clone(&store));
        let (notifier, mut notices) = ImportNotifier::channel(PipeGauge::default());

        let guid = Uuid::new_v4();
        let csv = format!(
            "ContactGUID,ContactFirstName,ContactEmail\nbroken,X,x@y.cz\n{guid},A,a@b.cz\n"
        );

        let total = service
            .run_import(
                Cursor::new(csv.into_bytes()),
                context(ImportKind::InsertAndSkipExisting, 10, vec![]),
                notifier,
            )
            .await
            .unwrap();

        assert_eq!(total, 2);
        assert_eq!(store.contact_count(), 1);

        let mut saw_failure = false;
        while let Ok(notice) = notices.try_recv() {
            if let ImportNotice::RecordFailed(result) = notice {
                assert!(!result.success);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }
}
