//! Contact-related database queries

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{ContactGroup, ContactRecord};

/// Load every known contact GUID. Called once per insert run; the set is
/// held in memory for the duration of the import.
pub async fn existing_contact_guids(pool: &PgPool) -> Result<HashSet<Uuid>> {
    let guids: Vec<Uuid> = sqlx::query_scalar("SELECT contact_guid FROM contacts")
        .fetch_all(pool)
        .await?;
    Ok(guids.into_iter().collect())
}

/// Resolve a contact group by its GUID.
pub async fn find_group_by_guid(pool: &PgPool, guid: Uuid) -> Result<Option<ContactGroup>> {
    let row: Option<(i64, Uuid, String)> = sqlx::query_as(
        r#"
        SELECT contact_group_id, contact_group_guid, contact_group_name
        FROM contact_groups
        WHERE contact_group_guid = $1
        "#,
    )
    .bind(guid)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, guid, name)| ContactGroup { id, guid, name }))
}

/// Bulk-insert one batch of contacts via UNNEST arrays — a single round
/// trip per batch. Missing created timestamps are stamped with now().
pub async fn bulk_insert_contacts(pool: &PgPool, records: &[ContactRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let mut guids: Vec<Uuid> = Vec::with_capacity(records.len());
    let mut created: Vec<DateTime<Utc>> = Vec::with_capacity(records.len());
    let mut first_names: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut middle_names: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut last_names: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut emails: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut addresses: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut ages: Vec<Option<i32>> = Vec::with_capacity(records.len());

    for record in records {
        guids.push(record.contact_guid);
        created.push(record.contact_created.unwrap_or_else(Utc::now));
        first_names.push(record.first_name.clone());
        middle_names.push(record.middle_name.clone());
        last_names.push(record.last_name.clone());
        emails.push(record.email.clone());
        addresses.push(record.address_line.clone());
        ages.push(record.age);
    }

    sqlx::query(
        r#"
        INSERT INTO contacts (contact_guid, contact_created, contact_first_name,
            contact_middle_name, contact_last_name, contact_email,
            contact_address_1, contact_age)
        SELECT * FROM UNNEST($1::uuid[], $2::timestamptz[], $3::text[], $4::text[],
            $5::text[], $6::text[], $7::text[], $8::int4[])
        "#,
    )
    .bind(&guids)
    .bind(&created)
    .bind(&first_names)
    .bind(&middle_names)
    .bind(&last_names)
    .bind(&emails)
    .bind(&addresses)
    .bind(&ages)
    .execute(pool)
    .await?;

    Ok(())
}

/// Link the given contacts into a group, skipping pairs that are already
/// members. Returns the number of memberships created.
pub async fn link_contacts_to_group(
    pool: &PgPool,
    contact_guids: &[Uuid],
    group_id: i64,
) -> Result<u64> {
    if contact_guids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO contact_group_members (contact_group_id, contact_id, from_manual)
        SELECT $1, c.contact_id, TRUE
        FROM contacts c
        WHERE c.contact_guid = ANY($2)
          AND NOT EXISTS (
              SELECT 1 FROM contact_group_members m
              WHERE m.contact_group_id = $1
                AND m.contact_id = c.contact_id)
        "#,
    )
    .bind(group_id)
    .bind(contact_guids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete contacts matched by GUID, at most `batch_limit` rows per
/// statement, looping until no matching rows remain. Memberships go with
/// them via ON DELETE CASCADE.
pub async fn bulk_delete_contacts(
    pool: &PgPool,
    contact_guids: &[Uuid],
    batch_limit: usize,
) -> Result<u64> {
    if contact_guids.is_empty() {
        return Ok(0);
    }

    let mut total = 0u64;
    loop {
        let result = sqlx::query(
            r#"
            DELETE FROM contacts
            WHERE contact_id IN (
                SELECT contact_id FROM contacts
                WHERE contact_guid = ANY($1)
                LIMIT $2)
            "#,
        )
        .bind(contact_guids)
        .bind(batch_limit as i64)
        .execute(pool)
        .await?;

        let deleted = result.rows_affected();
        total += deleted;
        if deleted < batch_limit as u64 {
            break;
        }
    }

    Ok(total)
}

/// Record one bulk mutation in the audit trail.
pub async fn record_audit(pool: &PgPool, operation: &str, row_count: i64) -> Result<()> {
    sqlx::query("INSERT INTO import_audit (operation, row_count) VALUES ($1, $2)")
        .bind(operation)
        .bind(row_count)
        .execute(pool)
        .await?;
    Ok(())
}
