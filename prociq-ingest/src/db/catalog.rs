//! Catalog entry persistence
//!
//! `insert_entry` deliberately carries no ON CONFLICT clause: the unique
//! index on (organization_id, entry_type, normalized_key) is the
//! concurrency mechanism, and the commit engine recovers from the
//! violation by re-reading the winning row.

use crate::models::{CatalogEntry, EntryAttributes, EntryType};
use chrono::Utc;
use prociq_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Load every catalog entry of one organization (snapshot build)
pub async fn load_for_organization(
    pool: &SqlitePool,
    organization_id: Uuid,
) -> Result<Vec<CatalogEntry>> {
    let rows = sqlx::query("SELECT * FROM catalog_entries WHERE organization_id = ?")
        .bind(organization_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(entry_from_row).collect()
}

/// Insert a new catalog entry inside the caller's transaction
///
/// Returns the raw sqlx error so the commit engine can distinguish a
/// unique-constraint violation (catalog race) from real failures.
pub async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &CatalogEntry,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO catalog_entries (
            id, organization_id, entry_type, canonical_name, normalized_key,
            attributes, created_at, last_matched_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.organization_id.to_string())
    .bind(entry.entry_type.as_str())
    .bind(&entry.canonical_name)
    .bind(&entry.normalized_key)
    .bind(serde_json::to_string(&entry.attributes).unwrap_or_else(|_| "{}".to_string()))
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.last_matched_at.map(|t| t.to_rfc3339()))
    .execute(conn)
    .await?;
    Ok(())
}

/// Re-read an entry by its uniqueness key (catalog race recovery)
pub async fn find_by_key(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    entry_type: EntryType,
    normalized_key: &str,
) -> Result<Option<CatalogEntry>> {
    let row = sqlx::query(
        "SELECT * FROM catalog_entries \
         WHERE organization_id = ? AND entry_type = ? AND normalized_key = ?",
    )
    .bind(organization_id.to_string())
    .bind(entry_type.as_str())
    .bind(normalized_key)
    .fetch_optional(conn)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Load one entry by id
pub async fn load_entry(pool: &SqlitePool, entry_id: Uuid) -> Result<Option<CatalogEntry>> {
    let row = sqlx::query("SELECT * FROM catalog_entries WHERE id = ?")
        .bind(entry_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(entry_from_row).transpose()
}

/// Touch the most-recently-used timestamp after a successful match
pub async fn touch_last_matched(conn: &mut SqliteConnection, entry_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE catalog_entries SET last_matched_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(entry_id.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<CatalogEntry> {
    let id: String = row.get("id");
    let org: String = row.get("organization_id");
    let entry_type: String = row.get("entry_type");
    let attributes: String = row.get("attributes");
    let created_at: String = row.get("created_at");
    let last_matched: Option<String> = row.get("last_matched_at");

    Ok(CatalogEntry {
        id: Uuid::parse_str(&id).map_err(|e| Error::Parse(e.to_string()))?,
        organization_id: Uuid::parse_str(&org).map_err(|e| Error::Parse(e.to_string()))?,
        entry_type: EntryType::parse(&entry_type)?,
        canonical_name: row.get("canonical_name"),
        normalized_key: row.get("normalized_key"),
        attributes: serde_json::from_str::<EntryAttributes>(&attributes)
            .map_err(|e| Error::Parse(format!("attributes: {}", e)))?,
        created_at: super::batches::parse_timestamp(&created_at)?,
        last_matched_at: last_matched
            .as_deref()
            .map(super::batches::parse_timestamp)
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_ingest_schema;

    async fn pool() -> SqlitePool {
        let pool = prociq_common::db::init_memory_pool().await.unwrap();
        init_ingest_schema(&pool).await.unwrap();
        pool
    }

    fn entry(org: Uuid, name: &str, key: &str) -> CatalogEntry {
        CatalogEntry::new(
            org,
            EntryType::Supplier,
            name.to_string(),
            key.to_string(),
            EntryAttributes::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_load_round_trip() {
        let pool = pool().await;
        let org = Uuid::new_v4();
        let e = entry(org, "Acme Corp", "acme");

        let mut conn = pool.acquire().await.unwrap();
        insert_entry(&mut conn, &e).await.unwrap();
        drop(conn);

        let loaded = load_for_organization(&pool, org).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].canonical_name, "Acme Corp");
        assert_eq!(loaded[0].normalized_key, "acme");
    }

    #[tokio::test]
    async fn test_unique_violation_and_recovery_read() {
        let pool = pool().await;
        let org = Uuid::new_v4();
        let first = entry(org, "Acme Corp", "acme");
        let second = entry(org, "ACME Corp.", "acme");

        let mut conn = pool.acquire().await.unwrap();
        insert_entry(&mut conn, &first).await.unwrap();

        let err = insert_entry(&mut conn, &second).await.unwrap_err();
        match &err {
            sqlx::Error::Database(db) => assert!(db.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }

        // The race-recovery path: re-read the winner by key
        let winner = find_by_key(&mut conn, org, EntryType::Supplier, "acme")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(winner.id, first.id);
    }

    #[tokio::test]
    async fn test_same_key_different_type_allowed() {
        let pool = pool().await;
        let org = Uuid::new_v4();
        let supplier = entry(org, "Acme", "acme");
        let material = CatalogEntry::new(
            org,
            EntryType::Material,
            "Acme".to_string(),
            "acme".to_string(),
            EntryAttributes::default(),
        );

        let mut conn = pool.acquire().await.unwrap();
        insert_entry(&mut conn, &supplier).await.unwrap();
        insert_entry(&mut conn, &material).await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_last_matched() {
        let pool = pool().await;
        let org = Uuid::new_v4();
        let e = entry(org, "Acme", "acme");

        let mut conn = pool.acquire().await.unwrap();
        insert_entry(&mut conn, &e).await.unwrap();
        touch_last_matched(&mut conn, e.id).await.unwrap();
        drop(conn);

        let loaded = load_entry(&pool, e.id).await.unwrap().unwrap();
        assert!(loaded.last_matched_at.is_some());
    }
}
