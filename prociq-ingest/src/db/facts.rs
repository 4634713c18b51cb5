//! Derived fact persistence: purchase-order lines and price observations

use crate::models::{PoLine, PriceObservation};
use crate::pipeline::resolver::duplicate_key;
use chrono::NaiveDate;
use prociq_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

const DATE_FMT: &str = "%Y-%m-%d";

/// Insert a purchase-order line inside the caller's transaction
pub async fn insert_po_line(conn: &mut SqliteConnection, line: &PoLine) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO po_lines (
            id, organization_id, staging_record_id, supplier_id, material_id,
            quantity, unit_price, total_price, currency, order_date,
            delivery_date, po_number
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(line.id.to_string())
    .bind(line.organization_id.to_string())
    .bind(line.staging_record_id.to_string())
    .bind(line.supplier_id.to_string())
    .bind(line.material_id.to_string())
    .bind(line.quantity)
    .bind(line.unit_price)
    .bind(line.total_price)
    .bind(&line.currency)
    .bind(line.order_date.format(DATE_FMT).to_string())
    .bind(line.delivery_date.map(|d| d.format(DATE_FMT).to_string()))
    .bind(&line.po_number)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert a price observation inside the caller's transaction
pub async fn insert_price_observation(
    conn: &mut SqliteConnection,
    obs: &PriceObservation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO price_observations (
            id, organization_id, material_id, supplier_id, unit_price,
            observed_date, staging_record_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(obs.id.to_string())
    .bind(obs.organization_id.to_string())
    .bind(obs.material_id.to_string())
    .bind(obs.supplier_id.to_string())
    .bind(obs.unit_price)
    .bind(obs.observed_date.format(DATE_FMT).to_string())
    .bind(obs.staging_record_id.to_string())
    .execute(conn)
    .await?;
    Ok(())
}

/// (material normalized key, unit price) pairs backing the trailing price
/// statistics in the catalog snapshot
pub async fn load_price_history(
    pool: &SqlitePool,
    organization_id: Uuid,
) -> Result<Vec<(String, f64)>> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        r#"
        SELECT ce.normalized_key, po.unit_price
        FROM price_observations po
        JOIN catalog_entries ce ON ce.id = po.material_id
        WHERE po.organization_id = ?
        "#,
    )
    .bind(organization_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Duplicate-tuple keys of already-committed lines, with occurrence
/// counts (uniqueness dimension)
pub async fn load_committed_line_keys(
    pool: &SqlitePool,
    organization_id: Uuid,
) -> Result<HashMap<String, u32>> {
    let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
        r#"
        SELECT s.normalized_key, m.normalized_key, pl.order_date,
               COALESCE(pl.total_price, pl.quantity * pl.unit_price)
        FROM po_lines pl
        JOIN catalog_entries s ON s.id = pl.supplier_id
        JOIN catalog_entries m ON m.id = pl.material_id
        WHERE pl.organization_id = ?
        "#,
    )
    .bind(organization_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts: HashMap<String, u32> = HashMap::new();
    for (supplier_key, material_key, order_date, amount) in rows {
        let date = NaiveDate::parse_from_str(&order_date, DATE_FMT)
            .map_err(|e| Error::Parse(format!("order_date {}: {}", order_date, e)))?;
        *counts
            .entry(duplicate_key(&supplier_key, &material_key, date, amount))
            .or_insert(0) += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{catalog, init_ingest_schema};
    use crate::models::{CatalogEntry, EntryAttributes, EntryType};

    async fn setup() -> (SqlitePool, Uuid, Uuid, Uuid) {
        let pool = prociq_common::db::init_memory_pool().await.unwrap();
        init_ingest_schema(&pool).await.unwrap();
        let org = Uuid::new_v4();

        let supplier = CatalogEntry::new(
            org,
            EntryType::Supplier,
            "Acme".to_string(),
            "acme".to_string(),
            EntryAttributes::default(),
        );
        let material = CatalogEntry::new(
            org,
            EntryType::Material,
            "Steel Bolt".to_string(),
            "steel bolt".to_string(),
            EntryAttributes::default(),
        );
        let mut conn = pool.acquire().await.unwrap();
        catalog::insert_entry(&mut conn, &supplier).await.unwrap();
        catalog::insert_entry(&mut conn, &material).await.unwrap();
        drop(conn);

        (pool, org, supplier.id, material.id)
    }

    fn line(org: Uuid, supplier: Uuid, material: Uuid, price: f64) -> PoLine {
        PoLine {
            id: Uuid::new_v4(),
            organization_id: org,
            staging_record_id: Uuid::new_v4(),
            supplier_id: supplier,
            material_id: material,
            quantity: 10.0,
            unit_price: price,
            total_price: Some(10.0 * price),
            currency: Some("EUR".to_string()),
            order_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            delivery_date: None,
            po_number: None,
        }
    }

    #[tokio::test]
    async fn test_price_history_by_material_key() {
        let (pool, org, supplier, material) = setup().await;

        let mut conn = pool.acquire().await.unwrap();
        for price in [2.5, 2.6] {
            let l = line(org, supplier, material, price);
            insert_po_line(&mut conn, &l).await.unwrap();
            insert_price_observation(
                &mut conn,
                &PriceObservation {
                    id: Uuid::new_v4(),
                    organization_id: org,
                    material_id: material,
                    supplier_id: supplier,
                    unit_price: price,
                    observed_date: l.order_date,
                    staging_record_id: l.staging_record_id,
                },
            )
            .await
            .unwrap();
        }
        drop(conn);

        let history = load_price_history(&pool, org).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|(key, _)| key == "steel bolt"));
    }

    #[tokio::test]
    async fn test_committed_line_keys_count_duplicates() {
        let (pool, org, supplier, material) = setup().await;

        let mut conn = pool.acquire().await.unwrap();
        insert_po_line(&mut conn, &line(org, supplier, material, 2.5))
            .await
            .unwrap();
        insert_po_line(&mut conn, &line(org, supplier, material, 2.5))
            .await
            .unwrap();
        drop(conn);

        let keys = load_committed_line_keys(&pool, org).await.unwrap();
        assert_eq!(keys.len(), 1);
        let count = keys.values().next().copied().unwrap();
        assert_eq!(count, 2);
    }
}
