//! SQLite implementation of the catalog store
//!
//! Products live in `products`; the external identifier, supplier price, lock
//! flags and mirrored stock status live in the key/value `product_meta` table.
//! Meta values are untyped so that flags keep the encoding they were written
//! with (integer `1`, text `"yes"`, ...).

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::catalog::{
    Actor, AttributeValue, BackorderPolicy, CatalogRecord, LifecycleStatus, ProductId, StockStatus,
    attribute_keys,
};
use crate::domain::repositories::{AttributeMap, CatalogStore};

const RECORD_COLUMNS: &str = r"
    p.id, p.name, p.status, p.stock_status, p.manage_stock, p.backorders,
    (SELECT CAST(meta_value AS TEXT) FROM product_meta
        WHERE product_id = p.id AND meta_key = 'supplier_sku') AS external_id,
    (SELECT CAST(meta_value AS TEXT) FROM product_meta
        WHERE product_id = p.id AND meta_key = 'fs_supplier_price') AS supplier_price
";

#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: Arc<SqlitePool>,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    // ===============================
    // SEEDING / ADMINISTRATION
    // ===============================

    /// Insert a product with an optional external identifier
    pub async fn create_product(
        &self,
        name: &str,
        status: &LifecycleStatus,
        external_id: Option<&str>,
    ) -> Result<ProductId> {
        let result = sqlx::query("INSERT INTO products (name, status) VALUES (?, ?)")
            .bind(name)
            .bind(status.as_str())
            .execute(&*self.pool)
            .await?;
        let id = result.last_insert_rowid();

        if let Some(sku) = external_id {
            self.set_attribute(id, attribute_keys::SUPPLIER_SKU, &AttributeValue::Text(sku.to_string()))
                .await?;
        }
        Ok(id)
    }

    /// Write (or with `Missing`, remove) one attribute value
    pub async fn set_attribute(&self, id: ProductId, key: &str, value: &AttributeValue) -> Result<()> {
        let upsert = r"
            INSERT INTO product_meta (product_id, meta_key, meta_value) VALUES (?, ?, ?)
            ON CONFLICT (product_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
        ";
        let query = match value {
            AttributeValue::Missing => {
                sqlx::query("DELETE FROM product_meta WHERE product_id = ? AND meta_key = ?")
                    .bind(id)
                    .bind(key)
                    .execute(&*self.pool)
                    .await?;
                return Ok(());
            }
            AttributeValue::Bool(b) => sqlx::query(upsert).bind(id).bind(key).bind(i64::from(*b)),
            AttributeValue::Int(i) => sqlx::query(upsert).bind(id).bind(key).bind(*i),
            AttributeValue::Text(s) => sqlx::query(upsert).bind(id).bind(key).bind(s.clone()),
        };
        query.execute(&*self.pool).await?;
        Ok(())
    }

    pub async fn create_actor(&self, id: i64, login: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO actors (id, login) VALUES (?, ?)")
            .bind(id)
            .bind(login)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    /// Cache an arbitrary derived value (price widgets, feeds, ...)
    pub async fn put_derived_cache(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO catalog_transients (cache_key, cache_value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    fn map_record(row: &SqliteRow) -> Result<CatalogRecord> {
        let status: String = row.try_get("status")?;
        let stock_status: String = row.try_get("stock_status")?;
        let backorders: String = row.try_get("backorders")?;
        let external_id: Option<String> = row.try_get("external_id")?;

        Ok(CatalogRecord {
            id: row.try_get("id")?,
            external_id: external_id.filter(|s| !s.trim().is_empty()),
            name: row.try_get("name")?,
            status: LifecycleStatus::parse(&status),
            stock_status: StockStatus::parse(&stock_status),
            manage_stock: row.try_get::<i64, _>("manage_stock")? != 0,
            backorders: BackorderPolicy::parse(&backorders),
            supplier_price: row.try_get("supplier_price")?,
        })
    }

    async fn upsert_text_attribute(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: ProductId,
        key: &str,
        value: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO product_meta (product_id, meta_key, meta_value) VALUES (?, ?, ?)
            ON CONFLICT (product_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
            ",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// `?, ?, ?` for an IN list
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Rebuild a raw attribute from SQLite's storage class
fn decode_attribute(kind: &str, value: Option<String>) -> AttributeValue {
    match (kind, value) {
        (_, None) | ("null", _) => AttributeValue::Missing,
        ("integer", Some(v)) => v.parse().map_or(AttributeValue::Text(v), AttributeValue::Int),
        (_, Some(v)) => AttributeValue::Text(v),
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ProductId>> {
        let id = sqlx::query_scalar::<_, i64>(
            r"
            SELECT product_id FROM product_meta
            WHERE meta_key = ? AND TRIM(CAST(meta_value AS TEXT)) = ?
            ORDER BY product_id DESC LIMIT 1
            ",
        )
        .bind(attribute_keys::SUPPLIER_SKU)
        .bind(external_id.trim())
        .fetch_optional(&*self.pool)
        .await?;
        Ok(id)
    }

    async fn load_identity_index(&self, cap: usize) -> Result<HashMap<String, ProductId>> {
        let limit = i64::try_from(cap).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT TRIM(CAST(meta_value AS TEXT)) AS sku, MAX(product_id) AS product_id
            FROM product_meta
            WHERE meta_key = ? AND meta_value IS NOT NULL AND TRIM(CAST(meta_value AS TEXT)) != ''
            GROUP BY sku
            ORDER BY product_id
            LIMIT ?
            ",
        )
        .bind(attribute_keys::SUPPLIER_SKU)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .context("Failed to load identity index")?;

        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            let sku: String = row.try_get("sku")?;
            let id: i64 = row.try_get("product_id")?;
            index.insert(sku, id);
        }
        Ok(index)
    }

    async fn find_record(&self, id: ProductId) -> Result<Option<CatalogRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM products p WHERE p.id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&*self.pool).await?;
        row.as_ref().map(Self::map_record).transpose()
    }

    async fn find_records(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, CatalogRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM products p WHERE p.id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&*self.pool).await?;

        rows.iter()
            .map(|row| Self::map_record(row).map(|r| (r.id, r)))
            .collect()
    }

    async fn save(&self, record: &CatalogRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE products
            SET name = ?, status = ?, stock_status = ?, manage_stock = ?, backorders = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(record.stock_status.as_str())
        .bind(i64::from(record.manage_stock))
        .bind(record.backorders.as_str())
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Product {} no longer exists", record.id);
        }

        if let Some(price) = &record.supplier_price {
            Self::upsert_text_attribute(&mut tx, record.id, attribute_keys::SUPPLIER_PRICE, price).await?;
        }
        Self::upsert_text_attribute(
            &mut tx,
            record.id,
            attribute_keys::STOCK_STATUS,
            record.stock_status.as_str(),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_by_status(&self, status: &LifecycleStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&*self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn bulk_read_attributes(&self, ids: &[ProductId], keys: &[&str]) -> Result<AttributeMap> {
        if ids.is_empty() || keys.is_empty() {
            return Ok(AttributeMap::new());
        }
        let sql = format!(
            r"
            SELECT product_id, meta_key, typeof(meta_value) AS kind, CAST(meta_value AS TEXT) AS value
            FROM product_meta
            WHERE product_id IN ({}) AND meta_key IN ({})
            ",
            placeholders(ids.len()),
            placeholders(keys.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        for key in keys {
            query = query.bind(*key);
        }
        let rows = query.fetch_all(&*self.pool).await?;

        let mut map = AttributeMap::new();
        for row in rows {
            let id: i64 = row.try_get("product_id")?;
            let key: String = row.try_get("meta_key")?;
            let kind: String = row.try_get("kind")?;
            let value: Option<String> = row.try_get("value")?;
            map.entry(id).or_default().insert(key, decode_attribute(&kind, value));
        }
        Ok(map)
    }

    async fn read_attribute(&self, id: ProductId, key: &str) -> Result<AttributeValue> {
        let row = sqlx::query(
            r"
            SELECT typeof(meta_value) AS kind, CAST(meta_value AS TEXT) AS value
            FROM product_meta WHERE product_id = ? AND meta_key = ?
            ",
        )
        .bind(id)
        .bind(key)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => {
                let kind: String = row.try_get("kind")?;
                Ok(decode_attribute(&kind, row.try_get("value")?))
            }
            None => Ok(AttributeValue::Missing),
        }
    }

    async fn find_actor(&self, id: i64) -> Result<Option<Actor>> {
        let row = sqlx::query("SELECT id, login FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|r| {
            Ok(Actor {
                id: r.try_get("id")?,
                login: r.try_get("login")?,
            })
        })
        .transpose()
    }

    async fn clear_derived_caches(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM catalog_transients")
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::DatabaseConnection;

    async fn store() -> Result<SqliteCatalogStore> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(SqliteCatalogStore::new(db.pool().clone()))
    }

    #[tokio::test]
    async fn identity_index_skips_blank_ids_and_respects_cap() -> Result<()> {
        let store = store().await?;
        let a = store.create_product("A", &LifecycleStatus::Publish, Some("SKU-A")).await?;
        store.create_product("B", &LifecycleStatus::Publish, Some("  ")).await?;
        store.create_product("C", &LifecycleStatus::Publish, None).await?;
        store.create_product("D", &LifecycleStatus::Draft, Some("SKU-D")).await?;

        let index = store.load_identity_index(100).await?;
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("SKU-A"), Some(&a));

        let capped = store.load_identity_index(1).await?;
        assert_eq!(capped.len(), 1);
        assert_eq!(capped.get("SKU-A"), Some(&a));

        assert_eq!(store.find_by_external_id(" SKU-A ").await?, Some(a));
        assert_eq!(store.find_by_external_id("nope").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_external_ids_resolve_to_the_newest_product() -> Result<()> {
        let store = store().await?;
        store.create_product("Old", &LifecycleStatus::Publish, Some("SKU-A")).await?;
        let newer = store.create_product("New", &LifecycleStatus::Publish, Some(" SKU-A")).await?;
        let other = store.create_product("B", &LifecycleStatus::Publish, Some("SKU-B")).await?;

        let index = store.load_identity_index(2).await?;
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("SKU-A"), Some(&newer));
        assert_eq!(index.get("SKU-B"), Some(&other));
        assert_eq!(store.find_by_external_id("SKU-A").await?, Some(newer));
        Ok(())
    }

    #[tokio::test]
    async fn attributes_keep_their_storage_encoding() -> Result<()> {
        let store = store().await?;
        let id = store.create_product("A", &LifecycleStatus::Publish, Some("SKU-A")).await?;
        store.set_attribute(id, attribute_keys::BLOCK_XML_UPDATE, &AttributeValue::Int(1)).await?;
        store
            .set_attribute(id, attribute_keys::BLOCK_CUSTOM_UPDATE, &AttributeValue::Text("yes".into()))
            .await?;

        let map = store
            .bulk_read_attributes(&[id, 999], &attribute_keys::SNAPSHOT_KEYS)
            .await?;
        let attrs = &map[&id];
        assert_eq!(attrs[attribute_keys::BLOCK_XML_UPDATE], AttributeValue::Int(1));
        assert_eq!(attrs[attribute_keys::BLOCK_CUSTOM_UPDATE], AttributeValue::Text("yes".into()));
        assert!(!attrs.contains_key(attribute_keys::SUPPLIER_PRICE));
        assert!(!map.contains_key(&999));

        assert_eq!(
            store.read_attribute(id, attribute_keys::BLOCK_XML_UPDATE).await?,
            AttributeValue::Int(1)
        );
        assert_eq!(
            store.read_attribute(id, attribute_keys::SUPPLIER_PRICE).await?,
            AttributeValue::Missing
        );
        Ok(())
    }

    #[tokio::test]
    async fn save_persists_fields_and_mirrors_stock_status() -> Result<()> {
        let store = store().await?;
        let id = store.create_product("A", &LifecycleStatus::Draft, Some("SKU-A")).await?;

        let mut record = store.find_record(id).await?.context("record")?;
        assert_eq!(record.external_id.as_deref(), Some("SKU-A"));
        record.status = LifecycleStatus::Publish;
        record.stock_status = StockStatus::OnBackorder;
        record.backorders = BackorderPolicy::Yes;
        record.supplier_price = Some("19.99".into());
        store.save(&record).await?;

        let reloaded = store.find_records(&[id]).await?;
        assert_eq!(reloaded[&id], record);
        assert_eq!(
            store.read_attribute(id, attribute_keys::STOCK_STATUS).await?,
            AttributeValue::Text("onbackorder".into())
        );
        assert_eq!(store.count_by_status(&LifecycleStatus::Publish).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn saving_a_vanished_record_fails() -> Result<()> {
        let store = store().await?;
        let mut record = CatalogRecord {
            id: 42,
            external_id: None,
            name: "ghost".into(),
            status: LifecycleStatus::Publish,
            stock_status: StockStatus::InStock,
            manage_stock: false,
            backorders: BackorderPolicy::No,
            supplier_price: None,
        };
        assert!(store.save(&record).await.is_err());
        record.id = store.create_product("real", &LifecycleStatus::Publish, None).await?;
        assert!(store.save(&record).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn derived_caches_are_cleared() -> Result<()> {
        let store = store().await?;
        store.put_derived_cache("price_widget_1", "<html>").await?;
        store.put_derived_cache("price_widget_2", "<html>").await?;
        assert_eq!(store.clear_derived_caches().await?, 2);
        assert_eq!(store.clear_derived_caches().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn actors_are_resolved_by_id() -> Result<()> {
        let store = store().await?;
        store.create_actor(390, "feed-bot").await?;
        assert_eq!(store.find_actor(390).await?.map(|a| a.login), Some("feed-bot".into()));
        assert!(store.find_actor(1).await?.is_none());
        Ok(())
    }
}
