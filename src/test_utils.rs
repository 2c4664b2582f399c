//! Test utilities for the sync engine
//!
//! Provides an isolated in-memory database, catalog seeding helpers, feed
//! fixtures and an instrumented store wrapper that counts calls and injects
//! failures.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::catalog::{
    Actor, AttributeValue, CatalogRecord, LifecycleStatus, ProductId, attribute_keys,
};
use crate::domain::repositories::{AttributeMap, CatalogStore};
use crate::infrastructure::{DatabaseConnection, SqliteCatalogStore, SqliteSyncLogStore};

/// Actor seeded into every test context
pub const TEST_ACTOR_ID: i64 = 390;

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// Create a new in-memory test database
    ///
    /// Each test gets a fresh, clean database state.
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    /// Get the database pool for use in repositories
    pub fn pool(&self) -> sqlx::Pool<sqlx::Sqlite> {
        self.connection.pool().clone()
    }
}

/// Complete test context with both stores and a seeded actor
pub struct TestContext {
    pub database: TestDatabase,
    pub catalog: Arc<SqliteCatalogStore>,
    pub sync_log: Arc<SqliteSyncLogStore>,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        let database = TestDatabase::new().await?;
        let pool = database.pool();

        let catalog = Arc::new(SqliteCatalogStore::new(pool.clone()));
        let sync_log = Arc::new(SqliteSyncLogStore::new(pool));
        catalog.create_actor(TEST_ACTOR_ID, "feed-bot").await?;

        Ok(Self {
            database,
            catalog,
            sync_log,
        })
    }

    /// Seed a product carrying an external id and optionally a stored price
    pub async fn seed_product(
        &self,
        sku: &str,
        status: LifecycleStatus,
        stored_price: Option<&str>,
    ) -> Result<ProductId> {
        let id = self.catalog.create_product(sku, &status, Some(sku)).await?;
        if let Some(price) = stored_price {
            self.catalog
                .set_attribute(id, attribute_keys::SUPPLIER_PRICE, &AttributeValue::Text(price.to_string()))
                .await?;
        }
        Ok(id)
    }

    /// Seed `count` published products `SKU-0..` all priced at `price`
    pub async fn seed_published(&self, count: usize, price: &str) -> Result<Vec<ProductId>> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            ids.push(
                self.seed_product(&format!("SKU-{i}"), LifecycleStatus::Publish, Some(price))
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Wrap the catalog in a call-counting, failure-injecting store
    pub fn instrumented(&self) -> Arc<InstrumentedCatalogStore> {
        Arc::new(InstrumentedCatalogStore::new(self.catalog.clone()))
    }
}

/// Feed document for `(external id, price)` pairs; `None` omits the price
pub fn feed_xml(records: &[(&str, Option<&str>)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<products>\n");
    for (sku, price) in records {
        let _ = write!(xml, "  <product><SKU>{sku}</SKU>");
        if let Some(price) = price {
            let _ = write!(xml, "<supplier_price>{price}</supplier_price>");
        }
        xml.push_str("</product>\n");
    }
    xml.push_str("</products>\n");
    xml
}

/// Feed of `SKU-0..count` all priced at `price`
pub fn uniform_feed_xml(count: usize, price: &str) -> String {
    let skus: Vec<String> = (0..count).map(|i| format!("SKU-{i}")).collect();
    let records: Vec<(&str, Option<&str>)> = skus.iter().map(|s| (s.as_str(), Some(price))).collect();
    feed_xml(&records)
}

pub fn write_feed(path: &Path, xml: &str) -> Result<()> {
    std::fs::write(path, xml)?;
    Ok(())
}

/// Catalog store wrapper for observing and sabotaging engine calls
pub struct InstrumentedCatalogStore {
    inner: Arc<SqliteCatalogStore>,
    pub identity_loads: AtomicUsize,
    pub bulk_attribute_reads: AtomicUsize,
    pub single_attribute_reads: AtomicUsize,
    pub saves: AtomicUsize,
    fail_identity: AtomicBool,
    fail_bulk_attributes: AtomicBool,
    fail_find_records: AtomicBool,
    fail_save_for: Mutex<HashSet<ProductId>>,
}

impl InstrumentedCatalogStore {
    pub fn new(inner: Arc<SqliteCatalogStore>) -> Self {
        Self {
            inner,
            identity_loads: AtomicUsize::new(0),
            bulk_attribute_reads: AtomicUsize::new(0),
            single_attribute_reads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            fail_identity: AtomicBool::new(false),
            fail_bulk_attributes: AtomicBool::new(false),
            fail_find_records: AtomicBool::new(false),
            fail_save_for: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_identity_load(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bulk_attributes(&self, fail: bool) {
        self.fail_bulk_attributes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_find_records(&self, fail: bool) {
        self.fail_find_records.store(fail, Ordering::SeqCst);
    }

    pub fn fail_save_for(&self, id: ProductId) {
        if let Ok(mut ids) = self.fail_save_for.lock() {
            ids.insert(id);
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for InstrumentedCatalogStore {
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ProductId>> {
        self.inner.find_by_external_id(external_id).await
    }

    async fn load_identity_index(&self, cap: usize) -> Result<HashMap<String, ProductId>> {
        self.identity_loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_identity.load(Ordering::SeqCst) {
            anyhow::bail!("identity index unavailable");
        }
        self.inner.load_identity_index(cap).await
    }

    async fn find_record(&self, id: ProductId) -> Result<Option<CatalogRecord>> {
        self.inner.find_record(id).await
    }

    async fn find_records(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, CatalogRecord>> {
        if self.fail_find_records.load(Ordering::SeqCst) {
            anyhow::bail!("bulk record read unavailable");
        }
        self.inner.find_records(ids).await
    }

    async fn save(&self, record: &CatalogRecord) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let sabotaged = self
            .fail_save_for
            .lock()
            .map(|ids| ids.contains(&record.id))
            .unwrap_or(false);
        if sabotaged {
            anyhow::bail!("save rejected for product {}", record.id);
        }
        self.inner.save(record).await
    }

    async fn count_by_status(&self, status: &LifecycleStatus) -> Result<u64> {
        self.inner.count_by_status(status).await
    }

    async fn bulk_read_attributes(&self, ids: &[ProductId], keys: &[&str]) -> Result<AttributeMap> {
        self.bulk_attribute_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_bulk_attributes.load(Ordering::SeqCst) {
            anyhow::bail!("bulk attribute read unavailable");
        }
        self.inner.bulk_read_attributes(ids, keys).await
    }

    async fn read_attribute(&self, id: ProductId, key: &str) -> Result<AttributeValue> {
        self.single_attribute_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_attribute(id, key).await
    }

    async fn find_actor(&self, id: i64) -> Result<Option<Actor>> {
        self.inner.find_actor(id).await
    }

    async fn clear_derived_caches(&self) -> Result<u64> {
        self.inner.clear_derived_caches().await
    }
}

/// Helper macros for common test patterns
#[macro_export]
macro_rules! test_context {
    () => {{
        $crate::test_utils::TestContext::new()
            .await
            .expect("Failed to create test context")
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_creation() -> Result<()> {
        let ctx = TestContext::new().await?;
        assert!(!ctx.database.pool().is_closed());
        assert!(ctx.catalog.find_actor(TEST_ACTOR_ID).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_databases_are_isolated() -> Result<()> {
        let first = TestContext::new().await?;
        let second = TestContext::new().await?;
        first.seed_product("SKU-1", LifecycleStatus::Publish, None).await?;

        assert_eq!(first.catalog.count_by_status(&LifecycleStatus::Publish).await?, 1);
        assert_eq!(second.catalog.count_by_status(&LifecycleStatus::Publish).await?, 0);
        Ok(())
    }

    #[test]
    fn feed_fixture_omits_missing_prices() {
        let xml = feed_xml(&[("A", Some("1.5")), ("B", None)]);
        assert!(xml.contains("<SKU>A</SKU><supplier_price>1.5</supplier_price>"));
        assert!(xml.contains("<SKU>B</SKU></product>"));
    }
}
