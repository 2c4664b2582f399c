//! Per-batch bulk attribute snapshot
//!
//! Holds the control/audit attributes of the records in the current batch
//! only. Every [`AttributeCache::load`] starts from an empty cache, so nothing
//! read for one batch can leak into the next.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::domain::catalog::{AttributeValue, ProductAttributes, ProductId, attribute_keys};
use crate::domain::repositories::CatalogStore;

#[derive(Debug, Default)]
pub struct AttributeCache {
    snapshots: HashMap<ProductId, ProductAttributes>,
    chunk_size: usize,
    fallback_reads: usize,
}

impl AttributeCache {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            snapshots: HashMap::new(),
            chunk_size: chunk_size.max(1),
            fallback_reads: 0,
        }
    }

    /// Replace the cache contents with a fresh snapshot of `ids`
    pub async fn load(&mut self, store: &dyn CatalogStore, ids: &[ProductId]) {
        self.clear();

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<ProductId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let keys = attribute_keys::SNAPSHOT_KEYS;

        for chunk in unique.chunks(self.chunk_size) {
            match store.bulk_read_attributes(chunk, &keys).await {
                Ok(mut rows) => {
                    for id in chunk {
                        let mut attrs = ProductAttributes::with_defaults();
                        for (key, value) in rows.remove(id).unwrap_or_default() {
                            attrs.set(key, value);
                        }
                        self.snapshots.insert(*id, attrs);
                    }
                }
                Err(e) => {
                    warn!(
                        "⚠️ Bulk attribute read failed for {} records, falling back to per-record reads: {:#}",
                        chunk.len(),
                        e
                    );
                    for id in chunk {
                        let attrs = self.read_individually(store, *id).await;
                        self.snapshots.insert(*id, attrs);
                    }
                }
            }
        }
        debug!("Attribute snapshot loaded for {} records", self.snapshots.len());
    }

    async fn read_individually(&mut self, store: &dyn CatalogStore, id: ProductId) -> ProductAttributes {
        let mut attrs = ProductAttributes::with_defaults();
        for key in attribute_keys::SNAPSHOT_KEYS {
            self.fallback_reads += 1;
            match store.read_attribute(id, key).await {
                Ok(value) => attrs.set(key, value),
                Err(e) => {
                    warn!("Attribute {} unreadable for product {}: {:#}", key, id, e);
                    attrs.set(key, AttributeValue::Missing);
                }
            }
        }
        attrs
    }

    pub fn snapshot(&self, id: ProductId) -> Option<&ProductAttributes> {
        self.snapshots.get(&id)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Single-attribute reads issued by the degraded path so far
    pub const fn fallback_reads(&self) -> usize {
        self.fallback_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{LifecycleStatus, StockStatus};
    use crate::test_utils::{InstrumentedCatalogStore, TestContext};

    #[tokio::test]
    async fn missing_attributes_get_defaults() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let priced = ctx.seed_product("A", LifecycleStatus::Publish, Some("17.50")).await?;
        let bare = ctx.seed_product("B", LifecycleStatus::Publish, None).await?;

        let mut cache = AttributeCache::new(50);
        cache.load(ctx.catalog.as_ref(), &[priced, bare]).await;

        assert_eq!(cache.snapshot(priced).map(ProductAttributes::supplier_price), Some("17.50".into()));
        let bare_attrs = cache.snapshot(bare).expect("snapshot");
        assert_eq!(bare_attrs.supplier_price(), "");
        assert_eq!(bare_attrs.stock_status(), StockStatus::Unknown);
        for key in attribute_keys::SNAPSHOT_KEYS {
            assert!(bare_attrs.contains(key));
        }
        Ok(())
    }

    #[tokio::test]
    async fn ids_are_chunked_per_bulk_call() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let ids = ctx.seed_published(120, "1").await?;
        let store = ctx.instrumented();

        let mut cache = AttributeCache::new(50);
        cache.load(store.as_ref(), &ids).await;

        assert_eq!(cache.len(), 120);
        assert_eq!(InstrumentedCatalogStore::count(&store.bulk_attribute_reads), 3);
        Ok(())
    }

    #[tokio::test]
    async fn reload_discards_the_previous_batch() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let ids = ctx.seed_published(2, "1").await?;

        let mut cache = AttributeCache::new(50);
        cache.load(ctx.catalog.as_ref(), &ids[..1]).await;
        assert!(cache.snapshot(ids[0]).is_some());

        cache.load(ctx.catalog.as_ref(), &ids[1..]).await;
        assert!(cache.snapshot(ids[0]).is_none());
        assert!(cache.snapshot(ids[1]).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn bulk_failure_falls_back_to_single_reads() -> anyhow::Result<()> {
        let ctx = TestContext::new().await?;
        let id = ctx.seed_product("A", LifecycleStatus::Publish, Some("9.99")).await?;
        let store = ctx.instrumented();
        store.fail_bulk_attributes(true);

        let mut cache = AttributeCache::new(50);
        cache.load(store.as_ref(), &[id]).await;

        assert_eq!(cache.snapshot(id).map(ProductAttributes::supplier_price), Some("9.99".into()));
        assert_eq!(cache.fallback_reads(), attribute_keys::SNAPSHOT_KEYS.len());
        assert_eq!(
            InstrumentedCatalogStore::count(&store.single_attribute_reads),
            attribute_keys::SNAPSHOT_KEYS.len()
        );
        Ok(())
    }
}
