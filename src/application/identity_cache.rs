//! External identifier → internal identifier index
//!
//! Built once per logical run and then only read. A failed build degrades to
//! an empty index: every lookup misses and records surface as "not found".

use std::collections::HashMap;
use tracing::{info, warn};

use crate::domain::catalog::ProductId;
use crate::domain::repositories::CatalogStore;

#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    index: HashMap<String, ProductId>,
    degraded: bool,
    truncated: bool,
}

impl IdentityCache {
    /// Load every record with a non-empty external id, up to `cap` entries
    pub async fn build(store: &dyn CatalogStore, cap: usize) -> Self {
        let started = std::time::Instant::now();
        // One extra entry tells a full index apart from a truncated one
        match store.load_identity_index(cap.saturating_add(1)).await {
            Ok(mut index) => {
                let truncated = index.len() > cap;
                if truncated {
                    if let Some(last) = index.iter().max_by_key(|(_, id)| **id).map(|(sku, _)| sku.clone()) {
                        index.remove(&last);
                    }
                    warn!(
                        "⚠️ Identity cache reached its cap of {} entries; records beyond it will be reported as not found",
                        cap
                    );
                }
                info!(
                    "🗂️ Identity cache built: {} entries in {:.2}s",
                    index.len(),
                    started.elapsed().as_secs_f64()
                );
                Self {
                    index,
                    degraded: false,
                    truncated,
                }
            }
            Err(e) => {
                warn!("⚠️ Identity cache build failed, continuing with an empty cache: {:#}", e);
                Self {
                    index: HashMap::new(),
                    degraded: true,
                    truncated: false,
                }
            }
        }
    }

    pub fn from_index(index: HashMap<String, ProductId>) -> Self {
        Self {
            index,
            degraded: false,
            truncated: false,
        }
    }

    /// Lookup by external id; surrounding whitespace is ignored
    pub fn resolve(&self, external_id: &str) -> Option<ProductId> {
        self.index.get(external_id.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The build failed and every lookup will miss
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The cap was hit while loading
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }
}
