//! Per-record sync decision
//!
//! Pure classification of one feed record against the pre-batch snapshot of
//! its catalog counterpart. Nothing here touches a store; the orchestrator
//! feeds in the resolved state and acts on the returned [`RecordOutcome`].

use crate::domain::catalog::{
    BackorderPolicy, CatalogRecord, LifecycleStatus, ProductAttributes, ProductId, StockStatus,
};
use crate::domain::feed_record::FeedRecord;
use crate::domain::lock_policy::{LockPolicy, LockReason, LockState};
use serde::{Deserialize, Serialize};

/// Audit field names written to product history
pub mod fields {
    pub const SUPPLIER_PRICE: &str = "fs_supplier_price";
    pub const MANAGE_STOCK: &str = "manage_stock";
    pub const BACKORDERS: &str = "backorders";
    pub const STOCK_STATUS: &str = "stock_status";
    pub const POST_STATUS: &str = "post_status";
    pub const PRODUCT_LOCKED: &str = "product_locked";
}

/// One observed field change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
}

impl FieldChange {
    pub fn new(field: &str, old_value: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

/// Mutation queued between the decision pass and the commit pass of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub product_id: ProductId,
    pub external_id: String,
    pub new_price: f64,
    pub new_status: Option<LifecycleStatus>,
    pub audit: Vec<FieldChange>,
}

impl PendingChange {
    /// Apply the backorder-mode post-sync state to a freshly read record
    pub fn apply_to(&self, record: &mut CatalogRecord) {
        if let Some(status) = &self.new_status {
            record.status = status.clone();
        }
        record.supplier_price = Some(format_price(self.new_price));
        record.manage_stock = false;
        record.backorders = BackorderPolicy::Yes;
        record.stock_status = StockStatus::OnBackorder;
    }

    #[must_use]
    pub const fn publishes(&self) -> bool {
        self.new_status.is_some()
    }
}

/// Classification of a single feed record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// External identifier was empty
    SkippedEmpty,
    /// Price field missing or not numeric
    SkippedInvalidPrice,
    NotFound,
    /// Identity resolved but the record itself could not be read
    MissingRecord { product_id: ProductId },
    SkippedInStock { product_id: ProductId },
    /// `attempted_price` is `None` when the feed price was unusable
    Locked {
        product_id: ProductId,
        reason: LockReason,
        attempted_price: Option<f64>,
    },
    Unchanged { product_id: ProductId, price: f64 },
    Update(PendingChange),
}

/// Resolved catalog state for a feed record
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub product_id: ProductId,
    pub record: Option<&'a CatalogRecord>,
    pub attributes: &'a ProductAttributes,
}

/// Knobs that change how records are classified
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub ignore_in_stock: bool,
    /// Zero means exact floating-point comparison
    pub price_tolerance: f64,
    pub locks: LockPolicy,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            ignore_in_stock: false,
            price_tolerance: 0.0,
            locks: LockPolicy::default(),
        }
    }
}

impl DecisionPolicy {
    pub fn decide(&self, feed: &FeedRecord, candidate: Option<Candidate<'_>>) -> RecordOutcome {
        if feed.trimmed_id().is_empty() {
            return RecordOutcome::SkippedEmpty;
        }
        let Some(candidate) = candidate else {
            return RecordOutcome::NotFound;
        };
        let product_id = candidate.product_id;
        let Some(record) = candidate.record else {
            return RecordOutcome::MissingRecord { product_id };
        };

        if self.ignore_in_stock && candidate.attributes.stock_status() == StockStatus::InStock {
            return RecordOutcome::SkippedInStock { product_id };
        }

        if let LockState::Locked(reason) = self.locks.evaluate(candidate.attributes) {
            return RecordOutcome::Locked {
                product_id,
                reason,
                attempted_price: feed.supplier_price,
            };
        }

        let Some(new_price) = feed.supplier_price else {
            return RecordOutcome::SkippedInvalidPrice;
        };

        let current_price = candidate.attributes.supplier_price();
        let price_changed = self.price_changed(&current_price, new_price);
        let needs_publication = needs_publication(&record.status);

        if !price_changed && !needs_publication {
            return RecordOutcome::Unchanged {
                product_id,
                price: new_price,
            };
        }

        RecordOutcome::Update(build_change(
            feed.trimmed_id(),
            record,
            &current_price,
            new_price,
            price_changed,
        ))
    }

    /// An empty or unparsable stored price always counts as changed
    #[allow(clippy::float_cmp)]
    pub fn price_changed(&self, current: &str, new_price: f64) -> bool {
        let Ok(current) = current.trim().parse::<f64>() else {
            return true;
        };
        if self.price_tolerance > 0.0 {
            (current - new_price).abs() > self.price_tolerance
        } else {
            current != new_price
        }
    }
}

/// Lifecycle states the sync corrects to published regardless of price drift
pub const fn needs_publication(status: &LifecycleStatus) -> bool {
    matches!(status, LifecycleStatus::Draft | LifecycleStatus::Pending)
}

fn build_change(
    external_id: &str,
    record: &CatalogRecord,
    current_price: &str,
    new_price: f64,
    price_changed: bool,
) -> PendingChange {
    let mut audit = Vec::new();

    if price_changed {
        audit.push(FieldChange::new(
            fields::SUPPLIER_PRICE,
            current_price,
            format_price(new_price),
        ));
    }
    if record.manage_stock {
        audit.push(FieldChange::new(fields::MANAGE_STOCK, "yes", "no"));
    }
    if record.backorders != BackorderPolicy::Yes {
        audit.push(FieldChange::new(
            fields::BACKORDERS,
            record.backorders.as_str(),
            BackorderPolicy::Yes.as_str(),
        ));
    }
    if record.stock_status != StockStatus::OnBackorder {
        audit.push(FieldChange::new(
            fields::STOCK_STATUS,
            record.stock_status.as_str(),
            StockStatus::OnBackorder.as_str(),
        ));
    }

    let new_status = needs_publication(&record.status).then_some(LifecycleStatus::Publish);
    if new_status.is_some() {
        audit.push(FieldChange::new(
            fields::POST_STATUS,
            record.status.as_str(),
            LifecycleStatus::Publish.as_str(),
        ));
    }

    PendingChange {
        product_id: record.id,
        external_id: external_id.to_string(),
        new_price,
        new_status,
        audit,
    }
}

/// Store encoding of a price: shortest decimal form, no trailing zeros
pub fn format_price(price: f64) -> String {
    price.to_string()
}

/// Audit text for a price that may be absent; empty when there is none
pub fn format_attempted_price(price: Option<f64>) -> String {
    price.map(format_price).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{attribute_keys, AttributeValue};

    fn record(status: LifecycleStatus) -> CatalogRecord {
        CatalogRecord {
            id: 7,
            external_id: Some("SKU-1".into()),
            name: "Widget".into(),
            status,
            stock_status: StockStatus::OnBackorder,
            manage_stock: false,
            backorders: BackorderPolicy::Yes,
            supplier_price: Some("17.50".into()),
        }
    }

    fn attrs_with_price(price: &str) -> ProductAttributes {
        let mut attrs = ProductAttributes::with_defaults();
        attrs.set(attribute_keys::SUPPLIER_PRICE, AttributeValue::Text(price.into()));
        attrs
    }

    fn candidate<'a>(rec: &'a CatalogRecord, attrs: &'a ProductAttributes) -> Option<Candidate<'a>> {
        Some(Candidate {
            product_id: rec.id,
            record: Some(rec),
            attributes: attrs,
        })
    }

    #[test]
    fn price_drift_produces_update_with_price_audit() {
        let rec = record(LifecycleStatus::Publish);
        let attrs = attrs_with_price("17.50");
        let feed = FeedRecord::new(0, "SKU-1", Some(19.99));

        let RecordOutcome::Update(change) = DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)) else {
            panic!("expected update");
        };
        assert_eq!(change.new_price, 19.99);
        assert_eq!(change.new_status, None);
        assert_eq!(
            change.audit,
            vec![FieldChange::new(fields::SUPPLIER_PRICE, "17.50", "19.99")]
        );
    }

    #[test]
    fn identical_price_on_published_record_is_unchanged() {
        let rec = record(LifecycleStatus::Publish);
        let attrs = attrs_with_price("19.99");
        let feed = FeedRecord::new(0, "SKU-1", Some(19.99));

        assert_eq!(
            DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)),
            RecordOutcome::Unchanged { product_id: 7, price: 19.99 }
        );
    }

    #[test]
    fn draft_is_published_even_when_price_matches() {
        let rec = record(LifecycleStatus::Draft);
        let attrs = attrs_with_price("19.99");
        let feed = FeedRecord::new(0, "SKU-1", Some(19.99));

        let RecordOutcome::Update(change) = DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)) else {
            panic!("expected update");
        };
        assert_eq!(change.new_status, Some(LifecycleStatus::Publish));
        assert_eq!(
            change.audit,
            vec![FieldChange::new(fields::POST_STATUS, "draft", "publish")]
        );
    }

    #[test]
    fn private_record_with_same_price_is_left_alone() {
        let rec = record(LifecycleStatus::Private);
        let attrs = attrs_with_price("5");
        let feed = FeedRecord::new(0, "SKU-1", Some(5.0));
        assert!(matches!(
            DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)),
            RecordOutcome::Unchanged { .. }
        ));
    }

    #[test]
    fn lock_wins_over_any_price_delta() {
        let rec = record(LifecycleStatus::Draft);
        let mut attrs = attrs_with_price("1");
        attrs.set(attribute_keys::BLOCK_XML_UPDATE, AttributeValue::Bool(true));
        let feed = FeedRecord::new(0, "SKU-1", Some(99_999.0));

        let outcome = DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs));
        let RecordOutcome::Locked { attempted_price, reason, .. } = outcome else {
            panic!("expected lock");
        };
        assert_eq!(attempted_price, Some(99_999.0));
        assert_eq!(reason.label, "XML Update Block");
    }

    #[test]
    fn lock_is_reported_even_without_a_usable_feed_price() {
        let rec = record(LifecycleStatus::Publish);
        let mut attrs = attrs_with_price("17.50");
        attrs.set(attribute_keys::BLOCK_XML_UPDATE, AttributeValue::Int(1));
        let feed = FeedRecord::new(0, "SKU-1", None);

        let outcome = DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs));
        let RecordOutcome::Locked { attempted_price, .. } = outcome else {
            panic!("expected lock, got {outcome:?}");
        };
        assert_eq!(attempted_price, None);
        assert_eq!(format_attempted_price(attempted_price), "");
    }

    #[test]
    fn unlocked_record_without_price_is_skipped() {
        let rec = record(LifecycleStatus::Draft);
        let attrs = attrs_with_price("17.50");
        let feed = FeedRecord::new(0, "SKU-1", None);
        assert_eq!(
            DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)),
            RecordOutcome::SkippedInvalidPrice
        );
    }

    #[test]
    fn in_stock_records_skip_only_when_configured() {
        let rec = record(LifecycleStatus::Publish);
        let mut attrs = attrs_with_price("1");
        attrs.set(attribute_keys::STOCK_STATUS, AttributeValue::Text("instock".into()));
        let feed = FeedRecord::new(0, "SKU-1", Some(2.0));

        let ignoring = DecisionPolicy {
            ignore_in_stock: true,
            ..DecisionPolicy::default()
        };
        assert_eq!(
            ignoring.decide(&feed, candidate(&rec, &attrs)),
            RecordOutcome::SkippedInStock { product_id: 7 }
        );
        assert!(matches!(
            DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)),
            RecordOutcome::Update(_)
        ));
    }

    #[test]
    fn empty_id_and_unknown_sku_are_classified_before_price() {
        let policy = DecisionPolicy::default();
        assert_eq!(
            policy.decide(&FeedRecord::new(0, "  ", None), None),
            RecordOutcome::SkippedEmpty
        );
        assert_eq!(
            policy.decide(&FeedRecord::new(0, "SKU-2", None), None),
            RecordOutcome::NotFound
        );
        assert_eq!(
            policy.decide(&FeedRecord::new(0, "SKU-2", Some(1.0)), None),
            RecordOutcome::NotFound
        );
    }

    #[test]
    fn exact_comparison_sees_representation_noise() {
        let policy = DecisionPolicy::default();
        let sum = 0.1 + 0.2;
        assert!(policy.price_changed("0.3", sum));
        assert!(!policy.price_changed("0.3", 0.3));
        assert!(policy.price_changed("", 0.3));
        assert!(policy.price_changed("abc", 0.3));
    }

    #[test]
    fn tolerance_absorbs_representation_noise() {
        let policy = DecisionPolicy {
            price_tolerance: 0.005,
            ..DecisionPolicy::default()
        };
        assert!(!policy.price_changed("0.3", 0.1 + 0.2));
        assert!(policy.price_changed("0.30", 0.31));
    }

    #[test]
    fn backorder_state_is_forced_and_audited() {
        let mut rec = record(LifecycleStatus::Publish);
        rec.manage_stock = true;
        rec.backorders = BackorderPolicy::No;
        rec.stock_status = StockStatus::InStock;
        let attrs = attrs_with_price("10");
        let feed = FeedRecord::new(0, "SKU-1", Some(12.0));

        let RecordOutcome::Update(change) = DecisionPolicy::default().decide(&feed, candidate(&rec, &attrs)) else {
            panic!("expected update");
        };
        let changed: Vec<&str> = change.audit.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(
            changed,
            vec![fields::SUPPLIER_PRICE, fields::MANAGE_STOCK, fields::BACKORDERS, fields::STOCK_STATUS]
        );

        change.apply_to(&mut rec);
        assert!(!rec.manage_stock);
        assert_eq!(rec.backorders, BackorderPolicy::Yes);
        assert_eq!(rec.stock_status, StockStatus::OnBackorder);
        assert_eq!(rec.supplier_price.as_deref(), Some("12"));
    }
}
