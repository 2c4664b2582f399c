//! Catalog entities as seen by the sync engine
//!
//! The catalog store owns these records; the engine only reads them and hands
//! mutated copies back through [`CatalogStore::save`](crate::domain::repositories::CatalogStore::save).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Internal catalog identifier
pub type ProductId = i64;

/// Attribute keys the engine reads in bulk for every batch
pub mod attribute_keys {
    /// Last supplier price written by a sync
    pub const SUPPLIER_PRICE: &str = "fs_supplier_price";
    /// Manual block for any XML-driven update
    pub const BLOCK_XML_UPDATE: &str = "_block_xml_update";
    /// Channel-specific (Skroutz) XML block
    pub const BLOCK_SKROUTZ_XML_UPDATE: &str = "_skroutz_block_xml_update";
    /// Custom manual block
    pub const BLOCK_CUSTOM_UPDATE: &str = "_block_custom_update";
    /// Mirrored stock status
    pub const STOCK_STATUS: &str = "_stock_status";
    /// Supplier (external) identifier
    pub const SUPPLIER_SKU: &str = "supplier_sku";

    /// The fixed attribute set loaded per batch
    pub const SNAPSHOT_KEYS: [&str; 5] = [
        SUPPLIER_PRICE,
        BLOCK_XML_UPDATE,
        BLOCK_SKROUTZ_XML_UPDATE,
        BLOCK_CUSTOM_UPDATE,
        STOCK_STATUS,
    ];
}

/// Lifecycle (publication) status of a catalog record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Draft,
    Pending,
    Private,
    Publish,
    /// Anything the store reports that the engine does not model
    Other(String),
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Private => "private",
            Self::Publish => "publish",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "draft" => Self::Draft,
            "pending" => Self::Pending,
            "private" => Self::Private,
            "publish" => Self::Publish,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, Self::Publish)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock availability status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockStatus {
    InStock,
    OutOfStock,
    OnBackorder,
    /// No value stored yet
    Unknown,
}

impl StockStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "instock",
            Self::OutOfStock => "outofstock",
            Self::OnBackorder => "onbackorder",
            Self::Unknown => "",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "instock" => Self::InStock,
            "outofstock" => Self::OutOfStock,
            "onbackorder" => Self::OnBackorder,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the store accepts orders while out of stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackorderPolicy {
    No,
    Notify,
    Yes,
}

impl BackorderPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Notify => "notify",
            Self::Yes => "yes",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "yes" => Self::Yes,
            "notify" => Self::Notify,
            _ => Self::No,
        }
    }
}

/// A catalog record, referenced by the engine but owned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: ProductId,
    pub external_id: Option<String>,
    pub name: String,
    pub status: LifecycleStatus,
    pub stock_status: StockStatus,
    pub manage_stock: bool,
    pub backorders: BackorderPolicy,
    /// Raw stored supplier price, kept as the store's string encoding
    pub supplier_price: Option<String>,
}

/// A raw attribute value as stored.
///
/// Stores differ in how they encode flags, so the lock policy normalises
/// these variants in exactly one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Missing,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl AttributeValue {
    /// String form used for price comparison and audit rows
    pub fn as_text(&self) -> String {
        match self {
            Self::Missing => String::new(),
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) => String::new(),
            Self::Int(v) => v.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl From<Option<String>> for AttributeValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Missing, Self::Text)
    }
}

/// Control/audit attributes for one record, read before any change in the batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductAttributes {
    values: HashMap<String, AttributeValue>,
}

impl ProductAttributes {
    /// Snapshot with every key of the fixed set present
    pub fn with_defaults() -> Self {
        let values = attribute_keys::SNAPSHOT_KEYS
            .iter()
            .map(|k| ((*k).to_string(), AttributeValue::Missing))
            .collect();
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> &AttributeValue {
        self.values.get(key).unwrap_or(&AttributeValue::Missing)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn supplier_price(&self) -> String {
        self.get(attribute_keys::SUPPLIER_PRICE).as_text()
    }

    pub fn stock_status(&self) -> StockStatus {
        StockStatus::parse(&self.get(attribute_keys::STOCK_STATUS).as_text())
    }
}

/// Authorised identity under which a sync runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub login: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_round_trips_known_and_unknown_values() {
        assert_eq!(LifecycleStatus::parse("draft"), LifecycleStatus::Draft);
        assert!(LifecycleStatus::parse("publish").is_published());
        let other = LifecycleStatus::parse("trash");
        assert_eq!(other.as_str(), "trash");
        assert!(!other.is_published());
    }

    #[test]
    fn default_attributes_cover_the_snapshot_keys() {
        let attrs = ProductAttributes::with_defaults();
        for key in attribute_keys::SNAPSHOT_KEYS {
            assert!(attrs.contains(key));
        }
        assert_eq!(attrs.supplier_price(), "");
        assert_eq!(attrs.stock_status(), StockStatus::Unknown);
    }
}
