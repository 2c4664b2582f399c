//! Feed-side record produced by the streaming reader

use serde::{Deserialize, Serialize};

/// One product element of the supplier feed.
///
/// Ephemeral: it lives for a single parse-and-decide cycle and is never
/// persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// Zero-based ordinal of the record in document order
    pub ordinal: u64,
    pub external_id: String,
    /// `None` when the price field is absent or not numeric
    pub supplier_price: Option<f64>,
    pub quantity: Option<i64>,
}

impl FeedRecord {
    pub fn new(ordinal: u64, external_id: impl Into<String>, supplier_price: Option<f64>) -> Self {
        Self {
            ordinal,
            external_id: external_id.into(),
            supplier_price,
            quantity: None,
        }
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// External identifier with surrounding whitespace removed
    pub fn trimmed_id(&self) -> &str {
        self.external_id.trim()
    }
}

/// Parse a feed price the way the supplier encodes it.
///
/// Accepts a decimal comma as well as a decimal point.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replace(',', ".")
    } else {
        cleaned.to_string()
    };
    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_parsing_handles_supplier_encodings() {
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price(" 17,50 "), Some(17.5));
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("n/a"), None);
        assert_eq!(parse_price("NaN"), None);
    }

    #[test]
    fn trimmed_id_strips_whitespace() {
        let record = FeedRecord::new(0, "  SKU-1\n", Some(1.0));
        assert_eq!(record.trimmed_id(), "SKU-1");
    }
}
