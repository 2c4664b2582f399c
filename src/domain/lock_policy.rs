//! Manual update locks
//!
//! A record carrying any engaged lock attribute is never mutated by a sync.
//! Lock attributes are checked in a fixed order and the first engaged one
//! supplies the reason.

use crate::domain::catalog::{attribute_keys, AttributeValue, ProductAttributes};

/// Outcome of evaluating the lock attributes of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Locked(LockReason),
    Unlocked,
}

impl LockState {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

/// Which lock attribute stopped the update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockReason {
    pub attribute: &'static str,
    pub label: &'static str,
}

/// Ordered lock attributes with their human-readable reasons
#[derive(Debug, Clone)]
pub struct LockPolicy {
    locks: Vec<LockReason>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            locks: vec![
                LockReason {
                    attribute: attribute_keys::BLOCK_XML_UPDATE,
                    label: "XML Update Block",
                },
                LockReason {
                    attribute: attribute_keys::BLOCK_SKROUTZ_XML_UPDATE,
                    label: "Skroutz XML Update Block",
                },
                LockReason {
                    attribute: attribute_keys::BLOCK_CUSTOM_UPDATE,
                    label: "Custom Update Block",
                },
            ],
        }
    }
}

impl LockPolicy {
    pub fn evaluate(&self, attributes: &ProductAttributes) -> LockState {
        self.locks
            .iter()
            .find(|lock| is_engaged(attributes.get(lock.attribute)))
            .map_or(LockState::Unlocked, |lock| LockState::Locked(lock.clone()))
    }

    pub fn attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.locks.iter().map(|l| l.attribute)
    }
}

/// Canonical "true" encodings of a lock flag: boolean `true`, `"1"`, `1`, `"yes"`.
///
/// Everything else, including `"true"`, `"on"` and `"YES"`, is unlocked.
pub fn is_engaged(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Bool(b) => *b,
        AttributeValue::Int(i) => *i == 1,
        AttributeValue::Text(s) => s == "1" || s == "yes",
        AttributeValue::Missing => false,
    }
}
