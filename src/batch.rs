//! Per-item outcomes for batch operations
//!
//! Batch fetches tolerate individual failures. [`Batch`] keeps the successes
//! and a reason for every skipped item so "no matches" can be told apart from
//! "some items failed".

use serde::Serialize;
use tracing::warn;

/// An item that was left out of a batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    /// Identifier of the skipped item (message UID, object href, calendar id)
    pub item: String,
    /// Human-readable reason
    pub reason: String,
}

/// Successful items plus skipped ones
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch<T> {
    /// Items that parsed successfully, in result order
    pub items: Vec<T>,
    /// Items that were skipped
    pub skipped: Vec<Skipped>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Batch<T> {
    /// Record a successful item
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Record a skipped item and log it
    pub fn skip(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        let skipped = Skipped {
            item: item.into(),
            reason: reason.into(),
        };
        warn!(item = %skipped.item, reason = %skipped.reason, "batch item skipped");
        self.skipped.push(skipped);
    }

    /// Merge another batch into this one, keeping order
    pub fn extend(&mut self, other: Batch<T>) {
        self.items.extend(other.items);
        self.skipped.extend(other.skipped);
    }

    /// Drop skip information and keep the successes
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::Batch;

    #[test]
    fn skipped_items_do_not_appear_in_items() {
        let mut batch = Batch::default();
        batch.push(1);
        batch.skip("uid 7", "unparseable date");
        batch.push(3);

        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].item, "uid 7");
        assert_eq!(batch.into_items(), vec![1, 3]);
    }

    #[test]
    fn extend_preserves_order() {
        let mut first = Batch::default();
        first.push("a");
        let mut second = Batch::default();
        second.push("b");
        second.skip("c", "broken");

        first.extend(second);
        assert_eq!(first.items, vec!["a", "b"]);
        assert_eq!(first.skipped.len(), 1);
    }
}
