//! Subscription Set
//!
//! The desired set of Questrade symbol IDs the live stream should be
//! receiving quotes for. Owned by whichever instance currently holds stream
//! ownership and rebuilt wholesale on every resync cycle — full-set
//! semantics, never incremental deltas, so the stream cannot drift from the
//! position store.

use std::collections::BTreeSet;

/// The full desired subscription set for the quote stream.
///
/// Questrade refuses to allocate a stream for an empty id list, so an empty
/// set is materialized as a single fallback reference instrument.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionSet {
    ids: BTreeSet<u64>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ids: BTreeSet::new(),
        }
    }

    /// Build the desired set from resolved position IDs plus explicitly
    /// requested IDs.
    #[must_use]
    pub fn from_ids(
        position_ids: impl IntoIterator<Item = u64>,
        requested_ids: impl IntoIterator<Item = u64>,
    ) -> Self {
        let mut ids: BTreeSet<u64> = position_ids.into_iter().collect();
        ids.extend(requested_ids);
        Self { ids }
    }

    /// Whether no IDs are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of distinct IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// The IDs to actually subscribe with: the set itself, or the fallback
    /// instrument when the set is empty.
    #[must_use]
    pub fn effective_ids(&self, fallback_id: u64) -> Vec<u64> {
        if self.ids.is_empty() {
            vec![fallback_id]
        } else {
            self.ids.iter().copied().collect()
        }
    }
}
