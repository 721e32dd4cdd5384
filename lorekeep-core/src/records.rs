//! Stored record types — knowledge items, domains, per-character memory
//! records, and slot claims/mappings.
//!
//! These map one-to-one onto the knowledge store's tables. Items are
//! immutable after creation except for the `active` flag; memory records
//! are updated on every review and never deleted; claims are written once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CharacterId, DomainId, Fingerprint, KnowledgeId, SlotId};

/// A single unit of knowledge held in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Unique identifier.
    pub id: KnowledgeId,
    /// Short title of the fact.
    pub title: String,
    /// Full fact text.
    pub content: String,
    /// Domain this item belongs to.
    pub domain: DomainId,
    /// Free-form tags for retrieval matching.
    pub tags: Vec<String>,
    /// Source attribution (who or what this fact came from).
    pub source: String,
    /// Inactive items are excluded from search and retrieval.
    pub active: bool,
    /// When the item was first persisted.
    pub created_at: DateTime<Utc>,
    /// Complexity score in [0, 1], assigned at acquisition time.
    pub complexity: f64,
    /// Deterministic fingerprint for near-duplicate detection.
    pub fingerprint: Fingerprint,
}

/// A named knowledge category. Static reference data, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDomain {
    /// Unique identifier.
    pub id: DomainId,
    /// Human-readable label (e.g. "belter politics").
    pub label: String,
    /// Inactive domains are skipped by classification and slot claiming.
    pub active: bool,
}

impl KnowledgeDomain {
    /// Create a new active domain with the given label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: DomainId::new(),
            label: label.into(),
            active: true,
        }
    }
}

/// Per-(character, item) spaced-repetition state.
///
/// Invariant: `next_review >= last_reviewed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterMemoryRecord {
    /// The character holding the memory.
    pub character: CharacterId,
    /// The knowledge item remembered.
    pub item: KnowledgeId,
    /// Memory stability in days; always > 0.
    pub stability: f64,
    /// Perceived difficulty in [1, 10].
    pub difficulty: f64,
    /// When the item was last reviewed (or acquired).
    pub last_reviewed: DateTime<Utc>,
    /// When the next review is due.
    pub next_review: DateTime<Utc>,
    /// Number of completed reviews.
    pub review_count: u32,
    /// Set by the background decay pass when retrievability falls below
    /// the forgetting threshold.
    pub is_forgotten: bool,
}

impl CharacterMemoryRecord {
    /// Days elapsed since the last review. Negative clock skew clamps to 0.
    #[must_use]
    pub fn days_since_review(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.last_reviewed).num_seconds();
        (seconds.max(0) as f64) / 86_400.0
    }

    /// Days past the scheduled review, or 0 if not yet due.
    #[must_use]
    pub fn days_overdue(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.next_review).num_seconds();
        (seconds.max(0) as f64) / 86_400.0
    }
}

/// A claimed slot: (character, slot) → domain, written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSlotClaim {
    /// The claiming character.
    pub character: CharacterId,
    /// Which slot in the character's fixed pool was consumed.
    pub slot: SlotId,
    /// The domain the slot grants access to.
    pub domain: DomainId,
    /// When the claim was recorded.
    pub claimed_at: DateTime<Utc>,
}

/// Operational slot→domain mapping consulted at retrieval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSlotMapping {
    /// The character the mapping belongs to.
    pub character: CharacterId,
    /// The consumed slot.
    pub slot: SlotId,
    /// The accessible domain.
    pub domain: DomainId,
    /// Access percentage; always 100 for claims made by this core.
    pub access_pct: u8,
}

/// One appended row of review history.
///
/// The review log preserves the grade and interval data a future
/// stability/difficulty fitter would need, even though spacing is
/// currently driven by review count alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLogEntry {
    /// The reviewing character.
    pub character: CharacterId,
    /// The reviewed item.
    pub item: KnowledgeId,
    /// Review grade, 1 (forgot) to 4 (easy).
    pub grade: u8,
    /// Days between the previous review and this one.
    pub previous_interval_days: f64,
    /// Days until the newly scheduled review.
    pub new_interval_days: f64,
    /// Computed retrievability at the moment of review.
    pub retrievability_at_review: f64,
    /// When the review happened.
    pub reviewed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(last: DateTime<Utc>, next: DateTime<Utc>) -> CharacterMemoryRecord {
        CharacterMemoryRecord {
            character: CharacterId::new(),
            item: KnowledgeId::new(),
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: last,
            next_review: next,
            review_count: 1,
            is_forgotten: false,
        }
    }

    #[test]
    fn days_since_review_elapses() {
        let now = Utc::now();
        let r = record(now - Duration::days(10), now - Duration::days(9));
        assert!((r.days_since_review(now) - 10.0).abs() < 0.01);
    }

    #[test]
    fn days_overdue_is_zero_before_due() {
        let now = Utc::now();
        let r = record(now, now + Duration::days(2));
        assert_eq!(r.days_overdue(now), 0.0);
    }

    #[test]
    fn days_overdue_counts_past_due() {
        let now = Utc::now();
        let r = record(now - Duration::days(10), now - Duration::days(3));
        assert!((r.days_overdue(now) - 3.0).abs() < 0.01);
    }
}
