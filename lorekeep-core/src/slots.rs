//! Domain slot allocator.
//!
//! Each character owns a small fixed pool of knowledge slots. When trait
//! scores suggest enough interest in a domain, one slot is permanently
//! claimed for it, unlocking the domain for future acquisition and
//! retrieval. The pool is a capacity-limited resource: the claim write is
//! a single transaction whose existence check and insert both happen
//! inside it, so concurrent re-evaluations of the same character cannot
//! double-claim.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SlotConfig;
use crate::error::{LoreError, Result};
use crate::store::KnowledgeStore;
use crate::types::{CharacterId, DomainId, PersonalityTrait, TraitVector};

/// Slot allocator bound to a store and config.
#[derive(Debug)]
pub struct SlotAllocator<'a> {
    store: &'a KnowledgeStore,
    config: &'a SlotConfig,
}

impl<'a> SlotAllocator<'a> {
    /// Bind an allocator to a store and configuration.
    #[must_use]
    pub fn new(store: &'a KnowledgeStore, config: &'a SlotConfig) -> Self {
        Self { store, config }
    }

    /// Trait- and expertise-driven interest score for a domain, in
    /// [0, 100].
    ///
    /// `interest = expertise·W_e + curiosity·W_c + openness·W_o`, where
    /// the openness proxy averages growth-mindset with the inverse of
    /// fixed-mindset. Missing trait scores default to the 50th
    /// percentile.
    #[must_use]
    pub fn interest_score(&self, expertise: f64, traits: &TraitVector) -> f64 {
        let curiosity = traits.score(PersonalityTrait::CuriosityDrive);
        let growth = traits.score(PersonalityTrait::GrowthMindset);
        let fixed = traits.score(PersonalityTrait::FixedMindset);

        if curiosity.is_defaulted() || growth.is_defaulted() || fixed.is_defaulted() {
            debug!(
                curiosity_defaulted = curiosity.is_defaulted(),
                growth_defaulted = growth.is_defaulted(),
                fixed_defaulted = fixed.is_defaulted(),
                "interest scoring with defaulted trait scores"
            );
        }

        let openness_proxy = (growth.value() + (100.0 - fixed.value())) / 2.0;
        let interest = expertise * self.config.expertise_weight
            + curiosity.value() * self.config.curiosity_weight
            + openness_proxy * self.config.openness_weight;
        interest.clamp(0.0, 100.0)
    }

    /// Try to claim a slot for (character, domain).
    ///
    /// Idempotent: an already-claimed domain returns `Ok(false)`. Also
    /// returns `Ok(false)` when the domain is inactive, interest is
    /// below the threshold, or every slot is consumed. On success the
    /// claim and its operational mapping land in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::DomainNotFound`] for an unknown domain, or
    /// [`LoreError::Database`] on store failures.
    pub fn attempt_claim(
        &self,
        character: CharacterId,
        domain: DomainId,
        traits: &TraitVector,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(registered) = self.store.domain(domain)? else {
            return Err(LoreError::DomainNotFound(domain));
        };
        if !registered.active {
            debug!(character = %character, domain = %registered.label, "claim skipped, domain inactive");
            return Ok(false);
        }

        let expertise = self.store.domain_expertise(character, domain)?;
        let interest = self.interest_score(expertise, traits);
        if interest < self.config.interest_threshold {
            debug!(
                character = %character,
                domain = %registered.label,
                interest,
                threshold = self.config.interest_threshold,
                "claim skipped, interest below threshold"
            );
            return Ok(false);
        }

        // The store re-checks claim uniqueness and pool occupancy inside
        // the transaction; a pre-check here would race.
        let claimed = self
            .store
            .claim_slot(character, domain, self.config.pool_size, now)?;
        Ok(claimed.is_some())
    }
}
