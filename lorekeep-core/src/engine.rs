//! Engine facade — the boundary surface consumed by the dialogue layer.
//!
//! `KnowledgeEngine` composes the store, the fingerprint provider, the
//! external trait provider, and configuration into one explicit,
//! dependency-injected handle. Construct it once at the composition root
//! and pass it by reference; there are no process-wide singletons.

use chrono::Utc;
use tracing::{debug, info};

use crate::acquisition::{AcquisitionOutcome, AcquisitionPipeline, KnowledgeCandidate};
use crate::config::LoreConfig;
use crate::error::Result;
use crate::fingerprint::FingerprintProvider;
use crate::records::{CharacterMemoryRecord, KnowledgeDomain, KnowledgeItem};
use crate::scheduler::{
    DecayPassSummary, OverduePenalty, RetrievabilitySnapshot, RetrievalScore, ReviewScheduler,
};
use crate::search::{self, MatchType};
use crate::slots::SlotAllocator;
use crate::store::KnowledgeStore;
use crate::traits::TraitProvider;
use crate::types::{CharacterId, DomainId, KnowledgeId};

/// One fully scored retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievedKnowledge {
    /// The matched item.
    pub item: KnowledgeItem,
    /// Resolved label of the item's domain.
    pub domain_label: String,
    /// Keyword relevance in [0, 100].
    pub relevance: u32,
    /// How the search found the item.
    pub match_type: MatchType,
    /// Live memory state at scoring time.
    pub snapshot: RetrievabilitySnapshot,
    /// Combined ranking score with components and confidence.
    pub score: RetrievalScore,
}

/// The composed knowledge engine.
pub struct KnowledgeEngine {
    store: KnowledgeStore,
    fingerprints: Box<dyn FingerprintProvider>,
    traits: Box<dyn TraitProvider>,
    config: LoreConfig,
}

impl std::fmt::Debug for KnowledgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeEngine")
            .field("store", &self.store)
            .field("fingerprints", &self.fingerprints.name())
            .finish_non_exhaustive()
    }
}

impl KnowledgeEngine {
    /// Compose an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Config`] if the configuration fails
    /// validation — bad weight constants abort at startup, never per
    /// request.
    pub fn new(
        store: KnowledgeStore,
        fingerprints: Box<dyn FingerprintProvider>,
        traits: Box<dyn TraitProvider>,
        config: LoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            fingerprint_provider = fingerprints.name(),
            dims = fingerprints.dimensions(),
            "knowledge engine composed"
        );
        Ok(Self {
            store,
            fingerprints,
            traits,
            config,
        })
    }

    /// Direct access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Register a knowledge domain.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Database`] on conflicts.
    pub fn register_domain(&self, domain: &KnowledgeDomain) -> Result<()> {
        self.store.insert_domain(domain)
    }

    /// Retrieve the most relevant knowledge for a free-text query,
    /// ranked by combined semantic and retrievability score.
    ///
    /// When the character has claimed domain slots, results are limited
    /// to mapped domains; a character with no claims draws from the
    /// whole corpus. `intent_weight` (defaulting from config) biases
    /// toward freshness-insensitive facts when low and recent, decaying
    /// ones when high.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Database`] or
    /// [`crate::LoreError::Serialization`] if the search itself fails;
    /// per-item memory reads degrade soft.
    pub fn retrieve(
        &self,
        character: CharacterId,
        query: &str,
        limit: usize,
        intent_weight: Option<f64>,
    ) -> Result<Vec<RetrievedKnowledge>> {
        let now = Utc::now();
        let intent_weight = intent_weight.unwrap_or(self.config.scheduler.default_intent_weight);
        let scheduler = ReviewScheduler::new(&self.store, &self.config.scheduler);

        // Over-fetch before the domain filter so claimed-domain
        // characters still fill their limit.
        let hits = search::search(&self.store, &self.config.search, query, limit.max(1) * 4)?;

        let mapped: Vec<DomainId> = self
            .store
            .mappings_for(character)?
            .into_iter()
            .map(|m| m.domain)
            .collect();

        let mut results: Vec<RetrievedKnowledge> = hits
            .into_iter()
            .filter(|hit| mapped.is_empty() || mapped.contains(&hit.item.domain))
            .map(|hit| {
                let snapshot = scheduler.retrievability_of(character, hit.item.id, now);
                let score = scheduler.score_for_retrieval(
                    f64::from(hit.relevance) / 100.0,
                    &snapshot,
                    intent_weight,
                );
                RetrievedKnowledge {
                    item: hit.item,
                    domain_label: hit.domain_label,
                    relevance: hit.relevance,
                    match_type: hit.match_type,
                    snapshot,
                    score,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.total.cmp(&a.score.total));
        results.truncate(limit);

        debug!(
            character = %character,
            query,
            results = results.len(),
            domain_filtered = !mapped.is_empty(),
            "retrieval complete"
        );
        Ok(results)
    }

    /// Live memory state for (character, item). Never fails; degraded
    /// reads return neutral values.
    #[must_use]
    pub fn retrievability_of(
        &self,
        character: CharacterId,
        item: KnowledgeId,
    ) -> RetrievabilitySnapshot {
        ReviewScheduler::new(&self.store, &self.config.scheduler)
            .retrievability_of(character, item, Utc::now())
    }

    /// Combine a normalized semantic relevance with a snapshot into a
    /// ranking score.
    #[must_use]
    pub fn score_for_retrieval(
        &self,
        semantic_relevance: f64,
        snapshot: &RetrievabilitySnapshot,
        intent_weight: Option<f64>,
    ) -> RetrievalScore {
        ReviewScheduler::new(&self.store, &self.config.scheduler).score_for_retrieval(
            semantic_relevance,
            snapshot,
            intent_weight.unwrap_or(self.config.scheduler.default_intent_weight),
        )
    }

    /// Run the acquisition pipeline for a candidate fact, using the
    /// character's current trait vector.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::NoActiveDomains`] on an empty domain
    /// registry, or store errors; nothing partial is ever written.
    pub fn acquire(
        &self,
        character: CharacterId,
        candidate: &KnowledgeCandidate,
    ) -> Result<AcquisitionOutcome> {
        let traits = self.traits.trait_vector(character);
        AcquisitionPipeline::new(
            &self.store,
            self.fingerprints.as_ref(),
            &self.config.acquisition,
            &self.config.decay,
            &self.config.scheduler,
        )
        .acquire(character, candidate, &traits, Utc::now())
    }

    /// Evaluate interest and try to claim a domain slot for the
    /// character. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::DomainNotFound`] for an unknown
    /// domain, or store errors.
    pub fn attempt_claim(&self, character: CharacterId, domain: DomainId) -> Result<bool> {
        let traits = self.traits.trait_vector(character);
        SlotAllocator::new(&self.store, &self.config.slots).attempt_claim(
            character,
            domain,
            &traits,
            Utc::now(),
        )
    }

    /// Record a successful retrieval (review) and advance the schedule.
    ///
    /// # Errors
    ///
    /// Returns store errors; the review write is transactional.
    pub fn record_retrieval_success(
        &self,
        character: CharacterId,
        item: KnowledgeId,
        grade: u8,
    ) -> Result<()> {
        ReviewScheduler::new(&self.store, &self.config.scheduler).record_retrieval_success(
            character,
            item,
            grade,
            Utc::now(),
        )
    }

    /// The character's overdue knowledge, most overdue first, with
    /// advisory penalties.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn overdue_knowledge(
        &self,
        character: CharacterId,
    ) -> Result<Vec<(KnowledgeItem, CharacterMemoryRecord, OverduePenalty)>> {
        ReviewScheduler::new(&self.store, &self.config.scheduler)
            .overdue_knowledge(character, Utc::now())
    }

    /// Sweep due records, marking forgotten ones and rescheduling
    /// past-due reviews.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn run_decay_pass(&self) -> Result<DecayPassSummary> {
        ReviewScheduler::new(&self.store, &self.config.scheduler).run_decay_pass(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::HashedFingerprintProvider;
    use crate::traits::StaticTraitProvider;
    use crate::types::{AcquisitionMethod, PersonalityTrait, TraitVector};

    fn engine_with_domains(labels: &[&str]) -> (KnowledgeEngine, Vec<KnowledgeDomain>) {
        let store = KnowledgeStore::open_in_memory().expect("open");
        let domains: Vec<KnowledgeDomain> =
            labels.iter().map(|l| KnowledgeDomain::new(*l)).collect();
        for d in &domains {
            store.insert_domain(d).expect("domain");
        }
        let engine = KnowledgeEngine::new(
            store,
            Box::new(HashedFingerprintProvider::default()),
            Box::new(StaticTraitProvider::new()),
            LoreConfig::default(),
        )
        .expect("engine");
        (engine, domains)
    }

    fn candidate(title: &str, content: &str) -> KnowledgeCandidate {
        KnowledgeCandidate {
            title: title.to_string(),
            content: content.to_string(),
            tags: vec![],
            source: "test".to_string(),
            method: AcquisitionMethod::Conversation,
        }
    }

    #[test]
    fn invalid_config_refused_at_construction() {
        let store = KnowledgeStore::open_in_memory().expect("open");
        let mut config = LoreConfig::default();
        config.slots.pool_size = 0;
        let result = KnowledgeEngine::new(
            store,
            Box::new(HashedFingerprintProvider::default()),
            Box::new(StaticTraitProvider::new()),
            config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn acquire_then_retrieve_round_trip() {
        let (engine, _) = engine_with_domains(&["station logistics"]);
        let character = CharacterId::new();

        let outcome = engine
            .acquire(
                character,
                &candidate("water rationing", "rationing begins on the lower decks"),
            )
            .expect("acquire");
        assert!(matches!(outcome, AcquisitionOutcome::Created { .. }));

        let results = engine
            .retrieve(character, "water rationing on the decks", 5, None)
            .expect("retrieve");
        assert!(!results.is_empty());
        assert_eq!(results[0].item.title, "water rationing");
        assert!(results[0].score.total.value() > 0.0);
    }

    #[test]
    fn retrieval_respects_claimed_domains() {
        let (engine, domains) = engine_with_domains(&["gossip", "reactor engineering"]);
        let character = CharacterId::new();

        // Two items about "coolant", one per domain, acquired by another
        // character so dedup does not interfere.
        let author = CharacterId::new();
        for (title, content) in [
            ("coolant rumors", "dockside gossip says the coolant is rationed"),
            (
                "coolant loop specs",
                "reactor engineering manual puts the coolant loop at forty bar",
            ),
        ] {
            let outcome = engine
                .acquire(author, &candidate(title, content))
                .expect("acquire");
            assert!(matches!(outcome, AcquisitionOutcome::Created { .. }));
        }

        // Claim only the engineering domain for our character.
        let engineering = domains
            .iter()
            .find(|d| d.label == "reactor engineering")
            .expect("domain");
        let claimed = engine
            .store()
            .claim_slot(character, engineering.id, 5, Utc::now())
            .expect("claim");
        assert!(claimed.is_some());

        let results = engine
            .retrieve(character, "coolant", 5, None)
            .expect("retrieve");
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.item.domain == engineering.id));

        // A character with no claims sees both.
        let unclaimed = engine
            .retrieve(CharacterId::new(), "coolant", 5, None)
            .expect("retrieve");
        assert!(unclaimed.len() >= 2);
    }

    #[test]
    fn trait_provider_feeds_slot_claims() {
        let store = KnowledgeStore::open_in_memory().expect("open");
        let domain = KnowledgeDomain::new("xenobiology");
        store.insert_domain(&domain).expect("domain");

        let character = CharacterId::new();
        let mut traits = TraitVector::new();
        traits.set(PersonalityTrait::CuriosityDrive, 100.0);
        traits.set(PersonalityTrait::GrowthMindset, 100.0);
        traits.set(PersonalityTrait::FixedMindset, 0.0);
        let mut provider = StaticTraitProvider::new();
        provider.insert(character, traits);

        let mut config = LoreConfig::default();
        config.slots.interest_threshold = 40.0;
        let engine = KnowledgeEngine::new(
            store,
            Box::new(HashedFingerprintProvider::default()),
            Box::new(provider),
            config,
        )
        .expect("engine");

        assert!(engine.attempt_claim(character, domain.id).expect("claim"));
        assert!(!engine.attempt_claim(character, domain.id).expect("claim"));
    }

    #[test]
    fn review_cycle_advances_schedule() {
        let (engine, _) = engine_with_domains(&["history"]);
        let character = CharacterId::new();

        let outcome = engine
            .acquire(
                character,
                &candidate("first landing", "the first landing happened at dawn"),
            )
            .expect("acquire");
        let AcquisitionOutcome::Created { item } = outcome else {
            panic!("expected Created");
        };

        let before = engine.retrievability_of(character, item.id);
        assert!(!before.is_new, "acquisition seeds a record");
        assert_eq!(before.review_count, 0);

        engine
            .record_retrieval_success(character, item.id, 3)
            .expect("review");
        let after = engine.retrievability_of(character, item.id);
        assert_eq!(after.review_count, 1);
    }

    #[test]
    fn empty_query_is_empty_result() {
        let (engine, _) = engine_with_domains(&["general"]);
        let results = engine
            .retrieve(CharacterId::new(), "", 5, None)
            .expect("retrieve");
        assert!(results.is_empty());
    }
}
