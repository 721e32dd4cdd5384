//! Knowledge acquisition pipeline.
//!
//! A candidate fact moves through a fixed sequence:
//! EMBED → DEDUP_CHECK → {reused | continue} → DOMAIN_CLASSIFY →
//! COMPLEXITY_SCORE → PERSIST.
//!
//! Every stage before PERSIST is side-effect free; the final persist
//! writes the item and its seed memory record in one transaction, so a
//! failure anywhere never leaves a partial item behind.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::{AcquisitionConfig, DecayConfig, SchedulerConfig};
use crate::decay;
use crate::error::{LoreError, Result};
use crate::fingerprint::FingerprintProvider;
use crate::records::{CharacterMemoryRecord, KnowledgeDomain, KnowledgeItem};
use crate::search;
use crate::store::KnowledgeStore;
use crate::types::{
    AcquisitionMethod, CharacterId, Fingerprint, KnowledgeId, PersonalityTrait, TraitVector,
};

/// A fact offered for acquisition, before it becomes a stored item.
#[derive(Debug, Clone)]
pub struct KnowledgeCandidate {
    /// Short title of the fact.
    pub title: String,
    /// Full fact text.
    pub content: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Source attribution.
    pub source: String,
    /// How the character came by this fact.
    pub method: AcquisitionMethod,
}

/// Result of running the pipeline.
#[derive(Debug, Clone)]
pub enum AcquisitionOutcome {
    /// A new item was created and its first memory record seeded.
    Created {
        /// The freshly persisted item.
        item: KnowledgeItem,
    },
    /// A near-duplicate already exists for this character; nothing was
    /// written.
    Reused {
        /// The existing item the candidate duplicates.
        item: KnowledgeId,
        /// Cosine similarity that triggered the reuse.
        similarity: f32,
    },
}

/// The acquisition pipeline, bound to its collaborators.
pub struct AcquisitionPipeline<'a> {
    store: &'a KnowledgeStore,
    fingerprints: &'a dyn FingerprintProvider,
    config: &'a AcquisitionConfig,
    decay_config: &'a DecayConfig,
    scheduler_config: &'a SchedulerConfig,
}

impl<'a> AcquisitionPipeline<'a> {
    /// Bind the pipeline to its store, fingerprint provider, and config.
    #[must_use]
    pub fn new(
        store: &'a KnowledgeStore,
        fingerprints: &'a dyn FingerprintProvider,
        config: &'a AcquisitionConfig,
        decay_config: &'a DecayConfig,
        scheduler_config: &'a SchedulerConfig,
    ) -> Self {
        Self {
            store,
            fingerprints,
            config,
            decay_config,
            scheduler_config,
        }
    }

    /// Run the full pipeline for one candidate.
    ///
    /// # Errors
    ///
    /// Returns [`LoreError::NoActiveDomains`] when the domain registry is
    /// empty, or [`LoreError::Database`]/[`LoreError::Serialization`] on
    /// store failures. Any error aborts the whole acquisition.
    pub fn acquire(
        &self,
        character: CharacterId,
        candidate: &KnowledgeCandidate,
        traits: &TraitVector,
        now: DateTime<Utc>,
    ) -> Result<AcquisitionOutcome> {
        // EMBED
        let text = format!("{} {}", candidate.title, candidate.content);
        let fingerprint = self.fingerprints.fingerprint(&text)?;

        // DEDUP_CHECK — against this character's items only; memory
        // spaces are independent.
        if let Some((existing, similarity)) = self.find_duplicate(character, &fingerprint)? {
            info!(
                character = %character,
                existing = %existing,
                similarity,
                "candidate deduplicated against existing item"
            );
            return Ok(AcquisitionOutcome::Reused {
                item: existing,
                similarity,
            });
        }

        // DOMAIN_CLASSIFY
        let domain = self.classify_domain(candidate)?;

        // COMPLEXITY_SCORE
        let complexity = self.complexity_score(traits);

        // Seed stability: the trait/method factor scales the default.
        let factor = decay::decay_rate_factor(traits, candidate.method, self.decay_config);
        let stability = self.scheduler_config.default_stability_days * factor;

        let item = KnowledgeItem {
            id: KnowledgeId::new(),
            title: candidate.title.clone(),
            content: candidate.content.clone(),
            domain: domain.id,
            tags: candidate.tags.clone(),
            source: candidate.source.clone(),
            active: true,
            created_at: now,
            complexity,
            fingerprint,
        };
        let record = CharacterMemoryRecord {
            character,
            item: item.id,
            stability,
            difficulty: self.scheduler_config.default_difficulty,
            last_reviewed: now,
            next_review: now + Duration::days(1),
            review_count: 0,
            is_forgotten: false,
        };

        // PERSIST — one transaction, no partial item.
        self.store.insert_item_with_record(&item, &record)?;

        info!(
            character = %character,
            item = %item.id,
            domain = %domain.label,
            complexity,
            stability,
            method = candidate.method.as_str(),
            "knowledge acquired"
        );
        Ok(AcquisitionOutcome::Created { item })
    }

    /// Most similar existing item at or above the dedup threshold.
    fn find_duplicate(
        &self,
        character: CharacterId,
        fingerprint: &Fingerprint,
    ) -> Result<Option<(KnowledgeId, f32)>> {
        let existing = self.store.items_for_character(character)?;
        let best = existing
            .iter()
            .map(|item| (item.id, fingerprint.cosine_similarity(&item.fingerprint)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((id, similarity)) if similarity >= self.config.dedup_threshold => {
                Ok(Some((id, similarity)))
            }
            _ => Ok(None),
        }
    }

    /// Keyword-overlap classification over active domains.
    ///
    /// A domain's score is the fraction of its label tokens found among
    /// the candidate's keywords. Best above the threshold wins; else the
    /// configured fallback priority list; else the first active domain.
    /// A v1 heuristic, swappable for a real classifier.
    fn classify_domain(&self, candidate: &KnowledgeCandidate) -> Result<KnowledgeDomain> {
        let domains = self.store.active_domains()?;
        if domains.is_empty() {
            return Err(LoreError::NoActiveDomains);
        }

        let haystack = format!(
            "{} {} {}",
            candidate.title,
            candidate.content,
            candidate.tags.join(" ")
        );
        let keywords = search::extract_keywords(&haystack);

        let mut best: Option<(&KnowledgeDomain, f64)> = None;
        for domain in &domains {
            let label_tokens: Vec<String> = domain
                .label
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            if label_tokens.is_empty() {
                continue;
            }
            let matched = label_tokens
                .iter()
                .filter(|t| keywords.contains(t))
                .count();
            let score = matched as f64 / label_tokens.len() as f64;
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((domain, score));
            }
        }

        if let Some((domain, score)) = best {
            if score > self.config.classify_threshold {
                debug!(domain = %domain.label, score, "domain classified by keyword overlap");
                return Ok(domain.clone());
            }
        }

        for label in &self.config.fallback_domains {
            if let Some(domain) = domains.iter().find(|d| &d.label == label) {
                debug!(domain = %domain.label, "domain classified by fallback priority");
                return Ok(domain.clone());
            }
        }

        debug!(domain = %domains[0].label, "domain classification defaulted to first active");
        Ok(domains[0].clone())
    }

    /// Trait-modulated complexity in [0.1, 1.0].
    ///
    /// Inquisitive characters tolerate more complex material; overwhelmed
    /// ones less. Missing trait scores default to the 50th percentile and
    /// the candidate is never blocked.
    fn complexity_score(&self, traits: &TraitVector) -> f64 {
        let inquisitiveness = traits.score(PersonalityTrait::Inquisitiveness);
        let overwhelm = traits.score(PersonalityTrait::Overwhelm);

        if inquisitiveness.is_defaulted() || overwhelm.is_defaulted() {
            debug!(
                inquisitiveness_defaulted = inquisitiveness.is_defaulted(),
                overwhelm_defaulted = overwhelm.is_defaulted(),
                "complexity scoring with defaulted trait scores"
            );
        }

        let score = 0.5 + (inquisitiveness.value() - 50.0) * self.config.inquisitiveness_weight
            - (overwhelm.value() - 50.0) * self.config.overwhelm_weight;
        score.clamp(0.1, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoreConfig;
    use crate::fingerprint::HashedFingerprintProvider;

    struct Fixture {
        store: KnowledgeStore,
        provider: HashedFingerprintProvider,
        config: LoreConfig,
    }

    impl Fixture {
        fn new(domain_labels: &[&str]) -> Self {
            let store = KnowledgeStore::open_in_memory().expect("open");
            for label in domain_labels {
                store
                    .insert_domain(&KnowledgeDomain::new(*label))
                    .expect("domain");
            }
            Self {
                store,
                provider: HashedFingerprintProvider::default(),
                config: LoreConfig::default(),
            }
        }

        fn pipeline(&self) -> AcquisitionPipeline<'_> {
            AcquisitionPipeline::new(
                &self.store,
                &self.provider,
                &self.config.acquisition,
                &self.config.decay,
                &self.config.scheduler,
            )
        }
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
    fn created_item_has_seed_record() {
        let fixture = Fixture::new(&["station logistics"]);
        let character = CharacterId::new();
        let now = Utc::now();

        let outcome = fixture
            .pipeline()
            .acquire(
                character,
                &candidate("water rationing", "rationing starts next cycle"),
                &TraitVector::new(),
                now,
            )
            .expect("acquire");

        let AcquisitionOutcome::Created { item } = outcome else {
            panic!("expected Created");
        };
        let record = fixture
            .store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        assert_eq!(record.review_count, 0);
        assert_eq!(record.next_review, now + Duration::days(1));
        // neutral traits: stability = 5.0 * 1.035
        assert!((record.stability - 5.175).abs() < 1e-9);
    }

    #[test]
    fn identical_text_twice_is_reused() {
        let fixture = Fixture::new(&["station logistics"]);
        let character = CharacterId::new();
        let now = Utc::now();
        let pipeline = fixture.pipeline();
        let c = candidate("dock schedule", "freighters dock on even shifts only");

        let first = pipeline
            .acquire(character, &c, &TraitVector::new(), now)
            .expect("first");
        let AcquisitionOutcome::Created { item } = first else {
            panic!("expected Created");
        };

        let second = pipeline
            .acquire(character, &c, &TraitVector::new(), now)
            .expect("second");
        let AcquisitionOutcome::Reused { item: reused, similarity } = second else {
            panic!("expected Reused");
        };
        assert_eq!(reused, item.id);
        assert!(similarity > 0.99);

        // no second item was written
        assert_eq!(
            fixture
                .store
                .items_for_character(character)
                .expect("items")
                .len(),
            1
        );
    }

    #[test]
    fn dedup_is_per_character() {
        let fixture = Fixture::new(&["station logistics"]);
        let now = Utc::now();
        let pipeline = fixture.pipeline();
        let c = candidate("dock schedule", "freighters dock on even shifts only");

        let a = CharacterId::new();
        let b = CharacterId::new();
        let first = pipeline.acquire(a, &c, &TraitVector::new(), now).expect("a");
        assert!(matches!(first, AcquisitionOutcome::Created { .. }));
        let second = pipeline.acquire(b, &c, &TraitVector::new(), now).expect("b");
        assert!(matches!(second, AcquisitionOutcome::Created { .. }));
    }

    #[test]
    fn classification_prefers_overlapping_label() {
        let fixture = Fixture::new(&["asteroid mining", "station politics"]);
        let character = CharacterId::new();

        let outcome = fixture
            .pipeline()
            .acquire(
                character,
                &candidate(
                    "new mining quotas",
                    "the asteroid mining consortium cut quotas again",
                ),
                &TraitVector::new(),
                Utc::now(),
            )
            .expect("acquire");

        let AcquisitionOutcome::Created { item } = outcome else {
            panic!("expected Created");
        };
        let domain = fixture
            .store
            .domain(item.domain)
            .expect("load")
            .expect("Some");
        assert_eq!(domain.label, "asteroid mining");
    }

    #[test]
    fn classification_falls_back_in_priority_order() {
        let mut fixture = Fixture::new(&["alpha", "beta", "gamma"]);
        fixture.config.acquisition.fallback_domains =
            vec!["nonexistent".to_string(), "gamma".to_string()];
        let character = CharacterId::new();

        let outcome = fixture
            .pipeline()
            .acquire(
                character,
                &candidate("unrelated title", "entirely unrelated content words"),
                &TraitVector::new(),
                Utc::now(),
            )
            .expect("acquire");

        let AcquisitionOutcome::Created { item } = outcome else {
            panic!("expected Created");
        };
        let domain = fixture
            .store
            .domain(item.domain)
            .expect("load")
            .expect("Some");
        assert_eq!(domain.label, "gamma");
    }

    #[test]
    fn no_domains_aborts_cleanly() {
        let fixture = Fixture::new(&[]);
        let character = CharacterId::new();
        let err = fixture
            .pipeline()
            .acquire(
                character,
                &candidate("anything", "anything at all"),
                &TraitVector::new(),
                Utc::now(),
            )
            .expect_err("empty registry must fail");
        assert!(matches!(err, LoreError::NoActiveDomains));
        assert!(fixture
            .store
            .items_for_character(character)
            .expect("items")
            .is_empty());
    }

    #[test]
    fn complexity_tracks_traits() {
        let fixture = Fixture::new(&["general"]);
        let pipeline = fixture.pipeline();

        // neutral defaults → 0.5
        assert!((pipeline.complexity_score(&TraitVector::new()) - 0.5).abs() < f64::EPSILON);

        let mut curious = TraitVector::new();
        curious.set(PersonalityTrait::Inquisitiveness, 100.0);
        curious.set(PersonalityTrait::Overwhelm, 0.0);
        // 0.5 + 50*0.004 + 50*0.003 = 0.85
        assert!((pipeline.complexity_score(&curious) - 0.85).abs() < 1e-9);

        let mut swamped = TraitVector::new();
        swamped.set(PersonalityTrait::Inquisitiveness, 0.0);
        swamped.set(PersonalityTrait::Overwhelm, 100.0);
        // 0.5 - 0.2 - 0.15 = 0.15
        assert!((pipeline.complexity_score(&swamped) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn complexity_clamps_to_band() {
        let mut fixture = Fixture::new(&["general"]);
        fixture.config.acquisition.inquisitiveness_weight = 0.1;
        fixture.config.acquisition.overwhelm_weight = 0.1;
        let pipeline = fixture.pipeline();

        let mut extreme = TraitVector::new();
        extreme.set(PersonalityTrait::Inquisitiveness, 100.0);
        extreme.set(PersonalityTrait::Overwhelm, 0.0);
        assert!((pipeline.complexity_score(&extreme) - 1.0).abs() < f64::EPSILON);

        let mut inverse = TraitVector::new();
        inverse.set(PersonalityTrait::Inquisitiveness, 0.0);
        inverse.set(PersonalityTrait::Overwhelm, 100.0);
        assert!((pipeline.complexity_score(&inverse) - 0.1).abs() < f64::EPSILON);
    }
}
