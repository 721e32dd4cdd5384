//! Retrieval bridge and review scheduler.
//!
//! Wraps the pure decay model with persisted per-character memory
//! records: computes live retrievability snapshots, advisory overdue
//! penalties, combined retrieval scores, and advances review schedules
//! with Leitner-style backoff. Also hosts the background decay pass that
//! sweeps due records and marks forgotten ones.
//!
//! Read paths degrade soft (neutral values plus a warning); write paths
//! fail loudly and atomically through the store.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::decay;
use crate::error::Result;
use crate::records::{CharacterMemoryRecord, KnowledgeItem, ReviewLogEntry};
use crate::store::KnowledgeStore;
use crate::types::{CharacterId, KnowledgeId, RankScore};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Live memory state for one (character, item) pair.
#[derive(Debug, Clone)]
pub struct RetrievabilitySnapshot {
    /// Memory stability in days.
    pub stability: f64,
    /// Perceived difficulty in [1, 10].
    pub difficulty: f64,
    /// Current recall probability in [0, 1].
    pub retrievability: f64,
    /// Completed review count.
    pub review_count: u32,
    /// Days past the scheduled review, 0 if not due.
    pub days_overdue: f64,
    /// True when the character has never reviewed this item — fresh
    /// facts start optimistic.
    pub is_new: bool,
}

/// How rusty a character should sound about overdue knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverdueSeverity {
    /// Recently due.
    Low,
    /// Due for over a week.
    Medium,
    /// Due for over two weeks.
    High,
}

/// Advisory overdue signal. Surfaced to the dialogue layer as a hint,
/// never applied to the retrieval score automatically.
#[derive(Debug, Clone, Copy)]
pub struct OverduePenalty {
    /// Penalty magnitude in [0, max_overdue_penalty].
    pub penalty: f64,
    /// Bucketed severity.
    pub severity: OverdueSeverity,
}

/// Confidence bucket derived from retrievability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Retrievability above the high threshold.
    High,
    /// Retrievability above the medium threshold.
    Medium,
    /// Everything below.
    Low,
}

/// A combined retrieval score with its components exposed.
#[derive(Debug, Clone)]
pub struct RetrievalScore {
    /// The combined, sortable total.
    pub total: RankScore,
    /// Weighted semantic-relevance contribution.
    pub semantic_component: f64,
    /// Intent-weighted retrievability contribution.
    pub retrievability_component: f64,
    /// Prior-review bonus contribution.
    pub prior_review_component: f64,
    /// Confidence bucket for the dialogue layer.
    pub confidence: Confidence,
}

/// Outcome counts of one background decay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayPassSummary {
    /// Records examined.
    pub examined: usize,
    /// Records newly marked forgotten.
    pub newly_forgotten: usize,
    /// Past-due records rescheduled.
    pub rescheduled: usize,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Review scheduler bound to a store and config.
#[derive(Debug)]
pub struct ReviewScheduler<'a> {
    store: &'a KnowledgeStore,
    config: &'a SchedulerConfig,
}

impl<'a> ReviewScheduler<'a> {
    /// Bind a scheduler to a store and configuration.
    #[must_use]
    pub fn new(store: &'a KnowledgeStore, config: &'a SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Current memory state for (character, item).
    ///
    /// No record means the item is new: default stability and an
    /// optimistic retrievability. A store failure degrades to a neutral
    /// snapshot with a warning — retrieval stays best-effort.
    #[must_use]
    pub fn retrievability_of(
        &self,
        character: CharacterId,
        item: KnowledgeId,
        now: DateTime<Utc>,
    ) -> RetrievabilitySnapshot {
        match self.store.memory_record(character, item) {
            Ok(Some(record)) => {
                let elapsed = record.days_since_review(now);
                RetrievabilitySnapshot {
                    stability: record.stability,
                    difficulty: record.difficulty,
                    retrievability: decay::retrievability(record.stability, elapsed),
                    review_count: record.review_count,
                    days_overdue: record.days_overdue(now),
                    is_new: false,
                }
            }
            Ok(None) => RetrievabilitySnapshot {
                stability: self.config.default_stability_days,
                difficulty: self.config.default_difficulty,
                retrievability: self.config.new_item_retrievability,
                review_count: 0,
                days_overdue: 0.0,
                is_new: true,
            },
            Err(e) => {
                warn!(
                    character = %character,
                    item = %item,
                    error = %e,
                    "memory record read failed, degrading to neutral retrievability"
                );
                RetrievabilitySnapshot {
                    stability: self.config.default_stability_days,
                    difficulty: self.config.default_difficulty,
                    retrievability: self.config.neutral_retrievability,
                    review_count: 0,
                    days_overdue: 0.0,
                    is_new: false,
                }
            }
        }
    }

    /// Advisory penalty for overdue knowledge: linear ramp to the cap,
    /// severity bucketed by fixed day thresholds.
    #[must_use]
    pub fn overdue_penalty(&self, days_overdue: f64) -> OverduePenalty {
        let days = days_overdue.max(0.0);
        let penalty =
            (days / self.config.overdue_cap_days).min(1.0) * self.config.max_overdue_penalty;
        let severity = if days < self.config.severity_medium_days {
            OverdueSeverity::Low
        } else if days < self.config.severity_high_days {
            OverdueSeverity::Medium
        } else {
            OverdueSeverity::High
        };
        OverduePenalty { penalty, severity }
    }

    /// Combine semantic relevance with live retrievability into a
    /// ranking score.
    ///
    /// `semantic_relevance` is normalized to [0, 1]; `intent_weight`
    /// lets the caller bias toward freshness-insensitive facts
    /// (identity) versus freshness-sensitive ones (recent events).
    #[must_use]
    pub fn score_for_retrieval(
        &self,
        semantic_relevance: f64,
        snapshot: &RetrievabilitySnapshot,
        intent_weight: f64,
    ) -> RetrievalScore {
        let semantic_component = self.config.semantic_weight * semantic_relevance.clamp(0.0, 1.0);
        let retrievability_component = intent_weight * snapshot.retrievability;
        let prior_review_component = if snapshot.review_count > 0 {
            self.config.prior_review_weight
        } else {
            0.0
        };

        let confidence = if snapshot.retrievability > self.config.high_confidence_threshold {
            Confidence::High
        } else if snapshot.retrievability > self.config.medium_confidence_threshold {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        RetrievalScore {
            total: RankScore::new(
                semantic_component + retrievability_component + prior_review_component,
            ),
            semantic_component,
            retrievability_component,
            prior_review_component,
            confidence,
        }
    }

    /// Record a successful retrieval (a review) and advance the schedule.
    ///
    /// First review creates the record with `review_count = 1` and the
    /// next review one day out; later reviews double the interval
    /// (Leitner backoff), capped at `max_interval_days`. The `grade`
    /// (1 forgot .. 4 easy) is clamped, logged to the review log, and
    /// feeds the domain-expertise bump, but does not re-estimate
    /// stability or difficulty — spacing is driven by review count
    /// alone for now.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Database`] if the transactional write
    /// fails; nothing is partially recorded.
    pub fn record_retrieval_success(
        &self,
        character: CharacterId,
        item: KnowledgeId,
        grade: u8,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let grade = if (1..=4).contains(&grade) {
            grade
        } else {
            warn!(character = %character, item = %item, grade, "review grade out of range, clamping");
            grade.clamp(1, 4)
        };

        let Some(stored_item) = self.store.item(item)? else {
            warn!(character = %character, item = %item, "review for unknown item ignored");
            return Ok(());
        };

        let previous = self.store.memory_record(character, item)?;
        let (record, previous_interval, retrievability_at_review) = match previous {
            None => {
                let record = CharacterMemoryRecord {
                    character,
                    item,
                    stability: self.config.default_stability_days,
                    difficulty: self.config.default_difficulty,
                    last_reviewed: now,
                    next_review: now + Duration::days(1),
                    review_count: 1,
                    is_forgotten: false,
                };
                (record, 0.0, self.config.new_item_retrievability)
            }
            Some(mut record) => {
                let elapsed = record.days_since_review(now);
                let retrievability = decay::retrievability(record.stability, elapsed);
                record.review_count += 1;
                let interval = self.backoff_interval_days(record.review_count);
                record.last_reviewed = now;
                record.next_review = now + days_duration(interval);
                record.is_forgotten = false;
                (record, elapsed, retrievability)
            }
        };

        let new_interval = (record.next_review - record.last_reviewed).num_seconds() as f64 / 86_400.0;
        let log = ReviewLogEntry {
            character,
            item,
            grade,
            previous_interval_days: previous_interval,
            new_interval_days: new_interval,
            retrievability_at_review,
            reviewed_at: now,
        };
        let expertise_delta = self.config.review_success_bonus * f64::from(grade) / 4.0;

        self.store
            .record_review(&record, &log, stored_item.domain, expertise_delta)?;

        debug!(
            character = %character,
            item = %item,
            review_count = record.review_count,
            next_in_days = new_interval,
            "review recorded"
        );
        Ok(())
    }

    /// A character's overdue items, most overdue first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Database`] or
    /// [`crate::LoreError::Serialization`] on store failures.
    pub fn overdue_knowledge(
        &self,
        character: CharacterId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(KnowledgeItem, CharacterMemoryRecord, OverduePenalty)>> {
        // The store orders by next_review ascending, which is exactly
        // days-overdue descending.
        let overdue = self.store.overdue_records(character, now)?;
        Ok(overdue
            .into_iter()
            .map(|(item, record)| {
                let penalty = self.overdue_penalty(record.days_overdue(now));
                (item, record, penalty)
            })
            .collect())
    }

    /// Sweep all due records: recompute retrievability, mark records
    /// below the forgetting threshold as forgotten, and reschedule
    /// past-due reviews a fallback interval out.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoreError::Database`] or
    /// [`crate::LoreError::Serialization`] on store failures.
    pub fn run_decay_pass(&self, now: DateTime<Utc>) -> Result<DecayPassSummary> {
        let due = self.store.records_due(now)?;
        let mut summary = DecayPassSummary {
            examined: due.len(),
            ..DecayPassSummary::default()
        };

        for record in due {
            let retrievability =
                decay::retrievability(record.stability, record.days_since_review(now));

            if retrievability < self.config.forgetting_threshold && !record.is_forgotten {
                self.store.mark_forgotten(record.character, record.item, true)?;
                summary.newly_forgotten += 1;
                debug!(
                    character = %record.character,
                    item = %record.item,
                    retrievability,
                    "record marked forgotten by decay pass"
                );
            }

            self.store.set_next_review(
                record.character,
                record.item,
                now + days_duration(self.config.fallback_review_interval_days),
            )?;
            summary.rescheduled += 1;
        }

        info!(
            examined = summary.examined,
            newly_forgotten = summary.newly_forgotten,
            rescheduled = summary.rescheduled,
            "decay pass complete"
        );
        Ok(summary)
    }

    /// Leitner interval for the given review count: 2^(count-1) days
    /// after the first review, capped at the configured maximum.
    fn backoff_interval_days(&self, review_count: u32) -> f64 {
        let exponent = i32::try_from(review_count.saturating_sub(1)).unwrap_or(i32::MAX).min(30);
        2.0_f64.powi(exponent).min(self.config.max_interval_days)
    }
}

/// Fractional-day duration.
fn days_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::KnowledgeDomain;
    use crate::types::{DomainId, Fingerprint};

    fn seeded_store() -> (KnowledgeStore, CharacterId, KnowledgeItem) {
        let store = KnowledgeStore::open_in_memory().expect("open");
        let domain = KnowledgeDomain::new("navigation");
        store.insert_domain(&domain).expect("domain");
        let character = CharacterId::new();
        let item = KnowledgeItem {
            id: KnowledgeId::new(),
            title: "transfer windows".to_string(),
            content: "optimal burn windows between Ceres and Pallas".to_string(),
            domain: domain.id,
            tags: vec![],
            source: "test".to_string(),
            active: true,
            created_at: Utc::now(),
            complexity: 0.5,
            fingerprint: Fingerprint(vec![0.5]),
        };
        (store, character, item)
    }

    fn insert_with_record(
        store: &KnowledgeStore,
        item: &KnowledgeItem,
        record: &CharacterMemoryRecord,
    ) {
        store.insert_item_with_record(item, record).expect("insert");
    }

    #[test]
    fn cold_start_is_new_and_optimistic() {
        let (store, character, item) = seeded_store();
        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);

        let snapshot = scheduler.retrievability_of(character, item.id, Utc::now());
        assert!(snapshot.is_new);
        assert!((snapshot.retrievability - 0.9).abs() < f64::EPSILON);
        assert_eq!(snapshot.review_count, 0);
    }

    #[test]
    fn stale_record_decays_and_goes_overdue() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        let record = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(10),
            next_review: now - Duration::days(5),
            review_count: 2,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &record);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        let snapshot = scheduler.retrievability_of(character, item.id, now);

        assert!(!snapshot.is_new);
        // stability 5, elapsed 10 → e^-2
        assert!((snapshot.retrievability - (-2.0_f64).exp()).abs() < 0.001);
        assert!(snapshot.days_overdue > 4.9);
    }

    #[test]
    fn penalty_ramps_linearly_and_caps() {
        let (store, _, _) = seeded_store();
        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);

        let at_zero = scheduler.overdue_penalty(0.0);
        assert_eq!(at_zero.penalty, 0.0);
        assert_eq!(at_zero.severity, OverdueSeverity::Low);

        let at_half = scheduler.overdue_penalty(15.0);
        assert!((at_half.penalty - 0.2).abs() < 1e-9);
        assert_eq!(at_half.severity, OverdueSeverity::High);

        let past_cap = scheduler.overdue_penalty(500.0);
        assert!((past_cap.penalty - config.max_overdue_penalty).abs() < 1e-9);
    }

    #[test]
    fn severity_buckets_by_thresholds() {
        let (store, _, _) = seeded_store();
        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        assert_eq!(scheduler.overdue_penalty(3.0).severity, OverdueSeverity::Low);
        assert_eq!(scheduler.overdue_penalty(10.0).severity, OverdueSeverity::Medium);
        assert_eq!(scheduler.overdue_penalty(20.0).severity, OverdueSeverity::High);
    }

    #[test]
    fn retrieval_score_combines_components() {
        let (store, _, _) = seeded_store();
        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);

        let snapshot = RetrievabilitySnapshot {
            stability: 5.0,
            difficulty: 5.0,
            retrievability: 0.8,
            review_count: 3,
            days_overdue: 0.0,
            is_new: false,
        };
        let score = scheduler.score_for_retrieval(0.75, &snapshot, 0.5);
        // 0.4*0.75 + 0.5*0.8 + 0.1 = 0.8
        assert!((score.total.value() - 0.8).abs() < 1e-9);
        assert_eq!(score.confidence, Confidence::High);

        let unreviewed = RetrievabilitySnapshot {
            review_count: 0,
            retrievability: 0.3,
            ..snapshot
        };
        let score = scheduler.score_for_retrieval(0.75, &unreviewed, 0.5);
        assert_eq!(score.prior_review_component, 0.0);
        assert_eq!(score.confidence, Confidence::Low);
    }

    #[test]
    fn first_review_creates_record_one_day_out() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        // Item exists but the character has no record yet.
        let other = CharacterId::new();
        let seed = CharacterMemoryRecord {
            character: other,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now,
            next_review: now + Duration::days(1),
            review_count: 0,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &seed);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        scheduler
            .record_retrieval_success(character, item.id, 3, now)
            .expect("review");

        let record = store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        assert_eq!(record.review_count, 1);
        assert_eq!(record.next_review, now + Duration::days(1));
    }

    #[test]
    fn later_reviews_double_the_interval() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        let seed = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(2),
            next_review: now - Duration::days(1),
            review_count: 2,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &seed);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        scheduler
            .record_retrieval_success(character, item.id, 4, now)
            .expect("review");

        let record = store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        assert_eq!(record.review_count, 3);
        // 2^(3-1) = 4 days
        let interval = (record.next_review - record.last_reviewed).num_days();
        assert_eq!(interval, 4);
        assert!(!record.is_forgotten);
    }

    #[test]
    fn interval_caps_at_configured_maximum() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        let seed = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(1),
            next_review: now,
            review_count: 20,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &seed);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        scheduler
            .record_retrieval_success(character, item.id, 4, now)
            .expect("review");

        let record = store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        let interval = (record.next_review - record.last_reviewed).num_days();
        assert_eq!(interval, config.max_interval_days as i64);
    }

    #[test]
    fn review_of_unknown_item_is_ignored() {
        let (store, character, _) = seeded_store();
        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        scheduler
            .record_retrieval_success(character, KnowledgeId::new(), 3, Utc::now())
            .expect("must not error");
    }

    #[test]
    fn review_bumps_domain_expertise() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        let seed = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now,
            next_review: now + Duration::days(1),
            review_count: 0,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &seed);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        scheduler
            .record_retrieval_success(character, item.id, 4, now)
            .expect("review");

        let level = store
            .domain_expertise(character, item.domain)
            .expect("expertise");
        // grade 4 of 4 → full review_success_bonus
        assert!((level - config.review_success_bonus).abs() < 1e-9);
    }

    #[test]
    fn overdue_knowledge_most_overdue_first() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        let record = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(20),
            next_review: now - Duration::days(15),
            review_count: 1,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &record);

        let second = KnowledgeItem {
            id: KnowledgeId::new(),
            title: "fuel depots".to_string(),
            content: "registered depots along the inner belt".to_string(),
            domain: item.domain,
            tags: vec![],
            source: "test".to_string(),
            active: true,
            created_at: now,
            complexity: 0.5,
            fingerprint: Fingerprint(vec![0.5]),
        };
        let second_record = CharacterMemoryRecord {
            character,
            item: second.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(4),
            next_review: now - Duration::days(2),
            review_count: 1,
            is_forgotten: false,
        };
        insert_with_record(&store, &second, &second_record);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        let overdue = scheduler.overdue_knowledge(character, now).expect("overdue");
        assert_eq!(overdue.len(), 2);
        assert_eq!(overdue[0].0.id, item.id);
        assert_eq!(overdue[0].2.severity, OverdueSeverity::High);
        assert_eq!(overdue[1].2.severity, OverdueSeverity::Low);
    }

    #[test]
    fn decay_pass_marks_forgotten_and_reschedules() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        // 30 days elapsed at stability 5 → e^-6 ≈ 0.0025, far below 0.2.
        let record = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 5.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(30),
            next_review: now - Duration::days(25),
            review_count: 1,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &record);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        let summary = scheduler.run_decay_pass(now).expect("pass");
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.newly_forgotten, 1);
        assert_eq!(summary.rescheduled, 1);

        let updated = store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        assert!(updated.is_forgotten);
        assert!(updated.next_review > now);
    }

    #[test]
    fn decay_pass_spares_fresh_records() {
        let (store, character, item) = seeded_store();
        let now = Utc::now();
        // Barely overdue, retrievability still high.
        let record = CharacterMemoryRecord {
            character,
            item: item.id,
            stability: 20.0,
            difficulty: 5.0,
            last_reviewed: now - Duration::days(2),
            next_review: now - Duration::hours(1),
            review_count: 1,
            is_forgotten: false,
        };
        insert_with_record(&store, &item, &record);

        let config = SchedulerConfig::default();
        let scheduler = ReviewScheduler::new(&store, &config);
        let summary = scheduler.run_decay_pass(now).expect("pass");
        assert_eq!(summary.newly_forgotten, 0);
        assert_eq!(summary.rescheduled, 1);

        let updated = store
            .memory_record(character, item.id)
            .expect("load")
            .expect("Some");
        assert!(!updated.is_forgotten);
    }
}
