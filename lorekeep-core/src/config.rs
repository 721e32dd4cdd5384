//! Configuration for the lorekeep knowledge system.
//!
//! Maps directly to `lorekeep.toml`. Every field has a serde default so a
//! partial file (or none at all) yields a working configuration. Weighting
//! constants are checked once by [`LoreConfig::validate`] at startup —
//! invalid config fails fast, never per request.

use serde::{Deserialize, Serialize};

use crate::error::{LoreError, Result};
use crate::types::AcquisitionMethod;

/// Top-level lorekeep configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreConfig {
    /// Forgetting-curve and trait-modulation settings.
    #[serde(default)]
    pub decay: DecayConfig,
    /// Review scheduling and retrieval-scoring settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Acquisition pipeline settings.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Relevance search settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Domain slot allocator settings.
    #[serde(default)]
    pub slots: SlotConfig,
    /// Persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl LoreConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`LoreError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| LoreError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check weighting constants once at startup.
    ///
    /// # Errors
    /// Returns [`LoreError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let d = &self.decay;
        if d.min_factor <= 0.0 || d.min_factor > d.max_factor {
            return Err(LoreError::Config(format!(
                "decay factor band [{}, {}] is invalid",
                d.min_factor, d.max_factor
            )));
        }
        if self.scheduler.default_stability_days <= 0.0 {
            return Err(LoreError::Config(
                "scheduler.default_stability_days must be positive".to_string(),
            ));
        }
        if !(1.0..=10.0).contains(&self.scheduler.default_difficulty) {
            return Err(LoreError::Config(
                "scheduler.default_difficulty must be in [1, 10]".to_string(),
            ));
        }
        if self.scheduler.overdue_cap_days <= 0.0 {
            return Err(LoreError::Config(
                "scheduler.overdue_cap_days must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.acquisition.dedup_threshold) {
            return Err(LoreError::Config(
                "acquisition.dedup_threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.acquisition.classify_threshold) {
            return Err(LoreError::Config(
                "acquisition.classify_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.slots.pool_size == 0 {
            return Err(LoreError::Config("slots.pool_size must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.slots.interest_threshold) {
            return Err(LoreError::Config(
                "slots.interest_threshold must be in [0, 100]".to_string(),
            ));
        }
        let w = self.slots.expertise_weight + self.slots.curiosity_weight + self.slots.openness_weight;
        if w <= 0.0 {
            return Err(LoreError::Config(
                "slot interest weights must not all be zero".to_string(),
            ));
        }
        if self.search.candidate_cap == 0 || self.search.fallback_count == 0 {
            return Err(LoreError::Config(
                "search result caps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Forgetting-curve modulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Conscientiousness bonus weight — slows decay.
    #[serde(default = "default_0_3")]
    pub conscientiousness_bonus: f64,
    /// Neuroticism penalty weight — speeds decay.
    #[serde(default = "default_0_2")]
    pub neuroticism_penalty: f64,
    /// Lower bound of the decay-rate factor band.
    #[serde(default = "default_0_5")]
    pub min_factor: f64,
    /// Upper bound of the decay-rate factor band.
    #[serde(default = "default_2_0")]
    pub max_factor: f64,
    /// Stability multiplier for directly instructed knowledge.
    #[serde(default = "default_1_2")]
    pub direct_instruction_bonus: f64,
    /// Stability multiplier for conversational knowledge.
    #[serde(default = "default_1_0")]
    pub conversation_bonus: f64,
    /// Stability multiplier for observed knowledge.
    #[serde(default = "default_0_95")]
    pub observation_bonus: f64,
    /// Stability multiplier for transferred knowledge.
    #[serde(default = "default_0_9")]
    pub transfer_bonus: f64,
    /// Stability multiplier for overheard knowledge.
    #[serde(default = "default_0_8")]
    pub overheard_bonus: f64,
}

impl DecayConfig {
    /// Per-method stability bonus.
    #[must_use]
    pub fn method_bonus(&self, method: AcquisitionMethod) -> f64 {
        match method {
            AcquisitionMethod::DirectInstruction => self.direct_instruction_bonus,
            AcquisitionMethod::Conversation => self.conversation_bonus,
            AcquisitionMethod::Observation => self.observation_bonus,
            AcquisitionMethod::Transfer => self.transfer_bonus,
            AcquisitionMethod::Overheard => self.overheard_bonus,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            conscientiousness_bonus: 0.3,
            neuroticism_penalty: 0.2,
            min_factor: 0.5,
            max_factor: 2.0,
            direct_instruction_bonus: 1.2,
            conversation_bonus: 1.0,
            observation_bonus: 0.95,
            transfer_bonus: 0.9,
            overheard_bonus: 0.8,
        }
    }
}

/// Review scheduling and retrieval-scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Stability (days) assigned before trait modulation.
    #[serde(default = "default_5_0")]
    pub default_stability_days: f64,
    /// Difficulty assigned to new memory records.
    #[serde(default = "default_5_0")]
    pub default_difficulty: f64,
    /// Retrievability reported for never-reviewed items.
    #[serde(default = "default_0_9")]
    pub new_item_retrievability: f64,
    /// Retrievability reported when the store is unavailable.
    #[serde(default = "default_0_5")]
    pub neutral_retrievability: f64,
    /// Days at which the overdue penalty stops growing.
    #[serde(default = "default_30_0")]
    pub overdue_cap_days: f64,
    /// Penalty at the cap.
    #[serde(default = "default_0_4")]
    pub max_overdue_penalty: f64,
    /// Days-overdue boundary between low and medium severity.
    #[serde(default = "default_7_0")]
    pub severity_medium_days: f64,
    /// Days-overdue boundary between medium and high severity.
    #[serde(default = "default_14_0")]
    pub severity_high_days: f64,
    /// Weight of semantic relevance in the combined retrieval score.
    #[serde(default = "default_0_4")]
    pub semantic_weight: f64,
    /// Weight of the has-prior-review bonus.
    #[serde(default = "default_0_1")]
    pub prior_review_weight: f64,
    /// Default intent weight applied to retrievability when the caller
    /// expresses no preference.
    #[serde(default = "default_0_5")]
    pub default_intent_weight: f64,
    /// Retrievability above which confidence is reported high.
    #[serde(default = "default_0_7")]
    pub high_confidence_threshold: f64,
    /// Retrievability above which confidence is reported medium.
    #[serde(default = "default_0_4")]
    pub medium_confidence_threshold: f64,
    /// Retrievability below which the decay pass marks a record forgotten.
    #[serde(default = "default_0_2")]
    pub forgetting_threshold: f64,
    /// Interval (days) used when the decay pass reschedules a missed review.
    #[serde(default = "default_1_0")]
    pub fallback_review_interval_days: f64,
    /// Hard cap on any scheduled review interval.
    #[serde(default = "default_365_0")]
    pub max_interval_days: f64,
    /// Domain expertise gained by a grade-4 review.
    #[serde(default = "default_2_0")]
    pub review_success_bonus: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_stability_days: 5.0,
            default_difficulty: 5.0,
            new_item_retrievability: 0.9,
            neutral_retrievability: 0.5,
            overdue_cap_days: 30.0,
            max_overdue_penalty: 0.4,
            severity_medium_days: 7.0,
            severity_high_days: 14.0,
            semantic_weight: 0.4,
            prior_review_weight: 0.1,
            default_intent_weight: 0.5,
            high_confidence_threshold: 0.7,
            medium_confidence_threshold: 0.4,
            forgetting_threshold: 0.2,
            fallback_review_interval_days: 1.0,
            max_interval_days: 365.0,
            review_success_bonus: 2.0,
        }
    }
}

/// Acquisition pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Cosine similarity at or above which a candidate reuses an existing item.
    #[serde(default = "default_0_82")]
    pub dedup_threshold: f32,
    /// Keyword-overlap score a domain must beat to win classification.
    #[serde(default = "default_0_6")]
    pub classify_threshold: f64,
    /// Domain labels tried, in order, when no domain scores above the
    /// classification threshold.
    #[serde(default)]
    pub fallback_domains: Vec<String>,
    /// Complexity gained per inquisitiveness percentile above 50.
    #[serde(default = "default_0_004")]
    pub inquisitiveness_weight: f64,
    /// Complexity lost per overwhelm percentile above 50.
    #[serde(default = "default_0_003")]
    pub overwhelm_weight: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.82,
            classify_threshold: 0.6,
            fallback_domains: Vec::new(),
            inquisitiveness_weight: 0.004,
            overwhelm_weight: 0.003,
        }
    }
}

/// Relevance search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum candidates pulled by the primary search, bounding scoring cost.
    #[serde(default = "default_50")]
    pub candidate_cap: usize,
    /// Result count for the single-keyword fallback search.
    #[serde(default = "default_3")]
    pub fallback_count: usize,
    /// Scores below this floor are dropped from the ranking.
    #[serde(default = "default_20")]
    pub score_floor: u32,
    /// Flat score assigned to fallback-search hits.
    #[serde(default = "default_50_u32")]
    pub fallback_score: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_cap: 50,
            fallback_count: 3,
            score_floor: 20,
            fallback_score: 50,
        }
    }
}

/// Domain slot allocator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Fixed number of knowledge slots per character.
    #[serde(default = "default_5_u8")]
    pub pool_size: u8,
    /// Interest score a domain must reach to claim a slot.
    #[serde(default = "default_60_0")]
    pub interest_threshold: f64,
    /// Weight of domain expertise in the interest score.
    #[serde(default = "default_0_5")]
    pub expertise_weight: f64,
    /// Weight of curiosity drive in the interest score.
    #[serde(default = "default_0_3")]
    pub curiosity_weight: f64,
    /// Weight of the openness proxy in the interest score.
    #[serde(default = "default_0_2")]
    pub openness_weight: f64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            interest_threshold: 60.0,
            expertise_weight: 0.5,
            curiosity_weight: 0.3,
            openness_weight: 0.2,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_5000")]
    pub busy_timeout_ms: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_0_004() -> f64 { 0.004 }
fn default_0_003() -> f64 { 0.003 }
fn default_0_1() -> f64 { 0.1 }
fn default_0_2() -> f64 { 0.2 }
fn default_0_3() -> f64 { 0.3 }
fn default_0_4() -> f64 { 0.4 }
fn default_0_5() -> f64 { 0.5 }
fn default_0_6() -> f64 { 0.6 }
fn default_0_7() -> f64 { 0.7 }
fn default_0_8() -> f64 { 0.8 }
fn default_0_82() -> f32 { 0.82 }
fn default_0_9() -> f64 { 0.9 }
fn default_0_95() -> f64 { 0.95 }
fn default_1_0() -> f64 { 1.0 }
fn default_1_2() -> f64 { 1.2 }
fn default_2_0() -> f64 { 2.0 }
fn default_5_0() -> f64 { 5.0 }
fn default_7_0() -> f64 { 7.0 }
fn default_14_0() -> f64 { 14.0 }
fn default_30_0() -> f64 { 30.0 }
fn default_60_0() -> f64 { 60.0 }
fn default_365_0() -> f64 { 365.0 }
fn default_3() -> usize { 3 }
fn default_20() -> u32 { 20 }
fn default_50() -> usize { 50 }
fn default_50_u32() -> u32 { 50 }
fn default_5_u8() -> u8 { 5 }
fn default_5000() -> u32 { 5000 }
