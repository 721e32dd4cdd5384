//! Core type definitions for the lorekeep knowledge system.

use std::collections::HashMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a simulated character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    /// Create a new random character ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeId(pub Uuid);

impl KnowledgeId {
    /// Create a new random knowledge ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a knowledge domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainId(pub Uuid);

impl DomainId {
    /// Create a new random domain ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a character's fixed slot pool.
///
/// The pool is an arena of `0..pool_size` identifiers; a slot, once
/// claimed, permanently grants access to one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u8);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Acquisition Method
// ---------------------------------------------------------------------------

/// How a character came to hold a piece of knowledge.
///
/// The method modulates initial memory stability — direct instruction
/// retains better than an overheard mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    /// Explicitly taught by another character or the narrative layer.
    DirectInstruction,
    /// Learned during a conversation the character took part in.
    Conversation,
    /// Observed first-hand.
    Observation,
    /// Transferred from another character's knowledge.
    Transfer,
    /// Overheard in passing.
    Overheard,
}

impl AcquisitionMethod {
    /// Stable storage label for the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectInstruction => "direct_instruction",
            Self::Conversation => "conversation",
            Self::Observation => "observation",
            Self::Transfer => "transfer",
            Self::Overheard => "overheard",
        }
    }
}

// ---------------------------------------------------------------------------
// Personality Traits
// ---------------------------------------------------------------------------

/// The personality traits this core consumes from the external trait
/// provider. Scores are percentiles in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityTrait {
    /// Diligence and focus — slows memory decay.
    Conscientiousness,
    /// Anxiety and self-doubt — speeds memory decay.
    Neuroticism,
    /// Drive to seek out new domains.
    CuriosityDrive,
    /// Belief that abilities can grow; half of the openness proxy.
    GrowthMindset,
    /// Belief that abilities are fixed; inverted for the openness proxy.
    FixedMindset,
    /// Appetite for complex material — raises perceived complexity capacity.
    Inquisitiveness,
    /// Susceptibility to cognitive overload — lowers it.
    Overwhelm,
}

/// Result of a single trait lookup.
///
/// Missing scores degrade to the 50th percentile, but the degradation is a
/// visible branch rather than a swallowed failure, so callers can log it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraitScore {
    /// The provider supplied a score for this trait.
    Known(f64),
    /// The provider had no score; the neutral default is in effect.
    Defaulted(f64),
}

impl TraitScore {
    /// The percentile value, known or defaulted.
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::Known(v) | Self::Defaulted(v) => v,
        }
    }

    /// Whether this score fell back to the neutral default.
    #[must_use]
    pub fn is_defaulted(self) -> bool {
        matches!(self, Self::Defaulted(_))
    }
}

/// A character's trait-score vector, as returned by the external trait
/// provider. Empty for unknown characters — every lookup then defaults.
#[derive(Debug, Clone, Default)]
pub struct TraitVector(HashMap<PersonalityTrait, f64>);

/// Neutral percentile used when a trait score is missing.
const DEFAULT_PERCENTILE: f64 = 50.0;

impl TraitVector {
    /// Create an empty trait vector (all lookups default).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a trait score, clamping to [0, 100].
    pub fn set(&mut self, trait_id: PersonalityTrait, percentile: f64) {
        self.0.insert(trait_id, percentile.clamp(0.0, 100.0));
    }

    /// Look up a trait score.
    ///
    /// Returns [`TraitScore::Defaulted`] (50th percentile) when the
    /// provider supplied no score, so acquisition and slot evaluation are
    /// never blocked by an incomplete vector.
    #[must_use]
    pub fn score(&self, trait_id: PersonalityTrait) -> TraitScore {
        match self.0.get(&trait_id) {
            Some(&v) => TraitScore::Known(v),
            None => TraitScore::Defaulted(DEFAULT_PERCENTILE),
        }
    }

    /// Number of traits with known scores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector holds no known scores.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(PersonalityTrait, f64)> for TraitVector {
    fn from_iter<I: IntoIterator<Item = (PersonalityTrait, f64)>>(iter: I) -> Self {
        let mut v = Self::new();
        for (t, s) in iter {
            v.set(t, s);
        }
        v
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// A deterministic fixed-length numeric vector derived from text.
///
/// Used for near-duplicate detection during acquisition. A v1 stand-in
/// for a real semantic embedding, kept behind the
/// [`FingerprintProvider`](crate::fingerprint::FingerprintProvider) seam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint(pub Vec<f32>);

impl Fingerprint {
    /// Cosine similarity between two fingerprints.
    ///
    /// Returns 0.0 for mismatched dimensions or zero-magnitude vectors.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Dimensionality of the fingerprint.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Rank Score
// ---------------------------------------------------------------------------

/// Total-ordered wrapper for retrieval ranking scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankScore(pub OrderedFloat<f64>);

impl RankScore {
    /// Create a rank score from a raw f64.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}
