//! Trait provider seam — the external personality collaborator.
//!
//! This core only *consumes* a character's trait vector; score
//! bookkeeping lives elsewhere. Unknown characters yield an empty vector
//! (not an error) so every downstream lookup degrades to its visible
//! default.

use std::collections::HashMap;

use crate::types::{CharacterId, TraitVector};

/// Supplies per-character personality trait vectors.
pub trait TraitProvider: Send + Sync {
    /// The character's trait vector. Empty for unknown characters.
    fn trait_vector(&self, character: CharacterId) -> TraitVector;
}

/// Map-backed provider for composition roots and tests.
#[derive(Debug, Default)]
pub struct StaticTraitProvider {
    vectors: HashMap<CharacterId, TraitVector>,
}

impl StaticTraitProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a character's trait vector, replacing any previous one.
    pub fn insert(&mut self, character: CharacterId, traits: TraitVector) {
        self.vectors.insert(character, traits);
    }
}

impl TraitProvider for StaticTraitProvider {
    fn trait_vector(&self, character: CharacterId) -> TraitVector {
        self.vectors.get(&character).cloned().unwrap_or_default()
    }
}
