//! Text fingerprinting abstraction.
//!
//! Provides a trait-based seam for turning candidate text into a
//! fixed-length numeric vector used by the acquisition pipeline for
//! near-duplicate detection. The default implementation hashes tokens
//! into a fixed number of buckets — a deliberately simple v1 that can be
//! swapped for a real embedding model without touching the decay model
//! or the retrieval bridge.

use crate::error::Result;
use crate::types::Fingerprint;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Derive fingerprints from text.
///
/// Implementations must be `Send + Sync` so an engine handle can be
/// shared across request-scoped callers.
pub trait FingerprintProvider: Send + Sync {
    /// Fingerprint a single text string.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model fails; the hashed default
    /// is infallible.
    fn fingerprint(&self, text: &str) -> Result<Fingerprint>;

    /// The dimensionality of fingerprints produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable provider name.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Hashed provider (default)
// ---------------------------------------------------------------------------

/// Deterministic token-hashing fingerprint provider.
///
/// Each lowercased alphanumeric token is hashed with FNV-1a; the hash
/// picks a bucket and a sign, and the resulting count vector is
/// L2-normalized. Identical text always yields an identical fingerprint,
/// which is what dedup needs; nothing semantic is implied.
pub struct HashedFingerprintProvider {
    dims: usize,
}

/// Default fingerprint dimensionality.
pub const DEFAULT_FINGERPRINT_DIMS: usize = 128;

impl HashedFingerprintProvider {
    /// Create a provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }
}

impl Default for HashedFingerprintProvider {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_DIMS)
    }
}

/// FNV-1a 64-bit. Hand-rolled to keep fingerprints stable across std
/// hasher changes, since they are persisted.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

impl FingerprintProvider for HashedFingerprintProvider {
    fn fingerprint(&self, text: &str) -> Result<Fingerprint> {
        let mut buckets = vec![0.0_f32; self.dims];

        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dims as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            buckets[index] += sign;
        }

        // L2-normalize; all-empty text stays a zero vector.
        let magnitude: f32 = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude >= f32::EPSILON {
            for v in &mut buckets {
                *v /= magnitude;
            }
        }

        Ok(Fingerprint(buckets))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "hashed-token-v1"
    }
}

// ---------------------------------------------------------------------------
// Stub provider (tests)
// ---------------------------------------------------------------------------

/// A stub provider that returns zero vectors. For unit tests that don't
/// care about similarity values.
pub struct StubFingerprintProvider {
    dims: usize,
}

impl StubFingerprintProvider {
    /// Create a stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubFingerprintProvider {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_DIMS)
    }
}

impl FingerprintProvider for StubFingerprintProvider {
    fn fingerprint(&self, _text: &str) -> Result<Fingerprint> {
        Ok(Fingerprint(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "stub-zero-vector"
    }
}
