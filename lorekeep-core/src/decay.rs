//! Exponential forgetting curve — the memory decay model.
//!
//! Retrievability decays as:
//!   R = e^(-t/S)
//!
//! Where:
//!   R = retrievability (0.0 = forgotten, 1.0 = perfect recall)
//!   t = days since the last review
//!   S = stability (days; higher S = slower decay)
//!
//! Both functions here are pure and total: invalid inputs return the
//! 0.0 sentinel instead of failing, because decay math must never fail
//! its caller. Trait influence is isolated to [`decay_rate_factor`],
//! which scales the *initial* stability assigned at acquisition time —
//! it never touches the exponential itself.

use tracing::debug;

use crate::config::DecayConfig;
use crate::types::{AcquisitionMethod, PersonalityTrait, TraitVector};

/// Probability that a memory can currently be recalled.
///
/// Clamped to [0, 1]. Returns 0.0 for non-positive stability or negative
/// elapsed time rather than raising.
#[must_use]
pub fn retrievability(stability_days: f64, elapsed_days: f64) -> f64 {
    if stability_days <= 0.0 || elapsed_days < 0.0 {
        return 0.0;
    }
    (-elapsed_days / stability_days).exp().clamp(0.0, 1.0)
}

/// Trait- and method-weighted decay-rate factor.
///
/// Starts at 1.0, then:
/// - conscientiousness slows decay: ×(1 + c/100 · bonus_weight)
/// - neuroticism speeds it: ×(1 − n/100 · penalty_weight)
/// - the acquisition method applies its own multiplier (direct
///   instruction retains better than an overheard mention)
///
/// The result is clamped to the configured [min, max] band regardless of
/// how extreme the trait inputs are.
#[must_use]
pub fn decay_rate_factor(
    traits: &TraitVector,
    method: AcquisitionMethod,
    config: &DecayConfig,
) -> f64 {
    let conscientiousness = traits.score(PersonalityTrait::Conscientiousness);
    let neuroticism = traits.score(PersonalityTrait::Neuroticism);

    if conscientiousness.is_defaulted() || neuroticism.is_defaulted() {
        debug!(
            conscientiousness_defaulted = conscientiousness.is_defaulted(),
            neuroticism_defaulted = neuroticism.is_defaulted(),
            "decay factor using defaulted trait scores"
        );
    }

    let mut factor = 1.0;
    factor *= 1.0 + conscientiousness.value() / 100.0 * config.conscientiousness_bonus;
    factor *= 1.0 - neuroticism.value() / 100.0 * config.neuroticism_penalty;
    factor *= config.method_bonus(method);

    factor.clamp(config.min_factor, config.max_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_memory_is_fully_retrievable() {
        assert!((retrievability(10.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((retrievability(0.001, 0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn retrievability_decays_toward_zero() {
        let r1 = retrievability(5.0, 1.0);
        let r10 = retrievability(5.0, 10.0);
        let r1000 = retrievability(5.0, 1000.0);
        assert!(r1 > r10);
        assert!(r10 > r1000);
        assert!(r1000 < 1e-6);
    }

    #[test]
    fn staleness_matches_exponential() {
        // stability 5 days, last reviewed 10 days ago → e^(-2)
        let r = retrievability(5.0, 10.0);
        assert!((r - (-2.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn invalid_inputs_return_sentinel() {
        assert_eq!(retrievability(0.0, 5.0), 0.0);
        assert_eq!(retrievability(-3.0, 5.0), 0.0);
        assert_eq!(retrievability(5.0, -1.0), 0.0);
    }

    #[test]
    fn stabler_memories_retain_more() {
        let weak = retrievability(2.0, 10.0);
        let strong = retrievability(20.0, 10.0);
        assert!(strong > weak);
    }

    #[test]
    fn conscientious_characters_decay_slower() {
        let config = DecayConfig::default();
        let mut diligent = TraitVector::new();
        diligent.set(PersonalityTrait::Conscientiousness, 90.0);
        diligent.set(PersonalityTrait::Neuroticism, 10.0);

        let mut anxious = TraitVector::new();
        anxious.set(PersonalityTrait::Conscientiousness, 10.0);
        anxious.set(PersonalityTrait::Neuroticism, 90.0);

        let f_diligent =
            decay_rate_factor(&diligent, AcquisitionMethod::Conversation, &config);
        let f_anxious = decay_rate_factor(&anxious, AcquisitionMethod::Conversation, &config);
        assert!(f_diligent > f_anxious);
    }

    #[test]
    fn direct_instruction_beats_overheard() {
        let config = DecayConfig::default();
        let traits = TraitVector::new();
        let f_taught =
            decay_rate_factor(&traits, AcquisitionMethod::DirectInstruction, &config);
        let f_overheard = decay_rate_factor(&traits, AcquisitionMethod::Overheard, &config);
        assert!(f_taught > f_overheard);
    }

    #[test]
    fn factor_stays_in_band_at_extremes() {
        let config = DecayConfig::default();
        for (c, n) in [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)] {
            let mut traits = TraitVector::new();
            traits.set(PersonalityTrait::Conscientiousness, c);
            traits.set(PersonalityTrait::Neuroticism, n);
            for method in [
                AcquisitionMethod::DirectInstruction,
                AcquisitionMethod::Conversation,
                AcquisitionMethod::Observation,
                AcquisitionMethod::Transfer,
                AcquisitionMethod::Overheard,
            ] {
                let f = decay_rate_factor(&traits, method, &config);
                assert!(f >= config.min_factor && f <= config.max_factor);
            }
        }
    }

    #[test]
    fn empty_trait_vector_uses_defaults() {
        let config = DecayConfig::default();
        let f = decay_rate_factor(&TraitVector::new(), AcquisitionMethod::Conversation, &config);
        // 50th-percentile defaults: (1 + 0.5*0.3)(1 - 0.5*0.2) = 1.035
        assert!((f - 1.035).abs() < 1e-9);
    }
}
