//! Weight calculation for memory retention
//!
//! Pure functions computing the initial weight of a record, its decay while
//! unaccessed, and its reinforcement on recall. Callers persist the results.
//!
//! Every function clamps into `[min_weight, 1.0]`. The floor is what keeps a
//! record addressable forever: decay approaches it but never crosses it.

use serde::{Deserialize, Serialize};

/// Configuration for weight calculation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Weight floor; never reached by decay from above, never crossed (default: 0.001)
    #[serde(default = "default_min_weight")]
    pub min_weight: f32,
    /// Multiplicative decay per day without access (default: 0.95)
    #[serde(default = "default_decay_rate_per_day")]
    pub decay_rate_per_day: f32,
    /// Multiplicative boost applied on recall, must exceed 1.0 (default: 1.2)
    #[serde(default = "default_boost_factor")]
    pub boost_factor: f32,
    /// Starting point of the initial weight sum (default: 0.5)
    #[serde(default = "default_base")]
    pub base: f32,
    /// Multiplier for importance (default: 0.3)
    #[serde(default = "default_importance_multiplier")]
    pub importance_multiplier: f32,
    /// Cap on the importance contribution (default: 0.3)
    #[serde(default = "default_importance_cap")]
    pub importance_cap: f32,
    /// Multiplier for emotional significance (default: 0.2)
    #[serde(default = "default_emotional_multiplier")]
    pub emotional_multiplier: f32,
    /// Cap on the emotional contribution (default: 0.2)
    #[serde(default = "default_emotional_cap")]
    pub emotional_cap: f32,
    /// Flat boost for urgent or critical context (default: 0.2)
    #[serde(default = "default_urgency_boost")]
    pub urgency_boost: f32,
    /// Contribution per 1000 characters of content (default: 0.1)
    #[serde(default = "default_length_per_kchar")]
    pub length_per_kchar: f32,
    /// Cap on the length contribution (default: 0.1)
    #[serde(default = "default_length_cap")]
    pub length_cap: f32,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            min_weight: default_min_weight(),
            decay_rate_per_day: default_decay_rate_per_day(),
            boost_factor: default_boost_factor(),
            base: default_base(),
            importance_multiplier: default_importance_multiplier(),
            importance_cap: default_importance_cap(),
            emotional_multiplier: default_emotional_multiplier(),
            emotional_cap: default_emotional_cap(),
            urgency_boost: default_urgency_boost(),
            length_per_kchar: default_length_per_kchar(),
            length_cap: default_length_cap(),
        }
    }
}

fn default_min_weight() -> f32 {
    0.001
}

fn default_decay_rate_per_day() -> f32 {
    0.95
}

fn default_boost_factor() -> f32 {
    1.2
}

fn default_base() -> f32 {
    0.5
}

fn default_importance_multiplier() -> f32 {
    0.3
}

fn default_importance_cap() -> f32 {
    0.3
}

fn default_emotional_multiplier() -> f32 {
    0.2
}

fn default_emotional_cap() -> f32 {
    0.2
}

fn default_urgency_boost() -> f32 {
    0.2
}

fn default_length_per_kchar() -> f32 {
    0.1
}

fn default_length_cap() -> f32 {
    0.1
}

impl WeightConfig {
    /// Check the invariants the pure functions rely on
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.min_weight > 0.0 && self.min_weight < 1.0) {
            return Err(crate::error::EideticError::Config(format!(
                "min_weight must be in (0, 1), got {}",
                self.min_weight
            )));
        }
        if !(self.decay_rate_per_day > 0.0 && self.decay_rate_per_day < 1.0) {
            return Err(crate::error::EideticError::Config(format!(
                "decay_rate_per_day must be in (0, 1), got {}",
                self.decay_rate_per_day
            )));
        }
        if self.boost_factor <= 1.0 {
            return Err(crate::error::EideticError::Config(format!(
                "boost_factor must exceed 1.0, got {}",
                self.boost_factor
            )));
        }
        Ok(())
    }

    /// Clamp a weight into `[min_weight, 1.0]`
    pub fn clamp(&self, weight: f32) -> f32 {
        if weight.is_nan() {
            return self.min_weight;
        }
        weight.clamp(self.min_weight, 1.0)
    }
}

/// Inputs to the initial weight of a new record
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightInputs {
    pub importance: f32,
    pub emotional_weight: f32,
    pub content_length: usize,
    pub urgent: bool,
}

/// Calculate the initial weight for a new record
///
/// Weighted sum of factors, each contribution clamped to `[0, cap]`
/// independently, then the total clamped to `[min_weight, 1.0]`.
pub fn initial_weight(inputs: &WeightInputs, config: &WeightConfig) -> f32 {
    let importance = (inputs.importance.clamp(0.0, 1.0) * config.importance_multiplier)
        .clamp(0.0, config.importance_cap);
    let emotional = (inputs.emotional_weight.clamp(0.0, 1.0) * config.emotional_multiplier)
        .clamp(0.0, config.emotional_cap);
    let urgency = if inputs.urgent {
        config.urgency_boost.max(0.0)
    } else {
        0.0
    };
    let length = (inputs.content_length as f32 / 1000.0 * config.length_per_kchar)
        .clamp(0.0, config.length_cap);

    config.clamp(config.base.max(0.0) + importance + emotional + urgency + length)
}

/// Reinforce a weight on access: `min(1.0, weight * boost_factor)`
pub fn reinforce(weight: f32, boost_factor: f32, config: &WeightConfig) -> f32 {
    config.clamp(weight * boost_factor.max(1.0))
}

/// Decay a weight: `max(min_weight, weight * rate^(hours / 24))`
///
/// Negative elapsed time is treated as zero.
pub fn decay(weight: f32, hours_since_access: f64, decay_rate_per_day: f32, config: &WeightConfig) -> f32 {
    let hours = hours_since_access.max(0.0);
    let factor = (decay_rate_per_day as f64).powf(hours / 24.0);
    config.clamp((weight as f64 * factor) as f32)
}

/// Ordered retention band derived from a weight
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WeightCategory {
    Dormant,
    Subconscious,
    EffortRequired,
    EasyRecall,
    Conscious,
}

impl WeightCategory {
    pub const ALL: [WeightCategory; 5] = [
        WeightCategory::Conscious,
        WeightCategory::EasyRecall,
        WeightCategory::EffortRequired,
        WeightCategory::Subconscious,
        WeightCategory::Dormant,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WeightCategory::Conscious => "conscious",
            WeightCategory::EasyRecall => "easy_recall",
            WeightCategory::EffortRequired => "effort_required",
            WeightCategory::Subconscious => "subconscious",
            WeightCategory::Dormant => "dormant",
        }
    }
}

/// Lower bounds of the weight bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBands {
    #[serde(default = "default_conscious")]
    pub conscious: f32,
    #[serde(default = "default_easy_recall")]
    pub easy_recall: f32,
    #[serde(default = "default_effort_required")]
    pub effort_required: f32,
    #[serde(default = "default_subconscious")]
    pub subconscious: f32,
}

impl Default for WeightBands {
    fn default() -> Self {
        Self {
            conscious: default_conscious(),
            easy_recall: default_easy_recall(),
            effort_required: default_effort_required(),
            subconscious: default_subconscious(),
        }
    }
}

fn default_conscious() -> f32 {
    0.8
}

fn default_easy_recall() -> f32 {
    0.5
}

fn default_effort_required() -> f32 {
    0.2
}

fn default_subconscious() -> f32 {
    0.05
}

impl WeightBands {
    pub fn categorize(&self, weight: f32) -> WeightCategory {
        if weight >= self.conscious {
            WeightCategory::Conscious
        } else if weight >= self.easy_recall {
            WeightCategory::EasyRecall
        } else if weight >= self.effort_required {
            WeightCategory::EffortRequired
        } else if weight >= self.subconscious {
            WeightCategory::Subconscious
        } else {
            WeightCategory::Dormant
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(importance: f32, emotional: f32, len: usize, urgent: bool) -> WeightInputs {
        WeightInputs {
            importance,
            emotional_weight: emotional,
            content_length: len,
            urgent,
        }
    }

    mod config {
        use super::*;

        #[test]
        fn test_default_config() {
            let config = WeightConfig::default();
            assert_eq!(config.min_weight, 0.001);
            assert_eq!(config.decay_rate_per_day, 0.95);
            assert_eq!(config.boost_factor, 1.2);
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_validate_rejects_bad_values() {
            let zero_floor = WeightConfig {
                min_weight: 0.0,
                ..Default::default()
            };
            assert!(zero_floor.validate().is_err());

            let no_boost = WeightConfig {
                boost_factor: 1.0,
                ..Default::default()
            };
            assert!(no_boost.validate().is_err());

            let growing = WeightConfig {
                decay_rate_per_day: 1.1,
                ..Default::default()
            };
            assert!(growing.validate().is_err());
        }

        #[test]
        fn test_clamp_handles_nan() {
            let config = WeightConfig::default();
            assert_eq!(config.clamp(f32::NAN), config.min_weight);
            assert_eq!(config.clamp(2.0), 1.0);
            assert_eq!(config.clamp(-1.0), config.min_weight);
        }
    }

    mod initial {
        use super::*;

        #[test]
        fn test_urgent_content_starts_high() {
            let config = WeightConfig::default();
            let weight = initial_weight(&inputs(0.5, 0.0, 40, true), &config);
            assert!(weight >= 0.8, "urgent weight was {weight}");
        }

        #[test]
        fn test_each_factor_raises_weight() {
            let config = WeightConfig::default();
            let baseline = initial_weight(&inputs(0.0, 0.0, 0, false), &config);
            assert!(initial_weight(&inputs(0.8, 0.0, 0, false), &config) > baseline);
            assert!(initial_weight(&inputs(0.0, 0.8, 0, false), &config) > baseline);
            assert!(initial_weight(&inputs(0.0, 0.0, 500, false), &config) > baseline);
            assert!(initial_weight(&inputs(0.0, 0.0, 0, true), &config) > baseline);
        }

        #[test]
        fn test_contributions_are_capped() {
            let config = WeightConfig::default();
            let long = initial_weight(&inputs(0.0, 0.0, 1_000_000, false), &config);
            assert!((long - (config.base + config.length_cap)).abs() < 1e-6);

            let out_of_range = initial_weight(&inputs(5.0, -3.0, 0, false), &config);
            assert!((out_of_range - (config.base + config.importance_cap)).abs() < 1e-6);
        }

        #[test]
        fn test_total_is_clamped() {
            let config = WeightConfig {
                base: 0.9,
                ..Default::default()
            };
            let weight = initial_weight(&inputs(1.0, 1.0, 10_000, true), &config);
            assert_eq!(weight, 1.0);
        }
    }

    mod decay_and_reinforce {
        use super::*;

        #[test]
        fn test_decay_one_day() {
            let config = WeightConfig::default();
            let w = decay(0.8, 24.0, 0.95, &config);
            assert!((w - 0.76).abs() < 1e-5);
        }

        #[test]
        fn test_decay_zero_hours_is_identity() {
            let config = WeightConfig::default();
            assert_eq!(decay(0.42, 0.0, 0.95, &config), 0.42);
            assert_eq!(decay(0.42, -5.0, 0.95, &config), 0.42);
        }

        #[test]
        fn test_decay_never_below_floor() {
            let config = WeightConfig::default();
            let w = decay(0.5, 24.0 * 10_000.0, 0.5, &config);
            assert_eq!(w, config.min_weight);
        }

        #[test]
        fn test_reinforce_caps_at_one() {
            let config = WeightConfig::default();
            assert!((reinforce(0.5, 1.2, &config) - 0.6).abs() < 1e-6);
            assert_eq!(reinforce(0.95, 1.2, &config), 1.0);
        }
    }

    mod bands {
        use super::*;

        #[test]
        fn test_categorize_boundaries() {
            let bands = WeightBands::default();
            assert_eq!(bands.categorize(1.0), WeightCategory::Conscious);
            assert_eq!(bands.categorize(0.8), WeightCategory::Conscious);
            assert_eq!(bands.categorize(0.79), WeightCategory::EasyRecall);
            assert_eq!(bands.categorize(0.5), WeightCategory::EasyRecall);
            assert_eq!(bands.categorize(0.3), WeightCategory::EffortRequired);
            assert_eq!(bands.categorize(0.05), WeightCategory::Subconscious);
            assert_eq!(bands.categorize(0.001), WeightCategory::Dormant);
        }

        #[test]
        fn test_categories_are_ordered() {
            assert!(WeightCategory::Conscious > WeightCategory::EasyRecall);
            assert!(WeightCategory::Subconscious > WeightCategory::Dormant);
        }
    }
}
