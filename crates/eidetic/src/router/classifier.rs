//! Content classification
//!
//! The routing engine consumes classification through [`ContentClassifier`]
//! and never inspects how signals were produced. [`KeywordClassifier`] is
//! the default rule-based implementation.

use serde::{Deserialize, Serialize};

use crate::error::{EideticError, Result};

/// Non-negative signal strengths for each content class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSignals {
    pub semantic: f32,
    pub procedural: f32,
    pub emotional: f32,
}

impl ContentSignals {
    pub const KINDS: usize = 3;

    fn values(&self) -> [f32; Self::KINDS] {
        [self.semantic, self.procedural, self.emotional]
    }

    /// Reject signals no routing rule can interpret
    pub fn validate(&self) -> Result<()> {
        if self.values().iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EideticError::RoutingAmbiguous(format!(
                "classifier returned unusable signals: {self:?}"
            )));
        }
        Ok(())
    }

    /// Fraction of signal kinds that fired, in `[0, 1]`
    pub fn density(&self) -> f32 {
        let fired = self.values().iter().filter(|v| **v > 0.0).count();
        fired as f32 / Self::KINDS as f32
    }

    /// Emotional signal scaled into `[0, 1]`, saturating at `saturation`
    pub fn emotional_weight(&self, saturation: f32) -> f32 {
        if saturation <= 0.0 || !self.emotional.is_finite() {
            return 0.0;
        }
        (self.emotional / saturation).clamp(0.0, 1.0)
    }
}

/// Produces classification signals for a piece of content
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, content: &str) -> Result<ContentSignals>;
}

const SEMANTIC_KEYWORDS: &[&str] = &["meaning", "understand", "concept", "knowledge", "semantic"];
const PROCEDURAL_KEYWORDS: &[&str] = &["step", "process", "execute", "perform", "skill", "procedure"];
const EMOTIONAL_KEYWORDS: &[&str] = &["feel", "emotion", "important", "critical", "urgent", "priority"];

/// Counts how many keywords of each class occur in the content
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    semantic: Vec<String>,
    procedural: Vec<String>,
    emotional: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            semantic: owned(SEMANTIC_KEYWORDS),
            procedural: owned(PROCEDURAL_KEYWORDS),
            emotional: owned(EMOTIONAL_KEYWORDS),
        }
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the keyword lists; words are matched case-insensitively
    pub fn with_keywords(semantic: Vec<String>, procedural: Vec<String>, emotional: Vec<String>) -> Self {
        let lower = |words: Vec<String>| words.into_iter().map(|w| w.to_lowercase()).collect();
        Self {
            semantic: lower(semantic),
            procedural: lower(procedural),
            emotional: lower(emotional),
        }
    }

    fn count(words: &[String], content: &str) -> f32 {
        words.iter().filter(|w| content.contains(w.as_str())).count() as f32
    }
}

impl ContentClassifier for KeywordClassifier {
    fn classify(&self, content: &str) -> Result<ContentSignals> {
        let content = content.to_lowercase();
        Ok(ContentSignals {
            semantic: Self::count(&self.semantic, &content),
            procedural: Self::count(&self.procedural, &content),
            emotional: Self::count(&self.emotional, &content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_counts() {
        let classifier = KeywordClassifier::new();
        let signals = classifier
            .classify("Execute each STEP of the procedure; it is critical")
            .unwrap();
        assert_eq!(signals.procedural, 3.0);
        assert_eq!(signals.emotional, 1.0);
        assert_eq!(signals.semantic, 0.0);
    }

    #[test]
    fn test_density() {
        let none = ContentSignals::default();
        assert_eq!(none.density(), 0.0);

        let two = ContentSignals {
            semantic: 2.0,
            procedural: 0.0,
            emotional: 1.0,
        };
        assert!((two.density() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let bad = ContentSignals {
            semantic: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(EideticError::RoutingAmbiguous(_))));

        let negative = ContentSignals {
            emotional: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
        assert!(ContentSignals::default().validate().is_ok());
    }

    #[test]
    fn test_emotional_weight_saturates() {
        let signals = ContentSignals {
            emotional: 6.0,
            ..Default::default()
        };
        assert_eq!(signals.emotional_weight(3.0), 1.0);
        assert!((signals.emotional_weight(12.0) - 0.5).abs() < 1e-6);
        assert_eq!(signals.emotional_weight(0.0), 0.0);
    }

    #[test]
    fn test_custom_keywords() {
        let classifier = KeywordClassifier::with_keywords(
            vec!["Ontology".to_string()],
            vec![],
            vec![],
        );
        let signals = classifier.classify("an ontology of caches").unwrap();
        assert_eq!(signals.semantic, 1.0);
    }
}
