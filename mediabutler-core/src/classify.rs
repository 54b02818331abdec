//! Classifier contract.
//!
//! The embedding model lives outside the core; the pipeline depends only on
//! this trait plus a deadline. `("UNKNOWN", 0.0)` is a valid answer meaning
//! "insufficient evidence".

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ButlerError, Result};

/// Sentinel category for "no usable suggestion".
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    pub alternatives: Vec<CategoryScore>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, tokens: &[String], filename: &str) -> Result<Classification>;
}

/// How a classification should be presented, derived from the two
/// configured confidence gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStrength {
    /// At or above the auto threshold; presented as settled (auto-confirm
    /// stays off under current policy).
    Confident,
    /// Between the gates; alternatives are shown.
    Tentative,
    /// Below the suggest threshold; the suggestion collapses to UNKNOWN.
    Insufficient,
}

pub fn interpret_confidence(
    confidence: f64,
    auto_threshold: f64,
    suggest_threshold: f64,
) -> SuggestionStrength {
    if confidence >= auto_threshold {
        SuggestionStrength::Confident
    } else if confidence >= suggest_threshold {
        SuggestionStrength::Tentative
    } else {
        SuggestionStrength::Insufficient
    }
}

/// Run a classifier call under the configured deadline; elapse becomes a
/// retryable `CLASSIFIER_TIMEOUT`.
pub async fn classify_with_deadline(
    classifier: &dyn Classifier,
    tokens: &[String],
    filename: &str,
    deadline_ms: u64,
) -> Result<Classification> {
    let deadline = Duration::from_millis(deadline_ms);
    match tokio::time::timeout(deadline, classifier.classify(tokens, filename)).await {
        Ok(result) => {
            let mut classification = result?;
            if !(0.0..=1.0).contains(&classification.confidence) {
                return Err(ButlerError::Validation(format!(
                    "classifier confidence {} outside [0, 1]",
                    classification.confidence
                )));
            }
            if classification.category.trim().is_empty() {
                classification.category = UNKNOWN_CATEGORY.to_string();
                classification.confidence = 0.0;
            }
            Ok(classification)
        }
        Err(_) => Err(ButlerError::ClassifierTimeout {
            deadline_ms,
        }),
    }
}

/// Fallback classifier that always reports insufficient evidence.
#[derive(Debug, Default)]
pub struct UnknownClassifier;

#[async_trait]
impl Classifier for UnknownClassifier {
    async fn classify(&self, _tokens: &[String], _filename: &str) -> Result<Classification> {
        Ok(Classification {
            category: UNKNOWN_CATEGORY.to_string(),
            confidence: 0.0,
            alternatives: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn classify(&self, _tokens: &[String], _filename: &str) -> Result<Classification> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            unreachable!("deadline should fire first")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapse_maps_to_classifier_timeout() {
        let err = classify_with_deadline(&SlowClassifier, &[], "x.mkv", 500)
            .await
            .unwrap_err();
        assert!(matches!(err, ButlerError::ClassifierTimeout { deadline_ms: 500 }));
    }

    #[tokio::test]
    async fn unknown_classifier_is_a_valid_implementation() {
        let result = classify_with_deadline(&UnknownClassifier, &[], "x.mkv", 500)
            .await
            .unwrap();
        assert_eq!(result.category, UNKNOWN_CATEGORY);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn thresholds_split_into_three_bands() {
        assert_eq!(
            interpret_confidence(0.92, 0.85, 0.50),
            SuggestionStrength::Confident
        );
        assert_eq!(
            interpret_confidence(0.60, 0.85, 0.50),
            SuggestionStrength::Tentative
        );
        assert_eq!(
            interpret_confidence(0.10, 0.85, 0.50),
            SuggestionStrength::Insufficient
        );
    }
}
