use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagscopeError, Result};
use crate::model::metrics::{QualityVerdict, RetrievedDoc};

pub const STATUS_OUT_OF_SCOPE: &str = "Out-of-scope — correctly uncertain";
pub const STATUS_HALLUCINATION: &str = "Potential hallucination";
pub const STATUS_GROUNDED: &str = "Well-grounded response";
pub const STATUS_FAILED: &str = "failed";

const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "should", "could", "may", "might", "can", "this", "that", "these",
    "those", "i", "you", "he", "she", "it", "we", "they",
];

const DEFAULT_UNCERTAINTY_PHRASES: &[&str] = &[
    "don't have",
    "do not have",
    "not sure",
    "no information",
    "not available in our policies",
    "please contact customer support",
    "cannot find",
    "can't find",
    "not mentioned",
];

/// Thresholds and word lists driving the grounding heuristic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    /// Grounding below this is flagged as a potential hallucination.
    pub grounding_cutoff: f64,
    /// Uncertain answers count as out-of-scope only below this top relevance.
    pub relevance_cutoff: f64,
    pub uncertain_confidence: f64,
    pub hallucination_confidence_cap: f64,
    pub grounded_confidence_floor: f64,
    pub grounded_confidence_ceiling: f64,
    pub stop_words: Vec<String>,
    pub uncertainty_phrases: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            grounding_cutoff: 0.60,
            relevance_cutoff: 0.5,
            uncertain_confidence: 0.15,
            hallucination_confidence_cap: 0.59,
            grounded_confidence_floor: 0.70,
            grounded_confidence_ceiling: 0.95,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            uncertainty_phrases: DEFAULT_UNCERTAINTY_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("grounding_cutoff", self.grounding_cutoff),
            ("relevance_cutoff", self.relevance_cutoff),
            ("uncertain_confidence", self.uncertain_confidence),
            (
                "hallucination_confidence_cap",
                self.hallucination_confidence_cap,
            ),
            ("grounded_confidence_floor", self.grounded_confidence_floor),
            (
                "grounded_confidence_ceiling",
                self.grounded_confidence_ceiling,
            ),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(RagscopeError::Config(format!(
                    "quality.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.grounding_cutoff >= 1.0 {
            return Err(RagscopeError::Config(
                "quality.grounding_cutoff must be below 1".to_string(),
            ));
        }
        if self.grounded_confidence_floor > self.grounded_confidence_ceiling {
            return Err(RagscopeError::Config(
                "quality.grounded_confidence_floor exceeds the ceiling".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    config: QualityConfig,
    stop_words: HashSet<String>,
    phrases: Vec<String>,
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

impl QualityAnalyzer {
    pub fn new(config: QualityConfig) -> Self {
        let stop_words = config
            .stop_words
            .iter()
            .map(|w| normalize(w))
            .collect();
        let phrases = config
            .uncertainty_phrases
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            config,
            stop_words,
            phrases,
        }
    }

    pub fn analyze(&self, response: &str, docs: &[RetrievedDoc]) -> QualityVerdict {
        let response_words = self.content_words(response);
        let reference_words = docs
            .iter()
            .flat_map(|doc| self.content_words(&doc.text))
            .collect::<HashSet<_>>();

        let grounded_words = response_words
            .iter()
            .filter(|w| reference_words.contains(*w))
            .count();
        let grounding_score = if response_words.is_empty() {
            0.0
        } else {
            grounded_words as f64 / response_words.len() as f64
        };

        let (avg_relevance, top_relevance) = relevance_summary(docs);
        let empty = response.trim().is_empty();
        let low_evidence = docs.is_empty() || top_relevance < self.config.relevance_cutoff;

        let (confidence, hallucination_detected, status_label) =
            if empty || (self.is_uncertain(response) && low_evidence) {
                (self.config.uncertain_confidence, false, STATUS_OUT_OF_SCOPE)
            } else if grounding_score < self.config.grounding_cutoff {
                (
                    grounding_score.min(self.config.hallucination_confidence_cap),
                    true,
                    STATUS_HALLUCINATION,
                )
            } else {
                (
                    self.grounded_confidence(grounding_score),
                    false,
                    STATUS_GROUNDED,
                )
            };

        QualityVerdict {
            grounding_score,
            confidence,
            hallucination_detected,
            status_label: status_label.to_string(),
            avg_relevance,
            top_relevance,
            retrieved_docs_count: docs.len(),
            key_words_checked: response_words.len(),
            grounded_words,
        }
    }

    /// Verdict for a trace the orchestrator reported as failed.
    pub fn failed(&self, docs: &[RetrievedDoc]) -> QualityVerdict {
        let (avg_relevance, top_relevance) = relevance_summary(docs);
        QualityVerdict {
            grounding_score: 0.0,
            confidence: 0.0,
            hallucination_detected: false,
            status_label: STATUS_FAILED.to_string(),
            avg_relevance,
            top_relevance,
            retrieved_docs_count: docs.len(),
            key_words_checked: 0,
            grounded_words: 0,
        }
    }

    /// Lowercased words of `text` minus stop words.
    pub fn content_words(&self, text: &str) -> HashSet<String> {
        let text = normalize(text);
        word_regex()
            .find_iter(&text)
            .map(|m| m.as_str())
            .filter(|w| !self.stop_words.contains(*w))
            .map(str::to_string)
            .collect()
    }

    pub fn is_uncertain(&self, response: &str) -> bool {
        let text = normalize(response);
        text.trim().is_empty() || self.phrases.iter().any(|p| text.contains(p.as_str()))
    }

    fn grounded_confidence(&self, grounding_score: f64) -> f64 {
        let floor = self.config.grounded_confidence_floor;
        let ceiling = self.config.grounded_confidence_ceiling;
        let span = (1.0 - self.config.grounding_cutoff).max(f64::EPSILON);
        let scaled = floor + (grounding_score - self.config.grounding_cutoff) / span * (ceiling - floor);
        scaled.clamp(floor, ceiling)
    }
}

/// `(mean, max)` of the relevance scores, both 0 with no documents.
pub fn relevance_summary(docs: &[RetrievedDoc]) -> (f64, f64) {
    if docs.is_empty() {
        return (0.0, 0.0);
    }
    let scores = docs
        .iter()
        .map(|d| {
            if d.relevance_score.is_nan() {
                0.0
            } else {
                d.relevance_score.clamp(0.0, 1.0)
            }
        })
        .collect::<Vec<_>>();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    let top = scores.iter().copied().fold(0.0, f64::max);
    (avg, top)
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'")
}

fn word_regex() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| {
        Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}\p{N}]+)*").expect("word pattern is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_docs() -> Vec<RetrievedDoc> {
        vec![
            RetrievedDoc::new(
                "Payments can be declined due to insufficient funds, an expired card, or incorrect billing details.",
                0.89,
            ),
            RetrievedDoc::new(
                "Fraud prevention systems may block unusual transactions and flag them for manual review.",
                0.80,
            ),
            RetrievedDoc::new(
                "Customers should verify card details and contact their bank when a payment is declined repeatedly.",
                0.77,
            ),
        ]
    }

    #[test]
    fn verbatim_quote_is_fully_grounded() {
        let analyzer = QualityAnalyzer::default();
        let docs = policy_docs();
        let verdict = analyzer.analyze(&docs[1].text, &docs);
        assert_eq!(verdict.grounding_score, 1.0);
        assert_eq!(verdict.status_label, STATUS_GROUNDED);
        assert!(!verdict.hallucination_detected);
        assert!((verdict.confidence - 0.95).abs() < 1e-12);
    }

    #[test]
    fn partial_overlap_maps_linearly_into_confidence_band() {
        let analyzer = QualityAnalyzer::default();
        let response = "Payments declined: insufficient funds, expired card, incorrect billing details. \
                        Fraud prevention may block unusual transactions. Verify details, contact bank. \
                        Blockchain lottery tomorrow.";
        let verdict = analyzer.analyze(response, &policy_docs());
        assert_eq!(verdict.key_words_checked, 20);
        assert_eq!(verdict.grounded_words, 17);
        assert!((verdict.grounding_score - 0.85).abs() < 1e-12);
        assert!((verdict.confidence - 0.85625).abs() < 1e-12);
        assert!((verdict.avg_relevance - 0.82).abs() < 1e-12);
        assert_eq!(verdict.top_relevance, 0.89);
        assert_eq!(verdict.retrieved_docs_count, 3);
    }

    #[test]
    fn empty_response_is_out_of_scope_whatever_the_docs() {
        let analyzer = QualityAnalyzer::default();
        for docs in [Vec::new(), policy_docs()] {
            let verdict = analyzer.analyze("", &docs);
            assert_eq!(verdict.confidence, 0.15);
            assert!(!verdict.hallucination_detected);
            assert_eq!(verdict.status_label, STATUS_OUT_OF_SCOPE);
            assert_eq!(verdict.grounding_score, 0.0);
        }
        assert_eq!(analyzer.analyze("   ", &policy_docs()).confidence, 0.15);
    }

    #[test]
    fn uncertain_answer_with_weak_evidence_is_out_of_scope() {
        let analyzer = QualityAnalyzer::default();
        let docs = vec![RetrievedDoc::new(
            "Payment policies and refund information.",
            0.2,
        )];
        let verdict = analyzer.analyze("I don't have that information in our policies.", &docs);
        assert_eq!(verdict.status_label, STATUS_OUT_OF_SCOPE);
        assert_eq!(verdict.confidence, 0.15);
        assert!(!verdict.hallucination_detected);
    }

    #[test]
    fn uncertainty_matching_handles_case_and_curly_quotes() {
        let analyzer = QualityAnalyzer::default();
        assert!(analyzer.is_uncertain("Sorry, I DON\u{2019}T HAVE details on that."));
        assert!(analyzer.is_uncertain("I'm not sure about crypto withdrawals."));
        assert!(!analyzer.is_uncertain("Refunds take five business days."));
    }

    #[test]
    fn uncertain_answer_with_strong_evidence_falls_through_to_grounding() {
        let analyzer = QualityAnalyzer::default();
        let verdict = analyzer.analyze("I'm not sure, maybe quantum ledgers?", &policy_docs());
        assert!(verdict.hallucination_detected);
        assert_eq!(verdict.status_label, STATUS_HALLUCINATION);
    }

    #[test]
    fn assertive_answer_without_docs_is_always_flagged() {
        let analyzer = QualityAnalyzer::default();
        let verdict = analyzer.analyze("Your refund arrives within three business days.", &[]);
        assert!(verdict.hallucination_detected);
        assert_eq!(verdict.grounding_score, 0.0);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.avg_relevance, 0.0);
        assert_eq!(verdict.top_relevance, 0.0);
    }

    #[test]
    fn hallucination_confidence_is_capped() {
        let config = QualityConfig {
            grounding_cutoff: 0.9,
            ..QualityConfig::default()
        };
        let analyzer = QualityAnalyzer::new(config);
        let docs = vec![RetrievedDoc::new("alpha beta gamma delta", 0.9)];
        let verdict = analyzer.analyze("alpha beta gamma delta epsilon", &docs);
        assert!((verdict.grounding_score - 0.8).abs() < 1e-12);
        assert!(verdict.hallucination_detected);
        assert_eq!(verdict.confidence, 0.59);
    }

    #[test]
    fn stop_words_are_configurable() {
        let analyzer = QualityAnalyzer::new(QualityConfig {
            stop_words: vec!["your".into(), "Payment".into()],
            ..QualityConfig::default()
        });
        let words = analyzer.content_words("Your payment was declined");
        assert_eq!(
            words,
            HashSet::from(["was".to_string(), "declined".to_string()])
        );
    }

    #[test]
    fn relevance_summary_clamps_scores() {
        let docs = vec![RetrievedDoc::new("a", 1.4), RetrievedDoc::new("b", f64::NAN)];
        assert_eq!(relevance_summary(&docs), (0.5, 1.0));
        assert_eq!(relevance_summary(&[]), (0.0, 0.0));
    }

    #[test]
    fn validate_rejects_inverted_band() {
        let config = QualityConfig {
            grounded_confidence_floor: 0.9,
            grounded_confidence_ceiling: 0.8,
            ..QualityConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(QualityConfig::default().validate().is_ok());
    }
}
