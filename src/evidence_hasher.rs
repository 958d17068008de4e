use sha2::{Digest, Sha256};

use crate::models::EvidenceItem;

/// Rationales are compared on this many leading characters only.
pub const RATIONALE_PREFIX_CHARS: usize = 50;

const UNKNOWN_DIFFICULTY: &str = "unknown";

/// One normalized entry of a learner's error pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EvidencePattern {
    pub rationale: String,
    pub difficulty: String,
}

impl EvidencePattern {
    pub fn new(rationale: &str, difficulty: &str) -> Self {
        let difficulty = difficulty.trim();
        Self {
            rationale: rationale.chars().take(RATIONALE_PREFIX_CHARS).collect(),
            difficulty: if difficulty.is_empty() {
                UNKNOWN_DIFFICULTY.to_string()
            } else {
                difficulty.to_string()
            },
        }
    }
}

/// Deterministic fingerprint of a learner's error pattern on one topic.
///
/// The digest ignores input order and any rationale text past
/// [`RATIONALE_PREFIX_CHARS`], so reworded tails of the same mistake keep
/// hitting the same cached module.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceHasher;

impl EvidenceHasher {
    pub fn hash(patterns: &[EvidencePattern]) -> String {
        let mut normalized: Vec<EvidencePattern> = patterns
            .iter()
            .map(|pattern| EvidencePattern::new(&pattern.rationale, &pattern.difficulty))
            .collect();
        normalized.sort();

        // Length prefixes keep field boundaries unambiguous.
        let mut hasher = Sha256::new();
        for pattern in &normalized {
            hasher.update(format!(
                "{}:{}{}:{}\n",
                pattern.rationale.len(),
                pattern.rationale,
                pattern.difficulty.len(),
                pattern.difficulty
            ));
        }

        hex::encode(hasher.finalize())
    }

    pub fn hash_evidence(evidence: &[EvidenceItem]) -> String {
        let patterns: Vec<EvidencePattern> = evidence
            .iter()
            .map(|item| EvidencePattern::new(&item.error_rationale, &item.question_difficulty))
            .collect();
        Self::hash(&patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(rationale: &str, difficulty: &str) -> EvidencePattern {
        EvidencePattern::new(rationale, difficulty)
    }

    #[test]
    fn test_hash_is_order_independent() {
        let evidence = vec![
            pattern("Confundió la razón con la proporción", "medium"),
            pattern("Sumó en lugar de multiplicar", "easy"),
            pattern("No identificó el patrón de la secuencia", "hard"),
        ];
        let mut reversed = evidence.clone();
        reversed.reverse();

        assert_eq!(EvidenceHasher::hash(&evidence), EvidenceHasher::hash(&reversed));
    }

    #[test]
    fn test_text_past_prefix_is_ignored() {
        let prefix = "a".repeat(RATIONALE_PREFIX_CHARS);
        let a = vec![pattern(&format!("{}first ending", prefix), "easy")];
        let b = vec![pattern(&format!("{}a different ending", prefix), "easy")];

        assert_eq!(EvidenceHasher::hash(&a), EvidenceHasher::hash(&b));
    }

    #[test]
    fn test_prefix_or_difficulty_change_alters_hash() {
        let base = vec![pattern("Sumó en lugar de multiplicar", "easy")];
        let other_rationale = vec![pattern("Restó en lugar de dividir", "easy")];
        let other_difficulty = vec![pattern("Sumó en lugar de multiplicar", "hard")];

        let base_hash = EvidenceHasher::hash(&base);
        assert_ne!(base_hash, EvidenceHasher::hash(&other_rationale));
        assert_ne!(base_hash, EvidenceHasher::hash(&other_difficulty));
    }

    #[test]
    fn test_field_boundaries_are_not_ambiguous() {
        let split_early = vec![pattern("Sumó:4", "easy")];
        let split_late = vec![pattern("Sumó", "4easy")];
        assert_ne!(EvidenceHasher::hash(&split_early), EvidenceHasher::hash(&split_late));

        assert_ne!(EvidenceHasher::hash(&[]), EvidenceHasher::hash(&[pattern("", "")]));
    }

    #[test]
    fn test_multibyte_rationale_truncates_on_char_boundary() {
        let rationale = "ñ".repeat(RATIONALE_PREFIX_CHARS + 10);
        let truncated = pattern(&rationale, "");
        assert_eq!(truncated.rationale.chars().count(), RATIONALE_PREFIX_CHARS);
        assert_eq!(truncated.difficulty, "unknown");
    }

    #[test]
    fn test_evidence_items_hash_like_patterns() {
        let items = vec![EvidenceItem {
            question_text: "¿Cuál sigue?".to_string(),
            question_difficulty: "medium".to_string(),
            chosen_distractor_text: "12".to_string(),
            error_rationale: "Sumó en lugar de multiplicar".to_string(),
        }];
        let hash = EvidenceHasher::hash_evidence(&items);

        assert_eq!(hash, EvidenceHasher::hash(&[pattern("Sumó en lugar de multiplicar", "medium")]));
        assert_eq!(hash.len(), 64);
    }
}
