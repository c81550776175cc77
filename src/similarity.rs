// 📏 Similarity Scorer - How alike are two human-entered names?
//
// Two heuristics, OR'ed:
//   1. Edit similarity: 1 - distance / max(len)   (containment short-circuits to 1.0)
//   2. Token overlap:   at least one shared token longer than 2 characters
//
// Names drift by truncation ("Abdi" vs "Abdi Hassan"), typos ("Jonh"),
// reordering ("Hassan Abdi") and transliteration. One metric alone misses too
// many of these.

use crate::normalizer::{name_tokens, normalize};
use serde::{Deserialize, Serialize};

/// Default acceptance threshold for edit similarity.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Default minimum token length for the overlap heuristic (tokens longer than 2).
pub const DEFAULT_MIN_TOKEN_LEN: usize = 3;

/// Similarity of two raw names, in `[0, 1]`.
///
/// Both inputs are normalized first. If either contains the other the
/// result is `1.0`; otherwise it is `1 - distance / max(len)`. Two empty
/// names score `0.0`, and so does an empty name against a non-empty one
/// (the empty string is contained in everything, which is not evidence).
pub fn similarity(name_a: &str, name_b: &str) -> f64 {
    normalized_similarity(&normalize(name_a), &normalize(name_b))
}

fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    if a.contains(b) || b.contains(a) {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    let distance = edit_distance(a, b);

    1.0 - (distance as f64 / max_len as f64)
}

/// Edit distance with adjacent transpositions (optimal string alignment).
///
/// Insertions, deletions and substitutions cost 1, and so does swapping two
/// neighbouring characters: "jonh" → "john" is one edit, not two.
pub fn edit_distance(s1: &str, s2: &str) -> usize {
    strsim::osa_distance(s1, s2)
}

// ============================================================================
// MATCH SCORE
// ============================================================================

/// Both heuristics evaluated for one pair of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Edit similarity in `[0, 1]`
    pub similarity: f64,

    /// Tokens present in both names (sorted)
    pub shared_tokens: Vec<String>,
}

impl MatchScore {
    /// A pair matches when similarity exceeds the threshold OR any token is shared.
    pub fn is_match(&self, threshold: f64) -> bool {
        self.similarity > threshold || !self.shared_tokens.is_empty()
    }
}

// ============================================================================
// SIMILARITY SCORER
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    /// Edit-similarity acceptance threshold (default: 0.7)
    pub threshold: f64,

    /// Minimum token length for the overlap heuristic (default: 3)
    pub min_token_len: usize,
}

impl SimilarityScorer {
    pub fn new() -> Self {
        SimilarityScorer {
            threshold: DEFAULT_THRESHOLD,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        SimilarityScorer {
            threshold,
            min_token_len: DEFAULT_MIN_TOKEN_LEN,
        }
    }

    /// Evaluate both heuristics for a pair of raw names.
    pub fn score(&self, name_a: &str, name_b: &str) -> MatchScore {
        let tokens_a = name_tokens(name_a, self.min_token_len);
        let tokens_b = name_tokens(name_b, self.min_token_len);

        let shared_tokens = tokens_a
            .iter()
            .filter(|t| tokens_b.binary_search(t).is_ok())
            .cloned()
            .collect();

        MatchScore {
            similarity: similarity(name_a, name_b),
            shared_tokens,
        }
    }

    /// Does the pair match under this scorer's threshold?
    pub fn matches(&self, name_a: &str, name_b: &str) -> bool {
        self.score(name_a, name_b).is_match(self.threshold)
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
