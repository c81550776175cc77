// 🔤 Identity Normalizer - Canonical form of human-entered names
//
// "Omar  IBRAHIM", " omar ibrahim ", "O'mar Ibrahim2" → "omar ibrahim"
//
// Normalized names are only ever used for comparison. The stored record keeps
// whatever the import wrote.

/// Canonicalize a raw name for comparison.
///
/// - Lowercase
/// - Drop everything outside `a-z` and whitespace (digits, punctuation, accents)
/// - Collapse runs of whitespace to a single space and trim both ends
///
/// Total: empty input (or input with no letters) yields `""`.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token set used by the overlap heuristic.
///
/// Splits on whitespace and hyphens *before* stripping, so "Abdi-Hassan"
/// yields `["abdi", "hassan"]` rather than one glued token. Tokens shorter
/// than `min_len` characters are dropped ("al", "bin", initials).
pub fn name_tokens(raw: &str, min_len: usize) -> Vec<String> {
    let mut tokens: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c == '-')
        .map(normalize)
        .filter(|t| t.chars().count() >= min_len)
        .collect();

    tokens.sort();
    tokens.dedup();
    tokens
}

// ============================================================================
// TESTS
// ============================================================================
