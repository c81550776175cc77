// 🏷️ Authoritative Format - Which codes follow the current identifier scheme?
//
// A record whose code conforms is "authoritative" and may receive merges.
// Everything else is "legacy" and is a candidate for retirement.

use regex::Regex;

/// Placeholder in a code pattern template, replaced by the cohort segment.
pub const SEGMENT_PLACEHOLDER: &str = "{segment}";

/// Default template: fixed prefix + cohort segment + sequence number.
pub const DEFAULT_CODE_PATTERN: &str = "^ADM-{segment}-[0-9]{3,}$";

/// Predicate deciding whether a canonical code is authoritative.
pub trait AuthoritativeFormat {
    fn conforms(&self, canonical_code: &str) -> bool;
}

impl<F> AuthoritativeFormat for F
where
    F: Fn(&str) -> bool,
{
    fn conforms(&self, canonical_code: &str) -> bool {
        self(canonical_code)
    }
}

/// Regex-backed format, usually built from a template and a cohort segment.
#[derive(Debug, Clone)]
pub struct CodePattern {
    regex: Regex,
}

impl CodePattern {
    /// Compile a literal regex.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(CodePattern {
            regex: Regex::new(pattern)?,
        })
    }

    /// Compile a template, substituting the escaped segment for `{segment}`.
    ///
    /// Example: `("^ADM-{segment}-[0-9]{3,}$", "G1")` accepts "ADM-G1-001".
    pub fn for_segment(template: &str, segment: &str) -> Result<Self, regex::Error> {
        let pattern = template.replace(SEGMENT_PLACEHOLDER, &regex::escape(segment));
        Self::new(&pattern)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl AuthoritativeFormat for CodePattern {
    fn conforms(&self, canonical_code: &str) -> bool {
        self.regex.is_match(canonical_code.trim())
    }
}
