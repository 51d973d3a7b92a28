//! Derived annotations over extracted text.
//!
//! `has_math_content` is a heuristic used by renderers to decide whether to
//! turn on math typesetting. False positives are cheap; it only needs to catch
//! the common notations found in lecture notes and problem sets.

use once_cell::sync::Lazy;
use regex::Regex;

static MATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // $$...$$ and $...$
        r"\$\$[^$]+\$\$",
        r"\$[^$\n]+\$",
        // \( \) and \[ \]
        r"\\\(|\\\[",
        r"\\(?:frac|sqrt|sum|int|prod|lim|infty|alpha|beta|gamma|delta|theta|lambda|sigma|pi|partial|nabla|cdot|times|leq|geq|neq|approx)\b",
        r"[∑∫∏√∞≤≥≠≈±×÷∂∇∆πθλσμ]",
        r"\b(?:sin|cos|tan|log|ln|exp|lim|max|min)\s*\(",
        // x^2, e^{-x}
        r"[A-Za-z0-9)]\^\{?[-+]?[A-Za-z0-9]",
        // 3/4, (a+b)/c
        r"(?:\b\d+|\))\s*/\s*(?:\d+\b|\()",
        r"\b[a-z]\s*=\s*[-+]?\d+(?:\.\d+)?\s*[-+*/]\s*[a-z0-9]",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStats {
    pub word_count: usize,
    pub has_math_content: bool,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        Self {
            word_count: word_count(text),
            has_math_content: has_math_content(text),
        }
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn has_math_content(text: &str) -> bool {
    MATH_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Characters that are not whitespace.
pub fn visible_char_count(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
