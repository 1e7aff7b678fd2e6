//! Static analysis of changed targets used during planning.
//!
//! This module holds the heuristics the scheduler applies to raw change
//! descriptors:
//! - **Priority**: ordered path rules (critical, high, low; default medium)
//! - **References**: import/include statements found in diff text
//! - **Complexity**: change volume, diff size and control-flow keywords
//!
//! ## Example
//!
//! ```
//! use reviewflow::config::PriorityRules;
//! use reviewflow::core::Priority;
//! use reviewflow::orchestration::detection::{extract_references, PriorityMatcher};
//!
//! let matcher = PriorityMatcher::compile(&PriorityRules::default()).unwrap();
//! assert_eq!(matcher.classify("src/models/user.py"), Priority::Critical);
//! assert_eq!(matcher.classify("README.md"), Priority::Low);
//!
//! let refs = extract_references("+from app.models import User\n");
//! assert_eq!(refs, vec!["app.models".to_string()]);
//! ```

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::config::PriorityRules;
use crate::core::task::{Complexity, Priority};
use crate::error::{Error, Result};

/// Import/include statement patterns; capture group 1 is the reference.
static REFERENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Python: from module import name
        r#"from\s+([^\s'"]+)\s+import"#,
        // Python / JS: import module (statement start only)
        r#"^\+?\s*import\s+([^\s;,'"(){}]+)"#,
        // ES modules: ... from './module'
        r#"from\s+['"]([^'"]+)['"]"#,
        // C / C++: #include <x> or "x"
        r#"#include\s*[<"]([^>"]+)[>"]"#,
        // Node: require('x')
        r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Control-flow keywords that suggest non-trivial logic.
const COMPLEX_KEYWORDS: &[&str] = &[
    "if", "for", "while", "try", "catch", "class", "function", "async",
];

static KEYWORD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    COMPLEX_KEYWORDS
        .iter()
        .map(|k| Regex::new(&format!(r"(?i)\b{}\b", k)).unwrap())
        .collect()
});

/// Source extensions that earn an extra complexity point.
const CODE_EXTENSIONS: &[&str] = &[".py", ".js", ".ts", ".java", ".cpp", ".go"];

/// Compiled priority rules.
#[derive(Debug, Clone)]
pub struct PriorityMatcher {
    critical: Vec<Regex>,
    high: Vec<Regex>,
    low: Vec<Regex>,
}

impl PriorityMatcher {
    /// Compile rule patterns case-insensitively.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first invalid pattern.
    pub fn compile(rules: &PriorityRules) -> Result<Self> {
        fn build(patterns: &[String]) -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| Error::Config(format!("invalid priority rule {:?}: {}", p, e)))
                })
                .collect()
        }

        Ok(Self {
            critical: build(&rules.critical)?,
            high: build(&rules.high)?,
            low: build(&rules.low)?,
        })
    }

    /// Classify a target key. Unmatched keys are medium priority.
    pub fn classify(&self, target_key: &str) -> Priority {
        let matches = |rules: &[Regex]| rules.iter().any(|r| r.is_match(target_key));
        if matches(&self.critical) {
            Priority::Critical
        } else if matches(&self.high) {
            Priority::High
        } else if matches(&self.low) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }
}

/// Added and removed line counts of a unified diff.
///
/// File header lines (`+++`, `---`) are not counted.
pub fn count_changes(diff: &str) -> (usize, usize) {
    diff.lines().fold((0, 0), |(added, removed), line| {
        if line.starts_with('+') && !line.starts_with("+++") {
            (added + 1, removed)
        } else if line.starts_with('-') && !line.starts_with("---") {
            (added, removed + 1)
        } else {
            (added, removed)
        }
    })
}

/// Extract import/include references from diff text.
///
/// Removed lines are skipped since their references no longer hold.
/// References are returned in first-seen order without duplicates.
pub fn extract_references(diff: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for line in diff.lines() {
        if line.starts_with('-') {
            continue;
        }
        for pattern in REFERENCE_PATTERNS.iter() {
            for caps in pattern.captures_iter(line) {
                if let Some(m) = caps.get(1) {
                    let reference = m.as_str().trim();
                    if !reference.is_empty() && !refs.iter().any(|r| r == reference) {
                        refs.push(reference.to_string());
                    }
                }
            }
        }
    }
    refs
}

fn strip_extension(key: &str) -> &str {
    let name_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    match key[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &key[..name_start + dot],
        _ => key,
    }
}

fn matches_path(key: &str, candidate: &str) -> bool {
    key == candidate
        || key
            .strip_suffix(candidate)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Whether a reference found in a diff points at `target_key`.
///
/// Leading `./` and `../` segments are dropped, as are the leading dots
/// of a Python relative module (`.utils`, `..pkg.models`). The reference,
/// or its dotted module form rewritten with `/`, must equal the key (with
/// or without extension) or be a whole-segment suffix of it.
pub fn reference_matches(reference: &str, target_key: &str) -> bool {
    let mut normalized = reference.trim_matches(|c| c == '\'' || c == '"');
    loop {
        if let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest;
        } else if let Some(rest) = normalized.strip_prefix("../") {
            normalized = rest;
        } else {
            break;
        }
    }
    let mut normalized = normalized.trim_start_matches('/');
    if !normalized.contains('/') {
        normalized = normalized.trim_start_matches('.');
    }
    if normalized.is_empty() {
        return false;
    }

    let stem = strip_extension(target_key);
    let mut candidates = vec![normalized.to_string()];
    if !normalized.contains('/') && normalized.contains('.') {
        candidates.push(normalized.replace('.', "/"));
    }

    candidates
        .iter()
        .any(|c| matches_path(target_key, c) || matches_path(stem, c))
}

/// Inputs to complexity scoring.
#[derive(Debug, Clone, Copy)]
pub struct ChangeProfile<'a> {
    pub target_key: &'a str,
    pub diff: &'a str,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Raw complexity score; see [`classify_complexity`] for thresholds.
pub fn complexity_score(profile: &ChangeProfile<'_>) -> f64 {
    let mut score = 0.0;

    let total_changes = profile.lines_added + profile.lines_removed;
    score += match total_changes {
        n if n > 100 => 3.0,
        n if n > 50 => 2.0,
        n if n > 10 => 1.0,
        _ => 0.0,
    };

    score += match profile.diff.len() {
        n if n > 10_000 => 2.0,
        n if n > 5_000 => 1.0,
        _ => 0.0,
    };

    let key = profile.target_key.to_ascii_lowercase();
    if CODE_EXTENSIONS.iter().any(|ext| key.ends_with(ext)) {
        score += 1.0;
    }

    let keywords = KEYWORD_PATTERNS
        .iter()
        .filter(|k| k.is_match(profile.diff))
        .count();
    score += 0.5 * keywords as f64;

    score
}

pub fn classify_complexity(profile: &ChangeProfile<'_>) -> Complexity {
    let score = complexity_score(profile);
    if score >= 5.0 {
        Complexity::Complex
    } else if score >= 2.0 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}
