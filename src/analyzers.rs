//! Deterministic diff heuristics.
//!
//! `DiffHeuristicAnalyzer` is the bundled [`AnalysisWorker`]. It scans the
//! lines a change adds for well-known smells (leftover markers, debug
//! output, hard-coded secrets, panicking shortcuts) and reports how many
//! it found. It needs no network access, which makes it the worker used
//! by the CLI and a predictable stand-in for model-backed workers.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::capability::{AnalysisDepth, AnalysisResult, AnalysisWorker, ChangeSetProvider};
use crate::core::task::{Complexity, Task};
use crate::error::Result;

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

/// Line length above which an added line is flagged.
const MAX_LINE_LENGTH: usize = 120;

struct Rule {
    name: &'static str,
    message: &'static str,
    pattern: Regex,
    /// Languages the rule applies to; empty means all.
    languages: &'static [Language],
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            name: "leftover-marker",
            message: "unresolved TODO/FIXME marker",
            pattern: Regex::new(r"\b(TODO|FIXME|XXX|HACK)\b").unwrap(),
            languages: &[],
        },
        Rule {
            name: "hardcoded-secret",
            message: "possible hard-coded credential",
            pattern: Regex::new(r#"(?i)(password|passwd|secret|api_?key|token)\s*[:=]\s*['"][^'"]{4,}['"]"#).unwrap(),
            languages: &[],
        },
        Rule {
            name: "debug-output",
            message: "debug output left in code",
            pattern: Regex::new(r"\b(console\.log|print|println!|dbg!|System\.out\.println|fmt\.Println)\s*\(").unwrap(),
            languages: &[
                Language::Python,
                Language::JavaScript,
                Language::TypeScript,
                Language::Rust,
                Language::Java,
                Language::Go,
            ],
        },
        Rule {
            name: "dynamic-eval",
            message: "dynamic code evaluation",
            pattern: Regex::new(r"\b(eval|exec)\s*\(").unwrap(),
            languages: &[Language::Python, Language::JavaScript, Language::TypeScript],
        },
        Rule {
            name: "bare-except",
            message: "bare except swallows every error",
            pattern: Regex::new(r"^\s*except\s*:").unwrap(),
            languages: &[Language::Python],
        },
        Rule {
            name: "panicking-unwrap",
            message: "unwrap() panics on error",
            pattern: Regex::new(r"\.unwrap\(\)").unwrap(),
            languages: &[Language::Rust],
        },
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    C,
    Cpp,
    Markdown,
    Config,
    Unknown,
}

impl Language {
    /// Detect a language from the target's extension.
    pub fn detect(target_key: &str) -> Self {
        let ext = target_key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "java" => Language::Java,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" => Language::Cpp,
            "md" | "rst" | "txt" => Language::Markdown,
            "json" | "yml" | "yaml" | "toml" | "ini" | "cfg" => Language::Config,
            _ => Language::Unknown,
        }
    }
}

/// An added line, numbered in the new version of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedLine {
    pub line_number: usize,
    pub content: String,
}

/// Added lines of a unified diff.
///
/// Line numbers follow the `+start` of each `@@ -a,b +c,d @@` header.
/// Added lines outside any hunk are numbered from 1.
pub fn changed_lines(diff: &str) -> Vec<ChangedLine> {
    let mut lines = Vec::new();
    let mut next_line = 1usize;
    for line in diff.lines() {
        if let Some(caps) = HUNK_HEADER.captures(line) {
            next_line = caps[3].parse().unwrap_or(1);
            continue;
        }
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            lines.push(ChangedLine {
                line_number: next_line,
                content: added.to_string(),
            });
            next_line += 1;
        } else if !line.starts_with('-') && !line.starts_with('\\') {
            next_line += 1;
        }
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub line_number: usize,
    pub rule: String,
    pub message: String,
}

/// Heuristic analyzer over added lines.
#[derive(Clone, Default)]
pub struct DiffHeuristicAnalyzer {
    provider: Option<Arc<dyn ChangeSetProvider>>,
}

impl DiffHeuristicAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fall back to full content from `provider` when a task has no diff.
    pub fn with_provider(provider: Arc<dyn ChangeSetProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Findings for the given lines of `target_key`.
    pub fn inspect(&self, target_key: &str, lines: &[ChangedLine]) -> Vec<Finding> {
        let language = Language::detect(target_key);
        let mut findings = Vec::new();
        for line in lines {
            for rule in RULES.iter() {
                if !rule.languages.is_empty() && !rule.languages.contains(&language) {
                    continue;
                }
                if rule.pattern.is_match(&line.content) {
                    findings.push(Finding {
                        line_number: line.line_number,
                        rule: rule.name.to_string(),
                        message: rule.message.to_string(),
                    });
                }
            }
            if language != Language::Markdown && line.content.chars().count() > MAX_LINE_LENGTH {
                findings.push(Finding {
                    line_number: line.line_number,
                    rule: "long-line".to_string(),
                    message: format!("line exceeds {} characters", MAX_LINE_LENGTH),
                });
            }
        }
        findings
    }

    async fn lines_for(&self, task: &Task) -> Result<Vec<ChangedLine>> {
        if !task.payload.diff.trim().is_empty() {
            return Ok(changed_lines(&task.payload.diff));
        }
        let Some(provider) = &self.provider else {
            return Ok(Vec::new());
        };
        let content = provider.get_item_content(&task.target_key).await?;
        Ok(content
            .map(|c| {
                c.lines()
                    .enumerate()
                    .map(|(i, l)| ChangedLine {
                        line_number: i + 1,
                        content: l.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl AnalysisWorker for DiffHeuristicAnalyzer {
    async fn run(&self, task: &Task) -> Result<AnalysisResult> {
        let lines = self.lines_for(task).await?;
        let findings = self.inspect(&task.target_key, &lines);
        debug!(
            task_id = %task.id,
            lines = lines.len(),
            findings = findings.len(),
            "heuristic analysis done"
        );

        let analysis_depth = match task.complexity {
            Complexity::Simple => AnalysisDepth::Shallow,
            Complexity::Moderate => AnalysisDepth::Medium,
            Complexity::Complex => AnalysisDepth::Deep,
        };
        // Pattern matching is less conclusive on unfamiliar or large input.
        let mut confidence: f64 = match Language::detect(&task.target_key) {
            Language::Unknown => 0.5,
            _ => 0.9,
        };
        if lines.is_empty() {
            confidence = 0.3;
        }
        confidence -= 0.1 * (task.complexity.rank() - 1) as f64;

        Ok(AnalysisResult {
            issues_found: findings.len(),
            confidence_score: confidence.clamp(0.0, 1.0),
            analysis_depth,
            conversation_turns: 1,
        })
    }
}
