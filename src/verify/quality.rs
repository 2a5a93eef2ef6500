//! Informational quality score for verified code. Never gates validity.

use super::pysrc::{cached, Source};
use crate::extract::{Complexity, UnifiedConfiguration};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const UNRESOLVED_PENALTY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => Grade::Excellent,
            75..=89 => Grade::Good,
            60..=74 => Grade::Fair,
            _ => Grade::Poor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    /// 0..=100
    pub score: u32,
    pub grade: Grade,
    /// Penalties and bonuses that were applied, in order
    pub observations: Vec<String>,
}

/// Best-practice markers and their penalty when absent
fn markers() -> [(&'static str, &'static Regex, i32); 4] {
    static DOTENV: OnceLock<Regex> = OnceLock::new();
    static EXPORTS: OnceLock<Regex> = OnceLock::new();
    static ASYNC_MAIN: OnceLock<Regex> = OnceLock::new();
    static MAIN_GUARD: OnceLock<Regex> = OnceLock::new();
    [
        ("environment loading", cached(&DOTENV, r"\bload_dotenv[ \t]*\("), 10),
        ("export declaration", cached(&EXPORTS, r"(?m)^__all__[ \t]*="), 5),
        ("async entry point", cached(&ASYNC_MAIN, r"(?m)^async[ \t]+def[ \t]+main[ \t]*\("), 10),
        (
            "guarded script entry",
            cached(&MAIN_GUARD, r#"(?m)^if[ \t]+__name__[ \t]*==[ \t]*["']__main__["']"#),
            5,
        ),
    ]
}

/// Line count range expected for each complexity class
fn expected_lines(complexity: Complexity) -> std::ops::RangeInclusive<usize> {
    match complexity {
        Complexity::Simple => 40..=160,
        Complexity::Medium => 80..=260,
        Complexity::Complex => 140..=420,
    }
}

pub fn score(code: &str, config: &UnifiedConfiguration, unresolved: usize) -> QualityReport {
    static TRY_BLOCK: OnceLock<Regex> = OnceLock::new();
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    static DOCSTRING: OnceLock<Regex> = OnceLock::new();

    let source = Source::new(code);
    let mut score = 100i32;
    let mut observations = Vec::new();

    if unresolved > 0 {
        score -= UNRESOLVED_PENALTY * unresolved as i32;
        observations.push(format!("-{} for {} unresolved finding(s)", UNRESOLVED_PENALTY * unresolved as i32, unresolved));
    }

    for (marker, pattern, penalty) in markers() {
        if source.find_code(pattern).is_empty() {
            score -= penalty;
            observations.push(format!("-{} missing {}", penalty, marker));
        }
    }

    if !source.find_code(cached(&TRY_BLOCK, r"(?m)^[ \t]*try[ \t]*:")).is_empty() {
        score += 5;
        observations.push("+5 error handling".to_string());
    }
    // comments and docstrings are masked text, so match on the raw code
    if cached(&COMMENT, r"(?m)^[ \t]*#").is_match(code) {
        score += 2;
        observations.push("+2 comments".to_string());
    }
    if cached(&DOCSTRING, r#"(?m)^[ \t]*(?:"""|''')"#).is_match(code) {
        score += 3;
        observations.push("+3 docstrings".to_string());
    }

    let lines = code.lines().filter(|line| !line.trim().is_empty()).count();
    if expected_lines(config.complexity).contains(&lines) {
        let bonus = match config.complexity {
            Complexity::Simple => 2,
            Complexity::Medium => 4,
            Complexity::Complex => 6,
        };
        score += bonus;
        observations.push(format!("+{} length fits {} complexity", bonus, config.complexity.as_str()));
    }

    let score = score.clamp(0, 100) as u32;
    QualityReport {
        score,
        grade: Grade::from_score(score),
        observations,
    }
}

/// What a module actually renders, read from code positions only
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureScan {
    /// Module-level `MCPToolset(...)` bindings
    pub toolsets: usize,
    /// Enabled side features with no trace in the code
    pub missing: Vec<&'static str>,
}

static LANGFUSE_INIT: OnceLock<Regex> = OnceLock::new();
static MEMORY_INIT: OnceLock<Regex> = OnceLock::new();
static EVENT_ENUM: OnceLock<Regex> = OnceLock::new();
static TOOLSET_BINDING: OnceLock<Regex> = OnceLock::new();

/// Compare `code` with the features `config` enables
pub fn scan_features(code: &str, config: &UnifiedConfiguration) -> FeatureScan {
    let source = Source::new(code);
    let features = [
        (
            "langfuse",
            config.langfuse().is_some(),
            cached(&LANGFUSE_INIT, r"\bLangfuse[ \t]*\("),
        ),
        (
            "memory",
            config.memory().is_some(),
            cached(&MEMORY_INIT, r"\bMemoryClient[ \t]*\("),
        ),
        (
            "event_handling",
            config.event_handling().is_some(),
            cached(&EVENT_ENUM, r"\bclass[ \t]+EventType\b"),
        ),
    ];

    FeatureScan {
        toolsets: source
            .find_code(cached(&TOOLSET_BINDING, r"(?m)^[ \t]*\w+[ \t]*=[ \t]*MCPToolset[ \t]*\("))
            .len(),
        missing: features
            .into_iter()
            .filter(|(_, enabled, marker)| *enabled && source.find_code(marker).is_empty())
            .map(|(feature, _, _)| feature)
            .collect(),
    }
}
