//! Turning captured interpreter diagnostics into typed records

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Diagnostic severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    Fatal,
    Parse,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Fatal => "fatal error",
            Severity::Parse => "parse error",
        };
        f.write_str(label)
    }
}

/// One classified diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    /// Matched line(s), verbatim
    pub message: String,
    /// The complete log text the record was derived from
    pub raw: String,
}

impl DiagnosticRecord {
    pub fn new(severity: Severity, message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            raw: raw.into(),
        }
    }
}

/// Strategy deciding what a captured log means
pub trait LogClassifier: Send + Sync {
    /// `None` means the log carries no diagnostic
    fn classify(&self, log: &str) -> Option<DiagnosticRecord>;
}

/// A severity and the line pattern that signals it
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub severity: Severity,
    pub pattern: Regex,
}

/// Line-pattern classifier.
///
/// Every line is tested against every rule and the most severe match wins,
/// regardless of where it appears. Text that matches nothing is reported as
/// a fatal error so an unexpected crash is never read as success.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Vec<ClassifierRule>,
}

/// Optional `[date] ` stamp written by `error_log`, then the optional `PHP ` prefix
const LINE_PREFIX: &str = r"^(?:\[[^\]]*\]\s*)?(?:PHP\s+)?";

const PHP_RULES: &[(Severity, &str)] = &[
    (Severity::Parse, r"Parse error:"),
    (
        Severity::Fatal,
        r"(?:Fatal error|Catchable fatal error|Recoverable fatal error):",
    ),
    (Severity::Warning, r"Warning:"),
    (Severity::Notice, r"(?:Notice|Deprecated|Strict Standards):"),
];

impl PatternClassifier {
    /// Build from `(severity, pattern)` pairs. Patterns are matched against
    /// each line of the log, as given.
    pub fn new<'a, I>(rules: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (Severity, &'a str)>,
    {
        let rules = rules
            .into_iter()
            .map(|(severity, pattern)| {
                Ok(ClassifierRule {
                    severity,
                    pattern: Regex::new(pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Rules for the PHP CLI's log format
    pub fn php() -> Self {
        static PHP: OnceLock<PatternClassifier> = OnceLock::new();
        PHP.get_or_init(|| {
            let rules = PHP_RULES
                .iter()
                .map(|(severity, label)| ClassifierRule {
                    severity: *severity,
                    pattern: Regex::new(&format!("{}{}", LINE_PREFIX, label))
                        .expect("built-in diagnostic pattern"),
                })
                .collect();
            PatternClassifier { rules }
        })
        .clone()
    }

    /// Add a rule; returns an error if the pattern does not compile
    pub fn with_rule(mut self, severity: Severity, pattern: &str) -> Result<Self, regex::Error> {
        self.rules.push(ClassifierRule {
            severity,
            pattern: Regex::new(pattern)?,
        });
        Ok(self)
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    fn severity_of(&self, line: &str) -> Option<Severity> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(line))
            .map(|rule| rule.severity)
            .max()
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::php()
    }
}

impl LogClassifier for PatternClassifier {
    fn classify(&self, log: &str) -> Option<DiagnosticRecord> {
        let trimmed = log.trim();
        if trimmed.is_empty() {
            return None;
        }

        let matched: Vec<(Severity, &str)> = trimmed
            .lines()
            .filter_map(|line| self.severity_of(line).map(|severity| (severity, line)))
            .collect();

        let Some(worst) = matched.iter().map(|(severity, _)| *severity).max() else {
            tracing::debug!("Unrecognised diagnostic output, treating as fatal");
            return Some(DiagnosticRecord::new(Severity::Fatal, trimmed, log));
        };

        let message = matched
            .iter()
            .filter(|(severity, _)| *severity == worst)
            .map(|(_, line)| *line)
            .collect::<Vec<_>>()
            .join("\n");

        Some(DiagnosticRecord::new(worst, message, log))
    }
}
