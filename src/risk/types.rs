//! Finding and assessment types produced by the risk engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a single finding, ordered `info < medium < high < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High => "🟠",
            Severity::Medium => "🟡",
            Severity::Info => "ℹ️",
        }
    }
}

/// Aggregate level of an assessment: the highest finding severity, or `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Info,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Info => "info",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl From<Severity> for RiskLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => RiskLevel::Info,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Honeypot,
    Authority,
    Extension,
    Liquidity,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Honeypot => "honeypot",
            Category::Authority => "authority",
            Category::Extension => "extension",
            Category::Liquidity => "liquidity",
        }
    }
}

/// One discrete observation about a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
}

impl RiskFinding {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
        }
    }

    pub fn info(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    pub fn medium(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Medium, category, message)
    }

    pub fn high(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::High, category, message)
    }

    pub fn critical(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, category, message)
    }
}

/// Raw check results, keyed by category and then by check name.
pub type CheckDetails = BTreeMap<Category, serde_json::Map<String, serde_json::Value>>;

/// Result of one check: its findings plus a raw detail value.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub category: Category,
    pub name: &'static str,
    pub findings: Vec<RiskFinding>,
    pub detail: serde_json::Value,
}

impl CheckReport {
    pub fn new(category: Category, name: &'static str, detail: serde_json::Value) -> Self {
        Self {
            category,
            name,
            findings: Vec::new(),
            detail,
        }
    }

    pub fn with_finding(mut self, finding: RiskFinding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn with_findings(mut self, findings: impl IntoIterator<Item = RiskFinding>) -> Self {
        self.findings.extend(findings);
        self
    }
}

/// Immutable outcome of one assessment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Ordered by descending severity, check order preserved within a severity
    pub findings: Vec<RiskFinding>,
    pub details: CheckDetails,
}

impl RiskAssessment {
    /// Aggregates check reports into a single assessment.
    pub fn from_reports(reports: impl IntoIterator<Item = CheckReport>) -> Self {
        let mut findings = Vec::new();
        let mut details = CheckDetails::new();

        for report in reports {
            details
                .entry(report.category)
                .or_default()
                .insert(report.name.to_string(), report.detail);
            findings.extend(report.findings);
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        let level = findings
            .iter()
            .map(|f| RiskLevel::from(f.severity))
            .max()
            .unwrap_or(RiskLevel::Low);

        Self {
            level,
            findings,
            details,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.level == RiskLevel::Critical
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn findings_in(&self, category: Category) -> impl Iterator<Item = &RiskFinding> {
        self.findings.iter().filter(move |f| f.category == category)
    }
}

impl fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════════")?;
        writeln!(f, "                   TOKEN RISK REPORT")?;
        writeln!(f, "═══════════════════════════════════════════════════════════")?;

        let verdict = match self.level {
            RiskLevel::Critical => "🔴 CRITICAL - do not buy",
            RiskLevel::High => "🟠 HIGH RISK",
            RiskLevel::Medium => "🟡 MEDIUM RISK",
            RiskLevel::Info | RiskLevel::Low => "🟢 LOW RISK",
        };
        writeln!(f, "Risk level: {}", verdict)?;

        if self.findings.is_empty() {
            writeln!(f, "No findings.")?;
        } else {
            writeln!(f)?;
            for finding in &self.findings {
                writeln!(
                    f,
                    "{} [{}] {}",
                    finding.severity.emoji(),
                    finding.category.as_str(),
                    finding.message
                )?;
            }
        }

        writeln!(f, "═══════════════════════════════════════════════════════════")
    }
}
