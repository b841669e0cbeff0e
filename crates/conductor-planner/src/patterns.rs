use crate::specialty::Specialty;
use crate::types::ComplexityTier;
use conductor_core::{ConductorError, ConductorResult};
use regex::Regex;
use serde::Serialize;

/// A single keyword compiled into a case-insensitive whole-word matcher.
#[derive(Debug, Clone)]
pub struct Keyword {
    /// The normalized (trimmed, lowercase) keyword.
    pub text: String,
    regex: Regex,
}

impl Keyword {
    /// Compile a keyword. Empty keywords are a config error.
    pub fn new(text: &str) -> ConductorResult<Self> {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return Err(ConductorError::Config("empty keyword in pattern table".into()));
        }
        let regex = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&text)))
            .map_err(|e| ConductorError::Config(format!("invalid keyword '{text}': {e}")))?;
        Ok(Self { text, regex })
    }

    /// Whether the keyword occurs as a whole word, ignoring case.
    pub fn matches(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

fn compile(words: &[&str]) -> ConductorResult<Vec<Keyword>> {
    words.iter().map(|w| Keyword::new(w)).collect()
}

/// Keyword set for one complexity tier.
#[derive(Debug, Clone)]
pub struct ComplexitySignals {
    pub tier: ComplexityTier,
    /// Points per matching keyword.
    pub weight: f64,
    pub keywords: Vec<Keyword>,
}

impl ComplexitySignals {
    pub fn score(&self, request: &str) -> f64 {
        let hits = self.keywords.iter().filter(|k| k.matches(request)).count();
        hits as f64 * self.weight
    }
}

/// Named task pattern: keyword set mapped to the specialties it needs.
#[derive(Debug, Clone)]
pub struct TaskPattern {
    pub name: &'static str,
    pub keywords: Vec<Keyword>,
    pub specialties: Vec<Specialty>,
    pub typical_hours: f64,
    pub complexity: ComplexityTier,
}

impl TaskPattern {
    pub fn hits(&self, request: &str) -> usize {
        self.keywords.iter().filter(|k| k.matches(request)).count()
    }
}

/// A pattern that matched a request, with its hit count.
#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub name: &'static str,
    pub hits: usize,
    pub specialties: Vec<Specialty>,
    pub typical_hours: f64,
}

/// Validated set of complexity signals and task patterns.
#[derive(Debug, Clone)]
pub struct PatternTable {
    pub complexity: Vec<ComplexitySignals>,
    pub patterns: Vec<TaskPattern>,
}

impl PatternTable {
    /// The built-in pattern table.
    pub fn builtin() -> ConductorResult<Self> {
        let complexity = vec![
            ComplexitySignals {
                tier: ComplexityTier::Simple,
                weight: 1.0,
                keywords: compile(&[
                    "simple", "quick", "basic", "brief", "short", "small", "easy",
                ])?,
            },
            ComplexitySignals {
                tier: ComplexityTier::Moderate,
                weight: 1.0,
                keywords: compile(&[
                    "moderate", "standard", "detailed", "several", "compare", "summary",
                ])?,
            },
            ComplexitySignals {
                tier: ComplexityTier::Complex,
                weight: 1.0,
                keywords: compile(&[
                    "complex",
                    "comprehensive",
                    "in-depth",
                    "multi-step",
                    "integrate",
                    "extensive",
                    "advanced",
                ])?,
            },
            ComplexitySignals {
                tier: ComplexityTier::Enterprise,
                weight: 1.5,
                keywords: compile(&[
                    "enterprise",
                    "organization-wide",
                    "company-wide",
                    "global",
                    "scalable",
                    "stakeholders",
                    "cross-functional",
                ])?,
            },
            ComplexitySignals {
                tier: ComplexityTier::Investigation,
                weight: 1.5,
                keywords: compile(&[
                    "investigate",
                    "investigation",
                    "forensic",
                    "audit",
                    "root cause",
                    "anomaly",
                    "fraud",
                ])?,
            },
        ];

        let patterns = vec![
            TaskPattern {
                name: "market_analysis",
                keywords: compile(&["market", "competitor", "competitive", "industry", "trend"])?,
                specialties: vec![
                    Specialty::MarketResearcher,
                    Specialty::DataAnalyst,
                    Specialty::StrategyConsultant,
                ],
                typical_hours: 16.0,
                complexity: ComplexityTier::Complex,
            },
            TaskPattern {
                name: "research_report",
                keywords: compile(&["research", "report", "study", "literature", "sources"])?,
                specialties: vec![Specialty::ResearchAnalyst, Specialty::ContentWriter],
                typical_hours: 10.0,
                complexity: ComplexityTier::Moderate,
            },
            TaskPattern {
                name: "data_analysis",
                keywords: compile(&[
                    "data",
                    "dataset",
                    "statistics",
                    "metrics",
                    "analyze",
                    "analysis",
                ])?,
                specialties: vec![Specialty::DataAnalyst],
                typical_hours: 8.0,
                complexity: ComplexityTier::Moderate,
            },
            TaskPattern {
                name: "financial_review",
                keywords: compile(&[
                    "financial",
                    "finance",
                    "budget",
                    "revenue",
                    "forecast",
                    "pricing",
                ])?,
                specialties: vec![Specialty::FinancialAnalyst, Specialty::DataAnalyst],
                typical_hours: 12.0,
                complexity: ComplexityTier::Complex,
            },
            TaskPattern {
                name: "content_creation",
                keywords: compile(&["blog", "article", "write", "content", "post", "newsletter"])?,
                specialties: vec![Specialty::ContentWriter],
                typical_hours: 4.0,
                complexity: ComplexityTier::Simple,
            },
            TaskPattern {
                name: "documentation",
                keywords: compile(&["documentation", "docs", "manual", "guide", "api"])?,
                specialties: vec![Specialty::TechnicalWriter],
                typical_hours: 6.0,
                complexity: ComplexityTier::Moderate,
            },
            TaskPattern {
                name: "visual_design",
                keywords: compile(&["design", "visual", "mockup", "brand", "presentation"])?,
                specialties: vec![Specialty::Designer],
                typical_hours: 6.0,
                complexity: ComplexityTier::Moderate,
            },
            TaskPattern {
                name: "investigation",
                keywords: compile(&[
                    "investigate",
                    "investigation",
                    "audit",
                    "fraud",
                    "incident",
                    "root cause",
                ])?,
                specialties: vec![
                    Specialty::Investigator,
                    Specialty::DataAnalyst,
                    Specialty::FactChecker,
                ],
                typical_hours: 20.0,
                complexity: ComplexityTier::Investigation,
            },
            TaskPattern {
                name: "strategy",
                keywords: compile(&[
                    "strategy",
                    "strategic",
                    "roadmap",
                    "recommendation",
                    "recommendations",
                ])?,
                specialties: vec![Specialty::StrategyConsultant, Specialty::ResearchAnalyst],
                typical_hours: 12.0,
                complexity: ComplexityTier::Complex,
            },
            TaskPattern {
                name: "compliance",
                keywords: compile(&[
                    "compliance",
                    "regulatory",
                    "regulation",
                    "gdpr",
                    "policy",
                    "legal",
                ])?,
                specialties: vec![Specialty::ComplianceReviewer, Specialty::ResearchAnalyst],
                typical_hours: 10.0,
                complexity: ComplexityTier::Enterprise,
            },
            TaskPattern {
                name: "delivery",
                keywords: compile(&["deliver", "coordinate", "launch", "rollout", "handoff"])?,
                specialties: vec![Specialty::ProjectCoordinator],
                typical_hours: 3.0,
                complexity: ComplexityTier::Simple,
            },
        ];

        let table = Self {
            complexity,
            patterns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Reject tables with missing tiers, empty patterns or non-positive numbers.
    pub fn validate(&self) -> ConductorResult<()> {
        for tier in ComplexityTier::ALL {
            if !self.complexity.iter().any(|s| s.tier == tier) {
                return Err(ConductorError::Config(format!(
                    "no complexity signals for tier {tier}"
                )));
            }
        }
        for signals in &self.complexity {
            if signals.weight <= 0.0 {
                return Err(ConductorError::Config(format!(
                    "complexity weight for {} must be positive",
                    signals.tier
                )));
            }
        }
        for pattern in &self.patterns {
            if pattern.keywords.is_empty() || pattern.specialties.is_empty() {
                return Err(ConductorError::Config(format!(
                    "pattern '{}' needs keywords and specialties",
                    pattern.name
                )));
            }
            if pattern.typical_hours <= 0.0 {
                return Err(ConductorError::Config(format!(
                    "pattern '{}' must have positive typical hours",
                    pattern.name
                )));
            }
        }
        Ok(())
    }

    /// Patterns that match the request, ranked by hit count (stable on ties).
    pub fn match_patterns(&self, request: &str) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> = self
            .patterns
            .iter()
            .filter_map(|p| {
                let hits = p.hits(request);
                (hits > 0).then(|| PatternMatch {
                    name: p.name,
                    hits,
                    specialties: p.specialties.clone(),
                    typical_hours: p.typical_hours,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.hits.cmp(&a.hits));
        matches
    }
}
