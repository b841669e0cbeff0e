use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of worker capabilities used for both planning and placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    ResearchAnalyst,
    MarketResearcher,
    Investigator,
    DataAnalyst,
    FinancialAnalyst,
    StrategyConsultant,
    ContentWriter,
    TechnicalWriter,
    Designer,
    FactChecker,
    QualityController,
    ComplianceReviewer,
    ProjectCoordinator,
}

impl Specialty {
    pub const ALL: [Specialty; 13] = [
        Specialty::ResearchAnalyst,
        Specialty::MarketResearcher,
        Specialty::Investigator,
        Specialty::DataAnalyst,
        Specialty::FinancialAnalyst,
        Specialty::StrategyConsultant,
        Specialty::ContentWriter,
        Specialty::TechnicalWriter,
        Specialty::Designer,
        Specialty::FactChecker,
        Specialty::QualityController,
        Specialty::ComplianceReviewer,
        Specialty::ProjectCoordinator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Specialty::ResearchAnalyst => "research_analyst",
            Specialty::MarketResearcher => "market_researcher",
            Specialty::Investigator => "investigator",
            Specialty::DataAnalyst => "data_analyst",
            Specialty::FinancialAnalyst => "financial_analyst",
            Specialty::StrategyConsultant => "strategy_consultant",
            Specialty::ContentWriter => "content_writer",
            Specialty::TechnicalWriter => "technical_writer",
            Specialty::Designer => "designer",
            Specialty::FactChecker => "fact_checker",
            Specialty::QualityController => "quality_controller",
            Specialty::ComplianceReviewer => "compliance_reviewer",
            Specialty::ProjectCoordinator => "project_coordinator",
        }
    }

    pub fn group(self) -> SpecialtyGroup {
        match self {
            Specialty::ResearchAnalyst | Specialty::MarketResearcher | Specialty::Investigator => {
                SpecialtyGroup::Research
            }
            Specialty::DataAnalyst
            | Specialty::FinancialAnalyst
            | Specialty::StrategyConsultant => SpecialtyGroup::Analysis,
            Specialty::ContentWriter | Specialty::TechnicalWriter | Specialty::Designer => {
                SpecialtyGroup::Creative
            }
            Specialty::FactChecker
            | Specialty::QualityController
            | Specialty::ComplianceReviewer => SpecialtyGroup::Quality,
            Specialty::ProjectCoordinator => SpecialtyGroup::Delivery,
        }
    }

    /// Execution phase this specialty's sub-tasks belong to.
    pub fn phase(self) -> Phase {
        self.group().phase()
    }

    pub fn is_quality_assurance(self) -> bool {
        self.group() == SpecialtyGroup::Quality
    }
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Specialty {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Specialty::ALL
            .iter()
            .copied()
            .find(|sp| sp.as_str() == normalized)
            .ok_or_else(|| ConductorError::Validation(format!("unknown specialty '{s}'")))
    }
}

/// Pool grouping for specialists. Each group has its own management agent
/// and its own capped pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialtyGroup {
    Research,
    Analysis,
    Creative,
    Quality,
    Delivery,
}

impl SpecialtyGroup {
    pub const ALL: [SpecialtyGroup; 5] = [
        SpecialtyGroup::Research,
        SpecialtyGroup::Analysis,
        SpecialtyGroup::Creative,
        SpecialtyGroup::Quality,
        SpecialtyGroup::Delivery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpecialtyGroup::Research => "research",
            SpecialtyGroup::Analysis => "analysis",
            SpecialtyGroup::Creative => "creative",
            SpecialtyGroup::Quality => "quality",
            SpecialtyGroup::Delivery => "delivery",
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            SpecialtyGroup::Research => Phase::Research,
            SpecialtyGroup::Analysis => Phase::Analysis,
            SpecialtyGroup::Creative => Phase::Creative,
            SpecialtyGroup::Quality => Phase::QualityAssurance,
            SpecialtyGroup::Delivery => Phase::Delivery,
        }
    }
}

impl std::fmt::Display for SpecialtyGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution phase. Phases run in the canonical order of [`Phase::CANONICAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Analysis,
    Creative,
    QualityAssurance,
    Delivery,
}

impl Phase {
    pub const CANONICAL: [Phase; 5] = [
        Phase::Research,
        Phase::Analysis,
        Phase::Creative,
        Phase::QualityAssurance,
        Phase::Delivery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Analysis => "analysis",
            Phase::Creative => "creative",
            Phase::QualityAssurance => "quality_assurance",
            Phase::Delivery => "delivery",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed capability record for one specialty.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialtyProfile {
    pub specialty: Specialty,
    pub title: &'static str,
    /// Billing rate used for cost estimates.
    pub hourly_rate: f64,
    /// Baseline effort for a single sub-task before complexity scaling.
    pub base_hours: f64,
    /// Whether tasks of this specialty may run alongside others in their phase.
    pub parallel_eligible: bool,
    /// Description template; `{request}` is replaced with the original request.
    pub description_template: &'static str,
    pub success_criteria: &'static [&'static str],
    pub quality_checkpoints: &'static [&'static str],
}

impl SpecialtyProfile {
    pub fn describe(&self, request: &str) -> String {
        self.description_template.replace("{request}", request)
    }
}

/// Validated lookup table from [`Specialty`] to its [`SpecialtyProfile`].
#[derive(Debug, Clone)]
pub struct SpecialtyCatalog {
    profiles: HashMap<Specialty, SpecialtyProfile>,
}

impl SpecialtyCatalog {
    /// Build a catalog from explicit profiles, rejecting gaps and bad numbers.
    pub fn new(profiles: Vec<SpecialtyProfile>) -> ConductorResult<Self> {
        let profiles: HashMap<Specialty, SpecialtyProfile> =
            profiles.into_iter().map(|p| (p.specialty, p)).collect();

        for specialty in Specialty::ALL {
            let profile = profiles.get(&specialty).ok_or_else(|| {
                ConductorError::Config(format!("no profile configured for specialty {specialty}"))
            })?;
            if profile.hourly_rate <= 0.0 || profile.base_hours <= 0.0 {
                return Err(ConductorError::Config(format!(
                    "profile for {specialty} must have positive rate and hours"
                )));
            }
            if profile.success_criteria.is_empty() {
                return Err(ConductorError::Config(format!(
                    "profile for {specialty} has no success criteria"
                )));
            }
        }

        Ok(Self { profiles })
    }

    /// The built-in catalog.
    pub fn builtin() -> Self {
        Self {
            profiles: default_profiles()
                .into_iter()
                .map(|p| (p.specialty, p))
                .collect(),
        }
    }

    pub fn get(&self, specialty: Specialty) -> &SpecialtyProfile {
        // Every specialty is present: `new` rejects gaps and `builtin` covers ALL.
        &self.profiles[&specialty]
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for SpecialtyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Default capability records for every specialty.
pub fn default_profiles() -> Vec<SpecialtyProfile> {
    vec![
        SpecialtyProfile {
            specialty: Specialty::ResearchAnalyst,
            title: "Research Analyst",
            hourly_rate: 85.0,
            base_hours: 4.0,
            parallel_eligible: true,
            description_template: "Gather and synthesize background sources for: {request}",
            success_criteria: &[
                "At least five credible sources identified",
                "Key findings summarized with citations",
            ],
            quality_checkpoints: &["source credibility review", "coverage check"],
        },
        SpecialtyProfile {
            specialty: Specialty::MarketResearcher,
            title: "Market Researcher",
            hourly_rate: 90.0,
            base_hours: 5.0,
            parallel_eligible: true,
            description_template: "Map the market landscape and competitors relevant to: {request}",
            success_criteria: &[
                "Competitor set enumerated",
                "Market size and trend indicators captured",
            ],
            quality_checkpoints: &["data recency check", "competitor coverage check"],
        },
        SpecialtyProfile {
            specialty: Specialty::Investigator,
            title: "Investigator",
            hourly_rate: 120.0,
            base_hours: 8.0,
            parallel_eligible: true,
            description_template: "Investigate facts, timeline and evidence for: {request}",
            success_criteria: &[
                "Evidence chain documented",
                "Timeline of events reconstructed",
            ],
            quality_checkpoints: &["evidence integrity review", "chain of custody check"],
        },
        SpecialtyProfile {
            specialty: Specialty::DataAnalyst,
            title: "Data Analyst",
            hourly_rate: 95.0,
            base_hours: 6.0,
            parallel_eligible: true,
            description_template: "Analyze the available data and extract quantitative insights for: {request}",
            success_criteria: &[
                "Statistical summary produced",
                "Insights backed by reproducible analysis",
            ],
            quality_checkpoints: &["methodology review", "calculation spot check"],
        },
        SpecialtyProfile {
            specialty: Specialty::FinancialAnalyst,
            title: "Financial Analyst",
            hourly_rate: 110.0,
            base_hours: 6.0,
            parallel_eligible: true,
            description_template: "Model the financial impact and projections for: {request}",
            success_criteria: &[
                "Financial model with explicit assumptions",
                "Sensitivity analysis included",
            ],
            quality_checkpoints: &["assumption review", "model reconciliation"],
        },
        SpecialtyProfile {
            specialty: Specialty::StrategyConsultant,
            title: "Strategy Consultant",
            hourly_rate: 150.0,
            base_hours: 5.0,
            parallel_eligible: true,
            description_template: "Derive strategic options and recommendations for: {request}",
            success_criteria: &[
                "At least three options evaluated",
                "Recommendation tied to evidence",
            ],
            quality_checkpoints: &["option feasibility review"],
        },
        SpecialtyProfile {
            specialty: Specialty::ContentWriter,
            title: "Content Writer",
            hourly_rate: 70.0,
            base_hours: 4.0,
            parallel_eligible: true,
            description_template: "Draft the written deliverable for: {request}",
            success_criteria: &["Draft covers all required sections", "Tone matches audience"],
            quality_checkpoints: &["readability review", "structure review"],
        },
        SpecialtyProfile {
            specialty: Specialty::TechnicalWriter,
            title: "Technical Writer",
            hourly_rate: 80.0,
            base_hours: 5.0,
            parallel_eligible: true,
            description_template: "Produce technical documentation for: {request}",
            success_criteria: &[
                "Procedures are complete and ordered",
                "Terminology is consistent",
            ],
            quality_checkpoints: &["technical accuracy review"],
        },
        SpecialtyProfile {
            specialty: Specialty::Designer,
            title: "Designer",
            hourly_rate: 85.0,
            base_hours: 6.0,
            parallel_eligible: true,
            description_template: "Create visual assets and layout for: {request}",
            success_criteria: &["Assets match brand guidelines", "Layout approved for delivery"],
            quality_checkpoints: &["visual consistency review"],
        },
        SpecialtyProfile {
            specialty: Specialty::FactChecker,
            title: "Fact Checker",
            hourly_rate: 65.0,
            base_hours: 2.0,
            parallel_eligible: false,
            description_template: "Verify every factual claim produced for: {request}",
            success_criteria: &["All claims traced to a source", "Corrections logged"],
            quality_checkpoints: &["claim verification pass"],
        },
        SpecialtyProfile {
            specialty: Specialty::QualityController,
            title: "Quality Controller",
            hourly_rate: 75.0,
            base_hours: 2.0,
            parallel_eligible: false,
            description_template: "Review the combined deliverables for quality issues in: {request}",
            success_criteria: &["Quality checklist completed", "No blocking defects remain"],
            quality_checkpoints: &["final quality checklist"],
        },
        SpecialtyProfile {
            specialty: Specialty::ComplianceReviewer,
            title: "Compliance Reviewer",
            hourly_rate: 130.0,
            base_hours: 3.0,
            parallel_eligible: false,
            description_template: "Review regulatory and policy compliance for: {request}",
            success_criteria: &[
                "Applicable regulations identified",
                "Compliance gaps documented with remediation",
            ],
            quality_checkpoints: &["regulatory checklist", "sign-off record"],
        },
        SpecialtyProfile {
            specialty: Specialty::ProjectCoordinator,
            title: "Project Coordinator",
            hourly_rate: 60.0,
            base_hours: 2.0,
            parallel_eligible: false,
            description_template: "Assemble and hand off the final deliverables for: {request}",
            success_criteria: &["All artifacts packaged", "Stakeholders notified"],
            quality_checkpoints: &["handoff checklist"],
        },
    ]
}
