use crate::config::PlannerConfig;
use crate::patterns::PatternTable;
use crate::specialty::{Phase, Specialty, SpecialtyCatalog};
use crate::types::{
    ComplexityAssessment, ComplexityTier, QualityGate, SubTask, TaskRequirement, WorkflowPlan,
};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult, RiskLevel};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Priority given to quality-assurance specialties appended by tier.
const QA_PRIORITY: u8 = 7;

/// Turns free-text requests into [`WorkflowPlan`]s.
///
/// Pure and deterministic for a given configuration and pattern table: the
/// only non-reproducible fields are the plan id and timestamps.
#[derive(Debug, Clone)]
pub struct TaskDecomposer {
    config: PlannerConfig,
    catalog: SpecialtyCatalog,
    patterns: PatternTable,
}

impl TaskDecomposer {
    /// Create a decomposer using the built-in catalog and pattern table.
    pub fn new(config: PlannerConfig) -> ConductorResult<Self> {
        Self::with_tables(config, SpecialtyCatalog::builtin(), PatternTable::builtin()?)
    }

    /// Create with custom tables.
    pub fn with_tables(
        config: PlannerConfig,
        catalog: SpecialtyCatalog,
        patterns: PatternTable,
    ) -> ConductorResult<Self> {
        config.validate()?;
        patterns.validate()?;
        Ok(Self {
            config,
            catalog,
            patterns,
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SpecialtyCatalog {
        &self.catalog
    }

    /// Decompose a request into a validated plan.
    pub fn decompose(&self, request: &str) -> ConductorResult<WorkflowPlan> {
        let request = request.trim();
        if request.is_empty() {
            return Err(ConductorError::Validation(
                "request must not be empty".to_string(),
            ));
        }

        let plan_id = Uuid::new_v4().to_string();
        let complexity = self.classify_complexity(request);
        let requirements = self.identify_requirements(request, complexity.tier);

        let mut subtasks = self.generate_subtasks(&plan_id, request, &requirements);
        let mut truncated = false;
        if subtasks.len() > self.config.max_subtasks {
            warn!(
                workflow_id = %plan_id,
                generated = subtasks.len(),
                max = self.config.max_subtasks,
                "Plan exceeds sub-task limit, truncating"
            );
            subtasks.truncate(self.config.max_subtasks);
            truncated = true;
        }

        let phases = build_phases(&subtasks);
        let required_specialists = distinct_specialties(&subtasks);
        let quality_gates = self.quality_gates(&phases, &subtasks);
        let (estimated_hours, estimated_cost) = self.estimate_resources(&subtasks);
        let risk_level = assess_risk(
            estimated_hours,
            complexity.tier,
            required_specialists.len(),
            estimated_cost,
        );
        let approval_reasons =
            self.approval_reasons(estimated_cost, estimated_hours, risk_level, complexity.tier);

        let mut plan = WorkflowPlan {
            id: plan_id,
            request: request.to_string(),
            complexity,
            subtasks,
            phases,
            required_specialists,
            quality_gates,
            estimated_hours,
            estimated_cost,
            risk_level,
            requires_approval: !approval_reasons.is_empty(),
            approval_reasons,
            truncated,
            created_at: Utc::now(),
        };

        if truncated {
            let pruned = plan.prune_dangling_dependencies();
            debug!(workflow_id = %plan.id, pruned, "Pruned dependencies on dropped sub-tasks");
        }
        plan.validate()?;

        info!(
            workflow_id = %plan.id,
            tier = %plan.complexity.tier,
            subtasks = plan.subtasks.len(),
            phases = plan.phases.len(),
            hours = plan.estimated_hours,
            cost = plan.estimated_cost,
            risk = %plan.risk_level,
            requires_approval = plan.requires_approval,
            "Plan created"
        );

        Ok(plan)
    }

    /// Score the request against each tier's keyword set.
    ///
    /// The highest score wins; an all-zero score or a shared maximum resolves
    /// to [`ComplexityTier::Simple`].
    pub fn classify_complexity(&self, request: &str) -> ComplexityAssessment {
        let scores: Vec<(ComplexityTier, f64)> = self
            .patterns
            .complexity
            .iter()
            .map(|s| (s.tier, s.score(request)))
            .collect();

        let best = scores.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
        let leaders: Vec<ComplexityTier> = scores
            .iter()
            .filter(|(_, s)| *s > 0.0 && (*s - best).abs() < f64::EPSILON)
            .map(|(t, _)| *t)
            .collect();

        let tier = match leaders.as_slice() {
            [only] => *only,
            _ => ComplexityTier::Simple,
        };

        ComplexityAssessment {
            tier,
            confidence: (best / 3.0).min(1.0),
            winning_score: best,
        }
    }

    /// Derive per-specialty requirements from matching task patterns.
    pub fn identify_requirements(
        &self,
        request: &str,
        tier: ComplexityTier,
    ) -> Vec<TaskRequirement> {
        let mut seen = HashSet::new();
        let mut requirements = Vec::new();

        for (rank, matched) in self.patterns.match_patterns(request).iter().enumerate() {
            let share = matched.typical_hours / matched.specialties.len() as f64;
            let priority = (9 - rank as i64).clamp(3, 9) as u8;
            for &specialty in &matched.specialties {
                if seen.insert(specialty) {
                    let base = self.catalog.get(specialty).base_hours.max(share);
                    requirements.push(self.requirement(specialty, priority, base, tier));
                }
            }
        }

        if requirements.is_empty() {
            let specialty = self.config.default_specialty;
            debug!(specialty = %specialty, "No task pattern matched, injecting default specialty");
            let base = self.catalog.get(specialty).base_hours;
            seen.insert(specialty);
            requirements.push(self.requirement(
                specialty,
                self.config.default_priority,
                base,
                tier,
            ));
        }

        if tier.needs_quality_assurance() {
            let mut qa = vec![Specialty::FactChecker, Specialty::QualityController];
            if tier == ComplexityTier::Enterprise {
                qa.push(Specialty::ComplianceReviewer);
            }
            for specialty in qa {
                if seen.insert(specialty) {
                    let base = self.catalog.get(specialty).base_hours;
                    requirements.push(self.requirement(specialty, QA_PRIORITY, base, tier));
                }
            }
        }

        requirements
    }

    fn requirement(
        &self,
        specialty: Specialty,
        priority: u8,
        base_hours: f64,
        tier: ComplexityTier,
    ) -> TaskRequirement {
        TaskRequirement {
            specialty,
            priority,
            estimated_hours: base_hours * tier.effort_multiplier(),
            depends_on_phases: gating_phases(specialty.phase()).to_vec(),
            parallel_eligible: self.catalog.get(specialty).parallel_eligible,
        }
    }

    /// One sub-task per requirement, grouped by canonical phase order, with
    /// dependencies wired from the phase gating rules.
    fn generate_subtasks(
        &self,
        plan_id: &str,
        request: &str,
        requirements: &[TaskRequirement],
    ) -> Vec<SubTask> {
        let prefix: String = plan_id.chars().take(8).collect();
        let mut subtasks: Vec<SubTask> = Vec::new();

        for phase in Phase::CANONICAL {
            for req in requirements.iter().filter(|r| r.specialty.phase() == phase) {
                let profile = self.catalog.get(req.specialty);
                let depends_on = subtasks
                    .iter()
                    .filter(|t| req.depends_on_phases.contains(&t.parallel_group))
                    .map(|t| t.id.clone())
                    .collect();

                let mut task = SubTask::new(
                    format!("{prefix}-{:02}-{}", subtasks.len() + 1, req.specialty),
                    format!("{} ({phase})", profile.title),
                    req.specialty,
                    req.estimated_hours,
                )
                .with_phase(phase)
                .with_dependencies(depends_on);
                task.description = profile.describe(request);
                task.priority = req.priority;
                task.parallel_eligible = req.parallel_eligible;
                task.success_criteria = profile
                    .success_criteria
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect();
                task.quality_checkpoints = profile
                    .quality_checkpoints
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect();
                subtasks.push(task);
            }
        }

        subtasks
    }

    /// Critical-path approximation: sequential tasks add up, each phase's
    /// parallel tasks contribute only their longest member.
    pub fn estimate_resources(&self, subtasks: &[SubTask]) -> (f64, f64) {
        let mut sequential = 0.0;
        let mut parallel_max: BTreeMap<Phase, f64> = BTreeMap::new();
        let mut cost = 0.0;

        for task in subtasks {
            if task.parallel_eligible {
                let slot = parallel_max.entry(task.parallel_group).or_insert(0.0);
                *slot = slot.max(task.estimated_hours);
            } else {
                sequential += task.estimated_hours;
            }
            cost += task.estimated_hours * self.catalog.get(task.specialty).hourly_rate;
        }

        let hours = sequential + parallel_max.values().sum::<f64>();
        (round2(hours), round2(cost))
    }

    fn quality_gates(&self, phases: &[Phase], subtasks: &[SubTask]) -> Vec<QualityGate> {
        phases
            .iter()
            .filter(|phase| subtasks.iter().any(|t| t.parallel_group == **phase))
            .map(|&phase| QualityGate {
                name: format!("{phase}_quality"),
                phase,
                threshold: if phase == Phase::QualityAssurance {
                    self.config
                        .qa_gate_threshold
                        .max(self.config.quality_gate_threshold)
                } else {
                    self.config.quality_gate_threshold
                },
            })
            .collect()
    }

    fn approval_reasons(
        &self,
        cost: f64,
        hours: f64,
        risk: RiskLevel,
        tier: ComplexityTier,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if cost > self.config.approval_cost_threshold {
            reasons.push(format!(
                "estimated cost {cost:.2} exceeds {:.2}",
                self.config.approval_cost_threshold
            ));
        }
        if hours > self.config.approval_hours_threshold {
            reasons.push(format!(
                "estimated duration {hours:.1}h exceeds {:.1}h",
                self.config.approval_hours_threshold
            ));
        }
        if risk.requires_approval() {
            reasons.push(format!("risk level is {risk}"));
        }
        if tier == ComplexityTier::Investigation {
            reasons.push("investigation requests always require approval".to_string());
        }
        reasons
    }
}

/// Phases whose tasks gate the given phase.
///
/// Analysis waits on research, creative work waits on analysis, quality
/// assurance waits on every content phase, and delivery waits for everything.
fn gating_phases(phase: Phase) -> &'static [Phase] {
    match phase {
        Phase::Research => &[],
        Phase::Analysis => &[Phase::Research],
        Phase::Creative => &[Phase::Analysis],
        Phase::QualityAssurance => &[Phase::Research, Phase::Analysis, Phase::Creative],
        Phase::Delivery => &[
            Phase::Research,
            Phase::Analysis,
            Phase::Creative,
            Phase::QualityAssurance,
        ],
    }
}

/// Canonical phases that have work, with delivery always last.
fn build_phases(subtasks: &[SubTask]) -> Vec<Phase> {
    let mut phases: Vec<Phase> = Phase::CANONICAL
        .into_iter()
        .filter(|p| *p != Phase::Delivery && subtasks.iter().any(|t| t.parallel_group == *p))
        .collect();
    phases.push(Phase::Delivery);
    phases
}

fn distinct_specialties(subtasks: &[SubTask]) -> Vec<Specialty> {
    let mut seen = HashSet::new();
    subtasks
        .iter()
        .map(|t| t.specialty)
        .filter(|s| seen.insert(*s))
        .collect()
}

/// Deterministic point score over duration, tier, team size and cost.
pub fn assess_risk(
    hours: f64,
    tier: ComplexityTier,
    specialist_count: usize,
    cost: f64,
) -> RiskLevel {
    let mut points = 0;
    points += match hours {
        h if h > 40.0 => 3,
        h if h > 16.0 => 2,
        h if h > 8.0 => 1,
        _ => 0,
    };
    points += match tier {
        ComplexityTier::Simple => 0,
        ComplexityTier::Moderate => 1,
        ComplexityTier::Complex => 2,
        ComplexityTier::Enterprise | ComplexityTier::Investigation => 3,
    };
    points += match specialist_count {
        n if n > 6 => 2,
        n if n > 3 => 1,
        _ => 0,
    };
    points += match cost {
        c if c > 10_000.0 => 3,
        c if c > 5_000.0 => 2,
        c if c > 2_000.0 => 1,
        _ => 0,
    };

    match points {
        p if p >= 9 => RiskLevel::Critical,
        p if p >= 6 => RiskLevel::High,
        p if p >= 3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn decomposer() -> TaskDecomposer {
        TaskDecomposer::new(PlannerConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_request_rejected() {
        let d = decomposer();
        assert!(matches!(
            d.decompose(""),
            Err(ConductorError::Validation(_))
        ));
        assert!(matches!(
            d.decompose("   \n\t"),
            Err(ConductorError::Validation(_))
        ));
    }

    #[test]
    fn test_unmatched_request_gets_default_specialty() {
        let plan = decomposer().decompose("simple task").unwrap();
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].specialty, Specialty::ResearchAnalyst);
        assert_eq!(plan.subtasks[0].priority, 5);
        assert_eq!(plan.complexity.tier, ComplexityTier::Simple);
        assert_eq!(plan.phases, vec![Phase::Research, Phase::Delivery]);
    }

    #[test]
    fn test_classify_tiers() {
        let d = decomposer();
        assert_eq!(
            d.classify_complexity("a comprehensive and in-depth review").tier,
            ComplexityTier::Complex
        );
        assert_eq!(
            d.classify_complexity("enterprise rollout for global stakeholders").tier,
            ComplexityTier::Enterprise
        );
        assert_eq!(
            d.classify_complexity("investigate the fraud anomaly").tier,
            ComplexityTier::Investigation
        );
    }

    #[test]
    fn test_classify_tie_resolves_to_simple() {
        let d = decomposer();
        // one complex hit and one moderate hit, equal weight
        let assessment = d.classify_complexity("a detailed yet comprehensive note");
        assert_eq!(assessment.tier, ComplexityTier::Simple);
        assert!(assessment.confidence > 0.0);
    }

    #[test]
    fn test_classify_no_signal() {
        let assessment = decomposer().classify_complexity("hello there");
        assert_eq!(assessment.tier, ComplexityTier::Simple);
        assert_eq!(assessment.confidence, 0.0);
    }

    #[test]
    fn test_confidence_saturates() {
        let assessment = decomposer()
            .classify_complexity("investigate forensic audit of the fraud anomaly root cause");
        assert_eq!(assessment.confidence, 1.0);
    }

    #[test]
    fn test_qa_specialties_appended_for_complex() {
        let d = decomposer();
        let reqs = d.identify_requirements("market trend report", ComplexityTier::Complex);
        let specialties: Vec<Specialty> = reqs.iter().map(|r| r.specialty).collect();
        assert!(specialties.contains(&Specialty::FactChecker));
        assert!(specialties.contains(&Specialty::QualityController));
        assert!(!specialties.contains(&Specialty::ComplianceReviewer));

        let reqs = d.identify_requirements("market trend report", ComplexityTier::Enterprise);
        assert!(reqs
            .iter()
            .any(|r| r.specialty == Specialty::ComplianceReviewer));
    }

    #[test]
    fn test_specialties_deduplicated_in_rank_order() {
        let d = decomposer();
        let reqs = d.identify_requirements(
            "market competitor industry trend data",
            ComplexityTier::Moderate,
        );
        let specialties: Vec<Specialty> = reqs.iter().map(|r| r.specialty).collect();
        assert_eq!(specialties[0], Specialty::MarketResearcher);
        let analysts = specialties
            .iter()
            .filter(|s| **s == Specialty::DataAnalyst)
            .count();
        assert_eq!(analysts, 1);
    }

    #[test]
    fn test_dependency_wiring() {
        let plan = decomposer()
            .decompose("comprehensive market research report with data analysis")
            .unwrap();
        let research: Vec<&SubTask> = plan.tasks_in_phase(Phase::Research);
        let analysis: Vec<&SubTask> = plan.tasks_in_phase(Phase::Analysis);
        let creative: Vec<&SubTask> = plan.tasks_in_phase(Phase::Creative);
        let qa: Vec<&SubTask> = plan.tasks_in_phase(Phase::QualityAssurance);
        assert!(!research.is_empty() && !analysis.is_empty() && !qa.is_empty());
        assert!(!creative.is_empty());

        for task in &analysis {
            for r in &research {
                assert!(task.depends_on.contains(&r.id));
            }
        }
        // creative is gated by analysis only
        for task in &creative {
            for a in &analysis {
                assert!(task.depends_on.contains(&a.id));
            }
            for r in &research {
                assert!(!task.depends_on.contains(&r.id));
            }
        }
        for task in &qa {
            for other in plan
                .subtasks
                .iter()
                .filter(|t| t.parallel_group != Phase::QualityAssurance)
            {
                assert!(task.depends_on.contains(&other.id));
            }
        }
        for task in &research {
            assert!(task.depends_on.is_empty());
        }
    }

    #[test]
    fn test_phases_filtered_and_delivery_last() {
        let plan = decomposer().decompose("write a blog post").unwrap();
        assert_eq!(plan.phases, vec![Phase::Creative, Phase::Delivery]);
    }

    #[test]
    fn test_resource_estimate_critical_path() {
        let d = decomposer();
        let mut a = SubTask::new("a", "A", Specialty::ResearchAnalyst, 4.0);
        a.parallel_eligible = true;
        let mut b = SubTask::new("b", "B", Specialty::MarketResearcher, 6.0);
        b.parallel_eligible = true;
        let mut c = SubTask::new("c", "C", Specialty::FactChecker, 2.0);
        c.parallel_eligible = false;
        let (hours, cost) = d.estimate_resources(&[a, b, c]);
        assert_eq!(hours, 8.0);
        assert_eq!(cost, 4.0 * 85.0 + 6.0 * 90.0 + 2.0 * 65.0);
    }

    #[test]
    fn test_risk_scoring() {
        assert_eq!(assess_risk(2.0, ComplexityTier::Simple, 1, 200.0), RiskLevel::Low);
        assert_eq!(
            assess_risk(20.0, ComplexityTier::Moderate, 2, 1_000.0),
            RiskLevel::Medium
        );
        assert_eq!(
            assess_risk(30.0, ComplexityTier::Complex, 5, 3_000.0),
            RiskLevel::High
        );
        assert_eq!(
            assess_risk(80.0, ComplexityTier::Enterprise, 8, 20_000.0),
            RiskLevel::Critical
        );
    }

    #[test]
    fn test_investigation_requires_approval() {
        let plan = decomposer()
            .decompose("investigate the incident")
            .unwrap();
        assert_eq!(plan.complexity.tier, ComplexityTier::Investigation);
        assert!(plan.requires_approval);
        assert!(plan
            .approval_reasons
            .iter()
            .any(|r| r.contains("investigation")));
    }

    #[test]
    fn test_simple_plan_needs_no_approval() {
        let plan = decomposer().decompose("simple task").unwrap();
        assert!(!plan.requires_approval);
        assert_eq!(plan.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_truncation_keeps_dependency_closure() {
        let config = PlannerConfig {
            max_subtasks: 3,
            ..PlannerConfig::default()
        };
        let d = TaskDecomposer::new(config).unwrap();
        let plan = d
            .decompose(
                "enterprise market research strategy with financial data and compliance \
                 review, write a report and design a presentation",
            )
            .unwrap();
        assert!(plan.truncated);
        assert_eq!(plan.subtasks.len(), 3);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_quality_gates_per_phase() {
        let plan = decomposer()
            .decompose("comprehensive market report")
            .unwrap();
        let qa_gate = plan
            .quality_gates
            .iter()
            .find(|g| g.phase == Phase::QualityAssurance)
            .unwrap();
        assert_eq!(qa_gate.threshold, 0.85);
        assert!(plan
            .quality_gates
            .iter()
            .all(|g| plan.subtasks.iter().any(|t| t.parallel_group == g.phase)));
    }
}
