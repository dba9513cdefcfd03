//! Fair distribution of work across a job's search terms.
//!
//! Phase 1 (coverage) attempts every term exactly once, in input order,
//! asking each for an equal share of the target. Phase 2 (refinement)
//! starts only after every term has been attempted and the target is still
//! unmet; it repeatedly asks the weakest eligible term for the remaining
//! deficit until the target is reached or the refinement budget runs out.

use serde::Serialize;

use crate::job::SearchJob;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Upper bound on any single provider request.
    pub max_batch_size: u32,
    /// Phase-2 steps allowed per job.
    pub max_refinement_attempts: u32,
    /// Failures after which a term is skipped in phase 2.
    pub max_term_failures: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_refinement_attempts: 10,
            max_term_failures: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Coverage,
    Refinement,
}

/// The next provider call to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub term: String,
    /// Number of results to ask the provider for.
    pub requested: u32,
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Fetch(WorkUnit),
    TargetReached,
    /// Every term attempted and no refinement possible.
    Exhausted,
}

/// Decide the next unit of work for `job`.
pub fn plan(job: &SearchJob, config: &PlannerConfig) -> PlanDecision {
    if job.is_target_reached() {
        return PlanDecision::TargetReached;
    }

    let terms = job.terms();
    if terms.is_empty() {
        return PlanDecision::Exhausted;
    }

    // Phase 1: first term never attempted, in input order.
    if let Some(term) = terms
        .iter()
        .find(|t| !job.attempted_keywords.contains(**t))
    {
        let share = job.target_result_count.div_ceil(terms.len() as u32);
        return PlanDecision::Fetch(WorkUnit {
            term: term.to_string(),
            requested: share.clamp(1, config.max_batch_size.max(1)),
            phase: Phase::Coverage,
        });
    }

    // Phase 2
    let refinements = job.cursor.as_ref().map_or(0, |c| c.refinement_attempts);
    if refinements >= config.max_refinement_attempts {
        return PlanDecision::Exhausted;
    }

    let weakest = terms
        .iter()
        .filter(|t| is_refinable(job, t, config))
        .min_by_key(|t| job.count_for(t));

    match weakest {
        Some(term) => {
            let deficit = job.target_result_count - job.processed_result_count;
            PlanDecision::Fetch(WorkUnit {
                term: term.to_string(),
                requested: deficit.clamp(1, config.max_batch_size.max(1)),
                phase: Phase::Refinement,
            })
        }
        None => PlanDecision::Exhausted,
    }
}

fn is_refinable(job: &SearchJob, term: &str, config: &PlannerConfig) -> bool {
    match job.term_cursor(term) {
        Some(cursor) => !cursor.exhausted && cursor.failures < config.max_term_failures,
        None => true,
    }
}

/// True when every term has been given up on after failing.
pub fn all_terms_failed(job: &SearchJob) -> bool {
    let terms = job.terms();
    !terms.is_empty()
        && terms
            .iter()
            .all(|t| job.term_cursor(t).is_some_and(|c| c.failures > 0))
}
