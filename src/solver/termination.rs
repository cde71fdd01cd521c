//! Termination criteria evaluation.
//!
//! All enabled criteria are evaluated every generation; the first satisfied
//! criterion in the fixed priority order below wins. Ties between
//! simultaneously-satisfied criteria are broken by this order, never by
//! mapping iteration order.
//!
//! Priority order:
//! 1. Max Generations
//! 2. Max Infeasible Resamplings
//! 3. Max Value
//! 4. Min Value Difference Threshold
//! 5. Min Standard Deviation
//! 6. Target Annealing Exponent
//!
//! A criterion with a sentinel default (0 for the Max counters) is disabled
//! until set to a non-sentinel value; the value-threshold criteria are
//! disabled while unset.

use crate::config::ConfigTree;
use crate::models::Result;
use serde::{Deserialize, Serialize};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    MaxGenerations,
    MaxInfeasibleResamplings,
    MaxValue,
    MinValueDifference,
    MinStandardDeviation,
    TargetAnnealingExponent,
    /// External cancellation, honored at a batch boundary.
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MaxGenerations => "Max Generations",
            Self::MaxInfeasibleResamplings => "Max Infeasible Resamplings",
            Self::MaxValue => "Max Value",
            Self::MinValueDifference => "Min Value Difference Threshold",
            Self::MinStandardDeviation => "Min Standard Deviation",
            Self::TargetAnnealingExponent => "Target Annealing Exponent",
            Self::Cancelled => "Cancelled",
        })
    }
}

/// Typed view of the solver-internal fields the criteria inspect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverProgress {
    /// Committed generation count; filled in by the run controller.
    pub current_generation: u64,
    /// Cumulative count of infeasible proposals.
    pub infeasible_sample_count: u64,
    /// Best objective value seen so far.
    pub best_value: Option<f64>,
    /// Best objective value as of the previous generation.
    pub previous_best_value: Option<f64>,
    /// Spread of the current population's objective values.
    pub standard_deviation: Option<f64>,
    /// Annealing exponent, for sampler-family solvers.
    pub annealing_exponent: Option<f64>,
}

/// Configured termination criteria for one experiment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminationCriteria {
    pub max_generations: u64,
    pub max_infeasible_resamplings: u64,
    pub max_value: Option<f64>,
    pub min_value_difference: Option<f64>,
    pub min_standard_deviation: Option<f64>,
    pub target_annealing_exponent: Option<f64>,
}

const BRANCH: &str = "Solver/Termination Criteria";

impl TerminationCriteria {
    /// Read the criteria from a validated configuration tree.
    pub fn from_tree(tree: &ConfigTree) -> Result<Self> {
        Ok(Self {
            max_generations: tree
                .get_u64_opt(&format!("{BRANCH}/Max Generations"))?
                .unwrap_or(0),
            max_infeasible_resamplings: tree
                .get_u64_opt(&format!("{BRANCH}/Max Infeasible Resamplings"))?
                .unwrap_or(0),
            max_value: tree.get_f64_opt(&format!("{BRANCH}/Max Value"))?,
            min_value_difference: tree
                .get_f64_opt(&format!("{BRANCH}/Min Value Difference Threshold"))?,
            min_standard_deviation: tree
                .get_f64_opt(&format!("{BRANCH}/Min Standard Deviation"))?,
            target_annealing_exponent: tree
                .get_f64_opt(&format!("{BRANCH}/Target Annealing Exponent"))?,
        })
    }

    /// Evaluate all enabled criteria against the current progress snapshot.
    pub fn evaluate(&self, progress: &SolverProgress) -> Option<StopReason> {
        if self.max_generations > 0 && progress.current_generation >= self.max_generations {
            return Some(StopReason::MaxGenerations);
        }

        if self.max_infeasible_resamplings > 0
            && progress.infeasible_sample_count >= self.max_infeasible_resamplings
        {
            return Some(StopReason::MaxInfeasibleResamplings);
        }

        if let (Some(threshold), Some(best)) = (self.max_value, progress.best_value) {
            if best >= threshold {
                return Some(StopReason::MaxValue);
            }
        }

        if let (Some(threshold), Some(best), Some(previous)) = (
            self.min_value_difference,
            progress.best_value,
            progress.previous_best_value,
        ) {
            if progress.current_generation > 1 && (best - previous).abs() <= threshold {
                return Some(StopReason::MinValueDifference);
            }
        }

        if let (Some(threshold), Some(sd)) = (self.min_standard_deviation, progress.standard_deviation)
        {
            if sd <= threshold {
                return Some(StopReason::MinStandardDeviation);
            }
        }

        if let (Some(target), Some(exponent)) =
            (self.target_annealing_exponent, progress.annealing_exponent)
        {
            if exponent >= target {
                return Some(StopReason::TargetAnnealingExponent);
            }
        }

        None
    }
}
