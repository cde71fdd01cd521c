//! Problem type tags and the model evaluation contract.
//!
//! A problem type determines which result field the computational model must
//! populate on each sample before returning. Absence of the expected field is
//! a contract violation, recorded on the sample by the conduit.

use crate::models::{GeneronError, Result, Sample};
use serde::{Deserialize, Serialize};

/// The kind of evaluation an experiment performs.
///
/// Selected once at initialization from the `Problem/Type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemType {
    /// Model calls `add_result` with the objective value.
    Direct,
    /// Model calls `add_result` and `set_gradient`.
    DirectGradient,
    /// Model calls `set_log_likelihood`.
    Bayesian,
}

impl ProblemType {
    /// Resolve a configuration tag to a problem type.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "Evaluation/Direct" => Ok(Self::Direct),
            "Evaluation/Direct/Gradient" => Ok(Self::DirectGradient),
            "Evaluation/Bayesian" => Ok(Self::Bayesian),
            other => Err(GeneronError::UnknownProblem(other.to_string())),
        }
    }

    /// The configuration tag for this problem type.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Direct => "Evaluation/Direct",
            Self::DirectGradient => "Evaluation/Direct/Gradient",
            Self::Bayesian => "Evaluation/Bayesian",
        }
    }

    /// Verify that the model populated the field this problem type expects.
    pub fn check_contract(&self, sample: &Sample) -> Result<()> {
        match self {
            Self::Direct => {
                if sample.result.is_none() {
                    return Err(GeneronError::ModelContractViolation { expected: "result" });
                }
            }
            Self::DirectGradient => {
                if sample.result.is_none() {
                    return Err(GeneronError::ModelContractViolation { expected: "result" });
                }
                match &sample.gradient {
                    None => {
                        return Err(GeneronError::ModelContractViolation {
                            expected: "gradient",
                        })
                    }
                    Some(g) if g.len() != sample.variables.len() => {
                        return Err(GeneronError::ModelContractViolation {
                            expected: "gradient of variable dimension",
                        })
                    }
                    _ => {}
                }
            }
            Self::Bayesian => {
                if sample.log_likelihood.is_none() {
                    return Err(GeneronError::ModelContractViolation {
                        expected: "log-likelihood",
                    });
                }
            }
        }
        Ok(())
    }

    /// The objective value a solver maximizes for this problem type.
    pub fn objective_value(&self, sample: &Sample) -> Option<f64> {
        match self {
            Self::Direct | Self::DirectGradient => sample.result,
            Self::Bayesian => sample.log_likelihood,
        }
    }
}

impl std::fmt::Display for ProblemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
