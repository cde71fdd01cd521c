//! Solver strategies - the per-algorithm generational stepping logic.
//!
//! A strategy owns its internal state (serialized under `Solver/Internal` at
//! every checkpoint), proposes one batch of samples per generation, and
//! incorporates the evaluated batch. Variants are resolved once at
//! initialization from the `Solver/Type` tag.
//!
//! Proposals are replayable: each generation derives its RNG stream from the
//! configured seed and the generation index, so restoring internal state and
//! re-running a generation reproduces identical proposals.

mod annealing;
mod gradient;
mod population;
mod termination;

pub use annealing::*;
pub use gradient::*;
pub use population::*;
pub use termination::*;

use crate::config::ConfigTree;
use crate::models::{GeneronError, ProblemType, Result, Sample};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

/// Optimization direction, from `Problem/Objective`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Maximize,
    Minimize,
}

impl Objective {
    /// Resolve the configuration tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "Maximize" => Ok(Self::Maximize),
            "Minimize" => Ok(Self::Minimize),
            other => Err(GeneronError::SchemaValidation {
                path: "Problem/Objective".to_string(),
                detail: format!("expected Maximize or Minimize, found {other}"),
            }),
        }
    }

    /// Map a raw objective value into maximize convention.
    pub fn fitness(&self, raw: f64) -> f64 {
        match self {
            Self::Maximize => raw,
            Self::Minimize => -raw,
        }
    }
}

/// One declared experiment variable with resolved bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    pub name: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub initial_value: Option<f64>,
}

impl VariableSpec {
    /// Bounds, required for box-constrained strategies.
    pub fn bounds(&self) -> Result<(f64, f64)> {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) if lo <= hi => Ok((lo, hi)),
            _ => Err(GeneronError::SchemaValidation {
                path: format!("Variables/{}", self.name),
                detail: "variable requires Lower Bound <= Upper Bound (or a uniform Prior Distribution)".to_string(),
            }),
        }
    }

    /// Starting point for point-based strategies.
    pub fn start(&self) -> f64 {
        if let Some(v) = self.initial_value {
            return v;
        }
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => 0.5 * (lo + hi),
            _ => 0.0,
        }
    }
}

/// Parse the `Variables` branch, resolving uniform prior distributions
/// declared under `Distributions` into bounds.
pub fn parse_variables(tree: &ConfigTree) -> Result<Vec<VariableSpec>> {
    let count = tree.sequence_len("Variables");
    if count == 0 {
        return Err(GeneronError::SchemaValidation {
            path: "Variables".to_string(),
            detail: "experiment declares no variables".to_string(),
        });
    }

    let mut variables = Vec::with_capacity(count);
    for i in 0..count {
        let name = tree.get_str(&format!("Variables/{i}/Name"))?.to_string();
        let mut lower = tree.get_f64_opt(&format!("Variables/{i}/Lower Bound"))?;
        let mut upper = tree.get_f64_opt(&format!("Variables/{i}/Upper Bound"))?;

        if let Some(dist) = tree.get_str_opt(&format!("Variables/{i}/Prior Distribution"))? {
            let (lo, hi) = resolve_uniform_distribution(tree, dist)?;
            lower.get_or_insert(lo);
            upper.get_or_insert(hi);
        }

        variables.push(VariableSpec {
            name,
            lower,
            upper,
            initial_value: tree.get_f64_opt(&format!("Variables/{i}/Initial Value"))?,
        });
    }
    Ok(variables)
}

/// Find a named `Univariate/Uniform` entry under `Distributions`.
fn resolve_uniform_distribution(tree: &ConfigTree, name: &str) -> Result<(f64, f64)> {
    let count = tree.sequence_len("Distributions");
    for i in 0..count {
        if tree.get_str_opt(&format!("Distributions/{i}/Name"))? != Some(name) {
            continue;
        }
        let kind = tree.get_str(&format!("Distributions/{i}/Type"))?;
        if kind != "Univariate/Uniform" {
            return Err(GeneronError::SchemaValidation {
                path: format!("Distributions/{i}/Type"),
                detail: format!("only Univariate/Uniform priors are supported, found {kind}"),
            });
        }
        let lo = tree.get_f64(&format!("Distributions/{i}/Minimum"))?;
        let hi = tree.get_f64(&format!("Distributions/{i}/Maximum"))?;
        return Ok((lo, hi));
    }
    Err(GeneronError::SchemaValidation {
        path: "Distributions".to_string(),
        detail: format!("no distribution named '{name}'"),
    })
}

/// Derive the RNG for one generation's stream.
///
/// Pure function of (seed, generation, stream), which is what makes proposals
/// replayable after a checkpoint restore.
pub fn generation_rng(seed: u64, generation: u64, stream: u64) -> StdRng {
    let mixed = seed
        ^ generation.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ stream.wrapping_mul(0xD1B5_4A32_D192_ED03);
    StdRng::seed_from_u64(mixed)
}

/// Per-generation stepping logic, polymorphic over the algorithm family.
pub trait SolverStrategy: Send {
    /// The `Solver/Type` tag this strategy answers to.
    fn solver_type(&self) -> &'static str;

    /// Propose the next generation's sample batch.
    fn propose(&mut self, generation: u64) -> Result<Vec<Sample>>;

    /// Incorporate one evaluated batch; never needs more than the single
    /// most recent batch.
    fn incorporate(&mut self, generation: u64, samples: &[Sample]) -> Result<()>;

    /// Progress snapshot for the termination evaluator and console output.
    fn progress(&self) -> SolverProgress;

    /// Serialize internal state for the `Solver/Internal` branch.
    fn internal_state(&self) -> Result<Value>;

    /// Restore internal state wholesale from a checkpoint.
    fn restore(&mut self, state: &Value) -> Result<()>;
}

/// Resolve the `Solver/Type` tag to a strategy instance.
///
/// The seed must already be pinned in the tree (`Random Seed`) so that a
/// resumed run rebuilds the identical stream.
pub fn build(tree: &ConfigTree, problem: ProblemType) -> Result<Box<dyn SolverStrategy>> {
    let tag = tree.get_str("Solver/Type")?;
    let seed = tree.get_u64("Random Seed")?;
    let objective = Objective::from_tag(tree.get_str("Problem/Objective")?)?;
    let variables = parse_variables(tree)?;

    match tag {
        "Optimizer/Population" => Ok(Box::new(PopulationOptimizer::from_tree(
            tree, problem, objective, variables, seed,
        )?)),
        "Optimizer/Rprop" => Ok(Box::new(RpropOptimizer::from_tree(
            tree, objective, variables,
        )?)),
        "Sampler/Annealed" => Ok(Box::new(AnnealedSampler::from_tree(
            tree, variables, seed,
        )?)),
        other => Err(GeneronError::UnknownSolver(other.to_string())),
    }
}

/// Serialize a state struct into the `Solver/Internal` value.
pub(crate) fn to_internal<T: serde::Serialize>(state: &T) -> Result<Value> {
    serde_json::to_value(state)
        .map_err(|e| GeneronError::Internal(format!("serializing solver state: {e}")))
}

/// Deserialize a state struct from the `Solver/Internal` value.
pub(crate) fn from_internal<T: serde::de::DeserializeOwned>(state: &Value) -> Result<T> {
    serde_json::from_value(state.clone())
        .map_err(|e| GeneronError::Parse(format!("invalid solver internal state: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_rng_is_deterministic() {
        use rand::Rng;
        let mut a = generation_rng(1337, 4, 0);
        let mut b = generation_rng(1337, 4, 0);
        let mut c = generation_rng(1337, 5, 0);
        let xa: f64 = a.gen();
        let xb: f64 = b.gen();
        let xc: f64 = c.gen();
        assert_eq!(xa, xb);
        assert_ne!(xa, xc);
    }

    #[test]
    fn variables_resolve_prior_distributions() {
        let mut t = ConfigTree::new();
        t.set("Variables/0/Name", "X").unwrap();
        t.set("Variables/0/Prior Distribution", "Uniform 0").unwrap();
        t.set("Distributions/0/Name", "Uniform 0").unwrap();
        t.set("Distributions/0/Type", "Univariate/Uniform").unwrap();
        t.set("Distributions/0/Minimum", -10.0).unwrap();
        t.set("Distributions/0/Maximum", 10.0).unwrap();

        let vars = parse_variables(&t).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].bounds().unwrap(), (-10.0, 10.0));
    }

    #[test]
    fn missing_distribution_is_an_error() {
        let mut t = ConfigTree::new();
        t.set("Variables/0/Name", "X").unwrap();
        t.set("Variables/0/Prior Distribution", "Nope").unwrap();
        assert!(parse_variables(&t).is_err());
    }

    #[test]
    fn start_prefers_initial_value() {
        let spec = VariableSpec {
            name: "X".into(),
            lower: Some(0.0),
            upper: Some(10.0),
            initial_value: Some(-3.0),
        };
        assert_eq!(spec.start(), -3.0);
        let spec = VariableSpec {
            initial_value: None,
            ..spec
        };
        assert_eq!(spec.start(), 5.0);
    }
}
