//! Transitional annealed sampler.
//!
//! A chain population is drawn from the uniform prior, then reweighted and
//! resampled each generation while the annealing exponent climbs from 0
//! toward its target (default 1.0, the full posterior). The exponent
//! schedule is a fixed configured increment; the `Target Annealing Exponent`
//! criterion stops the run when the schedule completes.

use crate::config::ConfigTree;
use crate::models::{GeneronError, Result, Sample};
use crate::solver::{
    from_internal, generation_rng, to_internal, SolverProgress, SolverStrategy, VariableSpec,
};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AnnealedState {
    #[serde(rename = "Annealing Exponent")]
    exponent: f64,

    #[serde(rename = "Chain Points")]
    points: Vec<Vec<f64>>,

    #[serde(rename = "Chain Log Likelihoods")]
    log_likelihoods: Vec<f64>,

    #[serde(rename = "Log Evidence")]
    log_evidence: f64,

    #[serde(rename = "Best Ever Value")]
    best_value: Option<f64>,

    #[serde(rename = "Previous Best Ever Value")]
    previous_best_value: Option<f64>,

    #[serde(rename = "Current Standard Deviation")]
    standard_deviation: Option<f64>,

    #[serde(rename = "Infeasible Sample Count")]
    infeasible_count: u64,
}

/// The `Sampler/Annealed` strategy.
pub struct AnnealedSampler {
    bounds: Vec<(f64, f64)>,
    population_size: usize,
    increment: f64,
    chain_scale: f64,
    seed: u64,
    state: AnnealedState,
}

impl AnnealedSampler {
    /// Build from a validated configuration tree.
    pub fn from_tree(tree: &ConfigTree, variables: Vec<VariableSpec>, seed: u64) -> Result<Self> {
        let bounds = variables
            .iter()
            .map(VariableSpec::bounds)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bounds,
            population_size: tree.get_u64("Solver/Population Size")? as usize,
            increment: tree.get_f64("Solver/Annealing Increment")?,
            chain_scale: tree.get_f64("Solver/Chain Scale")?,
            seed,
            state: AnnealedState::default(),
        })
    }

    /// Per-dimension spread of the current chain population.
    fn chain_spread(&self) -> Vec<f64> {
        let dims = self.bounds.len();
        let n = self.state.points.len().max(1) as f64;
        (0..dims)
            .map(|d| {
                let mean = self.state.points.iter().map(|p| p[d]).sum::<f64>() / n;
                let var = self
                    .state
                    .points
                    .iter()
                    .map(|p| (p[d] - mean).powi(2))
                    .sum::<f64>()
                    / n;
                var.sqrt().max(1e-12)
            })
            .collect()
    }
}

impl SolverStrategy for AnnealedSampler {
    fn solver_type(&self) -> &'static str {
        "Sampler/Annealed"
    }

    fn propose(&mut self, generation: u64) -> Result<Vec<Sample>> {
        let mut rng = generation_rng(self.seed, generation, 0);
        let mut batch = Vec::with_capacity(self.population_size);

        if self.state.points.is_empty() {
            // Initial generation: draws from the uniform prior.
            for id in 0..self.population_size {
                let point: Vec<f64> = self
                    .bounds
                    .iter()
                    .map(|(lo, hi)| rng.gen_range(*lo..=*hi))
                    .collect();
                batch.push(Sample::new(id, generation, point));
            }
            return Ok(batch);
        }

        let spread = self.chain_spread();
        for id in 0..self.population_size {
            let base = &self.state.points[id % self.state.points.len()];
            let point: Vec<f64> = base
                .iter()
                .zip(&spread)
                .zip(&self.bounds)
                .map(|((center, sd), (lo, hi))| {
                    let normal = Normal::new(*center, self.chain_scale * sd)
                        .unwrap_or_else(|_| Normal::new(*center, 1.0).unwrap());
                    normal.sample(&mut rng).clamp(*lo, *hi)
                })
                .collect();
            batch.push(Sample::new(id, generation, point));
        }
        Ok(batch)
    }

    fn incorporate(&mut self, generation: u64, samples: &[Sample]) -> Result<()> {
        let mut usable: Vec<(&Sample, f64)> = Vec::new();
        for sample in samples {
            match (sample.is_usable(), sample.log_likelihood) {
                (true, Some(ll)) => usable.push((sample, ll)),
                _ => self.state.infeasible_count += 1,
            }
        }
        if usable.is_empty() {
            return Err(GeneronError::InfeasibleBatch { generation });
        }

        let lls: Vec<f64> = usable.iter().map(|(_, ll)| *ll).collect();
        let max_ll = lls.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        self.state.previous_best_value = self.state.best_value;
        self.state.best_value = Some(match self.state.best_value {
            None => max_ll,
            Some(best) => best.max(max_ll),
        });

        // Advance the annealing schedule and reweight.
        let p0 = self.state.exponent;
        let p1 = (p0 + self.increment).min(1.0);
        let delta = p1 - p0;

        let weights: Vec<f64> = lls.iter().map(|ll| (delta * (ll - max_ll)).exp()).collect();
        let total: f64 = weights.iter().sum();
        self.state.log_evidence += delta * max_ll + (total / weights.len() as f64).ln();

        // Multinomial resampling, deterministic per (seed, generation).
        let mut rng = generation_rng(self.seed, generation, 1);
        let mut points = Vec::with_capacity(self.population_size);
        let mut resampled_lls = Vec::with_capacity(self.population_size);
        for _ in 0..self.population_size {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = usable.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            points.push(usable[chosen].0.variables.clone());
            resampled_lls.push(lls[chosen]);
        }

        self.state.points = points;
        self.state.log_likelihoods = resampled_lls;
        self.state.exponent = p1;

        let mean = lls.iter().sum::<f64>() / lls.len() as f64;
        let var = lls.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / lls.len() as f64;
        self.state.standard_deviation = Some(var.sqrt());
        Ok(())
    }

    fn progress(&self) -> SolverProgress {
        SolverProgress {
            current_generation: 0,
            infeasible_sample_count: self.state.infeasible_count,
            best_value: self.state.best_value,
            previous_best_value: self.state.previous_best_value,
            standard_deviation: self.state.standard_deviation,
            annealing_exponent: Some(self.state.exponent),
        }
    }

    fn internal_state(&self) -> Result<Value> {
        to_internal(&self.state)
    }

    fn restore(&mut self, state: &Value) -> Result<()> {
        self.state = from_internal(state)?;
        Ok(())
    }
}
