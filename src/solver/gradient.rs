//! Resilient sign-based gradient optimizer (Rprop).
//!
//! One sample per generation at the current point; the model supplies the
//! objective and its gradient. Step sizes adapt per dimension from the sign
//! agreement of consecutive gradients.

use crate::config::ConfigTree;
use crate::models::{GeneronError, Result, Sample};
use crate::solver::{
    from_internal, to_internal, Objective, SolverProgress, SolverStrategy, VariableSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RpropState {
    #[serde(rename = "Current Variables")]
    current: Vec<f64>,

    #[serde(rename = "Step Sizes")]
    step_sizes: Vec<f64>,

    #[serde(rename = "Previous Gradient")]
    previous_gradient: Vec<f64>,

    #[serde(rename = "Best Ever Value")]
    best_value: Option<f64>,

    #[serde(rename = "Previous Best Ever Value")]
    previous_best_value: Option<f64>,

    #[serde(rename = "Infeasible Sample Count")]
    infeasible_count: u64,
}

/// The `Optimizer/Rprop` strategy.
pub struct RpropOptimizer {
    objective: Objective,
    increase: f64,
    decrease: f64,
    max_step: f64,
    min_step: f64,
    initial_step: f64,
    starts: Vec<f64>,
    state: RpropState,
}

impl RpropOptimizer {
    /// Build from a validated configuration tree.
    pub fn from_tree(
        tree: &ConfigTree,
        objective: Objective,
        variables: Vec<VariableSpec>,
    ) -> Result<Self> {
        Ok(Self {
            objective,
            increase: tree.get_f64("Solver/Step Increase Factor")?,
            decrease: tree.get_f64("Solver/Step Decrease Factor")?,
            max_step: tree.get_f64("Solver/Max Step Size")?,
            min_step: tree.get_f64("Solver/Min Step Size")?,
            initial_step: tree.get_f64("Solver/Initial Step Size")?,
            starts: variables.iter().map(VariableSpec::start).collect(),
            state: RpropState::default(),
        })
    }
}

impl SolverStrategy for RpropOptimizer {
    fn solver_type(&self) -> &'static str {
        "Optimizer/Rprop"
    }

    fn propose(&mut self, generation: u64) -> Result<Vec<Sample>> {
        if self.state.current.is_empty() {
            self.state.current = self.starts.clone();
            self.state.step_sizes = vec![self.initial_step; self.starts.len()];
            self.state.previous_gradient = vec![0.0; self.starts.len()];
        }
        Ok(vec![Sample::new(0, generation, self.state.current.clone())])
    }

    fn incorporate(&mut self, generation: u64, samples: &[Sample]) -> Result<()> {
        // A usable sample needs both the objective value and its gradient;
        // anything less counts toward the infeasibility criterion.
        let usable = samples
            .first()
            .filter(|s| s.is_usable())
            .and_then(|s| Some((s.result?, s.gradient.as_ref()?)));
        let Some((value, gradient)) = usable else {
            self.state.infeasible_count += samples.len().max(1) as u64;
            return Err(GeneronError::InfeasibleBatch { generation });
        };

        self.state.previous_best_value = self.state.best_value;
        let better = match self.state.best_value {
            None => true,
            Some(best) => self.objective.fitness(value) > self.objective.fitness(best),
        };
        if better {
            self.state.best_value = Some(value);
        }

        // Ascend for Maximize, descend for Minimize.
        let direction = match self.objective {
            Objective::Maximize => 1.0,
            Objective::Minimize => -1.0,
        };

        for d in 0..self.state.current.len() {
            let g = gradient[d];
            let sign_product = g * self.state.previous_gradient[d];

            if sign_product > 0.0 {
                self.state.step_sizes[d] = (self.state.step_sizes[d] * self.increase)
                    .min(self.max_step);
            } else if sign_product < 0.0 {
                self.state.step_sizes[d] = (self.state.step_sizes[d] * self.decrease)
                    .max(self.min_step);
                // Rprop-: suppress the update after a sign flip.
                self.state.previous_gradient[d] = 0.0;
                continue;
            }

            self.state.current[d] += direction * g.signum() * self.state.step_sizes[d];
            self.state.previous_gradient[d] = g;
        }

        Ok(())
    }

    fn progress(&self) -> SolverProgress {
        SolverProgress {
            current_generation: 0,
            infeasible_sample_count: self.state.infeasible_count,
            best_value: self.state.best_value,
            previous_best_value: self.state.previous_best_value,
            standard_deviation: None,
            annealing_exponent: None,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProblemType;

    fn solver(start: f64) -> RpropOptimizer {
        let mut t = ConfigTree::new();
        t.set("Solver/Initial Step Size", 0.1).unwrap();
        t.set("Solver/Step Increase Factor", 1.2).unwrap();
        t.set("Solver/Step Decrease Factor", 0.5).unwrap();
        t.set("Solver/Max Step Size", 1.0).unwrap();
        t.set("Solver/Min Step Size", 1e-9).unwrap();
        let vars = vec![VariableSpec {
            name: "X".into(),
            lower: None,
            upper: None,
            initial_value: Some(start),
        }];
        RpropOptimizer::from_tree(&t, Objective::Maximize, vars).unwrap()
    }

    fn evaluate(batch: &mut [Sample]) {
        for s in batch {
            let x = s.variable(0);
            s.add_result(-x * x);
            s.set_gradient(vec![-2.0 * x]);
        }
    }

    #[test]
    fn climbs_toward_the_optimum() {
        let mut s = solver(-10.0);
        for gen in 1..=200 {
            let mut batch = s.propose(gen).unwrap();
            assert_eq!(batch.len(), 1);
            evaluate(&mut batch);
            s.incorporate(gen, &batch).unwrap();
        }
        let best = s.progress().best_value.unwrap();
        assert!(best > -0.5, "best {best} should approach 0");
    }

    #[test]
    fn contract_expected_on_gradient_problem() {
        let mut s = solver(1.0);
        let batch = s.propose(1).unwrap();
        // Model forgot the gradient: conduit marks the sample failed, and
        // incorporate sees an infeasible batch.
        let mut sample = batch[0].clone();
        sample.add_result(-1.0);
        assert!(ProblemType::DirectGradient.check_contract(&sample).is_err());
        sample.mark_failed("model did not populate gradient");
        assert!(matches!(
            s.incorporate(1, &[sample]),
            Err(GeneronError::InfeasibleBatch { generation: 1 })
        ));
    }

    #[test]
    fn infeasible_batches_advance_the_counter() {
        let mut s = solver(1.0);
        for gen in 1..=3 {
            let mut batch = s.propose(gen).unwrap();
            batch[0].mark_failed("evaluation failed");
            assert!(matches!(
                s.incorporate(gen, &batch),
                Err(GeneronError::InfeasibleBatch { .. })
            ));
        }
        assert_eq!(s.progress().infeasible_sample_count, 3);
    }

    #[test]
    fn restore_continues_from_the_same_point() {
        let mut s = solver(-4.0);
        for gen in 1..=5 {
            let mut batch = s.propose(gen).unwrap();
            evaluate(&mut batch);
            s.incorporate(gen, &batch).unwrap();
        }
        let snapshot = s.internal_state().unwrap();
        let next = s.propose(6).unwrap();

        let mut restored = solver(-4.0);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.propose(6).unwrap(), next);
    }
}
