//! Recognized-option schemas per Problem Type × Solver Type pair.
//!
//! Validation runs once at `Initializing`: present options are type-checked,
//! declared defaults are applied (in declared order, so defaulting is
//! deterministic for a given pair), and unknown paths are rejected with the
//! offending path. Keys under `Solver/Internal` and `General` are owned by
//! the solver and the run controller respectively and pass through untouched.

use crate::config::tree::{value_kind, ConfigTree};
use crate::models::{GeneronError, ProblemType, Result};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Expected kind of a recognized option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Number,
    Integer,
    String,
    Bool,
}

/// One recognized configuration option.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub path: &'static str,
    pub kind: OptionKind,
    pub default: Option<Value>,
}

impl OptionSpec {
    fn new(path: &'static str, kind: OptionKind, default: Option<Value>) -> Self {
        Self {
            path,
            kind,
            default,
        }
    }
}

/// Branches whose contents are not enumerated option-by-option.
const FREE_PREFIXES: &[&str] = &["Solver/Internal", "General"];

/// Keys allowed on each `Variables` entry.
const VARIABLE_KEYS: &[&str] = &[
    "Name",
    "Lower Bound",
    "Upper Bound",
    "Initial Value",
    "Prior Distribution",
];

/// Keys allowed on each `Distributions` entry.
const DISTRIBUTION_KEYS: &[&str] = &["Name", "Type", "Minimum", "Maximum"];

/// The recognized-option set for one Problem Type × Solver Type pair.
#[derive(Debug, Clone)]
pub struct Schema {
    problem: ProblemType,
    solver_type: String,
    options: Vec<OptionSpec>,
}

impl Schema {
    /// Build the schema for a pair, rejecting unknown solvers and
    /// solver/problem combinations that cannot work.
    pub fn for_pair(problem: ProblemType, solver_type: &str) -> Result<Self> {
        let mut options = common_options();

        match solver_type {
            "Optimizer/Population" => {
                options.extend([
                    OptionSpec::new(
                        "Solver/Population Size",
                        OptionKind::Integer,
                        Some(json!(32)),
                    ),
                    OptionSpec::new(
                        "Solver/Initial Step Scale",
                        OptionKind::Number,
                        Some(json!(0.3)),
                    ),
                    OptionSpec::new("Solver/Step Decay", OptionKind::Number, Some(json!(0.97))),
                ]);
            }
            "Optimizer/Rprop" => {
                if problem != ProblemType::DirectGradient {
                    return Err(GeneronError::SchemaValidation {
                        path: "Problem/Type".to_string(),
                        detail: format!(
                            "Optimizer/Rprop requires Evaluation/Direct/Gradient, found {problem}"
                        ),
                    });
                }
                options.extend([
                    OptionSpec::new(
                        "Solver/Initial Step Size",
                        OptionKind::Number,
                        Some(json!(0.1)),
                    ),
                    OptionSpec::new(
                        "Solver/Step Increase Factor",
                        OptionKind::Number,
                        Some(json!(1.2)),
                    ),
                    OptionSpec::new(
                        "Solver/Step Decrease Factor",
                        OptionKind::Number,
                        Some(json!(0.5)),
                    ),
                    OptionSpec::new("Solver/Max Step Size", OptionKind::Number, Some(json!(1.0))),
                    OptionSpec::new(
                        "Solver/Min Step Size",
                        OptionKind::Number,
                        Some(json!(1e-9)),
                    ),
                ]);
            }
            "Sampler/Annealed" => {
                if problem != ProblemType::Bayesian {
                    return Err(GeneronError::SchemaValidation {
                        path: "Problem/Type".to_string(),
                        detail: format!(
                            "Sampler/Annealed requires Evaluation/Bayesian, found {problem}"
                        ),
                    });
                }
                options.extend([
                    OptionSpec::new(
                        "Solver/Population Size",
                        OptionKind::Integer,
                        Some(json!(1000)),
                    ),
                    OptionSpec::new(
                        "Solver/Annealing Increment",
                        OptionKind::Number,
                        Some(json!(0.2)),
                    ),
                    OptionSpec::new("Solver/Chain Scale", OptionKind::Number, Some(json!(0.5))),
                    OptionSpec::new(
                        "Solver/Termination Criteria/Target Annealing Exponent",
                        OptionKind::Number,
                        Some(json!(1.0)),
                    ),
                ]);
            }
            other => return Err(GeneronError::UnknownSolver(other.to_string())),
        }

        Ok(Self {
            problem,
            solver_type: solver_type.to_string(),
            options,
        })
    }

    /// The problem type this schema was built for.
    pub fn problem(&self) -> ProblemType {
        self.problem
    }

    /// The solver tag this schema was built for.
    pub fn solver_type(&self) -> &str {
        &self.solver_type
    }

    /// Validate a tree: type-check present options, apply defaults for the
    /// recognized-but-unset ones, reject unknown paths.
    pub fn validate(&self, tree: &mut ConfigTree) -> Result<()> {
        // Present options must carry the declared kind.
        for opt in &self.options {
            if let Some(value) = tree.get_opt(opt.path) {
                check_kind(opt.path, opt.kind, value)?;
            }
        }

        // Defaults, in declared order.
        for opt in &self.options {
            if let Some(default) = &opt.default {
                tree.set_default(opt.path, default.clone())?;
            }
        }

        // Unknown-path sweep.
        let recognized: HashSet<&str> = self.options.iter().map(|o| o.path).collect();
        let mut leaves = Vec::new();
        collect_leaves(tree.root(), String::new(), &mut leaves);
        for path in leaves {
            if recognized.contains(path.as_str()) {
                continue;
            }
            if FREE_PREFIXES
                .iter()
                .any(|p| path == *p || path.starts_with(&format!("{p}/")))
            {
                continue;
            }
            if path.starts_with("Variables/") || path.starts_with("Distributions/") {
                continue; // validated entry-wise below
            }
            return Err(GeneronError::SchemaValidation {
                path,
                detail: format!(
                    "unrecognized option for {} × {}",
                    self.problem, self.solver_type
                ),
            });
        }

        self.validate_entries(tree, "Variables", VARIABLE_KEYS, true)?;
        self.validate_entries(tree, "Distributions", DISTRIBUTION_KEYS, false)?;
        Ok(())
    }

    fn validate_entries(
        &self,
        tree: &ConfigTree,
        branch: &str,
        allowed: &[&str],
        name_required: bool,
    ) -> Result<()> {
        let Some(entries) = tree.get_opt(branch).and_then(Value::as_array) else {
            return Ok(());
        };
        for (i, entry) in entries.iter().enumerate() {
            let Some(map) = entry.as_object() else {
                return Err(GeneronError::SchemaValidation {
                    path: format!("{branch}/{i}"),
                    detail: format!("expected a mapping, found {}", value_kind(entry)),
                });
            };
            for key in map.keys() {
                if !allowed.contains(&key.as_str()) {
                    return Err(GeneronError::SchemaValidation {
                        path: format!("{branch}/{i}/{key}"),
                        detail: "unrecognized entry key".to_string(),
                    });
                }
            }
            if name_required && !map.get("Name").is_some_and(Value::is_string) {
                return Err(GeneronError::SchemaValidation {
                    path: format!("{branch}/{i}/Name"),
                    detail: "entry requires a string Name".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Options recognized for every pair.
fn common_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::new("Problem/Type", OptionKind::String, None),
        OptionSpec::new(
            "Problem/Objective",
            OptionKind::String,
            Some(json!("Maximize")),
        ),
        OptionSpec::new("Random Seed", OptionKind::Integer, None),
        OptionSpec::new("Console Output/Frequency", OptionKind::Integer, Some(json!(1))),
        OptionSpec::new("Results Output/Frequency", OptionKind::Integer, Some(json!(1))),
        OptionSpec::new(
            "Results Output/Path",
            OptionKind::String,
            Some(json!("_result")),
        ),
        OptionSpec::new("Conduit/Type", OptionKind::String, Some(json!("Sequential"))),
        OptionSpec::new("Conduit/Concurrent Jobs", OptionKind::Integer, Some(json!(4))),
        OptionSpec::new("Solver/Type", OptionKind::String, None),
        OptionSpec::new(
            "Solver/Termination Criteria/Max Generations",
            OptionKind::Integer,
            Some(json!(0)),
        ),
        OptionSpec::new(
            "Solver/Termination Criteria/Max Infeasible Resamplings",
            OptionKind::Integer,
            Some(json!(0)),
        ),
        OptionSpec::new(
            "Solver/Termination Criteria/Max Value",
            OptionKind::Number,
            None,
        ),
        OptionSpec::new(
            "Solver/Termination Criteria/Min Value Difference Threshold",
            OptionKind::Number,
            None,
        ),
        OptionSpec::new(
            "Solver/Termination Criteria/Min Standard Deviation",
            OptionKind::Number,
            None,
        ),
    ]
}

fn check_kind(path: &str, kind: OptionKind, value: &Value) -> Result<()> {
    let ok = match kind {
        OptionKind::Number => value.is_number(),
        OptionKind::Integer => {
            value.as_u64().is_some()
                || value.as_f64().is_some_and(|f| f >= 0.0 && f.fract() == 0.0)
        }
        OptionKind::String => value.is_string(),
        OptionKind::Bool => value.is_boolean(),
    };
    if ok {
        Ok(())
    } else {
        Err(GeneronError::SchemaValidation {
            path: path.to_string(),
            detail: format!(
                "expected {}, found {}",
                match kind {
                    OptionKind::Number => "number",
                    OptionKind::Integer => "integer",
                    OptionKind::String => "string",
                    OptionKind::Bool => "bool",
                },
                value_kind(value)
            ),
        })
    }
}

/// Collect the paths of all scalar leaves, stopping descent at free prefixes.
fn collect_leaves(value: &Value, prefix: String, out: &mut Vec<String>) {
    if FREE_PREFIXES.iter().any(|p| prefix == *p) {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                collect_leaves(child, path, out);
            }
        }
        Value::Array(seq) => {
            for (i, child) in seq.iter().enumerate() {
                collect_leaves(child, format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(prefix),
    }
}
