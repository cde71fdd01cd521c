//! generon CLI - run built-in test functions through the solver engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use generon::{
    latest_result, read_checkpoint, ConfigTree, Engine, Experiment, GeneronError, Model,
    ProblemType, Sample, Schema,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "generon")]
#[command(version)]
#[command(about = "Generational solver engine with checkpoint-based resumability")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a built-in test function
    Optimize {
        /// Test function: sphere or rosenbrock
        #[arg(short, long, default_value = "sphere")]
        function: String,

        /// Experiment file (TOML); command-line flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Solver type tag (e.g. Optimizer/Population)
        #[arg(short, long)]
        solver: Option<String>,

        /// Results directory
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Generation budget
        #[arg(short = 'g', long)]
        max_generations: Option<u64>,

        /// Random seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Number of variables when the config declares none
        #[arg(short, long, default_value = "2")]
        dimensions: usize,

        /// Evaluate batches concurrently with this many jobs
        #[arg(short = 'j', long)]
        concurrent: Option<u64>,

        /// Resume from the latest snapshot in the results directory
        #[arg(long)]
        resume: bool,
    },

    /// Summarize one snapshot file
    Show {
        /// Path to an s*.json or final.json snapshot
        file: PathBuf,
    },

    /// Print the newest usable snapshot in a results directory
    Latest {
        /// Results directory
        dir: PathBuf,
    },

    /// Validate an experiment file
    Validate {
        /// Experiment file (TOML)
        config: PathBuf,
    },

    /// Show an example experiment file
    Example,
}

/// Built-in objective, expressed in maximize convention (optimum at 0).
#[derive(Debug, Clone, Copy)]
enum TestFunction {
    Sphere,
    Rosenbrock,
}

impl TestFunction {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "sphere" => Ok(Self::Sphere),
            "rosenbrock" => Ok(Self::Rosenbrock),
            other => anyhow::bail!("unknown test function: {other} (try sphere or rosenbrock)"),
        }
    }

    fn value(&self, x: &[f64]) -> f64 {
        match self {
            Self::Sphere => -x.iter().map(|v| v * v).sum::<f64>(),
            Self::Rosenbrock => -x
                .windows(2)
                .map(|w| 100.0 * (w[1] - w[0] * w[0]).powi(2) + (1.0 - w[0]).powi(2))
                .sum::<f64>(),
        }
    }

    fn gradient(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Self::Sphere => x.iter().map(|v| -2.0 * v).collect(),
            Self::Rosenbrock => {
                let n = x.len();
                let mut g = vec![0.0; n];
                for i in 0..n {
                    if i + 1 < n {
                        g[i] += -400.0 * x[i] * (x[i + 1] - x[i] * x[i]) - 2.0 * (1.0 - x[i]);
                    }
                    if i > 0 {
                        g[i] += 200.0 * (x[i] - x[i - 1] * x[i - 1]);
                    }
                }
                g.into_iter().map(|v| -v).collect()
            }
        }
    }
}

/// Wrap a test function as a model matching the experiment's problem type.
fn model_for(function: TestFunction, problem: ProblemType) -> impl Model {
    move |s: &mut Sample| -> generon::Result<()> {
        match problem {
            ProblemType::Direct => s.add_result(function.value(&s.variables)),
            ProblemType::DirectGradient => {
                s.add_result(function.value(&s.variables));
                s.set_gradient(function.gradient(&s.variables));
            }
            ProblemType::Bayesian => s.set_log_likelihood(function.value(&s.variables)),
        }
        Ok(())
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

/// Load a TOML experiment file into a configuration tree.
fn load_config_tree(path: &Path) -> Result<ConfigTree> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiment file {path:?}"))?;
    let value: toml::Value =
        toml::from_str(&text).with_context(|| format!("Invalid TOML in {path:?}"))?;
    let json = serde_json::to_value(value).context("Converting experiment file")?;
    Ok(ConfigTree::from_value(json)?)
}

fn print_example_config() {
    let example = r#"# generon experiment file

[Problem]
"Type" = "Evaluation/Direct"
"Objective" = "Maximize"

[Solver]
"Type" = "Optimizer/Population"
"Population Size" = 32

[Solver."Termination Criteria"]
"Max Generations" = 100
"Min Value Difference Threshold" = 1e-9

[[Variables]]
"Name" = "X0"
"Lower Bound" = -10.0
"Upper Bound" = 10.0

[[Variables]]
"Name" = "X1"
"Lower Bound" = -10.0
"Upper Bound" = 10.0

[Conduit]
"Type" = "Concurrent"
"Concurrent Jobs" = 4

["Results Output"]
"Frequency" = 1
"Path" = "_result"

["Console Output"]
"Frequency" = 10
"#;
    println!("{example}");
}

#[allow(clippy::too_many_arguments)]
async fn optimize(
    function: String,
    config: Option<PathBuf>,
    solver: Option<String>,
    results: Option<PathBuf>,
    max_generations: Option<u64>,
    seed: Option<u64>,
    dimensions: usize,
    concurrent: Option<u64>,
    resume: bool,
) -> Result<()> {
    let mut tree = match &config {
        Some(path) => load_config_tree(path)?,
        None => ConfigTree::new(),
    };
    tree.set_default("Problem/Type", "Evaluation/Direct")?;
    tree.set_default("Solver/Type", "Optimizer/Population")?;

    if resume {
        let dir = tree
            .get_str_opt("Results Output/Path")?
            .unwrap_or("_result")
            .to_string();
        match latest_result(Path::new(&dir)) {
            Ok(path) => {
                info!(path = %path.display(), "resuming from latest snapshot");
                tree = read_checkpoint(&path)?;
            }
            Err(GeneronError::NoResults(_)) => {
                info!(dir, "no previous results; starting fresh");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Command-line overrides win over both the file and a resumed snapshot.
    if let Some(tag) = solver {
        tree.overwrite("Solver/Type", tag)?;
    }
    if let Some(n) = max_generations {
        tree.overwrite("Solver/Termination Criteria/Max Generations", n)?;
    }
    if let Some(seed) = seed {
        tree.overwrite("Random Seed", seed)?;
    }
    if let Some(dir) = &results {
        let dir = dir.to_str().context("Results path is not valid UTF-8")?;
        tree.overwrite("Results Output/Path", dir)?;
    }
    if let Some(jobs) = concurrent {
        tree.overwrite("Conduit/Type", "Concurrent")?;
        tree.overwrite("Conduit/Concurrent Jobs", jobs)?;
    }
    if tree.sequence_len("Variables") == 0 {
        for i in 0..dimensions {
            tree.set(&format!("Variables/{i}/Name"), format!("X{i}"))?;
            tree.set(&format!("Variables/{i}/Lower Bound"), -10.0)?;
            tree.set(&format!("Variables/{i}/Upper Bound"), 10.0)?;
        }
    }

    let problem = ProblemType::from_tag(tree.get_str("Problem/Type")?)?;
    let function = TestFunction::parse(&function)?;
    let mut experiment = Experiment::with_tree(tree, model_for(function, problem));

    let engine = Engine::new();
    let handle = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested; finishing the current generation");
            handle.cancel();
        }
    });

    let summary = engine.run(&mut experiment).await?;

    println!("\n=== Run Complete ===");
    println!("Run ID:      {}", summary.run_id);
    println!("Generations: {}", summary.generations);
    println!("Stop reason: {}", summary.stop_reason);
    if let Some(best) = summary.best_value {
        println!("Best value:  {best}");
    }
    println!("Runtime:     {:.1}s", summary.runtime_secs);
    println!(
        "Results:     {}",
        experiment
            .tree()
            .get_str_opt("Results Output/Path")?
            .unwrap_or("-")
    );
    Ok(())
}

fn show(file: &Path) -> Result<()> {
    let tree = read_checkpoint(file)?;
    println!("File:        {}", file.display());
    println!(
        "Run ID:      {}",
        tree.get_str_opt("General/Run ID")?.unwrap_or("-")
    );
    println!(
        "Generation:  {}",
        tree.get_u64_opt("General/Current Generation")?.unwrap_or(0)
    );
    println!(
        "Problem:     {}",
        tree.get_str_opt("Problem/Type")?.unwrap_or("-")
    );
    println!(
        "Solver:      {}",
        tree.get_str_opt("Solver/Type")?.unwrap_or("-")
    );
    if let Some(best) = tree.get_f64_opt("Solver/Internal/Best Ever Value")? {
        println!("Best value:  {best}");
    }
    if let Some(reason) = tree.get_str_opt("General/Termination Reason")? {
        println!("Terminated:  {reason}");
    }
    Ok(())
}

fn validate(config: &Path) -> Result<()> {
    let mut tree = load_config_tree(config)?;
    let problem = ProblemType::from_tag(tree.get_str("Problem/Type")?)?;
    let solver_tag = tree.get_str("Solver/Type")?.to_string();
    let schema = Schema::for_pair(problem, &solver_tag)?;
    schema.validate(&mut tree)?;

    info!("Configuration is valid");
    info!("  Problem:   {problem}");
    info!("  Solver:    {solver_tag}");
    info!("  Variables: {}", tree.sequence_len("Variables"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Optimize {
            function,
            config,
            solver,
            results,
            max_generations,
            seed,
            dimensions,
            concurrent,
            resume,
        } => {
            optimize(
                function,
                config,
                solver,
                results,
                max_generations,
                seed,
                dimensions,
                concurrent,
                resume,
            )
            .await?;
        }

        Commands::Show { file } => show(&file)?,

        Commands::Latest { dir } => {
            let path = latest_result(&dir)?;
            println!("{}", path.display());
        }

        Commands::Validate { config } => validate(&config)?,

        Commands::Example => print_example_config(),
    }

    Ok(())
}
