//! CLI wiring for ThreadTune.

use crate::candidate::CandidatePoint;
use crate::concurrent::ConcurrentLoad;
use crate::config::{Objective, TuningConfiguration};
use crate::inputs::random_feed;
use crate::observer::TracingObserver;
use crate::orchestrator::Tuner;
use crate::report::parse_report_dir;
use crate::space::ParameterSpace;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use threadtune_runtime::{
    CpuEngine, InferenceEngine, InputFeed, ServerLoadGenerator, SessionOptions,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "threadtune", about = "Thread and session option tuner for inference runtimes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ObjectiveArg {
    Latency,
    Throughput,
}

impl From<ObjectiveArg> for Objective {
    fn from(value: ObjectiveArg) -> Objective {
        match value {
            ObjectiveArg::Latency => Objective::Latency,
            ObjectiveArg::Throughput => Objective::Throughput,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep the tuning space and report the best configuration.
    Tune {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        cpu_cores: Option<usize>,
        #[arg(long, value_enum)]
        objective: Option<ObjectiveArg>,
        #[arg(long)]
        warmup: Option<usize>,
        #[arg(long)]
        test_num: Option<usize>,
        /// Write every accepted result as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Seed for the synthetic input tensors.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Load one candidate from several workers at once.
    Concurrent {
        #[arg(long)]
        config: PathBuf,
        /// Defaults to the configuration's `concurrency`.
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        inter: Option<usize>,
        #[arg(long)]
        intra: Option<usize>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Parse a load-generation summary and print it as JSON.
    ParseReport { dir: PathBuf },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::Tune {
            config,
            cpu_cores,
            objective,
            warmup,
            test_num,
            output,
            seed,
        } => {
            let mut config = TuningConfiguration::load(&config)?;
            if let Some(cores) = cpu_cores {
                config.cpu_cores = cores;
            }
            if let Some(objective) = objective {
                config.objective = objective.into();
            }
            if let Some(warmup) = warmup {
                config.warmup_num = warmup;
            }
            if let Some(test_num) = test_num {
                config.test_num = test_num;
            }

            let engine = CpuEngine::new();
            let feed = synthetic_feed(&engine, &config.model_path, seed)?;
            let generator = ServerLoadGenerator::new(config.load.clone());
            let session = Tuner::new(&engine, &config, &TracingObserver)
                .with_load_generator(Box::new(generator))
                .run(&feed)?;

            for result in session.results() {
                println!(
                    "- {}: avg_ms={:.5} p99_ms={:.5} throughput={}",
                    result.test_name,
                    result.latency_ms.avg,
                    result.latency_ms.p99,
                    result
                        .throughput
                        .map_or_else(|| "n/a".to_string(), |t| format!("{t:.3}"))
                );
            }
            match session.best(config.objective) {
                Some(best) => println!("best: {}", serde_json::to_string_pretty(best)?),
                None => println!("no candidate produced an accepted result"),
            }

            if let Some(path) = output {
                session.save(&path)?;
                info!(path = %path.display(), results = session.len(), "session saved");
            }
        }
        Command::Concurrent {
            config,
            workers,
            inter,
            intra,
            seed,
        } => {
            let config = TuningConfiguration::load(&config)?;
            config.validate()?;
            let workers = workers
                .or(config.concurrency)
                .context("pass --workers or set `concurrency` in the configuration")?;

            let combo = ParameterSpace::new(&config)
                .iter()
                .next()
                .context("the tuning space is empty")?;
            let inter = inter.or(config.inter_thread_candidates.first().copied().flatten());
            let intra = intra.or(config.intra_thread_candidates.first().copied().flatten());
            let candidate = CandidatePoint::new(combo, inter, intra);

            let engine = CpuEngine::new();
            let feed = synthetic_feed(&engine, &config.model_path, seed)?;
            let reports = ConcurrentLoad::new(workers).run(&engine, &config, &candidate, &feed)?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::ParseReport { dir } => {
            let report = parse_report_dir(&dir)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Seeded random tensors shaped like the model's declared inputs.
fn synthetic_feed(engine: &dyn InferenceEngine, model_path: &Path, seed: u64) -> Result<InputFeed> {
    let session = engine
        .create_session(
            model_path,
            &SessionOptions::default(),
            Some(engine.default_provider()),
        )
        .with_context(|| format!("failed to open model {}", model_path.display()))?;
    Ok(random_feed(session.inputs(), seed)?)
}
