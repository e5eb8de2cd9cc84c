use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use cimrl::config::Config;
use cimrl::launcher::{self, LaunchReport};
use cimrl::utils::plot_rewards;

#[derive(Debug, Parser)]
#[command(name = "cim-dqn", about = "DQN training for container inventory management", version)]
struct Args {
    /// YAML configuration file.
    #[arg(long, default_value = "configs/dqn.yml")]
    config: PathBuf,

    /// Where trained models are dumped (defaults to ./models).
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Overrides general.total_training_episodes.
    #[arg(long)]
    episodes: Option<usize>,

    /// Writes the training performance curve to this PNG file.
    #[arg(long)]
    plot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Learner with one actor peer per configured actor.
    DistLearner,
    /// Learner with a single in-process actor.
    Single,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)?;
    if let Some(episodes) = args.episodes {
        config.general.total_training_episodes = episodes;
    }

    let report: LaunchReport = match args.command {
        Command::DistLearner => launcher::launch(config, args.model_dir)?,
        Command::Single => launcher::launch_single(config, args.model_dir)?,
    };
    info!(
        "finished: test performance {:.4}, models in {}",
        report.test_performance,
        report.model_dir.display()
    );

    if let Some(path) = args.plot {
        plot_rewards(&report.performance_history, &path, "Training Performance")?;
    }
    Ok(())
}
