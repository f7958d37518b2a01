mod artifacts;
mod classifier;
mod config;
mod dashboard;
mod dataset;
mod metrics;
mod repl;
mod session;
mod trainer;

use crate::classifier::ModelKind;
use crate::config::DashboardConfig;
use crate::dashboard::{render_accuracies, render_analysis, render_gallery, Controls, Dashboard};
use crate::session::Session;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{io, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iris-dashboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Classify iris flowers with KNN and logistic regression")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory the trained models are written to
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain both models and print their held-out accuracy
    Train,

    /// Retrain, then classify one flower
    Predict {
        /// Model to use (knn, logistic)
        #[arg(short, long, default_value = "knn")]
        model: ModelKind,

        #[arg(long, default_value_t = 5.1)]
        sepal_length: f64,

        #[arg(long, default_value_t = 3.5)]
        sepal_width: f64,

        #[arg(long, default_value_t = 1.4)]
        petal_length: f64,

        #[arg(long, default_value_t = 0.2)]
        petal_width: f64,

        /// Also write the prediction to a csv file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// List the species images
    Gallery,

    /// Interactive session (the default)
    Interactive,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DashboardConfig::load_from_path(path)?,
        None => DashboardConfig::load()?,
    };
    if let Some(dir) = cli.model_dir {
        config.storage.model_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(config.log_directive().parse()?),
        )
        .init();
    info!(model_dir = %config.storage.model_dir.display(), "Starting iris dashboard");

    let dashboard = Dashboard::new(config);
    let mut stdout = io::stdout();

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Train => {
            let (report, _) = dashboard.refresh()?;
            render_accuracies(&mut stdout, &report)?;
            println!("\n  Artifacts written to {}", dashboard.store().dir().display());
        }
        Commands::Predict {
            model,
            sepal_length,
            sepal_width,
            petal_length,
            petal_width,
            export,
        } => {
            let controls = Controls::new([sepal_length, sepal_width, petal_length, petal_width], model)?;
            let mut session = Session::new();

            let analysis = dashboard.analyze(&controls, &mut session)?;
            println!("  Accuracy {:.2}%", analysis.accuracy * 100.0);
            render_analysis(&mut stdout, &analysis)?;

            if let Some(path) = export {
                session.export(&path)?;
                println!("\n  History written to {}", path.display());
            }
        }
        Commands::Gallery => render_gallery(&mut stdout)?,
        Commands::Interactive => {
            let stdin = io::stdin();
            repl::run(&dashboard, stdin.lock(), &mut stdout)?;
        }
    }

    Ok(())
}
