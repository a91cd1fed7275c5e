use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use glassbox::core::log::init_logging;
use glassbox::engine::model::AnalysisRequest;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Optimize a portfolio and size its beta hedge
    Analyze {
        /// Comma-separated tickers, e.g. AAPL,MSFT
        #[arg(long, value_delimiter = ',', required = true)]
        tickers: Vec<String>,

        /// Comma-separated share counts, one per ticker
        #[arg(long, value_delimiter = ',', required = true)]
        quantities: Vec<f64>,

        /// First day of price history (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of price history, defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        portfolio_value: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        target_beta: Option<f64>,

        /// Monte Carlo samples, 0 to skip
        #[arg(long)]
        samples: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Also write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Read one JSON request from stdin and write the JSON result to stdout
    Engine,
}

impl From<Commands> for glassbox::AppCommand {
    fn from(cmd: Commands) -> glassbox::AppCommand {
        match cmd {
            Commands::Analyze {
                tickers,
                quantities,
                start,
                end,
                portfolio_value,
                target_beta,
                samples,
                seed,
                output,
            } => glassbox::AppCommand::Analyze {
                request: AnalysisRequest {
                    tickers,
                    quantities,
                    portfolio_value,
                    target_beta,
                    start_date: start,
                    end_date: end,
                    samples,
                    seed,
                },
                output,
            },
            Commands::Engine => glassbox::AppCommand::Engine,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => glassbox::cli::setup::setup_at_path(path),
            None => glassbox::cli::setup::setup(),
        },
        Some(cmd) => glassbox::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
