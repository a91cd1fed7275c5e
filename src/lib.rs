pub mod cli;
pub mod core;
pub mod engine;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::engine::Engine;
use crate::engine::model::AnalysisRequest;
use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

pub enum AppCommand {
    /// Run an analysis in-process and print the results
    Analyze {
        request: AnalysisRequest,
        output: Option<PathBuf>,
    },
    /// Serve one request over stdin/stdout
    Engine,
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = Engine::from_config(&config)?;

    match command {
        AppCommand::Analyze { request, output } => {
            let target_beta = request
                .target_beta
                .unwrap_or(config.analysis.default_target_beta);
            cli::analyze::run(&engine, request, target_beta, output.as_deref()).await
        }
        AppCommand::Engine => cli::engine::run(&engine).await,
    }
}
