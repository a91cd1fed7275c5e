use super::ui;
use crate::engine::Engine;
use crate::engine::model::{AnalysisRequest, AnalysisResult, FrontierPoint};
use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use std::path::Path;
use tracing::info;

/// Rows shown from the efficient frontier; the JSON output keeps every point.
const FRONTIER_ROWS: usize = 10;

pub async fn run(
    engine: &Engine,
    request: AnalysisRequest,
    target_beta: f64,
    output: Option<&Path>,
) -> Result<()> {
    let spinner = ui::new_spinner(&format!(
        "Analyzing {}...",
        request.tickers.join(", ")
    ));
    let result = engine.analyze(request).await;
    spinner.finish_and_clear();
    let result = result.context("Portfolio analysis failed")?;

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        info!("Wrote analysis results to {}", path.display());
    }

    display(&result, target_beta);
    Ok(())
}

fn display(result: &AnalysisResult, target_beta: f64) {
    println!(
        "\n{} {}",
        ui::style_text("Optimal portfolios", ui::StyleType::Title),
        ui::style_text(
            &format!(
                "(risk-free rate {}, data from {} through {})",
                ui::format_percent(result.risk_free_rate),
                result.analysis_date,
                result.analysis_end_date
            ),
            ui::StyleType::Subtle
        )
    );
    println!("{}", portfolio_table(result));

    ui::print_separator();
    println!(
        "\n{}",
        ui::style_text("Efficient frontier", ui::StyleType::Title)
    );
    println!("{}", frontier_table(&result.efficient_frontier));
    if let Some(random) = &result.random_portfolios {
        println!(
            "{}",
            ui::style_text(
                &format!("{} random portfolios sampled", random.len()),
                ui::StyleType::Subtle
            )
        );
    }

    ui::print_separator();
    println!("\n{}", ui::style_text("Beta hedge", ui::StyleType::Title));
    println!("{}", hedge_table(result, target_beta));
}

fn portfolio_table(result: &AnalysisResult) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("Min Variance"),
        ui::header_cell("Max Sharpe"),
    ]);
    for (ticker, weight) in &result.gmv.weights {
        let tangency = result.max_sharpe.weights.get(ticker).copied().unwrap_or(0.0);
        table.add_row(vec![
            Cell::new(ticker),
            ui::percent_cell(*weight),
            ui::percent_cell(tangency),
        ]);
    }

    let (gmv, tangency) = (&result.gmv.stats, &result.max_sharpe.stats);
    table.add_row(vec![
        Cell::new(ui::style_text("Expected return", ui::StyleType::TotalLabel)),
        ui::percent_cell(gmv.expected_return),
        ui::percent_cell(tangency.expected_return),
    ]);
    table.add_row(vec![
        Cell::new(ui::style_text("Volatility", ui::StyleType::TotalLabel)),
        ui::percent_cell(gmv.volatility),
        ui::percent_cell(tangency.volatility),
    ]);
    table.add_row(vec![
        Cell::new(ui::style_text("Sharpe ratio", ui::StyleType::TotalLabel)),
        ui::number_cell(gmv.sharpe, 3),
        Cell::new(ui::style_text(
            &format!("{:.3}", tangency.sharpe),
            ui::StyleType::TotalValue,
        )),
    ]);
    table
}

fn frontier_table(frontier: &[FrontierPoint]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Expected Return"),
        ui::header_cell("Volatility"),
        ui::header_cell("Sharpe"),
    ]);
    for point in spread(frontier, FRONTIER_ROWS) {
        table.add_row(vec![
            ui::percent_cell(point.expected_return),
            ui::percent_cell(point.volatility),
            ui::number_cell(point.sharpe_ratio, 3),
        ]);
    }
    table
}

fn hedge_table(result: &AnalysisResult, target_beta: f64) -> Table {
    let hedge = &result.hedging;
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Measure"),
        ui::header_cell("Value"),
        ui::header_cell("Notional"),
    ]);
    table.add_row(vec![
        Cell::new("Portfolio beta"),
        ui::number_cell(result.portfolio_beta, 3),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Target beta"),
        ui::number_cell(target_beta, 3),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("SPY shares"),
        ui::signed_cell(hedge.spy_shares.to_string(), hedge.spy_shares as f64),
        ui::signed_cell(format!("{:.2}", hedge.spy_notional), hedge.spy_notional),
    ]);
    table.add_row(vec![
        Cell::new("ES contracts"),
        ui::signed_cell(hedge.es_contracts.to_string(), hedge.es_contracts as f64),
        ui::signed_cell(format!("{:.2}", hedge.es_notional), hedge.es_notional),
    ]);
    table
}

/// At most `rows` points, evenly spread and always including both ends.
fn spread(points: &[FrontierPoint], rows: usize) -> Vec<FrontierPoint> {
    if points.len() <= rows || rows < 2 {
        return points.to_vec();
    }
    let last = points.len() - 1;
    (0..rows)
        .map(|i| points[i * last / (rows - 1)])
        .collect()
}
