//! The analysis pipeline: fetch, estimate, optimize and sample, hedge.

pub mod estimator;
pub mod hedge;
pub mod model;
pub mod qp;
pub mod sampler;
pub mod solver;
pub mod subprocess;
pub mod validate;

use crate::core::config::{AnalysisConfig, AppConfig, HedgeConfig};
use crate::core::error::{EngineError, Result};
use crate::core::price::{PriceHistoryProvider, PriceSeries};
use chrono::Utc;
use futures::future::join_all;
use model::{AnalysisRequest, AnalysisResult};
use solver::SolverSettings;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validate::ValidatedRequest;

/// Stateless portfolio analysis engine, shared behind an `Arc`.
pub struct Engine {
    analysis: AnalysisConfig,
    hedge: HedgeConfig,
    provider: Arc<dyn PriceHistoryProvider>,
    workers: Arc<Semaphore>,
}

struct History {
    tickers: Vec<PriceSeries>,
    benchmark: PriceSeries,
    future_price: Option<f64>,
    risk_free: Option<PriceSeries>,
}

impl Engine {
    pub fn new(config: &AppConfig, provider: Arc<dyn PriceHistoryProvider>) -> Self {
        let worker_count = config.analysis.worker_count();
        debug!("Engine worker pool size: {}", worker_count);
        Engine {
            analysis: config.analysis.clone(),
            hedge: config.hedge.clone(),
            provider,
            workers: Arc::new(Semaphore::new(worker_count)),
        }
    }

    /// Builds an engine with the provider selected by the configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = crate::providers::build_provider(config)?;
        Ok(Self::new(config, provider))
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult> {
        self.analyze_with_cancellation(request, CancellationToken::new())
            .await
    }

    pub async fn analyze_with_cancellation(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> Result<AnalysisResult> {
        let today = Utc::now().date_naive();
        let request = validate::validate(&request, &self.analysis, today)?;
        info!(
            "Analyzing {} tickers from {} to {}",
            request.tickers.len(),
            request.start,
            request.end
        );
        ensure_active(&cancel)?;

        let History {
            tickers,
            benchmark,
            future_price,
            risk_free,
        } = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            history = self.fetch(&request) => history?,
        };

        let risk_free_rate = self.risk_free_rate(risk_free.as_ref());
        let analysis = self.analysis.clone();
        let estimates = Arc::new(
            self.run_blocking(move || estimator::estimate(&tickers, &benchmark, &analysis))
                .await?,
        );
        debug!(
            "Estimated {} assets over {} returns",
            estimates.asset_count(),
            estimates.returns.nrows()
        );
        ensure_active(&cancel)?;

        let settings = SolverSettings {
            risk_free_rate,
            frontier_points: self.analysis.frontier_points,
            max_iterations: self.analysis.max_iterations,
        };
        let solve = {
            let estimates = Arc::clone(&estimates);
            let cancel = cancel.clone();
            self.run_blocking(move || solver::solve(&estimates, &settings, &cancel))
        };
        let sample = async {
            if request.samples == 0 {
                return Ok(None);
            }
            let estimates = Arc::clone(&estimates);
            let (count, seed) = (request.samples, request.seed);
            self.run_blocking(move || {
                Ok(Some(sampler::sample(&estimates, count, risk_free_rate, seed)))
            })
            .await
        };
        let (solution, random_portfolios) = tokio::join!(solve, sample);
        let solution = solution?;
        let random_portfolios = random_portfolios?;
        ensure_active(&cancel)?;

        let weights = hedge::current_weights(&request.quantities, &estimates.last_prices)?;
        let portfolio_beta = hedge::portfolio_beta(&estimates, &weights, &self.hedge.benchmark)?;
        let etf_price = estimates.benchmark_last_price;
        let hedging = hedge::HedgeSizing {
            beta: portfolio_beta,
            target_beta: request.target_beta,
            portfolio_value: request.portfolio_value,
            etf_price,
            future_price: self.future_price(future_price, etf_price),
            contract_multiplier: self.hedge.contract_multiplier,
        }
        .recommend();
        debug!("Portfolio beta {:.4}, hedge {:?}", portfolio_beta, hedging);

        Ok(AnalysisResult {
            gmv: solution.gmv,
            max_sharpe: solution.max_sharpe,
            efficient_frontier: solution.frontier,
            random_portfolios,
            portfolio_beta,
            hedging,
            risk_free_rate,
            analysis_date: request.start,
            analysis_end_date: request.end,
        })
    }

    /// Fetches every ticker, the benchmark, the optional futures quote and
    /// the risk-free ETF concurrently, bounded by the fetch timeout.
    async fn fetch(&self, request: &ValidatedRequest) -> Result<History> {
        let (start, end) = (request.start, request.end);
        let tickers = join_all(
            request
                .tickers
                .iter()
                .map(|ticker| self.provider.fetch_history(ticker, start, end)),
        );
        let benchmark = self.provider.fetch_history(&self.hedge.benchmark, start, end);
        let future = async {
            match &self.hedge.futures_symbol {
                Some(symbol) => Some(self.provider.fetch_history(symbol, start, end).await),
                None => None,
            }
        };
        let risk_free = async {
            match &self.analysis.risk_free_symbol {
                Some(symbol) => Some(self.provider.fetch_history(symbol, start, end).await),
                None => None,
            }
        };

        let timeout = self.analysis.fetch_timeout();
        let (tickers, benchmark, future, risk_free) = tokio::time::timeout(timeout, async {
            tokio::join!(tickers, benchmark, future, risk_free)
        })
        .await
        .map_err(|_| {
            EngineError::upstream(
                request.tickers.join(", "),
                format!("price history fetch timed out after {}s", timeout.as_secs()),
            )
        })?;

        let tickers = collect_ticker_history(tickers)?;
        let benchmark = benchmark.map_err(|e| EngineError::BenchmarkDataUnavailable {
            symbol: self.hedge.benchmark.clone(),
            reason: e.to_string(),
        })?;
        let future_price = match future {
            Some(Ok(series)) => series.last_close(),
            Some(Err(e)) => {
                warn!("Futures quote unavailable: {}", e);
                None
            }
            None => None,
        };
        let risk_free = match risk_free {
            Some(Ok(series)) => Some(series),
            Some(Err(e)) => {
                warn!("Risk-free history unavailable: {}", e);
                None
            }
            None => None,
        };
        Ok(History {
            tickers,
            benchmark,
            future_price,
            risk_free,
        })
    }

    /// Annualized return of the risk-free ETF, else the configured rate.
    fn risk_free_rate(&self, series: Option<&PriceSeries>) -> f64 {
        let derived = series.and_then(|series| {
            estimator::risk_free_rate(series, self.analysis.trading_days_per_year)
                .map(|rate| (rate, series.ticker.as_str()))
        });
        match derived {
            Some((rate, symbol)) => {
                debug!("Risk-free rate {:.4} from {}", rate, symbol);
                rate
            }
            None => {
                if self.analysis.risk_free_symbol.is_some() {
                    warn!(
                        "Using the configured risk-free rate of {:.4}",
                        self.analysis.risk_free_rate
                    );
                }
                self.analysis.risk_free_rate
            }
        }
    }

    /// The futures quote when one was fetched, else the benchmark scaled to
    /// index points.
    fn future_price(&self, quoted: Option<f64>, etf_price: f64) -> f64 {
        match quoted {
            Some(price) => price,
            None => {
                let implied = etf_price * self.hedge.index_per_etf;
                warn!(
                    "No futures quote, using {} x {} = {:.2} as the index level",
                    self.hedge.benchmark, self.hedge.index_per_etf, implied
                );
                implied
            }
        }
    }

    /// Runs CPU-bound work on the blocking pool, at most `workers` at a time.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| EngineError::ProcessExecution(format!("worker pool closed: {e}")))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| EngineError::ProcessExecution(format!("worker task failed: {e}")))?
    }
}

/// Folds per-ticker results into one error: every ticker with insufficient
/// history is named, any other failure is returned as is.
fn collect_ticker_history(results: Vec<Result<PriceSeries>>) -> Result<Vec<PriceSeries>> {
    let mut series = Vec::with_capacity(results.len());
    let mut insufficient = Vec::new();
    let mut reasons = Vec::new();
    for result in results {
        match result {
            Ok(s) => series.push(s),
            Err(EngineError::DataInsufficient { tickers, reason }) => {
                insufficient.extend(tickers);
                reasons.push(reason);
            }
            Err(e) => return Err(e),
        }
    }
    if !insufficient.is_empty() {
        reasons.dedup();
        return Err(EngineError::DataInsufficient {
            tickers: insufficient,
            reason: reasons.join("; "),
        });
    }
    Ok(series)
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}
