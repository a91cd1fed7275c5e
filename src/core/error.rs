//! Typed failures of the analysis pipeline.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Wire-level name of an error, carried in the `type` field of an error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "DataInsufficientError")]
    DataInsufficient,
    #[serde(rename = "BenchmarkDataUnavailableError")]
    BenchmarkDataUnavailable,
    #[serde(rename = "OptimizationFailedError")]
    OptimizationFailed,
    #[serde(rename = "UpstreamDataProviderError")]
    UpstreamDataProvider,
    #[serde(rename = "ProcessExecutionError")]
    ProcessExecution,
    #[serde(rename = "CancelledError")]
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::Validation => "ValidationError",
                ErrorKind::DataInsufficient => "DataInsufficientError",
                ErrorKind::BenchmarkDataUnavailable => "BenchmarkDataUnavailableError",
                ErrorKind::OptimizationFailed => "OptimizationFailedError",
                ErrorKind::UpstreamDataProvider => "UpstreamDataProviderError",
                ErrorKind::ProcessExecution => "ProcessExecutionError",
                ErrorKind::Cancelled => "CancelledError",
            }
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Malformed request
    #[error("{0}")]
    Validation(String),

    /// Not enough aligned trading history for one or more tickers
    #[error("insufficient price history for {}: {reason}", .tickers.join(", "))]
    DataInsufficient { tickers: Vec<String>, reason: String },

    #[error("benchmark {symbol} price history unavailable: {reason}")]
    BenchmarkDataUnavailable { symbol: String, reason: String },

    /// A quadratic program did not converge
    #[error(
        "optimization failed {}: {reason} after {iterations} iterations",
        describe_target(.target_return)
    )]
    OptimizationFailed {
        target_return: Option<f64>,
        iterations: usize,
        reason: String,
    },

    /// Transient failure of the price data source; the caller may retry
    #[error("price data provider error for {ticker}: {message}")]
    UpstreamDataProvider { ticker: String, message: String },

    /// The engine process crashed, timed out or produced unreadable output
    #[error("engine process failed: {0}")]
    ProcessExecution(String),

    #[error("analysis cancelled")]
    Cancelled,

    /// An error decoded from a wire payload
    #[error("{message}")]
    Reported { kind: ErrorKind, message: String },
}

fn describe_target(target_return: &Option<f64>) -> String {
    match target_return {
        Some(target) => format!("for target return {target:.6}"),
        None => "for unconstrained target".to_string(),
    }
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn insufficient(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::DataInsufficient {
            tickers: vec![ticker.into()],
            reason: reason.into(),
        }
    }

    pub fn upstream(ticker: impl Into<String>, message: impl Display) -> Self {
        EngineError::UpstreamDataProvider {
            ticker: ticker.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::DataInsufficient { .. } => ErrorKind::DataInsufficient,
            EngineError::BenchmarkDataUnavailable { .. } => ErrorKind::BenchmarkDataUnavailable,
            EngineError::OptimizationFailed { .. } => ErrorKind::OptimizationFailed,
            EngineError::UpstreamDataProvider { .. } => ErrorKind::UpstreamDataProvider,
            EngineError::ProcessExecution(_) => ErrorKind::ProcessExecution,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Reported { kind, .. } => *kind,
        }
    }

    /// Only upstream data failures are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::UpstreamDataProvider
    }
}

/// Error half of the engine's wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<&EngineError> for ErrorPayload {
    fn from(err: &EngineError) -> Self {
        ErrorPayload {
            error: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}

impl From<ErrorPayload> for EngineError {
    fn from(payload: ErrorPayload) -> Self {
        EngineError::Reported {
            kind: payload.kind.unwrap_or(ErrorKind::ProcessExecution),
            message: payload.error,
        }
    }
}
