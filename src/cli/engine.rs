use crate::core::error::EngineError;
use crate::engine::Engine;
use crate::engine::model::{AnalysisRequest, EngineResponse};
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Reads one request from stdin and writes one JSON document to stdout.
pub async fn run(engine: &Engine) -> Result<()> {
    serve(engine, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Analysis failures are reported in the payload; only I/O failures are
/// returned as errors.
pub async fn serve<R, W>(engine: &Engine, mut input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .await
        .context("Failed to read request from stdin")?;
    debug!("Received {} byte request", raw.len());

    let response = match serde_json::from_str::<AnalysisRequest>(&raw) {
        Ok(request) => EngineResponse::from(engine.analyze(request).await),
        Err(e) => EngineResponse::from(Err(EngineError::validation(format!(
            "invalid request: {e}"
        )))),
    };
    if let EngineResponse::Failure(payload) = &response {
        warn!("Analysis failed: {}", payload.error);
    }

    let mut json = serde_json::to_vec(&response).context("Failed to encode response")?;
    json.push(b'\n');
    output
        .write_all(&json)
        .await
        .context("Failed to write response to stdout")?;
    output.flush().await.context("Failed to flush stdout")?;
    Ok(())
}
