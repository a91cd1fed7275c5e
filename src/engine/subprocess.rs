use crate::core::error::{EngineError, Result};
use crate::engine::model::{AnalysisRequest, AnalysisResult, EngineResponse};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs the analysis in a child process speaking the stdio protocol of
/// `glassbox engine`: one JSON request on stdin, one JSON document on stdout.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessEngine {
            program: program.into(),
            args: vec!["engine".to_string()],
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip(self, request), fields(program = %self.program.display()))]
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| EngineError::ProcessExecution(format!("failed to encode request: {e}")))?;
        let stdout = self.run(&self.args, Some(payload)).await?;
        let response: EngineResponse = serde_json::from_slice(&stdout).map_err(|e| {
            EngineError::ProcessExecution(format!("unreadable engine output: {e}"))
        })?;
        response.into_result()
    }

    /// Runs the program with `--version` and returns what it printed.
    pub async fn health_check(&self) -> Result<String> {
        let stdout = self.run(&["--version".to_string()], None).await?;
        let version = String::from_utf8_lossy(&stdout).trim().to_string();
        debug!("Engine process is healthy: {}", version);
        Ok(version)
    }

    async fn run(&self, args: &[String], input: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::ProcessExecution(format!(
                    "failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        let stdin = child.stdin.take();
        let exchange = async move {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                EngineError::ProcessExecution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| EngineError::ProcessExecution(format!("I/O error: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("Engine process stderr: {}", stderr.trim());
        }
        if !output.status.success() {
            return Err(EngineError::ProcessExecution(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}
