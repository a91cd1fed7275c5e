use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

/// Numerical settings of the analysis pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Treasury ETF whose annualized return is the risk-free rate
    pub risk_free_symbol: Option<String>,
    /// Annualized risk-free rate used when the symbol is unset or unavailable
    pub risk_free_rate: f64,
    pub trading_days_per_year: f64,
    /// Minimum aligned trading days required per ticker
    pub min_trading_days: usize,
    /// Minimum calendar span of a request
    pub min_span_days: i64,
    pub frontier_points: usize,
    /// Monte Carlo sample count; 0 disables sampling
    pub random_portfolios: usize,
    /// Iteration cap of every quadratic program
    pub max_iterations: usize,
    pub default_portfolio_value: f64,
    pub default_target_beta: f64,
    /// Size of the CPU worker pool; defaults to the number of cores
    pub workers: Option<usize>,
    pub fetch_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            risk_free_symbol: Some("SGOV".to_string()),
            risk_free_rate: 0.045,
            trading_days_per_year: 252.0,
            min_trading_days: 45,
            min_span_days: 45,
            frontier_points: 50,
            random_portfolios: 10_000,
            max_iterations: 500,
            default_portfolio_value: 100_000.0,
            default_target_beta: 0.0,
            workers: None,
            fetch_timeout_secs: 20,
        }
    }
}

impl AnalysisConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HedgeConfig {
    /// Benchmark ETF used for beta and the equity hedge leg
    pub benchmark: String,
    /// Index future quoted by the provider, e.g. `ES=F`
    pub futures_symbol: Option<String>,
    pub contract_multiplier: f64,
    /// Index points per benchmark share, used when no futures quote is available
    pub index_per_etf: f64,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        HedgeConfig {
            benchmark: "SPY".to_string(),
            futures_symbol: None,
            contract_multiplier: 50.0,
            index_per_etf: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Fixture,
    Synthetic,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct YahooProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retries: usize,
    pub backoff_ms: u64,
}

impl Default for YahooProviderConfig {
    fn default() -> Self {
        YahooProviderConfig {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            timeout_secs: 15,
            retries: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FixtureProviderConfig {
    /// Directory holding one `<TICKER>.json` file per ticker
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyntheticProviderConfig {
    pub seed: u64,
}

impl Default for SyntheticProviderConfig {
    fn default() -> Self {
        SyntheticProviderConfig { seed: 42 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub kind: ProviderKind,
    pub yahoo: YahooProviderConfig,
    pub fixture: Option<FixtureProviderConfig>,
    pub synthetic: SyntheticProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub hedge: HedgeConfig,
    pub provider: ProvidersConfig,
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Loads the config from the default location, falling back to built-in
    /// defaults when no file exists there.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "glassbox", "glassbox")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let analysis = &self.analysis;
        if !analysis.risk_free_rate.is_finite() {
            bail!("analysis.risk_free_rate must be finite");
        }
        if analysis
            .risk_free_symbol
            .as_deref()
            .is_some_and(|symbol| symbol.trim().is_empty())
        {
            bail!("analysis.risk_free_symbol must not be empty when set");
        }
        if !(analysis.trading_days_per_year > 0.0) {
            bail!("analysis.trading_days_per_year must be positive");
        }
        if analysis.min_trading_days < 3 {
            bail!("analysis.min_trading_days must be at least 3");
        }
        if analysis.min_span_days < 1 {
            bail!("analysis.min_span_days must be at least 1");
        }
        if analysis.frontier_points < 2 {
            bail!("analysis.frontier_points must be at least 2");
        }
        if analysis.max_iterations == 0 {
            bail!("analysis.max_iterations must be positive");
        }
        if analysis.workers == Some(0) {
            bail!("analysis.workers must be positive when set");
        }
        if !(analysis.default_portfolio_value >= 0.0) {
            bail!("analysis.default_portfolio_value must be non-negative");
        }
        if self.hedge.benchmark.trim().is_empty() {
            bail!("hedge.benchmark must not be empty");
        }
        if !(self.hedge.contract_multiplier > 0.0) || !(self.hedge.index_per_etf > 0.0) {
            bail!("hedge.contract_multiplier and hedge.index_per_etf must be positive");
        }
        if self.provider.kind == ProviderKind::Fixture && self.provider.fixture.is_none() {
            bail!("provider.fixture.path is required when provider.kind is fixture");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").expect("Failed to deserialize");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.analysis.trading_days_per_year, 252.0);
        assert_eq!(config.analysis.min_trading_days, 45);
        assert_eq!(config.analysis.risk_free_symbol.as_deref(), Some("SGOV"));
        assert_eq!(config.hedge.benchmark, "SPY");
        assert_eq!(config.provider.kind, ProviderKind::Yahoo);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
analysis:
  risk_free_symbol: ~
  risk_free_rate: 0.03
  frontier_points: 20
  random_portfolios: 0
  workers: 2
hedge:
  benchmark: "VOO"
  futures_symbol: "ES=F"
provider:
  kind: fixture
  fixture:
    path: "/tmp/prices"
cache:
  enabled: false
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.analysis.risk_free_symbol, None);
        assert_eq!(config.analysis.risk_free_rate, 0.03);
        assert_eq!(config.analysis.frontier_points, 20);
        assert_eq!(config.analysis.random_portfolios, 0);
        assert_eq!(config.analysis.worker_count(), 2);
        // Unspecified fields keep their defaults
        assert_eq!(config.analysis.min_span_days, 45);
        assert_eq!(config.hedge.benchmark, "VOO");
        assert_eq!(config.hedge.futures_symbol.as_deref(), Some("ES=F"));
        assert_eq!(config.hedge.contract_multiplier, 50.0);
        assert_eq!(config.provider.kind, ProviderKind::Fixture);
        assert_eq!(
            config.provider.fixture.as_ref().unwrap().path,
            PathBuf::from("/tmp/prices")
        );
        assert_eq!(
            config.provider.yahoo.base_url,
            "https://query1.finance.yahoo.com"
        );
        assert!(!config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.analysis.min_trading_days = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.risk_free_symbol = Some(" ".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.hedge.contract_multiplier = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.provider.kind = ProviderKind::Fixture;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("provider.fixture.path"));
    }

    #[test]
    fn test_load_from_path_reports_parse_errors() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "analysis: [not, a, map]").unwrap();
        let err = AppConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
