//! Decision point configuration.
//!
//! [`PdpConfig`] is the operator facing TOML shape. [`PdpConfiguration`] is
//! the resolved runtime snapshot the decision pipeline reads, published as a
//! whole through [`ConfigurationProvider`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::combining::CombiningAlgorithm;
use crate::context::Variables;
use crate::error::{PdpError, PdpResult};
use crate::stream::watch_stream;

/// File name of the configuration inside a policy directory.
pub const CONFIG_FILE_NAME: &str = "pdp.toml";

/// Root decision point configuration.
///
/// # Example (TOML)
///
/// ```toml
/// algorithm = "permit-unless-deny"
/// log_decisions = true
///
/// [variables]
/// tenant = "acme"
///
/// [source]
/// path = "/etc/octofhir/policies"
/// debounce = "500ms"
/// watch = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PdpConfig {
    /// Combining algorithm applied to the matching top-level documents.
    pub algorithm: String,

    /// Global variables visible to every target and body expression.
    pub variables: Variables,

    /// Log every emitted decision at debug level.
    pub log_decisions: bool,

    /// Where documents are loaded from.
    pub source: SourceConfig,
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            algorithm: CombiningAlgorithm::DenyOverrides.name().to_string(),
            variables: Variables::new(),
            log_decisions: false,
            source: SourceConfig::default(),
        }
    }
}

/// Document source settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory holding `*.json` documents.
    pub path: Option<PathBuf>,

    /// Quiet period before a burst of file changes triggers a reload.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Reload automatically when the directory changes.
    pub watch: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            debounce: Duration::from_millis(250),
            watch: false,
        }
    }
}

impl PdpConfig {
    pub fn from_toml_str(content: &str) -> PdpResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PdpResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PdpResult<()> {
        CombiningAlgorithm::from_name(&self.algorithm)?;

        if self.source.debounce.is_zero() {
            return Err(PdpError::config("source.debounce must be greater than zero"));
        }

        if self.source.watch && self.source.path.is_none() {
            return Err(PdpError::config("source.watch requires source.path"));
        }

        Ok(())
    }

    /// Resolve into a runtime snapshot.
    ///
    /// An unknown algorithm does not fail here: it produces an invalid
    /// snapshot under which every decision is INDETERMINATE.
    pub fn resolve(&self) -> PdpConfiguration {
        let variables = Arc::new(self.variables.clone());
        match CombiningAlgorithm::from_name(&self.algorithm) {
            Ok(algorithm) => PdpConfiguration::new(algorithm, variables),
            Err(err) => {
                tracing::warn!(algorithm = %self.algorithm, "Unknown combining algorithm");
                PdpConfiguration::invalid(err.to_string(), variables)
            }
        }
    }
}

/// Runtime configuration snapshot. Replaced as a whole, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct PdpConfiguration {
    algorithm: Result<CombiningAlgorithm, String>,
    variables: Arc<Variables>,
}

impl PdpConfiguration {
    pub fn new(algorithm: CombiningAlgorithm, variables: Arc<Variables>) -> Self {
        Self {
            algorithm: Ok(algorithm),
            variables,
        }
    }

    pub fn invalid(reason: impl Into<String>, variables: Arc<Variables>) -> Self {
        Self {
            algorithm: Err(reason.into()),
            variables,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.algorithm.is_ok()
    }

    /// The combining algorithm, or why there is none.
    pub fn algorithm(&self) -> Result<CombiningAlgorithm, &str> {
        self.algorithm.as_ref().copied().map_err(String::as_str)
    }

    pub fn variables(&self) -> &Arc<Variables> {
        &self.variables
    }
}

impl Default for PdpConfiguration {
    fn default() -> Self {
        Self::new(CombiningAlgorithm::DenyOverrides, Arc::default())
    }
}

/// Single current-value holder for the runtime configuration.
pub struct ConfigurationProvider {
    current: watch::Sender<Arc<PdpConfiguration>>,
}

impl ConfigurationProvider {
    pub fn new(initial: PdpConfiguration) -> Self {
        let (current, _) = watch::channel(Arc::new(initial));
        Self { current }
    }

    /// Replace the whole configuration.
    pub fn update(&self, configuration: PdpConfiguration) {
        tracing::debug!(valid = configuration.is_valid(), "Configuration replaced");
        self.current.send_replace(Arc::new(configuration));
    }

    pub fn current(&self) -> Arc<PdpConfiguration> {
        self.current.borrow().clone()
    }

    /// Current snapshot first, then every replacement.
    pub fn configurations(&self) -> BoxStream<'static, Arc<PdpConfiguration>> {
        watch_stream(self.current.subscribe())
    }
}

impl Default for ConfigurationProvider {
    fn default() -> Self {
        Self::new(PdpConfiguration::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = PdpConfig::default();
        assert_eq!(config.algorithm, "deny-overrides");
        assert_eq!(config.source.debounce, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = PdpConfig::from_toml_str(
            r#"
            algorithm = "first-applicable"
            log_decisions = true

            [variables]
            tenant = "acme"
            limits = { max = 3 }

            [source]
            path = "/tmp/policies"
            debounce = "1s"
            watch = true
            "#,
        )
        .unwrap();
        assert!(config.log_decisions);
        assert_eq!(config.variables["tenant"], json!("acme"));
        assert_eq!(config.variables["limits"], json!({"max": 3}));
        assert_eq!(config.source.debounce, Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let resolved = config.resolve();
        assert_eq!(resolved.algorithm(), Ok(CombiningAlgorithm::FirstApplicable));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PdpConfig {
            algorithm: "majority".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration_error());

        config.algorithm = "deny-overrides".to_string();
        config.source.watch = true;
        assert!(config.validate().is_err());

        config.source.watch = false;
        config.source.debounce = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_algorithm_resolves_to_invalid_snapshot() {
        let config = PdpConfig {
            algorithm: "majority".to_string(),
            ..Default::default()
        };
        let resolved = config.resolve();
        assert!(!resolved.is_valid());
        assert!(resolved.algorithm().unwrap_err().contains("majority"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PdpConfig::from_toml_str("algorithm = [").unwrap_err();
        assert!(matches!(err, PdpError::Toml(_)));
    }

    #[tokio::test]
    async fn test_provider_publishes_whole_snapshots() {
        let provider = ConfigurationProvider::default();
        let mut configurations = provider.configurations();
        assert!(configurations.next().await.unwrap().is_valid());

        provider.update(PdpConfiguration::invalid("broken", Arc::default()));
        let next = configurations.next().await.unwrap();
        assert!(!next.is_valid());
        assert!(!provider.current().is_valid());
    }
}
