//! # Application State
//!
//! Shared by every request handler through `Arc`. The rule registry is built once at
//! startup: rules are stateless, so concurrent searches share it. Each request gets
//! its own memo and catalog, built from the join graph it carries.

use optx_core::error::Result;
use optx_core::rule::RuleRegistry;
use optx_core::scheduler::SearchConfig;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Server configuration, read from the TOML file named by `OPTX_CONFIG`.
///
/// ```toml
/// bind = "127.0.0.1:8080"
/// max_sample = 200
///
/// [search]
/// workers = 4
/// max_jobs = 250000
/// source_type = "hive"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Scheduler settings applied to every search.
    pub search: SearchConfig,
    /// Most plans a single unrank or sample request may return.
    pub max_sample: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            search: SearchConfig::default(),
            max_sample: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

impl ServerConfig {
    /// Configuration from `OPTX_CONFIG` (defaults if unset) with `OPTX_BIND` applied
    /// on top.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let path = std::env::var("OPTX_CONFIG").ok();
        let bind = std::env::var("OPTX_BIND").ok();
        Self::load_from(path.as_deref().map(Path::new), bind)
    }

    pub fn load_from(
        path: Option<&Path>,
        bind: Option<String>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let display = path.display().to_string();
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: display.clone(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: display,
                    source,
                })?
            }
            None => Self::default(),
        };
        if let Some(bind) = bind {
            config.bind = bind;
        }
        Ok(config)
    }
}

pub struct AppState {
    pub rule_registry: Arc<RuleRegistry>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            rule_registry: Arc::new(optx_rules::default_rule_registry()?),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            max_sample = 25

            [search]
            workers = 2
            source_type = "hive"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:3000");
        assert_eq!(config.max_sample, 25);
        assert_eq!(config.search.workers, 2);
        assert_eq!(config.search.max_jobs, 1_000_000);
        assert_eq!(config.search.source_type.as_deref(), Some("hive"));
        assert!(config.search.implement);
    }

    #[test]
    fn test_bind_override_without_file() {
        let config = ServerConfig::load_from(None, Some("127.0.0.1:9000".into())).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.max_sample, 1000);
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::load_from(Some(Path::new("/nonexistent/optx.toml")), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
