//! Layered configuration loading using figment.
//!
//! Sources, highest priority first:
//! 1. `SCHOOL_RESULTS_*` environment variables (`__` separates sections)
//! 2. `DATABASE_URL`, mapped to `database.url`
//! 3. `./school-results.toml`, or the file passed with `--config`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rank::RankingPolicy;
use crate::report::ReportFormat;

const DEFAULT_CONFIG_FILE: &str = "school-results.toml";

const fn default_max_connections() -> u32 {
    5
}

fn default_title() -> String {
    "Student Results".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RankingConfig {
    #[serde(default)]
    pub policy: RankingPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub default_format: ReportFormat,

    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            default_format: ReportFormat::default(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(config_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::prefixed("SCHOOL_RESULTS_").ignore(&["LOG"]).split("__"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Database settings, for commands that need a connection.
    pub fn require_database(&self) -> Result<&DatabaseConfig, ConfigError> {
        if self.database.is_configured() {
            Ok(&self.database)
        } else {
            Err(ConfigError::NotConfigured {
                section: "database".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_correct() {
        let config = AppConfig::default();
        assert!(!config.database.is_configured());
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.ranking.policy, RankingPolicy::Positional);
        assert_eq!(config.report.default_format, ReportFormat::Markdown);
        assert_eq!(config.report.title, "Student Results");
    }

    #[test]
    fn database_url_env_is_picked_up() {
        Jail::expect_with(|jail| {
            jail.set_env("DATABASE_URL", "postgres://localhost/school");
            let config = AppConfig::load(None).expect("config loads");
            assert_eq!(config.database.url, "postgres://localhost/school");
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_beats_toml_and_database_url() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "school-results.toml",
                r#"
                [database]
                url = "postgres://toml/school"
                max_connections = 2

                [ranking]
                policy = "dense"

                [report]
                title = "Form 2 Results"
                "#,
            )?;
            jail.set_env("DATABASE_URL", "postgres://plain/school");
            jail.set_env("SCHOOL_RESULTS_DATABASE__URL", "postgres://prefixed/school");

            let config = AppConfig::load(None).expect("config loads");
            assert_eq!(config.database.url, "postgres://prefixed/school");
            assert_eq!(config.database.max_connections, 2);
            assert_eq!(config.ranking.policy, RankingPolicy::Dense);
            assert_eq!(config.report.title, "Form 2 Results");
            Ok(())
        });
    }

    #[test]
    fn zero_connections_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SCHOOL_RESULTS_DATABASE__MAX_CONNECTIONS", "0");
            let error = AppConfig::load(None).expect_err("invalid pool size");
            assert!(matches!(error, ConfigError::InvalidValue { .. }));
            Ok(())
        });
    }

    #[test]
    fn missing_database_is_reported() {
        let config = AppConfig::default();
        let error = config.require_database().expect_err("no database url");
        assert!(matches!(error, ConfigError::NotConfigured { .. }));
    }
}
