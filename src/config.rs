//! Configuration for the dashboard.
//!
//! Values are layered: built-in defaults, then `config/iris.toml` (if it
//! exists), then `IRIS__SECTION__KEY` environment variables.

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/iris.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub storage: StorageConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

/// Where artifacts are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Seed for the stratified train/test split
    pub seed: u64,
    /// Fraction of the dataset held out for evaluation
    pub test_fraction: f64,
    /// Number of neighbours the KNN model votes with
    pub knn_neighbors: usize,
    pub logistic: LogisticConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticConfig {
    /// Inverse L2 regularisation strength
    pub c: f64,
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Training stops once every gradient component is below this
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl DashboardConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration, layering the given file (optional) and the
    /// environment over the defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(
                Config::try_from(&DashboardConfig::default())
                    .context("Failed to build default configuration")?,
            )
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("IRIS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: DashboardConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let training = &self.training;
        ensure!(
            training.test_fraction > 0.0 && training.test_fraction < 1.0,
            "training.test_fraction must be in (0, 1), got {}",
            training.test_fraction
        );
        ensure!(training.knn_neighbors > 0, "training.knn_neighbors must be at least 1");

        let logistic = &training.logistic;
        ensure!(logistic.c > 0.0, "training.logistic.c must be positive, got {}", logistic.c);
        ensure!(
            logistic.learning_rate > 0.0,
            "training.logistic.learning_rate must be positive, got {}",
            logistic.learning_rate
        );
        ensure!(logistic.max_iter > 0, "training.logistic.max_iter must be at least 1");
        ensure!(
            logistic.tolerance >= 0.0,
            "training.logistic.tolerance must not be negative"
        );
        Ok(())
    }

    /// Default tracing directive for this crate
    pub fn log_directive(&self) -> String {
        format!("iris_dashboard={}", self.logging.level)
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                model_dir: PathBuf::from("saved_models"),
            },
            training: TrainingConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.2,
            knn_neighbors: 5,
            logistic: LogisticConfig {
                c: 1.0,
                learning_rate: 1.0,
                max_iter: 5000,
                tolerance: 1e-6,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DashboardConfig::default();
        assert_eq!(config.storage.model_dir, PathBuf::from("saved_models"));
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.knn_neighbors, 5);
        assert!(config.validate().is_ok());
        assert_eq!(config.log_directive(), "iris_dashboard=info");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DashboardConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\nmodel_dir = \"artifacts\"\n\n[training]\nknn_neighbors = 3\n\n[training.logistic]\nmax_iter = 500"
        )
        .unwrap();

        let config = DashboardConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.storage.model_dir, PathBuf::from("artifacts"));
        assert_eq!(config.training.knn_neighbors, 3);
        assert_eq!(config.training.logistic.max_iter, 500);
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DashboardConfig::default();
        config.training.test_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = DashboardConfig::default();
        config.training.knn_neighbors = 0;
        assert!(config.validate().is_err());

        let mut config = DashboardConfig::default();
        config.training.logistic.c = 0.0;
        assert!(config.validate().is_err());
    }
}
