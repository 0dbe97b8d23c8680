use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::CompanyId;

const CONFIG_FILE: &str = "ledger-core.toml";
const ENV_PREFIX: &str = "LEDGER_CORE";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_company_id")]
    pub company_id: i64,
    /// Reimbursement per business kilometre
    #[serde(default = "default_mileage_rate")]
    pub mileage_rate: Decimal,
    /// Run the bank rules over freshly imported statement rows
    #[serde(default = "default_auto_match")]
    pub auto_match: bool,
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ledger-core")
        .join("ledger.db")
}

fn default_company_id() -> i64 {
    1
}

fn default_mileage_rate() -> Decimal {
    Decimal::new(23, 2)
}

fn default_auto_match() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            company_id: default_company_id(),
            mileage_rate: default_mileage_rate(),
            auto_match: default_auto_match(),
        }
    }
}

impl AppConfig {
    /// Load `ledger-core.toml` from the working directory (optional) with
    /// `LEDGER_CORE__*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "Failed to read {}, falling back to environment: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let config: AppConfig = settings.try_deserialize()?;
        if config.mileage_rate <= Decimal::ZERO {
            return Err(ConfigError::Message(format!(
                "mileage_rate must be positive, got {}",
                config.mileage_rate
            )));
        }
        Ok(config)
    }

    pub fn company(&self) -> CompanyId {
        CompanyId(self.company_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert!(config.database_path.ends_with("ledger-core/ledger.db"));
        assert_eq!(config.mileage_rate, Decimal::from_str("0.23").unwrap());
        assert!(config.auto_match);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger-core.toml");
        std::fs::write(
            &path,
            "database_path = \"/tmp/boekhouding.db\"\ncompany_id = 7\nmileage_rate = \"0.21\"\nauto_match = false\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/boekhouding.db"));
        assert_eq!(config.company(), CompanyId(7));
        assert_eq!(config.mileage_rate, Decimal::from_str("0.21").unwrap());
        assert!(!config.auto_match);
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger-core.toml");
        std::fs::write(&path, "mileage_rate = \"0\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
