use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use std::str::FromStr;

use crate::services::card_registry::normalize_money;

pub const DEFAULT_OPENING_BALANCE: &str = "1000.00";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;
/// Top of every hour (sec min hour day month weekday)
pub const DEFAULT_EXPIRY_SWEEP_SCHEDULE: &str = "0 0 * * * *";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Security
    pub card_encryption_key: Secret<String>,
    pub session_secret: Secret<String>,

    // Card defaults
    pub default_opening_balance: Decimal,

    // Storage
    pub lock_timeout_ms: u64,

    // Jobs
    pub expiry_sweep_schedule: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    fn from_source(config: &config::Config) -> Result<Self, config::ConfigError> {
        let default_opening_balance = config
            .get_string("default_opening_balance")
            .unwrap_or_else(|_| DEFAULT_OPENING_BALANCE.to_string());
        let default_opening_balance = Decimal::from_str(default_opening_balance.trim())
            .map_err(|e| {
                config::ConfigError::Message(format!("invalid DEFAULT_OPENING_BALANCE: {}", e))
            })?;
        if default_opening_balance < Decimal::ZERO {
            return Err(config::ConfigError::Message(
                "DEFAULT_OPENING_BALANCE must not be negative".to_string(),
            ));
        }
        let default_opening_balance =
            normalize_money(default_opening_balance, "DEFAULT_OPENING_BALANCE")
                .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            card_encryption_key: Secret::new(config.get("card_encryption_key")?),
            session_secret: Secret::new(config.get("session_secret")?),

            default_opening_balance,

            lock_timeout_ms: config
                .get("lock_timeout_ms")
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),

            expiry_sweep_schedule: config
                .get("expiry_sweep_schedule")
                .unwrap_or_else(|_| DEFAULT_EXPIRY_SWEEP_SCHEDULE.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;

    fn source(pairs: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("database_url", "postgres://localhost/cardvault"),
        ("port", "8080"),
        ("card_encryption_key", "k3y"),
        ("session_secret", "s3cret"),
    ];

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_source(&source(&REQUIRED)).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.default_opening_balance, dec!(1000.00));
        assert_eq!(config.lock_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert_eq!(config.expiry_sweep_schedule, DEFAULT_EXPIRY_SWEEP_SCHEDULE);
        assert_eq!(config.card_encryption_key.expose_secret(), "k3y");
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("default_opening_balance", "250.5"));
        pairs.push(("lock_timeout_ms", "750"));

        let config = Config::from_source(&source(&pairs)).unwrap();

        assert_eq!(config.default_opening_balance, dec!(250.50));
        assert_eq!(config.default_opening_balance.scale(), 2);
        assert_eq!(config.lock_timeout_ms, 750);
    }

    #[rstest]
    #[case("0.005")]
    #[case("10000000000000")]
    #[case("-1")]
    fn test_opening_balance_outside_stored_precision_is_refused(#[case] balance: &str) {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("default_opening_balance", balance));

        assert!(Config::from_source(&source(&pairs)).is_err());
    }

    #[test]
    fn test_missing_key_and_bad_balance() {
        assert!(Config::from_source(&source(&REQUIRED[..3])).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("default_opening_balance", "lots"));
        assert!(Config::from_source(&source(&pairs)).is_err());
    }
}
