use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub redis: RedisConfig,
    pub legacy: LegacyConfig,
    pub modern: ModernConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct LegacyConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl LegacyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ModernConfig {
    pub base_url: String,
    pub subscription_key: Secret<String>,
    pub timeout_secs: u64,
}

impl ModernConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AccessConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        // Plain variables win over the APP__ layer
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common_config.otlp_endpoint = endpoint;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            common_config.log_level = level;
        }

        let timeout_secs = parse_env("UPSTREAM_TIMEOUT_SECS", "10", is_prod)?;

        Ok(AccessConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("access-service"), false)?,
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            },
            legacy: LegacyConfig {
                base_url: get_env("LEGACY_BASE_URL", Some("http://localhost:9101"), is_prod)?,
                api_key: Secret::new(get_env("LEGACY_API_KEY", Some(""), is_prod)?),
                page_size: parse_env("LEGACY_PAGE_SIZE", "500", false)?,
                timeout_secs,
            },
            modern: ModernConfig {
                base_url: get_env("MODERN_BASE_URL", Some("http://localhost:9102"), is_prod)?,
                subscription_key: Secret::new(get_env(
                    "MODERN_SUBSCRIPTION_KEY",
                    Some(""),
                    is_prod,
                )?),
                timeout_secs,
            },
            registry: RegistryConfig {
                base_url: get_env(
                    "RESOURCE_REGISTRY_BASE_URL",
                    Some("http://localhost:9102"),
                    is_prod,
                )?,
                timeout_secs,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError> {
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is not a valid number", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_falls_back_to_default_outside_prod() {
        let value = get_env("ACCESS_TEST_UNSET_VARIABLE", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn test_get_env_required_in_prod() {
        let result = get_env("ACCESS_TEST_UNSET_VARIABLE", Some("fallback"), true);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_parse_env_rejects_non_numeric_default() {
        let result: Result<u64, _> = parse_env("ACCESS_TEST_UNSET_VARIABLE", "ten", false);
        assert!(result.is_err());
    }

    #[test]
    fn test_timeouts_are_seconds() {
        let config = RegistryConfig {
            base_url: "http://localhost".to_string(),
            timeout_secs: 10,
        };
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }
}
