use crate::error::{AgentError, AgentResult};

/// Connection descriptor plus the reasoning-service and observability
/// credentials, assembled once at process startup and passed by reference
/// thereafter.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub database: DatabaseConfig,
    pub skysql: Option<SkySqlConfig>,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

/// Present only when both `SKYSQL_API_KEY` and `SKYSQL_SERVICE_ID` are set;
/// absence makes remote log fetch and metrics enrichment inert rather than
/// an error.
#[derive(Debug, Clone)]
pub struct SkySqlConfig {
    pub api_key: String,
    pub service_id: String,
    pub log_api_url: String,
}

const DEFAULT_LOG_API_URL: &str = "https://api.skysql.com";

impl Config {
    /// Load configuration from the recognized environment variables
    /// . There is no file-based configuration layer in this
    /// system — `.env` loading belongs to the excluded CLI driver.
    pub fn from_env() -> AgentResult<Self> {
        let openai = OpenAiConfig {
            api_key: require_env("OPENAI_API_KEY")?,
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
        };

        let database = DatabaseConfig {
            host: std::env::var("DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: match std::env::var("DB_PORT") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| AgentError::configuration(format!("DB_PORT is not a valid port: {v}")))?,
                Err(_) => 3306,
            },
            user: std::env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
            password: std::env::var("DB_PASSWORD").unwrap_or_default(),
            database: std::env::var("DB_DATABASE").ok(),
        };

        let skysql = match (std::env::var("SKYSQL_API_KEY"), std::env::var("SKYSQL_SERVICE_ID")) {
            (Ok(api_key), Ok(service_id)) => {
                let log_api_url =
                    std::env::var("SKYSQL_LOG_API_URL").unwrap_or_else(|_| DEFAULT_LOG_API_URL.to_string());
                tracing::info!("SkySQL observability integration enabled for service {service_id}");
                Some(SkySqlConfig { api_key, service_id, log_api_url })
            }
            _ => {
                tracing::debug!("SkySQL credentials not set; remote log fetch and metrics enrichment are inert");
                None
            }
        };

        let config = Config { openai, database, skysql };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AgentResult<()> {
        if self.openai.api_key.trim().is_empty() {
            return Err(AgentError::configuration("OPENAI_API_KEY must not be empty"));
        }
        if self.database.host.trim().is_empty() {
            return Err(AgentError::configuration("DB_HOST must not be empty"));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> AgentResult<String> {
    std::env::var(name).map_err(|_| AgentError::configuration(format!("{name} is required but not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "OPENAI_API_KEY",
            "OPENAI_MODEL",
            "DB_HOST",
            "DB_PORT",
            "DB_USER",
            "DB_PASSWORD",
            "DB_DATABASE",
            "SKYSQL_API_KEY",
            "SKYSQL_SERVICE_ID",
            "SKYSQL_LOG_API_URL",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_openai_key_is_configuration_error() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn defaults_apply_when_unset() {
        clear_env();
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-test") };
        let config = Config::from_env().unwrap();
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.openai.model, "gpt-4o");
        assert!(config.skysql.is_none());
        clear_env();
    }

    #[test]
    fn skysql_config_requires_both_vars() {
        clear_env();
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-test") };
        unsafe { std::env::set_var("SKYSQL_API_KEY", "key") };
        let config = Config::from_env().unwrap();
        assert!(config.skysql.is_none());

        unsafe { std::env::set_var("SKYSQL_SERVICE_ID", "svc-1") };
        let config = Config::from_env().unwrap();
        let skysql = config.skysql.unwrap();
        assert_eq!(skysql.service_id, "svc-1");
        assert_eq!(skysql.log_api_url, DEFAULT_LOG_API_URL);
        clear_env();
    }
}
