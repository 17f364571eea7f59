use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub tokens: TokenConfig,
    pub policy: PolicyConfig,
    pub notifier: NotifierConfig,
    pub events: EventsConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

/// Where users, roles, credentials and tokens live.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_hours: i64,
}

/// Lifetimes of one-time tokens, per purpose.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub setup_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
    pub invitation_ttl_hours: i64,
    pub email_verification_ttl_hours: i64,
    pub app_base_url: String,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub enabled: bool,
    pub url: String,
    pub policy_path: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifierKind {
    Broker,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub consumer_group: String,
    pub consumer_name: String,
    pub block_ms: usize,
    pub batch_size: usize,
    pub max_retry_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let store: StoreBackend = get_env("STORE", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let needs_database = store == StoreBackend::Postgres;

        let notifier_kind: NotifierKind = get_env("NOTIFIER", Some("broker"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let smtp = if notifier_kind == NotifierKind::Smtp {
            Some(SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                from: get_env("SMTP_FROM", None, is_prod)?,
            })
        } else {
            None
        };

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store,
            database: DatabaseConfig {
                url: Secret::new(if needs_database {
                    get_env("DATABASE_URL", None, is_prod)?
                } else {
                    String::new()
                }),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: Secret::new(get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?),
            },
            jwt: JwtConfig {
                secret: Secret::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_expiry_hours: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_HOURS",
                    "24",
                    is_prod,
                )?,
            },
            tokens: TokenConfig {
                setup_ttl_hours: parse_env("TOKEN_SETUP_TTL_HOURS", "24", is_prod)?,
                reset_ttl_minutes: parse_env("TOKEN_RESET_TTL_MINUTES", "60", is_prod)?,
                invitation_ttl_hours: parse_env("TOKEN_INVITATION_TTL_HOURS", "72", is_prod)?,
                email_verification_ttl_hours: parse_env(
                    "TOKEN_EMAIL_VERIFICATION_TTL_HOURS",
                    "24",
                    is_prod,
                )?,
                app_base_url: get_env(
                    "APP_BASE_URL",
                    Some("https://app.yourcompany.com"),
                    is_prod,
                )?
                .trim_end_matches('/')
                .to_string(),
                sweep_interval_seconds: parse_env("TOKEN_SWEEP_INTERVAL_SECONDS", "3600", false)?,
            },
            policy: PolicyConfig {
                enabled: parse_env("OPA_ENABLED", "false", false)?,
                url: get_env("OPA_URL", Some("http://localhost:8181"), false)?
                    .trim_end_matches('/')
                    .to_string(),
                policy_path: get_env("OPA_POLICY_PATH", Some("iam/authz"), false)?,
                timeout_ms: parse_env("OPA_TIMEOUT_MS", "500", false)?,
            },
            notifier: NotifierConfig {
                kind: notifier_kind,
                smtp,
            },
            events: EventsConfig {
                consumer_group: get_env("EVENTS_CONSUMER_GROUP", Some("identity-service"), false)?,
                consumer_name: env::var("EVENTS_CONSUMER_NAME")
                    .or_else(|_| env::var("HOSTNAME"))
                    .unwrap_or_else(|_| format!("identity-{}", uuid::Uuid::new_v4())),
                block_ms: parse_env("EVENTS_BLOCK_MS", "5000", false)?,
                batch_size: parse_env("EVENTS_BATCH_SIZE", "16", false)?,
                max_retry_seconds: parse_env("EVENTS_MAX_RETRY_SECONDS", "30", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", false)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", false)?,
                password_reset_attempts: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_ATTEMPTS",
                    "3",
                    false,
                )?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    "3600",
                    false,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 bytes"
            )));
        }

        // (key, value, minutes per unit)
        let lifetimes = [
            (
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                self.jwt.access_token_expiry_minutes,
                1,
            ),
            (
                "JWT_REFRESH_TOKEN_EXPIRY_HOURS",
                self.jwt.refresh_token_expiry_hours,
                60,
            ),
            ("TOKEN_SETUP_TTL_HOURS", self.tokens.setup_ttl_hours, 60),
            ("TOKEN_RESET_TTL_MINUTES", self.tokens.reset_ttl_minutes, 1),
            (
                "TOKEN_INVITATION_TTL_HOURS",
                self.tokens.invitation_ttl_hours,
                60,
            ),
            (
                "TOKEN_EMAIL_VERIFICATION_TTL_HOURS",
                self.tokens.email_verification_ttl_hours,
                60,
            ),
        ];
        for (key, value, unit) in lifetimes {
            if value <= 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must be positive",
                    key
                )));
            }
            if value > MAX_LIFETIME_MINUTES / unit {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} must not exceed 365 days",
                    key
                )));
            }
        }

        if self.policy.enabled && self.policy.url.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OPA_URL is required when OPA_ENABLED=true"
            )));
        }

        if self.notifier.kind == NotifierKind::Smtp && self.notifier.smtp.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP settings are required when NOTIFIER=smtp"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.store == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE=memory is not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

/// Upper bound for every token lifetime and TTL.
const MAX_LIFETIME_MINUTES: i64 = 365 * 24 * 60;

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl std::str::FromStr for NotifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "broker" => Ok(NotifierKind::Broker),
            "smtp" => Ok(NotifierKind::Smtp),
            _ => Err(format!("Invalid notifier: {}", s)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: core_config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: Secret::new(String::new()),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: Secret::new("redis://127.0.0.1:6379".to_string()),
        },
        jwt: JwtConfig {
            secret: Secret::new("test-secret-that-is-at-least-32-bytes!".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_hours: 24,
        },
        tokens: TokenConfig {
            setup_ttl_hours: 24,
            reset_ttl_minutes: 60,
            invitation_ttl_hours: 72,
            email_verification_ttl_hours: 24,
            app_base_url: "https://app.example.com".to_string(),
            sweep_interval_seconds: 3600,
        },
        policy: PolicyConfig {
            enabled: false,
            url: "http://localhost:8181".to_string(),
            policy_path: "iam/authz".to_string(),
            timeout_ms: 500,
        },
        notifier: NotifierConfig {
            kind: NotifierKind::Broker,
            smtp: None,
        },
        events: EventsConfig {
            consumer_group: "identity-service".to_string(),
            consumer_name: "test".to_string(),
            block_ms: 100,
            batch_size: 16,
            max_retry_seconds: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            password_reset_attempts: 3,
            password_reset_window_seconds: 3600,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn rejects_short_jwt_secret() {
        let mut config = test_config();
        config.jwt.secret = Secret::new("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_token_ttl() {
        let mut config = test_config();
        config.tokens.invitation_ttl_hours = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TOKEN_INVITATION_TTL_HOURS"));
    }

    #[test]
    fn rejects_lifetimes_beyond_a_year() {
        let mut config = test_config();
        config.tokens.setup_ttl_hours = 365 * 24 + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TOKEN_SETUP_TTL_HOURS"));

        let mut config = test_config();
        config.jwt.refresh_token_expiry_hours = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_REFRESH_TOKEN_EXPIRY_HOURS"));

        let mut config = test_config();
        config.tokens.reset_ttl_minutes = 365 * 24 * 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_memory_store_in_production() {
        let mut config = test_config();
        config.environment = Environment::Prod;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_policy_engine_without_url() {
        let mut config = test_config();
        config.policy.enabled = true;
        config.policy.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_enums_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("smtp".parse::<NotifierKind>(), Ok(NotifierKind::Smtp));
        assert!("kafka".parse::<NotifierKind>().is_err());
    }
}
