use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;

/// Upper bound on tolerated clock drift between issuer and verifier.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 30;
/// Shortest HMAC secret accepted in production.
pub const MIN_PROD_SECRET_LEN: usize = 32;

const DEV_FALLBACK_SECRET: &str = "dev-only-signing-secret-change-me-before-deploying";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub algorithm: Algorithm,
    /// HMAC signing secret for access tokens.
    pub secret: Option<Secret<String>>,
    /// HMAC secret for refresh tokens; derived from `secret` when absent.
    pub refresh_secret: Option<Secret<String>>,
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub issuer: String,
    pub clock_skew_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub retention_days: i64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    /// Reverse proxies allowed to set `X-Forwarded-For`. Empty trusts none.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: Secret<String>,
}

impl JwtConfig {
    pub fn is_hmac(&self) -> bool {
        matches!(
            self.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        )
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let algorithm = parse_algorithm(&get_env("JWT_ALGORITHM", Some("HS256"), false)?)?;
        let hmac = matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        );

        let jwt = JwtConfig {
            algorithm,
            secret: if hmac {
                Some(Secret::new(get_env(
                    "JWT_SECRET",
                    Some(DEV_FALLBACK_SECRET),
                    is_prod,
                )?))
            } else {
                None
            },
            refresh_secret: env::var("JWT_REFRESH_SECRET").ok().map(Secret::new),
            private_key_path: if hmac {
                None
            } else {
                Some(get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?)
            },
            public_key_path: if hmac {
                None
            } else {
                Some(get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?)
            },
            access_token_ttl_seconds: parse_num(get_env(
                "JWT_ACCESS_TOKEN_TTL_SECONDS",
                Some("900"),
                false,
            )?)?,
            refresh_token_ttl_seconds: parse_num(get_env(
                "JWT_REFRESH_TOKEN_TTL_SECONDS",
                Some("604800"),
                false,
            )?)?,
            issuer: get_env("JWT_ISSUER", Some("cms-auth"), false)?,
            clock_skew_seconds: parse_num::<i64>(get_env(
                "JWT_CLOCK_SKEW_SECONDS",
                Some("30"),
                false,
            )?)?
            .clamp(0, MAX_CLOCK_SKEW_SECONDS),
        };

        let bootstrap_admin = match (
            env::var("BOOTSTRAP_ADMIN_EMAIL"),
            env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(BootstrapAdmin {
                email,
                password: Secret::new(password),
            }),
            _ => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("cms-auth"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            jwt,
            session: SessionConfig {
                retention_days: parse_num(get_env("SESSION_RETENTION_DAYS", Some("7"), false)?)?,
                sweep_interval_seconds: parse_num(get_env(
                    "SESSION_SWEEP_INTERVAL_SECONDS",
                    Some("3600"),
                    false,
                )?)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_num(get_env(
                    "RATE_LIMIT_LOGIN_ATTEMPTS",
                    Some("5"),
                    false,
                )?)?,
                login_window_seconds: parse_num(get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?)?,
                global_ip_limit: parse_num(get_env(
                    "RATE_LIMIT_GLOBAL_IP_LIMIT",
                    Some("300"),
                    false,
                )?)?,
                global_ip_window_seconds: parse_num(get_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    false,
                )?)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                trusted_proxies: parse_ip_list(&get_env("TRUSTED_PROXIES", Some(""), false)?)?,
            },
            bootstrap_admin,
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup checks. A failure here must abort the process.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.jwt.refresh_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.session.retention_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_RETENTION_DAYS must be positive"
            )));
        }

        if self.jwt.is_hmac() {
            let secret_len = self
                .jwt
                .secret
                .as_ref()
                .map(|s| s.expose_secret().len())
                .unwrap_or(0);

            if secret_len == 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET is required for HMAC algorithms"
                )));
            }

            if self.environment == Environment::Prod && secret_len < MIN_PROD_SECRET_LEN {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SECRET must be at least {} characters in production",
                    MIN_PROD_SECRET_LEN
                )));
            }
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

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

fn parse_num<T>(raw: String) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("Invalid number '{}': {}", raw, e))
    })
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid proxy address '{}': {}", s, e))
            })
        })
        .collect()
}

fn parse_algorithm(raw: &str) -> Result<Algorithm, AppError> {
    match raw.to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Unsupported JWT_ALGORITHM: {}",
            other
        ))),
    }
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
