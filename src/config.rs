use axum_client_ip::ClientIpSource;
use thiserror::Error;

/// Deployment mode. Drives error verbosity and cookie security.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// `None` selects the in-process document store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_maxage: i64,
    /// Session cookie lifetime in days.
    pub jwt_cookie_expires_in: i64,
    pub port: u16,
    pub public_url: String,
    pub frontend_url: Option<String>,
    pub rate_limit_max: u32,
    /// Rate limit window in seconds.
    pub rate_limit_window: i64,
    pub ip_source: ClientIpSource,
    pub smtp: Option<SmtpConfig>,
    pub email_from: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    /// Served under `/img`; uploads land in its `users` and `tours` folders.
    pub upload_dir: String,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn init() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "APP_ENV",
                    value: other.to_string(),
                });
            }
        };

        let database_url = get("DATABASE_URL").map(|url| match get("DATABASE_PASSWORD") {
            Some(password) => url.replace("<PASSWORD>", &password),
            None => url,
        });

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let jwt_maxage = match get("JWT_EXPIRES_IN") {
            Some(value) => parse_duration(&value).ok_or(ConfigError::Invalid {
                key: "JWT_EXPIRES_IN",
                value,
            })?,
            None => 90 * 24 * 60 * 60,
        };

        let jwt_cookie_expires_in = parse_number(get("JWT_COOKIE_EXPIRES_IN"), "JWT_COOKIE_EXPIRES_IN", 90)?;
        let port = parse_number(get("PORT"), "PORT", 3000)?;

        let public_url = get("PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let rate_limit_max = parse_number(get("RATE_LIMIT_MAX"), "RATE_LIMIT_MAX", 100)?;
        let rate_limit_window = match get("RATE_LIMIT_WINDOW") {
            Some(value) => parse_duration(&value).ok_or(ConfigError::Invalid {
                key: "RATE_LIMIT_WINDOW",
                value,
            })?,
            None => 60 * 60,
        };

        let ip_source = match get("IP_SOURCE").as_deref() {
            None | Some("ConnectInfo") => ClientIpSource::ConnectInfo,
            Some("CfConnectingIp") => ClientIpSource::CfConnectingIp,
            Some("RightmostXForwardedFor") => ClientIpSource::RightmostXForwardedFor,
            Some("XRealIp") => ClientIpSource::XRealIp,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "IP_SOURCE",
                    value: other.to_string(),
                });
            }
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_number(get("SMTP_PORT"), "SMTP_PORT", 587)?,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
            }),
            None => None,
        };

        Ok(Config {
            environment,
            database_url,
            jwt_secret,
            jwt_maxage,
            jwt_cookie_expires_in,
            port,
            public_url,
            frontend_url: get("FRONTEND_URL"),
            rate_limit_max,
            rate_limit_window,
            ip_source,
            smtp,
            email_from: get("EMAIL_FROM").unwrap_or_else(|| "Natours <hello@natours.io>".to_string()),
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_api_base: get("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "public/img".to_string()),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Parse `90d`, `12h`, `15m`, `30s` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<i64> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: i64 = number.parse().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn durations_accept_suffixes_and_seconds() {
        assert_eq!(parse_duration("90d"), Some(90 * 86_400));
        assert_eq!(parse_duration("15m"), Some(900));
        assert_eq!(parse_duration("2h"), Some(7_200));
        assert_eq!(parse_duration("45"), Some(45));
        assert_eq!(parse_duration("10w"), None);
        assert_eq!(parse_duration("d"), None);
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = config_from(&[("JWT_SECRET", "secret")]).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 3000);
        assert_eq!(config.jwt_maxage, 90 * 86_400);
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.rate_limit_window, 3_600);
        assert_eq!(config.public_url, "http://localhost:3000");
        assert!(config.database_url.is_none());
        assert!(config.smtp.is_none());
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(matches!(config_from(&[]), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn database_password_is_substituted() {
        let config = config_from(&[
            ("JWT_SECRET", "secret"),
            ("DATABASE_URL", "postgres://natours:<PASSWORD>@db/natours"),
            ("DATABASE_PASSWORD", "hunter2"),
            ("APP_ENV", "production"),
        ])
        .unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://natours:hunter2@db/natours")
        );
        assert!(config.environment.is_production());
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = config_from(&[("JWT_SECRET", "secret"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }
}
