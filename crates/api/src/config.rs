//! Application configuration

use std::env;

/// Urgent keywords used when `URGENT_KEYWORDS` is not set
pub const DEFAULT_URGENT_KEYWORDS: &[&str] = &[
    "заблокирован",
    "мошенничество",
    "украли",
    "срочно",
    "критично",
    "locked",
    "fraud",
    "stolen",
    "urgent",
    "critical",
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub frontend_url: String,

    // Database (absent → in-memory store)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Lifecycle
    pub urgent_keywords: Vec<String>,

    // Logging
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Lifecycle
            urgent_keywords: match env::var("URGENT_KEYWORDS") {
                Ok(raw) => parse_keywords(&raw)?,
                Err(_) => DEFAULT_URGENT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            },

            // Logging
            log_json: env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

/// Comma-separated keyword list, lowercased; empty entries dropped
fn parse_keywords(raw: &str) -> Result<Vec<String>, ConfigError> {
    let keywords: Vec<String> = raw
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Err(ConfigError::Invalid(
            "URGENT_KEYWORDS must name at least one keyword",
        ));
    }
    Ok(keywords)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "JWT_SECRET",
        "JWT_EXPIRY_HOURS",
        "URGENT_KEYWORDS",
        "LOG_FORMAT",
    ];

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn setup_minimal_config() {
        cleanup_config();
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    #[test]
    #[serial]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.jwt_expiry_hours, 24);
        assert!(config.urgent_keywords.iter().any(|k| k == "мошенничество"));
        assert!(!config.log_json);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_jwt_secret_validation() {
        cleanup_config();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        env::set_var("JWT_SECRET", "too-short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_urgent_keyword_override() {
        setup_minimal_config();
        env::set_var("URGENT_KEYWORDS", " Outage, ,BREACH ");
        env::set_var("DATABASE_URL", "postgres://localhost/helpdesk");
        env::set_var("LOG_FORMAT", "JSON");

        let config = Config::from_env().unwrap();
        assert_eq!(config.urgent_keywords, vec!["outage", "breach"]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/helpdesk")
        );
        assert!(config.log_json);

        env::set_var("URGENT_KEYWORDS", " , ");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        cleanup_config();
    }
}
