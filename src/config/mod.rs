use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("{0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub account_lockout: Option<AccountLockoutConfig>,
    pub password_policy: Option<PasswordPolicyConfig>,
    pub email: EmailConfig,
    pub push: PushConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub mount_path: String,
    pub public_server_url: Option<String>,
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// When set, requests must carry a matching `X-Parse-Application-Id`
    pub app_id: Option<String>,
    pub master_key: String,
    pub read_only_master_key: Option<String>,
    /// Session lifetime in seconds
    pub session_length: i64,
    /// bcrypt work factor for stored passwords
    pub password_hash_cost: u32,
}

/// Enables the failed-login lockout when present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLockoutConfig {
    /// Failed attempts that trigger a lockout
    pub threshold: u32,
    /// Lockout length in minutes
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicyConfig {
    /// Days before a password must be reset
    pub max_password_age: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub verify_user_emails: bool,
    pub prevent_login_with_unverified_email: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; the in-memory store is used when absent
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_requests: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|key| env::var(key).ok())
    }

    /// Defaults for `APP_ENV`, then the YAML file named by `BAAS_CONFIG_FILE`,
    /// then individual variable overrides
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        let mut config = match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        };

        if let Some(path) = lookup("BAAS_CONFIG_FILE") {
            config = config.with_file(&path)?;
        }

        let config = config.with_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_file(self, path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        self.with_yaml(&contents)
    }

    /// Overlay a partial YAML document onto this configuration
    pub fn with_yaml(self, contents: &str) -> Result<Self, ConfigError> {
        let overlay: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let mut base = serde_yaml::to_value(&self)?;
        merge_yaml(&mut base, overlay);
        Ok(serde_yaml::from_value(base)?)
    }

    fn with_overrides(mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Server overrides
        if let Some(v) = parse_var(lookup, "PORT")? {
            self.server.port = v;
        }
        if let Some(v) = lookup("BAAS_MOUNT_PATH") {
            self.server.mount_path = v;
        }
        if let Some(v) = lookup("BAAS_PUBLIC_SERVER_URL") {
            self.server.public_server_url = Some(v);
        }
        if let Some(v) = lookup("BAAS_APP_NAME") {
            self.server.app_name = v;
        }

        // Security overrides
        if let Some(v) = lookup("BAAS_APP_ID") {
            self.security.app_id = Some(v);
        }
        if let Some(v) = lookup("BAAS_MASTER_KEY") {
            self.security.master_key = v;
        }
        if let Some(v) = lookup("BAAS_READ_ONLY_MASTER_KEY") {
            self.security.read_only_master_key = Some(v);
        }
        if let Some(v) = parse_var(lookup, "BAAS_SESSION_LENGTH")? {
            self.security.session_length = v;
        }
        if let Some(v) = parse_var(lookup, "BAAS_PASSWORD_HASH_COST")? {
            self.security.password_hash_cost = v;
        }

        // Lockout needs both halves from some layer
        let threshold = parse_var(lookup, "BAAS_ACCOUNT_LOCKOUT_THRESHOLD")?
            .or(self.account_lockout.map(|l| l.threshold));
        let duration = parse_var(lookup, "BAAS_ACCOUNT_LOCKOUT_DURATION")?
            .or(self.account_lockout.map(|l| l.duration));
        self.account_lockout = match (threshold, duration) {
            (Some(threshold), Some(duration)) => Some(AccountLockoutConfig { threshold, duration }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "account lockout requires both threshold and duration".to_string(),
                ))
            }
        };

        if let Some(v) = parse_var(lookup, "BAAS_MAX_PASSWORD_AGE")? {
            self.password_policy = Some(PasswordPolicyConfig { max_password_age: Some(v) });
        }

        // Email and push
        if let Some(v) = parse_var(lookup, "BAAS_VERIFY_USER_EMAILS")? {
            self.email.verify_user_emails = v;
        }
        if let Some(v) = parse_var(lookup, "BAAS_PREVENT_LOGIN_WITH_UNVERIFIED_EMAIL")? {
            self.email.prevent_login_with_unverified_email = v;
        }
        if let Some(v) = parse_var(lookup, "BAAS_PUSH_ENABLED")? {
            self.push.enabled = v;
        }

        // Database overrides
        // An empty DATABASE_URL selects the in-memory store
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v).filter(|url| !url.is_empty());
        }
        if let Some(v) = parse_var(lookup, "DATABASE_MAX_CONNECTIONS")? {
            self.database.max_connections = v;
        }
        if let Some(v) = parse_var(lookup, "DATABASE_CONNECTION_TIMEOUT")? {
            self.database.connection_timeout = v;
        }

        // Logging overrides
        if let Some(v) = lookup("BAAS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = parse_var(lookup, "BAAS_LOG_REQUESTS")? {
            self.logging.log_requests = v;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(lockout) = &self.account_lockout {
            if !(1..=999).contains(&lockout.threshold) {
                return Err(ConfigError::Invalid(
                    "Account lockout threshold should be an integer greater than 0 and less than 1000".to_string(),
                ));
            }
            if !(1..=99999).contains(&lockout.duration) {
                return Err(ConfigError::Invalid(
                    "Account lockout duration should be greater than 0 and less than 100000".to_string(),
                ));
            }
        }

        if let Some(PasswordPolicyConfig { max_password_age: Some(age) }) = &self.password_policy {
            if *age < 0 {
                return Err(ConfigError::Invalid("passwordPolicy.maxPasswordAge must be a positive number".to_string()));
            }
        }

        if self.security.master_key.is_empty() {
            return Err(ConfigError::Invalid("masterKey is required".to_string()));
        }
        if self.security.read_only_master_key.as_deref() == Some(self.security.master_key.as_str()) {
            return Err(ConfigError::Invalid("masterKey and readOnlyMasterKey should be different".to_string()));
        }
        if self.security.session_length <= 0 {
            return Err(ConfigError::Invalid("Session length must be a value greater than 0.".to_string()));
        }
        if !(4..=31).contains(&self.security.password_hash_cost) {
            return Err(ConfigError::Invalid("password hash cost must be between 4 and 31".to_string()));
        }
        if !self.server.mount_path.starts_with('/') {
            return Err(ConfigError::Invalid("mount path must start with a /".to_string()));
        }
        Ok(())
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 1337,
                mount_path: "/parse".to_string(),
                public_server_url: None,
                app_name: "baas-api".to_string(),
            },
            security: SecurityConfig {
                app_id: None,
                master_key: "dev-master-key".to_string(),
                read_only_master_key: None,
                session_length: 60 * 60 * 24 * 365, // 1 year
                password_hash_cost: 10,
            },
            account_lockout: None,
            password_policy: None,
            email: EmailConfig {
                verify_user_emails: false,
                prevent_login_with_unverified_email: false,
            },
            push: PushConfig { enabled: true },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                log_requests: true,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::production();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.logging = LoggingConfig {
            level: "info".to_string(),
            log_requests: true,
        };
        config
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig {
                port: 1337,
                mount_path: "/parse".to_string(),
                public_server_url: None,
                app_name: "baas-api".to_string(),
            },
            security: SecurityConfig {
                app_id: None,
                // Must be supplied by the deployment
                master_key: String::new(),
                read_only_master_key: None,
                session_length: 60 * 60 * 24 * 365,
                password_hash_cost: 10,
            },
            account_lockout: None,
            password_policy: None,
            email: EmailConfig {
                verify_user_emails: false,
                prevent_login_with_unverified_email: false,
            },
            push: PushConfig { enabled: false },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            logging: LoggingConfig {
                level: "warn".to_string(),
                log_requests: false,
            },
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value }),
        None => Ok(None),
    }
}

fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => merge_yaml(existing, value),
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
