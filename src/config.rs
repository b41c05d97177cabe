//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default webhook / status server port.
const DEFAULT_PORT: u16 = 8443;

/// Default timeout for rate lookups and transaction verification.
const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// How the Telegram transport receives updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramMode {
    /// Long-poll `getUpdates`.
    Polling,
    /// Telegram pushes updates to `{base_url}/{token}`.
    Webhook { base_url: String },
}

/// Telegram transport configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub allowed_users: Vec<String>,
    pub mode: TelegramMode,
}

/// Onboarding flow tuning.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Upper bound on a single rate lookup or verifier call.
    pub service_timeout: Duration,
    /// Unverified hashes accepted before the reply escalates to support.
    /// `None` means the user may retry indefinitely.
    pub max_verification_attempts: Option<u32>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            service_timeout: DEFAULT_VERIFY_TIMEOUT,
            max_verification_attempts: None,
        }
    }
}

/// Bot configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Absent when no bot token is configured; the CLI channel is used instead.
    pub telegram: Option<TelegramConfig>,
    pub listen_host: String,
    pub port: u16,
    pub flow: FlowConfig,
    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<String>,
}

impl BotConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".into(),
                message: format!("expected a port number, got {raw:?}"),
            })?,
            None => DEFAULT_PORT,
        };

        let service_timeout = match get("VERIFY_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "VERIFY_TIMEOUT_SECS".into(),
                    message: format!("expected whole seconds, got {raw:?}"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "VERIFY_TIMEOUT_SECS".into(),
                        message: "must be greater than zero".into(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_VERIFY_TIMEOUT,
        };

        let max_verification_attempts = match get("MAX_VERIFICATION_ATTEMPTS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MAX_VERIFICATION_ATTEMPTS".into(),
                        message: format!("expected a positive integer, got {raw:?}"),
                    });
                }
            },
            None => None,
        };

        let telegram = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .map(|token| {
                let allowed_users = get("TELEGRAM_ALLOWED_USERS")
                    .unwrap_or_else(|| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();

                let mode = match get("WEBHOOK_URL") {
                    Some(url) => TelegramMode::Webhook {
                        base_url: url.trim_end_matches('/').to_string(),
                    },
                    None => match get("HEROKU_APP_NAME") {
                        Some(app) => TelegramMode::Webhook {
                            base_url: format!("https://{app}.herokuapp.com"),
                        },
                        None => TelegramMode::Polling,
                    },
                };

                TelegramConfig {
                    bot_token: SecretString::from(token),
                    allowed_users,
                    mode,
                }
            });

        Ok(Self {
            telegram,
            listen_host: get("LISTEN_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            flow: FlowConfig {
                service_timeout,
                max_verification_attempts,
            },
            log_dir: get("LOG_DIR"),
        })
    }

    /// `host:port` the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.port)
    }
}
