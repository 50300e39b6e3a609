use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub vapid: VapidConfig,
    pub reminder: ReminderConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// VAPID key pair used to sign web-push requests. Both keys must be present
/// for the reminder dispatcher to attempt delivery; the public key is also
/// served to subscribing clients via `GET /push/public-key`.
#[derive(Debug, Clone, Deserialize)]
pub struct VapidConfig {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub claims_sub: String,
}

impl VapidConfig {
    /// Returns the key pair when both keys are configured and non-empty.
    pub fn keys(&self) -> Option<(String, String)> {
        match (self.private_key.as_deref(), self.public_key.as_deref()) {
            (Some(private), Some(public)) if !private.is_empty() && !public.is_empty() => {
                Some((private.to_string(), public.to_string()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
    /// How often (seconds) the dispatcher polls for due reminders.
    pub poll_interval_seconds: u64,
    /// Maximum due events processed per cycle (oldest reminders first).
    pub batch_size: i64,
    /// Upper bound (seconds) for a single push transport call.
    pub send_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_whatsapp_from: Option<String>,
    /// Shared secret checked by the /cron/trigger-whatsapp route.
    pub cron_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
                expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
            },
            vapid: VapidConfig {
                private_key: non_empty(env::var("VAPID_PRIVATE_KEY").ok()),
                public_key: non_empty(env::var("VAPID_PUBLIC_KEY").ok()),
                claims_sub: env::var("VAPID_CLAIMS_SUB")
                    .unwrap_or_else(|_| "mailto:admin@example.com".to_string())
                    .trim()
                    .to_string(),
            },
            reminder: ReminderConfig {
                poll_interval_seconds: env::var("REMINDER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                batch_size: env::var("REMINDER_BATCH_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                send_timeout_seconds: env::var("REMINDER_SEND_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            whatsapp: WhatsAppConfig {
                twilio_account_sid: non_empty(env::var("TWILIO_ACCOUNT_SID").ok()),
                twilio_auth_token: non_empty(env::var("TWILIO_AUTH_TOKEN").ok()),
                twilio_whatsapp_from: non_empty(env::var("TWILIO_WHATSAPP_FROM").ok()),
                cron_secret: non_empty(env::var("CRON_SECRET").ok()),
            },
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
                expiration_hours: 24,
            },
            vapid: VapidConfig {
                private_key: None,
                public_key: None,
                claims_sub: "mailto:admin@example.com".to_string(),
            },
            reminder: ReminderConfig {
                poll_interval_seconds: 30,
                batch_size: 100,
                send_timeout_seconds: 10,
            },
            whatsapp: WhatsAppConfig {
                twilio_account_sid: None,
                twilio_auth_token: None,
                twilio_whatsapp_from: None,
                cron_secret: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vapid_keys_require_both_parts() {
        let mut vapid = VapidConfig {
            private_key: Some("priv".to_string()),
            public_key: None,
            claims_sub: "mailto:admin@example.com".to_string(),
        };
        assert!(vapid.keys().is_none());

        vapid.public_key = Some(String::new());
        assert!(vapid.keys().is_none());

        vapid.public_key = Some("pub".to_string());
        assert_eq!(vapid.keys(), Some(("priv".to_string(), "pub".to_string())));
    }
}
