use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tutor_core::mail::EmailProvider;

pub const DEFAULT_GEMINI_MODEL: &str = "models/gemini-live-2.5-flash-preview";
pub const DEFAULT_GEMINI_VOICE: &str = "Aoede";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How an active session decides that it is over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationStrategy {
    /// Watch the room's participant count and honour the host shutdown callback.
    Poll,
    /// Honour only the host shutdown callback (and engine completion).
    Callback,
}

/// Outbound mail settings shared by the `send_email` tool and the session report.
#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub admin_email: Option<String>,
    pub demo_mode: bool,
    pub demo_dir: PathBuf,
}

impl EmailConfig {
    /// SMTP is usable only when both halves of the provider's credentials are present.
    pub fn smtp_credentials(&self) -> Option<(&str, &SecretString)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password)),
            _ => None,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub prompts_path: PathBuf,

    pub google_api_key: SecretString,
    pub gemini_model: String,
    pub gemini_voice: String,
    pub gemini_temperature: f32,

    pub lesson_content_url: Option<String>,
    pub weather_webhook_url: Option<String>,
    pub trade_webhook_url: Option<String>,
    pub calendar_webhook_url: Option<String>,
    pub tavily_api_key: Option<SecretString>,
    pub vocabulary_api_url: Option<String>,

    pub email: EmailConfig,

    pub termination: TerminationStrategy,
    pub poll_interval: Duration,
    pub video_enabled: bool,
}

/// Reads a variable, treating unset and blank values alike.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(name) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a boolean", value),
            )),
        },
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            optional_var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = optional_var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = optional_var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./prompts"));

        let google_api_key = optional_var("GOOGLE_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GOOGLE_API_KEY".to_string()))?;
        let gemini_model =
            optional_var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
        let gemini_voice =
            optional_var("GEMINI_VOICE").unwrap_or_else(|| DEFAULT_GEMINI_VOICE.to_string());
        let gemini_temperature = match optional_var("GEMINI_TEMPERATURE") {
            None => 0.7,
            Some(raw) => raw
                .parse::<f32>()
                .ok()
                .filter(|t| (0.0..=2.0).contains(t))
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "GEMINI_TEMPERATURE".to_string(),
                        format!("'{}' is not a temperature between 0 and 2", raw),
                    )
                })?,
        };

        let lesson_content_url = optional_var("LESSON_CONTENT_URL")
            .or_else(|| optional_var("N8N_NEWS_WEBHOOK_URL"))
            .or_else(|| optional_var("N8N_WEBHOOK_URL"));

        let provider_str = optional_var("EMAIL_PROVIDER").unwrap_or_else(|| "gmail".to_string());
        let provider = EmailProvider::from_name(&provider_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "EMAIL_PROVIDER".to_string(),
                format!(
                    "'{}' is not one of gmail, outlook, yandex, mail",
                    provider_str
                ),
            )
        })?;
        let (user_var, password_var) = provider.credential_vars();
        let email = EmailConfig {
            provider,
            user: optional_var(user_var),
            password: optional_var(password_var).map(SecretString::from),
            admin_email: optional_var("ADMIN_EMAIL"),
            demo_mode: bool_var("EMAIL_DEMO_MODE", false)?,
            demo_dir: optional_var("EMAIL_DEMO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let termination = match optional_var("SESSION_TERMINATION")
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("poll") => TerminationStrategy::Poll,
            Some("callback") => TerminationStrategy::Callback,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "SESSION_TERMINATION".to_string(),
                    format!("'{}' is not one of poll, callback", other),
                ));
            }
        };

        let poll_interval = match optional_var("PARTICIPANT_POLL_INTERVAL_MS") {
            None => Duration::from_millis(1000),
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "PARTICIPANT_POLL_INTERVAL_MS".to_string(),
                        format!("'{}' is not a positive number of milliseconds", raw),
                    )
                })?,
        };

        Ok(Self {
            bind_address,
            log_level,
            prompts_path,
            google_api_key,
            gemini_model,
            gemini_voice,
            gemini_temperature,
            lesson_content_url,
            weather_webhook_url: optional_var("WEATHER_WEBHOOK_URL"),
            trade_webhook_url: optional_var("TRADE_WEBHOOK_URL"),
            calendar_webhook_url: optional_var("CALENDAR_WEBHOOK_URL"),
            tavily_api_key: optional_var("TAVILY_API_KEY").map(SecretString::from),
            vocabulary_api_url: optional_var("VOCABULARY_API_URL"),
            email,
            termination,
            poll_interval,
            video_enabled: bool_var("VIDEO_ENABLED", true)?,
        })
    }
}
