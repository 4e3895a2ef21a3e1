use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use bilireply_core::types::cookie::CookieJar;
use bilireply_infra::llm::DEFAULT_PROMPT_TEMPLATE;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cookie: Option<String>,
    pub refresh_token: Option<String>,
    pub uid: u64,
    pub check_interval: Duration,
    pub refresh_enabled: bool,
    pub refresh_interval: Duration,
    pub reply_enabled: bool,
    pub reply_prefix: String,
    pub reply_max_process: usize,
    pub reply_delay: Duration,
    pub like_enabled: bool,
    pub min_request_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub response_cache_ttl: Duration,
    pub request_timeout: Duration,
    pub video_cache_expire: Duration,
    pub video_cache_file: PathBuf,
    pub credential_file: PathBuf,
    pub history_file: PathBuf,
    pub comment_page_size: u32,
    pub comment_max_pages: u32,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub prompt_template: String,
    pub monitor_window: Duration,
    pub monitor_report_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required value: {0}")]
    Missing(&'static str),
    #[error("invalid integer for {0}: {1}")]
    InvalidNumber(&'static str, String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    #[error("{0} has no bili_jct entry; the csrf token is required to reply")]
    MissingCsrf(&'static str),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let cookie = env.optional_string("BILIREPLY_COOKIE");
        if let Some(raw) = cookie.as_deref() {
            if CookieJar::parse(raw).csrf_token().is_none() {
                return Err(ConfigError::MissingCsrf("BILIREPLY_COOKIE"));
            }
        }
        let uid = env.required_u64("BILIREPLY_UID")?;
        let llm_api_key = env
            .optional_string("BILIREPLY_LLM_API_KEY")
            .ok_or(ConfigError::Missing("BILIREPLY_LLM_API_KEY"))?;
        let llm_base_url = env.string("BILIREPLY_LLM_BASE_URL", "https://api.deepseek.com");
        if llm_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue("BILIREPLY_LLM_BASE_URL", llm_base_url));
        }
        let comment_page_size = env.u32("BILIREPLY_COMMENT_PAGE_SIZE", 20)?;
        if comment_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BILIREPLY_COMMENT_PAGE_SIZE",
                comment_page_size.to_string(),
            ));
        }
        let temperature_raw = env.string("BILIREPLY_LLM_TEMPERATURE", "0.7");
        let llm_temperature = temperature_raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue("BILIREPLY_LLM_TEMPERATURE", temperature_raw.clone()))?;

        Ok(Self {
            cookie,
            refresh_token: env.optional_string("BILIREPLY_REFRESH_TOKEN"),
            uid,
            check_interval: env.secs("BILIREPLY_CHECK_INTERVAL_SECS", 300)?,
            refresh_enabled: env.bool("BILIREPLY_REFRESH_ENABLED", true)?,
            refresh_interval: env.secs("BILIREPLY_REFRESH_INTERVAL_SECS", 1800)?,
            reply_enabled: env.bool("BILIREPLY_REPLY_ENABLED", true)?,
            reply_prefix: env.raw_string("BILIREPLY_REPLY_PREFIX", ""),
            reply_max_process: env.u64("BILIREPLY_REPLY_MAX_PROCESS", 10)? as usize,
            reply_delay: env.secs("BILIREPLY_REPLY_DELAY_SECS", 5)?,
            like_enabled: env.bool("BILIREPLY_LIKE_ENABLED", false)?,
            min_request_interval: Duration::from_millis(
                env.u64("BILIREPLY_MIN_REQUEST_INTERVAL_MS", 2000)?,
            ),
            max_retries: env.u32("BILIREPLY_MAX_RETRIES", 3)?,
            retry_delay: env.secs("BILIREPLY_RETRY_DELAY_SECS", 5)?,
            response_cache_ttl: env.secs("BILIREPLY_RESPONSE_CACHE_TTL_SECS", 300)?,
            request_timeout: env.secs("BILIREPLY_REQUEST_TIMEOUT_SECS", 15)?,
            video_cache_expire: env.secs("BILIREPLY_VIDEO_CACHE_EXPIRE_SECS", 43_200)?,
            video_cache_file: PathBuf::from(
                env.string("BILIREPLY_VIDEO_CACHE_FILE", "video_cache.json"),
            ),
            credential_file: PathBuf::from(
                env.string("BILIREPLY_CREDENTIAL_FILE", "credentials.json"),
            ),
            history_file: PathBuf::from(env.string("BILIREPLY_HISTORY_FILE", "history.json")),
            comment_page_size,
            comment_max_pages: env.u32("BILIREPLY_COMMENT_MAX_PAGES", 3)?.max(1),
            llm_base_url,
            llm_api_key,
            llm_model: env.string("BILIREPLY_LLM_MODEL", "deepseek-chat"),
            llm_max_tokens: env.u32("BILIREPLY_LLM_MAX_TOKENS", 150)?,
            llm_temperature,
            prompt_template: env.string("BILIREPLY_PROMPT_TEMPLATE", DEFAULT_PROMPT_TEMPLATE),
            monitor_window: env.secs("BILIREPLY_MONITOR_WINDOW_SECS", 300)?,
            monitor_report_file: env
                .optional_string("BILIREPLY_MONITOR_REPORT_FILE")
                .map(PathBuf::from),
        })
    }
}

/// Loads `.env` from the working directory; variables already set win.
pub fn load_dotenv() -> Result<(), dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err),
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw_string(&self, key: &'static str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn string(&self, key: &'static str, default: &str) -> String {
        self.optional_string(key)
            .unwrap_or_else(|| default.to_string())
    }

    fn optional_string(&self, key: &'static str) -> Option<String> {
        let value = (self.lookup)(key).unwrap_or_default();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn u64(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.optional_string(key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber(key, raw)),
            None => Ok(default),
        }
    }

    fn u32(&self, key: &'static str, default: u32) -> Result<u32, ConfigError> {
        match self.optional_string(key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber(key, raw)),
            None => Ok(default),
        }
    }

    fn required_u64(&self, key: &'static str) -> Result<u64, ConfigError> {
        let raw = self.optional_string(key).ok_or(ConfigError::Missing(key))?;
        raw.parse().map_err(|_| ConfigError::InvalidNumber(key, raw))
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.u64(key, default).map(Duration::from_secs)
    }

    fn bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.optional_string(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key, raw)),
        }
    }
}
