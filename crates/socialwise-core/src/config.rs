//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level SocialWise configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Speech service config ---

/// Credentials and protocol settings for the remote speech service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret_env: Option<String>,

    #[serde(default)]
    pub asr: AsrConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

const DEFAULT_APP_ID_ENV: &str = "IFLYTEK_APP_ID";
const DEFAULT_API_KEY_ENV: &str = "IFLYTEK_API_KEY";
const DEFAULT_API_SECRET_ENV: &str = "IFLYTEK_API_SECRET";

impl SpeechConfig {
    /// Resolve the app id: `app_id`, then `app_id_env`, then `IFLYTEK_APP_ID`.
    pub fn resolve_app_id(&self) -> Option<String> {
        resolve_secret_field(&self.app_id, &self.app_id_env)
            .or_else(|| env_non_empty(DEFAULT_APP_ID_ENV))
    }

    /// Resolve the API key: `api_key`, then `api_key_env`, then `IFLYTEK_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
            .or_else(|| env_non_empty(DEFAULT_API_KEY_ENV))
    }

    /// Resolve the API secret: `api_secret`, then `api_secret_env`, then `IFLYTEK_API_SECRET`.
    pub fn resolve_api_secret(&self) -> Option<String> {
        resolve_secret_field(&self.api_secret, &self.api_secret_env)
            .or_else(|| env_non_empty(DEFAULT_API_SECRET_ENV))
    }
}

/// Speech recognition (ASR) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// WebSocket endpoint (default: "wss://iat-api.xfyun.cn/v2/iat").
    #[serde(default = "default_asr_url")]
    pub url: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_accent")]
    pub accent: String,

    /// Trailing silence (ms) after which the service ends recognition.
    #[serde(default = "default_vad_eos_ms")]
    pub vad_eos_ms: u32,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Maximum audio bytes per frame (default: 1280, 40ms at 16kHz).
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,

    /// Delay between audio frames in ms (default: 40). 0 disables pacing.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_asr_url() -> String {
    "wss://iat-api.xfyun.cn/v2/iat".into()
}

fn default_language() -> String {
    "zh_cn".into()
}

fn default_domain() -> String {
    "iat".into()
}

fn default_accent() -> String {
    "mandarin".into()
}

fn default_vad_eos_ms() -> u32 {
    10_000
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_frame_bytes() -> usize {
    1280
}

fn default_frame_interval_ms() -> u64 {
    40
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            url: default_asr_url(),
            language: default_language(),
            domain: default_domain(),
            accent: default_accent(),
            vad_eos_ms: default_vad_eos_ms(),
            sample_rate: default_sample_rate(),
            frame_bytes: default_frame_bytes(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Speech synthesis (TTS) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// WebSocket endpoint (default: "wss://tts-api.xfyun.cn/v2/tts").
    #[serde(default = "default_tts_url")]
    pub url: String,

    /// Default voice name (default: "xiaoyan").
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Speaking rate, 0-100 (default: 50).
    #[serde(default = "default_level")]
    pub speed: u8,

    /// Volume, 0-100 (default: 50).
    #[serde(default = "default_level")]
    pub volume: u8,

    /// Pitch, 0-100 (default: 50).
    #[serde(default = "default_level")]
    pub pitch: u8,

    /// Mix in background sound.
    #[serde(default)]
    pub background_sound: bool,

    #[serde(default = "default_text_encoding")]
    pub text_encoding: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_tts_url() -> String {
    "wss://tts-api.xfyun.cn/v2/tts".into()
}

fn default_voice() -> String {
    "xiaoyan".into()
}

fn default_level() -> u8 {
    50
}

fn default_text_encoding() -> String {
    "UTF8".into()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            voice: default_voice(),
            speed: default_level(),
            volume: default_level(),
            pitch: default_level(),
            background_sound: false,
            text_encoding: default_text_encoding(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Per-session time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket handshake timeout in ms (default: 10000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle receive tick in ms (default: 1000). Not fatal on its own.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Wall-clock budget for a whole session in ms (default: 30000).
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    1_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

/// Input limits applied before a session is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum audio duration accepted for recognition (default: 60s).
    #[serde(default = "default_max_audio_seconds")]
    pub max_audio_seconds: u32,

    /// Maximum characters accepted for synthesis (default: 1000).
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

fn default_max_audio_seconds() -> u32 {
    60
}

fn default_max_text_chars() -> usize {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_audio_seconds: default_max_audio_seconds(),
            max_text_chars: default_max_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "socialwise_speech=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        return env_non_empty(env);
    }
    None
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static ENV_REF: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex")
    });
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::SocialWiseError::Io)?;

        // Substitute ${ENV_VAR} references before parsing
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::SocialWiseError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path: `~/.socialwise/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Speech settings, falling back to defaults when the section is absent.
    pub fn speech_or_default(&self) -> SpeechConfig {
        self.speech.clone().unwrap_or_default()
    }

    /// Logging settings, falling back to defaults when the section is absent.
    pub fn logging_or_default(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Get a config value by dotted path (e.g. "speech.asr.language").
    ///
    /// Missing sections are filled with their defaults before lookup.
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let effective = Config {
            speech: Some(self.speech_or_default()),
            logging: Some(self.logging_or_default()),
        };
        let json = serde_json::to_value(&effective).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let speech = self.speech_or_default();

        if speech.resolve_app_id().is_none() {
            warnings.push("Speech app_id is not configured".to_string());
        }
        if speech.resolve_api_key().is_none() {
            warnings.push("Speech api_key is not configured".to_string());
        }
        if speech.resolve_api_secret().is_none() {
            warnings.push("Speech api_secret is not configured".to_string());
        }

        for (label, raw) in [("speech.asr.url", &speech.asr.url), ("speech.tts.url", &speech.tts.url)] {
            match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {}
                Ok(parsed) => errors.push(format!(
                    "{label} must use ws:// or wss://, got {}://",
                    parsed.scheme()
                )),
                Err(e) => errors.push(format!("{label} is not a valid URL: {e}")),
            }
        }

        if speech.asr.frame_bytes == 0 {
            errors.push("speech.asr.frame_bytes cannot be 0".to_string());
        }
        if speech.asr.sample_rate == 0 || speech.tts.sample_rate == 0 {
            errors.push("Sample rate cannot be 0".to_string());
        }
        if speech.session.session_timeout_ms == 0 {
            errors.push("speech.session.session_timeout_ms cannot be 0".to_string());
        }
        if speech.session.idle_timeout_ms > speech.session.session_timeout_ms {
            errors.push(format!(
                "speech.session.idle_timeout_ms ({}) exceeds session_timeout_ms ({})",
                speech.session.idle_timeout_ms, speech.session.session_timeout_ms
            ));
        }

        (warnings, errors)
    }
}

/// Base directory for SocialWise data: `~/.socialwise/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".socialwise")
}
