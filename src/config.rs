// Loader configuration
//
// Options are plain serde structs so hosts can load them from JSON/TOML. The
// tagged `LoaderConfig` enum selects which schedule a loader runs; see
// `loader::create_loader`.

use crate::types::{LoaderError, LoaderResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_LOG_PROFILE: &str = "default";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Seconds of data kept around the playhead
pub const DEFAULT_BUFFER_LENGTH: f64 = 30.0;

/// Query keys produced by the loader itself; passthrough params cannot override them
const RESERVED_QUERY_KEYS: [&str; 4] = ["log", "profile", "duration", "timestamp"];

fn default_log_profile() -> String {
    DEFAULT_LOG_PROFILE.to_string()
}

fn default_buffer_length() -> f64 {
    DEFAULT_BUFFER_LENGTH
}

/// Connection retry policy for one transport session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total connection attempts before giving up
    pub attempts: u32,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub factor: f64,
    /// Multiply each delay by a random factor in [1, 2)
    pub randomize: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            min_timeout_ms: 500,
            max_timeout_ms: 10_000,
            factor: 2.0,
            randomize: true,
        }
    }
}

impl RetrySettings {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.randomize {
            rand::rng().random_range(1.0..2.0)
        } else {
            1.0
        };
        let millis = self.min_timeout_ms as f64 * self.factor.powi(retry as i32) * jitter;
        let capped = millis.min(self.max_timeout_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> LoaderResult<()> {
        if self.attempts == 0 {
            return Err(LoaderError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if !(self.factor >= 1.0) {
            return Err(LoaderError::Configuration(format!(
                "retry factor must be >= 1, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}

/// Where and how to reach the log server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_url: String,

    /// Log duration used when the options do not carry one
    #[serde(default)]
    pub default_log_length: Option<f64>,

    /// Extra key/value pairs appended to the connection query string
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,

    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// Overrides the whole retry policy (takes precedence over `retry_attempts`)
    #[serde(default)]
    pub retry: Option<RetrySettings>,
}

impl ServerConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            default_log_length: None,
            query_params: BTreeMap::new(),
            retry_attempts: None,
            retry: None,
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        match (&self.retry, self.retry_attempts) {
            (Some(retry), _) => retry.clone(),
            (None, Some(attempts)) => RetrySettings::with_attempts(attempts),
            (None, None) => RetrySettings::default(),
        }
    }
}

/// Options for a seekable, windowed log stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub server: ServerConfig,

    #[serde(default)]
    pub log_guid: Option<String>,

    #[serde(default = "default_log_profile")]
    pub log_profile: String,

    /// Length of the log view to open (seconds)
    #[serde(default)]
    pub duration: Option<f64>,

    /// Initial playhead
    #[serde(default)]
    pub timestamp: Option<f64>,

    #[serde(default = "default_buffer_length")]
    pub buffer_length: f64,
}

impl StreamOptions {
    pub fn new(server: ServerConfig, log_guid: impl Into<String>) -> Self {
        Self {
            server,
            log_guid: Some(log_guid.into()),
            log_profile: default_log_profile(),
            duration: None,
            timestamp: None,
            buffer_length: DEFAULT_BUFFER_LENGTH,
        }
    }
}

/// Options for following a live log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveOptions {
    pub server: ServerConfig,

    #[serde(default = "default_log_profile")]
    pub log_profile: String,

    #[serde(default = "default_buffer_length")]
    pub buffer_length: f64,
}

impl LiveOptions {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            log_profile: default_log_profile(),
            buffer_length: DEFAULT_BUFFER_LENGTH,
        }
    }
}

/// Options for pulling fixed-duration chunks over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOptions {
    /// Base URL of the chunk endpoint
    pub url: String,

    /// Chunk length (seconds)
    #[serde(default)]
    pub duration: Option<f64>,

    /// Anchor of the first chunk
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Loader configuration, tagged by schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoaderConfig {
    Stream(StreamOptions),
    Live(LiveOptions),
    File(FileOptions),
}

/// Validated connection parameters, computed once at construction
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub url: String,
    pub log_guid: Option<String>,
    pub log_profile: String,
    pub duration: Option<f64>,
    pub timestamp: Option<f64>,
    pub buffer_length: f64,
    pub retry: RetrySettings,
}

impl RequestParams {
    pub fn for_stream(options: &StreamOptions) -> LoaderResult<Self> {
        let log_guid = options
            .log_guid
            .as_deref()
            .map(str::trim)
            .filter(|guid| !guid.is_empty())
            .ok_or_else(|| LoaderError::Configuration("log_guid is required".to_string()))?
            .to_string();

        let duration = options
            .duration
            .or(options.server.default_log_length)
            .filter(|d| *d > 0.0)
            .ok_or_else(|| {
                LoaderError::Configuration(
                    "duration (or server default_log_length) is required".to_string(),
                )
            })?;

        require_buffer_length(options.buffer_length)?;

        let retry = options.server.retry_settings();
        retry.validate()?;

        let mut pairs = vec![
            ("log".to_string(), log_guid.clone()),
            ("profile".to_string(), options.log_profile.clone()),
            ("duration".to_string(), duration.to_string()),
        ];
        if let Some(timestamp) = options.timestamp {
            pairs.push(("timestamp".to_string(), timestamp.to_string()));
        }

        Ok(Self {
            url: build_url(&options.server, pairs),
            log_guid: Some(log_guid),
            log_profile: options.log_profile.clone(),
            duration: Some(duration),
            timestamp: options.timestamp,
            buffer_length: options.buffer_length,
            retry,
        })
    }

    pub fn for_live(options: &LiveOptions) -> LoaderResult<Self> {
        require_buffer_length(options.buffer_length)?;

        let retry = options.server.retry_settings();
        retry.validate()?;

        let pairs = vec![("profile".to_string(), options.log_profile.clone())];

        Ok(Self {
            url: build_url(&options.server, pairs),
            log_guid: None,
            log_profile: options.log_profile.clone(),
            duration: None,
            timestamp: None,
            buffer_length: options.buffer_length,
            retry,
        })
    }
}

fn require_buffer_length(buffer_length: f64) -> LoaderResult<()> {
    if buffer_length > 0.0 && buffer_length.is_finite() {
        Ok(())
    } else {
        Err(LoaderError::Configuration(format!(
            "buffer_length must be a positive number, got {}",
            buffer_length
        )))
    }
}

fn build_url(server: &ServerConfig, mut pairs: Vec<(String, String)>) -> String {
    pairs.extend(
        server
            .query_params
            .iter()
            .filter(|(key, _)| !RESERVED_QUERY_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    format!("{}?{}", server.server_url, build_query_string(&pairs))
}

/// URL-encode and `&`-join key/value pairs
pub fn build_query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        let mut server = ServerConfig::new("ws://localhost:8081");
        server
            .query_params
            .insert("session".to_string(), "a b&c".to_string());
        server
            .query_params
            .insert("log".to_string(), "ignored".to_string());
        server
    }

    #[test]
    fn test_stream_query_string() {
        let mut options = StreamOptions::new(server(), "drive-01");
        options.duration = Some(20.0);
        options.timestamp = Some(1.5);

        let params = RequestParams::for_stream(&options).unwrap();
        assert_eq!(
            params.url,
            "ws://localhost:8081?log=drive-01&profile=default&duration=20&timestamp=1.5&session=a%20b%26c"
        );
        assert_eq!(params.retry.attempts, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_duration_falls_back_to_server_default() {
        let mut server = server();
        server.default_log_length = Some(45.0);
        let params = RequestParams::for_stream(&StreamOptions::new(server, "log")).unwrap();
        assert_eq!(params.duration, Some(45.0));
    }

    #[test]
    fn test_missing_required_options_fail() {
        let mut options = StreamOptions::new(server(), "drive-01");
        options.duration = None;
        assert!(matches!(
            RequestParams::for_stream(&options),
            Err(LoaderError::Configuration(_))
        ));

        options.duration = Some(10.0);
        options.log_guid = Some("  ".to_string());
        assert!(matches!(
            RequestParams::for_stream(&options),
            Err(LoaderError::Configuration(_))
        ));

        let mut live = LiveOptions::new(server());
        live.buffer_length = 0.0;
        assert!(matches!(
            RequestParams::for_live(&live),
            Err(LoaderError::Configuration(_))
        ));

        let mut live = LiveOptions::new(server());
        live.server.retry_attempts = Some(0);
        assert!(RequestParams::for_live(&live).is_err());
    }

    #[test]
    fn test_live_query_string_has_no_log() {
        let params = RequestParams::for_live(&LiveOptions::new(server())).unwrap();
        assert_eq!(params.url, "ws://localhost:8081?profile=default&session=a%20b%26c");
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let retry = RetrySettings {
            randomize: false,
            ..RetrySettings::default()
        };
        assert_eq!(retry.delay(0), Duration::from_millis(500));
        assert_eq!(retry.delay(1), Duration::from_millis(1000));
        assert_eq!(retry.delay(10), Duration::from_millis(10_000));

        let jittered = RetrySettings::default();
        for _ in 0..20 {
            let delay = jittered.delay(0);
            assert!(delay >= Duration::from_millis(500) && delay < Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_loader_config_is_tagged() {
        let config: LoaderConfig = serde_json::from_str(
            r#"{"type": "stream", "server": {"server_url": "ws://h"}, "log_guid": "x", "duration": 5}"#,
        )
        .unwrap();
        match config {
            LoaderConfig::Stream(options) => {
                assert_eq!(options.log_profile, DEFAULT_LOG_PROFILE);
                assert_eq!(options.buffer_length, DEFAULT_BUFFER_LENGTH);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }
}
