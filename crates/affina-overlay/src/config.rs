use clap::Parser;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "https://emo-insight-backend.onrender.com";
const STREAM_PATH: &str = "/socket.io/";

#[derive(Parser, Debug)]
#[command(name = "affina-overlay", about = "Live-session engine for the Affina overlay")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub backend_url: String,
    #[arg(long, default_value = "")]
    pub state_dir: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = 10)]
    pub reconnect_attempts: u32,
    #[arg(long, default_value_t = 1000)]
    pub reconnect_delay_ms: u64,
    #[arg(long, default_value_t = 20_000)]
    pub connect_timeout_ms: u64,
    #[arg(long, default_value_t = 15)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend url {url:?}: {reason}")]
    InvalidBackendUrl { url: String, reason: String },
}

/// Retry limits for the stream transport. The delay between attempts is fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub backend_url: Url,
    pub stream_url: Url,
    pub state_dir: PathBuf,
    pub log_dir: String,
    pub log_stderr: bool,
    pub reconnect: ReconnectPolicy,
    pub request_timeout: Duration,
}

pub fn load_config(args: Args) -> Result<RuntimeConfig, ConfigError> {
    let backend_url = resolve_backend_url(&args.backend_url)?;
    let stream_url = stream_url_for(&backend_url)?;
    Ok(RuntimeConfig {
        stream_url,
        backend_url,
        state_dir: resolve_state_dir(&args.state_dir),
        log_dir: resolve_log_dir(&args.log_dir),
        log_stderr: resolve_log_stderr(),
        reconnect: ReconnectPolicy {
            max_attempts: args.reconnect_attempts,
            delay: Duration::from_millis(args.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        },
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn resolve_backend_url(flag: &str) -> Result<Url, ConfigError> {
    let raw = if !flag.trim().is_empty() {
        flag.trim().to_string()
    } else {
        non_empty_env("AFFINA_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
    };
    Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidBackendUrl {
        url: raw.clone(),
        reason: err.to_string(),
    })
}

/// Derives the Socket.IO websocket endpoint from the HTTP base url.
pub fn stream_url_for(backend_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match backend_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ConfigError::InvalidBackendUrl {
                url: backend_url.to_string(),
                reason: format!("unsupported scheme {other}"),
            })
        }
    };
    let mut url = backend_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidBackendUrl {
            url: backend_url.to_string(),
            reason: "cannot switch to websocket scheme".to_string(),
        })?;
    url.set_path(STREAM_PATH);
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);
    Ok(url)
}

/// Joins an API path such as `/api/health` onto the backend base url.
pub fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url
}

fn resolve_state_dir(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Some(value) = non_empty_env("AFFINA_STATE_DIR") {
        return PathBuf::from(value);
    }
    dirs::config_dir()
        .map(|dir| dir.join("affina"))
        .unwrap_or_else(|| PathBuf::from(".affina"))
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    non_empty_env("AFFINA_LOG_DIR").unwrap_or_default()
}

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

fn resolve_log_stderr() -> bool {
    env::var("AFFINA_LOG_STDERR")
        .ok()
        .and_then(|value| parse_bool_env(&value))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_backend_maps_to_secure_socket() {
        let base = Url::parse(DEFAULT_BACKEND_URL).expect("url");
        let stream = stream_url_for(&base).expect("stream url");
        assert_eq!(
            stream.as_str(),
            "wss://emo-insight-backend.onrender.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn plain_http_keeps_port() {
        let base = Url::parse("http://127.0.0.1:5055").expect("url");
        let stream = stream_url_for(&base).expect("stream url");
        assert_eq!(
            stream.as_str(),
            "ws://127.0.0.1:5055/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        let base = Url::parse("ftp://example.com").expect("url");
        assert!(stream_url_for(&base).is_err());
    }

    #[test]
    fn endpoint_respects_base_path() {
        let base = Url::parse("https://example.com/affina/").expect("url");
        assert_eq!(
            endpoint(&base, "/api/health").as_str(),
            "https://example.com/affina/api/health"
        );
        let bare = Url::parse("http://localhost:8000").expect("url");
        assert_eq!(
            endpoint(&bare, "/api/start-session").as_str(),
            "http://localhost:8000/api/start-session"
        );
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "affina-overlay",
            "--backend-url",
            "http://localhost:9000",
            "--state-dir",
            "/tmp/affina-test",
            "--reconnect-attempts",
            "3",
            "--reconnect-delay-ms",
            "250",
        ]);
        let config = load_config(args).expect("config");
        assert_eq!(config.backend_url.as_str(), "http://localhost:9000/");
        assert_eq!(config.state_dir, PathBuf::from("/tmp/affina-test"));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.connect_timeout, Duration::from_millis(20_000));
    }

    #[test]
    fn invalid_backend_url_is_reported() {
        let args = Args::parse_from(["affina-overlay", "--backend-url", "not a url"]);
        assert!(matches!(
            load_config(args),
            Err(ConfigError::InvalidBackendUrl { .. })
        ));
    }
}
