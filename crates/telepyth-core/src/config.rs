use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, poller::Backoff, poller::PollerConfig, Result};

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub database_path: PathBuf,
    pub listen_addr: SocketAddr,

    // Long polling
    pub polling: bool,
    pub poll_timeout: Duration,
    pub poll_limit: u8,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,

    // Notify gateway
    pub max_upload_bytes: usize,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bot_token = get("TELEPYTH_BOT_TOKEN")
            .or_else(|| get("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("TELEPYTH_BOT_TOKEN environment variable is required".to_string())
            })?;

        let database_path =
            PathBuf::from(get("TELEPYTH_DATABASE").unwrap_or_else(|| "telepyth.db".to_string()));

        let listen = get("TELEPYTH_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let listen_addr = listen
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("TELEPYTH_LISTEN {listen:?}: {e}")))?;

        let polling = parse_bool(get("TELEPYTH_POLLING")).unwrap_or(true);
        let poll_timeout = Duration::from_secs(parse_num("TELEPYTH_POLL_TIMEOUT", &get)?.unwrap_or(30));
        let poll_limit = parse_num::<u8>("TELEPYTH_POLL_LIMIT", &get)?
            .unwrap_or(100)
            .clamp(1, 100);

        let backoff_initial =
            Duration::from_millis(parse_num("TELEPYTH_BACKOFF_INITIAL_MS", &get)?.unwrap_or(1_000));
        let backoff_max =
            Duration::from_millis(parse_num("TELEPYTH_BACKOFF_MAX_MS", &get)?.unwrap_or(60_000));
        if backoff_initial.is_zero() || backoff_max < backoff_initial {
            return Err(Error::Config(
                "TELEPYTH_BACKOFF_INITIAL_MS must be > 0 and <= TELEPYTH_BACKOFF_MAX_MS".to_string(),
            ));
        }

        let max_upload_bytes =
            parse_num("TELEPYTH_MAX_UPLOAD_BYTES", &get)?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let audit_log_path = get("TELEPYTH_AUDIT_LOG_PATH").map(PathBuf::from);
        let audit_log_json = parse_bool(get("TELEPYTH_AUDIT_LOG_JSON")).unwrap_or(false);

        Ok(Self {
            bot_token,
            database_path,
            listen_addr,
            polling,
            poll_timeout,
            poll_limit,
            backoff_initial,
            backoff_max,
            max_upload_bytes,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            limit: self.poll_limit,
            timeout: self.poll_timeout,
            backoff: Backoff::new(self.backoff_initial, self.backoff_max),
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_num<T: std::str::FromStr>(
    key: &str,
    get: &impl Fn(&str) -> Option<String>,
) -> Result<Option<T>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
