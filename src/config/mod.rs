use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .mathsenserc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    if let Some((k, v)) = parse_line(&line) {
                        map.insert(k, v);
                    }
                }
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults overlaid with the given pairs; no file or environment lookup.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self { inner: map, config_path: default_config_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Credential for the generation service, ignoring blank values.
    pub fn api_key(&self) -> Option<String> {
        ["MATHSENSE_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("REQUEST_TIMEOUT").unwrap_or(60))
    }

    /// Sandbox wall clock. Accepts fractional seconds, capped at an hour;
    /// non-positive values fall back to the default.
    pub fn execution_timeout(&self) -> Duration {
        self.get("EXECUTION_TIMEOUT")
            .and_then(|v| parse_timeout_secs(&v))
            .unwrap_or(Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS))
    }

    pub fn python_bin(&self) -> String {
        self.get("PYTHON_BIN").unwrap_or_else(|| "python3".into())
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.get("OUTPUT_DIR").unwrap_or_else(|| ".".into()))
    }
}

pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 5;
pub const MAX_EXECUTION_TIMEOUT_SECS: u64 = 3600;

pub fn parse_timeout_secs(raw: &str) -> Option<Duration> {
    timeout_from_secs(raw.trim().parse::<f64>().ok()?)
}

/// Positive, finite seconds, clamped to [`MAX_EXECUTION_TIMEOUT_SECS`].
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(secs.min(MAX_EXECUTION_TIMEOUT_SECS as f64))
        .ok()
        .filter(|d| !d.is_zero())
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    Some((k.trim().to_string(), v.trim().to_string()))
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or MATHSENSE_*/OPENAI_* for forward-compat
    const KEYS: &[&str] = &[
        "API_BASE_URL",
        "DEFAULT_MODEL",
        "REQUEST_TIMEOUT",
        "MAX_TOKENS",
        "EXECUTION_TIMEOUT",
        "SANDBOX_STARTUP_TIMEOUT",
        "FIGURE_DPI",
        "PYTHON_BIN",
        "OUTPUT_DIR",
    ];

    KEYS.contains(&k) || k.starts_with("MATHSENSE_") || k.starts_with("OPENAI_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("mathsense").join(".mathsenserc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Numbers
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("MAX_TOKENS".into(), "1024".into());
    m.insert(
        "EXECUTION_TIMEOUT".into(),
        DEFAULT_EXECUTION_TIMEOUT_SECS.to_string(),
    );

    // Strings
    m.insert("DEFAULT_MODEL".into(), "gpt-4o-mini".into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("PYTHON_BIN".into(), "python3".into());
    m.insert("OUTPUT_DIR".into(), ".".into());

    m
}
