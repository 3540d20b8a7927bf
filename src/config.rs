use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

/// Credentials attached to requests whose URI matches an `auth` pattern.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    Basic { username: String, password: String },
}

impl AuthCredentials {
    /// Render the `Authorization` header value for this credential.
    pub fn header_value(&self) -> String {
        use base64::Engine as _;
        match self {
            AuthCredentials::Basic { username, password } => {
                let raw = format!("{username}:{password}");
                format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
            }
        }
    }
}

/// On-disk representation of the config, deserialized with `toml`/`serde`
/// before being compiled into the runtime [`Config`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub ignore_uris: Vec<String>,
    pub exclude_documents: Vec<String>,
    pub allowed_redirects: Vec<(String, String)>,
    pub auth: Vec<RawAuthEntry>,
    pub request_headers: Vec<RawHeaderEntry>,
    pub retries: Option<usize>,
    pub timeout: Option<f64>,
    pub workers: Option<usize>,
    pub anchors: Option<bool>,
    pub anchors_ignore: Option<Vec<String>>,
    pub rate_limit_timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawAuthEntry {
    pub pattern: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RawHeaderEntry {
    pub prefix: String,
    pub headers: HashMap<String, String>,
}

/// Runtime configuration. Built once by [`Config::compile`] and treated
/// as read-only by every component downstream (workers, rate limiter,
/// classifier).
#[derive(Debug, Clone)]
pub struct Config {
    pub ignore_uris: Vec<Regex>,
    pub exclude_documents: Vec<Regex>,
    /// Ordered `(from, to)` pattern pairs; first match wins.
    pub allowed_redirects: Vec<(Regex, Regex)>,
    /// Ordered `(pattern, credentials)`; first match wins.
    pub auth: Vec<(Regex, AuthCredentials)>,
    /// Ordered `(url-prefix, headers)`; first matching prefix wins.
    pub request_headers: Vec<(String, HashMap<String, String>)>,
    pub retries: usize,
    pub timeout: Option<Duration>,
    pub workers: usize,
    pub anchors: bool,
    pub anchors_ignore: Vec<Regex>,
    pub rate_limit_timeout: f64,
}

pub const DEFAULT_RETRIES: usize = 1;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_RATE_LIMIT_TIMEOUT: f64 = 300.0;
pub const DEFAULT_ANCHORS_IGNORE: &str = "^!";

pub const DEFAULT_REQUEST_HEADERS_ACCEPT: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

impl Config {
    /// Compile a [`RawConfig`] (as parsed from TOML) into runtime form,
    /// applying the defaults documented in spec.md §3.
    pub fn compile(raw: RawConfig) -> Result<Self, regex::Error> {
        let ignore_uris = compile_all(&raw.ignore_uris)?;
        let exclude_documents = compile_all(&raw.exclude_documents)?;

        let mut allowed_redirects = Vec::with_capacity(raw.allowed_redirects.len());
        for (from, to) in raw.allowed_redirects {
            allowed_redirects.push((anchored(&from)?, anchored(&to)?));
        }

        let mut auth = Vec::with_capacity(raw.auth.len());
        for entry in raw.auth {
            auth.push((
                anchored(&entry.pattern)?,
                AuthCredentials::Basic { username: entry.username, password: entry.password },
            ));
        }

        let request_headers = raw
            .request_headers
            .into_iter()
            .map(|e| (e.prefix, e.headers))
            .collect();

        let anchors_ignore_patterns = raw
            .anchors_ignore
            .unwrap_or_else(|| vec![DEFAULT_ANCHORS_IGNORE.to_string()]);
        let anchors_ignore = compile_all(&anchors_ignore_patterns)?;

        Ok(Config {
            ignore_uris,
            exclude_documents,
            allowed_redirects,
            auth,
            request_headers,
            retries: raw.retries.unwrap_or(DEFAULT_RETRIES),
            timeout: raw.timeout.map(Duration::from_secs_f64),
            workers: raw.workers.unwrap_or(DEFAULT_WORKERS),
            anchors: raw.anchors.unwrap_or(true),
            anchors_ignore,
            rate_limit_timeout: raw.rate_limit_timeout.unwrap_or(DEFAULT_RATE_LIMIT_TIMEOUT),
        })
    }

    /// Load and compile config from a TOML file; returns teacher-style
    /// defaults wrapped in `Ok` if `path` doesn't exist.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => RawConfig::default(),
        };
        Ok(Config::compile(raw)?)
    }
}

/// Compile `p` anchored at the string start, matching Python's
/// `re.match` semantics the original builder relies on everywhere a
/// config pattern is tested (`pat.match(uri)`, not `pat.search(uri)`).
fn anchored(p: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{p})"))
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| anchored(p)).collect()
}
