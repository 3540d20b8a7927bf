//! HTTP attempts and post-response classification (spec.md §4.2). Pure
//! retrieval/classification logic lives here; queue ownership and the
//! worker thread's dequeue loop live in `checker.rs`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};

use crate::classify::{self, RetrievalMethod, Triage};
use crate::config::{AuthCredentials, Config, DEFAULT_REQUEST_HEADERS_ACCEPT};
use crate::rate_limiter::RateLimiter;
use crate::types::{CheckResult, Hyperlink, Status};

const MAX_REDIRECTS: usize = 10;

/// Outcome of one full check (including the internal retry loop), fed
/// back to the worker run-loop in `checker.rs`.
pub enum CheckOutcome {
    Done(CheckResult),
    /// The URI was re-enqueued by the rate limiter; no result should be
    /// emitted for this dequeue (spec.md §4.2 step 5).
    Requeue(f64),
}

/// Build a fresh `ureq::Agent` for one worker thread. Redirects are
/// disabled at the agent level (`redirects(0)`) because `check_uri`
/// follows them manually to capture the status code of each hop, the
/// way `requests.Response.history` does in the original implementation.
pub fn build_agent(timeout: Option<Duration>) -> ureq::Agent {
    let t = timeout.unwrap_or(Duration::from_secs(5));
    ureq::AgentBuilder::new()
        .timeout_connect(t)
        .timeout_read(t)
        .timeout_write(t)
        .redirects(0)
        .build()
}

/// Top-level per-hyperlink check: pre-network triage, then (for HTTP(S)
/// URIs) the network retry loop. Returns `Requeue` if a 429 response
/// caused the hyperlink to be re-enqueued rather than resolved.
pub fn check(
    agent: &ureq::Agent,
    config: &Config,
    rate_limiter: &RateLimiter,
    hyperlink: &Hyperlink,
    source_dir: &Path,
) -> CheckOutcome {
    match classify::triage(config, &hyperlink.uri, &hyperlink.docname, source_dir) {
        Triage::Final(status, message, code) => {
            CheckOutcome::Done(CheckResult::new(
                &hyperlink.uri,
                &hyperlink.docname,
                hyperlink.lineno,
                status,
                message,
                code,
            ))
        }
        Triage::NeedsNetwork => {
            let mut last = (Status::Broken, String::new(), 0u16);
            for _ in 0..config.retries.max(1) {
                match check_uri(agent, config, rate_limiter, &hyperlink.uri) {
                    Outcome::Requeue(t) => return CheckOutcome::Requeue(t),
                    Outcome::Result(status, message, code) => {
                        last = (status, message, code);
                        if last.0 != Status::Broken {
                            break;
                        }
                    }
                }
            }
            let (status, message, code) = last;
            CheckOutcome::Done(CheckResult::new(&hyperlink.uri, &hyperlink.docname, hyperlink.lineno, status, message, code))
        }
    }
}

enum Outcome {
    Result(Status, String, u16),
    Requeue(f64),
}

/// One full HTTP check attempt: split off the anchor, pick retrieval
/// methods, issue requests, and classify the response. Mirrors
/// `check_uri`/`allowed_redirect` in the original builder.
fn check_uri(agent: &ureq::Agent, config: &Config, rate_limiter: &RateLimiter, uri: &str) -> Outcome {
    let (req_url_raw, anchor_raw) = match uri.split_once('#') {
        Some((u, a)) => (u, a),
        None => (uri, ""),
    };
    let anchor = if !anchor_raw.is_empty() && config.anchors_ignore.iter().any(|r| r.is_match(anchor_raw)) {
        ""
    } else {
        anchor_raw
    };

    let req_url = if req_url_raw.is_ascii() {
        req_url_raw.to_string()
    } else {
        encode_non_ascii(req_url_raw)
    };

    let auth = config.auth.iter().find(|(pat, _)| pat.is_match(uri)).map(|(_, creds)| creds);
    let headers = request_headers(config, &req_url);

    let mut error_message: Option<String> = None;

    for method in classify::retrieval_methods(config.anchors, anchor) {
        match execute(agent, method, &req_url, &headers, auth, config.timeout, anchor) {
            Ok((response_status, response_url, redirect_code, retry_after, anchor_ok)) => {
                if response_status < 400 {
                    if !anchor.is_empty() && !anchor_ok {
                        error_message = Some(format!("Anchor '{anchor}' not found"));
                        continue;
                    }
                    return finish_success(config, rate_limiter, &req_url, &response_url, redirect_code);
                }

                match response_status {
                    401 => return Outcome::Result(Status::Working, "unauthorized".to_string(), 0),
                    429 => {
                        let netloc = origin_of(&response_url);
                        return match rate_limiter.record(&netloc, retry_after.as_deref()) {
                            Some(next_check) => {
                                debug!("rate limited on {netloc}, retry at {next_check}");
                                Outcome::Requeue(next_check)
                            }
                            None => Outcome::Result(Status::Broken, error_message.unwrap_or_else(|| "rate limit exceeded".into()), 0),
                        };
                    }
                    503 => return Outcome::Result(Status::Ignored, "service unavailable".to_string(), 0),
                    code => {
                        error_message = Some(format!("{code} HTTP error"));
                        continue;
                    }
                }
            }
            Err(AttemptError::Tls(msg)) => {
                return Outcome::Result(Status::Broken, msg, 0);
            }
            Err(AttemptError::Connection(msg)) => {
                warn!("connection error for {req_url}: {msg}");
                error_message = Some(msg);
                continue;
            }
            Err(AttemptError::Other(msg)) => {
                return Outcome::Result(Status::Broken, msg, 0);
            }
        }
    }

    Outcome::Result(Status::Broken, error_message.unwrap_or_else(|| "all retrieval methods failed".into()), 0)
}

fn finish_success(config: &Config, rate_limiter: &RateLimiter, req_url: &str, response_url: &str, redirect_code: Option<u16>) -> Outcome {
    let netloc = origin_of(req_url);
    rate_limiter.clear(&netloc);

    let same_path = response_url.trim_end_matches('/') == req_url.trim_end_matches('/');
    if same_path || allowed_redirect(config, req_url, response_url) {
        return Outcome::Result(Status::Working, String::new(), 0);
    }
    Outcome::Result(Status::Redirected, response_url.to_string(), redirect_code.unwrap_or(0))
}

/// Whether a redirect from `req_url` to `response_url` is allow-listed,
/// reclassifying what would otherwise be `redirected` as `working`.
pub fn allowed_redirect(config: &Config, req_url: &str, response_url: &str) -> bool {
    config
        .allowed_redirects
        .iter()
        .any(|(from, to)| from.is_match(req_url) && to.is_match(response_url))
}

enum AttemptError {
    Tls(String),
    Connection(String),
    Other(String),
}

type AttemptOk = (u16, String, Option<u16>, Option<String>, bool);

/// Issue one retrieval attempt, following redirects manually so the
/// status code of the final redirect hop can be recorded (ureq doesn't
/// expose `response.history` the way `requests` does).
fn execute(
    agent: &ureq::Agent,
    method: RetrievalMethod,
    req_url: &str,
    headers: &HashMap<String, String>,
    auth: Option<&AuthCredentials>,
    timeout: Option<Duration>,
    anchor: &str,
) -> Result<AttemptOk, AttemptError> {
    let mut current_url = req_url.to_string();
    let mut last_redirect_code: Option<u16> = None;

    for _ in 0..MAX_REDIRECTS {
        let mut req = match method {
            RetrievalMethod::Head => agent.head(&current_url),
            RetrievalMethod::Get => agent.get(&current_url),
        };
        for (name, value) in headers {
            req = req.set(name, value);
        }
        if let Some(auth) = auth {
            req = req.set("Authorization", &auth.header_value());
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        match req.call() {
            Ok(response) => {
                let status = response.status();
                if (300..400).contains(&status) {
                    if let Some(location) = response.header("Location").map(|s| s.to_string()) {
                        last_redirect_code = Some(status);
                        current_url = resolve_url(&current_url, &location);
                        continue;
                    }
                }
                let retry_after = response.header("Retry-After").map(|s| s.to_string());
                let final_url = response.get_url().to_string();

                // Checked on whichever method produced the response, not
                // just GET: a HEAD response has no body, so it always
                // fails this check and falls through to the GET fallback
                // below, matching the original's `response.ok and anchor
                // and not contains_anchor(response, anchor)` (no method
                // guard there either).
                let anchor_ok = if !anchor.is_empty() {
                    stream_for_anchor(response, anchor)
                } else {
                    true
                };
                return Ok((status, final_url, last_redirect_code, retry_after, anchor_ok));
            }
            // `ureq` reports any 4xx/5xx response as an `Err` carrying the
            // response itself (`Error::into_response`), while a true
            // transport failure carries none. Surface the former through
            // the `Ok` path so the caller dispatches on the numeric status
            // exactly as it would for a non-error response, mirroring the
            // original's `response.raise_for_status()` coming *after* the
            // status code and `Retry-After` header were already captured.
            Err(err) => {
                let kind = err.kind();
                let text = err.to_string();
                match err.into_response() {
                    Some(response) => {
                        let status = response.status();
                        let retry_after = response.header("Retry-After").map(|s| s.to_string());
                        let final_url = response.get_url().to_string();
                        return Ok((status, final_url, last_redirect_code, retry_after, true));
                    }
                    None => return Err(classify_transport_error(kind, text)),
                }
            }
        }
    }

    Err(AttemptError::Connection("too many redirects".to_string()))
}

/// Stream the response body through [`AnchorMatcher`] in 4 KiB chunks,
/// stopping as soon as the anchor is found (spec.md §4.4 / §9).
fn stream_for_anchor(response: ureq::Response, anchor: &str) -> bool {
    use std::io::Read;

    let mut matcher = crate::anchor::AnchorMatcher::new(anchor);
    let mut reader = response.into_reader();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                if matcher.feed(&chunk) {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    matcher.found()
}

/// Classify a transport-level failure (DNS, connection refused, TLS,
/// too many redirects — never a 4xx/5xx, those are handled as `Ok` by
/// `execute`). TLS/certificate failures short-circuit the whole check
/// immediately per spec.md §4.2.2 step 7; everything else just moves on
/// to the next retrieval method.
fn classify_transport_error(kind: ureq::ErrorKind, text: String) -> AttemptError {
    let lower = text.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        return AttemptError::Tls(text);
    }
    match kind {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io | ureq::ErrorKind::TooManyRedirects => {
            AttemptError::Connection(text)
        }
        _ => AttemptError::Other(text),
    }
}

/// Resolve a `Location` header value, which may be relative, against
/// the URL that produced it.
fn resolve_url(base: &str, location: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}

/// `scheme://host[:port]`-less origin, used as the rate limiter key.
pub fn origin_of(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(u) => match (u.host_str(), u.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => uri.to_string(),
        },
        Err(_) => uri.to_string(),
    }
}

/// Compute the effective headers for a request, merging the default
/// `Accept` header under the first matching `request_headers` entry
/// keyed by `{scheme}://{netloc}`, `{scheme}://{netloc}/`, the full URI,
/// or `*`, in that order. No match means no headers at all.
fn request_headers(config: &Config, uri: &str) -> HashMap<String, String> {
    let parsed = url::Url::parse(uri).ok();
    let mut candidates = Vec::new();
    if let Some(ref u) = parsed {
        candidates.push(format!("{}://{}", u.scheme(), u.host_str().unwrap_or("")));
        candidates.push(format!("{}://{}/", u.scheme(), u.host_str().unwrap_or("")));
    }
    candidates.push(uri.to_string());
    candidates.push("*".to_string());

    for candidate in candidates {
        if let Some((_, overrides)) = config.request_headers.iter().find(|(prefix, _)| prefix == &candidate) {
            let mut headers = HashMap::new();
            headers.insert("Accept".to_string(), DEFAULT_REQUEST_HEADERS_ACCEPT.to_string());
            for (k, v) in overrides {
                headers.insert(k.clone(), v.clone());
            }
            return headers;
        }
    }
    HashMap::new()
}

/// Percent-encode only the non-ASCII bytes of a URI, preserving any
/// existing percent-encoding (spec.md §4.2.2 step 2).
fn encode_non_ascii(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    for byte in uri.bytes() {
        if byte.is_ascii() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use httpmock::prelude::*;

    fn cfg() -> Config {
        Config::compile(RawConfig::default()).unwrap()
    }

    #[test]
    fn origin_includes_explicit_port_only() {
        assert_eq!(origin_of("http://example.com/x"), "example.com");
        assert_eq!(origin_of("http://example.com:8080/x"), "example.com:8080");
    }

    #[test]
    fn encode_non_ascii_leaves_ascii_untouched() {
        assert_eq!(encode_non_ascii("http://h/a/b"), "http://h/a/b");
        assert_eq!(encode_non_ascii("http://h/caf\u{e9}"), "http://h/caf%C3%A9");
    }

    #[test]
    fn allowed_redirect_matches_pattern_pair() {
        let mut raw = RawConfig::default();
        raw.allowed_redirects = vec![("^http://h/x$".to_string(), "^http://h/x/$".to_string())];
        let c = Config::compile(raw).unwrap();
        assert!(allowed_redirect(&c, "http://h/x", "http://h/x/"));
        assert!(!allowed_redirect(&c, "http://h/x", "http://h/y/"));
    }

    #[test]
    fn working_status_on_direct_200() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/ok");
            then.status(200);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/ok", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, _) => assert_eq!(status, Status::Working),
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn unauthorized_is_reported_as_working() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/auth");
            then.status(401);
        });
        server.mock(|when, then| {
            when.method(GET).path("/auth");
            then.status(401);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/auth", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, message, _) => {
                assert_eq!(status, Status::Working);
                assert_eq!(message, "unauthorized");
            }
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn anchor_found_in_body_is_working() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/p");
            then.status(200).body("<html><h2 id=\"sect\">Title</h2></html>");
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/p#sect", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, _) => assert_eq!(status, Status::Working),
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn anchor_missing_in_body_is_broken_with_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/p");
            then.status(200).body("<html><h2 id=\"other\">Title</h2></html>");
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/p#sect", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, message, _) => {
                assert_eq!(status, Status::Broken);
                assert!(message.contains("Anchor 'sect' not found"));
            }
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn anchor_is_checked_on_head_response_and_falls_back_to_get() {
        // With `anchors=false`, HEAD is still attempted first, but the
        // anchor check applies to whichever response came back (spec.md
        // §4.2.2 step 6 has no method guard). A bodyless HEAD response
        // always fails that check, so the worker falls through to GET,
        // which actually carries the anchor.
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/p");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(GET).path("/p");
            then.status(200).body("<html><h2 id=\"sect\">Title</h2></html>");
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let mut raw = RawConfig::default();
        raw.anchors = Some(false);
        let c = Config::compile(raw).unwrap();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/p#sect", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, _) => assert_eq!(status, Status::Working),
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn allow_listed_redirect_to_different_path_is_working() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/x");
            then.status(301).header("Location", "/moved");
        });
        server.mock(|when, then| {
            when.method(HEAD).path("/moved");
            then.status(200);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let mut raw = RawConfig::default();
        let base = server.base_url();
        raw.allowed_redirects = vec![(format!("^{base}/x$"), format!("^{base}/moved$"))];
        let c = Config::compile(raw).unwrap();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{base}/x");
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, _) => assert_eq!(status, Status::Working),
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn service_unavailable_is_ignored() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/down");
            then.status(503);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/down", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, message, _) => {
                assert_eq!(status, Status::Ignored);
                assert_eq!(message, "service unavailable");
            }
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn redirect_to_different_path_without_allowed_list_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/x");
            then.status(301).header("Location", "/y");
        });
        server.mock(|when, then| {
            when.method(HEAD).path("/y");
            then.status(200);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/x", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, code) => {
                assert_eq!(status, Status::Redirected);
                assert_eq!(code, 301);
            }
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }

    #[test]
    fn redirect_adding_trailing_slash_is_treated_as_working() {
        // The same-path comparison strips trailing slashes before
        // comparing, so a redirect that only adds a trailing slash is
        // classified `working`, not `redirected` (matches the original
        // Sphinx linkcheck builder's `rstrip('/')` comparison).
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(HEAD).path("/x");
            then.status(301).header("Location", "/x/");
        });
        server.mock(|when, then| {
            when.method(HEAD).path("/x/");
            then.status(200);
        });
        let agent = build_agent(Some(Duration::from_secs(2)));
        let c = cfg();
        let rl = RateLimiter::new(c.rate_limit_timeout);
        let url = format!("{}/x", server.base_url());
        match check_uri(&agent, &c, &rl, &url) {
            Outcome::Result(status, _, _) => assert_eq!(status, Status::Working),
            Outcome::Requeue(_) => panic!("unexpected requeue"),
        }
    }
}
