use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::types::RateLimit;

const DEFAULT_DELAY: f64 = 60.0;

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

/// Shared per-origin back-off table. A single mutex over the map is
/// adequate: contention is low because each operation only touches one
/// origin entry briefly (see spec.md §9).
pub struct RateLimiter {
    limits: Mutex<HashMap<String, RateLimit>>,
    cap: f64,
}

impl RateLimiter {
    pub fn new(cap: f64) -> Self {
        Self { limits: Mutex::new(HashMap::new()), cap }
    }

    /// Current `next_check` for `origin`, or `None` if unrated.
    pub fn next_check(&self, origin: &str) -> Option<f64> {
        self.limits.lock().unwrap().get(origin).map(|r| r.next_check)
    }

    /// Clear back-off state for `origin` after a successful response.
    pub fn clear(&self, origin: &str) {
        self.limits.lock().unwrap().remove(origin);
    }

    /// Record a 429 response for `origin`, returning the timestamp of
    /// the next permitted attempt, or `None` if the back-off would
    /// exceed `rate_limit_timeout` (the caller should give up).
    pub fn record(&self, origin: &str, retry_after: Option<&str>) -> Option<f64> {
        let mut next_check = None;
        let mut delay_from_header = None;

        if let Some(retry_after) = retry_after {
            if let Ok(secs) = retry_after.trim().parse::<f64>() {
                delay_from_header = Some(secs);
                next_check = Some(now_secs() + secs);
            } else if let Some(until) = parse_http_date(retry_after) {
                let delay = until - now_secs();
                delay_from_header = Some(delay);
                next_check = Some(until);
            }
        }

        let delay = match (next_check, delay_from_header) {
            (Some(_), Some(d)) => d,
            _ => {
                let mut limits = self.limits.lock().unwrap();
                let delay = match limits.get(origin) {
                    None => DEFAULT_DELAY,
                    Some(prev) => {
                        let doubled = 2.0 * prev.delay;
                        if doubled > self.cap && prev.delay < self.cap {
                            self.cap
                        } else {
                            doubled
                        }
                    }
                };
                drop(limits);
                if delay > self.cap {
                    return None;
                }
                next_check = Some(now_secs() + delay);
                delay
            }
        };

        let next_check = next_check?;
        self.limits
            .lock()
            .unwrap()
            .insert(origin.to_string(), RateLimit { delay, next_check });
        Some(next_check)
    }
}

/// Parse an HTTP-date (RFC 1123/850/asctime, as accepted by `Retry-After`)
/// into unix seconds.
fn parse_http_date(s: &str) -> Option<f64> {
    let dt: DateTime<Utc> = httpdate_to_utc(s)?;
    Some(dt.timestamp() as f64)
}

fn httpdate_to_utc(s: &str) -> Option<DateTime<Utc>> {
    // RFC 1123, e.g. "Wed, 21 Oct 2015 07:28:00 GMT"
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // RFC 850, e.g. "Wednesday, 21-Oct-15 07:28:00 GMT"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    // asctime, e.g. "Wed Oct 21 07:28:00 2015"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds_sets_exact_delay() {
        let rl = RateLimiter::new(300.0);
        let before = now_secs();
        let next = rl.record("h", Some("2")).unwrap();
        assert!(next >= before + 2.0 && next < before + 3.0);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let rl = RateLimiter::new(300.0);
        rl.record("h", None).unwrap(); // 60
        let limits = rl.limits.lock().unwrap();
        assert_eq!(limits.get("h").unwrap().delay, 60.0);
        drop(limits);

        rl.record("h", None).unwrap(); // 120
        assert_eq!(rl.limits.lock().unwrap().get("h").unwrap().delay, 120.0);

        rl.record("h", None).unwrap(); // 240
        assert_eq!(rl.limits.lock().unwrap().get("h").unwrap().delay, 240.0);

        // doubling 240 -> 480 exceeds cap (300) but prev (240) < cap, so clamp to 300
        rl.record("h", None).unwrap();
        assert_eq!(rl.limits.lock().unwrap().get("h").unwrap().delay, 300.0);

        // next doubling starts from 300, which already equals the cap -> give up
        assert!(rl.record("h", None).is_none());
    }

    #[test]
    fn clear_removes_origin() {
        let rl = RateLimiter::new(300.0);
        rl.record("h", Some("5")).unwrap();
        assert!(rl.next_check("h").is_some());
        rl.clear("h");
        assert!(rl.next_check("h").is_none());
    }
}
