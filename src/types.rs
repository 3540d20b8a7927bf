use std::fmt;

/// A single hyperlink occurrence harvested from the document tree.
///
/// Immutable once created; workers only ever read these fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperlink {
    pub uri: String,
    pub docname: String,
    pub lineno: Option<u32>,
}

impl Hyperlink {
    pub fn new(uri: impl Into<String>, docname: impl Into<String>, lineno: Option<u32>) -> Self {
        Self { uri: uri.into(), docname: docname.into(), lineno }
    }
}

/// An item in the priority work queue, ordered by `next_check` ascending.
///
/// `hyperlink: None` is the shutdown sentinel a worker consumes to exit.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub next_check: f64,
    pub hyperlink: Option<Hyperlink>,
}

impl CheckRequest {
    pub fn immediate(hyperlink: Hyperlink) -> Self {
        Self { next_check: 0.0, hyperlink: Some(hyperlink) }
    }

    pub fn shutdown() -> Self {
        Self { next_check: 0.0, hyperlink: None }
    }
}

// BinaryHeap is a max-heap; we want the smallest `next_check` popped first,
// so Ord is reversed relative to the natural float comparison.
impl PartialEq for CheckRequest {
    fn eq(&self, other: &Self) -> bool {
        self.next_check == other.next_check
    }
}
impl Eq for CheckRequest {}
impl PartialOrd for CheckRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for CheckRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .next_check
            .partial_cmp(&self.next_check)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// The outcome classification for a single checked URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Working,
    Broken,
    Redirected,
    Ignored,
    Unchecked,
    Local,
    /// Internal worker-loop signal: the request was re-enqueued under
    /// back-off and must not reach the result queue or report writer.
    RateLimited,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Working => "working",
            Status::Broken => "broken",
            Status::Redirected => "redirected",
            Status::Ignored => "ignored",
            Status::Unchecked => "unchecked",
            Status::Local => "local",
            Status::RateLimited => "rate-limited",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The result of checking one hyperlink occurrence.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub uri: String,
    pub docname: String,
    pub lineno: Option<u32>,
    pub status: Status,
    pub message: String,
    pub code: u16,
}

impl CheckResult {
    pub fn new(
        uri: impl Into<String>,
        docname: impl Into<String>,
        lineno: Option<u32>,
        status: Status,
        message: impl Into<String>,
        code: u16,
    ) -> Self {
        Self {
            uri: uri.into(),
            docname: docname.into(),
            lineno,
            status,
            message: message.into(),
            code,
        }
    }

    pub fn ignored(uri: impl Into<String>, docname: impl Into<String>, lineno: Option<u32>, message: impl Into<String>) -> Self {
        Self::new(uri, docname, lineno, Status::Ignored, message, 0)
    }
}

/// Per-origin back-off record. `delay` is the last applied back-off,
/// used as the base for the next exponential doubling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub delay: f64,
    pub next_check: f64,
}
