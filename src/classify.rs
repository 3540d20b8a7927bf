//! Pure, side-effect-free helpers: pre-network triage (§4.2.1) and the
//! ordered list of retrieval methods to attempt for a given URI (§4.2.2).
//! Both take only config and URI parts as input, matching spec.md §4.5.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;
use crate::types::Status;

/// Matches `scheme://` or protocol-relative `//`, mirroring the
/// original's `uri_re = re.compile('([a-z]+:)?//')`.
fn uri_scheme_re() -> &'static Regex {
    static URI_SCHEME: OnceLock<Regex> = OnceLock::new();
    URI_SCHEME.get_or_init(|| Regex::new(r"^([a-z]+:)?//").unwrap())
}

/// An HTTP verb bundle: the method name and whether to stream the body
/// rather than buffer it fully (GET with an anchor to verify).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMethod {
    Head,
    Get,
}

/// Yields the ordered sequence of retrieval attempts for one URI: HEAD
/// then GET, or GET-only when an anchor must be verified (spec.md §4.2.2
/// / the original's `_retrieval_methods`).
pub fn retrieval_methods(anchors_enabled: bool, anchor: &str) -> Vec<RetrievalMethod> {
    if anchors_enabled && !anchor.is_empty() {
        vec![RetrievalMethod::Get]
    } else {
        vec![RetrievalMethod::Head, RetrievalMethod::Get]
    }
}

/// Result of pre-network triage: either a final classification (no
/// network call needed) or `None` meaning "proceed to the network".
pub enum Triage {
    Final(Status, String, u16),
    NeedsNetwork,
}

/// Pre-network triage for one hyperlink occurrence, per spec.md §4.2.1.
/// `source_dir` is the directory of the document file containing
/// `docname`, used to resolve local relative paths.
pub fn triage(config: &Config, uri: &str, docname: &str, source_dir: &Path) -> Triage {
    for doc_matcher in &config.exclude_documents {
        if doc_matcher.is_match(docname) {
            let info = format!("{docname} matched {} from exclude_documents", doc_matcher.as_str());
            return Triage::Final(Status::Ignored, info, 0);
        }
    }

    if uri.is_empty() || uri.starts_with('#') || uri.starts_with("mailto:") || uri.starts_with("tel:") {
        return Triage::Final(Status::Unchecked, String::new(), 0);
    }

    if !(uri.starts_with("http:") || uri.starts_with("https:")) {
        if uri_scheme_re().is_match(uri) {
            // Another scheme (e.g. ftp:) or protocol-relative URL: not
            // supported, but not reported as broken either.
            return Triage::Final(Status::Unchecked, String::new(), 0);
        }
        let candidate = source_dir.join(uri);
        return if candidate.exists() {
            Triage::Final(Status::Working, String::new(), 0)
        } else {
            Triage::Final(Status::Broken, String::new(), 0)
        };
    }

    Triage::NeedsNetwork
}

/// Whether `uri` matches any of `config.ignore_uris`.
pub fn is_ignored(config: &Config, uri: &str) -> bool {
    config.ignore_uris.iter().any(|pat| pat.is_match(uri))
}
