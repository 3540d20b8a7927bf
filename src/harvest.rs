//! Hyperlink harvester: walks a small documentation tree and extracts
//! `(uri, docname, lineno)` triples. Out of scope for the core per
//! spec.md §1 ("document model / hyperlink harvester... is an external
//! collaborator"), but implemented here so the crate runs end-to-end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::OnceLock;

use crate::types::Hyperlink;

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Markdown `[text](uri)`, reST `` `text <uri>`_ ``, and bare HTML
    // `href="uri"` / `src="uri"` — the handful of link shapes our
    // supported source formats actually use.
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:\]\((?P<md>[a-zA-Z][a-zA-Z0-9+.-]*://[^\s)]+)\)|<(?P<rst>[a-zA-Z][a-zA-Z0-9+.-]*://[^\s>]+)>`_|(?:href|src)\s*=\s*"(?P<html>[^"]+)")"#,
        )
        .unwrap()
    })
}

/// Hook invoked on every harvested URI before it is inserted into the
/// hyperlink map, mirroring the original's `linkcheck-process-uri`
/// event (spec.md §6 "Hook"). Returning `None` leaves the URI as-is.
pub type RewriteHook = Box<dyn Fn(&str) -> Option<String>>;

#[derive(Default)]
pub struct HarvestOptions {
    pub rewrite_hook: Option<RewriteHook>,
}

/// Rewrite anchor names of github.com hyperlinks the way the original
/// `rewrite_github_anchor` does: GitHub's rendered anchors are prefixed
/// with `user-content-`, so a hand-written `#installation` link needs
/// that prefix added before it will match what actually exists on the
/// rendered page. Shipped but not wired in by default (see DESIGN.md —
/// the original disables this by default too).
pub fn rewrite_github_anchor(uri: &str) -> Option<String> {
    let (base, fragment) = uri.split_once('#')?;
    if !base.contains("github.com") || fragment.starts_with("user-content-") {
        return None;
    }
    Some(format!("{base}#user-content-{fragment}"))
}

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "rst", "html", "htm"];

/// Walk `root` recursively, harvesting hyperlinks from every file with
/// a supported extension. `docname` is the file's path relative to
/// `root` with its extension stripped, matching Sphinx's `docname`
/// convention.
pub fn harvest(root: &Path, options: &HarvestOptions) -> HashMap<String, Hyperlink> {
    let mut hyperlinks = HashMap::new();
    let mut files = Vec::new();
    collect_files(root, &mut files);

    for path in files {
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        let docname = docname_for(root, &path);
        for (lineno, line) in text.lines().enumerate() {
            for caps in link_re().captures_iter(line) {
                let uri = caps
                    .name("md")
                    .or_else(|| caps.name("rst"))
                    .or_else(|| caps.name("html"))
                    .map(|m| m.as_str().to_string());
                let Some(mut uri) = uri else { continue };

                if let Some(hook) = &options.rewrite_hook {
                    if let Some(rewritten) = hook(&uri) {
                        uri = rewritten;
                    }
                }

                hyperlinks.entry(uri.clone()).or_insert_with(|| {
                    Hyperlink::new(uri, docname.clone(), Some(lineno as u32 + 1))
                });
            }
        }
    }

    hyperlinks
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_EXTENSIONS.contains(&e))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

fn docname_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.with_extension("").to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvests_markdown_links_with_docname_and_lineno() {
        let root = std::env::temp_dir().join(format!("sitecheck-harvest-test-{}", std::process::id()));
        std::fs::create_dir_all(root.join("guide")).unwrap();
        std::fs::write(
            root.join("guide/intro.md"),
            "# Intro\n\nSee [docs](https://example.com/docs) for more.\n",
        )
        .unwrap();

        let hyperlinks = harvest(&root, &HarvestOptions::default());
        let link = hyperlinks.get("https://example.com/docs").expect("link harvested");
        assert_eq!(link.docname, "guide/intro");
        assert_eq!(link.lineno, Some(3));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn duplicate_uris_across_files_are_deduplicated() {
        let root = std::env::temp_dir().join(format!("sitecheck-harvest-dedup-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(&root.join("a.md"), "[x](https://example.com)\n").unwrap();
        std::fs::write(&root.join("b.md"), "[y](https://example.com)\n").unwrap();

        let hyperlinks = harvest(&root, &HarvestOptions::default());
        assert_eq!(hyperlinks.len(), 1);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn rewrite_hook_runs_before_insertion() {
        let root = std::env::temp_dir().join(format!("sitecheck-harvest-hook-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(&root.join("a.md"), "[x](https://example.com/old)\n").unwrap();

        let options = HarvestOptions {
            rewrite_hook: Some(Box::new(|uri: &str| {
                uri.ends_with("/old").then(|| uri.replace("/old", "/new"))
            })),
        };
        let hyperlinks = harvest(&root, &options);
        assert!(hyperlinks.contains_key("https://example.com/new"));
        assert!(!hyperlinks.contains_key("https://example.com/old"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn github_anchor_rewrite_adds_user_content_prefix() {
        assert_eq!(
            rewrite_github_anchor("https://github.com/a/b#install"),
            Some("https://github.com/a/b#user-content-install".to_string())
        );
        assert_eq!(rewrite_github_anchor("https://github.com/a/b#user-content-install"), None);
        assert_eq!(rewrite_github_anchor("https://example.com#install"), None);
    }
}
