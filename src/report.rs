//! `output.txt` / `output.json` report writers and the exit-status
//! contract (spec.md §6). The text/JSON line formats and the redirect
//! code-to-text table are reproduced verbatim from the original
//! builder's `process_result`/`write_entry`/`write_linkstat`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::types::{CheckResult, Status};

#[derive(Serialize)]
struct LinkStat<'a> {
    filename: &'a str,
    lineno: Option<u32>,
    status: &'a str,
    code: u16,
    uri: &'a str,
    info: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Streams `CheckResult`s to `output.txt`/`output.json` as they arrive
/// and tracks whether any `broken` result was seen, for the process
/// exit code contract.
pub struct ReportWriter {
    txt: BufWriter<File>,
    json: BufWriter<File>,
    strict: bool,
    pub broken_count: usize,
}

impl ReportWriter {
    pub fn create(out_dir: &Path, strict: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(out_dir)?;
        Ok(Self {
            txt: BufWriter::new(File::create(out_dir.join("output.txt"))?),
            json: BufWriter::new(File::create(out_dir.join("output.json"))?),
            strict,
            broken_count: 0,
        })
    }

    /// Process one result: log it, write the JSON line, and (for
    /// reportable statuses) write the text line.
    pub fn process(&mut self, result: &CheckResult, filename: &str) -> std::io::Result<()> {
        let mut text_suffix = None;

        match result.status {
            Status::Unchecked => {
                // The original silently drops `unchecked` results from
                // both report files.
                self.write_json(result, filename, None)?;
                return Ok(());
            }
            Status::Ignored => {
                if result.message.is_empty() {
                    info!("-ignored- {}", result.uri);
                } else {
                    info!("-ignored- {}: {}", result.uri, result.message);
                }
            }
            Status::Local => {
                info!("-local-   {}", result.uri);
                self.write_entry("local", filename, result.lineno, &result.uri)?;
            }
            Status::Working => {
                if result.message.is_empty() {
                    info!("ok        {}", result.uri);
                } else {
                    info!("ok        {} - {}", result.uri, result.message);
                }
            }
            Status::Broken => {
                self.broken_count += 1;
                if self.strict {
                    warn!("broken link: {} ({})", result.uri, result.message);
                } else {
                    info!("broken    {} - {}", result.uri, result.message);
                }
                self.write_entry("broken", filename, result.lineno, &format!("{}: {}", result.uri, result.message))?;
            }
            Status::Redirected => {
                let (text, _purple_or_turquoise) = redirect_text(result.code);
                text_suffix = Some(text);
                if self.strict {
                    warn!("redirect  {} - {} to {}", result.uri, text, result.message);
                } else {
                    info!("redirect  {} - {} to {}", result.uri, text, result.message);
                }
                self.write_entry(
                    &format!("redirected {text}"),
                    filename,
                    result.lineno,
                    &format!("{} to {}", result.uri, result.message),
                )?;
            }
            Status::RateLimited => {
                // Never reaches the report writer; see spec.md §4.2 step 5.
                unreachable!("rate-limited results never leave the worker loop");
            }
        }

        self.write_json(result, filename, text_suffix)
    }

    fn write_entry(&mut self, kind: &str, filename: &str, lineno: Option<u32>, uri: &str) -> std::io::Result<()> {
        writeln!(self.txt, "{filename}:{}: [{kind}] {uri}", lineno.unwrap_or(0))
    }

    fn write_json(&mut self, result: &CheckResult, filename: &str, text: Option<&'static str>) -> std::io::Result<()> {
        let stat = LinkStat {
            filename,
            lineno: result.lineno,
            status: result.status.as_str(),
            code: result.code,
            uri: &result.uri,
            info: &result.message,
            text,
        };
        let line = serde_json::to_string(&stat).expect("CheckResult always serializes");
        writeln!(self.json, "{line}")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.txt.flush()?;
        self.json.flush()
    }
}

/// Human-readable text + the original's console color for a redirect
/// status code, reproduced verbatim from `process_result`.
fn redirect_text(code: u16) -> (&'static str, &'static str) {
    match code {
        301 => ("permanently", "purple"),
        302 => ("with Found", "purple"),
        303 => ("with See Other", "purple"),
        307 => ("temporarily", "turquoise"),
        308 => ("permanently", "purple"),
        _ => ("with unknown code", "purple"),
    }
}

/// Process exit code contract (spec.md §6): 1 if any result was
/// `broken`, else 0.
pub fn exit_code(broken_count: usize) -> i32 {
    if broken_count > 0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckResult;
    use std::io::BufRead;

    fn result(status: Status, code: u16, message: &str) -> CheckResult {
        CheckResult::new("http://h/x", "doc", Some(3), status, message, code)
    }

    #[test]
    fn broken_result_increments_count_and_writes_both_files() {
        let dir = std::env::temp_dir().join(format!("sitecheck-report-test-{}", std::process::id()));
        let mut writer = ReportWriter::create(&dir, false).unwrap();
        writer.process(&result(Status::Broken, 0, "404 HTTP error"), "src/doc.rst").unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.broken_count, 1);
        assert_eq!(exit_code(writer.broken_count), 1);

        let txt = std::fs::read_to_string(dir.join("output.txt")).unwrap();
        assert!(txt.contains("[broken] http://h/x: 404 HTTP error"));

        let json = std::fs::read_to_string(dir.join("output.json")).unwrap();
        let line: serde_json::Value = serde_json::from_str(json.lines().next().unwrap()).unwrap();
        assert_eq!(line["status"], "broken");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn redirected_result_uses_permanently_text_for_301() {
        let dir = std::env::temp_dir().join(format!("sitecheck-report-test-redir-{}", std::process::id()));
        let mut writer = ReportWriter::create(&dir, false).unwrap();
        writer.process(&result(Status::Redirected, 301, "http://h/y"), "src/doc.rst").unwrap();
        writer.flush().unwrap();

        let txt = std::fs::read_to_string(dir.join("output.txt")).unwrap();
        assert!(txt.contains("[redirected permanently]"));
        assert_eq!(writer.broken_count, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unchecked_result_is_not_written_to_text_file() {
        let dir = std::env::temp_dir().join(format!("sitecheck-report-test-unchecked-{}", std::process::id()));
        let mut writer = ReportWriter::create(&dir, false).unwrap();
        writer.process(&result(Status::Unchecked, 0, ""), "src/doc.rst").unwrap();
        writer.flush().unwrap();

        let txt = std::fs::read_to_string(dir.join("output.txt")).unwrap();
        assert!(txt.is_empty());
        let json_lines: Vec<_> = std::io::BufReader::new(File::open(dir.join("output.json")).unwrap())
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(json_lines.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
