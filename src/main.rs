mod anchor;
mod checker;
mod classify;
mod config;
mod harvest;
mod rate_limiter;
mod report;
mod types;
mod worker;

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

use checker::Checker;
use config::Config;
use harvest::HarvestOptions;
use report::ReportWriter;

fn build_cli() -> Command {
    Command::new("sitecheck")
        .about("Concurrent external hyperlink availability checker")
        .arg(
            Arg::new("source")
                .help("Root of the documentation tree to scan")
                .value_name("SOURCE_DIR")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .value_name("DIR")
                .help("Directory to write output.txt/output.json into (default: _build/linkcheck)")
                .num_args(1),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Path to a TOML config file (default: sitecheck.toml if present)")
                .num_args(1),
        )
        .arg(
            Arg::new("threads")
                .short('n')
                .long("threads")
                .value_name("NUM")
                .help("Number of worker threads (default: 5)")
                .num_args(1),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECS")
                .help("Request timeout seconds")
                .num_args(1),
        )
        .arg(
            Arg::new("retries")
                .short('r')
                .long("retries")
                .value_name("NUM")
                .help("Max retries per hyperlink (default: 1)")
                .num_args(1),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print warnings and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("strict")
                .short('W')
                .long("strict")
                .help("Treat broken/redirected links as warnings (nonzero exit regardless)")
                .action(ArgAction::SetTrue),
        )
        .after_help(
"EXAMPLES:
  sitecheck docs/
  sitecheck docs/ -o _build/linkcheck -n 10 -t 10
  sitecheck docs/ -c sitecheck.toml -W",
        )
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let m = build_cli().get_matches();

    let quiet = m.get_flag("quiet");
    let strict = m.get_flag("strict");
    init_logging(quiet);

    let source_dir = PathBuf::from(m.get_one::<String>("source").expect("required"));
    let out_dir = m
        .get_one::<String>("out")
        .map(PathBuf::from)
        .unwrap_or_else(|| source_dir.join("_build/linkcheck"));

    let config_path = m.get_one::<String>("config").map(PathBuf::from).or_else(|| {
        let default = source_dir.join("sitecheck.toml");
        default.exists().then_some(default)
    });

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(n) = m.get_one::<String>("threads").and_then(|s| s.parse().ok()) {
        config.workers = n;
    }
    if let Some(secs) = m.get_one::<String>("timeout").and_then(|s| s.parse::<f64>().ok()) {
        config.timeout = Some(std::time::Duration::from_secs_f64(secs));
    }
    if let Some(n) = m.get_one::<String>("retries").and_then(|s| s.parse().ok()) {
        config.retries = n;
    }

    log::info!("harvesting hyperlinks from {}", source_dir.display());
    let hyperlinks = harvest::harvest(&source_dir, &HarvestOptions::default());
    log::info!("found {} distinct hyperlinks", hyperlinks.len());

    let checker = Checker::new(config, &source_dir);
    let results = checker.check(&hyperlinks);

    let mut writer = ReportWriter::create(&out_dir, strict)?;
    for result in &results {
        writer.process(result, &result.docname)?;
    }
    writer.flush()?;

    log::info!(
        "checked {} hyperlinks, {} broken, reports written to {}",
        results.len(),
        writer.broken_count,
        out_dir.display()
    );

    std::process::exit(report::exit_code(writer.broken_count));
}
