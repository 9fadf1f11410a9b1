/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use dmarc_audit::analyze::{output, Analyzer, Outcome};
use dmarc_audit::config::Config;
use dmarc_audit::dns::Resolver;
use log::{info, LevelFilter};

fn main() -> anyhow::Result<()> {
    let matches = Command::new("dmarc-audit")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Analyzes DMARC aggregate reports and estimates the impact of p=reject")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("directory")
                .short('d')
                .long("directory")
                .value_name("DIR")
                .help("Report directory (overrides the configuration file)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(Path::new(path))
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::default(),
    };
    if let Some(directory) = matches.get_one::<String>("directory") {
        config.directory = PathBuf::from(directory);
    }

    let resolver = if config.nameservers.is_empty() {
        Resolver::new_system_conf()
    } else {
        Resolver::with_nameservers(
            &config.nameservers,
            Duration::from_secs(config.dns_timeout_secs),
        )
    }
    .context("failed to build resolver")?;

    let analyzer = Analyzer::new(resolver, config.blocklists.clone());
    match analyzer
        .analyze(&config.directory)
        .with_context(|| format!("failed to analyze {}", config.directory.display()))?
    {
        // Both early outcomes are already reported through the log.
        Outcome::NoRecords | Outcome::NoFailures => {}
        Outcome::Complete(analysis) => {
            print!("{}", output::render_summary(&analysis.summary));
            output::write_analysis(&analysis, &config.summary_file, &config.table_file)?;
            info!("Summary saved to {}", config.summary_file.display());
            info!(
                "Analysis complete. Results saved to {}",
                config.table_file.display()
            );
        }
    }

    Ok(())
}
