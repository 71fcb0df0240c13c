//! Command-line interface for the harvester.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::error::{HarvesterError, Result};
use crate::export::{count_by_level, load_year, write_jsonl};
use crate::harvester::Harvester;
use crate::types::RunSummary;

/// Harvest China's administrative-division codes from the statistics bureau.
#[derive(Parser)]
#[command(name = "divcode-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl one or more publication years.
    Fetch(FetchArgs),

    /// Flatten a crawled year into a single JSON Lines file.
    Export {
        /// Year directory produced by `fetch` (e.g. data/2020)
        year_dir: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct FetchArgs {
    /// Years to crawl (default: every published year)
    pub years: Vec<i32>,

    /// Output directory
    #[arg(short, long, default_value = "data")]
    pub output: PathBuf,

    /// Root of the publication, overriding DIVCODE_BASE_URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Maximum number of pages fetched at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Minimum delay between requests in milliseconds
    #[arg(long)]
    pub min_interval_ms: Option<u64>,

    /// Attempts per page before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl FetchArgs {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Result<CrawlConfig> {
        let mut config = CrawlConfig::from_env()?;
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(ms) = self.min_interval_ms {
            config.policy.min_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_attempts {
            config.policy.max_attempts = attempts;
        }
        if let Some(secs) = self.timeout_secs {
            config.policy.timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch(args) => fetch_command(&args),
        Commands::Export { year_dir, output } => export_command(&year_dir, output.as_deref()),
    }
}

/// Execute the fetch command.
fn fetch_command(args: &FetchArgs) -> Result<()> {
    let config = args.config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let token = CancellationToken::new();
        let harvester = Harvester::new(&config)?.with_cancellation(token.clone());

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received SIGINT, stopping crawl");
                token.cancel();
            }
        });

        println!(
            "{} {} into {}",
            style("Harvesting").bold(),
            style(describe_years(&args.years)).cyan(),
            style(args.output.display()).green()
        );
        println!();

        let pb = ProgressBar::new_spinner();
        #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));

        let stats = harvester.stats();
        let ticker = {
            let pb = pb.clone();
            tokio::spawn(async move {
                loop {
                    pb.set_message(format!(
                        "{} pages, {} records, {} failed branches",
                        stats.pages(),
                        stats.records(),
                        stats.failures()
                    ));
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            })
        };

        let result = harvester.fetch(&args.output, &args.years).await;
        ticker.abort();
        pb.finish_and_clear();

        match &result {
            Ok(summary) => print_summary(summary),
            Err(HarvesterError::Incomplete(summary)) => {
                print_summary(summary);
                println!();
                println!("{}", style("Failed branches:").red().bold());
                for failure in summary.failures() {
                    println!("  {failure}");
                }
            }
            Err(_) => {}
        }

        result.map(|_| ())
    })
}

fn describe_years(years: &[i32]) -> String {
    if years.is_empty() {
        "all published years".to_string()
    } else {
        years
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn print_summary(summary: &RunSummary) {
    for year in &summary.years {
        let status = if year.is_complete() {
            style("complete").green()
        } else {
            style("incomplete").yellow().bold()
        };
        println!(
            "  {}: {} pages, {} records, {}",
            style(year.year).bold(),
            year.pages,
            year.records,
            status
        );
    }
}

/// Execute the export command.
fn export_command(year_dir: &Path, output: Option<&Path>) -> Result<()> {
    let records = load_year(year_dir)?;

    match output {
        Some(path) => {
            let file = File::create(path).map_err(|e| HarvesterError::filesystem(path, e))?;
            write_jsonl(&records, BufWriter::new(file))?;

            println!(
                "{} {} records to {}",
                style("Exported").green().bold(),
                records.len(),
                path.display()
            );
            for (level, count) in count_by_level(&records) {
                println!("  {level}: {count}");
            }
        }
        None => write_jsonl(&records, std::io::stdout().lock())?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::parse_from(["divcode-harvester", "fetch", "2020", "2021"]);

        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch command");
        };
        assert_eq!(args.years, vec![2020, 2021]);
        assert_eq!(args.output, PathBuf::from("data"));
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_parse_fetch_with_options() {
        let cli = Cli::parse_from([
            "divcode-harvester",
            "fetch",
            "--output",
            "/tmp/out",
            "--concurrency",
            "8",
            "--min-interval-ms",
            "0",
        ]);

        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch command");
        };
        assert!(args.years.is_empty());
        assert_eq!(args.output, PathBuf::from("/tmp/out"));
        assert_eq!(args.concurrency, Some(8));
        assert_eq!(args.min_interval_ms, Some(0));
    }

    #[test]
    fn test_cli_parse_export() {
        let cli = Cli::parse_from(["divcode-harvester", "export", "data/2020", "-o", "2020.jsonl"]);

        let Commands::Export { year_dir, output } = cli.command else {
            panic!("expected export command");
        };
        assert_eq!(year_dir, PathBuf::from("data/2020"));
        assert_eq!(output, Some(PathBuf::from("2020.jsonl")));
    }

    #[test]
    fn test_describe_years() {
        assert_eq!(describe_years(&[]), "all published years");
        assert_eq!(describe_years(&[2021, 2020]), "2021, 2020");
    }
}
