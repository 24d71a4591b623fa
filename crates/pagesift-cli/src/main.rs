//! pagesift command-line front end: scrape one page into a JSON file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use pagesift::{ListingMode, Pipeline, PipelineConfig, PipelineRequest, ScrapeOutput, Strategy};

#[derive(Parser)]
#[command(
    name = "pagesift",
    about = "Fetch a web page, isolate its main content and write it as JSON",
    version
)]
struct Cli {
    /// Page to scrape.
    #[arg(long, required_unless_present = "query", conflicts_with = "query")]
    url: Option<String>,

    /// Search terms for the configured listing site (used with --city).
    #[arg(long, requires = "city")]
    query: Option<String>,

    /// City appended to the search terms.
    #[arg(long, requires = "query")]
    city: Option<String>,

    /// Where to write the JSON result.
    #[arg(short, long)]
    output: PathBuf,

    /// Retrieval strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Lightweight)]
    strategy: StrategyArg,

    /// Overall time limit in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Maximum number of listing records to extract.
    #[arg(long)]
    max_records: Option<usize>,

    /// When to extract listing records.
    #[arg(long, value_enum, default_value_t = ListingArg::Auto)]
    listing: ListingArg,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    #[value(alias = "requests")]
    Lightweight,
    #[value(alias = "selenium")]
    Rendered,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Lightweight => Strategy::Lightweight,
            StrategyArg::Rendered => Strategy::Rendered,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ListingArg {
    Auto,
    Off,
    Force,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Returns whether the page was scraped successfully.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(max_records) = cli.max_records {
        config.max_records = max_records;
    }

    let url = match (&cli.url, &cli.query, &cli.city) {
        (Some(url), _, _) => url.clone(),
        (None, Some(query), Some(city)) => search_url(&config, query, city)?,
        _ => bail!("either --url or --query with --city is required"),
    };
    tracing::debug!(url = %url, "target resolved");

    let listing = match cli.listing {
        ListingArg::Auto => ListingMode::Auto,
        ListingArg::Off => ListingMode::Off,
        ListingArg::Force => {
            let site = config
                .listing_site_for(&url)
                .or_else(|| config.listing_sites.first())
                .cloned()
                .context("--listing force requires a configured listing site")?;
            ListingMode::Force(site)
        }
    };

    let mut request = PipelineRequest::new(url)
        .with_strategy(cli.strategy.into())
        .with_listing(listing);
    if let Some(secs) = cli.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let pipeline = Pipeline::new(config);
    let output = pipeline.run(request).await;
    write_output(&cli.output, &output)?;

    match &output {
        ScrapeOutput::Page(_) => {
            println!("Successfully scraped content to {}", cli.output.display());
            Ok(true)
        }
        ScrapeOutput::Failed(failure) => {
            eprintln!("Error scraping {}: {}", failure.url, failure.error);
            Ok(false)
        }
    }
}

fn search_url(config: &PipelineConfig, query: &str, city: &str) -> anyhow::Result<String> {
    config
        .listing_sites
        .iter()
        .find_map(|site| site.search_url(query, city))
        .context("no configured listing site has a search URL")
}

fn write_output(path: &Path, output: &ScrapeOutput) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let json = output.to_json_pretty()?;
    std::fs::write(path, json + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
