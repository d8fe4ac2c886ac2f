//! CLI entry point for demand-signals.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use demand_signals::collectors::trends::DEFAULT_DEMAND_PERIODS;
use demand_signals::collectors::{QaCollector, RepoCollector, SearchInterestCollector};
use demand_signals::config::{Settings, load_config, resolve_default_config_path};

mod cli;

use cli::{Args, Command, QaCommand, ReposCommand, TrendsCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args.command, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref(), resolve_default_config_path())
        .context("failed to load configuration")?;
    match (&loaded.path, loaded.config.is_some()) {
        (Some(path), true) => debug!(path = %path.display(), "loaded config file"),
        (Some(path), false) => debug!(path = %path.display(), "no config file, using defaults"),
        (None, _) => debug!("no config path resolved, using defaults"),
    }

    let mut settings = Settings::resolve(loaded.config.as_ref(), |name| std::env::var(name).ok());
    if args.github_token.is_some() {
        settings.github_token = args.github_token;
    }
    if args.stackexchange_key.is_some() {
        settings.stackexchange_key = args.stackexchange_key;
    }

    let output = run(args.command, &settings).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to render output")?
    );
    Ok(())
}

async fn run(command: Command, settings: &Settings) -> Result<Value> {
    match command {
        Command::Qa(command) => run_qa(command, settings).await,
        Command::Repos(command) => run_repos(command, settings).await,
        Command::Trends(command) => run_trends(command, settings).await,
    }
}

async fn run_qa(command: QaCommand, settings: &Settings) -> Result<Value> {
    let options = settings.collector_options(settings.stackexchange_key.clone(), QaCollector::DEFAULT_PACING);
    let collector = QaCollector::new(options).context("failed to build Stack Exchange client")?;

    match command {
        QaCommand::Metrics(list) => {
            info!(techs = list.techs.len(), "collecting Q&A demand metrics");
            to_json(&collector.tech_demand_metrics(&list.techs).await)
        }
        QaCommand::Timeseries { tags, days } => {
            to_json(&collector.tag_stats_timeseries(&tags, days).await)
        }
        QaCommand::Synonyms { tag } => {
            let synonyms = collector
                .tag_synonyms(&tag)
                .await
                .with_context(|| format!("failed to fetch synonyms for '{tag}'"))?;
            to_json(&synonyms)
        }
        QaCommand::TopTags { page_size, min_count } => {
            let tags = collector
                .top_tags(page_size, min_count)
                .await
                .context("failed to fetch top tags")?;
            to_json(&tags)
        }
    }
}

async fn run_repos(command: ReposCommand, settings: &Settings) -> Result<Value> {
    let options = settings.collector_options(settings.github_token.clone(), RepoCollector::DEFAULT_PACING);
    let collector = RepoCollector::new(options).context("failed to build GitHub client")?;

    match command {
        ReposCommand::Metrics(list) => {
            info!(techs = list.techs.len(), "collecting repository popularity metrics");
            to_json(&collector.tech_popularity_metrics(&list.techs).await)
        }
        ReposCommand::Languages { languages } => to_json(&collector.language_stats(&languages).await),
        ReposCommand::Trending { language, since } => {
            let repos = collector
                .trending_repos(language.as_deref(), since)
                .await
                .context("failed to fetch trending repositories")?;
            to_json(&repos)
        }
    }
}

async fn run_trends(command: TrendsCommand, settings: &Settings) -> Result<Value> {
    let collector = SearchInterestCollector::new(settings.trends_options(), settings.trends.clone())
        .context("failed to build search-interest session")?;

    match command {
        TrendsCommand::Compare { techs, timeframe, geo } => {
            to_json(&collector.compare_technologies(&techs.techs, &timeframe, &geo).await)
        }
        TrendsCommand::Demand { techs, periods } => {
            let periods = if periods.is_empty() {
                DEFAULT_DEMAND_PERIODS.iter().map(ToString::to_string).collect()
            } else {
                periods
            };
            to_json(&collector.tech_demand_trends(&techs.techs, &periods).await)
        }
        TrendsCommand::Suggestions { keyword } => {
            let suggestions = collector
                .suggestions(&keyword)
                .await
                .with_context(|| format!("failed to fetch suggestions for '{keyword}'"))?;
            to_json(&suggestions)
        }
        TrendsCommand::Trending { country } => {
            let searches = collector
                .trending_searches(&country)
                .await
                .with_context(|| format!("failed to fetch trending searches for '{country}'"))?;
            to_json(&searches)
        }
        TrendsCommand::Region { keywords, resolution, timeframe } => {
            let interest = collector
                .interest_by_region(&keywords, resolution, &timeframe)
                .await
                .context("failed to fetch interest by region")?;
            to_json(&interest)
        }
        TrendsCommand::Related { keyword, timeframe, geo } => {
            let related = collector
                .related_queries(&keyword, &timeframe, &geo)
                .await
                .with_context(|| format!("failed to fetch related queries for '{keyword}'"))?;
            to_json(&related)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to serialize result")
}
