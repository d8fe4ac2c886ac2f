//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use demand_signals::collectors::TrendingWindow;
use demand_signals::collectors::trends::{DEFAULT_TIMEFRAME, DEFAULT_TRENDING_COUNTRY, Resolution};

/// Collect technology-demand signals from public APIs.
///
/// Queries Stack Overflow, GitHub, and Google Trends and prints the
/// collected metrics as JSON on stdout.
#[derive(Parser, Debug)]
#[command(name = "demand-signals")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (defaults to $XDG_CONFIG_HOME/demand-signals/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// GitHub token (overrides GITHUB_TOKEN and the config file)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub github_token: Option<String>,

    /// Stack Exchange API key (overrides STACKEXCHANGE_KEY and the config file)
    #[arg(long, global = true, value_name = "KEY")]
    pub stackexchange_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stack Overflow question activity
    #[command(subcommand)]
    Qa(QaCommand),

    /// GitHub repository popularity
    #[command(subcommand)]
    Repos(ReposCommand),

    /// Google Trends search interest
    #[command(subcommand)]
    Trends(TrendsCommand),
}

#[derive(Subcommand, Debug)]
pub enum QaCommand {
    /// Demand metrics per technology tag
    Metrics(TechList),

    /// Weekly question counts per tag
    Timeseries {
        #[arg(required = true, value_name = "TAG")]
        tags: Vec<String>,

        /// Days of history to cover (7-365)
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u32).range(7..=365))]
        days: u32,
    },

    /// Synonyms of a tag
    Synonyms {
        #[arg(value_name = "TAG")]
        tag: String,
    },

    /// Most popular tags
    TopTags {
        /// Tags per page (1-100)
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: u32,

        /// Minimum question count
        #[arg(long, default_value_t = 100)]
        min_count: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReposCommand {
    /// Popularity metrics per technology
    Metrics(TechList),

    /// Repository statistics per language
    Languages {
        #[arg(required = true, value_name = "LANG")]
        languages: Vec<String>,
    },

    /// Recently created, highly starred repositories
    Trending {
        /// Restrict to one language
        #[arg(long)]
        language: Option<String>,

        /// Creation window: daily, weekly, or monthly
        #[arg(long, default_value_t = TrendingWindow::Weekly)]
        since: TrendingWindow,
    },
}

#[derive(Subcommand, Debug)]
pub enum TrendsCommand {
    /// Compare search interest across technologies
    Compare {
        #[command(flatten)]
        techs: TechList,

        /// Timeframe such as "today 12-m" or "today 3-m"
        #[arg(long, default_value = DEFAULT_TIMEFRAME)]
        timeframe: String,

        /// Geography code, empty for worldwide
        #[arg(long, default_value = "")]
        geo: String,
    },

    /// Demand trends per technology over several periods
    Demand {
        #[command(flatten)]
        techs: TechList,

        /// Timeframe to evaluate (repeatable)
        #[arg(long = "period", value_name = "TIMEFRAME")]
        periods: Vec<String>,
    },

    /// Interest per geographic area
    Region {
        /// Keywords to compare (the first five are used)
        #[arg(required = true, value_name = "KEYWORD")]
        keywords: Vec<String>,

        /// Granularity: country, region, city, or dma
        #[arg(long, default_value_t = Resolution::Country)]
        resolution: Resolution,

        #[arg(long, default_value = DEFAULT_TIMEFRAME)]
        timeframe: String,
    },

    /// Top and rising related queries for one keyword
    Related {
        #[arg(value_name = "KEYWORD")]
        keyword: String,

        #[arg(long, default_value = DEFAULT_TIMEFRAME)]
        timeframe: String,

        #[arg(long, default_value = "")]
        geo: String,
    },

    /// Keyword suggestions
    Suggestions {
        #[arg(value_name = "KEYWORD")]
        keyword: String,
    },

    /// Currently trending searches in a country
    Trending {
        /// Country name as used by the trending feed, e.g. united_states
        #[arg(long, default_value = DEFAULT_TRENDING_COUNTRY)]
        country: String,
    },
}

/// One or more technology names.
#[derive(ClapArgs, Debug)]
pub struct TechList {
    #[arg(required = true, value_name = "TECH")]
    pub techs: Vec<String>,
}
