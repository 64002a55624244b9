//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::logging::LogDestination;

/// Topic filter: classify the items of a saved page against your topics.
#[derive(Parser)]
#[command(name = "topic-filter")]
#[command(version)]
pub(crate) struct Cli {
    /// Directory holding settings.ron
    #[arg(long, default_value = ".topic_filter", global = true)]
    pub state_dir: PathBuf,

    /// Where log output goes
    #[arg(long, value_enum, default_value_t = LogDestination::Terminal, global = true)]
    pub log: LogDestination,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a filtering session over a saved page and print each item's state
    Filter {
        /// Saved HTML page
        page: PathBuf,

        /// Address the page was saved from; selects the site extractor
        #[arg(long)]
        url: String,

        /// Topic description; repeat for several. Defaults to the stored topics
        #[arg(short, long = "topic")]
        topics: Vec<String>,

        /// How long the session keeps polling before the result is printed
        #[arg(long, default_value_t = 3)]
        seconds: u64,

        /// Content-Type the page was served with, for charset detection
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Ask the model to suggest a filter for a saved page
    Recommend {
        /// Saved HTML page
        page: PathBuf,

        /// Address the page was saved from; selects the site extractor
        #[arg(long)]
        url: String,

        /// Content-Type the page was served with, for charset detection
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Print the global request counter
    Stats,
}
