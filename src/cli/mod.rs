pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use commands::CrawlOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file; `--log-file` alone uses the platform data directory
    #[arg(long, global = true, require_equals = true)]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the configured sites and download their images
    Crawl {
        /// Configuration file to use instead of the default one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory to store images in
        #[arg(short, long)]
        image_dir: Option<PathBuf>,

        /// Number of background image fetchers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run browsers without a window (true/false)
        #[arg(long)]
        headless: Option<bool>,

        /// Only crawl the named site (repeatable)
        #[arg(short, long = "site")]
        sites: Vec<String>,

        /// WebDriver server URL
        #[arg(long)]
        webdriver: Option<String>,
    },

    /// Show or initialize the configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Print where the default configuration lives
        #[arg(long, conflicts_with = "init")]
        path: bool,
    },

    /// List the built-in site adapters
    Sites,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { config, image_dir, workers, headless, sites, webdriver } => {
            info!("Starting crawl");
            commands::crawl(CrawlOptions {
                config,
                image_dir,
                workers,
                headless,
                sites,
                webdriver,
            })
            .await
        },
        Commands::Config { init, path } => {
            if path {
                commands::show_config_path()
            } else if init {
                info!("Writing default configuration");
                commands::init_config()
            } else {
                commands::show_config()
            }
        },
        Commands::Sites => commands::list_sites(),
    }
}
