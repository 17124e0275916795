use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "devscope",
    about = "Detect installed developer tools and watch live system metrics",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (overrides the configured one)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Data directory holding config, cache and logs
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered tools
    Tools {
        /// Only tools in this category (e.g. language, container)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Detect installed tools
    Scan {
        /// Scan a single category
        #[arg(short, long, conflicts_with = "tool")]
        category: Option<String>,

        /// Scan a single tool by id
        #[arg(short, long)]
        tool: Option<String>,

        /// Drop cached results before scanning
        #[arg(long)]
        refresh: bool,
    },

    /// Show results of previous scans without running any commands
    Cached,

    /// Forget cached detection results
    Invalidate,

    /// Stream live system metrics
    Metrics {
        /// Sampling interval in milliseconds (500-5000)
        #[arg(short, long, default_value_t = 1000)]
        interval: u64,

        /// Number of samples to print
        #[arg(short = 'n', long, default_value_t = 5)]
        samples: usize,
    },

    /// Show the static system description
    Snapshot {
        /// Re-read the data instead of using the collector's copy
        #[arg(long)]
        refresh: bool,
    },

    /// Print config and data paths
    Paths,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_flags() {
        let args = Args::parse_from(["devscope", "scan", "--category", "language", "--refresh"]);
        match args.command {
            Commands::Scan {
                category,
                tool,
                refresh,
            } => {
                assert_eq!(category.as_deref(), Some("language"));
                assert!(tool.is_none());
                assert!(refresh);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["devscope", "metrics", "--json", "--log-level", "debug"]);
        assert!(args.json);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            args.command,
            Commands::Metrics {
                interval: 1000,
                samples: 5
            }
        ));
    }
}
