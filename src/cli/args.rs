use clap::{Parser, Subcommand};
use prefab_cloud::options::API_KEY_ENV;

/// Prefab CLI - fetch feature flags and configs for a context
#[derive(Parser)]
#[command(name = "prefab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: String,

    /// Evaluation endpoint; repeat to set the failover order
    #[arg(long = "endpoint")]
    pub endpoints: Vec<String>,

    /// Context attribute as type.attr=value (e.g. user.id=123)
    #[arg(short, long = "context")]
    pub context: Vec<String>,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the value of one key
    Get {
        key: String,
    },
    /// Print every evaluated key as JSON
    Dump,
    /// Reload on an interval and print the values after each tick
    Poll {
        /// Interval between loads
        #[arg(long, default_value_t = 5000)]
        every_ms: u64,

        /// Stop after this many ticks
        #[arg(long, default_value_t = 3)]
        ticks: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_api_key_reads_env_var() {
        let command = Cli::command();
        let api_key = command
            .get_arguments()
            .find(|arg| arg.get_id().as_str() == "api_key")
            .unwrap();
        assert_eq!(api_key.get_env(), Some(std::ffi::OsStr::new(API_KEY_ENV)));
    }

    #[test]
    fn test_parse_get_with_context() {
        let cli = Cli::try_parse_from([
            "prefab",
            "--api-key",
            "k",
            "--context",
            "user.id=1",
            "get",
            "flag",
        ])
        .unwrap();
        assert_eq!(cli.api_key, "k");
        assert_eq!(cli.context, vec!["user.id=1"]);
        assert!(matches!(cli.command, Commands::Get { key } if key == "flag"));
    }
}
