//! dm - resumable multi-target data-movement client
//!
//! Copies, mirrors, diffs and watches trees across local filesystems and
//! S3-compatible object stores. Multi-item operations run inside resumable
//! sessions.

mod commands;
mod exit_code;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use output::OutputConfig;

#[derive(Parser, Debug)]
#[command(
    name = "dm",
    version,
    about = "Resumable data movement between filesystems and object stores"
)]
struct Cli {
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Suppress informational output
    #[arg(long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage aliases for storage locations
    #[command(subcommand)]
    Alias(commands::alias::AliasCommands),

    /// Copy a file or subtree to one or more targets
    Cp(commands::cp::CpArgs),

    /// Synchronize a source tree onto a target
    Mirror(commands::mirror::MirrorArgs),

    /// Compare two trees
    Diff(commands::diff::DiffArgs),

    /// Inspect, resume and clear sessions
    #[command(subcommand)]
    Session(commands::session::SessionCommands),

    /// Watch a location for changes
    Watch(commands::watch::WatchArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let output_config = OutputConfig {
        json: cli.json,
        quiet: cli.quiet,
        no_color: cli.no_color,
    };

    let code = match cli.command {
        Commands::Alias(cmd) => commands::alias::execute(cmd, output_config).await,
        Commands::Cp(args) => commands::cp::execute(args, output_config).await,
        Commands::Mirror(args) => commands::mirror::execute(args, output_config).await,
        Commands::Diff(args) => commands::diff::execute(args, output_config).await,
        Commands::Session(cmd) => commands::session::execute(cmd, output_config).await,
        Commands::Watch(args) => commands::watch::execute(args, output_config).await,
        Commands::Completions(args) => {
            commands::completions::execute(args, &mut Cli::command())
        }
    };
    code.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["dm", "diff", "a", "b", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Diff(_)));
    }

    #[test]
    fn test_cp_requires_target() {
        assert!(Cli::try_parse_from(["dm", "cp", "only-source"]).is_err());
        let cli = Cli::parse_from(["dm", "cp", "src/...", "t1", "t2"]).command;
        match cli {
            Commands::Cp(args) => {
                assert_eq!(args.source, "src/...");
                assert_eq!(args.targets, vec!["t1", "t2"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
