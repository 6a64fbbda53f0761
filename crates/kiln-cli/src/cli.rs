//! Command-line interface definition.
//!
//! - `kiln build` - production build of every target
//! - `kiln dev` - development server with watch and live reload
//! - `kiln serve` - serve the output of an earlier `kiln build`

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Kiln - build and serve React applications
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Build and serve React applications",
    long_about = "Kiln bundles a React client, an optional server-rendering entry and an\n\
                  optional API entry, keeps them rebuilt while you edit, and serves the result."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build every target for production
    Build(BuildArgs),

    /// Start the development server with watch mode and live reload
    Dev(DevArgs),

    /// Serve a previous production build without recompiling
    Serve(ServeArgs),
}

/// Where the project lives and which config file describes it.
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Project directory (defaults to the current directory)
    ///
    /// Relative paths in the config file are resolved against this directory.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Path to the config file (defaults to `<root>/kiln.config.json`)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Port for the development server (overrides `port` in the config)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Open the browser once the server is listening
    #[arg(long)]
    pub open: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Port to listen on (overrides `port` in the config)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dev_flags_parse() {
        let cli = Cli::parse_from(["kiln", "dev", "--port", "4000", "--open", "--root", "app"]);
        let Command::Dev(args) = cli.command else {
            panic!("expected dev command");
        };
        assert_eq!(args.port, Some(4000));
        assert!(args.open);
        assert_eq!(args.project.root, Some(PathBuf::from("app")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["kiln", "build", "--verbose", "--no-color"]);
        assert!(cli.verbose);
        assert!(cli.no_color);
        assert!(matches!(cli.command, Command::Build(_)));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["kiln", "serve", "-v", "-q"]).is_err());
    }
}
