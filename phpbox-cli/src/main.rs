mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "phpbox")]
#[command(about = "Run PHP snippets in a throwaway sandbox directory")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/phpbox/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// PHP binary, overrides php_settings.binary
    #[arg(long, global = true)]
    pub php: Option<String>,

    /// Cache root, overrides sandbox.cache_dir
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Remove every script and log left in the sandbox directory
    CacheClear,
    /// Run a snippet in a fresh interpreter and print its output
    Run {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Launch a snippet in a detached interpreter
    Spawn {
        #[command(flatten)]
        source: SourceArgs,

        /// Wait for the interpreter and report its exit status
        #[arg(long)]
        wait: bool,
    },
    /// Run snippets one after another in a single shared interpreter
    Inline {
        /// Script files, run in order ("-" reads stdin)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Variable exposed to every snippet as $_SANDBOX[KEY]
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = commands::parse_var)]
        vars: Vec<(String, String)>,
    },
}

#[derive(Args)]
pub struct SourceArgs {
    /// Script file ("-" or omitted reads stdin)
    pub file: Option<PathBuf>,

    /// Code given on the command line instead of a file
    #[arg(short = 'e', long, conflicts_with = "file")]
    pub code: Option<String>,

    /// Environment variable for the interpreter
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = commands::parse_var)]
    pub vars: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = commands::Overrides {
        config: cli.config,
        php: cli.php,
        cache_dir: cli.cache_dir,
    };

    match cli.command {
        Commands::CacheClear => commands::execute_cache_clear(&overrides),
        Commands::Run { source } => {
            let code = commands::read_source(source.file.as_deref(), source.code).await?;
            commands::execute_run(&overrides, &code, source.vars.into_iter().collect()).await
        }
        Commands::Spawn { source, wait } => {
            let code = commands::read_source(source.file.as_deref(), source.code).await?;
            commands::execute_spawn(&overrides, &code, source.vars.into_iter().collect(), wait)
                .await
        }
        Commands::Inline { files, vars } => {
            commands::execute_inline(&overrides, &files, vars.into_iter().collect()).await
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "phpbox={},phpbox_cli={},phpbox_sandbox={},phpbox_common={}",
                    log_level, log_level, log_level, log_level
                ))
            }),
        )
        .init();
}
