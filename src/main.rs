use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shopsight::Config;

mod commands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Visual product search over precomputed image embeddings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command
#[derive(Args, Clone)]
struct GlobalArgs {
    /// Config file (default: $SHOPSIGHT_CONFIG, then ./shopsight.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (overrides [logging] level)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        global: GlobalArgs,

        /// Address to bind (overrides [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Find products similar to a local image
    Search {
        #[command(flatten)]
        global: GlobalArgs,

        /// Image file to search with
        image: PathBuf,

        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Manage the persisted similarity index
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Report asset and service status
    Status {
        #[command(flatten)]
        global: GlobalArgs,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Rebuild the index from the embeddings file and persist it
    Build {
        #[command(flatten)]
        global: GlobalArgs,
    },
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    let config = Config::load(global.config.as_deref())?;

    let level = global
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { global, host, port } => {
            let config = load_config(&global)?;
            commands::serve::execute(config, host, port)?;
        }
        Commands::Search {
            global,
            image,
            top_k,
        } => {
            let config = load_config(&global)?;
            commands::search::execute(&config, &image, top_k)?;
        }
        Commands::Index { command } => match command {
            IndexCommands::Build { global } => {
                let config = load_config(&global)?;
                commands::index::build(&config)?;
            }
        },
        Commands::Status { global, json } => {
            let config = load_config(&global)?;
            let code = commands::status::execute(&config, json)?;
            std::process::exit(code);
        }
    }

    Ok(())
}
