mod commands;

use clap::{Parser, Subcommand};
use anyhow::Result;

#[derive(Parser)]
#[command(name = "arena-cli")]
#[command(about = "Arena CLI - Provision the executor image and language configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write config/languages.json and the executor Dockerfile
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,

        /// gcc image tag the executor is built from
        #[arg(long, default_value = "13")]
        gcc_version: String,
    },

    /// List configured languages
    ListLangs {
        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        config: String,
    },

    /// Build the executor Docker image
    BuildImage {
        /// Image tag
        #[arg(short, long, default_value = "arena-executor:latest")]
        tag: String,

        /// Skip build cache
        #[arg(long, default_value = "false")]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, gcc_version } => {
            commands::init_project(&path, &gcc_version).await?;
        }
        Commands::ListLangs { config } => {
            commands::list_languages(&config).await?;
        }
        Commands::BuildImage { tag, no_cache } => {
            commands::build_executor_image(&tag, no_cache).await?;
        }
    }

    Ok(())
}
