//! Mapproxy CLI - Command-line interface
//!
//! Runs the tile proxy and offers a few offline tools around its
//! configuration.

mod commands;
mod error;
mod runner;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{classify, prepare, resources, serve};
use error::CliError;

#[derive(Parser)]
#[command(name = "mapproxy")]
#[command(version = mapproxy::VERSION)]
#[command(about = "On-the-fly map tile proxy", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.mapproxy/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP proxy until Ctrl-C
    Serve {
        /// Listen address, overrides [http] listen
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Show how a request path or URL is routed
    Classify {
        /// Request path such as /rf/tms/group/id/mapConfig.json
        url: String,
    },

    /// List the resources defined by the backend
    Resources,

    /// Prepare one resource in the foreground
    Prepare {
        /// Reference frame id
        reference_frame: String,
        /// Generator type: tms, surface or geodata
        generator_type: String,
        /// Resource group
        group: String,
        /// Resource id within the group
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config;

    let result: Result<(), CliError> = match cli.command {
        Commands::Serve { listen } => serve::run(serve::ServeArgs { config, listen }),
        Commands::Classify { url } => classify::run(classify::ClassifyArgs { config, url }),
        Commands::Resources => resources::run(resources::ResourcesArgs { config }),
        Commands::Prepare {
            reference_frame,
            generator_type,
            group,
            id,
        } => prepare::run(prepare::PrepareArgs {
            config,
            reference_frame,
            generator_type,
            group,
            id,
        }),
    };

    if let Err(e) = result {
        e.exit();
    }
}
