//! kwire-cli - Command-line interface for kwire
//!
//! Sends one request per invocation and prints the reply.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use kwire_client::{Client, ConnectionConfig};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kwire-cli")]
#[command(about = "Command-line interface for the kwire Kafka protocol server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9092", env = "KWIRE_SERVER")]
    server: SocketAddr,

    /// Client id sent in request headers
    #[arg(short, long, default_value = "kwire-cli")]
    client_id: String,

    /// Print replies as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the server which API versions it supports
    ApiVersions {
        /// ApiVersions request version
        #[arg(short, long, default_value = "4")]
        version: i16,
    },

    /// Send a header-only request and show the raw reply
    Raw {
        /// API key
        #[arg(short = 'k', long)]
        api_key: i16,

        /// API version
        #[arg(short = 'V', long, default_value = "0")]
        api_version: i16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = ConnectionConfig::new(cli.server).with_client_id(cli.client_id.clone());
    let client = Client::new(config);

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match commands::execute(&client, cli.command, cli.json).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    client.close().await?;
    Ok(())
}
