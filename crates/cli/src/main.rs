//! LearnPath CLI - the main entry point.
//!
//! Commands:
//! - `serve`  - Connect the tool server, start the batch agent, serve HTTP
//! - `chat`   - Interactive terminal chat or single-message mode
//! - `batch`  - Run the weekly summary batch now
//! - `tools`  - Print the tool catalog
//! - `init`   - Write a default config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "learnpath",
    about = "LearnPath - a learning coach backed by Claude and MCP tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and the scheduled batch agent
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the coach from the terminal
    Chat {
        /// User id to chat as
        #[arg(short, long, default_value_t = 1)]
        user: i64,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run the weekly summary batch once, now
    Batch {
        /// Only summarize this user
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Connect to the tool server and list its tools
    Tools,

    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat { user, message } => commands::chat::run(user, message).await?,
        Commands::Batch { user } => commands::batch::run(user).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Init => commands::init::run().await?,
    }

    Ok(())
}
