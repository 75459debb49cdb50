//! Main entry point for the docweave CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docweave::cli::commands::{self, Commands};

/// docweave - structure-preserving document translator
#[derive(Parser, Debug)]
#[command(name = "docweave", version, about, long_about = None)]
struct Args {
    /// API key for the translation backend (defaults to TRANSLATOR_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", env!("CARGO_CRATE_NAME"), log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Override config with CLI args if provided
    if let Some(api_key) = args.api_key {
        std::env::set_var("TRANSLATOR_API_KEY", api_key);
    }

    match args.command {
        Some(Commands::Translate {
            file,
            output,
            source_lang,
            target_lang,
            recursive,
        }) => {
            commands::handle_translate(file, output, source_lang, target_lang, recursive).await?;
        }
        Some(Commands::Text {
            text,
            source_lang,
            target_lang,
        }) => {
            commands::handle_text(text, source_lang, target_lang).await?;
        }
        Some(Commands::Languages) => commands::handle_languages(),
        Some(Commands::Server { host, port }) => {
            commands::handle_server(host, port).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
