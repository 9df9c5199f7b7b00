use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pantry_agent::reasoner::OpenAiReasoner;
use pantry_agent::{AgentConfig, AgentService};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(author, version, about = "LLM-driven pantry assistant", long_about = None)]
struct Cli {
    /// Override the database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the reasoner model for this invocation
    #[arg(long, global = true)]
    model: Option<String>,

    /// Override the reflection cycle cap
    #[arg(long, global = true)]
    max_reflections: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to the agent
    Ask {
        /// The message text
        message: String,

        /// Seed demo rows into an empty database first
        #[arg(long)]
        seed: bool,
    },
    /// Ingest a document into the store
    Ingest {
        /// Path of the file to ingest
        file: PathBuf,

        /// Optional human-readable description
        #[arg(long)]
        description: Option<String>,
    },
    /// Keyword search over ingested documents
    Search {
        query: String,

        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Show recent conversation history
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // Structured errors so shells and wrappers can parse failures
        eprintln!("{}", json!({ "error": e.to_string() }));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AgentConfig::from_env()?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(cap) = cli.max_reflections {
        config.max_reflections = cap;
    }

    let reasoner = Arc::new(OpenAiReasoner::new(
        config.api_base.clone(),
        config.api_key.clone(),
        config.model.clone(),
    ));
    let service = AgentService::new(&config, reasoner.clone(), reasoner)?;

    match cli.command {
        Command::Ask { message, seed } => {
            if seed {
                service.store().seed_demo_data()?;
            }
            let reply = service.handle_message(&message, cli.model).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Ingest { file, description } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let content = std::fs::read(&file)?;
            let receipt = service.ingest_document(&filename, &content, description)?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Command::Search { query, top_k } => {
            let matches = service.search_documents(&query, top_k)?;
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        Command::History { limit } => {
            let exchanges = service.history(limit)?;
            println!("{}", serde_json::to_string_pretty(&exchanges)?);
        }
    }

    Ok(())
}
