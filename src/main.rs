//! figma-rest-mcp - MCP server for the Figma REST API with a sandboxed query evaluator

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use figma_rest_mcp::config::Config;
use figma_rest_mcp::figma::{normalize_file_key, FigmaApi, FigmaClient};
use figma_rest_mcp::http::{self, AuthConfig};
use figma_rest_mcp::mcp::FigmaServer;
use figma_rest_mcp::query::QueryEngine;
use figma_rest_mcp::types::FileResponse;

#[derive(Parser)]
#[command(name = "figma-rest-mcp")]
#[command(about = "MCP server for the Figma REST API with a sandboxed query evaluator")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (stdio mode for desktop clients)
    Mcp,

    /// Start the MCP server over streamable HTTP at /mcp
    Serve {
        /// Port to listen on (default: config or 4202)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a query once and print the result payload
    Query {
        /// `<file_key> <query>`, or only `<query>` together with --document
        #[arg(required = true, num_args = 1..=2, value_name = "ARGS")]
        args: Vec<String>,

        /// Query a local file response (`{"name": ..., "document": ...}`) instead of Figma
        #[arg(short, long)]
        document: Option<PathBuf>,
    },

    /// List the registered MCP tools
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout belongs to the stdio transport
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("figma_rest_mcp={},query=info,tower_http=debug", log_level).into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load config (defaults, file, .env, environment)
    let config = Config::load(cli.config.as_deref())?;
    let engine = QueryEngine::new(&config.query);

    match cli.command {
        Commands::Mcp => {
            config.validate()?;
            let server = build_server(&config, engine)?;

            tracing::info!("Starting MCP server (stdio mode)");
            figma_rest_mcp::mcp::server::serve_stdio(server).await?;
        }

        Commands::Serve { port } => {
            config.validate()?;
            let port = port.unwrap_or(config.server.port);
            let server = build_server(&config, engine)?;

            tracing::info!("Starting MCP server (HTTP mode) on port {}", port);
            eprintln!("Figma MCP server running at http://localhost:{}/mcp", port);
            eprintln!("  Health:   http://localhost:{}/health", port);

            http::serve(server, AuthConfig::new(config.server.auth_token.clone()), port).await?;
        }

        Commands::Query { args, document } => {
            let (file_key, query) = match args.as_slice() {
                [query] => (None, query.clone()),
                [file_key, query] => (Some(file_key.clone()), query.clone()),
                _ => anyhow::bail!("expected <file_key> <query>"),
            };

            let (file, file_key) = match document {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    let file: FileResponse = serde_json::from_str(&content)?;
                    let key = file_key.map(|k| normalize_file_key(&k)).unwrap_or_else(|| {
                        path.file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    });
                    (file, key)
                }
                None => {
                    let Some(file_key) = file_key else {
                        anyhow::bail!("a file key is required unless --document is given");
                    };
                    config.validate()?;
                    let key = normalize_file_key(&file_key);
                    let client = FigmaClient::new(&config.figma)?;
                    (client.file(&key, None).await?, key)
                }
            };

            let response = engine.query_file(file, &file_key, &query).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Tools => {
            // Listing needs no credentials
            let client = FigmaClient::new(&config.figma)?;
            let server = FigmaServer::new(Arc::new(client), engine);
            for tool in server.tools() {
                let description = tool.description.as_deref().unwrap_or_default();
                let summary = description.lines().next().unwrap_or_default();
                println!("• {}: {}", tool.name, summary);
            }
        }
    }

    Ok(())
}

fn build_server(config: &Config, engine: QueryEngine) -> anyhow::Result<FigmaServer> {
    let client = FigmaClient::new(&config.figma)?;
    Ok(FigmaServer::new(Arc::new(client), engine))
}
