//! Gmail Reader MCP - Rust Implementation
//!
//! Runs the read-only Gmail MCP server on stdio, performs the one-time OAuth
//! authorization, or queries a freshly spawned server from the command line.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use gmail_reader_mcp::config::Config;
use gmail_reader_mcp::error::Result;
use gmail_reader_mcp::gmail::auth::Authenticator;
use gmail_reader_mcp::gmail::service::MailService;
use gmail_reader_mcp::gmail::types::ToolPayload;
use gmail_reader_mcp::mcp::client::GmailMcpClient;
use gmail_reader_mcp::mcp::server::McpServer;

/// Gmail Reader MCP
#[derive(Parser)]
#[command(name = "gmail-reader-mcp")]
#[command(author, version, about = "Gmail Reader MCP - read-only Gmail tools over the Model Context Protocol")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the tools on stdin/stdout (default)
    Serve,

    /// Authorize Gmail access in the browser (run this first)
    Auth {
        /// Port for the local OAuth callback listener
        #[arg(long)]
        port: Option<u16>,
    },

    /// Spawn a server and call one tool, printing the JSON result
    Query {
        #[command(subcommand)]
        tool: QueryTool,
    },
}

#[derive(Subcommand)]
enum QueryTool {
    /// Most recent emails
    Recent {
        #[arg(short, long, default_value_t = 5)]
        count: u32,
    },

    /// Unread emails
    Unread {
        #[arg(short, long, default_value_t = 10)]
        count: u32,
    },

    /// Search with Gmail query syntax
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        count: u32,
    },

    /// Full details of one email
    Details { message_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Auth { port } => {
            if let Some(port) = port {
                config.set_callback_port(port);
            }
            if !config.oauth_keys_exist() && !config.find_and_copy_oauth_keys()? {
                eprintln!("Error: OAuth client secret file not found.");
                eprintln!(
                    "Please place credentials.json in the current directory or at {}",
                    config.oauth_path.display()
                );
                std::process::exit(1);
            }

            let authenticator = Authenticator::new(config);
            authenticator.authenticate_interactive().await?;
            eprintln!(
                "Authentication completed successfully! Token saved to {}",
                authenticator.config().credentials_path.display()
            );
            Ok(())
        }
        Commands::Query { tool } => run_query(&config, tool).await,
    }
}

async fn run_server(config: Config) -> Result<()> {
    if !config.credentials_exist() && !config.interactive_auth {
        tracing::warn!(
            "No token at {}; tool calls will fail until `gmail-reader-mcp auth` is run",
            config.credentials_path.display()
        );
    }

    let service = Arc::new(MailService::new(config));
    let mut server = McpServer::new(service)?;
    tracing::info!("Gmail reader MCP server listening on stdio");
    server.run_stdio().await
}

async fn run_query(config: &Config, tool: QueryTool) -> Result<()> {
    let client = GmailMcpClient::from_config(config)?;
    let outcome = query_once(&client, &tool).await;
    client.disconnect().await;

    let payload = outcome.unwrap_or_else(|e| ToolPayload::from_failure(&e));
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if payload.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

async fn query_once(client: &GmailMcpClient, tool: &QueryTool) -> Result<ToolPayload> {
    client.connect().await?;
    match tool {
        QueryTool::Recent { count } => client.get_recent_emails(*count).await,
        QueryTool::Unread { count } => client.get_unread_emails(*count).await,
        QueryTool::Search { query, count } => client.search_emails(query, *count).await,
        QueryTool::Details { message_id } => client.get_email_details(message_id).await,
    }
}
