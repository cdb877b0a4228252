use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use relay_core::{Config, McpClient};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Talk to an MCP server over its SSE transport", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "relay.yaml")]
    config: PathBuf,

    #[arg(short, long, help = "SSE subscription URL (overrides the config file)")]
    url: Option<String>,

    #[arg(short, long, help = "Per-request timeout in milliseconds")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the tools the server exposes")]
    Tools,

    #[command(about = "Call a tool")]
    Call {
        #[arg(help = "Tool name")]
        name: String,

        #[arg(short, long, default_value = "{}", help = "Tool arguments as a JSON object")]
        args: String,
    },

    #[command(about = "Show server info and the announced endpoint")]
    Info,

    #[command(about = "Show the effective configuration")]
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = effective_config(&cli)?;

    if let Commands::Config = cli.command {
        return show_config(&config);
    }

    let client = connect(config).await?;
    let outcome = match cli.command {
        Commands::Tools => list_tools(&client).await,
        Commands::Call { name, args } => call_tool(&client, name, &args).await,
        Commands::Info => show_info(&client),
        Commands::Config => Ok(()),
    };

    client.close().await;
    outcome
}

fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        Config::default()
    };

    if let Some(url) = &cli.url {
        config.server.url = url.clone();
    }
    if let Some(timeout) = cli.timeout {
        config = config.with_request_timeout(Duration::from_millis(timeout));
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Connect and wait for the handshake to finish.
async fn connect(config: Config) -> Result<McpClient> {
    let url = config.server.url.clone();
    let client = McpClient::connect(config).context("Failed to create client")?;

    println!("{} Connecting to {}...", "→".blue(), url);
    if let Err(e) = client.wait_for_ready().await {
        client.close().await;
        return Err(e).context("MCP server did not become ready");
    }

    Ok(client)
}

async fn list_tools(client: &McpClient) -> Result<()> {
    let tools = client.get_methods().await.context("tools/list failed")?;

    if tools.is_empty() {
        println!("{}", "Server exposes no tools".yellow());
        return Ok(());
    }

    println!("{}", "Available tools:".bold().green());
    println!();
    for tool in tools {
        println!("  {} {}", "•".cyan(), tool.name.bold());
        if let Some(description) = &tool.description {
            println!("      {}", description);
        }
        let required = tool.required_arguments();
        if !required.is_empty() {
            println!("      required: {}", required.join(", ").cyan());
        }
    }

    Ok(())
}

async fn call_tool(client: &McpClient, name: String, args: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args is not valid JSON")?;
    let result = client
        .call_method(&name, arguments)
        .await
        .with_context(|| format!("tools/call {} failed", name))?;

    if result.is_error == Some(true) {
        println!("{} {} reported an error:", "✗".red().bold(), name.cyan());
    } else {
        println!("{} {}:", "✓".green().bold(), name.cyan());
    }
    println!("{}", serde_json::to_string_pretty(&result.content)?);

    Ok(())
}

fn show_info(client: &McpClient) -> Result<()> {
    println!("{}", "Connection:".bold().green());
    println!();
    if let Some(server) = client.server_info() {
        println!("  Server:    {} {}", server.name.cyan(), server.version);
    }
    if let Some(init) = client.initialize_result() {
        println!("  Protocol:  {}", init.protocol_version);
        if let Some(instructions) = &init.instructions {
            println!("  Notes:     {}", instructions);
        }
    }
    if let Some(endpoint) = client.endpoint() {
        println!("  Endpoint:  {}", endpoint);
    }
    let client_info = client.client_info();
    println!("  Client:    {} {}", client_info.name, client_info.version);

    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "Server:".bold());
    println!("  URL:              {}", config.server.url.cyan());
    for name in config.server.headers.keys() {
        println!("  Header:           {}", name);
    }
    println!();
    println!("{}", "Client:".bold());
    println!("  Name:             {}", config.client.name);
    println!("  Version:          {}", config.client.version);
    println!("  Protocol version: {}", config.client.protocol_version);
    println!();
    println!("{}", "Timeouts:".bold());
    println!("  Request:          {} ms", config.timeouts.request_ms);
    println!("  Ready:            {} ms", config.timeouts.ready_ms);

    Ok(())
}
