//! Example: list a server's tools and call the first one
//!
//! Start any MCP server that speaks the SSE transport, then run:
//!
//! ```text
//! RUST_LOG=relay_core=debug cargo run --example list_and_call -- http://127.0.0.1:8881/sse
//! ```

use relay::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| Config::load_or_default().server.url);
    let client = McpClient::connect(Config::new(url))?;

    println!("Connecting to MCP server...");
    client.wait_for_ready().await?;
    if let Some(server) = client.server_info() {
        println!("Connected to {} {}", server.name, server.version);
    }

    let tools = client.get_methods().await?;
    println!("Available tools:");
    for tool in &tools {
        println!("  - {}", tool.name);
    }

    if let Some(first) = tools.first() {
        println!("Calling tool: {}", first.name);
        let result = client.call_method(&first.name, serde_json::json!({})).await?;
        println!("Result: {}", result.content);
    }

    client.close().await;
    Ok(())
}
