//! `learnpath tools` - print the tool server's catalog.

use learnpath_config::AppConfig;
use learnpath_core::tool::ToolGateway;

use super::runtime::connect_tools;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    // Listing is useless without a connection
    config.bootstrap.exit_on_failure = true;

    let gateway = connect_tools(&config).await?;
    let tools = gateway.list_tools()?;

    println!("Tools at {} ({}):", gateway.endpoint(), tools.len());
    for tool in &tools {
        println!();
        println!("  {}", tool.name);
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
        if let Some(required) = tool.input_schema.get("required").and_then(|r| r.as_array()) {
            let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
            println!("    required: {}", names.join(", "));
        }
    }

    gateway.close().await;
    Ok(())
}
