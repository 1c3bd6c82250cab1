//! `learnpath chat` - Interactive or single-message chat from the terminal.

use std::io::Write;

use learnpath_config::AppConfig;
use learnpath_core::tool::ToolGateway;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::runtime::Runtime;

pub async fn run(user_id: i64, message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::bootstrap(config).await?;
    let orchestrator = runtime.orchestrator.clone();

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = orchestrator.process_message(user_id, &msg).await;
        eprint!("\r              \r");
        runtime.gateway.close().await;
        println!("{}", result?);
        return Ok(());
    }

    let tool_names: Vec<String> = runtime
        .gateway
        .list_tools()
        .map(|tools| tools.into_iter().map(|t| t.name).collect())
        .unwrap_or_default();

    println!();
    println!("  LearnPath Coach - Interactive Mode");
    println!();
    println!("  Model:     {}", runtime.config.model.name);
    println!("  User:      {user_id}");
    println!("  Tools:     {}", if tool_names.is_empty() { "(none)".to_string() } else { tool_names.join(", ") });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/reset' to start over, 'quit' or 'exit' to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line == "/reset" {
            orchestrator.reset(user_id).await;
            println!("  (conversation cleared)\n");
            continue;
        }

        eprint!("  ...");
        match orchestrator.process_message(user_id, line).await {
            Ok(response) => {
                eprint!("\r     \r");
                println!();
                for line in response.lines() {
                    println!("  Coach > {line}");
                }
                println!();
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    runtime.gateway.close().await;
    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
