//! `learnpath serve` - HTTP gateway plus the scheduled batch agent.

use std::sync::Arc;

use learnpath_config::AppConfig;
use learnpath_core::tool::ToolGateway;
use learnpath_gateway::AppState;
use learnpath_workflow::{BatchAgent, LatestSummaries, LogSink};
use tracing::info;

use super::runtime::Runtime;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let runtime = Runtime::bootstrap(config).await?;
    let config = &runtime.config;
    let summaries = Arc::new(LatestSummaries::new());

    println!("LearnPath Gateway");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Tool server: {}", config.tool_server.url);
    println!("   Model:       {}", config.model.name);

    let batch = if config.batch.enabled {
        let agent = BatchAgent::from_config(
            &config.batch,
            runtime.orchestrator.clone(),
            runtime.event_bus.clone(),
        )?
        .with_sink(summaries.clone())
        .with_sink(Arc::new(LogSink));
        println!("   Batch:       {} (UTC)", agent.schedule().as_str());
        Some(Arc::new(agent).start())
    } else {
        println!("   Batch:       disabled");
        None
    };

    let state = Arc::new(AppState {
        orchestrator: runtime.orchestrator.clone(),
        summaries,
    });

    learnpath_gateway::start(state, &config.gateway, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await?;

    if let Some(handle) = batch {
        handle.stop().await;
    }
    runtime.gateway.close().await;

    Ok(())
}
