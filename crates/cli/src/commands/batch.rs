//! `learnpath batch` - run the weekly summary batch immediately.

use std::sync::Arc;

use learnpath_config::AppConfig;
use learnpath_core::tool::ToolGateway;
use learnpath_workflow::{BatchAgent, LogSink};

use super::runtime::Runtime;

pub async fn run(user: Option<i64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::bootstrap(config).await?;

    let agent = BatchAgent::from_config(
        &runtime.config.batch,
        runtime.orchestrator.clone(),
        runtime.event_bus.clone(),
    )?
    .with_sink(Arc::new(LogSink));

    let outcome = match user {
        Some(user_id) => match agent.run_for(user_id).await {
            Ok(summary) => {
                println!("{}", summary.summary);
                Ok(())
            }
            Err(e) => Err(format!("Batch run failed for user {user_id}: {e}")),
        },
        None => match agent.run_once().await {
            Some(report) if report.users == 0 => {
                println!("No users to summarize. Add some under [batch] users in config.toml.");
                Ok(())
            }
            Some(report) => {
                println!(
                    "Summarized {} users ({} failed) in {} ms",
                    report.users, report.failures, report.duration_ms
                );
                Ok(())
            }
            None => Err("A batch run is already in progress".to_string()),
        },
    };

    runtime.gateway.close().await;
    outcome.map_err(Into::into)
}
