//! Wiring shared by `serve`, `chat` and `batch`.

use std::sync::Arc;
use std::time::Duration;

use learnpath_agent::{OrchestratorSettings, TurnOrchestrator};
use learnpath_config::AppConfig;
use learnpath_conversation::{CompactionPolicy, ConversationStore, ProviderSummarizer};
use learnpath_core::event::EventBus;
use learnpath_core::provider::Provider;
use learnpath_providers::AnthropicProvider;
use learnpath_tools::{McpGateway, RetryPolicy, acquire_gateway};
use tracing::{info, warn};

/// Everything a command needs to run turns.
pub struct Runtime {
    pub config: AppConfig,
    pub event_bus: Arc<EventBus>,
    pub gateway: Arc<McpGateway>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

impl Runtime {
    /// Load config, connect the tool server and build the orchestrator.
    pub async fn bootstrap(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let Some(api_key) = config.api_key.clone() else {
            eprintln!();
            eprintln!("  ERROR: No API key configured!");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
            eprintln!("    LEARNPATH_API_KEY=sk-ant-...");
            eprintln!();
            eprintln!("  Or add it to your config file:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            return Err("No API key found. See above for setup instructions.".into());
        };

        let provider: Arc<dyn Provider> = Arc::new(
            AnthropicProvider::new(api_key)
                .with_base_url(&config.model.api_url)
                .with_timeout(Duration::from_secs(config.orchestrator.model_timeout_secs)),
        );
        let gateway = connect_tools(&config).await?;
        let event_bus = Arc::new(EventBus::default());
        let orchestrator = Arc::new(build_orchestrator(
            &config,
            provider,
            gateway.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            config,
            event_bus,
            gateway,
            orchestrator,
        })
    }
}

/// Connect to the tool server with retries.
///
/// When every attempt fails and `bootstrap.exit_on_failure` is off, an
/// unconnected gateway is returned and the caller runs degraded.
pub async fn connect_tools(
    config: &AppConfig,
) -> Result<Arc<McpGateway>, Box<dyn std::error::Error>> {
    let timeout = Duration::from_secs(config.tool_server.request_timeout_secs);
    let policy = RetryPolicy::from(&config.bootstrap);

    info!(url = %config.tool_server.url, "Connecting to tool server");
    match acquire_gateway(McpGateway::with_timeout(&config.tool_server.url, timeout), &policy).await {
        Ok(gateway) => Ok(Arc::new(gateway)),
        Err(e) if config.bootstrap.exit_on_failure => {
            Err(format!("Could not connect to tool server at {}: {e}", config.tool_server.url).into())
        }
        Err(e) => {
            warn!(error = %e, "Continuing without tools; chat requests will be rejected");
            Ok(Arc::new(McpGateway::with_timeout(&config.tool_server.url, timeout)))
        }
    }
}

/// Build the store and orchestrator from config.
pub fn build_orchestrator(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    gateway: Arc<McpGateway>,
    event_bus: Arc<EventBus>,
) -> TurnOrchestrator {
    let summarizer = Arc::new(ProviderSummarizer::new(
        provider.clone(),
        config.model.name.clone(),
        config.model.summary_max_tokens,
    ));
    let compaction = CompactionPolicy::new(config.conversation.compaction_threshold, summarizer)
        .with_events(event_bus.clone());
    let store = Arc::new(ConversationStore::new(
        config.conversation.system_directive.clone(),
        compaction,
    ));

    TurnOrchestrator::new(provider, gateway, store, event_bus)
        .with_settings(OrchestratorSettings::from(config))
}
