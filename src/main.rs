//! Plan Mode CLI
//!
//! Runs one request end to end against an OpenAI-compatible endpoint and
//! prints every outbound event to stdout as one JSON line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use plan_mode_core::CapabilitySet;
use plan_mode_engine::services::plan_mode::{
    ChannelSink, FixedIntent, LlmInvoker, PlanModeConfig, PlanOrchestrator,
};
use plan_mode_llm::{LlmProvider, OpenAIProvider, ProviderConfig};

#[derive(Parser)]
#[command(name = "plan-mode")]
#[command(author, version, about = "Plan and execute a request step by step", long_about = None)]
struct Cli {
    /// The request to carry out
    request: String,

    /// Model name
    #[arg(short, long, default_value = "gpt-4o")]
    model: String,

    /// Chat-completions endpoint of an OpenAI-compatible server
    #[arg(long)]
    base_url: Option<String>,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Answer directly without planning
    #[arg(long)]
    no_plan: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("plan_mode_engine=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PlanModeConfig::load(path)?,
        None => PlanModeConfig::default(),
    };

    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAIProvider::new(ProviderConfig {
        api_key: std::env::var("OPENAI_API_KEY").ok(),
        base_url: cli.base_url.clone(),
        model: cli.model.clone(),
        ..Default::default()
    }));
    let invoker = Arc::new(LlmInvoker::from_config(provider, &config));

    let (sink, mut outputs) = ChannelSink::new();
    let orchestrator = PlanOrchestrator::from_config(invoker, Arc::new(sink), config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[PlanMode] Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(output) = outputs.recv().await {
            match serde_json::to_string(&output) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("[PlanMode] Could not serialize event: {}", e),
            }
        }
    });

    let intent = if cli.no_plan {
        FixedIntent::Never
    } else {
        FixedIntent::Always
    };
    let state = orchestrator
        .route(&cli.request, &[], &CapabilitySet::new(), &intent, &cancel)
        .await;

    // Dropping the orchestrator closes the sink, which ends the printer.
    drop(orchestrator);
    printer.await?;

    tracing::info!("[PlanMode] Run ended: {}", state);
    Ok(())
}
