use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use ralph_research_lib::{
    CancellationToken, Coordinator, HuntRequest, HuntResult, Hunter, HunterRegistry,
    ResearchConfigManager, StaleEventFilter, TopicConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Research run harness - drives a research run from a YAML plan with canned hunters
#[derive(Parser, Debug)]
#[command(name = "research-run")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML run plan
    #[arg(long)]
    plan: PathBuf,

    /// Project directory holding .ralph-ui/research.yaml
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Cancel the run after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,
}

/// A research run described in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunPlan {
    project_id: String,
    #[serde(default)]
    topics: Vec<TopicConfig>,
    hunters: Vec<CannedHunterSpec>,
    /// Names requested for the run; defaults to every hunter in the plan
    #[serde(default)]
    run_hunters: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CannedHunterSpec {
    name: String,
    #[serde(default)]
    sources: usize,
    #[serde(default)]
    insights: usize,
    #[serde(default)]
    delay_ms: u64,
    /// When set, the hunter fails with this message
    #[serde(default)]
    fail: Option<String>,
}

/// Hunter returning a fixed result after a delay
struct CannedHunter {
    spec: CannedHunterSpec,
}

#[async_trait]
impl Hunter for CannedHunter {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn hunt(&self, cancel: CancellationToken, request: HuntRequest) -> Result<HuntResult> {
        log::debug!(
            "Canned hunter '{}' received {} queries ({} mode)",
            self.spec.name,
            request.queries.len(),
            request.mode
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("cancelled")),
            _ = tokio::time::sleep(Duration::from_millis(self.spec.delay_ms)) => {}
        }

        if let Some(message) = &self.spec.fail {
            return Err(anyhow!("{}", message));
        }

        Ok(HuntResult {
            sources_collected: self.spec.sources.min(request.max_results),
            insights_created: self.spec.insights,
        })
    }
}

fn load_plan(path: &Path) -> Result<RunPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run plan {}", path.display()))?;
    serde_yaml::from_str(&content).context("Failed to parse run plan")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let cli = Cli::parse();
    let plan = load_plan(&cli.plan)?;
    let config = ResearchConfigManager::new(&cli.project_dir).read()?;

    let registry = HunterRegistry::new();
    for spec in &plan.hunters {
        registry.register(Box::new(CannedHunter { spec: spec.clone() }));
    }

    let coordinator = Coordinator::with_config(Arc::new(registry), config);
    let mut events = coordinator.subscribe();

    let hunter_names = plan
        .run_hunters
        .clone()
        .unwrap_or_else(|| plan.hunters.iter().map(|h| h.name.clone()).collect());

    let root = CancellationToken::new();
    let run = coordinator.start_run(&root, &plan.project_id, hunter_names, plan.topics.clone())?;

    if let Some(ms) = cli.cancel_after_ms {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            coordinator.cancel_active_run("cancelled from command line");
        });
    }

    let mut filter = StaleEventFilter::new();
    while let Some(event) = events.recv().await {
        if !filter.accept(&event) {
            continue;
        }

        let line = serde_json::json!({
            "event": event.event_name(),
            "payload": &event,
        });
        println!("{}", line);

        if event.is_terminal() && event.run_id() == run.id() {
            break;
        }
    }

    if run.is_cancelled() {
        log::info!("Run {} was cancelled", run.id());
    } else {
        log::info!(
            "Run {} finished with {} findings",
            run.id(),
            run.total_findings()
        );
    }
    eprintln!("{}", serde_json::to_string_pretty(&run.summary())?);

    Ok(())
}
