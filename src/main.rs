use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use action_orchestrator::collaborators::StaticPlanner;
use action_orchestrator::handlers::dry_run_registry;
use action_orchestrator::state::{Action, ApprovalPayload, Decisions, Intent};
use action_orchestrator::store::{CheckpointStore, LibSqlCheckpointStore, MemoryCheckpointStore};
use action_orchestrator::{Orchestrator, OrchestratorConfig, RunStatus};

/// A plan file: the user's request and the actions proposed for it.
#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default = "default_message")]
    message: String,
    #[serde(default)]
    intent: Intent,
    actions: Vec<Action>,
}

fn default_message() -> String {
    "Run the attached plan".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(plan_path) = args.next() else {
        bail!("usage: action-orchestrator <plan.json> [thread-id]");
    };
    let thread_id = args
        .next()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let plan = load_plan(Path::new(&plan_path)).await?;
    let config = OrchestratorConfig::from_env()?;

    let store: Arc<dyn CheckpointStore> = match &config.db_path {
        Some(path) => Arc::new(LibSqlCheckpointStore::new_local(path).await?),
        None => Arc::new(MemoryCheckpointStore::new()),
    };

    eprintln!("action-orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Thread: {thread_id}");
    eprintln!("   Actions: {}", plan.actions.len());
    eprintln!("   Safe mode: {}", config.approval_enabled);

    let planner = StaticPlanner::new(plan.actions).with_intent(plan.intent);
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(dry_run_registry()),
        Arc::new(planner),
        store,
    );

    // A thread left suspended by an earlier invocation is resumed, not rerun.
    let suspended = orchestrator
        .state(&thread_id)
        .await?
        .and_then(|state| state.interrupt)
        .map(|interrupt| interrupt.payload().clone());
    let mut status = match suspended {
        Some(payload) => RunStatus::PendingApproval { payload },
        None => orchestrator.run(&thread_id, plan.message).await?,
    };

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let RunStatus::PendingApproval { payload } = &status {
        let decisions = prompt_decisions(payload, &mut lines).await?;
        status = orchestrator.resume(&thread_id, decisions).await?;
    }

    if let RunStatus::Complete { result } = status {
        println!("{}", result.response);
        println!("{}", serde_json::to_string_pretty(&result.summary)?);
    }
    Ok(())
}

async fn load_plan(path: &Path) -> anyhow::Result<PlanFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Ask y/n for each preview. Anything but "y"/"yes" rejects; EOF rejects the rest.
async fn prompt_decisions<R>(
    payload: &ApprovalPayload,
    lines: &mut tokio::io::Lines<R>,
) -> anyhow::Result<Decisions>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    let mut decisions = Decisions::new();

    for preview in &payload.previews {
        let prompt = format!("[{}] {}: approve? [y/N] ", preview.action_id, preview.summary);
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let answer = lines.next_line().await?.unwrap_or_default();
        let approved = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        decisions.insert(preview.action_id.clone(), approved);
    }
    Ok(decisions)
}
