use std::path::PathBuf;
use std::sync::Arc;

use apiary_blueprint::BlueprintManager;
use apiary_gate::PermissiveValidator;
use apiary_model::blueprint::BlueprintStatus;
use apiary_model::ids::BlueprintId;
use apiary_tasktree::DefaultAcceptanceTestGenerator;
use apiary_queen::{Queen, QueenConfig, TracingObserver};
use clap::{Args, Subcommand};

use crate::config::AppConfig;
use crate::stub_executor::StubPhaseExecutor;

#[derive(Subcommand, Debug)]
pub(crate) enum QueenCommand {
    /// Run the coordinator main loop until the tree completes or Ctrl-C
    Run(RunArgs),
    /// Run a single coordinator tick against a fresh or previously saved tree
    Tick(RunArgs),
    /// Stop a running coordinator
    Stop,
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub blueprint_id: BlueprintId,
    /// Upper bound on the number of ticks `run` will perform before giving up
    #[arg(long, default_value_t = 10_000)]
    pub max_ticks: u32,
}

fn build_queen(project: &std::path::Path, settings: &crate::config::QueenSettings, blueprint_id: BlueprintId) -> Arc<Queen> {
    let mut config = QueenConfig::new(project.to_path_buf());
    config.max_concurrent_workers = settings.max_concurrent_workers;
    config.worker_timeout_ms = settings.worker_timeout_ms;
    config.main_loop_interval_ms = settings.main_loop_interval_ms;
    config.test_framework.clone_from(&settings.test_framework);
    config.test_directory.clone_from(&settings.test_directory);

    Arc::new(Queen::new(
        config,
        blueprint_id,
        Box::new(StubPhaseExecutor),
        Box::new(TracingObserver),
        Box::new(PermissiveValidator),
    ))
}

async fn load_approved_blueprint(project: &std::path::Path, id: BlueprintId) -> anyhow::Result<apiary_model::blueprint::Blueprint> {
    let mut mgr = BlueprintManager::new();
    let blueprint = mgr.load(project, id)?.clone();
    if blueprint.status != BlueprintStatus::Approved {
        anyhow::bail!("blueprint {} is {:?}, not approved", blueprint.id, blueprint.status);
    }
    Ok(blueprint)
}

pub(crate) async fn run(args: RunArgs) -> anyhow::Result<()> {
    let settings = AppConfig::load(&args.project)?.queen;
    let blueprint = load_approved_blueprint(&args.project, args.blueprint_id).await?;

    let queen = build_queen(&args.project, &settings, blueprint.id);
    queen.initialize(&blueprint, &DefaultAcceptanceTestGenerator).await;

    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted; stopping after current tick");
                break;
            }
            result = queen.tick() => {
                result?;
                ticks += 1;
            }
        }

        let done = queen.export_tree().await.map(|s| s.tree.stats.passed == s.tree.stats.total && s.tree.stats.total > 0).unwrap_or(false);
        if done || ticks >= args.max_ticks {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(settings.main_loop_interval_ms)).await;
    }

    let snapshot = queen.export_tree().await?;
    let passed = snapshot.tree.stats.passed == snapshot.tree.stats.total && snapshot.tree.stats.total > 0;
    snapshot.save(&args.project)?;

    println!("ran {ticks} tick(s); tree {}: {}/{} tasks passed", snapshot.tree.id, snapshot.tree.stats.passed, snapshot.tree.stats.total);
    if !passed {
        anyhow::bail!("task tree did not complete");
    }
    Ok(())
}

/// Advances a single coordinator tick: a one-shot CLI has no background
/// daemon to attach a running session to, so this initializes a fresh tree
/// (like `run`) rather than resuming one — useful for stepping through the
/// assignment/regression-gate pipeline one tick at a time.
pub(crate) async fn tick(args: RunArgs) -> anyhow::Result<()> {
    let settings = AppConfig::load(&args.project)?.queen;
    let blueprint = load_approved_blueprint(&args.project, args.blueprint_id).await?;

    let queen = build_queen(&args.project, &settings, blueprint.id);
    queen.initialize(&blueprint, &DefaultAcceptanceTestGenerator).await;
    queen.tick().await?;

    let snapshot = queen.export_tree().await?;
    snapshot.save(&args.project)?;
    println!("tree {}: {}/{} tasks passed", snapshot.tree.id, snapshot.tree.stats.passed, snapshot.tree.stats.total);
    Ok(())
}

pub(crate) fn stop() -> anyhow::Result<()> {
    println!("apiary has no background daemon; press Ctrl-C in an active `queen run` to stop it");
    Ok(())
}
