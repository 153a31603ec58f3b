use std::path::PathBuf;

use apiary_model::ids::{CheckpointId, TaskId, TaskTreeId};
use apiary_tasktree::TaskTreeManager;
use apiary_tasktree::TaskTreeSnapshot;
use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub(crate) enum CheckpointCommand {
    /// Create a checkpoint against a saved tree
    Create(CreateArgs),
    /// Roll a saved tree back to a checkpoint
    Rollback(RollbackArgs),
    /// Print a saved tree's checkpoint timeline
    Timeline(TimelineArgs),
}

#[derive(Args, Debug)]
pub(crate) struct CreateArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub tree_id: TaskTreeId,
    pub name: String,
    /// Checkpoint a single task instead of the whole tree
    #[arg(long)]
    pub task: Option<TaskId>,
}

#[derive(Args, Debug)]
pub(crate) struct RollbackArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub tree_id: TaskTreeId,
    pub checkpoint_id: CheckpointId,
}

#[derive(Args, Debug)]
pub(crate) struct TimelineArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub tree_id: TaskTreeId,
}

pub(crate) fn create(args: CreateArgs) -> anyhow::Result<()> {
    let snapshot = TaskTreeSnapshot::load(&args.project, args.tree_id)?;
    let mut trees = TaskTreeManager::new();
    let tree_id = trees.import_tree(snapshot);

    let checkpoint_id = match args.task {
        Some(task_id) => trees.create_task_checkpoint(tree_id, task_id, &args.name, "")?,
        None => trees.create_global_checkpoint(tree_id, &args.name, "")?,
    };

    trees.export_tree(tree_id)?.save(&args.project)?;
    println!("created checkpoint {checkpoint_id}");
    Ok(())
}

pub(crate) fn rollback(args: RollbackArgs) -> anyhow::Result<()> {
    let snapshot = TaskTreeSnapshot::load(&args.project, args.tree_id)?;
    let mut trees = TaskTreeManager::new();
    let tree_id = trees.import_tree(snapshot);

    trees.rollback(tree_id, args.checkpoint_id)?;
    trees.export_tree(tree_id)?.save(&args.project)?;

    let tree = trees.get_tree(tree_id).expect("just rolled back");
    println!("rolled back tree {tree_id} to checkpoint {}", args.checkpoint_id);
    println!("  passed: {}/{}", tree.stats.passed, tree.stats.total);
    Ok(())
}

pub(crate) fn timeline(args: TimelineArgs) -> anyhow::Result<()> {
    let snapshot = TaskTreeSnapshot::load(&args.project, args.tree_id)?;
    let mut trees = TaskTreeManager::new();
    let tree_id = trees.import_tree(snapshot);
    println!("{}", trees.generate_timeline_ascii(tree_id));
    Ok(())
}
