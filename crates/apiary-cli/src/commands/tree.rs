use std::path::PathBuf;

use apiary_blueprint::BlueprintManager;
use apiary_model::blueprint::BlueprintStatus;
use apiary_model::ids::{BlueprintId, TaskTreeId};
use apiary_tasktree::{DefaultAcceptanceTestGenerator, TaskTreeManager, TaskTreeSnapshot};
use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub(crate) enum TreeCommand {
    /// Derive a task tree from an approved blueprint
    Generate(GenerateArgs),
    /// Print a previously generated tree's progress
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub(crate) struct GenerateArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub blueprint_id: BlueprintId,
}

#[derive(Args, Debug)]
pub(crate) struct StatusArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub tree_id: TaskTreeId,
}

pub(crate) fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let mut blueprints = BlueprintManager::new();
    let blueprint = blueprints.load(&args.project, args.blueprint_id)?;
    if blueprint.status != BlueprintStatus::Approved {
        anyhow::bail!("blueprint {} is {:?}, not approved", blueprint.id, blueprint.status);
    }

    let mut trees = TaskTreeManager::new();
    let tree_id = trees.generate_from_blueprint(blueprint, &DefaultAcceptanceTestGenerator);
    let snapshot = trees.export_tree(tree_id)?;
    snapshot.save(&args.project)?;

    let tree = trees.get_tree(tree_id).expect("just generated");
    println!("generated task tree {tree_id}");
    println!("  tasks: {}", tree.stats.total);
    Ok(())
}

pub(crate) fn status(args: StatusArgs) -> anyhow::Result<()> {
    let snapshot = TaskTreeSnapshot::load(&args.project, args.tree_id)?;
    let mut trees = TaskTreeManager::new();
    let tree_id = trees.import_tree(snapshot);
    let tree = trees.get_tree(tree_id).expect("just imported");

    println!("task tree {tree_id}");
    println!("  total:    {}", tree.stats.total);
    println!("  pending:  {}", tree.stats.pending);
    println!("  running:  {}", tree.stats.running);
    println!("  passed:   {}", tree.stats.passed);
    println!("  failed:   {}", tree.stats.failed);
    println!("  progress: {:.1}%", tree.stats.progress_percent);
    for leaf in tree.leaves() {
        println!("  - {:?} {} ({})", leaf.status, leaf.name, leaf.id);
    }
    Ok(())
}
