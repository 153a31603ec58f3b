use std::path::PathBuf;

use apiary_blueprint::BlueprintManager;
use apiary_model::blueprint::{BusinessProcess, Module, ModuleType};
use apiary_model::ids::BlueprintId;
use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub(crate) enum BlueprintCommand {
    /// Create a new blueprint draft for a project
    New(NewArgs),
    /// Submit for review and approve a blueprint
    Approve(ApproveArgs),
    /// Reject a blueprint back to draft
    Reject(RejectArgs),
    /// Print a blueprint's current state
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub(crate) struct NewArgs {
    /// Project directory the blueprint belongs to
    #[arg(long)]
    pub project: PathBuf,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub description: String,
    /// Module name; repeat for more than one module
    #[arg(long = "module")]
    pub modules: Vec<String>,
    /// Business process name; repeat for more than one process
    #[arg(long = "process")]
    pub processes: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct ApproveArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub id: BlueprintId,
    #[arg(long)]
    pub approver: String,
}

#[derive(Args, Debug)]
pub(crate) struct RejectArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub id: BlueprintId,
    #[arg(long)]
    pub reason: String,
}

#[derive(Args, Debug)]
pub(crate) struct ShowArgs {
    #[arg(long)]
    pub project: PathBuf,
    pub id: BlueprintId,
}

pub(crate) fn new(args: NewArgs) -> anyhow::Result<()> {
    let mut mgr = BlueprintManager::new();
    let blueprint = mgr.create(&args.name, &args.description, args.project.display().to_string())?;
    let id = blueprint.id;

    for process_name in &args.processes {
        mgr.add_process(id, BusinessProcess::new(process_name, format!("process {process_name}")).with_step("run", "execute the process"))?;
    }
    for module_name in &args.modules {
        mgr.add_module(id, Module::new(module_name, ModuleType::Backend).with_responsibilities(vec![format!("implement {module_name}")]))?;
    }

    mgr.save(&args.project, id)?;
    println!("created blueprint {id} ({})", args.name);
    Ok(())
}

pub(crate) fn show(args: ShowArgs) -> anyhow::Result<()> {
    let mut mgr = BlueprintManager::new();
    let blueprint = mgr.load(&args.project, args.id)?;
    println!("blueprint {}", blueprint.id);
    println!("  name:        {}", blueprint.name);
    println!("  status:      {:?}", blueprint.status);
    println!("  version:     {}", blueprint.version);
    println!("  modules:     {}", blueprint.modules.len());
    println!("  processes:   {}", blueprint.business_processes.len());
    if let Some(task_tree_id) = blueprint.task_tree_id {
        println!("  task tree:   {task_tree_id}");
    }
    Ok(())
}

pub(crate) fn approve(args: ApproveArgs) -> anyhow::Result<()> {
    let mut mgr = BlueprintManager::new();
    mgr.load(&args.project, args.id)?;

    let validation = mgr.submit_for_review(args.id)?;
    if !validation.valid {
        anyhow::bail!("blueprint failed validation: {}", validation.errors.join("; "));
    }
    mgr.approve(args.id, &args.approver)?;
    mgr.save(&args.project, args.id)?;
    println!("blueprint {} approved by {}", args.id, args.approver);
    Ok(())
}

pub(crate) fn reject(args: RejectArgs) -> anyhow::Result<()> {
    let mut mgr = BlueprintManager::new();
    mgr.load(&args.project, args.id)?;

    mgr.submit_for_review(args.id)?;
    mgr.reject(args.id, &args.reason)?;
    mgr.save(&args.project, args.id)?;
    println!("blueprint {} rejected: {}", args.id, args.reason);
    Ok(())
}
