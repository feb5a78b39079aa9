//! The `plan` subcommand: run the assignment engine over a task file.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tracing::{info, warn};

use taflex_manager::{AssignPolicy, Manager, ManagerConfig, TaskOutcome};
use taflex_solver::Algorithm;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    /// Least-flex-first: commit the tightest task each round.
    Lff,
    /// Earliest-deadline-first: one pass in deadline order.
    Edf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AlgorithmArg {
    /// Waiting-aware A*.
    Waiting,
    /// Safe-interval search with child commitment.
    Interval,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Data directory holding map/, constraints/, and task files.
    #[arg(long, default_value = "test-benchmark")]
    data: PathBuf,

    /// Task file name, relative to the data directory.
    #[arg(long)]
    task: String,

    #[arg(long, value_enum, default_value_t = PolicyArg::Lff)]
    policy: PolicyArg,

    #[arg(long, value_enum, default_value_t = AlgorithmArg::Waiting)]
    algorithm: AlgorithmArg,

    /// Suboptimality factor: deadlines are (1 + phi) * optimal.
    #[arg(long, default_value_t = 0.2)]
    phi: f64,

    /// Per-solver-call expansion cap.
    #[arg(long, default_value_t = 100_000)]
    max_step: usize,

    /// Consider at most this many tasks per round (0 = no window).
    #[arg(long, default_value_t = 0)]
    window: usize,

    /// Extra-cost tie-break tolerance passed to the solver.
    #[arg(long, default_value_t = 0)]
    extra_cost_id: u64,

    #[arg(long)]
    bound: bool,
    #[arg(long)]
    sort: bool,
    #[arg(long)]
    multi_label: bool,
    #[arg(long)]
    occupied: bool,
    #[arg(long)]
    deadline_bound: bool,
    #[arg(long)]
    task_bound: bool,
    #[arg(long)]
    recalculate: bool,
    #[arg(long)]
    reserve_all: bool,
    #[arg(long)]
    skip: bool,
    #[arg(long)]
    reserve_nearest: bool,
    #[arg(long)]
    retry: bool,
}

pub fn run(args: PlanArgs) -> anyhow::Result<()> {
    let config = ManagerConfig {
        bound: args.bound,
        sort: args.sort,
        multi_label: args.multi_label,
        occupied: args.occupied,
        deadline_bound: args.deadline_bound,
        task_bound: args.task_bound,
        recalculate: args.recalculate,
        reserve_all: args.reserve_all,
        skip: args.skip,
        reserve_nearest: args.reserve_nearest,
        retry: args.retry,
        window_size: args.window,
        max_step: args.max_step,
        extra_cost_id: args.extra_cost_id,
    };

    let policy = match args.policy {
        PolicyArg::Lff => AssignPolicy::LeastFlexFirst,
        PolicyArg::Edf => AssignPolicy::EarliestDeadlineFirst,
    };
    let algorithm = match args.algorithm {
        AlgorithmArg::Waiting => Algorithm::WaitingAware,
        AlgorithmArg::Interval => Algorithm::SafeInterval,
    };

    let mut manager = Manager::from_task_file(&args.data, &args.task, config)?;
    let reports = manager.run(policy, algorithm, args.phi)?;

    let mut completed = 0;
    for report in &reports {
        match report.outcome {
            TaskOutcome::Completed { agent } => {
                completed += 1;
                info!(task = report.bucket, agent, "completed");
            }
            TaskOutcome::FailedDeadline => warn!(task = report.bucket, "failed (deadline)"),
            TaskOutcome::FailedNoAgent => warn!(task = report.bucket, "failed (no agent)"),
            TaskOutcome::FailedRelease => warn!(task = report.bucket, "failed (release)"),
        }
    }
    info!(completed, total = reports.len(), "assignment summary");

    for (i, agent) in manager.agents().iter().enumerate() {
        println!("agent {i} path");
        for node in &agent.path {
            println!("{} {} {}", node.pos.row, node.pos.col, node.leave_time);
        }
    }
    Ok(())
}
