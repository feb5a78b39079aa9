//! Assignment policy flags.

/// Top-level assignment loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignPolicy {
    /// Score every (agent, task) pair each round and commit the task with the
    /// least slack first.
    #[default]
    LeastFlexFirst,
    /// Walk the tasks once in deadline order.
    EarliestDeadlineFirst,
}

/// Policy switches of the assignment engine. The defaults mirror a plain
/// exhaustive search: no pruning, no caching, no parking reservations.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Tighten the per-task search bound as better candidates appear.
    pub bound: bool,
    /// Sort tasks by prior flexibility and agents per task by descending
    /// flexibility before probing, for better expected pruning.
    pub sort: bool,
    /// Probe with one multi-waypoint solve instead of two sequential solves.
    pub multi_label: bool,
    /// Detect assignments that strand another agent on the delivery cell and
    /// reserve parking fallbacks.
    pub occupied: bool,
    /// Defer a task while every agent would reach its pickup before the
    /// release time.
    pub deadline_bound: bool,
    /// Skip a whole task when even the latest-committed agent cannot beat the
    /// current round minimum.
    pub task_bound: bool,
    /// Re-score the chosen task by actual agent time instead of flexibility.
    pub recalculate: bool,
    /// Always reserve a parking path for the assigned agent.
    pub reserve_all: bool,
    /// Cache prior-round probe results and reuse them while conflict-free.
    pub skip: bool,
    /// Reserve to the nearest free parking cell instead of the agent origin.
    pub reserve_nearest: bool,
    /// On commit failure, drop the agent for this task and re-select.
    pub retry: bool,
    /// Consider at most this many tasks (in deadline order) per round;
    /// zero means no window.
    pub window_size: usize,
    /// Per-solver-call expansion cap.
    pub max_step: usize,
    /// Extra-cost tolerance handed to the solver.
    pub extra_cost_id: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bound: false,
            sort: false,
            multi_label: false,
            occupied: false,
            deadline_bound: false,
            task_bound: false,
            recalculate: false,
            reserve_all: false,
            skip: false,
            reserve_nearest: false,
            retry: false,
            window_size: 0,
            max_step: 100_000,
            extra_cost_id: 0,
        }
    }
}
