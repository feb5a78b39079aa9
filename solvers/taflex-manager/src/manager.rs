//! Priority-based task assignment with transactional reservation bookkeeping.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use taflex_core::{
    Agent, Direction, Flexibility, GridMap, PathNode, Scenario, Task, Timestamp, TIME_INFINITE,
};
use taflex_solver::{Algorithm, Solver};

use crate::config::{AssignPolicy, ManagerConfig};
use crate::constraints::{add_path_constraints, remove_path_constraints, LiftedConstraints};
use crate::error::ManagerError;

/// Probe effort counters for one scoring pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeStats {
    pub calculated: usize,
    pub skipped: usize,
    pub steps: usize,
}

/// Terminal state of one task after the assignment loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { agent: usize },
    /// No agent could finish the task within its deadline.
    FailedDeadline,
    /// A candidate existed but every commit attempt was rolled back.
    FailedNoAgent,
    /// The task never became assignable before the rounds ran dry.
    FailedRelease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
    pub bucket: usize,
    pub outcome: TaskOutcome,
}

/// The assignment engine. Owns the map (and with it the reservation table),
/// the agent fleet, and the outstanding task list.
#[derive(Debug)]
pub struct Manager {
    map: GridMap,
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    scenarios: Vec<Scenario>,
    config: ManagerConfig,
    agent_max_timestamp: Timestamp,
    agent_max_timestamp_agent: usize,
    agent_max_reserve_timestamp: Timestamp,
}

impl Manager {
    /// Build the engine over a prepared instance. Tasks are re-sorted
    /// ascending by optimal cost (deadline order for a uniform φ), every
    /// agent origin becomes a parking cell, and the initial reservations are
    /// seeded: each agent holds its cell for the current tick, an
    /// infinite-waiting marker on its reserve cell, and a waiting-stack
    /// entry.
    pub fn new(
        mut map: GridMap,
        agents: Vec<Agent>,
        mut tasks: Vec<Task>,
        config: ManagerConfig,
    ) -> Self {
        tasks.sort_by(|a, b| {
            a.scenario
                .optimal()
                .partial_cmp(&b.scenario.optimal())
                .unwrap_or(Ordering::Equal)
        });
        for agent in &agents {
            map.add_parking_location(agent.origin_pos);
        }
        for (i, agent) in agents.iter().enumerate() {
            debug_assert_eq!(agent.origin_pos, agent.reserve_pos);
            map.add_node_occupied(agent.current_pos, agent.last_timestamp, agent.last_timestamp + 1);
            map.add_infinite_waiting(agent.reserve_pos);
            map.add_waiting_agent(agent.reserve_pos, agent.last_timestamp, i);
        }
        Self {
            map,
            agents,
            tasks,
            scenarios: Vec::new(),
            config,
            agent_max_timestamp: 0,
            agent_max_timestamp_agent: 0,
            agent_max_reserve_timestamp: 0,
        }
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub(crate) fn push_scenario(&mut self, scenario: Scenario) {
        self.scenarios.push(scenario);
    }

    /// Run the configured assignment loop to completion.
    pub fn run(
        &mut self,
        policy: AssignPolicy,
        algorithm: Algorithm,
        phi: f64,
    ) -> Result<Vec<TaskReport>, ManagerError> {
        match policy {
            AssignPolicy::LeastFlexFirst => self.least_flex_first_assign(algorithm, phi),
            AssignPolicy::EarliestDeadlineFirst => self.earliest_deadline_first_assign(algorithm, phi),
        }
    }

    // ── Top-level loops ──────────────────────────────────────────────────────

    /// Repeatedly score every (agent, task) pair and commit the task with the
    /// smallest best flexibility, until the task list drains.
    pub fn least_flex_first_assign(
        &mut self,
        algorithm: Algorithm,
        phi: f64,
    ) -> Result<Vec<TaskReport>, ManagerError> {
        let mut solver = Solver::new(algorithm, self.config.extra_cost_id);
        let started = Instant::now();
        let mut reports = Vec::new();

        while !self.tasks.is_empty() {
            self.compute_flex(&mut solver, phi);
            let progress = self.select_task(&mut solver, phi, &mut reports)?;
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "round finished");
            if !progress {
                // nothing was committed and nothing removed; another round
                // would repeat the exact same state
                warn!("no assignment progress, failing remaining tasks");
                for task in std::mem::take(&mut self.tasks) {
                    reports.push(TaskReport {
                        bucket: task.scenario.bucket(),
                        outcome: TaskOutcome::FailedRelease,
                    });
                }
            }
        }

        self.apply_reserved_paths();
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "least-flex-first finished");
        Ok(reports)
    }

    /// Walk the tasks once in deadline order, assigning the most flexible
    /// agent to each.
    pub fn earliest_deadline_first_assign(
        &mut self,
        algorithm: Algorithm,
        phi: f64,
    ) -> Result<Vec<TaskReport>, ManagerError> {
        let mut solver = Solver::new(algorithm, self.config.extra_cost_id);
        let started = Instant::now();

        let sort_agents: Vec<(usize, f64)> = (0..self.agents.len()).map(|i| (i, -1.0)).collect();
        let task_count = self.tasks.len();
        for agent in &mut self.agents {
            agent.flexibility = vec![Flexibility::default(); task_count];
        }

        let mut reports = Vec::new();
        for j in 0..task_count {
            let mut min_beta = -1.0;
            let mut min_beta_task = usize::MAX;
            let mut stats = ProbeStats::default();
            let selected = self.compute_agent_for_task(
                &mut solver,
                j,
                &sort_agents,
                phi,
                &mut min_beta,
                &mut min_beta_task,
                &mut stats,
                self.config.recalculate,
            );
            debug!(
                calculate = stats.calculated,
                skip = stats.skipped,
                step = stats.steps,
                "probe pass"
            );

            let bucket = self.tasks[j].scenario.bucket();
            let mut outcome = if self.tasks[j].released {
                TaskOutcome::FailedDeadline
            } else {
                TaskOutcome::FailedRelease
            };
            if let Some(agent) = selected {
                let flex = self.agents[agent].flexibility[j].clone();
                info!(agent, task = bucket, flex = flex.beta, "assigning");
                if self.assign_task(&mut solver, agent, &flex.path, flex.occupied_agent)? {
                    outcome = TaskOutcome::Completed { agent };
                } else {
                    outcome = TaskOutcome::FailedNoAgent;
                }
            }
            match outcome {
                TaskOutcome::Completed { .. } => info!(task = bucket, "task completed"),
                _ => warn!(task = bucket, "task failed"),
            }
            reports.push(TaskReport { bucket, outcome });
        }

        self.apply_reserved_paths();
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "earliest-deadline-first finished");
        Ok(reports)
    }

    /// Append each agent's outstanding parking route to its committed path.
    pub fn apply_reserved_paths(&mut self) {
        for (i, agent) in self.agents.iter_mut().enumerate() {
            if !agent.reserved_path.is_empty() {
                info!(agent = i, "appending reserved parking path");
                let reserved = std::mem::take(&mut agent.reserved_path);
                agent.path.extend(reserved);
            }
        }
    }

    // ── Flexibility scoring ──────────────────────────────────────────────────

    /// Score every (agent, task) pair for the current round under
    /// bound-and-prune, filling `max_beta`/`max_beta_agent` on each task.
    /// The reservation table is returned bit-identical to its entry state.
    pub fn compute_flex(&mut self, solver: &mut Solver, phi: f64) {
        let mut min_beta = -1.0;
        let mut min_beta_task = usize::MAX;

        let mut considered = self.tasks.len();
        if self.config.window_size > 0 && considered > self.config.window_size {
            considered = self.config.window_size;
        }
        let mut sort_tasks: Vec<(usize, f64)> = (0..considered)
            .map(|j| {
                let max_beta = self.tasks[j].max_beta;
                (j, if max_beta < 0.0 { f64::MAX } else { max_beta })
            })
            .collect();
        for j in considered..self.tasks.len() {
            self.tasks[j].released = false;
        }
        if self.config.sort {
            sort_tasks.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        }

        // rank agents per task by prior flexibility, reusing cached plans
        // that are still conflict-free
        let mut sort_agents: Vec<Vec<(usize, f64)>> =
            vec![vec![(0, -1.0); self.agents.len()]; self.tasks.len()];
        for i in 0..self.agents.len() {
            let prev = std::mem::take(&mut self.agents[i].flexibility);
            self.agents[i].flexibility = vec![Flexibility::default(); self.tasks.len()];
            let mut prev_index = 0;

            let lifted = self
                .config
                .skip
                .then(|| LiftedConstraints::lift_agent(&mut self.map, &self.agents[i]));

            for j in 0..self.tasks.len() {
                let task_id = self.tasks[j].scenario.bucket();
                while prev_index < prev.len() && prev[prev_index].task_id != task_id {
                    prev_index += 1;
                }
                let mut beta = -1.0;
                if prev_index < prev.len() {
                    beta = prev[prev_index].beta;
                    if self.config.skip {
                        let conflict = self.path_conflicts(
                            self.agents[i].last_timestamp,
                            &prev[prev_index].path,
                        );
                        if !conflict {
                            self.agents[i].flexibility[j] = prev[prev_index].clone();
                        }
                    }
                } else {
                    let distance = self
                        .map
                        .graph_distance(self.agents[i].current_pos, self.tasks[j].scenario.start());
                    beta -= distance as f64;
                }
                sort_agents[j][i] = (i, beta);
            }

            if let Some(journal) = lifted {
                journal.restore(&mut self.map);
            }
        }

        let mut stats = ProbeStats::default();
        for &(j, _) in &sort_tasks {
            if self.config.sort {
                sort_agents[j].sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            }
            let ranked = std::mem::take(&mut sort_agents[j]);
            self.compute_agent_for_task(
                solver,
                j,
                &ranked,
                phi,
                &mut min_beta,
                &mut min_beta_task,
                &mut stats,
                false,
            );
        }
        debug!(
            calculate = stats.calculated,
            skip = stats.skipped,
            step = stats.steps,
            "probe pass"
        );
    }

    /// True iff re-committing `path` now would collide with the table.
    fn path_conflicts(&self, last_timestamp: Timestamp, path: &[PathNode]) -> bool {
        if path.is_empty() {
            return true;
        }
        for c in crate::constraints::path_constraints(last_timestamp, path) {
            let set = match c.direction {
                Direction::None => self.map.node_occupancy(c.pos),
                d => self.map.edge_occupancy(c.pos, d),
            };
            if set.is_some_and(|s| s.intersects(c.start, c.end)) {
                return true;
            }
        }
        false
    }

    /// Probe every ranked agent against task `j`, recording a
    /// [`Flexibility`] per pair and returning the selected agent. Lifts and
    /// restores each agent's own reservations symmetrically, so the table is
    /// unchanged on return.
    #[allow(clippy::too_many_arguments)]
    pub fn compute_agent_for_task(
        &mut self,
        solver: &mut Solver,
        j: usize,
        sort_agents: &[(usize, f64)],
        phi: f64,
        min_beta: &mut f64,
        min_beta_task: &mut usize,
        stats: &mut ProbeStats,
        recalculate: bool,
    ) -> Option<usize> {
        let deadline = (1.0 + phi) * self.tasks[j].scenario.optimal();
        let mut upper_bound: Timestamp = if self.config.bound {
            (deadline + 1.0) as Timestamp
        } else {
            TIME_INFINITE
        };

        let (task_start, task_end, release, task_id) = {
            let s = &self.tasks[j].scenario;
            (s.start(), s.end(), s.start_time(), s.bucket())
        };

        let mut skip_all = false;
        let mut task_max_beta = -1.0f64;
        let mut task_min_agent_time = u64::MAX;
        let mut task_selected: Option<usize> = None;
        self.tasks[j].released = true;

        // even the latest-committed agent cannot beat the round minimum
        if !recalculate && self.config.task_bound && *min_beta >= 0.0 && self.agent_max_timestamp > 0
        {
            let latest = &self.agents[self.agent_max_timestamp_agent];
            let agent_min_time = self.map.graph_distance(latest.current_pos, task_start)
                + self.map.graph_distance(task_start, task_end);
            if ((self.agent_max_timestamp + agent_min_time) as f64) < deadline - *min_beta {
                skip_all = true;
                self.tasks[j].released = false;
            }
        }

        if recalculate {
            for &(i, _) in sort_agents {
                let flex = &self.agents[i].flexibility[j];
                if flex.beta >= 0.0 && !flex.path.is_empty() {
                    let agent_time =
                        flex.path.last().unwrap().leave_time + 1 - self.agents[i].last_timestamp;
                    if agent_time < task_min_agent_time
                        || (agent_time == task_min_agent_time
                            && task_selected.map_or(true, |s| i < s))
                    {
                        task_selected = Some(i);
                        task_min_agent_time = agent_time;
                    }
                }
            }
        }

        if self.config.skip {
            for &(i, _) in sort_agents {
                if recalculate || self.agents[i].flexibility[j].path.is_empty() {
                    continue;
                }
                if *min_beta > 0.0 {
                    let last_leave = self.agents[i].flexibility[j].path.last().unwrap().leave_time;
                    if last_leave as f64 > deadline - *min_beta {
                        let flex = &mut self.agents[i].flexibility[j];
                        flex.beta = -1.0;
                        flex.path.clear();
                    }
                }
                let beta = self.agents[i].flexibility[j].beta;
                if beta >= 0.0 {
                    if self.config.bound {
                        if *min_beta >= 0.0 && beta > *min_beta {
                            skip_all = true;
                        }
                        upper_bound = upper_bound.min((deadline - beta + 1.0) as Timestamp);
                    }
                    if beta > task_max_beta
                        || (beta == task_max_beta && task_selected.map_or(true, |s| i < s))
                    {
                        task_max_beta = beta;
                        task_selected = Some(i);
                    }
                }
            }
        }

        for &(i, sort_beta) in sort_agents {
            let agent_leave_time = self.agents[i].last_timestamp;
            let mut path: Vec<PathNode> = Vec::new();

            if recalculate {
                if self.agents[i].flexibility[j].beta >= 0.0
                    && !self.agents[i].flexibility[j].path.is_empty()
                {
                    continue;
                }
                if task_min_agent_time < TIME_INFINITE {
                    upper_bound = agent_leave_time + task_min_agent_time;
                }
                upper_bound = upper_bound.min((deadline + 1.0) as Timestamp);
            } else if self.config.skip && !self.agents[i].flexibility[j].path.is_empty() {
                continue;
            }

            let agent_min_time = self
                .map
                .graph_distance_endpoint(self.agents[i].current_pos, task_start)
                + self.map.graph_distance_endpoint(task_start, task_end);
            if skip_all || agent_leave_time.saturating_add(agent_min_time) > upper_bound {
                let mut beta = sort_beta;
                if beta < 0.0 {
                    beta = -1.0;
                } else if beta < *min_beta {
                    beta = *min_beta;
                }
                self.agents[i].flexibility[j] = Flexibility {
                    beta,
                    path,
                    task_id,
                    occupied_agent: None,
                };
                stats.skipped += 1;
                continue;
            }

            let lifted = LiftedConstraints::lift_agent(&mut self.map, &self.agents[i]);
            let delivery_occupied = self.map.last_waiting_agent(task_end);

            let mut end_time: Option<Timestamp> = None;
            let approach = self.agents[i].current_pos.manhattan(task_start);

            if self.config.deadline_bound
                && self.agent_max_reserve_timestamp + approach < release
            {
                // every plan would reach the pickup before the release time
                self.tasks[j].released = false;
            } else if self.config.multi_label {
                let waypoints = vec![self.agents[i].current_pos, task_start, task_end];
                let scenario = Scenario::with_waypoints(i, &self.map, waypoints, 0.0, 0);
                let (result, steps) = Self::compute_path(
                    solver,
                    &self.map,
                    &mut path,
                    &scenario,
                    agent_leave_time,
                    upper_bound,
                    self.config.max_step,
                );
                stats.steps += steps;
                if result.is_some() {
                    let pickup_time = path
                        .iter()
                        .find(|n| n.pos == task_start)
                        .map(|n| n.leave_time);
                    match pickup_time {
                        Some(t) if t < release => self.tasks[j].released = false,
                        Some(_) => end_time = result,
                        None => {}
                    }
                }
            } else {
                let scenario =
                    Scenario::new(i, &self.map, self.agents[i].current_pos, task_start, 0.0, 0);
                let (result, steps) = Self::compute_path(
                    solver,
                    &self.map,
                    &mut path,
                    &scenario,
                    agent_leave_time,
                    upper_bound,
                    self.config.max_step,
                );
                stats.steps += steps;
                if let Some(arrival) = result {
                    let depart = if arrival >= release {
                        Some(arrival)
                    } else if self
                        .map
                        .node_occupancy(task_start)
                        .is_some_and(|s| s.intersects(arrival, release + 1))
                    {
                        // cannot hold the pickup cell until the release time
                        None
                    } else {
                        path.last_mut().expect("first leg").leave_time = release;
                        Some(release)
                    };
                    if let Some(depart) = depart {
                        let (result, steps) = Self::compute_path(
                            solver,
                            &self.map,
                            &mut path,
                            &self.tasks[j].scenario,
                            depart,
                            upper_bound,
                            self.config.max_step,
                        );
                        stats.steps += steps;
                        end_time = result;
                    }
                }
            }

            match end_time {
                None => {
                    self.agents[i].flexibility[j] = Flexibility {
                        beta: -1.0,
                        path,
                        task_id,
                        occupied_agent: delivery_occupied,
                    };
                }
                Some(end) => {
                    let beta = deadline - end as f64;
                    let last_leave = path.last().unwrap().leave_time;
                    self.agents[i].flexibility[j] = Flexibility {
                        beta,
                        path,
                        task_id,
                        occupied_agent: delivery_occupied,
                    };
                    if beta >= 0.0 {
                        if self.config.bound {
                            if *min_beta >= 0.0 && beta > *min_beta {
                                skip_all = true;
                            }
                            upper_bound = upper_bound.min((deadline - beta + 1.0) as Timestamp);
                        }
                        if !recalculate {
                            if beta > task_max_beta
                                || (beta == task_max_beta && task_selected.map_or(true, |s| i < s))
                            {
                                task_max_beta = beta;
                                task_selected = Some(i);
                            }
                        } else {
                            let agent_time = last_leave + 1 - agent_leave_time;
                            if agent_time < task_min_agent_time
                                || (agent_time == task_min_agent_time
                                    && task_selected.map_or(true, |s| i < s))
                            {
                                task_selected = Some(i);
                                task_min_agent_time = agent_time;
                            }
                        }
                    }
                }
            }

            lifted.restore(&mut self.map);
            stats.calculated += 1;
        }

        self.tasks[j].max_beta = task_max_beta;
        self.tasks[j].max_beta_agent = task_selected;

        if !skip_all
            && task_max_beta >= 0.0
            && (*min_beta < 0.0
                || task_max_beta < *min_beta
                || (task_max_beta == *min_beta && j < *min_beta_task))
        {
            *min_beta = task_max_beta;
            *min_beta_task = j;
        }

        task_selected
    }

    /// Drive one solver search, appending the found plan to `path`. Returns
    /// the arrival time at the scenario's end, or `None` when the search is
    /// skipped, exhausted, or capped.
    fn compute_path(
        solver: &mut Solver,
        map: &GridMap,
        path: &mut Vec<PathNode>,
        scenario: &Scenario,
        start_time: Timestamp,
        deadline: Timestamp,
        max_step: usize,
    ) -> (Option<Timestamp>, usize) {
        let mut steps = 0;
        if start_time.saturating_add(scenario.total_distance()) > deadline {
            return (None, steps);
        }
        solver.init_scenario(map, scenario.clone(), start_time, deadline);
        while !solver.success() && solver.step(map).is_some() && steps < max_step {
            steps += 1;
        }
        if !solver.success() {
            return (None, steps);
        }
        path.extend(solver.construct_path());
        (path.last().map(|n| n.leave_time), steps)
    }

    // ── Commitment ───────────────────────────────────────────────────────────

    /// Commit `path` for agent `i`, displacing other agents onto parking
    /// fallbacks where needed. Either every mutation lands, or everything —
    /// agents and reservation table alike — is rolled back to the entry
    /// state and `false` is returned.
    pub fn assign_task(
        &mut self,
        solver: &mut Solver,
        i: usize,
        path: &[PathNode],
        occupied_agent: Option<usize>,
    ) -> Result<bool, ManagerError> {
        let Some(&first) = path.first() else {
            return Err(ManagerError::EmptyPath { agent: i });
        };
        if first.pos != self.agents[i].current_pos {
            return Err(ManagerError::AgentPositionMismatch { agent: i });
        }
        let back = *path.last().unwrap();

        let prev_pos = self.agents[i].current_pos;
        let prev_ts = self.agents[i].last_timestamp;
        let reserve_pos = self.agents[i].reserve_pos;

        // stage: swap the agent's idle reservations for the new path
        self.map.remove_waiting_agent(prev_pos, prev_ts, i);
        if self.agents[i].reserved_path.is_empty() {
            self.map.remove_node_occupied(prev_pos, prev_ts, prev_ts + 1);
        }
        let marker = self.map.remove_infinite_waiting(reserve_pos);
        if !self.agents[i].reserved_path.is_empty() {
            let reserved = std::mem::take(&mut self.agents[i].reserved_path);
            remove_path_constraints(&mut self.map, prev_ts, &reserved);
            self.agents[i].reserved_path = reserved;
        }
        add_path_constraints(&mut self.map, prev_ts, path);
        self.map.add_infinite_waiting_count(reserve_pos, marker);

        // who has to move out of the way, and why
        let mut reserving: BTreeMap<usize, u8> = BTreeMap::new();
        if self.config.occupied {
            let ends_on_parking = self.map.is_parking_location(back.pos);
            if self.config.reserve_all && !ends_on_parking {
                reserving.entry(i).or_insert(0);
            }
            if let Some(other) = occupied_agent {
                if other != i {
                    let displaced = if back.leave_time < self.agents[other].last_timestamp {
                        i
                    } else {
                        other
                    };
                    reserving.entry(displaced).or_insert(3);
                }
            }
            if !ends_on_parking
                && solver.is_occupied(
                    &self.map,
                    back.pos,
                    Direction::None,
                    back.leave_time + 1,
                    TIME_INFINITE,
                )
            {
                reserving.entry(i).or_insert(2);
            }
            for node in path {
                let Some(waiter) = self.map.last_waiting_agent(node.pos) else {
                    continue;
                };
                if !self.agents[waiter].reserved_path.is_empty()
                    || self.agents[waiter].last_timestamp > node.leave_time
                    || self.agents[waiter].reserve_pos == node.pos
                {
                    continue;
                }
                reserving.entry(waiter).or_insert(1);
            }
        }

        let committed = if reserving.is_empty() {
            self.finalize_assignment(i, path, back);
            true
        } else {
            let saved_pos = prev_pos;
            let saved_ts = prev_ts;
            let saved_reserved = std::mem::take(&mut self.agents[i].reserved_path);
            self.agents[i].current_pos = back.pos;
            self.agents[i].last_timestamp = back.leave_time;

            let mut saved: Vec<(usize, Agent)> = Vec::with_capacity(reserving.len());
            let mut succeeded = 0usize;
            for &displaced in reserving.keys() {
                saved.push((displaced, self.agents[displaced].clone()));
                if self.reserve_path(solver, displaced) {
                    succeeded += 1;
                } else {
                    break;
                }
            }

            if succeeded == reserving.len() {
                self.agents[i].path.extend_from_slice(path);
                self.map.add_waiting_agent(back.pos, back.leave_time, i);
                for (displaced, _) in &saved {
                    if let Some(last) = self.agents[*displaced].reserved_path.last() {
                        self.agent_max_reserve_timestamp =
                            self.agent_max_reserve_timestamp.max(last.leave_time);
                    }
                }
                for (&displaced, &priority) in &reserving {
                    info!(agent = displaced, priority, "parking reservation");
                }
                true
            } else {
                // unwind the successful reservations, newest first
                for (displaced, snapshot) in saved.iter().take(succeeded).rev() {
                    let displaced = *displaced;
                    if self.agents[displaced].reserve_pos == snapshot.reserve_pos
                        && self.agents[displaced].reserved_path == snapshot.reserved_path
                    {
                        continue; // reservation was a no-op
                    }
                    let new_reserve = self.agents[displaced].reserve_pos;
                    let new_path = std::mem::take(&mut self.agents[displaced].reserved_path);
                    self.map.remove_infinite_waiting(new_reserve);
                    remove_path_constraints(&mut self.map, snapshot.last_timestamp, &new_path);
                    self.map.add_infinite_waiting(snapshot.reserve_pos);
                    self.map.add_node_occupied(
                        snapshot.current_pos,
                        snapshot.last_timestamp,
                        snapshot.last_timestamp + 1,
                    );
                    self.agents[displaced] = snapshot.clone();
                }

                self.agents[i].current_pos = saved_pos;
                self.agents[i].last_timestamp = saved_ts;
                self.agents[i].reserved_path = saved_reserved;

                self.map.remove_infinite_waiting(reserve_pos);
                remove_path_constraints(&mut self.map, saved_ts, path);
                if !self.agents[i].reserved_path.is_empty() {
                    let reserved = std::mem::take(&mut self.agents[i].reserved_path);
                    add_path_constraints(&mut self.map, saved_ts, &reserved);
                    self.agents[i].reserved_path = reserved;
                }
                self.map.add_infinite_waiting_count(reserve_pos, marker);
                if self.agents[i].reserved_path.is_empty() {
                    self.map.add_node_occupied(saved_pos, saved_ts, saved_ts + 1);
                }
                self.map.add_waiting_agent(saved_pos, saved_ts, i);
                warn!(agent = i, occupied_agent = ?occupied_agent, "reservation failed, assignment rolled back");
                false
            }
        };

        if committed {
            debug!(agent = i, "assignment committed");
            if self.agent_max_timestamp < self.agents[i].last_timestamp {
                self.agent_max_timestamp = self.agents[i].last_timestamp;
                self.agent_max_timestamp_agent = i;
            }
            self.agent_max_reserve_timestamp = self
                .agent_max_reserve_timestamp
                .max(self.agents[i].last_timestamp);
        }
        Ok(committed)
    }

    fn finalize_assignment(&mut self, i: usize, path: &[PathNode], back: PathNode) {
        let agent = &mut self.agents[i];
        agent.current_pos = back.pos;
        agent.last_timestamp = back.leave_time;
        agent.reserved_path.clear();
        agent.path.extend_from_slice(path);
        self.map.add_waiting_agent(back.pos, back.leave_time, i);
    }

    /// Compute and commit a parking fallback route for agent `i`, to its
    /// origin or (configurably) the nearest still-claimable parking cell.
    /// On success the agent's reserve position and reserved path are updated
    /// and their reservations land in the table.
    pub fn reserve_path(&mut self, solver: &mut Solver, i: usize) -> bool {
        let agent_pos = self.agents[i].current_pos;
        let agent_ts = self.agents[i].last_timestamp;
        let agent_reserve = self.agents[i].reserve_pos;

        let mut journal = LiftedConstraints::new();
        journal.lift_node_interval(&mut self.map, agent_pos, agent_ts, agent_ts + 1);
        journal.lift_infinite_waiting(&mut self.map, agent_reserve);

        let target = if self.config.reserve_nearest {
            solver.nearest_parking_location(&self.map, agent_pos, agent_ts)
        } else {
            Some(self.agents[i].origin_pos)
        };

        // staying put: valid only if nothing else claims the cell, and then
        // there is no marker to move and no path to book
        if target == Some(agent_pos) && agent_reserve == agent_pos {
            let free = !self
                .map
                .node_occupancy(agent_pos)
                .is_some_and(|s| s.intersects(agent_ts, TIME_INFINITE));
            journal.restore(&mut self.map);
            return free;
        }

        let mut path = Vec::new();
        let mut arrival: Option<Timestamp> = None;
        match target {
            Some(target) => {
                let scenario = Scenario::new(0, &self.map, agent_pos, target, 0.0, 0);
                let (result, _steps) = Self::compute_path(
                    solver,
                    &self.map,
                    &mut path,
                    &scenario,
                    agent_ts,
                    TIME_INFINITE,
                    self.config.max_step,
                );
                arrival = result;
            }
            None => warn!(agent = i, "no claimable parking cell for reservation"),
        }

        journal.restore(&mut self.map);

        if arrival.is_none() {
            return false;
        }
        let target = target.unwrap();

        self.map.remove_node_occupied(agent_pos, agent_ts, agent_ts + 1);
        self.map.remove_infinite_waiting(agent_reserve);
        add_path_constraints(&mut self.map, agent_ts, &path);
        self.agents[i].reserve_pos = target;
        self.map.add_infinite_waiting(target);
        self.agents[i].reserved_path = path;
        debug!(agent = i, target = %target, "parking path reserved");
        true
    }

    // ── Least-flex-first selection ───────────────────────────────────────────

    /// Pick the released task with the smallest best flexibility and try to
    /// commit it, optionally retrying with other agents. Completed and
    /// dead tasks are removed from the round list; returns whether this
    /// round made progress (committed or removed anything).
    pub fn select_task(
        &mut self,
        solver: &mut Solver,
        phi: f64,
        reports: &mut Vec<TaskReport>,
    ) -> Result<bool, ManagerError> {
        let mut min_flex = f64::MAX;
        let mut selected: Option<usize> = None;
        for (j, task) in self.tasks.iter().enumerate() {
            if task.released
                && task.max_beta_agent.is_some()
                && (task.max_beta < min_flex
                    || (task.max_beta == min_flex && selected.map_or(true, |s| j < s)))
            {
                min_flex = task.max_beta;
                selected = Some(j);
            }
        }

        let mut task_success = false;
        let mut assigned_agent = None;
        if let Some(sj) = selected {
            let bucket = self.tasks[sj].scenario.bucket();
            let task_start = self.tasks[sj].scenario.start();
            let mut first_try = true;
            let mut available = vec![true; self.agents.len()];

            loop {
                let mut candidate = self.tasks[sj].max_beta_agent;

                if !first_try || self.config.recalculate {
                    let mut ranked: Vec<(usize, f64)> = Vec::with_capacity(self.agents.len());
                    for i in 0..self.agents.len() {
                        if !available[i] {
                            continue;
                        }
                        let cached = self.agents[i].flexibility[sj].beta;
                        let beta = if cached >= 0.0 {
                            cached
                        } else {
                            // rank unplanned agents by distance to the pickup
                            -1.0 - self.map.graph_distance(self.agents[i].current_pos, task_start)
                                as f64
                        };
                        ranked.push((i, beta));
                    }
                    if self.config.sort {
                        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                    }
                    let mut min_beta = -1.0;
                    let mut min_beta_task = usize::MAX;
                    let mut stats = ProbeStats::default();
                    candidate = self.compute_agent_for_task(
                        solver,
                        sj,
                        &ranked,
                        phi,
                        &mut min_beta,
                        &mut min_beta_task,
                        &mut stats,
                        self.config.recalculate,
                    );
                }

                let Some(agent) = candidate else { break };
                let flex = self.agents[agent].flexibility[sj].clone();
                info!(agent, task = bucket, flex = flex.beta, "assigning");
                task_success = self.assign_task(solver, agent, &flex.path, flex.occupied_agent)?;
                if task_success {
                    assigned_agent = Some(agent);
                    self.agents[agent].flexibility.clear();
                    break;
                }
                if !self.config.retry {
                    break;
                }
                first_try = false;
                available[agent] = false;
            }
        }

        // drop finished and dead tasks, preserving the order of the rest
        let mut progress = task_success;
        let mut kept = Vec::with_capacity(self.tasks.len());
        for (j, task) in std::mem::take(&mut self.tasks).into_iter().enumerate() {
            let bucket = task.scenario.bucket();
            if task.max_beta_agent.is_none() && task.released {
                warn!(task = bucket, "task failed (deadline)");
                reports.push(TaskReport {
                    bucket,
                    outcome: TaskOutcome::FailedDeadline,
                });
                progress = true;
            } else if Some(j) == selected && !task_success {
                warn!(task = bucket, "task failed (no agent)");
                reports.push(TaskReport {
                    bucket,
                    outcome: TaskOutcome::FailedNoAgent,
                });
                progress = true;
            } else if Some(j) == selected {
                info!(task = bucket, "task completed");
                reports.push(TaskReport {
                    bucket,
                    outcome: TaskOutcome::Completed {
                        agent: assigned_agent.expect("successful selection has an agent"),
                    },
                });
            } else {
                kept.push(task);
            }
        }
        self.tasks = kept;
        Ok(progress)
    }
}
