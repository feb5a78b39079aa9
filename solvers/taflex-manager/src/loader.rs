//! Data-directory loading: task files, maps, seeded constraints, and
//! benchmark scenario files.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use taflex_core::{Agent, GridMap, Scenario, ScenarioFile, Task, TaskFile};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::manager::Manager;

fn read(path: &Path) -> Result<String, ManagerError> {
    fs::read_to_string(path).map_err(|source| ManagerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Manager {
    /// Load a task file from `<data>/<task_file>`, its map from
    /// `<data>/map/<mapName>`, and — when present — seeded constraints from
    /// `<data>/constraints/<mapName>`.
    pub fn from_task_file(
        data_path: impl AsRef<Path>,
        task_file: &str,
        config: ManagerConfig,
    ) -> Result<Self, ManagerError> {
        let data_path = data_path.as_ref();
        let task_file = TaskFile::parse(&read(&data_path.join(task_file))?)?;

        let mut map = GridMap::parse(&read(&data_path.join("map").join(&task_file.map_name))?)?;

        let constraints_path = data_path.join("constraints").join(&task_file.map_name);
        match fs::read_to_string(&constraints_path) {
            Ok(text) => {
                let applied = map.load_constraints(&text)?;
                info!(count = applied, "constraints loaded");
            }
            Err(_) => debug!("no constraints file"),
        }

        let agents: Vec<Agent> = task_file
            .agent_positions
            .iter()
            .map(|&pos| Agent::parked_at(pos))
            .collect();

        let tasks: Vec<Task> = task_file
            .tasks
            .iter()
            .enumerate()
            .map(|(bucket, spec)| {
                Task::new(Scenario::new(
                    bucket,
                    &map,
                    spec.start,
                    spec.end,
                    spec.optimal,
                    spec.start_time,
                ))
            })
            .collect();

        info!(
            agents = agents.len(),
            tasks = tasks.len(),
            map = %task_file.map_name,
            "task file imported"
        );
        Ok(Self::new(map, agents, tasks, config))
    }

    /// Load benchmark scenarios from `<data>/<filename>`, validating each
    /// entry against the loaded map's dimensions.
    pub fn load_scenario_file(
        &mut self,
        data_path: impl AsRef<Path>,
        filename: &str,
    ) -> Result<usize, ManagerError> {
        let path = data_path.as_ref().join(filename);
        let parsed = ScenarioFile::parse(&read(&path)?)?;
        let mut loaded = 0;
        for (index, entry) in parsed.entries().iter().enumerate() {
            if entry.map_width != self.map().width() || entry.map_height != self.map().height() {
                return Err(ManagerError::ScenarioMapMismatch {
                    entry: index,
                    width: entry.map_width,
                    height: entry.map_height,
                });
            }
            let scenario = Scenario::new(
                entry.bucket,
                self.map(),
                entry.start,
                entry.end,
                entry.optimal,
                0,
            );
            self.push_scenario(scenario);
            loaded += 1;
        }
        info!(count = loaded, file = filename, "scenario file imported");
        Ok(loaded)
    }
}
