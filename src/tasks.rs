//! Task identity: `meta/tasks.jsonl` index map and the resolver that joins an
//! episode's task index to its text and calibration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationEntry, CalibrationRegistry};
use crate::error::{PipelineError, Result};

/// One line of `tasks.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_index: i64,
    pub task: String,
}

/// Task index to task text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskIndexMap {
    tasks: BTreeMap<i64, String>,
}

impl TaskIndexMap {
    /// Parse a JSON-lines task file. Blank lines are ignored.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;

        let mut tasks = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let task_map_error = |reason: String| PipelineError::TaskMap {
                path: path.to_path_buf(),
                line: number + 1,
                reason,
            };
            let record: TaskRecord =
                serde_json::from_str(line).map_err(|err| task_map_error(err.to_string()))?;
            if tasks.insert(record.task_index, record.task).is_some() {
                return Err(task_map_error(format!(
                    "task index {} listed twice",
                    record.task_index
                )));
            }
        }
        Ok(Self { tasks })
    }

    /// Build from in-memory records, rejecting repeated indices.
    pub fn from_records(records: impl IntoIterator<Item = TaskRecord>) -> Result<Self> {
        let mut tasks = BTreeMap::new();
        for record in records {
            if tasks.contains_key(&record.task_index) {
                return Err(PipelineError::DuplicateTask(format!(
                    "task index {}",
                    record.task_index
                )));
            }
            tasks.insert(record.task_index, record.task);
        }
        Ok(Self { tasks })
    }

    #[must_use]
    pub fn text(&self, task_index: i64) -> Option<&str> {
        self.tasks.get(&task_index).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// A task index resolved to its text and calibration.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTask<'a> {
    pub index: i64,
    pub text: &'a str,
    pub entry: &'a CalibrationEntry,
}

/// Single lookup path from a log's task index to the task it was recorded for.
///
/// Both the overlay stage (which needs the calibration) and the dataset stage
/// (which needs the label) go through here.
#[derive(Debug, Clone, Copy)]
pub struct TaskResolver<'a> {
    tasks: &'a TaskIndexMap,
    registry: &'a CalibrationRegistry,
}

impl<'a> TaskResolver<'a> {
    #[must_use]
    pub fn new(tasks: &'a TaskIndexMap, registry: &'a CalibrationRegistry) -> Self {
        Self { tasks, registry }
    }

    /// Task text for an episode's task index.
    pub fn label(&self, episode: &str, task_index: i64) -> Result<&'a str> {
        self.tasks
            .text(task_index)
            .ok_or_else(|| PipelineError::UnknownTaskIndex {
                episode: episode.to_owned(),
                task_index,
            })
    }

    /// Task text plus calibration. The task must be present in the registry.
    pub fn resolve(&self, episode: &str, task_index: i64) -> Result<ResolvedTask<'a>> {
        let text = self.label(episode, task_index)?;
        let entry = self
            .registry
            .get(text)
            .ok_or_else(|| PipelineError::CalibrationNotFound {
                task: text.to_owned(),
            })?;
        Ok(ResolvedTask {
            index: task_index,
            text,
            entry,
        })
    }
}
