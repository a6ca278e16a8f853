//! Episode logs and their parquet store.
//!
//! A log is one row per video frame. `observation.state` starts with the
//! end-effector position and ends with the two gripper finger channels;
//! `action` is carried through to the dataset unchanged.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray as _, FixedSizeListArray, Float32Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float32Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::Vector3;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{PipelineError, Result};

pub const STATE_COLUMN: &str = "observation.state";
pub const ACTION_COLUMN: &str = "action";
pub const TASK_INDEX_COLUMN: &str = "task_index";

/// Minimum state width: x, y, z.
pub const MIN_STATE_WIDTH: usize = 3;
/// State width needed to read the two gripper channels.
pub const GRIPPER_STATE_WIDTH: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRow {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub task_index: i64,
}

/// Validated episode log.
///
/// All rows share one state width, one action width and one task index.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeLog {
    episode: String,
    rows: Vec<EpisodeRow>,
}

impl EpisodeLog {
    pub fn new(episode: impl Into<String>, rows: Vec<EpisodeRow>) -> Result<Self> {
        let episode = episode.into();
        let Some(first) = rows.first() else {
            return Err(PipelineError::inconsistent_log(episode, "log has no rows"));
        };
        if first.state.len() < MIN_STATE_WIDTH {
            return Err(PipelineError::inconsistent_log(
                episode,
                format!(
                    "state has {} values, need at least {MIN_STATE_WIDTH}",
                    first.state.len()
                ),
            ));
        }

        let (state_width, action_width, task_index) =
            (first.state.len(), first.action.len(), first.task_index);
        for (index, row) in rows.iter().enumerate() {
            let reason = if row.state.len() != state_width {
                format!("row {index} has state width {}, expected {state_width}", row.state.len())
            } else if row.action.len() != action_width {
                format!(
                    "row {index} has action width {}, expected {action_width}",
                    row.action.len()
                )
            } else if row.task_index != task_index {
                format!(
                    "row {index} has task index {}, expected {task_index}",
                    row.task_index
                )
            } else {
                continue;
            };
            return Err(PipelineError::inconsistent_log(episode, reason));
        }

        Ok(Self { episode, rows })
    }

    /// Episode identifier (the file stem it was loaded from).
    #[must_use]
    pub fn episode(&self) -> &str {
        &self.episode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false: empty logs are rejected by [`EpisodeLog::new`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[EpisodeRow] {
        &self.rows
    }

    #[must_use]
    pub fn task_index(&self) -> i64 {
        self.rows[0].task_index
    }

    #[must_use]
    pub fn state_width(&self) -> usize {
        self.rows[0].state.len()
    }

    #[must_use]
    pub fn action_width(&self) -> usize {
        self.rows[0].action.len()
    }

    pub fn row(&self, index: usize) -> Result<&EpisodeRow> {
        self.rows.get(index).ok_or(PipelineError::FrameOutOfRange {
            index,
            len: self.rows.len(),
        })
    }

    /// End-effector world position at `index`.
    pub fn end_effector(&self, index: usize) -> Result<Vector3<f64>> {
        let state = &self.row(index)?.state;
        Ok(Vector3::new(
            f64::from(state[0]),
            f64::from(state[1]),
            f64::from(state[2]),
        ))
    }

    /// Gripper finger gap at `index`: second-to-last minus last state channel.
    pub fn gripper_gap(&self, index: usize) -> Result<f64> {
        let state = &self.row(index)?.state;
        let width = state.len();
        if width < GRIPPER_STATE_WIDTH {
            return Err(PipelineError::inconsistent_log(
                self.episode.as_str(),
                format!("state has {width} values, gripper needs at least {GRIPPER_STATE_WIDTH}"),
            ));
        }
        Ok(f64::from(state[width - 2]) - f64::from(state[width - 1]))
    }
}

/// Source of episode logs keyed by file stem.
pub trait EpisodeStore {
    fn read(&self, stem: &str) -> Result<EpisodeLog>;

    /// Every stem in the store, sorted.
    fn stems(&self) -> Result<Vec<String>>;
}

/// Directory of `<stem>.parquet` episode logs.
#[derive(Debug, Clone)]
pub struct ParquetEpisodeStore {
    dir: PathBuf,
}

impl ParquetEpisodeStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.parquet"))
    }

    /// Write `log` as `<episode>.parquet`.
    pub fn write(&self, log: &EpisodeLog) -> Result<PathBuf> {
        let path = self.path(log.episode());
        let rows = log.rows();
        let states = rows.iter().map(|row| row.state.as_slice()).collect::<Vec<_>>();
        let actions = rows.iter().map(|row| row.action.as_slice()).collect::<Vec<_>>();

        let state = float_list_array(&states, log.state_width())?;
        let action = float_list_array(&actions, log.action_width())?;
        let task_index: ArrayRef = Arc::new(Int64Array::from_iter_values(
            rows.iter().map(|row| row.task_index),
        ));

        let schema = Arc::new(Schema::new(vec![
            Field::new(STATE_COLUMN, state.data_type().clone(), false),
            Field::new(ACTION_COLUMN, action.data_type().clone(), false),
            Field::new(TASK_INDEX_COLUMN, DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(schema, vec![state, action, task_index])?;
        write_parquet(&path, &batch)?;
        Ok(path)
    }
}

impl EpisodeStore for ParquetEpisodeStore {
    fn read(&self, stem: &str) -> Result<EpisodeLog> {
        let path = self.path(stem);
        let batches = read_parquet(&path)?;

        let mut rows = Vec::new();
        for batch in &batches {
            let state = float_rows(batch, &path, STATE_COLUMN)?;
            let action = float_rows(batch, &path, ACTION_COLUMN)?;
            let task_index = int_column(batch, &path, TASK_INDEX_COLUMN)?;
            rows.extend(
                state
                    .into_iter()
                    .zip(action)
                    .zip(task_index)
                    .map(|((state, action), task_index)| EpisodeRow {
                        state,
                        action,
                        task_index,
                    }),
            );
        }
        tracing::debug!("read {} rows from {}", rows.len(), path.display());
        EpisodeLog::new(stem, rows)
    }

    fn stems(&self) -> Result<Vec<String>> {
        files_with_extension(&self.dir, "parquet")
    }
}

/// Sorted stems of the files in `dir` with extension `ext`.
pub fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
    let mut stems = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| PipelineError::io(dir, err))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == ext) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_owned());
            }
        }
    }
    stems.sort();
    Ok(stems)
}

pub(crate) fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

pub(crate) fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Fixed-width `float32` list column from equally sized rows.
pub(crate) fn float_list_array(rows: &[&[f32]], width: usize) -> Result<ArrayRef> {
    let size = i32::try_from(width).map_err(|_| PipelineError::SchemaMismatch {
        field: "list".to_owned(),
        reason: format!("width {width} does not fit a fixed-size list"),
    })?;
    let values = Float32Array::from_iter_values(rows.iter().flat_map(|row| row.iter().copied()));
    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let array = FixedSizeListArray::try_new(field, size, Arc::new(values), None)?;
    Ok(Arc::new(array))
}

fn column<'a>(batch: &'a RecordBatch, path: &Path, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_owned(),
        })
}

fn unsupported(path: &Path, name: &str, data_type: &DataType) -> PipelineError {
    PipelineError::UnsupportedColumn {
        path: path.to_path_buf(),
        column: name.to_owned(),
        data_type: data_type.to_string(),
    }
}

/// Read a list-of-numbers column as one `Vec<f32>` per row.
fn float_rows(batch: &RecordBatch, path: &Path, name: &str) -> Result<Vec<Vec<f32>>> {
    let array = column(batch, path, name)?;
    let element_type = match array.data_type() {
        DataType::FixedSizeList(field, _) | DataType::List(field) | DataType::LargeList(field) => {
            field.data_type()
        }
        other => return Err(unsupported(path, name, other)),
    };
    if !element_type.is_numeric() {
        return Err(unsupported(path, name, array.data_type()));
    }

    let row_values = |index: usize| -> ArrayRef {
        if let Some(list) = array.as_fixed_size_list_opt() {
            list.value(index)
        } else if let Some(list) = array.as_list_opt::<i32>() {
            list.value(index)
        } else {
            array.as_list::<i64>().value(index)
        }
    };

    let mut rows = Vec::with_capacity(array.len());
    for index in 0..array.len() {
        if array.is_null(index) {
            return Err(PipelineError::inconsistent_log(
                path.display().to_string(),
                format!("{name} is null at row {index}"),
            ));
        }
        let values = cast(&row_values(index), &DataType::Float32)?;
        if values.null_count() > 0 {
            return Err(PipelineError::inconsistent_log(
                path.display().to_string(),
                format!("{name} has null values at row {index}"),
            ));
        }
        rows.push(values.as_primitive::<Float32Type>().values().to_vec());
    }
    Ok(rows)
}

fn int_column(batch: &RecordBatch, path: &Path, name: &str) -> Result<Vec<i64>> {
    let array = column(batch, path, name)?;
    if !array.data_type().is_integer() {
        return Err(unsupported(path, name, array.data_type()));
    }
    if let Some(row) = (0..array.len()).find(|&row| array.is_null(row)) {
        return Err(PipelineError::inconsistent_log(
            path.display().to_string(),
            format!("{name} is null at row {row}"),
        ));
    }
    let values = cast(array, &DataType::Int64)?;
    Ok(values.as_primitive::<Int64Type>().values().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ListArray, UInt8Array};

    fn row(x: f32, gap: f32, task_index: i64) -> EpisodeRow {
        EpisodeRow {
            state: vec![x, 0.5, 1.0, 0.0, 0.0, 0.0, gap / 2.0, -gap / 2.0],
            action: vec![0.1; 7],
            task_index,
        }
    }

    #[test]
    fn test_log_accessors() {
        let log = EpisodeLog::new("episode_000000", vec![row(0.25, 0.04, 2), row(0.5, 0.0, 2)])
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.task_index(), 2);
        assert_eq!(log.state_width(), 8);
        assert_eq!(log.action_width(), 7);
        assert_eq!(log.end_effector(1).unwrap(), Vector3::new(0.5, 0.5, 1.0));
        assert!((log.gripper_gap(0).unwrap() - 0.04).abs() < 1e-6);
        assert_eq!(log.gripper_gap(1).unwrap(), 0.0);
        assert!(matches!(
            log.end_effector(2),
            Err(PipelineError::FrameOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_inconsistent_logs_are_rejected() {
        assert!(EpisodeLog::new("e", Vec::new()).is_err());
        assert!(EpisodeLog::new("e", vec![row(0.0, 0.0, 0), row(0.0, 0.0, 1)]).is_err());

        let mut short = row(0.0, 0.0, 0);
        short.action.pop();
        assert!(matches!(
            EpisodeLog::new("e", vec![row(0.0, 0.0, 0), short]),
            Err(PipelineError::InconsistentLog { .. })
        ));

        let narrow = EpisodeRow {
            state: vec![0.0, 0.0],
            action: Vec::new(),
            task_index: 0,
        };
        assert!(EpisodeLog::new("e", vec![narrow]).is_err());
    }

    #[test]
    fn test_gripper_needs_five_channels() {
        let log = EpisodeLog::new(
            "e",
            vec![EpisodeRow {
                state: vec![0.0, 0.0, 0.0, 0.01],
                action: Vec::new(),
                task_index: 0,
            }],
        )
        .unwrap();
        assert!(log.end_effector(0).is_ok());
        assert!(matches!(
            log.gripper_gap(0),
            Err(PipelineError::InconsistentLog { .. })
        ));
    }

    #[test]
    fn test_parquet_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetEpisodeStore::new(dir.path());
        let log = EpisodeLog::new(
            "episode_000003",
            (0..5).map(|i| row(i as f32 * 0.1, 0.04, 1)).collect(),
        )
        .unwrap();
        store.write(&log).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.stems().unwrap(), vec!["episode_000003".to_owned()]);
        assert_eq!(store.read("episode_000003").unwrap(), log);
        assert!(matches!(
            store.read("episode_000004"),
            Err(PipelineError::Io { .. })
        ));
    }

    #[test]
    fn test_reads_variable_lists_and_narrow_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode_000000.parquet");

        let state = ListArray::from_iter_primitive::<arrow::datatypes::Float64Type, _, _>(vec![
            Some(vec![Some(1.0), Some(2.0), Some(3.0), Some(0.02), Some(-0.02)]),
            Some(vec![Some(1.5), Some(2.0), Some(3.0), Some(0.0), Some(0.0)]),
        ]);
        let action = ListArray::from_iter_primitive::<arrow::datatypes::Float64Type, _, _>(vec![
            Some(vec![Some(0.5)]),
            Some(vec![Some(-0.5)]),
        ]);
        let task_index = UInt8Array::from(vec![4, 4]);
        let schema = Arc::new(Schema::new(vec![
            Field::new(STATE_COLUMN, state.data_type().clone(), true),
            Field::new(ACTION_COLUMN, action.data_type().clone(), true),
            Field::new(TASK_INDEX_COLUMN, DataType::UInt8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(state), Arc::new(action), Arc::new(task_index)],
        )
        .unwrap();
        write_parquet(&path, &batch).unwrap();

        let log = ParquetEpisodeStore::new(dir.path())
            .read("episode_000000")
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.task_index(), 4);
        assert_eq!(log.rows()[1].action, vec![-0.5]);
        assert!((log.gripper_gap(0).unwrap() - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_nulls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, state: ListArray, task_index: Int64Array| {
            let action = ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
                Some(vec![Some(0.0)]),
                Some(vec![Some(0.0)]),
            ]);
            let schema = Arc::new(Schema::new(vec![
                Field::new(STATE_COLUMN, state.data_type().clone(), true),
                Field::new(ACTION_COLUMN, action.data_type().clone(), true),
                Field::new(TASK_INDEX_COLUMN, DataType::Int64, true),
            ]));
            let batch = RecordBatch::try_new(
                schema,
                vec![Arc::new(state), Arc::new(action), Arc::new(task_index)],
            )
            .unwrap();
            write_parquet(&dir.path().join(format!("{name}.parquet")), &batch).unwrap();
        };
        let state = |gap: Option<f32>| {
            ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
                Some(vec![Some(1.0), Some(2.0), Some(3.0), Some(0.02), Some(-0.02)]),
                Some(vec![Some(1.0), Some(2.0), Some(3.0), gap, Some(-0.02)]),
            ])
        };

        write("null_task", state(Some(0.02)), Int64Array::from(vec![None, None]));
        write("null_state", state(None), Int64Array::from(vec![2, 2]));
        write("complete", state(Some(0.02)), Int64Array::from(vec![2, 2]));

        let store = ParquetEpisodeStore::new(dir.path());
        assert!(matches!(
            store.read("null_task"),
            Err(PipelineError::InconsistentLog { reason, .. }) if reason.contains(TASK_INDEX_COLUMN)
        ));
        assert!(matches!(
            store.read("null_state"),
            Err(PipelineError::InconsistentLog { reason, .. }) if reason.contains("row 1")
        ));
        assert_eq!(store.read("complete").unwrap().task_index(), 2);
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new(
            TASK_INDEX_COLUMN,
            DataType::Int64,
            false,
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![0, 0]))]).unwrap();
        write_parquet(&path, &batch).unwrap();

        assert!(matches!(
            ParquetEpisodeStore::new(dir.path()).read("broken"),
            Err(PipelineError::MissingColumn { column, .. }) if column == STATE_COLUMN
        ));
    }
}
