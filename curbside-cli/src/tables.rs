//! CSV implementations of the estimation source and sink.

use curbside_core::{
    CurbsideError, EstimateSink, ObservedStateRow, PANEL_COLUMNS, PROBABILITY_COLUMNS,
    PanelRow, PanelSource, ProbabilityRow, ResultsTable, STATE_COLUMNS, STATE_VARIABLE_COLUMN,
    TRUCK_TYPE_COLUMNS, TruckTypeRow, require_columns,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const PROBABILITIES_FILE: &str = "probabilities.csv";
pub const STATE_VARIABLES_FILE: &str = "state_variables.csv";
pub const STATES_FILE: &str = "states.csv";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: {source}")]
    Schema {
        path: String,
        #[source]
        source: CurbsideError,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVariableRow {
    #[serde(rename = "state_variable")]
    name: String,
}

/// Read a headed table, failing before any row is parsed when a required
/// column is absent. Extra columns are ignored.
pub fn read_table<T: DeserializeOwned>(
    path: &Path,
    table: &'static str,
    required: &[&'static str],
) -> Result<Vec<T>, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    require_columns(table, &headers, required).map_err(|source| TableError::Schema {
        path: path.display().to_string(),
        source,
    })?;
    let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    Ok(rows)
}

pub fn read_truck_types(path: &Path) -> Result<Vec<TruckTypeRow>, TableError> {
    read_table(path, "truck types", &TRUCK_TYPE_COLUMNS)
}

pub fn read_state_variables(path: &Path) -> Result<Vec<String>, TableError> {
    let rows: Vec<StateVariableRow> =
        read_table(path, "state variables", &[STATE_VARIABLE_COLUMN])?;
    Ok(rows.into_iter().map(|row| row.name).collect())
}

/// The three first-stage tables written by `prepare`.
pub struct PreparedTables {
    pub state_variables: Vec<String>,
    pub probabilities: Vec<ProbabilityRow>,
    pub states: Vec<ObservedStateRow>,
}

impl PreparedTables {
    pub fn read(dir: &Path) -> Result<Self, TableError> {
        Ok(Self {
            state_variables: read_state_variables(&dir.join(STATE_VARIABLES_FILE))?,
            probabilities: read_table(
                &dir.join(PROBABILITIES_FILE),
                "probabilities",
                &PROBABILITY_COLUMNS,
            )?,
            states: read_table(&dir.join(STATES_FILE), "states", &STATE_COLUMNS)?,
        })
    }
}

/// Panel and truck types read from CSV files.
pub struct CsvSource {
    panel: PathBuf,
    truck_types: PathBuf,
}

impl CsvSource {
    pub const fn new(panel: PathBuf, truck_types: PathBuf) -> Self {
        Self { panel, truck_types }
    }
}

impl PanelSource for CsvSource {
    type Error = TableError;

    fn load_truck_types(&self) -> Result<Vec<TruckTypeRow>, Self::Error> {
        read_truck_types(&self.truck_types)
    }

    fn load_panel(&self) -> Result<Vec<PanelRow>, Self::Error> {
        read_table(&self.panel, "panel", &PANEL_COLUMNS)
    }
}

/// Writes first-stage tables under `dir` and the results table to `results`.
/// Either destination may be absent, in which case that output is skipped.
pub struct CsvSink {
    dir: Option<PathBuf>,
    results: Option<PathBuf>,
}

impl CsvSink {
    pub const fn new(dir: Option<PathBuf>, results: Option<PathBuf>) -> Self {
        Self { dir, results }
    }

    fn target(&self, file: &str) -> Result<Option<PathBuf>, TableError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        fs::create_dir_all(dir)?;
        Ok(Some(dir.join(file)))
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

impl EstimateSink for CsvSink {
    type Error = TableError;

    fn save_probabilities(&self, rows: &[ProbabilityRow]) -> Result<(), Self::Error> {
        let Some(path) = self.target(PROBABILITIES_FILE)? else {
            return Ok(());
        };
        if rows.is_empty() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(PROBABILITY_COLUMNS)?;
            writer.flush()?;
            return Ok(());
        }
        write_rows(&path, rows)
    }

    fn save_state_variables(&self, names: &[String]) -> Result<(), Self::Error> {
        let Some(path) = self.target(STATE_VARIABLES_FILE)? else {
            return Ok(());
        };
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([STATE_VARIABLE_COLUMN])?;
        for name in names {
            writer.write_record([name])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn save_observed_states(&self, rows: &[ObservedStateRow]) -> Result<(), Self::Error> {
        let Some(path) = self.target(STATES_FILE)? else {
            return Ok(());
        };
        if rows.is_empty() {
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(STATE_COLUMNS)?;
            writer.flush()?;
            return Ok(());
        }
        write_rows(&path, rows)
    }

    fn save_results(&self, table: &ResultsTable) -> Result<(), Self::Error> {
        let Some(path) = &self.results else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(table.header())?;
        for record in table.records() {
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
