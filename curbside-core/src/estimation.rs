//! The two-step estimation pipeline behind platform-agnostic table I/O.

use serde::{Deserialize, Serialize};

use crate::ccp::{ProbabilityRow, ProbabilityTable};
use crate::config::EstimationConfig;
use crate::error::Result;
use crate::model::MarketModel;
use crate::moments::{MomentBuilder, MomentSample};
use crate::optimizer::{OptimizationResult, optimize};
use crate::panel::{
    Fleet, LocationSet, Panel, PanelRecord, PanelReport, PanelRow, TruckTypeRow, format_date,
    parse_date,
};
use crate::payoff::Parameter;
use crate::policy::SamplerStats;
use crate::rng::replicate_seed;
use crate::simulation::SimulationStart;
use crate::state::{ObservedState, StateBuilder, StateLayout};

/// Required columns of the observed states table.
pub const STATE_COLUMNS: [&str; 4] = ["Truck", "Date", "Location", "State"];
/// Column of the state variables table.
pub const STATE_VARIABLE_COLUMN: &str = "state_variable";
/// Trailing column of the results table.
pub const CONVERGED_COLUMN: &str = "Converged";

/// Abstracts where the raw panel and truck types come from.
pub trait PanelSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the truck types table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn load_truck_types(&self) -> std::result::Result<Vec<TruckTypeRow>, Self::Error>;

    /// Load the raw panel.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn load_panel(&self) -> std::result::Result<Vec<PanelRow>, Self::Error>;
}

/// Abstracts where derived tables and results are persisted.
pub trait EstimateSink {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn save_probabilities(&self, rows: &[ProbabilityRow]) -> std::result::Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn save_state_variables(&self, names: &[String]) -> std::result::Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn save_observed_states(&self, rows: &[ObservedStateRow])
    -> std::result::Result<(), Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the table cannot be written.
    fn save_results(&self, table: &ResultsTable) -> std::result::Result<(), Self::Error>;
}

/// Persisted form of an observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedStateRow {
    #[serde(rename = "Truck")]
    pub truck: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// Size and quality of the estimated state space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSpaceSummary {
    pub trucks: usize,
    pub locations: usize,
    pub state_variables: usize,
    pub observations: usize,
    pub distinct_states: usize,
    pub probability_entries: usize,
    pub degenerate_pairs: usize,
    pub starting_points: usize,
    pub dropped_weeks: usize,
    pub dropped_records: usize,
    pub panel: PanelReport,
}

/// Everything the second stage needs, built once per run.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub model: MarketModel,
    pub starts: Vec<SimulationStart>,
    pub observations: Vec<ObservedState>,
    pub summary: StateSpaceSummary,
}

impl Prepared {
    /// Build the state space and CCPs from a raw panel.
    ///
    /// # Errors
    ///
    /// Fails on schema problems in either table.
    pub fn from_panel(
        config: &EstimationConfig,
        truck_types: &[TruckTypeRow],
        panel_rows: &[PanelRow],
    ) -> Result<Self> {
        config.validate()?;
        let fleet = Fleet::from_rows(truck_types)?;
        let locations = LocationSet::new(&config.locations, &config.other_location)?;
        let layout = StateLayout::new(&fleet, &locations)?;
        let (panel, report) = Panel::from_rows(panel_rows, &fleet, &locations)?;

        let builder = StateBuilder::new(&layout, &fleet, &locations, &config.discretization);
        let built = builder.build(&panel);
        let completed = panel.complete(&fleet, locations.other());
        let probabilities = ProbabilityTable::estimate(&built.observations);
        let starts = SimulationStart::collect(&built.observations, completed.records());

        let summary = StateSpaceSummary {
            trucks: fleet.len(),
            locations: locations.len(),
            state_variables: layout.len(),
            observations: built.observations.len(),
            distinct_states: probabilities.state_count(),
            probability_entries: probabilities.len(),
            degenerate_pairs: probabilities.degenerate_pairs(),
            starting_points: starts.len(),
            dropped_weeks: built.dropped_weeks.len(),
            dropped_records: built.dropped_records,
            panel: report,
        };
        log::info!(
            "state space: {} states over {} variables from {} observations",
            summary.distinct_states,
            summary.state_variables,
            summary.observations
        );

        Ok(Self {
            model: MarketModel {
                fleet,
                locations,
                layout,
                probabilities,
                discretization: config.discretization.clone(),
            },
            starts,
            observations: built.observations,
            summary,
        })
    }

    /// Rebuild from previously persisted tables.
    ///
    /// # Errors
    ///
    /// Fails when the tables disagree with the fleet, the location set or
    /// the persisted state variable order.
    pub fn restore(
        config: &EstimationConfig,
        truck_types: &[TruckTypeRow],
        state_variables: &[String],
        probability_rows: &[ProbabilityRow],
        state_rows: &[ObservedStateRow],
    ) -> Result<Self> {
        config.validate()?;
        let fleet = Fleet::from_rows(truck_types)?;
        let locations = LocationSet::new(&config.locations, &config.other_location)?;
        let layout = StateLayout::from_names(state_variables, &fleet, &locations)?;
        let probabilities =
            ProbabilityTable::from_rows(probability_rows, &layout, &fleet, &locations)?;

        let mut observations = Vec::with_capacity(state_rows.len());
        for row in state_rows {
            observations.push(ObservedState {
                record: PanelRecord {
                    truck: fleet.require(row.truck.trim())?,
                    date: parse_date(&row.date)?,
                    location: locations.require(&row.location)?,
                },
                state: layout.parse_state(&row.state)?,
            });
        }
        observations.sort_by_key(|o| (o.record.date, o.record.truck));
        let records: Vec<PanelRecord> = observations.iter().map(|o| o.record).collect();
        let starts = SimulationStart::collect(&observations, &records);

        let summary = StateSpaceSummary {
            trucks: fleet.len(),
            locations: locations.len(),
            state_variables: layout.len(),
            observations: observations.len(),
            distinct_states: probabilities.state_count(),
            probability_entries: probabilities.len(),
            degenerate_pairs: probabilities.degenerate_pairs(),
            starting_points: starts.len(),
            ..StateSpaceSummary::default()
        };
        Ok(Self {
            model: MarketModel {
                fleet,
                locations,
                layout,
                probabilities,
                discretization: config.discretization.clone(),
            },
            starts,
            observations,
            summary,
        })
    }

    /// Observed states in their persisted form.
    #[must_use]
    pub fn observed_state_rows(&self) -> Vec<ObservedStateRow> {
        self.observations
            .iter()
            .map(|obs| ObservedStateRow {
                truck: self.model.fleet.name(obs.record.truck).to_string(),
                date: format_date(obs.record.date),
                location: self.model.locations.name(obs.record.location).to_string(),
                state: obs.state.to_string(),
            })
            .collect()
    }

    /// Draw and evaluate one set of moment inequalities.
    #[must_use]
    pub fn moments(&self, config: &EstimationConfig, seed: u64) -> Vec<MomentSample> {
        MomentBuilder::new(&self.model, &config.simulation, &self.starts)
            .build(&config.moments, seed)
    }

    /// Moments plus the fitted parameters for one replicate.
    #[must_use]
    pub fn run_replicate(&self, config: &EstimationConfig, replicate: usize) -> ReplicateResult {
        let seed = replicate_seed(config.seed, replicate);
        let samples = self.moments(config, seed);
        let mut stats = SamplerStats::default();
        for sample in &samples {
            stats.merge(sample.stats);
        }
        let result = optimize(samples.iter().map(|s| &s.g), &config.optimizer);
        log::info!(
            "replicate {replicate}: {} moments, {} parameters, objective {:.6}, converged={}",
            samples.len(),
            result.parameters.len(),
            result.objective,
            result.converged
        );
        ReplicateResult {
            replicate,
            seed,
            samples,
            result,
            stats,
        }
    }
}

/// Outcome of one replicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateResult {
    pub replicate: usize,
    pub seed: u64,
    pub samples: Vec<MomentSample>,
    pub result: OptimizationResult,
    pub stats: SamplerStats,
}

/// One results row: a value per model parameter plus convergence.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRow {
    pub values: Vec<Option<f64>>,
    pub converged: bool,
}

/// Results across replicates, one column per model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    pub parameters: Vec<String>,
    pub rows: Vec<ResultsRow>,
}

impl ResultsTable {
    #[must_use]
    pub fn new(locations: &LocationSet, replicates: &[ReplicateResult]) -> Self {
        let all = Parameter::all(locations);
        let rows = replicates
            .iter()
            .map(|rep| ResultsRow {
                values: all.iter().map(|p| rep.result.value_of(*p)).collect(),
                converged: rep.result.converged,
            })
            .collect();
        Self {
            parameters: all.into_iter().map(|p| p.name(locations)).collect(),
            rows,
        }
    }

    /// Header row: parameter names then `Converged`.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        let mut header = self.parameters.clone();
        header.push(CONVERGED_COLUMN.to_string());
        header
    }

    /// Rendered cells; absent parameters are empty.
    #[must_use]
    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut cells: Vec<String> = row
                    .values
                    .iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default())
                    .collect();
                cells.push(if row.converged { "True" } else { "False" }.to_string());
                cells
            })
            .collect()
    }
}

/// Summary of a full estimation run.
#[derive(Debug, Clone)]
pub struct EstimationRun {
    pub summary: StateSpaceSummary,
    pub replicates: Vec<ReplicateResult>,
    pub table: ResultsTable,
}

/// Drives estimation against a source and a sink.
pub struct EstimationEngine<L, S>
where
    L: PanelSource,
    S: EstimateSink,
{
    source: L,
    sink: S,
    config: EstimationConfig,
}

impl<L, S> EstimationEngine<L, S>
where
    L: PanelSource,
    S: EstimateSink,
{
    pub const fn new(source: L, sink: S, config: EstimationConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// First stage: states and CCPs, persisted through the sink.
    ///
    /// # Errors
    ///
    /// Returns loader, schema or sink errors.
    pub fn prepare(&self) -> anyhow::Result<Prepared>
    where
        L::Error: Into<anyhow::Error>,
        S::Error: Into<anyhow::Error>,
    {
        let truck_types = self.source.load_truck_types().map_err(Into::into)?;
        let panel = self.source.load_panel().map_err(Into::into)?;
        let prepared = Prepared::from_panel(&self.config, &truck_types, &panel)?;

        let model = &prepared.model;
        self.sink
            .save_probabilities(&model.probabilities.to_rows(&model.fleet, &model.locations))
            .map_err(Into::into)?;
        self.sink
            .save_state_variables(model.layout.names())
            .map_err(Into::into)?;
        self.sink
            .save_observed_states(&prepared.observed_state_rows())
            .map_err(Into::into)?;
        Ok(prepared)
    }

    /// Both stages for every configured replicate; results go to the sink.
    ///
    /// # Errors
    ///
    /// Returns loader, schema or sink errors.
    pub fn estimate(&self) -> anyhow::Result<EstimationRun>
    where
        L::Error: Into<anyhow::Error>,
        S::Error: Into<anyhow::Error>,
    {
        let prepared = self.prepare()?;
        let replicates: Vec<ReplicateResult> = (0..self.config.replicates)
            .map(|replicate| prepared.run_replicate(&self.config, replicate))
            .collect();
        let table = ResultsTable::new(&prepared.model.locations, &replicates);
        self.sink.save_results(&table).map_err(Into::into)?;
        Ok(EstimationRun {
            summary: prepared.summary,
            replicates,
            table,
        })
    }
}
