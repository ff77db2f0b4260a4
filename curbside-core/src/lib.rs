//! Two-step BBL estimation of food-truck location choice.
//!
//! The first stage turns a panel of daily truck locations into discretized
//! weekly states and conditional choice probabilities. The second stage
//! forward-simulates discounted payoffs under the estimated policy and under
//! one-truck deviations, and fits the flow-payoff parameters by minimizing the
//! violated moment inequalities.

pub mod ccp;
pub mod config;
pub mod error;
pub mod estimation;
pub mod model;
pub mod moments;
pub mod numbers;
pub mod optimizer;
pub mod panel;
pub mod payoff;
pub mod policy;
pub mod rng;
pub mod simulation;
pub mod state;
pub mod transition;
pub mod value;

pub use ccp::{PROBABILITY_COLUMNS, ProbabilityRow, ProbabilityTable, StateId};
pub use config::{
    ConfigError, DiscretizationConfig, EstimationConfig, MomentConfig, SimulationConfig,
};
pub use error::{CurbsideError, Result};
pub use estimation::{
    CONVERGED_COLUMN, EstimateSink, EstimationEngine, EstimationRun, ObservedStateRow,
    PanelSource, Prepared, ReplicateResult, ResultsRow, ResultsTable, STATE_COLUMNS,
    STATE_VARIABLE_COLUMN, StateSpaceSummary,
};
pub use model::MarketModel;
pub use moments::{MomentBuilder, MomentCandidate, MomentSample};
pub use optimizer::{
    Minimum, MomentObjective, OptimizationResult, OptimizerConfig, Termination, nelder_mead,
    optimize,
};
pub use panel::{
    Fleet, LocationId, LocationSet, PANEL_COLUMNS, Panel, PanelRecord, PanelReport, PanelRow,
    TRUCK_TYPE_COLUMNS, TruckId, TruckTypeRow, WeekKey, require_columns,
};
pub use payoff::{LinearPayoff, Parameter, PayoffEvaluator};
pub use policy::{Action, ActionProfile, Deviation, PolicyChoice, PolicySampler, SamplerStats};
pub use rng::{PathStreams, ShockStream, derive_stream_seed, replicate_seed};
pub use simulation::{PathOutcome, PathSimulator, SimulationStart};
pub use state::{BuiltStates, ObservedState, State, StateBuilder, StateLayout};
pub use transition::{ActionLog, Boundary, StateTransition};
pub use value::{ValueEstimate, ValueFunctionEstimator};
