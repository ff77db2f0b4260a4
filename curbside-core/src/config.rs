//! Run configuration for an estimation: location set, discretization cutoffs,
//! simulation horizon, moment sampling and optimizer bounds.
//!
//! Every field carries a serde default so partial JSON files are accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimizer::OptimizerConfig;

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("discount must be in (0, 1] (got {value})")]
    Discount { value: f64 },
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: usize,
        value: usize,
    },
    #[error("at least one known location is required")]
    NoLocations,
    #[error("location `{name}` is listed more than once")]
    DuplicateLocation { name: String },
    #[error("catch-all location `{name}` must not also be a known location")]
    OtherShadowsKnown { name: String },
    #[error("optimizer tolerance {field} must be positive (got {value})")]
    Tolerance { field: &'static str, value: f64 },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Cutoffs used to turn counts into 0/1 features. A feature is 1 when the
/// count is strictly greater than its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscretizationConfig {
    #[serde(default = "DiscretizationConfig::default_joint_threshold")]
    pub joint_count_threshold: u32,
    #[serde(default = "DiscretizationConfig::default_joint_threshold")]
    pub joint_diversity_threshold: u32,
    #[serde(default)]
    pub frequency_threshold: u32,
    #[serde(default = "DiscretizationConfig::default_current_threshold")]
    pub current_count_threshold: u32,
    #[serde(default = "DiscretizationConfig::default_current_threshold")]
    pub current_diversity_threshold: u32,
}

impl DiscretizationConfig {
    const fn default_joint_threshold() -> u32 {
        4
    }

    const fn default_current_threshold() -> u32 {
        2
    }
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        Self {
            joint_count_threshold: Self::default_joint_threshold(),
            joint_diversity_threshold: Self::default_joint_threshold(),
            frequency_threshold: 0,
            current_count_threshold: Self::default_current_threshold(),
            current_diversity_threshold: Self::default_current_threshold(),
        }
    }
}

/// Forward-simulation horizon and Monte Carlo effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated days per path.
    #[serde(default = "SimulationConfig::default_periods")]
    pub periods: u32,
    #[serde(default = "SimulationConfig::default_discount")]
    pub discount: f64,
    /// Paths averaged per value function.
    #[serde(default = "SimulationConfig::default_paths")]
    pub paths: u32,
}

impl SimulationConfig {
    const fn default_periods() -> u32 {
        40
    }

    const fn default_discount() -> f64 {
        0.99
    }

    const fn default_paths() -> u32 {
        5
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            periods: Self::default_periods(),
            discount: Self::default_discount(),
            paths: Self::default_paths(),
        }
    }
}

/// How many inequalities are drawn per replicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentConfig {
    #[serde(default = "MomentConfig::default_num_draws")]
    pub num_draws: usize,
}

impl MomentConfig {
    const fn default_num_draws() -> usize {
        5
    }
}

impl Default for MomentConfig {
    fn default() -> Self {
        Self {
            num_draws: Self::default_num_draws(),
        }
    }
}

/// Top-level configuration for an estimation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Known locations, in the order their fixed effects are reported.
    #[serde(default = "EstimationConfig::default_locations")]
    pub locations: Vec<String>,
    /// Catch-all location for missing truck-days and unknown spots.
    #[serde(default = "EstimationConfig::default_other_location")]
    pub other_location: String,
    #[serde(default)]
    pub discretization: DiscretizationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub moments: MomentConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default = "EstimationConfig::default_replicates")]
    pub replicates: usize,
    #[serde(default = "EstimationConfig::default_seed")]
    pub seed: u64,
}

impl EstimationConfig {
    fn default_locations() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    }

    fn default_other_location() -> String {
        "Other".to_string()
    }

    const fn default_replicates() -> usize {
        1
    }

    const fn default_seed() -> u64 {
        1234
    }

    /// Parse a configuration from JSON, filling missing fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result fails validation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants that the estimator relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations);
        }
        for (idx, name) in self.locations.iter().enumerate() {
            if self.locations[..idx].contains(name) {
                return Err(ConfigError::DuplicateLocation { name: name.clone() });
            }
        }
        if self.locations.contains(&self.other_location) {
            return Err(ConfigError::OtherShadowsKnown {
                name: self.other_location.clone(),
            });
        }
        let discount = self.simulation.discount;
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(ConfigError::Discount { value: discount });
        }
        ensure_min("simulation.paths", self.simulation.paths as usize, 1)?;
        ensure_min("moments.num_draws", self.moments.num_draws, 1)?;
        ensure_min("replicates", self.replicates, 1)?;
        self.optimizer.validate()
    }
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            locations: Self::default_locations(),
            other_location: Self::default_other_location(),
            discretization: DiscretizationConfig::default(),
            simulation: SimulationConfig::default(),
            moments: MomentConfig::default(),
            optimizer: OptimizerConfig::default(),
            replicates: Self::default_replicates(),
            seed: Self::default_seed(),
        }
    }
}

fn ensure_min(field: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::MinViolation { field, min, value });
    }
    Ok(())
}
