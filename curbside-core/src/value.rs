//! Monte Carlo value functions.

use crate::numbers::u32_to_f64;
use crate::panel::TruckId;
use crate::payoff::LinearPayoff;
use crate::policy::{PolicyChoice, SamplerStats};
use crate::rng::PathStreams;
use crate::simulation::{PathSimulator, SimulationStart};

/// Averaged discounted payoff of one truck under one policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEstimate {
    pub value: LinearPayoff,
    pub stats: SamplerStats,
}

/// Averages `paths` simulated paths with equal weight.
#[derive(Debug, Clone)]
pub struct ValueFunctionEstimator<'a> {
    simulator: PathSimulator<'a>,
    paths: u32,
}

impl<'a> ValueFunctionEstimator<'a> {
    #[must_use]
    pub const fn new(simulator: PathSimulator<'a>, paths: u32) -> Self {
        Self { simulator, paths }
    }

    /// Per-truck value functions.
    ///
    /// Path `k` draws from streams derived from `(seed, k)`, so two calls with
    /// the same seed share every fleet draw whatever policy they follow.
    pub fn estimate_fleet(
        &self,
        start: &SimulationStart,
        choice: PolicyChoice,
        seed: u64,
    ) -> (Vec<LinearPayoff>, SamplerStats) {
        let mut values = vec![LinearPayoff::default(); self.simulator.trucks()];
        let mut stats = SamplerStats::default();
        if self.paths == 0 {
            return (values, stats);
        }
        let weight = 1.0 / u32_to_f64(self.paths);
        for path in 0..self.paths {
            let mut streams = PathStreams::for_path(seed, path);
            let outcome = self.simulator.simulate(start, choice, &mut streams);
            log::debug!(
                "path {path} ({choice}) from {} took {} draws",
                start.date,
                outcome.draws
            );
            for (value, payoff) in values.iter_mut().zip(&outcome.payoffs) {
                *value += &(payoff * weight);
            }
            stats.merge(outcome.stats);
        }
        (values, stats)
    }

    /// Value function of `truck`, or `None` when the truck is not part of
    /// the simulated fleet.
    #[must_use]
    pub fn estimate(
        &self,
        start: &SimulationStart,
        choice: PolicyChoice,
        truck: TruckId,
        seed: u64,
    ) -> Option<ValueEstimate> {
        if truck.index() >= self.simulator.trucks() {
            return None;
        }
        let (mut values, stats) = self.estimate_fleet(start, choice, seed);
        let value = values.swap_remove(truck.index());
        Some(ValueEstimate { value, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccp::ProbabilityTable;
    use crate::config::{DiscretizationConfig, SimulationConfig};
    use crate::model::MarketModel;
    use crate::panel::{Fleet, LocationSet, TruckTypeRow, parse_date};
    use crate::payoff::Parameter;
    use crate::state::StateLayout;

    fn model() -> MarketModel {
        let fleet = Fleet::from_rows(&[TruckTypeRow::new("1", "x"), TruckTypeRow::new("2", "y")])
            .unwrap();
        let locations = LocationSet::new(&["A", "B"], "O").unwrap();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        MarketModel {
            fleet,
            locations,
            layout,
            probabilities: ProbabilityTable::default(),
            discretization: DiscretizationConfig::default(),
        }
    }

    #[test]
    fn averages_paths_with_equal_weight() {
        let model = model();
        let settings = SimulationConfig {
            periods: 2,
            discount: 1.0,
            paths: 4,
        };
        let estimator =
            ValueFunctionEstimator::new(PathSimulator::new(&model, &settings), settings.paths);
        let date = parse_date("2014-06-10").unwrap();
        let start = SimulationStart::new(model.layout.blank_state(date), date);
        let estimate = estimator
            .estimate(&start, PolicyChoice::Optimal, TruckId(0), 17)
            .unwrap();
        assert!((estimate.value.coefficient(Parameter::Intercept) - 2.0).abs() < 1e-12);
        assert_eq!(estimate.stats.unknown_states, 8);
        let location_mass: f64 = model
            .locations
            .ids()
            .map(|l| estimate.value.coefficient(Parameter::Location(l)))
            .sum();
        assert!((location_mass - 2.0).abs() < 1e-12);
    }

    #[test]
    fn same_seed_reproduces_value() {
        let model = model();
        let settings = SimulationConfig {
            periods: 5,
            discount: 0.9,
            paths: 3,
        };
        let estimator =
            ValueFunctionEstimator::new(PathSimulator::new(&model, &settings), settings.paths);
        let date = parse_date("2014-06-12").unwrap();
        let start = SimulationStart::new(model.layout.blank_state(date), date);
        let a = estimator.estimate(&start, PolicyChoice::Optimal, TruckId(1), 5);
        let b = estimator.estimate(&start, PolicyChoice::Optimal, TruckId(1), 5);
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn truck_outside_fleet_has_no_value() {
        let model = model();
        let settings = SimulationConfig {
            periods: 2,
            discount: 0.9,
            paths: 2,
        };
        let estimator =
            ValueFunctionEstimator::new(PathSimulator::new(&model, &settings), settings.paths);
        let date = parse_date("2014-06-10").unwrap();
        let start = SimulationStart::new(model.layout.blank_state(date), date);
        let fleet_size = u16::try_from(model.fleet.len()).unwrap();
        assert!(
            estimator
                .estimate(&start, PolicyChoice::Optimal, TruckId(fleet_size), 3)
                .is_none()
        );
    }
}
