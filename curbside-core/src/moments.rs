//! Moment inequalities `g = V(optimal) - V(alternative)`.

use chrono::NaiveDate;
use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use crate::config::{MomentConfig, SimulationConfig};
use crate::model::MarketModel;
use crate::panel::TruckId;
use crate::payoff::LinearPayoff;
use crate::policy::{Deviation, PolicyChoice, SamplerStats};
use crate::rng::derive_stream_seed;
use crate::simulation::{PathSimulator, SimulationStart};
use crate::state::State;
use crate::value::ValueFunctionEstimator;

/// A (truck, start, alternative) triple eligible for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MomentCandidate {
    pub truck: TruckId,
    /// Index into the starting points.
    pub start: usize,
    pub choice: PolicyChoice,
}

/// One evaluated inequality.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentSample {
    pub truck: TruckId,
    pub choice: PolicyChoice,
    pub date: NaiveDate,
    pub state: State,
    pub seed: u64,
    /// Value under the estimated policy minus value under the alternative.
    pub g: LinearPayoff,
    pub stats: SamplerStats,
}

/// Samples starting points and alternatives and values both policies.
#[derive(Debug, Clone, Copy)]
pub struct MomentBuilder<'a> {
    model: &'a MarketModel,
    simulation: &'a SimulationConfig,
    starts: &'a [SimulationStart],
}

impl<'a> MomentBuilder<'a> {
    #[must_use]
    pub const fn new(
        model: &'a MarketModel,
        simulation: &'a SimulationConfig,
        starts: &'a [SimulationStart],
    ) -> Self {
        Self {
            model,
            simulation,
            starts,
        }
    }

    /// Every truck × start × alternative, alternatives being a uniform
    /// deviation and each forced location.
    #[must_use]
    pub fn candidates(&self) -> Vec<MomentCandidate> {
        let mut deviations = vec![Deviation::Random];
        deviations.extend(self.model.locations.ids().map(Deviation::Specific));
        let mut out =
            Vec::with_capacity(self.model.fleet.len() * self.starts.len() * deviations.len());
        for truck in self.model.fleet.ids() {
            for start in 0..self.starts.len() {
                for &deviation in &deviations {
                    out.push(MomentCandidate {
                        truck,
                        start,
                        choice: PolicyChoice::Deviate { truck, deviation },
                    });
                }
            }
        }
        out
    }

    /// Draw `num_draws` candidates without replacement and evaluate them in
    /// parallel. Results follow draw order and do not depend on scheduling.
    #[must_use]
    pub fn build(&self, settings: &MomentConfig, seed: u64) -> Vec<MomentSample> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            log::warn!("no moment candidates: the panel produced no starting states");
            return Vec::new();
        }
        let amount = settings.num_draws.min(candidates.len());
        if amount < settings.num_draws {
            log::warn!(
                "requested {} moment draws but only {} candidates exist",
                settings.num_draws,
                candidates.len()
            );
        }
        let mut rng = ChaCha20Rng::seed_from_u64(derive_stream_seed(seed, b"moment-draws", 0));
        let chosen: Vec<MomentCandidate> = index::sample(&mut rng, candidates.len(), amount)
            .into_iter()
            .map(|idx| candidates[idx])
            .collect();

        chosen
            .into_par_iter()
            .enumerate()
            .filter_map(|(sample, candidate)| {
                let start = self.starts.get(candidate.start)?;
                let sample_seed =
                    derive_stream_seed(seed ^ start.state.fingerprint(), b"sample", sample as u64);
                self.evaluate(candidate, sample_seed)
            })
            .collect()
    }

    /// Value one candidate under common random numbers.
    ///
    /// Returns `None` for a candidate whose start or truck does not exist.
    #[must_use]
    pub fn evaluate(&self, candidate: MomentCandidate, seed: u64) -> Option<MomentSample> {
        let start = self.starts.get(candidate.start)?;
        let estimator = ValueFunctionEstimator::new(
            PathSimulator::new(self.model, self.simulation),
            self.simulation.paths,
        );
        let optimal = estimator.estimate(start, PolicyChoice::Optimal, candidate.truck, seed)?;
        let mut stats = optimal.stats;
        let g = if candidate.choice == PolicyChoice::Optimal {
            LinearPayoff::default()
        } else {
            let alternative = estimator.estimate(start, candidate.choice, candidate.truck, seed)?;
            stats.merge(alternative.stats);
            optimal.value - &alternative.value
        };
        log::debug!(
            "moment for truck {} ({}) from {}: {} parameters",
            self.model.fleet.name(candidate.truck),
            candidate.choice,
            start.date,
            g.parameters().count()
        );
        Some(MomentSample {
            truck: candidate.truck,
            choice: candidate.choice,
            date: start.date,
            state: start.state.clone(),
            seed,
            g,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccp::ProbabilityTable;
    use crate::config::DiscretizationConfig;
    use crate::panel::{Fleet, LocationSet, TruckTypeRow, parse_date};
    use crate::state::StateLayout;

    fn model() -> MarketModel {
        let fleet = Fleet::from_rows(&[TruckTypeRow::new("1", "x"), TruckTypeRow::new("2", "y")])
            .unwrap();
        let locations = LocationSet::new(&["A"], "O").unwrap();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        MarketModel {
            fleet,
            locations,
            layout,
            probabilities: ProbabilityTable::default(),
            discretization: DiscretizationConfig::default(),
        }
    }

    fn starts(model: &MarketModel) -> Vec<SimulationStart> {
        ["2014-06-10", "2014-06-13"]
            .iter()
            .map(|d| {
                let date = parse_date(d).unwrap();
                SimulationStart::new(model.layout.blank_state(date), date)
            })
            .collect()
    }

    #[test]
    fn candidates_cover_trucks_starts_and_alternatives() {
        let model = model();
        let starts = starts(&model);
        let settings = SimulationConfig::default();
        let builder = MomentBuilder::new(&model, &settings, &starts);
        // 2 trucks × 2 starts × (random + 2 locations)
        assert_eq!(builder.candidates().len(), 12);
    }

    #[test]
    fn optimal_against_optimal_is_exactly_zero() {
        let model = model();
        let starts = starts(&model);
        let settings = SimulationConfig {
            periods: 4,
            discount: 0.9,
            paths: 2,
        };
        let builder = MomentBuilder::new(&model, &settings, &starts);
        let sample = builder.evaluate(
            MomentCandidate {
                truck: TruckId(0),
                start: 0,
                choice: PolicyChoice::Optimal,
            },
            42,
        );
        assert_eq!(sample.unwrap().g, LinearPayoff::default());
    }

    #[test]
    fn candidate_outside_fleet_or_starts_is_skipped() {
        let model = model();
        let starts = starts(&model);
        let settings = SimulationConfig {
            periods: 2,
            discount: 0.9,
            paths: 1,
        };
        let builder = MomentBuilder::new(&model, &settings, &starts);
        let deviation = PolicyChoice::Deviate {
            truck: TruckId(9),
            deviation: Deviation::Random,
        };
        let stray_truck = MomentCandidate {
            truck: TruckId(9),
            start: 0,
            choice: deviation,
        };
        let stray_start = MomentCandidate {
            truck: TruckId(0),
            start: starts.len(),
            choice: PolicyChoice::Optimal,
        };
        assert!(builder.evaluate(stray_truck, 7).is_none());
        assert!(builder.evaluate(stray_start, 7).is_none());
    }

    #[test]
    fn build_is_deterministic_and_without_replacement() {
        let model = model();
        let starts = starts(&model);
        let settings = SimulationConfig {
            periods: 3,
            discount: 0.99,
            paths: 2,
        };
        let builder = MomentBuilder::new(&model, &settings, &starts);
        let draws = MomentConfig { num_draws: 50 };
        let first = builder.build(&draws, 1234);
        let second = builder.build(&draws, 1234);
        assert_eq!(first.len(), 12);
        assert_eq!(first, second);
        let mut keys: Vec<_> = first
            .iter()
            .map(|s| (s.truck, s.date, format!("{}", s.choice)))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 12);
    }
}
