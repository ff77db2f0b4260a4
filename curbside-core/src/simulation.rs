//! Forward simulation of one discounted payoff path.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SimulationConfig;
use crate::model::MarketModel;
use crate::panel::{PanelRecord, WeekKey};
use crate::payoff::{LinearPayoff, PayoffEvaluator};
use crate::policy::{PolicyChoice, PolicySampler, SamplerStats};
use crate::rng::PathStreams;
use crate::state::{ObservedState, State};
use crate::transition::{ActionLog, StateTransition};

/// Where a simulated path begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationStart {
    pub state: State,
    pub date: NaiveDate,
    /// Observed actions earlier in the start week, seeding the action log.
    pub history: Vec<PanelRecord>,
}

impl SimulationStart {
    #[must_use]
    pub fn new(state: State, date: NaiveDate) -> Self {
        Self {
            state,
            date,
            history: Vec::new(),
        }
    }

    /// Distinct (date, state) starting points with their same-week history.
    ///
    /// `records` should be the completed panel the observations came from.
    #[must_use]
    pub fn collect(observations: &[ObservedState], records: &[PanelRecord]) -> Vec<Self> {
        let mut by_week: BTreeMap<WeekKey, Vec<PanelRecord>> = BTreeMap::new();
        for record in records {
            by_week
                .entry(WeekKey::of(record.date))
                .or_default()
                .push(*record);
        }

        let mut seen: BTreeSet<(NaiveDate, &State)> = BTreeSet::new();
        let mut starts = Vec::new();
        for obs in observations {
            if !seen.insert((obs.record.date, &obs.state)) {
                continue;
            }
            let mut history: Vec<PanelRecord> = by_week
                .get(&WeekKey::of(obs.record.date))
                .map(|week| {
                    week.iter()
                        .filter(|r| r.date < obs.record.date)
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            history.sort_by_key(|r| (r.date, r.truck));
            starts.push(Self {
                state: obs.state.clone(),
                date: obs.record.date,
                history,
            });
        }
        starts
    }
}

/// Result of one simulated path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathOutcome {
    /// Discounted payoff sum per truck, ordered by truck.
    pub payoffs: Vec<LinearPayoff>,
    pub stats: SamplerStats,
    pub draws: u64,
}

/// Simulates paths for a fixed horizon and discount.
#[derive(Debug, Clone)]
pub struct PathSimulator<'a> {
    sampler: PolicySampler<'a>,
    payoffs: PayoffEvaluator<'a>,
    transition: StateTransition<'a>,
    periods: u32,
    discount: f64,
}

impl<'a> PathSimulator<'a> {
    #[must_use]
    pub fn new(model: &'a MarketModel, settings: &SimulationConfig) -> Self {
        Self {
            sampler: model.sampler(),
            payoffs: model.payoffs(),
            transition: model.transition(),
            periods: settings.periods,
            discount: settings.discount,
        }
    }

    #[must_use]
    pub fn trucks(&self) -> usize {
        self.sampler.trucks()
    }

    /// Run one path: sample, value, accumulate `discount^t · payoff`, advance.
    pub fn simulate(
        &self,
        start: &SimulationStart,
        choice: PolicyChoice,
        streams: &mut PathStreams,
    ) -> PathOutcome {
        let mut payoffs = vec![LinearPayoff::default(); self.sampler.trucks()];
        let mut stats = SamplerStats::default();
        let mut log = ActionLog::new(start.history.clone());
        let mut state = start.state.clone();
        let mut date = start.date;
        let mut weight = 1.0;

        for _ in 0..self.periods {
            let profile = self.sampler.sample(&state, choice, streams, &mut stats);
            let profits = self.payoffs.profit_vector(&state, &profile);
            for (total, profit) in payoffs.iter_mut().zip(&profits) {
                *total += &(profit * weight);
            }
            log.push_profile(date, &profile);
            let Some(next_date) = date.checked_add_signed(Duration::days(1)) else {
                break;
            };
            state = self.transition.advance(&state, &mut log, next_date);
            date = next_date;
            weight *= self.discount;
        }

        PathOutcome {
            payoffs,
            stats,
            draws: streams.draws(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccp::ProbabilityTable;
    use crate::config::DiscretizationConfig;
    use crate::panel::{Fleet, LocationId, LocationSet, TruckId, TruckTypeRow, parse_date};
    use crate::payoff::Parameter;
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

    #[test]
    fn zero_periods_yield_zero_payoffs() {
        let model = model();
        let settings = SimulationConfig {
            periods: 0,
            ..SimulationConfig::default()
        };
        let simulator = PathSimulator::new(&model, &settings);
        let start = SimulationStart::new(
            model.layout.blank_state(parse_date("2014-06-09").unwrap()),
            parse_date("2014-06-09").unwrap(),
        );
        let mut streams = PathStreams::for_path(1, 0);
        let outcome = simulator.simulate(&start, PolicyChoice::Optimal, &mut streams);
        assert_eq!(outcome.payoffs.len(), 2);
        assert!(outcome.payoffs.iter().all(|p| *p == LinearPayoff::default()));
        assert_eq!(outcome.draws, 0);
    }

    #[test]
    fn discount_weights_each_period() {
        let model = model();
        let settings = SimulationConfig {
            periods: 3,
            discount: 0.5,
            paths: 1,
        };
        let simulator = PathSimulator::new(&model, &settings);
        let date = parse_date("2014-06-10").unwrap();
        let start = SimulationStart::new(model.layout.blank_state(date), date);
        let mut streams = PathStreams::for_path(3, 0);
        let outcome = simulator.simulate(&start, PolicyChoice::Optimal, &mut streams);
        // Intercept appears once per period with weight 1 + 0.5 + 0.25.
        for payoff in &outcome.payoffs {
            assert!((payoff.coefficient(Parameter::Intercept) - 1.75).abs() < 1e-12);
        }
        assert_eq!(outcome.stats.unknown_states, 3);
    }

    #[test]
    fn forced_deviation_pins_location_effect() {
        let model = model();
        let settings = SimulationConfig {
            periods: 2,
            discount: 1.0,
            paths: 1,
        };
        let simulator = PathSimulator::new(&model, &settings);
        let date = parse_date("2014-06-10").unwrap();
        let start = SimulationStart::new(model.layout.blank_state(date), date);
        let choice = PolicyChoice::Deviate {
            truck: TruckId(1),
            deviation: crate::policy::Deviation::Specific(LocationId(0)),
        };
        let outcome = simulator.simulate(&start, choice, &mut PathStreams::for_path(3, 0));
        assert!(
            (outcome.payoffs[1].coefficient(Parameter::Location(LocationId(0))) - 2.0).abs()
                < 1e-12
        );
    }

    #[test]
    fn starts_carry_same_week_history() {
        let date = parse_date("2014-06-11").unwrap();
        let state = State::from_values(&[0, 2]);
        let record = |day: &str, truck: u16| PanelRecord {
            truck: TruckId(truck),
            date: parse_date(day).unwrap(),
            location: LocationId(0),
        };
        let observations = vec![
            ObservedState {
                record: record("2014-06-11", 0),
                state: state.clone(),
            },
            ObservedState {
                record: record("2014-06-11", 1),
                state: state.clone(),
            },
        ];
        let records = vec![
            record("2014-06-06", 0),
            record("2014-06-09", 0),
            record("2014-06-10", 1),
            record("2014-06-11", 0),
        ];
        let starts = SimulationStart::collect(&observations, &records);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].date, date);
        assert_eq!(starts[0].history.len(), 2);
    }
}
