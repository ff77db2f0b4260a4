//! Flow payoffs linear in the structural parameters.
//!
//! Payoffs are kept as sparse linear forms so a simulated path can be
//! valued once and re-evaluated cheaply for every candidate parameter vector.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use crate::config::DiscretizationConfig;
use crate::numbers::binarize;
use crate::panel::{Fleet, LocationId, LocationSet};
use crate::policy::ActionProfile;
use crate::state::{State, StateLayout};

const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// A structural coefficient of the flow payoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Parameter {
    Intercept,
    /// Day dummy, 0 = Monday.
    Day(u8),
    /// Quarter dummy, 1 through 4.
    Quarter(u8),
    /// Location fixed effect.
    Location(LocationId),
    HighHistoricCount,
    HighHistoricDiversity,
    HighHistoricFrequency,
    HighCurrentCount,
    HighCurrentDiversity,
}

impl Parameter {
    /// Every parameter of the model for a location set, in reporting order.
    #[must_use]
    pub fn all(locations: &LocationSet) -> Vec<Self> {
        let mut params = vec![Self::Intercept];
        params.extend((0..7).map(Self::Day));
        params.extend((1..=4).map(Self::Quarter));
        params.extend(locations.ids().map(Self::Location));
        params.extend([
            Self::HighHistoricCount,
            Self::HighHistoricDiversity,
            Self::HighHistoricFrequency,
            Self::HighCurrentCount,
            Self::HighCurrentDiversity,
        ]);
        params
    }

    /// Stable column name.
    #[must_use]
    pub fn name(self, locations: &LocationSet) -> String {
        match self {
            Self::Location(location) => format!("location{}", locations.name(location)),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intercept => f.write_str("intercept"),
            Self::Day(day) => {
                f.write_str(DAY_NAMES.get(usize::from(*day)).copied().unwrap_or("day"))
            }
            Self::Quarter(q) => write!(f, "q{q}"),
            Self::Location(location) => write!(f, "location#{}", location.0),
            Self::HighHistoricCount => f.write_str("high_historic_count"),
            Self::HighHistoricDiversity => f.write_str("high_historic_diversity"),
            Self::HighHistoricFrequency => f.write_str("high_historic_freq"),
            Self::HighCurrentCount => f.write_str("high_current_count"),
            Self::HighCurrentDiversity => f.write_str("high_current_diversity"),
        }
    }
}

/// `constant + Σ coefficient · parameter` with zero coefficients pruned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearPayoff {
    constant: f64,
    terms: BTreeMap<Parameter, f64>,
}

impl LinearPayoff {
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: BTreeMap::new(),
        }
    }

    /// Builder-style term insertion.
    #[must_use]
    pub fn with(mut self, parameter: Parameter, coefficient: f64) -> Self {
        self.add_term(parameter, coefficient);
        self
    }

    pub fn add_term(&mut self, parameter: Parameter, coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        let entry = self.terms.entry(parameter).or_insert(0.0);
        *entry += coefficient;
        if *entry == 0.0 {
            self.terms.remove(&parameter);
        }
    }

    #[must_use]
    pub const fn constant_term(&self) -> f64 {
        self.constant
    }

    #[must_use]
    pub fn coefficient(&self, parameter: Parameter) -> f64 {
        self.terms.get(&parameter).copied().unwrap_or(0.0)
    }

    /// Parameters with a non-zero coefficient, ascending.
    pub fn parameters(&self) -> impl Iterator<Item = Parameter> + '_ {
        self.terms.keys().copied()
    }

    pub fn terms(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        self.terms.iter().map(|(p, c)| (*p, *c))
    }

    /// Substitute numeric values for every parameter.
    pub fn evaluate<F: Fn(Parameter) -> f64>(&self, value: F) -> f64 {
        self.terms
            .iter()
            .fold(self.constant, |acc, (p, c)| acc + c * value(*p))
    }

    /// Multiply every coefficient and the constant by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = Self::constant(self.constant * factor);
        for (p, c) in &self.terms {
            out.add_term(*p, c * factor);
        }
        out
    }
}

impl AddAssign<&LinearPayoff> for LinearPayoff {
    fn add_assign(&mut self, rhs: &LinearPayoff) {
        self.constant += rhs.constant;
        for (p, c) in &rhs.terms {
            self.add_term(*p, *c);
        }
    }
}

impl Add<&LinearPayoff> for LinearPayoff {
    type Output = LinearPayoff;

    fn add(mut self, rhs: &LinearPayoff) -> LinearPayoff {
        self += rhs;
        self
    }
}

impl Sub<&LinearPayoff> for LinearPayoff {
    type Output = LinearPayoff;

    fn sub(mut self, rhs: &LinearPayoff) -> LinearPayoff {
        self += &rhs.scaled(-1.0);
        self
    }
}

impl Mul<f64> for &LinearPayoff {
    type Output = LinearPayoff;

    fn mul(self, rhs: f64) -> LinearPayoff {
        self.scaled(rhs)
    }
}

/// Builds per-truck flow payoffs for one period.
#[derive(Debug, Clone, Copy)]
pub struct PayoffEvaluator<'a> {
    layout: &'a StateLayout,
    fleet: &'a Fleet,
    locations: usize,
    thresholds: &'a DiscretizationConfig,
}

impl<'a> PayoffEvaluator<'a> {
    #[must_use]
    pub fn new(
        layout: &'a StateLayout,
        fleet: &'a Fleet,
        locations: &LocationSet,
        thresholds: &'a DiscretizationConfig,
    ) -> Self {
        Self {
            layout,
            fleet,
            locations: locations.len(),
            thresholds,
        }
    }

    /// Binarized (count, diversity) of the trucks at each location this period.
    #[must_use]
    pub fn occupancy(&self, profile: &ActionProfile) -> Vec<(u8, u8)> {
        let mut counts = vec![0usize; self.locations];
        let mut kinds: Vec<BTreeSet<u16>> = vec![BTreeSet::new(); self.locations];
        for action in profile.actions() {
            let loc = action.location.index();
            if loc < self.locations {
                counts[loc] += 1;
                kinds[loc].insert(self.fleet.kind_id(action.truck));
            }
        }
        counts
            .into_iter()
            .zip(kinds)
            .map(|(count, kinds)| {
                (
                    binarize(count, self.thresholds.current_count_threshold),
                    binarize(kinds.len(), self.thresholds.current_diversity_threshold),
                )
            })
            .collect()
    }

    /// Flow payoff of every truck, ordered by truck.
    #[must_use]
    pub fn profit_vector(&self, state: &State, profile: &ActionProfile) -> Vec<LinearPayoff> {
        let occupancy = self.occupancy(profile);
        let day = state.get(self.layout.day_slot());
        let quarter = state.get(self.layout.quarter_slot());
        profile
            .actions()
            .iter()
            .map(|action| {
                let location = action.location;
                let (current_count, current_diversity) =
                    occupancy.get(location.index()).copied().unwrap_or((0, 0));
                LinearPayoff::constant(action.shock)
                    .with(Parameter::Intercept, 1.0)
                    .with(Parameter::Day(day), 1.0)
                    .with(Parameter::Quarter(quarter), 1.0)
                    .with(Parameter::Location(location), 1.0)
                    .with(
                        Parameter::HighHistoricCount,
                        f64::from(state.get(self.layout.joint_count_slot(location))),
                    )
                    .with(
                        Parameter::HighHistoricDiversity,
                        f64::from(state.get(self.layout.joint_diversity_slot(location))),
                    )
                    .with(
                        Parameter::HighHistoricFrequency,
                        f64::from(state.get(self.layout.frequency_slot(action.truck, location))),
                    )
                    .with(Parameter::HighCurrentCount, f64::from(current_count))
                    .with(Parameter::HighCurrentDiversity, f64::from(current_diversity))
            })
            .collect()
    }
}
