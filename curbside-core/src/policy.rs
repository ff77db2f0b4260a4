//! Action sampling by Hotz-Miller inversion of the estimated CCPs.

use rand::RngCore;
use rand_distr::{Distribution, Exp1};
use std::fmt;

use crate::ccp::ProbabilityTable;
use crate::numbers::{index_to_u8, index_to_u16};
use crate::panel::{LocationId, LocationSet, TruckId};
use crate::rng::PathStreams;
use crate::state::State;

/// How a deviating truck picks its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deviation {
    /// Uniform over all locations.
    Random,
    /// Always the given location.
    Specific(LocationId),
}

impl Deviation {
    /// Human-readable label using location names.
    #[must_use]
    pub fn label(self, locations: &LocationSet) -> String {
        match self {
            Self::Random => "Random".to_string(),
            Self::Specific(location) => format!("Specific({})", locations.name(location)),
        }
    }
}

/// Policy followed by the whole fleet during one simulated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyChoice {
    /// Every truck follows its estimated policy.
    Optimal,
    /// One truck deviates; the rest follow their estimated policy.
    Deviate { truck: TruckId, deviation: Deviation },
}

impl PolicyChoice {
    /// Label of the policy the valued truck follows, using location names.
    #[must_use]
    pub fn label(self, locations: &LocationSet) -> String {
        match self {
            Self::Optimal => "Optimal".to_string(),
            Self::Deviate { deviation, .. } => deviation.label(locations),
        }
    }
}

impl fmt::Display for PolicyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optimal => f.write_str("optimal"),
            Self::Deviate {
                truck,
                deviation: Deviation::Random,
            } => write!(f, "truck #{} random", truck.0),
            Self::Deviate {
                truck,
                deviation: Deviation::Specific(location),
            } => write!(f, "truck #{} forced to location #{}", truck.0, location.0),
        }
    }
}

/// One truck's choice for a period together with its private shock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Action {
    pub truck: TruckId,
    pub location: LocationId,
    pub shock: f64,
}

/// Actions of every truck for one period, indexed by truck.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionProfile {
    actions: Vec<Action>,
}

impl ActionProfile {
    #[must_use]
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Recoverable sampling events, carried alongside results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Calls made in a state absent from the probability table.
    pub unknown_states: u64,
    /// Trucks with no entry in an otherwise known state.
    pub uncovered_trucks: u64,
}

impl SamplerStats {
    pub fn merge(&mut self, other: Self) {
        self.unknown_states += other.unknown_states;
        self.uncovered_trucks += other.uncovered_trucks;
    }
}

/// Draws action profiles from the estimated policy.
#[derive(Debug, Clone)]
pub struct PolicySampler<'a> {
    table: &'a ProbabilityTable,
    trucks: usize,
    locations: usize,
}

impl<'a> PolicySampler<'a> {
    #[must_use]
    pub fn new(table: &'a ProbabilityTable, trucks: usize, locations: usize) -> Self {
        Self {
            table,
            trucks,
            locations,
        }
    }

    #[must_use]
    pub const fn trucks(&self) -> usize {
        self.trucks
    }

    #[must_use]
    pub const fn locations(&self) -> usize {
        self.locations
    }

    /// Draw one action per truck, ordered by truck.
    ///
    /// Fleet draws always come from the policy stream, so a deviation only
    /// consumes the deviation stream and leaves every other truck's draw
    /// identical to the optimal profile.
    pub fn sample(
        &self,
        state: &State,
        choice: PolicyChoice,
        streams: &mut PathStreams,
        stats: &mut SamplerStats,
    ) -> ActionProfile {
        let mut actions = match self.table.lookup(state) {
            None => {
                stats.unknown_states += 1;
                (0..self.trucks)
                    .map(|idx| self.uniform(truck_id(idx), streams.policy()))
                    .collect()
            }
            Some(id) => {
                let entries = self.table.entries(id);
                let rng = streams.policy();
                let mut actions = Vec::with_capacity(self.trucks);
                for idx in 0..self.trucks {
                    let truck = truck_id(idx);
                    let mut best: Option<(f64, Action)> = None;
                    for entry in entries.iter().filter(|e| e.truck == truck) {
                        let shock = unit_gumbel(rng);
                        let index = entry.probability.ln() + shock;
                        if best.is_none_or(|(top, _)| index > top) {
                            let action = Action {
                                truck,
                                location: entry.location,
                                shock,
                            };
                            best = Some((index, action));
                        }
                    }
                    actions.push(best.map(|(_, action)| action).unwrap_or_else(|| {
                        stats.uncovered_trucks += 1;
                        self.uniform(truck, rng)
                    }));
                }
                actions
            }
        };

        if let PolicyChoice::Deviate { truck, deviation } = choice
            && let Some(slot) = actions.get_mut(truck.index())
        {
            let rng = streams.deviation();
            *slot = match deviation {
                Deviation::Random => self.uniform(truck, rng),
                Deviation::Specific(location) => Action {
                    truck,
                    location,
                    shock: unit_gumbel(rng),
                },
            };
        }
        ActionProfile::new(actions)
    }

    fn uniform<R: RngCore>(&self, truck: TruckId, rng: &mut R) -> Action {
        let mut best = Action {
            truck,
            location: LocationId(0),
            shock: f64::NEG_INFINITY,
        };
        for loc in 0..self.locations {
            let shock = unit_gumbel(rng);
            if shock > best.shock {
                best = Action {
                    truck,
                    location: LocationId(index_to_u8(loc).unwrap_or(u8::MAX)),
                    shock,
                };
            }
        }
        best
    }
}

/// Standard Gumbel shock: `-ln(E)` for `E ~ Exp(1)`.
fn unit_gumbel<R: RngCore>(rng: &mut R) -> f64 {
    let e: f64 = Exp1.sample(rng);
    -e.ln()
}

fn truck_id(idx: usize) -> TruckId {
    TruckId(index_to_u16(idx).unwrap_or(u16::MAX))
}
