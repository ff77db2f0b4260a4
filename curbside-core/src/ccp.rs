//! Conditional choice probabilities: how often each truck picked each location
//! in each observed state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;
use crate::numbers::count_to_f64;
use crate::panel::{Fleet, LocationId, LocationSet, TruckId};
use crate::state::{ObservedState, State, StateLayout};

/// Required columns of the probability table.
pub const PROBABILITY_COLUMNS: [&str; 4] = ["Truck", "Location", "State", "Probability"];

/// Flat persisted form of one probability entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityRow {
    #[serde(rename = "Truck")]
    pub truck: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Probability")]
    pub probability: f64,
}

/// Dense id of a state interned in a [`ProbabilityTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// One (truck, location, probability) entry for an interned state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChoiceProbability {
    pub truck: TruckId,
    pub location: LocationId,
    pub probability: f64,
}

/// Empirical CCPs keyed by state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityTable {
    states: Vec<State>,
    index: HashMap<State, StateId>,
    /// Per state, entries ordered by truck then location.
    entries: Vec<Vec<ChoiceProbability>>,
    degenerate: usize,
}

impl ProbabilityTable {
    /// Count chosen locations per (truck, state) and normalize.
    ///
    /// No smoothing is applied; a pair seen once yields probability 1.
    #[must_use]
    pub fn estimate(observations: &[ObservedState]) -> Self {
        let mut counts: BTreeMap<(&State, TruckId), BTreeMap<LocationId, usize>> = BTreeMap::new();
        for obs in observations {
            *counts
                .entry((&obs.state, obs.record.truck))
                .or_default()
                .entry(obs.record.location)
                .or_default() += 1;
        }

        let mut table = Self::default();
        for ((state, truck), by_location) in counts {
            let total: usize = by_location.values().sum();
            if total == 1 {
                table.degenerate += 1;
            }
            let id = table.intern(state);
            let denominator = count_to_f64(total);
            for (location, count) in by_location {
                table.entries[id.0 as usize].push(ChoiceProbability {
                    truck,
                    location,
                    probability: count_to_f64(count) / denominator,
                });
            }
        }
        if table.degenerate > 0 {
            log::debug!(
                "{} (truck, state) pairs were observed exactly once",
                table.degenerate
            );
        }
        table
    }

    fn intern(&mut self, state: &State) -> StateId {
        if let Some(id) = self.index.get(state) {
            return *id;
        }
        let id = StateId(u32::try_from(self.states.len()).unwrap_or(u32::MAX));
        self.states.push(state.clone());
        self.index.insert(state.clone(), id);
        self.entries.push(Vec::new());
        id
    }

    #[must_use]
    pub fn lookup(&self, state: &State) -> Option<StateId> {
        self.index.get(state).copied()
    }

    /// Entries for an interned state, ordered by truck then location.
    #[must_use]
    pub fn entries(&self, id: StateId) -> &[ChoiceProbability] {
        &self.entries[id.0 as usize]
    }

    /// Distinct states in first-seen order.
    #[must_use]
    pub fn states(&self) -> &[State] {
        &self.states
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Total number of (truck, state, location) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// (truck, state) pairs backed by a single observation.
    #[must_use]
    pub const fn degenerate_pairs(&self) -> usize {
        self.degenerate
    }

    /// Probability of `location` for `truck` in `state`, zero when absent.
    #[must_use]
    pub fn probability(&self, state: &State, truck: TruckId, location: LocationId) -> f64 {
        self.lookup(state)
            .map(|id| {
                self.entries(id)
                    .iter()
                    .find(|e| e.truck == truck && e.location == location)
                    .map_or(0.0, |e| e.probability)
            })
            .unwrap_or(0.0)
    }

    /// Flatten for persistence.
    #[must_use]
    pub fn to_rows(&self, fleet: &Fleet, locations: &LocationSet) -> Vec<ProbabilityRow> {
        let mut rows = Vec::with_capacity(self.len());
        for (state, entries) in self.states.iter().zip(&self.entries) {
            let rendered = state.to_string();
            for entry in entries {
                rows.push(ProbabilityRow {
                    truck: fleet.name(entry.truck).to_string(),
                    location: locations.name(entry.location).to_string(),
                    state: rendered.clone(),
                    probability: entry.probability,
                });
            }
        }
        rows
    }

    /// Rebuild from persisted rows.
    ///
    /// The degenerate-pair count is not persisted and reads back as zero.
    ///
    /// # Errors
    ///
    /// Fails on unknown trucks or locations and on malformed or
    /// mis-sized state tuples.
    pub fn from_rows(
        rows: &[ProbabilityRow],
        layout: &StateLayout,
        fleet: &Fleet,
        locations: &LocationSet,
    ) -> Result<Self> {
        let mut table = Self::default();
        for row in rows {
            let state = layout.parse_state(&row.state)?;
            let truck = fleet.require(row.truck.trim())?;
            let location = locations.require(&row.location)?;
            let id = table.intern(&state);
            table.entries[id.0 as usize].push(ChoiceProbability {
                truck,
                location,
                probability: row.probability,
            });
        }
        for entries in &mut table.entries {
            entries.sort_by_key(|e| (e.truck, e.location));
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{PanelRecord, TruckTypeRow, parse_date};

    fn obs(truck: u16, location: u8, state: &[u8]) -> ObservedState {
        ObservedState {
            record: PanelRecord {
                truck: TruckId(truck),
                date: parse_date("2014-06-09").unwrap(),
                location: LocationId(location),
            },
            state: State::from_values(state),
        }
    }

    #[test]
    fn probabilities_sum_to_one_per_truck_and_state() {
        let observations = vec![
            obs(0, 0, &[1, 0]),
            obs(0, 1, &[1, 0]),
            obs(0, 1, &[1, 0]),
            obs(1, 0, &[1, 0]),
            obs(0, 0, &[0, 0]),
        ];
        let table = ProbabilityTable::estimate(&observations);
        assert_eq!(table.state_count(), 2);
        let state = State::from_values(&[1, 0]);
        let p0 = table.probability(&state, TruckId(0), LocationId(0));
        let p1 = table.probability(&state, TruckId(0), LocationId(1));
        assert!((p0 - 1.0 / 3.0).abs() < 1e-12);
        assert!((p0 + p1 - 1.0).abs() < 1e-12);
        assert!((table.probability(&state, TruckId(1), LocationId(0)) - 1.0).abs() < 1e-12);
        assert_eq!(table.degenerate_pairs(), 2);
    }

    #[test]
    fn unseen_state_is_absent() {
        let table = ProbabilityTable::estimate(&[obs(0, 0, &[0, 1])]);
        assert!(table.lookup(&State::from_values(&[1, 1])).is_none());
        assert!(table.lookup(&State::from_values(&[0, 1])).is_some());
    }

    #[test]
    fn rows_roundtrip_through_names() {
        let fleet = Fleet::from_rows(&[
            TruckTypeRow::new("a", "x"),
            TruckTypeRow::new("b", "y"),
        ])
        .unwrap();
        let locations = LocationSet::new(&["A"], "O").unwrap();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        let mut values = vec![0; layout.len()];
        values[layout.day_slot()] = 2;
        let observations = vec![obs(0, 0, &values), obs(1, 1, &values)];
        let table = ProbabilityTable::estimate(&observations);
        let rows = table.to_rows(&fleet, &locations);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].truck, "b");
        assert_eq!(rows[1].location, "O");
        let restored = ProbabilityTable::from_rows(&rows, &layout, &fleet, &locations).unwrap();
        assert_eq!(restored.states(), table.states());
        assert_eq!(
            restored.entries(StateId(0)),
            table.entries(StateId(0))
        );
    }
}
