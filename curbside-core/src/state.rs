//! Discretized market state: the fixed feature layout, the state vector and
//! the builder that derives states from a panel of parking records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::config::DiscretizationConfig;
use crate::error::{CurbsideError, Result};
use crate::numbers::{binarize, feature_from_f64, index_to_u8, index_to_u16};
use crate::panel::{
    Fleet, LocationId, LocationSet, Panel, PanelRecord, TruckId, WeekKey, day_of_week, quarter,
};

/// Name of the day-of-week slot.
pub const DAY_OF_WEEK: &str = "Day_Of_Week";
/// Name of the quarter slot.
pub const QUARTER: &str = "Quarter";

/// What a single position of the state vector measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FeatureSlot {
    /// Last week's truck count at a location, binarized.
    JointCount(LocationId),
    /// Last week's distinct truck types at a location, binarized.
    JointDiversity(LocationId),
    /// Whether a truck parked at a location last week.
    TruckFrequency {
        truck: TruckId,
        location: LocationId,
    },
    DayOfWeek,
    Quarter,
}

/// Ordered, named feature slots shared by estimation and simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    names: Vec<String>,
    joint_count: Vec<usize>,
    joint_diversity: Vec<usize>,
    frequency: Vec<usize>,
    locations: usize,
    day_slot: usize,
    quarter_slot: usize,
}

impl StateLayout {
    /// Enumerate every feature for the fleet and location set, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when two features would share a name.
    pub fn new(fleet: &Fleet, locations: &LocationSet) -> Result<Self> {
        let mut named = candidate_slots(fleet, locations);
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_named(named, fleet.len(), locations.len())
    }

    /// Rebuild a layout from a persisted list of state variable names.
    ///
    /// The persisted order is kept; the names must cover exactly the
    /// features of this fleet and location set.
    ///
    /// # Errors
    ///
    /// Fails on an unknown, duplicated or missing feature name.
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        fleet: &Fleet,
        locations: &LocationSet,
    ) -> Result<Self> {
        let lookup: HashMap<String, FeatureSlot> =
            candidate_slots(fleet, locations).into_iter().collect();
        let mut named = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref().trim();
            let slot = lookup
                .get(name)
                .copied()
                .ok_or_else(|| CurbsideError::UnknownFeature {
                    name: name.to_string(),
                })?;
            named.push((name.to_string(), slot));
        }
        if named.len() != lookup.len() {
            return Err(CurbsideError::StateLength {
                expected: lookup.len(),
                actual: named.len(),
            });
        }
        Self::from_named(named, fleet.len(), locations.len())
    }

    fn from_named(
        named: Vec<(String, FeatureSlot)>,
        trucks: usize,
        locations: usize,
    ) -> Result<Self> {
        let mut joint_count = vec![usize::MAX; locations];
        let mut joint_diversity = vec![usize::MAX; locations];
        let mut frequency = vec![usize::MAX; trucks * locations];
        let mut day_slot = usize::MAX;
        let mut quarter_slot = usize::MAX;
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for (position, (name, slot)) in named.iter().enumerate() {
            if !seen.insert(name.as_str()) {
                return Err(CurbsideError::DuplicateFeature { name: name.clone() });
            }
            match *slot {
                FeatureSlot::JointCount(loc) => joint_count[loc.index()] = position,
                FeatureSlot::JointDiversity(loc) => joint_diversity[loc.index()] = position,
                FeatureSlot::TruckFrequency { truck, location } => {
                    frequency[truck.index() * locations + location.index()] = position;
                }
                FeatureSlot::DayOfWeek => day_slot = position,
                FeatureSlot::Quarter => quarter_slot = position,
            }
        }

        Ok(Self {
            names: named.into_iter().map(|(name, _)| name).collect(),
            joint_count,
            joint_diversity,
            frequency,
            locations,
            day_slot,
            quarter_slot,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// State variable names in positional order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn joint_count_slot(&self, location: LocationId) -> usize {
        self.joint_count[location.index()]
    }

    #[must_use]
    pub fn joint_diversity_slot(&self, location: LocationId) -> usize {
        self.joint_diversity[location.index()]
    }

    #[must_use]
    pub fn frequency_slot(&self, truck: TruckId, location: LocationId) -> usize {
        self.frequency[truck.index() * self.locations + location.index()]
    }

    #[must_use]
    pub const fn day_slot(&self) -> usize {
        self.day_slot
    }

    #[must_use]
    pub const fn quarter_slot(&self) -> usize {
        self.quarter_slot
    }

    /// A zero state with the calendar slots set for `date`.
    #[must_use]
    pub fn blank_state(&self, date: NaiveDate) -> State {
        let mut state = State::zeros(self.len());
        self.stamp_date(&mut state, date);
        state
    }

    /// Overwrite only the calendar slots.
    pub fn stamp_date(&self, state: &mut State, date: NaiveDate) {
        state.set(self.day_slot, day_of_week(date));
        state.set(self.quarter_slot, quarter(date));
    }

    /// Parse a persisted tuple and check it against this layout.
    ///
    /// # Errors
    ///
    /// Fails on malformed tuples or a length that does not match the layout.
    pub fn parse_state(&self, raw: &str) -> Result<State> {
        let state = State::parse(raw)?;
        if state.len() != self.len() {
            return Err(CurbsideError::StateLength {
                expected: self.len(),
                actual: state.len(),
            });
        }
        Ok(state)
    }
}

fn candidate_slots(fleet: &Fleet, locations: &LocationSet) -> Vec<(String, FeatureSlot)> {
    let mut named = Vec::with_capacity(locations.len() * (fleet.len() + 2) + 2);
    for location in locations.ids() {
        let loc_name = locations.name(location);
        named.push((format!("Count{loc_name}"), FeatureSlot::JointCount(location)));
        named.push((
            format!("Num_Unique{loc_name}"),
            FeatureSlot::JointDiversity(location),
        ));
        for truck in fleet.ids() {
            named.push((
                format!("{loc_name}{}", fleet.name(truck)),
                FeatureSlot::TruckFrequency { truck, location },
            ));
        }
    }
    named.push((DAY_OF_WEEK.to_string(), FeatureSlot::DayOfWeek));
    named.push((QUARTER.to_string(), FeatureSlot::Quarter));
    named
}

/// Discretized state vector; identity is exact positional equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct State(SmallVec<[u8; 32]>);

impl State {
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self(SmallVec::from_elem(0, len))
    }

    #[must_use]
    pub fn from_values(values: &[u8]) -> Self {
        Self(SmallVec::from_slice(values))
    }

    #[must_use]
    pub fn values(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> u8 {
        self.0[position]
    }

    pub fn set(&mut self, position: usize, value: u8) {
        self.0[position] = value;
    }

    /// Stable 64-bit fingerprint of the values.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&self.0);
        hasher.finish()
    }

    /// Parse a tuple such as `(0, 1, 3)`; float renderings like `1.0` are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`CurbsideError::InvalidState`] for anything else.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || CurbsideError::InvalidState {
            value: raw.to_string(),
        };
        let inner = raw
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let mut values = SmallVec::new();
        for token in inner.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let parsed: f64 = token.parse().map_err(|_| invalid())?;
            values.push(feature_from_f64(parsed).ok_or_else(invalid)?);
        }
        Ok(Self(values))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        if self.0.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// Binarized weekly aggregates for one week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyFeatures {
    joint_count: Vec<u8>,
    joint_diversity: Vec<u8>,
    frequency: Vec<u8>,
}

impl WeeklyFeatures {
    /// Copy the aggregates into their slots; calendar slots are untouched.
    pub fn write_into(&self, layout: &StateLayout, state: &mut State) {
        let locations = self.joint_count.len();
        for loc in 0..locations {
            let location = LocationId(index_to_u8(loc).unwrap_or(u8::MAX));
            state.set(layout.joint_count_slot(location), self.joint_count[loc]);
            state.set(layout.joint_diversity_slot(location), self.joint_diversity[loc]);
        }
        for (idx, value) in self.frequency.iter().enumerate() {
            let truck = TruckId(index_to_u16(idx / locations).unwrap_or(u16::MAX));
            let location = LocationId(index_to_u8(idx % locations).unwrap_or(u8::MAX));
            state.set(layout.frequency_slot(truck, location), *value);
        }
    }
}

/// A panel record together with the state it was decided in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub record: PanelRecord,
    pub state: State,
}

/// Output of [`StateBuilder::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltStates {
    /// Records with a state, ordered by date then truck.
    pub observations: Vec<ObservedState>,
    /// Ordered state variable names.
    pub state_variables: Vec<String>,
    /// Weeks dropped because no aggregate could be joined to them.
    pub dropped_weeks: Vec<WeekKey>,
    pub dropped_records: usize,
}

/// Derives states from panel records.
#[derive(Debug, Clone, Copy)]
pub struct StateBuilder<'a> {
    layout: &'a StateLayout,
    fleet: &'a Fleet,
    locations: &'a LocationSet,
    thresholds: &'a DiscretizationConfig,
}

impl<'a> StateBuilder<'a> {
    #[must_use]
    pub const fn new(
        layout: &'a StateLayout,
        fleet: &'a Fleet,
        locations: &'a LocationSet,
        thresholds: &'a DiscretizationConfig,
    ) -> Self {
        Self {
            layout,
            fleet,
            locations,
            thresholds,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &'a StateLayout {
        self.layout
    }

    /// Attach a state to every record of the panel.
    ///
    /// The panel is completed first (missing truck-days park at the
    /// catch-all) and decisions in week w see the aggregates of week w-1.
    /// Weeks without a matching aggregate are dropped and logged. Forward
    /// simulation rebuilds the same aggregates from its action log through
    /// [`StateBuilder::latest_week`].
    #[must_use]
    pub fn build(&self, panel: &Panel) -> BuiltStates {
        let panel = panel.complete(self.fleet, self.locations.other());
        let features: BTreeMap<WeekKey, WeeklyFeatures> = self
            .aggregate(panel.records())
            .into_iter()
            .filter_map(|(week, f)| week.next().map(|next| (next, f)))
            .collect();

        let mut records: Vec<PanelRecord> = panel.records().to_vec();
        records.sort_by_key(|r| (r.date, r.truck));

        let mut built = BuiltStates {
            state_variables: self.layout.names().to_vec(),
            ..BuiltStates::default()
        };
        for record in records {
            let week = WeekKey::of(record.date);
            let Some(week_features) = features.get(&week) else {
                built.dropped_records += 1;
                if built.dropped_weeks.last() != Some(&week) {
                    built.dropped_weeks.push(week);
                }
                continue;
            };
            let mut state = self.layout.blank_state(record.date);
            week_features.write_into(self.layout, &mut state);
            built.observations.push(ObservedState { record, state });
        }

        if !built.dropped_weeks.is_empty() {
            log::warn!(
                "dropped {} records in {} weeks with no prior-week aggregate: {:?}",
                built.dropped_records,
                built.dropped_weeks.len(),
                built.dropped_weeks
            );
        }
        built
    }

    /// Binarized aggregates for every week present in `records`.
    #[must_use]
    pub fn aggregate(&self, records: &[PanelRecord]) -> BTreeMap<WeekKey, WeeklyFeatures> {
        let locations = self.locations.len();
        let trucks = self.fleet.len();
        let mut counts: BTreeMap<WeekKey, WeekTally> = BTreeMap::new();

        for record in records {
            let tally = counts
                .entry(WeekKey::of(record.date))
                .or_insert_with(|| WeekTally::new(trucks, locations));
            let loc = record.location.index();
            tally.trucks[loc] += 1;
            tally.kinds[loc].insert(self.fleet.kind_id(record.truck));
            tally.frequency[record.truck.index() * locations + loc] += 1;
        }

        counts
            .into_iter()
            .map(|(week, tally)| (week, tally.discretize(self.thresholds)))
            .collect()
    }

    /// Aggregates of the most recent week present in `records`.
    #[must_use]
    pub fn latest_week(&self, records: &[PanelRecord]) -> Option<WeeklyFeatures> {
        let latest = records.iter().map(|r| WeekKey::of(r.date)).max()?;
        let in_week: Vec<PanelRecord> = records
            .iter()
            .filter(|r| WeekKey::of(r.date) == latest)
            .copied()
            .collect();
        self.aggregate(&in_week).remove(&latest)
    }
}

struct WeekTally {
    trucks: Vec<usize>,
    kinds: Vec<BTreeSet<u16>>,
    frequency: Vec<usize>,
}

impl WeekTally {
    fn new(trucks: usize, locations: usize) -> Self {
        Self {
            trucks: vec![0; locations],
            kinds: vec![BTreeSet::new(); locations],
            frequency: vec![0; trucks * locations],
        }
    }

    fn discretize(self, thresholds: &DiscretizationConfig) -> WeeklyFeatures {
        WeeklyFeatures {
            joint_count: self
                .trucks
                .iter()
                .map(|&n| binarize(n, thresholds.joint_count_threshold))
                .collect(),
            joint_diversity: self
                .kinds
                .iter()
                .map(|k| binarize(k.len(), thresholds.joint_diversity_threshold))
                .collect(),
            frequency: self
                .frequency
                .iter()
                .map(|&n| binarize(n, thresholds.frequency_threshold))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{PanelRow, TruckTypeRow, parse_date};

    fn setup() -> (Fleet, LocationSet) {
        let fleet = Fleet::from_rows(&[
            TruckTypeRow::new("1", "Mexican"),
            TruckTypeRow::new("2", "Korean"),
        ])
        .unwrap();
        let locations = LocationSet::new(&["A"], "O").unwrap();
        (fleet, locations)
    }

    #[test]
    fn layout_is_sorted_and_complete() {
        let (fleet, locations) = setup();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        assert_eq!(
            layout.names(),
            &[
                "A1",
                "A2",
                "CountA",
                "CountO",
                "Day_Of_Week",
                "Num_UniqueA",
                "Num_UniqueO",
                "O1",
                "O2",
                "Quarter"
            ]
        );
        assert_eq!(layout.day_slot(), 4);
        assert_eq!(layout.quarter_slot(), 9);
        let truck_two = fleet.find("2").unwrap();
        assert_eq!(layout.frequency_slot(truck_two, locations.other()), 8);
    }

    #[test]
    fn layout_roundtrips_through_names() {
        let (fleet, locations) = setup();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        let rebuilt = StateLayout::from_names(layout.names(), &fleet, &locations).unwrap();
        assert_eq!(rebuilt, layout);
        assert!(matches!(
            StateLayout::from_names(&["CountA"], &fleet, &locations),
            Err(CurbsideError::StateLength { .. })
        ));
        assert!(matches!(
            StateLayout::from_names(&["Bogus"], &fleet, &locations),
            Err(CurbsideError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn state_tuple_format_roundtrips() {
        let state = State::from_values(&[0, 1, 3]);
        assert_eq!(state.to_string(), "(0, 1, 3)");
        assert_eq!(State::parse("(0.0, 1.0, 3.0)").unwrap(), state);
        assert_eq!(State::from_values(&[2]).to_string(), "(2,)");
        assert_eq!(State::parse("(2,)").unwrap(), State::from_values(&[2]));
        assert!(State::parse("0, 1").is_err());
        assert!(State::parse("(0, x)").is_err());
    }

    #[test]
    fn training_lags_weekly_aggregates_and_drops_first_week() {
        let (fleet, locations) = setup();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        let thresholds = DiscretizationConfig::default();
        let builder = StateBuilder::new(&layout, &fleet, &locations, &thresholds);
        // Week one: truck 1 at A on Monday only. Week two: both trucks at O.
        let rows = vec![
            PanelRow::new("1", "2014-06-02", "A"),
            PanelRow::new("2", "2014-06-02", "O"),
            PanelRow::new("1", "2014-06-09", "O"),
            PanelRow::new("2", "2014-06-09", "O"),
        ];
        let (panel, _) = Panel::from_rows(&rows, &fleet, &locations).unwrap();
        let built = builder.build(&panel);

        assert_eq!(built.dropped_weeks.len(), 1);
        assert_eq!(built.dropped_records, 2);
        assert_eq!(built.observations.len(), 2);
        let truck_one = fleet.find("1").unwrap();
        let a = locations.get("A").unwrap();
        for obs in &built.observations {
            assert_eq!(obs.record.date, parse_date("2014-06-09").unwrap());
            assert_eq!(obs.state.get(layout.frequency_slot(truck_one, a)), 1);
            assert_eq!(obs.state.get(layout.joint_count_slot(a)), 0);
            assert_eq!(obs.state.get(layout.day_slot()), 0);
            assert_eq!(obs.state.get(layout.quarter_slot()), 2);
        }
    }

    #[test]
    fn training_features_match_latest_week_of_prior_log() {
        let (fleet, locations) = setup();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        let thresholds = DiscretizationConfig {
            joint_count_threshold: 1,
            ..DiscretizationConfig::default()
        };
        let builder = StateBuilder::new(&layout, &fleet, &locations, &thresholds);
        let mut rows = Vec::new();
        for day in ["2014-06-02", "2014-06-03", "2014-06-04"] {
            rows.push(PanelRow::new("1", day, "A"));
            rows.push(PanelRow::new("2", day, "O"));
        }
        for day in ["2014-06-09", "2014-06-10", "2014-06-11"] {
            rows.push(PanelRow::new("1", day, "O"));
            rows.push(PanelRow::new("2", day, "A"));
        }
        let (panel, _) = Panel::from_rows(&rows, &fleet, &locations).unwrap();
        let built = builder.build(&panel);
        assert_eq!(built.observations.len(), 6);

        let week_one: Vec<PanelRecord> = panel
            .records()
            .iter()
            .filter(|r| r.date < parse_date("2014-06-09").unwrap())
            .copied()
            .collect();
        let replayed = builder.latest_week(&week_one).unwrap();
        for obs in &built.observations {
            let mut expected = layout.blank_state(obs.record.date);
            replayed.write_into(&layout, &mut expected);
            assert_eq!(obs.state, expected, "{:?}", obs.record);
        }
        let a = locations.get("A").unwrap();
        assert_eq!(built.observations[0].state.get(layout.joint_count_slot(a)), 1);
    }

    #[test]
    fn latest_week_ignores_older_records() {
        let (fleet, locations) = setup();
        let layout = StateLayout::new(&fleet, &locations).unwrap();
        let thresholds = DiscretizationConfig::default();
        let builder = StateBuilder::new(&layout, &fleet, &locations, &thresholds);
        let truck_one = fleet.find("1").unwrap();
        let a = locations.get("A").unwrap();
        let records = vec![
            PanelRecord {
                truck: truck_one,
                date: parse_date("2014-06-01").unwrap(),
                location: a,
            },
            PanelRecord {
                truck: truck_one,
                date: parse_date("2014-06-03").unwrap(),
                location: locations.other(),
            },
        ];
        let features = builder.latest_week(&records).unwrap();
        let mut state = State::zeros(layout.len());
        features.write_into(&layout, &mut state);
        assert_eq!(state.get(layout.frequency_slot(truck_one, a)), 0);
        assert_eq!(
            state.get(layout.frequency_slot(truck_one, locations.other())),
            1
        );
        assert!(builder.latest_week(&[]).is_none());
    }
}
