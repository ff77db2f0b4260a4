//! Day-to-day evolution of the simulated state.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeMap;

use crate::panel::{PanelRecord, TruckId};
use crate::policy::ActionProfile;
use crate::state::{State, StateBuilder};

/// Actions accumulated since the last week boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionLog {
    records: Vec<PanelRecord>,
}

impl ActionLog {
    #[must_use]
    pub fn new(records: Vec<PanelRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[PanelRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one period's actions.
    pub fn push_profile(&mut self, date: NaiveDate, profile: &ActionProfile) {
        self.records
            .extend(profile.actions().iter().map(|action| PanelRecord {
                truck: action.truck,
                date,
                location: action.location,
            }));
    }

    /// Keep only each truck's most recent action.
    pub fn reset_to_latest(&mut self) {
        let mut latest: BTreeMap<TruckId, PanelRecord> = BTreeMap::new();
        for record in &self.records {
            match latest.get(&record.truck) {
                Some(kept) if kept.date > record.date => {}
                _ => {
                    latest.insert(record.truck, *record);
                }
            }
        }
        self.records = latest.into_values().collect();
    }
}

/// Kind of step taken into a new date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The new date opens a week; aggregates are rebuilt.
    WeekStart,
    /// Only calendar slots change.
    MidWeek,
}

impl Boundary {
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        if date.weekday() == Weekday::Mon {
            Self::WeekStart
        } else {
            Self::MidWeek
        }
    }
}

/// Moves a state into the next simulated date.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition<'a> {
    builder: StateBuilder<'a>,
}

impl<'a> StateTransition<'a> {
    #[must_use]
    pub const fn new(builder: StateBuilder<'a>) -> Self {
        Self { builder }
    }

    /// State in effect on `next_date`.
    ///
    /// Entering a Monday rebuilds every weekly aggregate from the completed
    /// week held in `log` (absent features are zero) and trims the log to each
    /// truck's latest action. Any other day only refreshes the day and quarter.
    /// The layout of the returned state always matches the input.
    pub fn advance(&self, state: &State, log: &mut ActionLog, next_date: NaiveDate) -> State {
        let layout = self.builder.layout();
        match Boundary::of(next_date) {
            Boundary::WeekStart => {
                let mut next = layout.blank_state(next_date);
                if let Some(features) = self.builder.latest_week(log.records()) {
                    features.write_into(layout, &mut next);
                }
                log.reset_to_latest();
                next
            }
            Boundary::MidWeek => {
                let mut next = state.clone();
                layout.stamp_date(&mut next, next_date);
                next
            }
        }
    }
}
