//! Typed panel data: trucks, locations, dated parking records and the
//! calendar helpers used to bucket them into weeks.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CurbsideError, Result};
use crate::numbers::{index_to_u8, index_to_u16};

/// Required columns of the panel table.
pub const PANEL_COLUMNS: [&str; 3] = ["Truck", "Date", "Location"];
/// Required columns of the truck types table.
pub const TRUCK_TYPE_COLUMNS: [&str; 2] = ["Truck", "Type"];

/// Fail fast when a table header lacks any required column.
///
/// # Errors
///
/// Returns [`CurbsideError::MissingColumn`] naming the first absent column.
pub fn require_columns<S: AsRef<str>>(
    table: &'static str,
    headers: &[S],
    required: &[&'static str],
) -> Result<()> {
    for column in required {
        if !headers.iter().any(|h| h.as_ref().trim() == *column) {
            return Err(CurbsideError::MissingColumn { table, column });
        }
    }
    Ok(())
}

/// Dense index of a truck inside a [`Fleet`]; ordering follows truck name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TruckId(pub u16);

impl TruckId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dense index of a location inside a [`LocationSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub u8);

impl LocationId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Raw panel row as read from a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelRow {
    #[serde(rename = "Truck")]
    pub truck: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Location")]
    pub location: String,
}

impl PanelRow {
    #[must_use]
    pub fn new(truck: &str, date: &str, location: &str) -> Self {
        Self {
            truck: truck.to_string(),
            date: date.to_string(),
            location: location.to_string(),
        }
    }
}

/// Raw truck type row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruckTypeRow {
    #[serde(rename = "Truck")]
    pub truck: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

impl TruckTypeRow {
    #[must_use]
    pub fn new(truck: &str, kind: &str) -> Self {
        Self {
            truck: truck.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// The competing trucks of one estimation run and their static types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fleet {
    names: Vec<String>,
    kind_ids: Vec<u16>,
    by_name: HashMap<String, TruckId>,
}

impl Fleet {
    /// Build a fleet from the truck types table, sorted by truck name.
    ///
    /// # Errors
    ///
    /// Fails on an empty table, a duplicated truck, or more trucks than a
    /// [`TruckId`] can address.
    pub fn from_rows(rows: &[TruckTypeRow]) -> Result<Self> {
        if rows.is_empty() {
            return Err(CurbsideError::EmptyTable {
                table: "truck_types",
            });
        }
        let mut sorted: Vec<&TruckTypeRow> = rows.iter().collect();
        sorted.sort_by(|a, b| a.truck.cmp(&b.truck));
        if let Some(pair) = sorted.windows(2).find(|w| w[0].truck == w[1].truck) {
            return Err(CurbsideError::DuplicateTruck {
                truck: pair[0].truck.clone(),
            });
        }
        if index_to_u16(sorted.len()).is_none() {
            return Err(CurbsideError::FleetTooLarge {
                trucks: sorted.len(),
                max: usize::from(u16::MAX),
            });
        }

        let mut kind_lookup: HashMap<&str, u16> = HashMap::new();
        let mut kind_ids = Vec::with_capacity(sorted.len());
        for row in &sorted {
            let next = index_to_u16(kind_lookup.len()).unwrap_or(u16::MAX);
            kind_ids.push(*kind_lookup.entry(row.kind.as_str()).or_insert(next));
        }

        let names: Vec<String> = sorted.iter().map(|r| r.truck.clone()).collect();
        let by_name = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), TruckId(index_to_u16(idx).unwrap_or(u16::MAX))))
            .collect();
        Ok(Self {
            names,
            kind_ids,
            by_name,
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

    /// Truck ids in ascending name order.
    pub fn ids(&self) -> impl Iterator<Item = TruckId> + '_ {
        (0..self.names.len()).map(|idx| TruckId(index_to_u16(idx).unwrap_or(u16::MAX)))
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<TruckId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a truck name, failing when it is not part of the fleet.
    ///
    /// # Errors
    ///
    /// Returns [`CurbsideError::UnknownTruck`].
    pub fn require(&self, name: &str) -> Result<TruckId> {
        self.find(name).ok_or_else(|| CurbsideError::UnknownTruck {
            truck: name.to_string(),
        })
    }

    #[must_use]
    pub fn name(&self, truck: TruckId) -> &str {
        &self.names[truck.index()]
    }

    /// Interned type id, used for distinct-type counting.
    #[must_use]
    pub fn kind_id(&self, truck: TruckId) -> u16 {
        self.kind_ids[truck.index()]
    }
}

/// Known locations plus the trailing catch-all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSet {
    names: Vec<String>,
    by_name: HashMap<String, LocationId>,
}

impl LocationSet {
    /// Build the set; the catch-all is always the last id.
    ///
    /// # Errors
    ///
    /// Fails if there are more locations than a [`LocationId`] can address.
    pub fn new<S: AsRef<str>>(known: &[S], other: &str) -> Result<Self> {
        let mut names: Vec<String> = Vec::with_capacity(known.len() + 1);
        for name in known {
            let name = name.as_ref().to_string();
            if !names.contains(&name) && name != other {
                names.push(name);
            }
        }
        names.push(other.to_string());
        if index_to_u8(names.len()).is_none() {
            return Err(CurbsideError::TooManyLocations {
                locations: names.len(),
                max: usize::from(u8::MAX),
            });
        }
        let by_name = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), LocationId(index_to_u8(idx).unwrap_or(u8::MAX))))
            .collect();
        Ok(Self { names, by_name })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LocationId> + '_ {
        (0..self.names.len()).map(|idx| LocationId(index_to_u8(idx).unwrap_or(u8::MAX)))
    }

    #[must_use]
    pub fn other(&self) -> LocationId {
        LocationId(index_to_u8(self.names.len() - 1).unwrap_or(u8::MAX))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<LocationId> {
        self.by_name.get(name).copied()
    }

    /// Map a raw location name onto the set, sending unknown names to the catch-all.
    #[must_use]
    pub fn resolve(&self, name: &str) -> LocationId {
        self.get(name.trim()).unwrap_or_else(|| self.other())
    }

    /// Resolve a name that must already be part of the set.
    ///
    /// # Errors
    ///
    /// Returns [`CurbsideError::UnknownLocation`].
    pub fn require(&self, name: &str) -> Result<LocationId> {
        self.get(name.trim())
            .ok_or_else(|| CurbsideError::UnknownLocation {
                location: name.to_string(),
            })
    }

    #[must_use]
    pub fn name(&self, location: LocationId) -> &str {
        &self.names[location.index()]
    }
}

/// ISO (year, week) bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekKey {
    pub iso_year: i32,
    pub week: u32,
}

impl WeekKey {
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            iso_year: iso.year(),
            week: iso.week(),
        }
    }

    /// Monday opening this week.
    #[must_use]
    pub fn monday(self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.iso_year, self.week, Weekday::Mon)
    }

    /// The week after this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.monday()
            .and_then(|monday| monday.checked_add_signed(Duration::days(7)))
            .map(Self::of)
    }
}

/// Day of week, 0 = Monday through 6 = Sunday.
#[must_use]
pub fn day_of_week(date: NaiveDate) -> u8 {
    index_to_u8(date.weekday().num_days_from_monday() as usize).unwrap_or(0)
}

/// Calendar quarter, 1 through 4.
#[must_use]
pub fn quarter(date: NaiveDate) -> u8 {
    index_to_u8(((date.month0() / 3) + 1) as usize).unwrap_or(1)
}

/// Parse the date formats the upstream collectors emit.
///
/// # Errors
///
/// Returns [`CurbsideError::InvalidDate`] when no format matches.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
        .map_err(|_| CurbsideError::InvalidDate {
            value: value.to_string(),
        })
}

/// Canonical date rendering used in every written table.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// One truck's location on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PanelRecord {
    pub truck: TruckId,
    pub date: NaiveDate,
    pub location: LocationId,
}

/// Rows discarded while typing a raw panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PanelReport {
    pub unknown_trucks: usize,
    pub duplicates: usize,
    pub catch_all_locations: usize,
}

/// A typed panel of parking records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Panel {
    records: Vec<PanelRecord>,
}

impl Panel {
    /// Type a raw panel against the fleet and location set.
    ///
    /// Trucks missing from the fleet are dropped, duplicate (truck, date) rows
    /// keep their first occurrence, and unknown locations fall into the catch-all.
    ///
    /// # Errors
    ///
    /// Fails fast on an unparsable date in a row whose truck is part of the
    /// fleet; rows of unknown trucks are dropped before their date is read.
    pub fn from_rows(
        rows: &[PanelRow],
        fleet: &Fleet,
        locations: &LocationSet,
    ) -> Result<(Self, PanelReport)> {
        let mut report = PanelReport::default();
        let mut seen: HashSet<(TruckId, NaiveDate)> = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());

        for row in rows {
            let Some(truck) = fleet.find(row.truck.trim()) else {
                report.unknown_trucks += 1;
                continue;
            };
            let date = parse_date(&row.date)?;
            if !seen.insert((truck, date)) {
                report.duplicates += 1;
                continue;
            }
            let location = locations.resolve(&row.location);
            if location == locations.other() && locations.get(row.location.trim()).is_none() {
                report.catch_all_locations += 1;
            }
            records.push(PanelRecord {
                truck,
                date,
                location,
            });
        }

        if report.unknown_trucks > 0 {
            log::warn!(
                "dropped {} panel rows for trucks missing from the truck types table",
                report.unknown_trucks
            );
        }
        if report.duplicates > 0 {
            log::warn!("dropped {} duplicate truck-day rows", report.duplicates);
        }
        Ok((Self { records }, report))
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

    /// Distinct dates, ascending.
    #[must_use]
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }

    /// One row per (truck, observed date); missing truck-days park at `fill`.
    #[must_use]
    pub fn complete(&self, fleet: &Fleet, fill: LocationId) -> Self {
        let observed: HashMap<(TruckId, NaiveDate), LocationId> = self
            .records
            .iter()
            .map(|r| ((r.truck, r.date), r.location))
            .collect();
        let dates = self.dates();
        let mut records = Vec::with_capacity(dates.len() * fleet.len());
        for truck in fleet.ids() {
            for &date in &dates {
                let location = observed.get(&(truck, date)).copied().unwrap_or(fill);
                records.push(PanelRecord {
                    truck,
                    date,
                    location,
                });
            }
        }
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> Fleet {
        Fleet::from_rows(&[
            TruckTypeRow::new("Tamale Spaceship", "Mexican"),
            TruckTypeRow::new("Aztec Dave", "Mexican"),
            TruckTypeRow::new("Bop Bar", "Korean"),
        ])
        .unwrap()
    }

    #[test]
    fn fleet_is_sorted_and_interns_types() {
        let fleet = fleet();
        let names: Vec<&str> = fleet.ids().map(|t| fleet.name(t)).collect();
        assert_eq!(names, vec!["Aztec Dave", "Bop Bar", "Tamale Spaceship"]);
        let aztec = fleet.find("Aztec Dave").unwrap();
        let tamale = fleet.find("Tamale Spaceship").unwrap();
        let bop = fleet.find("Bop Bar").unwrap();
        assert_eq!(fleet.kind_id(aztec), fleet.kind_id(tamale));
        assert_ne!(fleet.kind_id(aztec), fleet.kind_id(bop));
    }

    #[test]
    fn fleet_rejects_duplicates_and_empty() {
        let dup = Fleet::from_rows(&[TruckTypeRow::new("a", "x"), TruckTypeRow::new("a", "y")]);
        assert_eq!(
            dup,
            Err(CurbsideError::DuplicateTruck {
                truck: "a".to_string()
            })
        );
        assert!(matches!(
            Fleet::from_rows(&[]),
            Err(CurbsideError::EmptyTable { .. })
        ));
    }

    #[test]
    fn locations_send_unknown_names_to_catch_all() {
        let set = LocationSet::new(&["A", "B"], "Other").unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.other(), LocationId(2));
        assert_eq!(set.resolve("B"), LocationId(1));
        assert_eq!(set.resolve("Daley Plaza"), set.other());
        assert!(set.require("Daley Plaza").is_err());
    }

    #[test]
    fn calendar_helpers_follow_iso_weeks() {
        let date = parse_date("2015-01-01").unwrap();
        assert_eq!(day_of_week(date), 3);
        assert_eq!(quarter(date), 1);
        let week = WeekKey::of(date);
        assert_eq!(
            week,
            WeekKey {
                iso_year: 2015,
                week: 1
            }
        );
        assert_eq!(week.monday(), Some(parse_date("2014-12-29").unwrap()));
        let next = week.next().unwrap();
        assert_eq!(next.week, 2);
        assert_eq!(quarter(parse_date("2015-11-30").unwrap()), 4);
    }

    #[test]
    fn parse_date_accepts_upstream_formats() {
        assert!(parse_date("2014-06-02 00:00:00").is_ok());
        assert!(parse_date("06/02/2014").is_ok());
        assert!(matches!(
            parse_date("June 2nd"),
            Err(CurbsideError::InvalidDate { .. })
        ));
    }

    #[test]
    fn require_columns_names_missing_column() {
        let headers = ["Truck", "Date"];
        assert_eq!(
            require_columns("panel", &headers, &PANEL_COLUMNS),
            Err(CurbsideError::MissingColumn {
                table: "panel",
                column: "Location"
            })
        );
    }

    #[test]
    fn panel_typing_drops_unknowns_and_duplicates() {
        let fleet = fleet();
        let set = LocationSet::new(&["A"], "Other").unwrap();
        let rows = vec![
            PanelRow::new("Bop Bar", "2014-06-02", "A"),
            PanelRow::new("Bop Bar", "2014-06-02", "Other"),
            PanelRow::new("Ghost Truck", "2014-06-02", "A"),
            PanelRow::new("Aztec Dave", "2014-06-03", "Wacker"),
        ];
        let (panel, report) = Panel::from_rows(&rows, &fleet, &set).unwrap();
        assert_eq!(panel.len(), 2);
        assert_eq!(report.unknown_trucks, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.catch_all_locations, 1);
        assert_eq!(panel.records()[1].location, set.other());
    }

    #[test]
    fn unknown_truck_rows_are_dropped_before_date_parsing() {
        let fleet = fleet();
        let set = LocationSet::new(&["A"], "Other").unwrap();
        let rows = vec![
            PanelRow::new("Ghost Truck", "not a date", "A"),
            PanelRow::new("Bop Bar", "2014-06-02", "A"),
        ];
        let (panel, report) = Panel::from_rows(&rows, &fleet, &set).unwrap();
        assert_eq!(panel.len(), 1);
        assert_eq!(report.unknown_trucks, 1);

        let bad = vec![PanelRow::new("Bop Bar", "not a date", "A")];
        assert!(matches!(
            Panel::from_rows(&bad, &fleet, &set),
            Err(CurbsideError::InvalidDate { .. })
        ));
    }

    #[test]
    fn completion_fills_missing_truck_days() {
        let fleet = fleet();
        let set = LocationSet::new(&["A"], "Other").unwrap();
        let rows = vec![
            PanelRow::new("Bop Bar", "2014-06-02", "A"),
            PanelRow::new("Aztec Dave", "2014-06-03", "A"),
        ];
        let (panel, _) = Panel::from_rows(&rows, &fleet, &set).unwrap();
        let complete = panel.complete(&fleet, set.other());
        assert_eq!(complete.len(), fleet.len() * 2);
        let filled = complete
            .records()
            .iter()
            .filter(|r| r.location == set.other())
            .count();
        assert_eq!(filled, 4);
    }
}
