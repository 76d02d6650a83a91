//! Core domain model and ledger operations for tourlog.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tourlog-core";

/// Advisory roll cooldown in milliseconds. UI throttling only, not enforced
/// anywhere else.
pub const ROLL_COOLDOWN_MS: u64 = 20_000;

/// Fixed vocabulary of transit modes a station can belong to. Serialized with
/// the single-letter codes the wire format uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModeTag {
    #[serde(rename = "S")]
    Suburban,
    #[serde(rename = "U")]
    Underground,
    #[serde(rename = "R")]
    Regional,
}

impl ModeTag {
    pub const ALL: [ModeTag; 3] = [ModeTag::Suburban, ModeTag::Underground, ModeTag::Regional];

    pub fn code(&self) -> &'static str {
        match self {
            ModeTag::Suburban => "S",
            ModeTag::Underground => "U",
            ModeTag::Regional => "R",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModeTag::Suburban => "Suburban",
            ModeTag::Underground => "Underground",
            ModeTag::Regional => "Regional",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(ModeTag::Suburban),
            "U" => Some(ModeTag::Underground),
            "R" => Some(ModeTag::Regional),
            _ => None,
        }
    }
}

/// A dated record of having been at a station. The date is an ISO 8601 day
/// string and doubles as the dedup/sort key; lexicographic order is
/// chronological order for this format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl Visit {
    pub fn on(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            note: None,
            photos: Vec::new(),
        }
    }
}

// Stored data written before the multi-photo change carries a single `photo`
// string instead of a `photos` array; fold it on deserialize.
impl<'de> Deserialize<'de> for Visit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawVisit {
            date: String,
            #[serde(default)]
            note: Option<String>,
            #[serde(default)]
            photos: Option<Vec<String>>,
            #[serde(default)]
            photo: Option<String>,
        }

        let raw = RawVisit::deserialize(deserializer)?;
        let photos = match raw.photos {
            Some(photos) => photos,
            None => raw.photo.into_iter().collect(),
        };
        Ok(Visit {
            date: raw.date,
            note: raw.note,
            photos,
        })
    }
}

/// A trackable stop with stable identity, mode tags, and line labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<ModeTag>,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub visits: Vec<Visit>,
}

impl Station {
    pub fn new(name: impl Into<String>, types: Vec<ModeTag>, lines: Vec<String>) -> Self {
        Self {
            id: fresh_station_id(),
            name: name.into(),
            types,
            lines,
            visits: Vec::new(),
        }
    }

    pub fn is_visited(&self) -> bool {
        !self.visits.is_empty()
    }

    /// Date of the first entry in the visit sequence. Reconciled sequences are
    /// sorted, so this is the chronologically earliest visit there.
    pub fn first_visit_date(&self) -> Option<&str> {
        self.visits.first().map(|v| v.date.as_str())
    }

    pub fn last_visit_date(&self) -> Option<&str> {
        self.visits.last().map(|v| v.date.as_str())
    }

    /// Display label with the sorted mode codes as prefix, e.g.
    /// `S+U Alexanderplatz`.
    pub fn label(&self) -> String {
        if self.types.is_empty() {
            return self.name.clone();
        }
        let mut codes: Vec<&str> = self.types.iter().map(ModeTag::code).collect();
        codes.sort_unstable();
        codes.dedup();
        format!("{} {}", codes.join("+"), self.name)
    }
}

pub fn fresh_station_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fold a station name into the comparison key used for merge matching:
/// case fold, NFD diacritic strip, whitespace collapse and trim. The key is
/// only ever used for matching, never stored.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("unknown station id {0}")]
    UnknownStation(String),
    #[error("visit index {index} out of range for station {station_id}")]
    VisitIndexOutOfRange { station_id: String, index: usize },
    #[error("photo index {index} out of range for visit {visit_index} of station {station_id}")]
    PhotoIndexOutOfRange {
        station_id: String,
        visit_index: usize,
        index: usize,
    },
}

/// The full station collection for one user session. Serializes as the plain
/// JSON array the import/export wire format uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    pub stations: Vec<Station>,
}

impl Ledger {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    /// Fresh ledger from the built-in station catalog, no visits recorded.
    pub fn seed() -> Self {
        Self {
            stations: seed_catalog(),
        }
    }

    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == station_id)
    }

    /// Find a station by its normalized display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Station> {
        let key = normalize_name(name);
        self.stations.iter().find(|s| normalize_name(&s.name) == key)
    }

    pub fn visited_count(&self) -> usize {
        self.stations.iter().filter(|s| s.is_visited()).count()
    }

    pub fn photo_count(&self) -> usize {
        self.stations
            .iter()
            .flat_map(|s| &s.visits)
            .map(|v| v.photos.len())
            .sum()
    }

    /// Latest visit date recorded anywhere in the ledger.
    pub fn last_visit_date(&self) -> Option<&str> {
        self.stations
            .iter()
            .flat_map(|s| &s.visits)
            .map(|v| v.date.as_str())
            .max()
    }

    fn station_mut(&mut self, station_id: &str) -> Result<&mut Station, LedgerError> {
        self.stations
            .iter_mut()
            .find(|s| s.id == station_id)
            .ok_or_else(|| LedgerError::UnknownStation(station_id.to_string()))
    }

    /// Append a visit to the station's sequence. Manual entry does not
    /// deduplicate on date; only the reconciler does.
    pub fn add_visit(&mut self, station_id: &str, visit: Visit) -> Result<(), LedgerError> {
        self.station_mut(station_id)?.visits.push(visit);
        Ok(())
    }

    /// Mark a station unvisited by dropping its whole visit sequence. Unknown
    /// ids are a no-op.
    pub fn clear_visits(&mut self, station_id: &str) {
        if let Some(station) = self.stations.iter_mut().find(|s| s.id == station_id) {
            station.visits.clear();
        }
    }

    /// Append transcoded photo references to the visit at `visit_index`.
    pub fn attach_photos(
        &mut self,
        station_id: &str,
        visit_index: usize,
        photos: Vec<String>,
    ) -> Result<(), LedgerError> {
        let station = self.station_mut(station_id)?;
        let visit = station.visits.get_mut(visit_index).ok_or_else(|| {
            LedgerError::VisitIndexOutOfRange {
                station_id: station_id.to_string(),
                index: visit_index,
            }
        })?;
        visit.photos.extend(photos);
        Ok(())
    }

    /// Remove exactly one photo reference by position.
    pub fn remove_photo(
        &mut self,
        station_id: &str,
        visit_index: usize,
        photo_index: usize,
    ) -> Result<(), LedgerError> {
        let station = self.station_mut(station_id)?;
        let visit = station.visits.get_mut(visit_index).ok_or_else(|| {
            LedgerError::VisitIndexOutOfRange {
                station_id: station_id.to_string(),
                index: visit_index,
            }
        })?;
        if photo_index >= visit.photos.len() {
            return Err(LedgerError::PhotoIndexOutOfRange {
                station_id: station_id.to_string(),
                visit_index,
                index: photo_index,
            });
        }
        visit.photos.remove(photo_index);
        Ok(())
    }

    /// Replace the note on the visit at `visit_index`. Whitespace is trimmed
    /// and an empty result is stored as absence, not as an empty string.
    pub fn update_visit_note(
        &mut self,
        station_id: &str,
        visit_index: usize,
        text: &str,
    ) -> Result<(), LedgerError> {
        let station = self.station_mut(station_id)?;
        let visit = station.visits.get_mut(visit_index).ok_or_else(|| {
            LedgerError::VisitIndexOutOfRange {
                station_id: station_id.to_string(),
                index: visit_index,
            }
        })?;
        let clean = text.trim();
        visit.note = if clean.is_empty() {
            None
        } else {
            Some(clean.to_string())
        };
        Ok(())
    }
}

/// Visited/total pair for one line label or mode tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub total: usize,
    pub visited: usize,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.visited >= self.total
    }
}

/// Visited-station share as a whole-number percentage, rounded to nearest.
pub fn progress_percent(ledger: &Ledger) -> u32 {
    let total = ledger.stations.len().max(1);
    let visited = ledger.visited_count();
    ((visited as f64 / total as f64) * 100.0).round() as u32
}

/// Per-line visited/total counts over every line label in the ledger.
pub fn line_coverage(ledger: &Ledger) -> BTreeMap<String, Coverage> {
    let mut map: BTreeMap<String, Coverage> = BTreeMap::new();
    for station in &ledger.stations {
        for line in &station.lines {
            let entry = map.entry(line.clone()).or_default();
            entry.total += 1;
            if station.is_visited() {
                entry.visited += 1;
            }
        }
    }
    map
}

/// Visited/total counts per mode tag. Every tag is present, even at zero.
pub fn mode_coverage(ledger: &Ledger) -> BTreeMap<ModeTag, Coverage> {
    let mut map: BTreeMap<ModeTag, Coverage> =
        ModeTag::ALL.iter().map(|t| (*t, Coverage::default())).collect();
    for station in &ledger.stations {
        for tag in &station.types {
            let entry = map.entry(*tag).or_default();
            entry.total += 1;
            if station.is_visited() {
                entry.visited += 1;
            }
        }
    }
    map
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MilestoneKind {
    VisitCount(usize),
    Percent(u8),
    AllMode(ModeTag),
    AllLine(String),
}

/// A derived achievement fact. Never stored; recomputed from the ledger on
/// every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub label: String,
    pub kind: MilestoneKind,
    pub achieved: bool,
    pub achieved_on: Option<String>,
}

/// Evaluate the fixed milestone list plus one entry per fully-covered mode
/// and line. Count milestones date to the n-th earliest first-visit; full
/// mode/line milestones date to the first visit of the last required station.
pub fn milestones(ledger: &Ledger) -> Vec<Milestone> {
    let total = ledger.stations.len().max(1);
    let mut first_dates: Vec<&str> = ledger
        .stations
        .iter()
        .filter_map(Station::first_visit_date)
        .collect();
    first_dates.sort_unstable();
    let visited = first_dates.len();

    let date_for_count = |n: usize| -> Option<String> {
        if n == 0 {
            return None;
        }
        first_dates.get(n - 1).map(|d| d.to_string())
    };

    let count_milestone = |label: &str, count: usize| Milestone {
        label: label.to_string(),
        kind: MilestoneKind::VisitCount(count),
        achieved: visited >= count,
        achieved_on: if visited >= count {
            date_for_count(count)
        } else {
            None
        },
    };
    let percent_milestone = |percent: u8| {
        let count = (total * percent as usize).div_ceil(100);
        Milestone {
            label: format!("{percent}%"),
            kind: MilestoneKind::Percent(percent),
            achieved: visited >= count,
            achieved_on: if visited >= count {
                date_for_count(count)
            } else {
                None
            },
        }
    };

    let mut out = vec![
        count_milestone("First visit", 1),
        count_milestone("Hat-trick", 3),
        percent_milestone(10),
        percent_milestone(25),
        percent_milestone(50),
        percent_milestone(75),
        count_milestone("Three to go", total.saturating_sub(3)),
        percent_milestone(100),
    ];

    for tag in ModeTag::ALL {
        let members: Vec<&Station> = ledger
            .stations
            .iter()
            .filter(|s| s.types.contains(&tag))
            .collect();
        out.push(group_milestone(
            format!("All {} stations", tag.name()),
            MilestoneKind::AllMode(tag),
            &members,
        ));
    }

    for line in line_coverage(ledger).keys() {
        let members: Vec<&Station> = ledger
            .stations
            .iter()
            .filter(|s| s.lines.contains(line))
            .collect();
        out.push(group_milestone(
            format!("All of line {line}"),
            MilestoneKind::AllLine(line.clone()),
            &members,
        ));
    }

    out
}

fn group_milestone(label: String, kind: MilestoneKind, members: &[&Station]) -> Milestone {
    let achieved = !members.is_empty() && members.iter().all(|s| s.is_visited());
    let achieved_on = if achieved {
        let mut dates: Vec<&str> = members.iter().filter_map(|s| s.first_visit_date()).collect();
        dates.sort_unstable();
        dates.last().map(|d| d.to_string())
    } else {
        None
    };
    Milestone {
        label,
        kind,
        achieved,
        achieved_on,
    }
}

/// Up to `count` distinct ids drawn uniformly without replacement from the
/// unvisited stations. Returns fewer (or none) when fewer exist.
pub fn pick_unvisited(ledger: &Ledger, count: usize) -> Vec<String> {
    let unvisited: Vec<&Station> = ledger
        .stations
        .iter()
        .filter(|s| !s.is_visited())
        .collect();
    let mut rng = rand::thread_rng();
    unvisited
        .choose_multiple(&mut rng, count)
        .map(|s| s.id.clone())
        .collect()
}

/// Cooldown gate for the roll button. A zero `last_roll_ms` means no prior
/// roll and always passes.
pub fn roll_allowed(last_roll_ms: u64, now_ms: u64, cooldown_ms: u64) -> bool {
    last_roll_ms == 0 || now_ms.saturating_sub(last_roll_ms) >= cooldown_ms
}

fn seed_catalog() -> Vec<Station> {
    use ModeTag::{Regional as R, Suburban as S, Underground as U};

    let entries: &[(&str, &[ModeTag], &[&str])] = &[
        ("Alexanderplatz", &[S, U], &["S3", "S5", "S7", "S9", "U2", "U5", "U8"]),
        ("Hauptbahnhof", &[S, U, R], &["S3", "S5", "S7", "S9", "U5"]),
        ("Friedrichstraße", &[S, U, R], &["S1", "S2", "S25", "U6"]),
        ("Zoologischer Garten", &[S, U, R], &["S3", "S5", "S7", "S9", "U2", "U9"]),
        ("Gesundbrunnen", &[S, U, R], &["S1", "S2", "S25", "S41", "S42", "U8"]),
        ("Ostkreuz", &[S, R], &["S3", "S41", "S42", "S5", "S7", "S9"]),
        ("Südkreuz", &[S, R], &["S2", "S25", "S41", "S42", "S45", "S46"]),
        ("Westkreuz", &[S], &["S3", "S41", "S42", "S5", "S7", "S9"]),
        ("Potsdamer Platz", &[S, U, R], &["S1", "S2", "S25", "U2"]),
        ("Warschauer Straße", &[S, U], &["S3", "S5", "S7", "S9", "U1", "U3"]),
        ("Schönhauser Allee", &[S, U], &["S41", "S42", "S8", "U2"]),
        ("Frankfurter Allee", &[S, U], &["S41", "S42", "S8", "U5"]),
        ("Hermannplatz", &[U], &["U7", "U8"]),
        ("Kottbusser Tor", &[U], &["U1", "U3", "U8"]),
        ("Jungfernheide", &[S, U], &["S41", "S42", "U7"]),
        ("Tempelhof", &[S, U], &["S41", "S42", "S45", "S46", "U6"]),
    ];

    entries
        .iter()
        .map(|(name, types, lines)| {
            Station::new(
                *name,
                types.to_vec(),
                lines.iter().map(|l| l.to_string()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_of(names: &[&str]) -> Ledger {
        Ledger::new(
            names
                .iter()
                .map(|n| Station::new(*n, vec![ModeTag::Suburban], vec!["S1".to_string()]))
                .collect(),
        )
    }

    fn visit_first(ledger: &mut Ledger, index: usize, date: &str) {
        let id = ledger.stations[index].id.clone();
        ledger.add_visit(&id, Visit::on(date)).expect("add visit");
    }

    #[test]
    fn normalize_name_folds_case_diacritics_and_whitespace() {
        assert_eq!(normalize_name("  Schönhauser   Allee "), "schonhauser allee");
        assert_eq!(normalize_name("ALEXANDERPLATZ"), "alexanderplatz");
        assert_eq!(normalize_name("Café  Süd"), "cafe sud");
    }

    #[test]
    fn add_visit_requires_known_station_and_does_not_dedup() {
        let mut ledger = ledger_of(&["A"]);
        let id = ledger.stations[0].id.clone();

        assert_eq!(
            ledger.add_visit("nope", Visit::on("2024-01-01")),
            Err(LedgerError::UnknownStation("nope".to_string()))
        );

        ledger.add_visit(&id, Visit::on("2024-01-01")).unwrap();
        ledger.add_visit(&id, Visit::on("2024-01-01")).unwrap();
        assert_eq!(ledger.stations[0].visits.len(), 2);
    }

    #[test]
    fn clear_visits_empties_sequence_and_ignores_unknown_ids() {
        let mut ledger = ledger_of(&["A"]);
        visit_first(&mut ledger, 0, "2024-01-01");

        ledger.clear_visits("nope");
        assert_eq!(ledger.stations[0].visits.len(), 1);

        let id = ledger.stations[0].id.clone();
        ledger.clear_visits(&id);
        assert!(ledger.stations[0].visits.is_empty());
    }

    #[test]
    fn attach_photos_appends_and_reports_bad_index() {
        let mut ledger = ledger_of(&["A"]);
        let id = ledger.stations[0].id.clone();
        visit_first(&mut ledger, 0, "2024-01-01");

        ledger
            .attach_photos(&id, 0, vec!["p1".to_string(), "p2".to_string()])
            .unwrap();
        assert_eq!(ledger.stations[0].visits[0].photos, vec!["p1", "p2"]);

        let err = ledger.attach_photos(&id, 5, vec!["p3".to_string()]).unwrap_err();
        assert!(matches!(err, LedgerError::VisitIndexOutOfRange { index: 5, .. }));
        assert_eq!(ledger.stations[0].visits[0].photos.len(), 2);
    }

    #[test]
    fn remove_photo_drops_exactly_one_by_position() {
        let mut ledger = ledger_of(&["A"]);
        let id = ledger.stations[0].id.clone();
        visit_first(&mut ledger, 0, "2024-01-01");
        ledger
            .attach_photos(&id, 0, vec!["p1".into(), "p2".into(), "p3".into()])
            .unwrap();

        ledger.remove_photo(&id, 0, 1).unwrap();
        assert_eq!(ledger.stations[0].visits[0].photos, vec!["p1", "p3"]);

        let err = ledger.remove_photo(&id, 0, 9).unwrap_err();
        assert!(matches!(err, LedgerError::PhotoIndexOutOfRange { index: 9, .. }));
    }

    #[test]
    fn update_visit_note_trims_and_normalizes_empty_to_absent() {
        let mut ledger = ledger_of(&["A"]);
        let id = ledger.stations[0].id.clone();
        visit_first(&mut ledger, 0, "2024-01-01");

        ledger.update_visit_note(&id, 0, "  nice trip  ").unwrap();
        assert_eq!(ledger.stations[0].visits[0].note.as_deref(), Some("nice trip"));

        ledger.update_visit_note(&id, 0, "   ").unwrap();
        assert_eq!(ledger.stations[0].visits[0].note, None);
    }

    #[test]
    fn legacy_single_photo_field_is_folded_into_photos() {
        let visit: Visit =
            serde_json::from_str(r#"{"date":"2024-01-01","photo":"data:old"}"#).unwrap();
        assert_eq!(visit.photos, vec!["data:old"]);

        let visit: Visit =
            serde_json::from_str(r#"{"date":"2024-01-01","photos":["a","b"],"photo":"x"}"#)
                .unwrap();
        assert_eq!(visit.photos, vec!["a", "b"]);
    }

    #[test]
    fn station_label_prefixes_sorted_mode_codes() {
        let st = Station::new(
            "Alexanderplatz",
            vec![ModeTag::Underground, ModeTag::Suburban],
            vec![],
        );
        assert_eq!(st.label(), "S+U Alexanderplatz");

        let bare = Station::new("Hermannplatz", vec![], vec![]);
        assert_eq!(bare.label(), "Hermannplatz");
    }

    #[test]
    fn progress_rounds_to_whole_percent() {
        let mut ledger = ledger_of(&["A", "B", "C", "D"]);
        assert_eq!(progress_percent(&ledger), 0);

        visit_first(&mut ledger, 0, "2024-01-01");
        assert_eq!(progress_percent(&ledger), 25);

        visit_first(&mut ledger, 1, "2024-02-01");
        assert_eq!(progress_percent(&ledger), 50);
    }

    #[test]
    fn line_and_mode_coverage_count_visited_per_group() {
        let mut ledger = Ledger::new(vec![
            Station::new("A", vec![ModeTag::Suburban], vec!["S1".into(), "S2".into()]),
            Station::new("B", vec![ModeTag::Suburban, ModeTag::Underground], vec!["S1".into()]),
            Station::new("C", vec![ModeTag::Regional], vec![]),
        ]);
        visit_first(&mut ledger, 1, "2024-01-01");

        let lines = line_coverage(&ledger);
        assert_eq!(lines["S1"], Coverage { total: 2, visited: 1 });
        assert_eq!(lines["S2"], Coverage { total: 1, visited: 0 });

        let modes = mode_coverage(&ledger);
        assert_eq!(modes[&ModeTag::Suburban], Coverage { total: 2, visited: 1 });
        assert_eq!(modes[&ModeTag::Underground], Coverage { total: 1, visited: 1 });
        assert_eq!(modes[&ModeTag::Regional], Coverage { total: 1, visited: 0 });
    }

    #[test]
    fn count_and_percent_milestones_date_to_nth_earliest_first_visit() {
        let mut ledger = ledger_of(&["A", "B", "C", "D"]);
        visit_first(&mut ledger, 2, "2024-01-05");
        visit_first(&mut ledger, 0, "2024-02-10");

        let all = milestones(&ledger);
        let by_label = |label: &str| all.iter().find(|m| m.label == label).unwrap();

        let first = by_label("First visit");
        assert!(first.achieved);
        assert_eq!(first.achieved_on.as_deref(), Some("2024-01-05"));

        let quarter = by_label("25%");
        assert!(quarter.achieved);
        assert_eq!(quarter.achieved_on.as_deref(), Some("2024-01-05"));

        let half = by_label("50%");
        assert!(half.achieved);
        assert_eq!(half.achieved_on.as_deref(), Some("2024-02-10"));

        assert!(!by_label("75%").achieved);
        assert!(!by_label("Hat-trick").achieved);
    }

    #[test]
    fn three_to_go_on_tiny_catalog_is_achieved_without_a_date() {
        let ledger = ledger_of(&["A", "B"]);
        let all = milestones(&ledger);
        let almost = all.iter().find(|m| m.label == "Three to go").unwrap();
        assert_eq!(almost.kind, MilestoneKind::VisitCount(0));
        assert!(almost.achieved);
        assert_eq!(almost.achieved_on, None);
    }

    #[test]
    fn full_mode_milestone_dates_to_last_required_first_visit() {
        let mut ledger = Ledger::new(vec![
            Station::new("A", vec![ModeTag::Underground], vec![]),
            Station::new("B", vec![ModeTag::Underground], vec![]),
            Station::new("C", vec![ModeTag::Suburban], vec![]),
        ]);
        visit_first(&mut ledger, 0, "2024-03-01");
        visit_first(&mut ledger, 1, "2024-01-01");

        let all = milestones(&ledger);
        let all_u = all
            .iter()
            .find(|m| m.kind == MilestoneKind::AllMode(ModeTag::Underground))
            .unwrap();
        assert!(all_u.achieved);
        assert_eq!(all_u.achieved_on.as_deref(), Some("2024-03-01"));

        let all_s = all
            .iter()
            .find(|m| m.kind == MilestoneKind::AllMode(ModeTag::Suburban))
            .unwrap();
        assert!(!all_s.achieved);
        assert_eq!(all_s.achieved_on, None);
    }

    #[test]
    fn full_line_milestone_requires_every_station_on_the_line() {
        let mut ledger = Ledger::new(vec![
            Station::new("A", vec![], vec!["U8".into()]),
            Station::new("B", vec![], vec!["U8".into(), "S41".into()]),
        ]);
        visit_first(&mut ledger, 0, "2024-01-01");
        visit_first(&mut ledger, 1, "2024-01-02");

        let all = milestones(&ledger);
        let u8_done = all
            .iter()
            .find(|m| m.kind == MilestoneKind::AllLine("U8".into()))
            .unwrap();
        assert!(u8_done.achieved);
        assert_eq!(u8_done.achieved_on.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn pick_unvisited_never_returns_visited_or_duplicate_ids() {
        let mut ledger = ledger_of(&["A", "B", "C", "D", "E"]);
        visit_first(&mut ledger, 0, "2024-01-01");
        visit_first(&mut ledger, 3, "2024-01-02");
        let visited: Vec<String> = ledger
            .stations
            .iter()
            .filter(|s| s.is_visited())
            .map(|s| s.id.clone())
            .collect();

        for _ in 0..50 {
            let picked = pick_unvisited(&ledger, 3);
            assert_eq!(picked.len(), 3);
            for id in &picked {
                assert!(!visited.contains(id));
            }
            let mut unique = picked.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), picked.len());
        }
    }

    #[test]
    fn pick_unvisited_returns_fewer_when_pool_is_small() {
        let mut ledger = ledger_of(&["A", "B"]);
        assert_eq!(pick_unvisited(&ledger, 3).len(), 2);

        visit_first(&mut ledger, 0, "2024-01-01");
        visit_first(&mut ledger, 1, "2024-01-02");
        assert!(pick_unvisited(&ledger, 3).is_empty());
    }

    #[test]
    fn roll_cooldown_boundaries() {
        assert!(roll_allowed(0, 123, ROLL_COOLDOWN_MS));
        assert!(!roll_allowed(1_000, 1_000 + 19_999, ROLL_COOLDOWN_MS));
        assert!(roll_allowed(1_000, 1_000 + 20_000, ROLL_COOLDOWN_MS));
    }

    #[test]
    fn seed_ledger_has_unique_ids_and_no_visits() {
        let ledger = Ledger::seed();
        assert!(!ledger.stations.is_empty());
        assert_eq!(ledger.visited_count(), 0);

        let mut ids: Vec<&str> = ledger.stations.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ledger.stations.len());
    }
}
