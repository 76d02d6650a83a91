//! Import reconciliation and backup export for the tourlog ledger.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use tourlog_core::{fresh_station_id, normalize_name, Ledger, ModeTag, Station, Visit};

pub const CRATE_NAME: &str = "tourlog-sync";

/// Sanitizer default for records arriving without a usable name.
pub const DEFAULT_STATION_NAME: &str = "Unnamed";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid import payload: expected a JSON array of stations")]
    NotAnArray,
    #[error("unreadable import payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One sanitized station-shaped record from an import payload. Identity is
/// resolved during reconciliation, never taken from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingStation {
    pub name: String,
    pub types: Vec<ModeTag>,
    pub lines: Vec<String>,
    pub visits: Vec<Visit>,
}

/// Parse and sanitize an import payload. Fails atomically when the top-level
/// shape is not an array; malformed fields inside individual records are
/// coerced or dropped instead.
pub fn parse_import(text: &str) -> Result<Vec<IncomingStation>, ImportError> {
    let value: Value = serde_json::from_str(text)?;
    sanitize_import(&value)
}

pub fn sanitize_import(value: &Value) -> Result<Vec<IncomingStation>, ImportError> {
    let records = value.as_array().ok_or(ImportError::NotAnArray)?;
    Ok(records.iter().map(sanitize_record).collect())
}

fn sanitize_record(record: &Value) -> IncomingStation {
    let name = coerce_text(record.get("name"))
        .unwrap_or_else(|| DEFAULT_STATION_NAME.to_string());

    let mut types = Vec::new();
    if let Some(raw) = record.get("types").and_then(Value::as_array) {
        for tag in raw.iter().filter_map(Value::as_str).filter_map(ModeTag::from_code) {
            if !types.contains(&tag) {
                types.push(tag);
            }
        }
    }

    let mut lines = Vec::new();
    if let Some(raw) = record.get("lines").and_then(Value::as_array) {
        for line in raw.iter().filter_map(|v| coerce_text(Some(v))) {
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
    }

    let visits = record
        .get("visits")
        .and_then(Value::as_array)
        .map(|raw| raw.iter().filter_map(sanitize_visit).collect())
        .unwrap_or_default();

    IncomingStation {
        name,
        types,
        lines,
        visits,
    }
}

fn sanitize_visit(value: &Value) -> Option<Visit> {
    let date = coerce_text(value.get("date")).unwrap_or_default();
    if date.is_empty() {
        debug!("dropping imported visit without a date");
        return None;
    }

    let note = value.get("note").and_then(Value::as_str).map(str::to_string);

    // Payloads written before the multi-photo change carry a single `photo`
    // string; wrap it into a one-element list.
    let photos = match value.get("photos").and_then(Value::as_array) {
        Some(raw) => raw
            .iter()
            .filter_map(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        None => value
            .get("photo")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(|p| vec![p.to_string()])
            .unwrap_or_default(),
    };

    Some(Visit { date, note, photos })
}

fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Merge sanitized incoming records into `ledger` and return the new ledger.
///
/// Matching is by normalized name. Matched stations keep their id and get
/// their tag and line sets unioned; unmatched records become new stations
/// with freshly generated ids. Visits are appended with per-date dedup
/// against the target, then the target's sequence is re-sorted ascending.
pub fn reconcile(ledger: &Ledger, incoming: &[IncomingStation]) -> Ledger {
    let mut next = ledger.clone();
    let mut index: HashMap<String, usize> = next
        .stations
        .iter()
        .enumerate()
        .map(|(i, s)| (normalize_name(&s.name), i))
        .collect();

    for inc in incoming {
        let key = normalize_name(&inc.name);
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                next.stations.push(Station {
                    id: fresh_station_id(),
                    name: inc.name.clone(),
                    types: inc.types.clone(),
                    lines: inc.lines.clone(),
                    visits: Vec::new(),
                });
                let i = next.stations.len() - 1;
                index.insert(key, i);
                i
            }
        };

        let station = &mut next.stations[slot];
        for tag in &inc.types {
            if !station.types.contains(tag) {
                station.types.push(*tag);
            }
        }
        for line in &inc.lines {
            if !station.lines.contains(line) {
                station.lines.push(line.clone());
            }
        }

        let mut have: HashSet<String> = station.visits.iter().map(|v| v.date.clone()).collect();
        for visit in &inc.visits {
            if have.contains(&visit.date) {
                continue;
            }
            have.insert(visit.date.clone());
            station.visits.push(visit.clone());
        }
        station.visits.sort_by(|a, b| a.date.cmp(&b.date));
    }

    next
}

/// Parse, sanitize, and merge in one step. The input ledger is untouched on
/// failure.
pub fn import_into(ledger: &Ledger, text: &str) -> Result<Ledger, ImportError> {
    Ok(reconcile(ledger, &parse_import(text)?))
}

/// Serialized backup payload plus its generated filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    pub filename: String,
    pub payload: String,
}

/// The ledger serialized verbatim in the import wire shape, pretty-printed.
pub fn export_json(ledger: &Ledger) -> serde_json::Result<String> {
    serde_json::to_string_pretty(ledger)
}

pub fn backup_filename(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-backup-{}.json", date.format("%Y-%m-%d"))
}

pub fn export_bundle(ledger: &Ledger, prefix: &str) -> serde_json::Result<ExportBundle> {
    Ok(ExportBundle {
        filename: backup_filename(prefix, Utc::now().date_naive()),
        payload: export_json(ledger)?,
    })
}
