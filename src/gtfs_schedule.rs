// Static schedule summary built from the IDFM GTFS archive
// IDFM GTFS: https://data.iledefrance-mobilites.fr/explore/dataset/offre-horaires-tc-gtfs-idfm/
//
// For each configured line: first and last departure of the current week's
// services, and the names of every stop the line serves.

use crate::error::{DashboardError, Result};
use crate::http_fetch::HttpFetcher;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

pub const IDFM_GTFS_URL: &str = "https://data.iledefrance-mobilites.fr/explore/dataset/offre-horaires-tc-gtfs-idfm/files/a925e164271e4bca93433756d6a340d1/download/";

// ============================================================================
// GTFS rows
// ============================================================================

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    route_short_name: String,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    service_id: String,
    trip_id: String,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    departure_time: String,
    stop_id: String,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    service_id: String,
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct CalendarDateRow {
    service_id: String,
    date: String,
    exception_type: u32, // 1 = service added, 2 = service removed
}

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    stop_name: String,
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSchedule {
    pub line: String,
    pub route_ids: Vec<String>,
    pub trips: usize,
    pub first_departure: Option<String>,
    pub last_departure: Option<String>,
    pub stops: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub generated_at: DateTime<Utc>,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub lines: Vec<LineSchedule>,
}

impl ScheduleSummary {
    pub fn line(&self, short_name: &str) -> Option<&LineSchedule> {
        self.lines.iter().find(|l| l.line.eq_ignore_ascii_case(short_name))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DashboardError::FileError(format!("Failed to serialize schedule: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| DashboardError::FileError(format!("Failed to create {:?}: {}", parent, e)))?;
        }
        fs::write(path, json)
            .map_err(|e| DashboardError::FileError(format!("Failed to write {:?}: {}", path, e)))?;
        log::info!("✓ Schedule summary saved to: {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| DashboardError::FileError(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| DashboardError::ParseError(format!("Failed to parse {:?}: {}", path, e)))
    }
}

/// Monday and Sunday of the ISO week containing `day`.
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(day.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(6))
}

/// Parse GTFS time format (HH:MM:SS, hours may exceed 23) to seconds since midnight
pub fn parse_gtfs_time(time_str: &str) -> Option<u32> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: u32 = parts[0].parse().ok()?;
    let minutes: u32 = parts[1].parse().ok()?;
    let seconds: u32 = parts[2].parse().ok()?;

    Some(hours * 3600 + minutes * 60 + seconds)
}

fn parse_gtfs_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y%m%d").ok()
}

/// Streams every row of `name` through `visit`. A missing file yields no rows.
fn for_each_row<R, T, F>(archive: &mut ZipArchive<R>, name: &str, mut visit: F) -> Result<()>
where
    R: Read + Seek,
    T: DeserializeOwned,
    F: FnMut(T),
{
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            log::warn!("⚠️  {} missing from GTFS archive", name);
            return Ok(());
        }
        Err(e) => return Err(DashboardError::ParseError(format!("Failed to open {}: {}", name, e))),
    };

    let mut rdr = csv::Reader::from_reader(file);
    let mut skipped = 0usize;
    for result in rdr.deserialize::<T>() {
        match result {
            Ok(row) => visit(row),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        log::debug!("   {} malformed rows skipped in {}", skipped, name);
    }
    Ok(())
}

/// Services running at least one day between `start` and `end`.
fn active_services<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashSet<String>> {
    let mut active = HashSet::new();

    for_each_row(archive, "calendar.txt", |row: CalendarRow| {
        if let (Some(from), Some(to)) = (parse_gtfs_date(&row.start_date), parse_gtfs_date(&row.end_date)) {
            if from <= end && to >= start {
                active.insert(row.service_id);
            }
        }
    })?;

    for_each_row(archive, "calendar_dates.txt", |row: CalendarDateRow| {
        if row.exception_type == 1 {
            if let Some(date) = parse_gtfs_date(&row.date) {
                if date >= start && date <= end {
                    active.insert(row.service_id);
                }
            }
        }
    })?;

    Ok(active)
}

pub fn summarize<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    lines: &[String],
    today: NaiveDate,
) -> Result<ScheduleSummary> {
    let (week_start, week_end) = week_bounds(today);

    // route_id -> line short name
    let mut route_line: HashMap<String, String> = HashMap::new();
    for_each_row(archive, "routes.txt", |row: RouteRow| {
        if let Some(line) = lines.iter().find(|l| l.eq_ignore_ascii_case(row.route_short_name.trim())) {
            route_line.insert(row.route_id, line.clone());
        }
    })?;
    log::info!("   ✓ {} routes match {:?}", route_line.len(), lines);

    let services = active_services(archive, week_start, week_end)?;
    log::info!("   ✓ {} services active {} → {}", services.len(), week_start, week_end);

    // trip_id -> line short name
    let mut trip_line: HashMap<String, String> = HashMap::new();
    for_each_row(archive, "trips.txt", |row: TripRow| {
        if let Some(line) = route_line.get(&row.route_id) {
            if services.contains(&row.service_id) {
                trip_line.insert(row.trip_id, line.clone());
            }
        }
    })?;
    log::info!("   ✓ {} trips kept", trip_line.len());

    let mut first: HashMap<String, (u32, String)> = HashMap::new();
    let mut last: HashMap<String, (u32, String)> = HashMap::new();
    let mut line_stops: HashMap<String, HashSet<String>> = HashMap::new();
    for_each_row(archive, "stop_times.txt", |row: StopTimeRow| {
        let Some(line) = trip_line.get(&row.trip_id) else {
            return;
        };
        line_stops.entry(line.clone()).or_default().insert(row.stop_id);

        if let Some(seconds) = parse_gtfs_time(&row.departure_time) {
            let time = row.departure_time.trim().to_string();
            let earliest = first.entry(line.clone()).or_insert((seconds, time.clone()));
            if seconds < earliest.0 {
                *earliest = (seconds, time.clone());
            }
            let latest = last.entry(line.clone()).or_insert((seconds, time.clone()));
            if seconds > latest.0 {
                *latest = (seconds, time);
            }
        }
    })?;

    let wanted_stops: HashSet<&String> = line_stops.values().flatten().collect();
    let mut stop_names: HashMap<String, String> = HashMap::new();
    for_each_row(archive, "stops.txt", |row: StopRow| {
        if wanted_stops.contains(&row.stop_id) {
            stop_names.insert(row.stop_id, row.stop_name.trim().to_string());
        }
    })?;

    let summaries = lines
        .iter()
        .map(|line| {
            let mut route_ids: Vec<String> = route_line
                .iter()
                .filter(|(_, l)| *l == line)
                .map(|(id, _)| id.clone())
                .collect();
            route_ids.sort();

            let stops: BTreeSet<String> = line_stops
                .get(line)
                .map(|ids| ids.iter().filter_map(|id| stop_names.get(id).cloned()).collect())
                .unwrap_or_default();

            LineSchedule {
                line: line.clone(),
                route_ids,
                trips: trip_line.values().filter(|l| *l == line).count(),
                first_departure: first.get(line).map(|(_, t)| t.clone()),
                last_departure: last.get(line).map(|(_, t)| t.clone()),
                stops: stops.into_iter().collect(),
            }
        })
        .collect();

    Ok(ScheduleSummary {
        generated_at: Utc::now(),
        week_start,
        week_end,
        lines: summaries,
    })
}

pub fn download_archive(fetcher: &HttpFetcher, url: &str) -> Result<ZipArchive<std::io::Cursor<bytes::Bytes>>> {
    log::info!("🚦 Downloading GTFS archive...");
    let zip_bytes = fetcher.get_bytes(url)?;
    log::info!("✓ Downloaded {} KB, extracting...", zip_bytes.len() / 1024);

    ZipArchive::new(std::io::Cursor::new(zip_bytes))
        .map_err(|e| DashboardError::ParseError(format!("Failed to open GTFS zip: {}", e)))
}

pub fn open_archive(path: &Path) -> Result<ZipArchive<fs::File>> {
    let file = fs::File::open(path)
        .map_err(|e| DashboardError::FileError(format!("Failed to open {:?}: {}", path, e)))?;
    ZipArchive::new(file).map_err(|e| DashboardError::ParseError(format!("Failed to open GTFS zip: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn archive(files: &[(&str, &str)]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        let cursor = writer.finish().unwrap();
        ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap()
    }

    fn sample() -> ZipArchive<Cursor<Vec<u8>>> {
        archive(&[
            ("routes.txt", "route_id,agency_id,route_short_name,route_long_name,route_type\nIDFM:C01742,IDFM:71,A,RER A,2\nIDFM:C01106,IDFM:55,77,,3\nIDFM:C00001,IDFM:55,91,,3\n"),
            ("calendar.txt", "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\nWEEK,1,1,1,1,1,0,0,20261001,20261231\nOLD,1,1,1,1,1,1,1,20250101,20250201\n"),
            ("calendar_dates.txt", "service_id,date,exception_type\nEXTRA,20261017,1\nGONE,20261017,2\n"),
            ("trips.txt", "route_id,service_id,trip_id,trip_headsign,direction_id\nIDFM:C01742,WEEK,T1,Boissy,0\nIDFM:C01742,OLD,T2,Boissy,0\nIDFM:C01106,EXTRA,T3,Gare de Lyon,1\nIDFM:C00001,WEEK,T4,Ailleurs,0\n"),
            ("stop_times.txt", "trip_id,arrival_time,departure_time,stop_id,stop_sequence\nT1,05:02:00,05:03:00,S1,1\nT1,24:41:00,24:42:00,S2,2\nT2,04:00:00,04:00:00,S3,1\nT3,06:10:00,06:10:00,S4,1\nT3,,,S1,2\nT4,03:00:00,03:00:00,S5,1\n"),
            ("stops.txt", "stop_id,stop_code,stop_name,stop_lat,stop_lon\nS1,,Joinville-le-Pont,48.82,2.46\nS2,,Boissy-Saint-Léger,48.75,2.51\nS3,,Nation,48.84,2.39\nS4,,Hippodrome de Vincennes,48.83,2.44\nS5,,Ailleurs,48.0,2.0\n"),
        ])
    }

    #[test]
    fn summary_keeps_configured_lines_for_this_week() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let mut zip = sample();
        let summary = summarize(&mut zip, &["A".to_string(), "77".to_string()], today).unwrap();

        assert_eq!(summary.week_start, NaiveDate::from_ymd_opt(2026, 10, 12).unwrap());
        assert_eq!(summary.week_end, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(summary.lines.len(), 2);

        let rer = summary.line("a").unwrap();
        assert_eq!(rer.route_ids, vec!["IDFM:C01742".to_string()]);
        assert_eq!(rer.trips, 1);
        assert_eq!(rer.first_departure.as_deref(), Some("05:03:00"));
        // past-midnight service sorts after the evening
        assert_eq!(rer.last_departure.as_deref(), Some("24:42:00"));
        assert_eq!(rer.stops, vec!["Boissy-Saint-Léger".to_string(), "Joinville-le-Pont".to_string()]);

        let bus = summary.line("77").unwrap();
        assert_eq!(bus.trips, 1);
        assert_eq!(bus.first_departure.as_deref(), Some("06:10:00"));
        assert_eq!(bus.last_departure.as_deref(), Some("06:10:00"));
        assert_eq!(bus.stops, vec!["Hippodrome de Vincennes".to_string(), "Joinville-le-Pont".to_string()]);
    }

    #[test]
    fn missing_tables_give_empty_lines() {
        let mut zip = archive(&[("routes.txt", "route_id,route_short_name\nR,A\n")]);
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let summary = summarize(&mut zip, &["A".to_string()], today).unwrap();

        assert_eq!(summary.lines[0].trips, 0);
        assert!(summary.lines[0].first_departure.is_none());
        assert!(summary.lines[0].stops.is_empty());
    }

    #[test]
    fn gtfs_time_allows_hours_past_midnight() {
        assert_eq!(parse_gtfs_time("25:30:00"), Some(91800));
        assert_eq!(parse_gtfs_time(" 05:03:00"), Some(18180));
        assert_eq!(parse_gtfs_time(""), None);
        assert_eq!(parse_gtfs_time("5:03"), None);
    }

    #[test]
    fn week_bounds_on_sunday() {
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let (start, end) = week_bounds(sunday);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 10, 12).unwrap());
        assert_eq!(end, sunday);
    }

    #[test]
    fn summary_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public").join("gtfs-info.json");
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let summary = summarize(&mut sample(), &["A".to_string()], today).unwrap();

        summary.save(&path).unwrap();
        assert_eq!(ScheduleSummary::load(&path).unwrap(), summary);
        assert!(matches!(
            ScheduleSummary::load(&dir.path().join("nope.json")),
            Err(DashboardError::FileError(_))
        ));
    }
}
