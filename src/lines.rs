// src/lines.rs
//! Line throughput for the current production day.
//!
//! A line is a named set of processes. A unit counts toward a line once every
//! one of those processes has at least one scan inside the window.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LineConfig;
use crate::error::ApiResult;
use crate::models::{Process, WindowScan};
use crate::repositories::TrackingRepository;
use crate::shift::ShiftWindow;

#[derive(Debug, Clone, PartialEq)]
pub struct LineDefinition {
    pub name: String,
    pub processes: Vec<Process>,
}

impl From<&LineConfig> for LineDefinition {
    fn from(line: &LineConfig) -> Self {
        Self { name: line.name.clone(), processes: line.processes.clone() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineSummary {
    pub units: usize,
    pub personnel: usize,
}

/// Latest in-window scan of one qualifying unit on the line's processes.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnitLogEntry {
    pub id: String,
    pub unit_id: String,
    pub unit_code: String,
    pub worker: String,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineSnapshot {
    pub window: ShiftWindow,
    pub lines: BTreeMap<String, LineSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineLogSnapshot {
    pub window: ShiftWindow,
    pub lines: BTreeMap<String, Vec<UnitLogEntry>>,
}

/// Scans of one unit, grouped by process.
#[derive(Default)]
struct UnitActivity<'a> {
    unit_code: &'a str,
    workers: HashMap<Process, HashSet<&'a str>>,
    latest: HashMap<Process, &'a WindowScan>,
}

fn newer(a: &WindowScan, b: &WindowScan) -> bool {
    (a.scanned_at, &a.event_id) > (b.scanned_at, &b.event_id)
}

impl<'a> UnitActivity<'a> {
    fn qualifies(&self, line: &LineDefinition) -> bool {
        line.processes.iter().all(|p| self.workers.contains_key(p))
    }

    /// Most recent scan among the line's own processes.
    fn latest_on(&self, line: &LineDefinition) -> Option<&'a WindowScan> {
        line.processes
            .iter()
            .filter_map(|p| self.latest.get(p).copied())
            .fold(None, |best, scan| match best {
                Some(current) if !newer(scan, current) => Some(current),
                _ => Some(scan),
            })
    }
}

fn group_by_unit(scans: &[WindowScan]) -> BTreeMap<&str, UnitActivity<'_>> {
    let mut units: BTreeMap<&str, UnitActivity<'_>> = BTreeMap::new();

    for scan in scans {
        let process = match Process::from_str(&scan.process) {
            Ok(process) => process,
            Err(_) => {
                log::warn!("Skipping scan {} with unknown process '{}'", scan.event_id, scan.process);
                continue;
            }
        };

        let activity = units.entry(scan.unit_id.as_str()).or_default();
        activity.unit_code = &scan.unit_code;
        activity.workers.entry(process).or_default().insert(scan.worker_id.as_str());

        let latest = activity.latest.entry(process).or_insert(scan);
        if newer(scan, latest) {
            *latest = scan;
        }
    }

    units
}

/// Units and distinct personnel per line. Every configured line is present.
pub fn summarize(lines: &[LineDefinition], scans: &[WindowScan]) -> BTreeMap<String, LineSummary> {
    let units = group_by_unit(scans);

    lines
        .iter()
        .map(|line| {
            let mut count = 0;
            let mut personnel: HashSet<&str> = HashSet::new();

            for activity in units.values().filter(|a| a.qualifies(line)) {
                count += 1;
                for process in &line.processes {
                    if let Some(workers) = activity.workers.get(process) {
                        personnel.extend(workers.iter().copied());
                    }
                }
            }

            (line.name.clone(), LineSummary { units: count, personnel: personnel.len() })
        })
        .collect()
}

/// Qualifying units per line with their most recent scan on that line, newest first.
pub fn units_by_line(lines: &[LineDefinition], scans: &[WindowScan]) -> BTreeMap<String, Vec<UnitLogEntry>> {
    let units = group_by_unit(scans);

    lines
        .iter()
        .map(|line| {
            let mut entries: Vec<UnitLogEntry> = units
                .iter()
                .filter(|(_, activity)| activity.qualifies(line))
                .filter_map(|(unit_id, activity)| {
                    activity.latest_on(line).map(|scan| UnitLogEntry {
                        id: scan.event_id.clone(),
                        unit_id: unit_id.to_string(),
                        unit_code: activity.unit_code.to_string(),
                        worker: scan.worker_name.clone().unwrap_or_else(|| "-".to_string()),
                        scanned_at: scan.scanned_at,
                    })
                })
                .collect();
            entries.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at).then_with(|| a.unit_code.cmp(&b.unit_code)));

            (line.name.clone(), entries)
        })
        .collect()
}

pub async fn line_summary(
    repo: &dyn TrackingRepository,
    lines: &[LineDefinition],
    window: ShiftWindow,
) -> ApiResult<LineSnapshot> {
    let scans = repo.scans_between(window.start, window.end).await?;
    Ok(LineSnapshot { window, lines: summarize(lines, &scans) })
}

pub async fn units_by_line_today(
    repo: &dyn TrackingRepository,
    lines: &[LineDefinition],
    window: ShiftWindow,
) -> ApiResult<LineLogSnapshot> {
    let scans = repo.scans_between(window.start, window.end).await?;
    Ok(LineLogSnapshot { window, lines: units_by_line(lines, &scans) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::Code128Renderer;
    use crate::db::testing;
    use crate::repositories::SqliteRepository;
    use crate::scans::commit_scan;
    use crate::shift::{parse_utc_offset, ShiftCalendar};
    use crate::tokens::generate_for_unit_code;
    use chrono::Duration;

    fn line(name: &str, processes: &[Process]) -> LineDefinition {
        LineDefinition { name: name.to_string(), processes: processes.to_vec() }
    }

    fn scan(event: &str, unit: &str, process: &str, worker: &str, minute: i64) -> WindowScan {
        let base = DateTime::parse_from_rfc3339("2024-10-18T00:00:00Z").unwrap().with_timezone(&Utc);
        WindowScan {
            event_id: event.to_string(),
            unit_id: unit.to_string(),
            unit_code: format!("code-{}", unit),
            process: process.to_string(),
            worker_id: worker.to_string(),
            worker_name: Some(format!("name-{}", worker)),
            scanned_at: base + Duration::minutes(minute),
        }
    }

    #[test]
    fn test_unit_needs_every_process() {
        let lines = vec![line("ASSY", &[Process::Inv, Process::Scc])];
        let scans = vec![scan("e1", "u1", "INV", "w1", 0)];
        assert_eq!(summarize(&lines, &scans)["ASSY"], LineSummary { units: 0, personnel: 0 });

        let scans = vec![scan("e1", "u1", "INV", "w1", 0), scan("e2", "u1", "SCC", "w2", 1)];
        assert_eq!(summarize(&lines, &scans)["ASSY"], LineSummary { units: 1, personnel: 2 });
    }

    #[test]
    fn test_personnel_is_union_over_qualifying_units() {
        let lines = vec![
            line("WIRING", &[Process::Wd, Process::Wb]),
            line("QC", &[Process::Qc]),
        ];
        let scans = vec![
            scan("e1", "u1", "WD", "w1", 0),
            scan("e2", "u1", "WB", "w1", 1),
            scan("e3", "u2", "WD", "w2", 2),
            scan("e4", "u2", "WB", "w3", 3),
            // u3 never finishes wiring, its worker must not count
            scan("e5", "u3", "WD", "w4", 4),
            // Scans of other processes do not add personnel
            scan("e6", "u1", "INV", "w5", 5),
            scan("e7", "u2", "QC", "w3", 6),
        ];

        let summary = summarize(&lines, &scans);
        assert_eq!(summary["WIRING"], LineSummary { units: 2, personnel: 3 });
        assert_eq!(summary["QC"], LineSummary { units: 1, personnel: 1 });
    }

    #[test]
    fn test_every_line_present_and_bad_rows_skipped() {
        let lines = vec![line("ASSY", &[Process::Inv]), line("PACK", &[Process::Pack])];
        let scans = vec![scan("e1", "u1", "PAINT", "w1", 0), scan("e2", "u1", "INV", "w1", 1)];

        let summary = summarize(&lines, &scans);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary["ASSY"].units, 1);
        assert_eq!(summary["PACK"], LineSummary::default());
    }

    #[test]
    fn test_repeat_scans_count_unit_once() {
        let lines = vec![line("QC", &[Process::Qc])];
        let scans = vec![
            scan("e1", "u1", "QC", "w1", 0),
            scan("e2", "u1", "QC", "w1", 1),
            scan("e3", "u1", "QC", "w2", 2),
        ];
        assert_eq!(summarize(&lines, &scans)["QC"], LineSummary { units: 1, personnel: 2 });
    }

    #[test]
    fn test_units_by_line_latest_scan_first() {
        let lines = vec![line("PACK", &[Process::Pack]), line("QC", &[Process::Qc])];
        let scans = vec![
            scan("e1", "u1", "PACK", "w1", 0),
            scan("e2", "u2", "PACK", "w2", 5),
            scan("e3", "u1", "PACK", "w3", 9),
        ];

        let listing = units_by_line(&lines, &scans);
        let pack = &listing["PACK"];
        assert_eq!(pack.len(), 2);
        assert_eq!(pack[0].id, "e3");
        assert_eq!(pack[0].unit_code, "code-u1");
        assert_eq!(pack[0].worker, "name-w3");
        assert_eq!(pack[1].id, "e2");
        assert!(listing["QC"].is_empty());
    }

    #[test]
    fn test_units_by_line_uses_each_lines_own_scan() {
        let lines = vec![line("QC", &[Process::Qc]), line("PACK", &[Process::Pack])];
        let scans = vec![
            scan("qc-event", "u1", "QC", "inspector", 0),
            scan("pack-event", "u1", "PACK", "packer", 5),
            scan("inv-event", "u1", "INV", "stocker", 9),
        ];

        let listing = units_by_line(&lines, &scans);
        assert_eq!(listing["QC"][0].id, "qc-event");
        assert_eq!(listing["QC"][0].worker, "name-inspector");
        assert_eq!(listing["PACK"][0].id, "pack-event");
        assert_eq!(listing["PACK"][0].worker, "name-packer");
    }

    #[actix_rt::test]
    async fn test_end_to_end_line_summary() {
        let pool = testing::memory_pool().await;
        let repo = SqliteRepository::new(pool.clone());
        let renderer = Code128Renderer::default();
        let worker = testing::insert_user(&pool, 7, "Ana", "OPT").await;
        let calendar = ShiftCalendar::new(parse_utc_offset("+07:00").unwrap(), 6);
        let lines = vec![line("ASSY", &[Process::Inv, Process::Scc])];

        let created = repo.create_production("Batch-A", 2, "P").await.unwrap();
        let codes: Vec<&str> = created.units.iter().map(|u| u.code.as_str()).collect();
        assert_eq!(codes, vec!["P0001-001", "P0001-002"]);

        let tokens = generate_for_unit_code(
            &repo,
            &renderer,
            "P0001-001",
            &[Process::Inv, Process::Scc],
            calendar.local_date(Utc::now()),
        )
        .await
        .unwrap();
        assert_eq!(tokens.len(), 2);
        let inv = tokens.iter().find(|t| t.scan_code.contains("INV")).unwrap();
        let scc = tokens.iter().find(|t| t.scan_code.contains("SCC")).unwrap();

        let receipt = commit_scan(&repo, &inv.scan_code, &worker).await.unwrap();
        assert!(receipt.completed);

        let snapshot = line_summary(&repo, &lines, calendar.current()).await.unwrap();
        assert_eq!(snapshot.lines["ASSY"], LineSummary { units: 0, personnel: 0 });

        commit_scan(&repo, &scc.scan_code, &worker).await.unwrap();
        let snapshot = line_summary(&repo, &lines, calendar.current()).await.unwrap();
        assert_eq!(snapshot.lines["ASSY"], LineSummary { units: 1, personnel: 1 });

        let listing = units_by_line_today(&repo, &lines, calendar.current()).await.unwrap();
        assert_eq!(listing.lines["ASSY"][0].unit_code, "P0001-001");
        assert_eq!(listing.lines["ASSY"][0].worker, "Ana");
    }

    #[actix_rt::test]
    async fn test_scans_outside_window_are_ignored() {
        let pool = testing::memory_pool().await;
        let repo = SqliteRepository::new(pool.clone());
        let worker = testing::insert_user(&pool, 7, "Ana", "OPT").await;
        let calendar = ShiftCalendar::new(parse_utc_offset("+07:00").unwrap(), 6);
        let lines = vec![line("QC", &[Process::Qc])];

        repo.create_production("Batch-A", 1, "P").await.unwrap();
        let tokens = generate_for_unit_code(
            &repo,
            &Code128Renderer::default(),
            "P0001-001",
            &[Process::Qc],
            calendar.local_date(Utc::now()),
        )
        .await
        .unwrap();
        commit_scan(&repo, &tokens[0].scan_code, &worker).await.unwrap();

        let yesterday = calendar.window_at(Utc::now() - Duration::hours(24));
        let snapshot = line_summary(&repo, &lines, yesterday).await.unwrap();
        assert_eq!(snapshot.lines["QC"].units, 0);
    }
}
