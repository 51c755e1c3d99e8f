// src/reports.rs
//! Weekly completion chart.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::TokenProgress;
use crate::repositories::TrackingRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekCount {
    pub week: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyCompletion {
    pub month: String,
    pub month_name: String,
    pub data: Vec<WeekCount>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub month: Option<String>,
}

/// Week of month with weeks starting on Sunday; the week holding the 1st is week 1.
pub fn week_of_month(date: NaiveDate) -> u32 {
    let first = date.with_day(1).unwrap_or(date);
    (date.day() - 1 + first.weekday().num_days_from_sunday()) / 7 + 1
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

pub fn weeks_in_month(year: i32, month: u32) -> u32 {
    last_day_of_month(year, month).map(week_of_month).unwrap_or(0)
}

/// Parses `YYYY-MM`.
pub fn parse_month(value: &str) -> ApiResult<(i32, u32)> {
    let invalid = || ApiError::bad_request("month must look like YYYY-MM");
    let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
        return Err(invalid());
    }
    Ok((year, month))
}

/// Counts fully processed units per week of the given month.
///
/// A unit is fully processed when all of its tokens are completed; it is
/// dated by the latest token update, read in the deployment zone.
pub fn completion_by_week<Tz: TimeZone>(
    progress: &[TokenProgress],
    year: i32,
    month: u32,
    tz: &Tz,
) -> WeeklyCompletion {
    let mut units: HashMap<&str, (bool, DateTime<Utc>)> = HashMap::new();
    for token in progress {
        let entry = units
            .entry(token.unit_id.as_str())
            .or_insert((true, token.updated_at));
        entry.0 &= token.completed;
        if token.updated_at > entry.1 {
            entry.1 = token.updated_at;
        }
    }

    let weeks = weeks_in_month(year, month);
    let mut data: Vec<WeekCount> = (1..=weeks).map(|week| WeekCount { week, count: 0 }).collect();

    for (done, finished_at) in units.values() {
        if !done {
            continue;
        }
        let local = finished_at.with_timezone(tz).date_naive();
        if local.year() != year || local.month() != month {
            continue;
        }
        let week = week_of_month(local) as usize;
        if let Some(slot) = data.get_mut(week - 1) {
            slot.count += 1;
        }
    }

    let month_name = NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.format("%B").to_string())
        .unwrap_or_default();

    WeeklyCompletion {
        month: format!("{:04}-{:02}", year, month),
        month_name,
        data,
    }
}

/// The twelve `YYYY-MM` months of the year of the newest unit, or of the
/// current year when there are no units yet.
pub fn months_of_year<Tz: TimeZone>(latest: Option<DateTime<Utc>>, now: DateTime<Utc>, tz: &Tz) -> Vec<String> {
    let year = latest.unwrap_or(now).with_timezone(tz).year();
    (1..=12).map(|month| format!("{:04}-{:02}", year, month)).collect()
}

pub async fn chart_months<Tz: TimeZone>(repo: &dyn TrackingRepository, tz: &Tz) -> ApiResult<Vec<String>> {
    let latest = repo.latest_unit_created_at().await?;
    Ok(months_of_year(latest, Utc::now(), tz))
}

pub async fn weekly_completion<Tz: TimeZone>(
    repo: &dyn TrackingRepository,
    year: i32,
    month: u32,
    tz: &Tz,
) -> ApiResult<WeeklyCompletion> {
    let progress = repo.token_progress().await?;
    Ok(completion_by_week(&progress, year, month, tz))
}
