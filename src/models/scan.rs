// src/models/scan.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::token::TokenStatus;

/// Append-only record of a token being scanned.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ScanEvent {
    pub id: String,
    pub token_id: String,
    pub worker_id: String,
    pub scanned_at: DateTime<Utc>,
}

/// Outcome of the atomic flag-flip plus event append.
#[derive(Debug, Clone)]
pub struct RecordedScan {
    pub event: ScanEvent,
    /// True only for the scan that moved the token from pending to done.
    pub first_completion: bool,
    pub worker_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScanRequest {
    #[validate(length(min = 1, max = 64, message = "Code must be between 1 and 64 characters"))]
    pub code: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ScanPreview {
    pub scan_code: String,
    pub unit_code: String,
    pub process: String,
    pub completed: bool,
    pub status: TokenStatus,
}

#[derive(Debug, Serialize, Clone)]
pub struct ScanReceipt {
    pub scan_code: String,
    pub unit_code: String,
    pub process: String,
    pub completed: bool,
    pub first_completion: bool,
    pub worker: String,
    pub scanned_at: DateTime<Utc>,
}

/// Scan event joined to its token, unit and worker. Input of the line aggregator.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct WindowScan {
    pub event_id: String,
    pub unit_id: String,
    pub unit_code: String,
    pub process: String,
    pub worker_id: String,
    pub worker_name: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// One row of a unit's scan history.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct UnitScanRow {
    pub id: String,
    pub scan_code: String,
    pub process: String,
    pub completed: bool,
    pub worker_name: Option<String>,
    pub worker_role: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
pub struct UnitScanLogEntry {
    pub id: String,
    pub scan_code: String,
    pub process: String,
    pub status: TokenStatus,
    pub worker: String,
    pub role: String,
    pub scanned_at: DateTime<Utc>,
}

impl From<UnitScanRow> for UnitScanLogEntry {
    fn from(row: UnitScanRow) -> Self {
        Self {
            id: row.id,
            scan_code: row.scan_code,
            process: row.process,
            status: TokenStatus::from_flag(row.completed),
            worker: row.worker_name.unwrap_or_else(|| "-".to_string()),
            role: row.worker_role.unwrap_or_else(|| "-".to_string()),
            scanned_at: row.scanned_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnitLogQuery {
    pub unit_code: Option<String>,
}
