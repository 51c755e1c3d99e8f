// src/models/checklist.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::production::ProductionUnit;
use super::token::ProcessToken;

/// Quality checklist of one unit. Field names come from configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Checklist {
    pub id: String,
    pub unit_id: String,
    pub fields: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChecklistRow {
    pub id: String,
    pub unit_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChecklistValueRow {
    pub checklist_id: String,
    pub field: String,
    pub value: bool,
}

/// Latest state of one field. Keyed by (checklist, field); rewritten on every update.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ChecklistLogEntry {
    pub id: String,
    pub checklist_id: String,
    pub field: String,
    pub status: bool,
    pub user_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyChecklistRequest {
    #[validate(length(min = 1, message = "unit_id is required"))]
    pub unit_id: String,
    pub fields: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ChecklistOutcome {
    pub checklist: Checklist,
    pub logs: Vec<ChecklistLogEntry>,
    pub completion_percent: u8,
    pub qc_complete: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct ChecklistSummary {
    pub fields: BTreeMap<String, bool>,
    pub completion_percent: u8,
    pub qc_complete: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct UnitChecklistView {
    #[serde(flatten)]
    pub unit: ProductionUnit,
    pub tokens: Vec<ProcessToken>,
    pub checklist: ChecklistSummary,
}
