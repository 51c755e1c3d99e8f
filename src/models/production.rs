// src/models/production.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

use super::token::ProcessToken;

/// Units per production are numbered with three digits.
pub const MAX_UNITS_PER_PRODUCTION: u32 = 999;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Production {
    pub id: String,
    pub number: i64,
    pub name: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ProductionUnit {
    pub id: String,
    pub production_id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ProductionWithUnits {
    #[serde(flatten)]
    pub production: Production,
    pub units: Vec<ProductionUnit>,
}

#[derive(Debug, Serialize, Clone)]
pub struct UnitWithTokens {
    #[serde(flatten)]
    pub unit: ProductionUnit,
    pub production_name: Option<String>,
    pub tokens: Vec<ProcessToken>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateProductionRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: u32,
}

/// `{prefix}{number:04}-{seq:03}`, e.g. `P0001-002`.
pub fn unit_code(prefix: &str, production_number: i64, sequence: u32) -> String {
    format!("{}{:04}-{:03}", prefix, production_number, sequence)
}
