// src/tokens.rs
//! Per-process token generation.
//!
//! Every unit gets one token per process of its pipeline. Generation is
//! idempotent: a process that already has a token keeps it, including its
//! printed scan code.

use std::collections::HashSet;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::barcode::BarcodeRenderer;
use crate::config::TrackingConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{NewProcessToken, Process, ProcessToken, ProductionUnit};
use crate::repositories::TrackingRepository;

/// `{unit_code}-{process}-{DDMM}`, e.g. `P0001-001-INV-1810`.
///
/// Unit codes are unique and process labels never contain `-`, so two
/// tokens can only share a code if they share unit, process and date.
pub fn scan_code(unit_code: &str, process: Process, date: NaiveDate) -> String {
    format!("{}-{}-{}", unit_code, process.code_label(), date.format("%d%m"))
}

pub fn resolve_pipeline<'a>(config: &'a TrackingConfig, name: Option<&str>) -> ApiResult<&'a [Process]> {
    config
        .pipeline(name)
        .ok_or_else(|| ApiError::unknown_pipeline(name.unwrap_or(config.default_pipeline.as_str())))
}

fn build_missing(
    unit: &ProductionUnit,
    existing: &[ProcessToken],
    pipeline: &[Process],
    renderer: &dyn BarcodeRenderer,
    date: NaiveDate,
) -> ApiResult<Vec<NewProcessToken>> {
    let present: HashSet<&str> = existing.iter().map(|t| t.process.as_str()).collect();

    pipeline
        .iter()
        .filter(|process| {
            let name: &str = process.as_ref();
            !present.contains(name)
        })
        .map(|&process| {
            let code = scan_code(&unit.code, process, date);
            Ok(NewProcessToken {
                id: Uuid::new_v4().to_string(),
                unit_id: unit.id.clone(),
                process,
                barcode: renderer.render(&code)?,
                scan_code: code,
            })
        })
        .collect()
}

/// Generates tokens for one unit addressed by its code and returns the
/// unit's full token set.
#[tracing::instrument(skip(repo, renderer, pipeline))]
pub async fn generate_for_unit_code(
    repo: &dyn TrackingRepository,
    renderer: &dyn BarcodeRenderer,
    unit_code: &str,
    pipeline: &[Process],
    date: NaiveDate,
) -> ApiResult<Vec<ProcessToken>> {
    let unit_code = unit_code.trim();
    if unit_code.is_empty() {
        return Err(ApiError::bad_request("unit_code is required"));
    }

    let unit = repo
        .find_unit_by_code(unit_code)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(unit_code))?;

    let existing = repo.tokens_for_unit(&unit.id).await?;
    let missing = build_missing(&unit, &existing, pipeline, renderer, date)?;
    if !missing.is_empty() {
        let inserted = repo.insert_tokens(&missing).await?;
        log::info!("Generated {} tokens for unit {}", inserted, unit.code);
    }

    repo.tokens_for_unit(&unit.id).await
}

/// Bulk variant over unit ids. Every id must exist; nothing is written otherwise.
#[tracing::instrument(skip(repo, renderer, pipeline, unit_ids), fields(units = unit_ids.len()))]
pub async fn generate_for_units(
    repo: &dyn TrackingRepository,
    renderer: &dyn BarcodeRenderer,
    unit_ids: &[String],
    pipeline: &[Process],
    date: NaiveDate,
) -> ApiResult<Vec<ProcessToken>> {
    let wanted: Vec<String> = {
        let mut seen = HashSet::new();
        unit_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect()
    };
    if wanted.is_empty() {
        return Err(ApiError::bad_request("unit_ids must contain at least one unit id"));
    }

    let units = repo.find_units(&wanted).await?;
    if units.len() != wanted.len() {
        let found: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
        let missing = wanted
            .iter()
            .find(|id| !found.contains(id.as_str()))
            .map(String::as_str)
            .unwrap_or_default();
        return Err(ApiError::unit_not_found(missing));
    }

    let mut batch = Vec::new();
    for unit in &units {
        let existing = repo.tokens_for_unit(&unit.id).await?;
        batch.extend(build_missing(unit, &existing, pipeline, renderer, date)?);
    }

    if !batch.is_empty() {
        let inserted = repo.insert_tokens(&batch).await?;
        log::info!("Generated {} tokens across {} units", inserted, units.len());
    }

    let mut all = Vec::new();
    for unit in &units {
        all.extend(repo.tokens_for_unit(&unit.id).await?);
    }
    Ok(all)
}
