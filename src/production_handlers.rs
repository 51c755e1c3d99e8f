// src/production_handlers.rs - Productions, units and token generation

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::auth::require_permission;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{CreateProductionRequest, ProductionWithUnits, UnitWithTokens};
use crate::tokens;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateTokensRequest {
    #[validate(length(min = 1, max = 64, message = "unit_code is required"))]
    pub unit_code: String,
    pub pipeline: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkGenerateTokensRequest {
    #[validate(length(min = 1, max = 999, message = "unit_ids must contain 1-999 ids"))]
    pub unit_ids: Vec<String>,
    pub pipeline: Option<String>,
}

// ==================== PRODUCTIONS ====================

pub async fn create_production(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateProductionRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, |role| role.can_manage_productions())?;
    body.validate()?;

    let created = app_state
        .repo
        .create_production(body.name.trim(), body.quantity, &app_state.config.tracking.unit_code_prefix)
        .await?;

    log::info!(
        "{} declared production #{} '{}' with {} units",
        claims.name,
        created.production.number,
        created.production.name,
        created.units.len()
    );

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        created,
        "Production created successfully".to_string(),
    )))
}

pub async fn get_productions(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let productions = app_state.repo.list_productions().await?;

    let mut result = Vec::with_capacity(productions.len());
    for production in productions {
        let units = app_state.repo.units_of_production(&production.id).await?;
        result.push(ProductionWithUnits { production, units });
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn delete_production(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, |role| role.can_manage_productions())?;
    let production_id = path.into_inner();

    app_state.repo.delete_production(&production_id).await?;
    log::warn!("{} deleted production {} and all its tracking data", claims.name, production_id);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Production deleted successfully".to_string(),
    )))
}

pub async fn get_production_units(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let production_id = path.into_inner();
    let production = app_state
        .repo
        .find_production(&production_id)
        .await?
        .ok_or_else(|| ApiError::production_not_found(&production_id))?;

    let units = app_state.repo.units_of_production(&production.id).await?;
    let mut result = Vec::with_capacity(units.len());
    for unit in units {
        let tokens = app_state.repo.tokens_for_unit(&unit.id).await?;
        result.push(UnitWithTokens {
            unit,
            production_name: Some(production.name.clone()),
            tokens,
        });
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

// ==================== UNITS AND TOKENS ====================

pub async fn get_units_with_tokens(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let units = app_state.repo.units_with_tokens().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(units)))
}

pub async fn get_unit_tokens(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let unit_id = path.into_inner();
    let unit = app_state
        .repo
        .find_unit(&unit_id)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(&unit_id))?;

    let tokens = app_state.repo.tokens_for_unit(&unit.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(tokens)))
}

pub async fn generate_tokens(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<GenerateTokensRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, |role| role.can_manage_productions())?;
    body.validate()?;

    let pipeline = tokens::resolve_pipeline(&app_state.config.tracking, body.pipeline.as_deref())?;
    let today = app_state.calendar.local_date(chrono::Utc::now());

    let tokens = tokens::generate_for_unit_code(
        app_state.repo.as_ref(),
        app_state.renderer.as_ref(),
        &body.unit_code,
        pipeline,
        today,
    ).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(tokens)))
}

pub async fn generate_tokens_bulk(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<BulkGenerateTokensRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, |role| role.can_manage_productions())?;

    // An empty list is a bad request, not a validation failure
    if body.unit_ids.is_empty() {
        return Err(ApiError::bad_request("unit_ids must contain at least one unit id"));
    }
    body.validate()?;

    let pipeline = tokens::resolve_pipeline(&app_state.config.tracking, body.pipeline.as_deref())?;
    let today = app_state.calendar.local_date(chrono::Utc::now());

    let tokens = tokens::generate_for_units(
        app_state.repo.as_ref(),
        app_state.renderer.as_ref(),
        &body.unit_ids,
        pipeline,
        today,
    ).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(tokens)))
}
