// src/scan_handlers.rs - Scan preview/commit and per-unit scan history

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::auth::require_permission;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{ScanRequest, UnitLogQuery};
use crate::scans;
use crate::stream::{sse_response, subscribe};
use crate::AppState;

pub async fn preview_scan(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<ScanRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let preview = scans::preview_scan(app_state.repo.as_ref(), &body.code).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(preview)))
}

pub async fn commit_scan(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<ScanRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, |role| role.can_scan())?;
    body.validate()?;

    let receipt = scans::commit_scan(app_state.repo.as_ref(), &body.code, &claims.sub).await?;
    app_state.metrics.increment_scans();

    let message = if receipt.first_completion {
        format!("{} {} completed", receipt.unit_code, receipt.process)
    } else {
        format!("{} {} already completed, scan logged", receipt.unit_code, receipt.process)
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(receipt, message)))
}

fn required_unit_code(query: &UnitLogQuery) -> ApiResult<String> {
    query
        .unit_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("unit_code query parameter is required"))
}

pub async fn get_unit_scan_log(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<UnitLogQuery>,
) -> ApiResult<HttpResponse> {
    let unit_code = required_unit_code(&query)?;
    let log = scans::unit_scan_log(app_state.repo.as_ref(), &unit_code).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(log)))
}

pub async fn stream_unit_scan_log(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<UnitLogQuery>,
) -> ApiResult<HttpResponse> {
    let unit_code = required_unit_code(&query)?;

    // Fail fast on an unknown unit instead of streaming errors
    app_state
        .repo
        .find_unit_by_code(&unit_code)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(&unit_code))?;

    let state = app_state.get_ref().clone();
    let period = Duration::from_secs(state.config.tracking.log_interval_secs);
    let guard = state.metrics.stream_guard();

    let subscription = subscribe("unit-log", period, Some(guard), move || {
        let state = state.clone();
        let unit_code = unit_code.clone();
        async move { scans::unit_scan_log(state.repo.as_ref(), &unit_code).await }
    });

    Ok(sse_response(subscription))
}
