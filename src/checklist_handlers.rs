// src/checklist_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use validator::Validate;

use crate::auth::require_permission;
use crate::checklist;
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::models::ApplyChecklistRequest;
use crate::AppState;

pub async fn get_checklist_units(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let units = checklist::list_checklist_units(app_state.repo.as_ref(), &app_state.checklist_schema).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(units)))
}

pub async fn apply_checklist(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<ApplyChecklistRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_permission(&http_request, |role| role.can_apply_checklist())?;
    body.validate()?;

    let outcome = checklist::apply_checklist(
        app_state.repo.as_ref(),
        &app_state.checklist_schema,
        body.unit_id.trim(),
        &claims.sub,
        &body.fields,
    ).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        outcome,
        "Checklist saved".to_string(),
    )))
}
