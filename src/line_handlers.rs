// src/line_handlers.rs - Line throughput and weekly completion, plain and streamed

use actix_web::{web, HttpResponse};
use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::lines;
use crate::reports::{self, MonthQuery};
use crate::stream::{sse_response, subscribe};
use crate::AppState;

/// Requested month, or the current month in the deployment zone.
fn selected_month(app_state: &AppState, query: &MonthQuery) -> ApiResult<(i32, u32)> {
    match query.month.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(month) => reports::parse_month(month),
        None => {
            let today = app_state.calendar.local_date(Utc::now());
            Ok((today.year(), today.month()))
        }
    }
}

pub async fn get_line_summary(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let window = app_state.calendar.current();
    let snapshot = lines::line_summary(app_state.repo.as_ref(), &app_state.lines, window).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(snapshot)))
}

pub async fn stream_line_summary(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let state = app_state.get_ref().clone();
    let period = Duration::from_secs(state.config.tracking.summary_interval_secs);
    let guard = state.metrics.stream_guard();

    let subscription = subscribe("line-summary", period, Some(guard), move || {
        let state = state.clone();
        async move {
            // Window is recomputed per tick so the stream rolls over at day start
            let window = state.calendar.current();
            lines::line_summary(state.repo.as_ref(), &state.lines, window).await
        }
    });

    Ok(sse_response(subscription))
}

pub async fn get_line_log(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let window = app_state.calendar.current();
    let snapshot = lines::units_by_line_today(app_state.repo.as_ref(), &app_state.lines, window).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(snapshot)))
}

pub async fn stream_line_log(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let state = app_state.get_ref().clone();
    let period = Duration::from_secs(state.config.tracking.log_interval_secs);
    let guard = state.metrics.stream_guard();

    let subscription = subscribe("line-log", period, Some(guard), move || {
        let state = state.clone();
        async move {
            let window = state.calendar.current();
            lines::units_by_line_today(state.repo.as_ref(), &state.lines, window).await
        }
    });

    Ok(sse_response(subscription))
}

pub async fn get_chart_months(app_state: web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    let months = reports::chart_months(app_state.repo.as_ref(), app_state.calendar.timezone()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(months)))
}

pub async fn get_weekly_completion(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MonthQuery>,
) -> ApiResult<HttpResponse> {
    let (year, month) = selected_month(&app_state, &query)?;
    let chart = reports::weekly_completion(
        app_state.repo.as_ref(),
        year,
        month,
        app_state.calendar.timezone(),
    ).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(chart)))
}

pub async fn stream_weekly_completion(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MonthQuery>,
) -> ApiResult<HttpResponse> {
    let pinned = match query.month.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(month) => Some(reports::parse_month(month)?),
        None => None,
    };

    let state = app_state.get_ref().clone();
    let period = Duration::from_secs(state.config.tracking.summary_interval_secs);
    let guard = state.metrics.stream_guard();

    let subscription = subscribe("weekly-chart", period, Some(guard), move || {
        let state = state.clone();
        async move {
            // Without an explicit month, follow the calendar
            let (year, month) = match pinned {
                Some(selected) => selected,
                None => {
                    let today = state.calendar.local_date(Utc::now());
                    (today.year(), today.month())
                }
            };
            reports::weekly_completion(state.repo.as_ref(), year, month, state.calendar.timezone()).await
        }
    });

    Ok(sse_response(subscription))
}
