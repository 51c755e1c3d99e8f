// src/scans.rs
//! Scan recording.
//!
//! A token moves `Pending -> Done` on its first scan and never back. Every
//! scan, first or repeated, appends a scan event.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ApiError, ApiResult};
use crate::models::{ScanPreview, ScanReceipt, TokenStatus, UnitScanLogEntry};
use crate::repositories::TrackingRepository;

lazy_static! {
    static ref SCAN_CODE_RE: Regex = Regex::new(r"^[A-Za-z0-9-]{1,64}$").unwrap();
}

/// Trims scanner noise (trailing CR/LF from keyboard wedges) and checks the charset.
pub fn normalize_code(raw: &str) -> ApiResult<&str> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(ApiError::bad_request("Scan code is required"));
    }
    if !SCAN_CODE_RE.is_match(code) {
        return Err(ApiError::bad_request("Scan code may only contain letters, digits and '-'"));
    }
    Ok(code)
}

/// Looks a code up without touching any state.
pub async fn preview_scan(repo: &dyn TrackingRepository, raw_code: &str) -> ApiResult<ScanPreview> {
    let code = normalize_code(raw_code)?;
    let token = repo
        .find_token_by_code(code)
        .await?
        .ok_or_else(|| ApiError::scan_code_not_found(code))?;

    Ok(ScanPreview {
        status: TokenStatus::from_flag(token.completed),
        scan_code: token.scan_code,
        unit_code: token.unit_code,
        process: token.process,
        completed: token.completed,
    })
}

pub async fn commit_scan(
    repo: &dyn TrackingRepository,
    raw_code: &str,
    worker_id: &str,
) -> ApiResult<ScanReceipt> {
    let code = normalize_code(raw_code)?;

    let worker = repo
        .find_worker(worker_id)
        .await?
        .ok_or_else(ApiError::unknown_worker)?;

    let token = repo
        .find_token_by_code(code)
        .await?
        .ok_or_else(|| ApiError::scan_code_not_found(code))?;

    let recorded = repo.record_scan(&token.id, &worker.id, Utc::now()).await?;
    let status = TokenStatus::from_flag(token.completed).on_scan();

    if recorded.first_completion {
        log::info!("{} {} completed by {}", token.unit_code, token.process, worker.name);
    } else {
        log::debug!("{} {} re-scanned by {}", token.unit_code, token.process, worker.name);
    }

    Ok(ScanReceipt {
        scan_code: token.scan_code,
        unit_code: token.unit_code,
        process: token.process,
        completed: status.is_done(),
        first_completion: recorded.first_completion,
        worker: recorded.worker_name,
        scanned_at: recorded.event.scanned_at,
    })
}

/// Every scan of one unit, oldest first.
pub async fn unit_scan_log(repo: &dyn TrackingRepository, unit_code: &str) -> ApiResult<Vec<UnitScanLogEntry>> {
    let unit_code = unit_code.trim();
    if unit_code.is_empty() {
        return Err(ApiError::bad_request("unit_code is required"));
    }

    let unit = repo
        .find_unit_by_code(unit_code)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(unit_code))?;

    let rows = repo.scans_for_unit(&unit.id).await?;
    Ok(rows.into_iter().map(UnitScanLogEntry::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::Code128Renderer;
    use crate::db::testing;
    use crate::models::Process;
    use crate::repositories::SqliteRepository;
    use crate::tokens;
    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    async fn setup() -> (SqliteRepository, SqlitePool, String, String) {
        let pool = testing::memory_pool().await;
        let repo = SqliteRepository::new(pool.clone());
        let worker = testing::insert_user(&pool, 7, "Ana", "OPT").await;
        repo.create_production("Batch-A", 1, "P").await.unwrap();
        let tokens = tokens::generate_for_unit_code(
            &repo,
            &Code128Renderer::default(),
            "P0001-001",
            &[Process::Inv],
            NaiveDate::from_ymd_opt(2024, 10, 18).unwrap(),
        )
        .await
        .unwrap();
        let code = tokens[0].scan_code.clone();
        (repo, pool, worker, code)
    }

    async fn event_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_events")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  P0001-001-INV-1810\r\n").unwrap(), "P0001-001-INV-1810");
        assert!(normalize_code("").is_err());
        assert!(normalize_code("P0001 001").is_err());
        assert!(normalize_code("x'; DROP TABLE").is_err());
        assert!(normalize_code(&"A".repeat(65)).is_err());
    }

    #[actix_rt::test]
    async fn test_preview_does_not_mutate() {
        let (repo, pool, _, code) = setup().await;

        let preview = preview_scan(&repo, &code).await.unwrap();
        assert_eq!(preview.unit_code, "P0001-001");
        assert_eq!(preview.process, "INV");
        assert!(!preview.completed);
        assert_eq!(event_count(&pool).await, 0);
    }

    #[actix_rt::test]
    async fn test_double_scan_keeps_flag_and_logs_twice() {
        let (repo, pool, worker, code) = setup().await;

        let first = commit_scan(&repo, &code, &worker).await.unwrap();
        assert!(first.completed);
        assert!(first.first_completion);
        assert_eq!(first.worker, "Ana");

        let second = commit_scan(&repo, &code, &worker).await.unwrap();
        assert!(second.completed);
        assert!(!second.first_completion);

        assert_eq!(event_count(&pool).await, 2);
        assert_eq!(preview_scan(&repo, &code).await.unwrap().status, TokenStatus::Done);
    }

    #[actix_rt::test]
    async fn test_concurrent_commits_are_both_recorded() {
        let (repo, pool, worker, code) = setup().await;

        let (a, b) = tokio::join!(
            commit_scan(&repo, &code, &worker),
            commit_scan(&repo, &code, &worker),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.completed && b.completed);
        // Exactly one of them flipped the flag
        assert!(a.first_completion ^ b.first_completion);
        assert_eq!(event_count(&pool).await, 2);
    }

    #[actix_rt::test]
    async fn test_unknown_code_and_worker() {
        let (repo, pool, worker, code) = setup().await;

        let err = commit_scan(&repo, "P0001-001-QC-1810", &worker).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(preview_scan(&repo, "NOPE").await.unwrap_err().is_not_found());

        let err = commit_scan(&repo, &code, "ghost").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(event_count(&pool).await, 0);
    }

    #[actix_rt::test]
    async fn test_unit_scan_log() {
        let (repo, _, worker, code) = setup().await;
        commit_scan(&repo, &code, &worker).await.unwrap();
        commit_scan(&repo, &code, &worker).await.unwrap();

        let log = unit_scan_log(&repo, "P0001-001").await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].scanned_at <= log[1].scanned_at);
        assert_eq!(log[0].worker, "Ana");
        assert_eq!(log[0].role, "OPT");
        assert_eq!(log[0].status, TokenStatus::Done);

        tokio_test::assert_err!(unit_scan_log(&repo, "P0001-999").await);
    }
}
