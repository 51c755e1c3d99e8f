// src/db.rs - Schema setup for the tracking tables

use sqlx::SqlitePool;
use anyhow::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Workers and administrators. badge_code is the number printed on the badge.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            badge_code INTEGER NOT NULL UNIQUE CHECK(badge_code >= 0),
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            role TEXT NOT NULL DEFAULT 'OPT' CHECK(
                role IN ('ADMIN', 'OPT', 'QC', 'SCM')
            ),
            password_hash TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS productions (
            id TEXT PRIMARY KEY,
            number INTEGER NOT NULL UNIQUE CHECK(number > 0),
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            quantity INTEGER NOT NULL CHECK(quantity >= 1),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Monotonic sequences. Production numbers are drawn here so a deleted batch never frees its number.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL CHECK(value >= 0)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_units (
            id TEXT PRIMARY KEY,
            production_id TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (production_id) REFERENCES productions (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // One token per (unit, process); scan_code is printed on the label and must stay stable
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS process_tokens (
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            process TEXT NOT NULL CHECK(length(process) > 0),
            scan_code TEXT NOT NULL UNIQUE,
            barcode TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0 CHECK(completed IN (0, 1)),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES production_units (id) ON DELETE CASCADE,
            UNIQUE(unit_id, process)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Append-only. Rows are never updated.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_events (
            id TEXT PRIMARY KEY,
            token_id TEXT NOT NULL,
            worker_id TEXT NOT NULL,
            scanned_at DATETIME NOT NULL,
            FOREIGN KEY (token_id) REFERENCES process_tokens (id) ON DELETE CASCADE,
            FOREIGN KEY (worker_id) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checklists (
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL UNIQUE,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES production_units (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checklist_values (
            checklist_id TEXT NOT NULL,
            field TEXT NOT NULL CHECK(length(field) > 0),
            value INTEGER NOT NULL DEFAULT 0 CHECK(value IN (0, 1)),
            PRIMARY KEY (checklist_id, field),
            FOREIGN KEY (checklist_id) REFERENCES checklists (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Latest entry per (checklist, field), upserted on every change
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checklist_logs (
            id TEXT PRIMARY KEY,
            checklist_id TEXT NOT NULL,
            field TEXT NOT NULL,
            status INTEGER NOT NULL CHECK(status IN (0, 1)),
            user_id TEXT NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (checklist_id) REFERENCES checklists (id) ON DELETE CASCADE,
            FOREIGN KEY (user_id) REFERENCES users (id),
            UNIQUE(checklist_id, field)
        )
        "#,
    )
        .execute(pool)
        .await?;

    create_indexes(pool).await?;

    log::info!("Database migrations completed");
    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_units_production ON production_units(production_id)",
        "CREATE INDEX IF NOT EXISTS idx_tokens_unit ON process_tokens(unit_id)",
        "CREATE INDEX IF NOT EXISTS idx_scan_events_scanned_at ON scan_events(scanned_at)",
        "CREATE INDEX IF NOT EXISTS idx_scan_events_token ON scan_events(token_id)",
        "CREATE INDEX IF NOT EXISTS idx_checklist_logs_checklist ON checklist_logs(checklist_id)",
    ];

    for sql in indexes {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = testing::memory_pool().await;
        run_migrations(&pool).await.expect("second run");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "checklist_logs", "checklist_values", "checklists", "counters", "process_tokens",
            "production_units", "productions", "scan_events", "users",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }
}
