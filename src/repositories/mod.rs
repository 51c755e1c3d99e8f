// src/repositories/mod.rs
//! Storage access for the tracking domain

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::*;

/// Acting user as seen by the scan and checklist flows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Everything the tracking services need from storage.
///
/// Each method that touches more than one row runs in a single transaction.
#[async_trait]
pub trait TrackingRepository: Send + Sync {
    // Productions and units
    async fn create_production(&self, name: &str, quantity: u32, unit_prefix: &str) -> ApiResult<ProductionWithUnits>;
    async fn list_productions(&self) -> ApiResult<Vec<Production>>;
    async fn find_production(&self, id: &str) -> ApiResult<Option<Production>>;
    async fn delete_production(&self, id: &str) -> ApiResult<()>;
    async fn units_of_production(&self, production_id: &str) -> ApiResult<Vec<ProductionUnit>>;
    async fn find_unit(&self, id: &str) -> ApiResult<Option<ProductionUnit>>;
    async fn find_unit_by_code(&self, code: &str) -> ApiResult<Option<ProductionUnit>>;
    async fn find_units(&self, ids: &[String]) -> ApiResult<Vec<ProductionUnit>>;
    /// Units with at least one token, newest first.
    async fn units_with_tokens(&self) -> ApiResult<Vec<UnitWithTokens>>;
    async fn latest_unit_created_at(&self) -> ApiResult<Option<DateTime<Utc>>>;

    // Tokens
    /// Inserts tokens; a (unit, process) pair that already has a token is left untouched.
    async fn insert_tokens(&self, tokens: &[NewProcessToken]) -> ApiResult<u64>;
    async fn tokens_for_unit(&self, unit_id: &str) -> ApiResult<Vec<ProcessToken>>;
    async fn find_token_by_code(&self, scan_code: &str) -> ApiResult<Option<TokenWithUnit>>;
    async fn token_progress(&self) -> ApiResult<Vec<TokenProgress>>;

    // Scans
    async fn record_scan(&self, token_id: &str, worker_id: &str, at: DateTime<Utc>) -> ApiResult<RecordedScan>;
    /// Events with `start <= scanned_at < end`.
    async fn scans_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<WindowScan>>;
    async fn scans_for_unit(&self, unit_id: &str) -> ApiResult<Vec<UnitScanRow>>;

    // Checklists
    async fn apply_checklist(
        &self,
        unit_id: &str,
        user_id: &str,
        schema_fields: &[String],
        updates: &BTreeMap<String, bool>,
        at: DateTime<Utc>,
    ) -> ApiResult<(Checklist, Vec<ChecklistLogEntry>)>;
    async fn checklist_for_unit(&self, unit_id: &str) -> ApiResult<Option<Checklist>>;
    async fn list_checklists(&self) -> ApiResult<Vec<Checklist>>;

    // Users
    async fn find_worker(&self, id: &str) -> ApiResult<Option<Worker>>;
}

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    async fn load_checklists(&self, rows: Vec<ChecklistRow>) -> ApiResult<Vec<Checklist>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT checklist_id, field, value FROM checklist_values WHERE checklist_id IN ({})",
            Self::placeholders(rows.len())
        );
        let mut query = sqlx::query_as::<_, ChecklistValueRow>(&sql);
        for row in &rows {
            query = query.bind(&row.id);
        }
        let values = query.fetch_all(&self.pool).await?;

        let mut by_checklist: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
        for value in values {
            by_checklist
                .entry(value.checklist_id)
                .or_default()
                .insert(value.field, value.value);
        }

        Ok(rows
            .into_iter()
            .map(|row| Checklist {
                fields: by_checklist.remove(&row.id).unwrap_or_default(),
                id: row.id,
                unit_id: row.unit_id,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }
}

#[async_trait]
impl TrackingRepository for SqliteRepository {
    async fn create_production(&self, name: &str, quantity: u32, unit_prefix: &str) -> ApiResult<ProductionWithUnits> {
        let now = Utc::now();
        let production_id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;

        // Seeded from existing rows the first time, only ever incremented afterwards
        let number: i64 = sqlx::query_scalar(
            r#"INSERT INTO counters (name, value)
               VALUES ('production', (SELECT COALESCE(MAX(number), 0) + 1 FROM productions))
               ON CONFLICT(name) DO UPDATE SET value = value + 1
               RETURNING value"#,
        )
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO productions (id, number, name, quantity, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
            .bind(&production_id)
            .bind(number)
            .bind(name)
            .bind(quantity as i64)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::from_unique_violation(e, "Production number"))?;

        let production: Production = sqlx::query_as("SELECT * FROM productions WHERE id = ?")
            .bind(&production_id)
            .fetch_one(&mut *tx)
            .await?;

        let mut units = Vec::with_capacity(quantity as usize);
        for seq in 1..=quantity {
            let unit = ProductionUnit {
                id: Uuid::new_v4().to_string(),
                production_id: production_id.clone(),
                code: unit_code(unit_prefix, production.number, seq),
                created_at: now,
                updated_at: now,
            };

            sqlx::query(
                "INSERT INTO production_units (id, production_id, code, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
                .bind(&unit.id)
                .bind(&unit.production_id)
                .bind(&unit.code)
                .bind(unit.created_at)
                .bind(unit.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| ApiError::from_unique_violation(e, "Unit code"))?;

            units.push(unit);
        }

        tx.commit().await?;

        Ok(ProductionWithUnits { production, units })
    }

    async fn list_productions(&self) -> ApiResult<Vec<Production>> {
        let productions = sqlx::query_as("SELECT * FROM productions ORDER BY number DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(productions)
    }

    async fn find_production(&self, id: &str) -> ApiResult<Option<Production>> {
        let production = sqlx::query_as("SELECT * FROM productions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(production)
    }

    async fn delete_production(&self, id: &str) -> ApiResult<()> {
        // Units, tokens, scan events and checklists go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM productions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::production_not_found(id));
        }
        Ok(())
    }

    async fn units_of_production(&self, production_id: &str) -> ApiResult<Vec<ProductionUnit>> {
        let units = sqlx::query_as(
            "SELECT * FROM production_units WHERE production_id = ? ORDER BY code ASC",
        )
            .bind(production_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(units)
    }

    async fn find_unit(&self, id: &str) -> ApiResult<Option<ProductionUnit>> {
        let unit = sqlx::query_as("SELECT * FROM production_units WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(unit)
    }

    async fn find_unit_by_code(&self, code: &str) -> ApiResult<Option<ProductionUnit>> {
        let unit = sqlx::query_as("SELECT * FROM production_units WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(unit)
    }

    async fn find_units(&self, ids: &[String]) -> ApiResult<Vec<ProductionUnit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT * FROM production_units WHERE id IN ({}) ORDER BY code ASC",
            Self::placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, ProductionUnit>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn units_with_tokens(&self) -> ApiResult<Vec<UnitWithTokens>> {
        #[derive(sqlx::FromRow)]
        struct UnitRow {
            id: String,
            production_id: String,
            code: String,
            created_at: DateTime<Utc>,
            updated_at: DateTime<Utc>,
            production_name: Option<String>,
        }

        let rows: Vec<UnitRow> = sqlx::query_as(
            r#"SELECT u.id, u.production_id, u.code, u.created_at, u.updated_at,
                      p.name AS production_name
               FROM production_units u
               LEFT JOIN productions p ON p.id = u.production_id
               WHERE EXISTS (SELECT 1 FROM process_tokens t WHERE t.unit_id = u.id)
               ORDER BY u.created_at DESC, u.code DESC"#,
        )
            .fetch_all(&self.pool)
            .await?;

        let tokens: Vec<ProcessToken> = sqlx::query_as(
            "SELECT * FROM process_tokens ORDER BY created_at ASC, rowid ASC",
        )
            .fetch_all(&self.pool)
            .await?;

        let mut by_unit: BTreeMap<String, Vec<ProcessToken>> = BTreeMap::new();
        for token in tokens {
            by_unit.entry(token.unit_id.clone()).or_default().push(token);
        }

        Ok(rows
            .into_iter()
            .map(|row| UnitWithTokens {
                tokens: by_unit.remove(&row.id).unwrap_or_default(),
                unit: ProductionUnit {
                    id: row.id,
                    production_id: row.production_id,
                    code: row.code,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                },
                production_name: row.production_name,
            })
            .collect())
    }

    async fn latest_unit_created_at(&self) -> ApiResult<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar("SELECT created_at FROM production_units ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(latest)
    }

    async fn insert_tokens(&self, tokens: &[NewProcessToken]) -> ApiResult<u64> {
        let now = Utc::now();
        let mut inserted = 0;

        let mut tx = self.pool.begin().await?;
        for token in tokens {
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO process_tokens
                   (id, unit_id, process, scan_code, barcode, completed, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, 0, ?, ?)"#,
            )
                .bind(&token.id)
                .bind(&token.unit_id)
                .bind(token.process.as_ref())
                .bind(&token.scan_code)
                .bind(&token.barcode)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn tokens_for_unit(&self, unit_id: &str) -> ApiResult<Vec<ProcessToken>> {
        let tokens = sqlx::query_as(
            "SELECT * FROM process_tokens WHERE unit_id = ? ORDER BY created_at ASC, rowid ASC",
        )
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tokens)
    }

    async fn find_token_by_code(&self, scan_code: &str) -> ApiResult<Option<TokenWithUnit>> {
        let token = sqlx::query_as(
            r#"SELECT t.id, t.unit_id, u.code AS unit_code, t.process, t.scan_code, t.completed
               FROM process_tokens t
               JOIN production_units u ON u.id = t.unit_id
               WHERE t.scan_code = ?"#,
        )
            .bind(scan_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(token)
    }

    async fn token_progress(&self) -> ApiResult<Vec<TokenProgress>> {
        let progress = sqlx::query_as("SELECT unit_id, completed, updated_at FROM process_tokens")
            .fetch_all(&self.pool)
            .await?;
        Ok(progress)
    }

    async fn record_scan(&self, token_id: &str, worker_id: &str, at: DateTime<Utc>) -> ApiResult<RecordedScan> {
        let mut tx = self.pool.begin().await?;

        // Only a pending token is touched, so updated_at keeps the first completion time
        let flipped = sqlx::query(
            "UPDATE process_tokens SET completed = 1, updated_at = ? WHERE id = ? AND completed = 0",
        )
            .bind(at)
            .bind(token_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let event = ScanEvent {
            id: Uuid::new_v4().to_string(),
            token_id: token_id.to_string(),
            worker_id: worker_id.to_string(),
            scanned_at: at,
        };

        sqlx::query("INSERT INTO scan_events (id, token_id, worker_id, scanned_at) VALUES (?, ?, ?, ?)")
            .bind(&event.id)
            .bind(&event.token_id)
            .bind(&event.worker_id)
            .bind(event.scanned_at)
            .execute(&mut *tx)
            .await?;

        let worker_name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE id = ?")
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(RecordedScan {
            event,
            first_completion: flipped == 1,
            worker_name: worker_name.unwrap_or_else(|| "-".to_string()),
        })
    }

    async fn scans_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<Vec<WindowScan>> {
        let scans = sqlx::query_as(
            r#"SELECT e.id AS event_id, t.unit_id, u.code AS unit_code, t.process,
                      e.worker_id, w.name AS worker_name, e.scanned_at
               FROM scan_events e
               JOIN process_tokens t ON t.id = e.token_id
               JOIN production_units u ON u.id = t.unit_id
               LEFT JOIN users w ON w.id = e.worker_id
               WHERE e.scanned_at >= ? AND e.scanned_at < ?
               ORDER BY e.scanned_at ASC"#,
        )
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(scans)
    }

    async fn scans_for_unit(&self, unit_id: &str) -> ApiResult<Vec<UnitScanRow>> {
        let rows = sqlx::query_as(
            r#"SELECT e.id, t.scan_code, t.process, t.completed,
                      w.name AS worker_name, w.role AS worker_role, e.scanned_at
               FROM scan_events e
               JOIN process_tokens t ON t.id = e.token_id
               LEFT JOIN users w ON w.id = e.worker_id
               WHERE t.unit_id = ?
               ORDER BY e.scanned_at ASC, e.rowid ASC"#,
        )
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn apply_checklist(
        &self,
        unit_id: &str,
        user_id: &str,
        schema_fields: &[String],
        updates: &BTreeMap<String, bool>,
        at: DateTime<Utc>,
    ) -> ApiResult<(Checklist, Vec<ChecklistLogEntry>)> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO checklists (id, unit_id, created_at, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(unit_id) DO UPDATE SET updated_at = excluded.updated_at"#,
        )
            .bind(Uuid::new_v4().to_string())
            .bind(unit_id)
            .bind(at)
            .bind(at)
            .execute(&mut *tx)
            .await?;

        let row: ChecklistRow = sqlx::query_as("SELECT * FROM checklists WHERE unit_id = ?")
            .bind(unit_id)
            .fetch_one(&mut *tx)
            .await?;

        // Every schema field exists, unset ones stay false
        for field in schema_fields {
            sqlx::query("INSERT OR IGNORE INTO checklist_values (checklist_id, field, value) VALUES (?, ?, 0)")
                .bind(&row.id)
                .bind(field)
                .execute(&mut *tx)
                .await?;
        }

        for (field, value) in updates {
            sqlx::query(
                r#"INSERT INTO checklist_values (checklist_id, field, value) VALUES (?, ?, ?)
                   ON CONFLICT(checklist_id, field) DO UPDATE SET value = excluded.value"#,
            )
                .bind(&row.id)
                .bind(field)
                .bind(*value)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"INSERT INTO checklist_logs (id, checklist_id, field, status, user_id, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT(checklist_id, field) DO UPDATE SET
                       status = excluded.status,
                       user_id = excluded.user_id,
                       updated_at = excluded.updated_at"#,
            )
                .bind(Uuid::new_v4().to_string())
                .bind(&row.id)
                .bind(field)
                .bind(*value)
                .bind(user_id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
        }

        let values: Vec<ChecklistValueRow> = sqlx::query_as(
            "SELECT checklist_id, field, value FROM checklist_values WHERE checklist_id = ?",
        )
            .bind(&row.id)
            .fetch_all(&mut *tx)
            .await?;

        let logs: Vec<ChecklistLogEntry> = sqlx::query_as(
            "SELECT * FROM checklist_logs WHERE checklist_id = ? ORDER BY field ASC",
        )
            .bind(&row.id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let checklist = Checklist {
            id: row.id,
            unit_id: row.unit_id,
            fields: values.into_iter().map(|v| (v.field, v.value)).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        Ok((checklist, logs))
    }

    async fn checklist_for_unit(&self, unit_id: &str) -> ApiResult<Option<Checklist>> {
        let row: Option<ChecklistRow> = sqlx::query_as("SELECT * FROM checklists WHERE unit_id = ?")
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.load_checklists(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn list_checklists(&self) -> ApiResult<Vec<Checklist>> {
        let rows: Vec<ChecklistRow> = sqlx::query_as("SELECT * FROM checklists ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        self.load_checklists(rows).await
    }

    async fn find_worker(&self, id: &str) -> ApiResult<Option<Worker>> {
        let worker = sqlx::query_as("SELECT id, name, role FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(worker)
    }
}
