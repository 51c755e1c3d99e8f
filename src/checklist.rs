// src/checklist.rs
//! QC checklist per unit.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::error::{ApiError, ApiResult};
use crate::models::{Checklist, ChecklistOutcome, ChecklistSummary, UnitChecklistView};
use crate::repositories::TrackingRepository;

/// Field names a checklist may carry, in display order.
#[derive(Debug, Clone)]
pub struct ChecklistSchema {
    fields: Vec<String>,
}

impl ChecklistSchema {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn validate_updates(&self, updates: &BTreeMap<String, bool>) -> ApiResult<()> {
        if updates.is_empty() {
            return Err(ApiError::bad_request("At least one checklist field is required"));
        }
        for field in updates.keys() {
            if !self.fields.contains(field) {
                return Err(ApiError::unknown_checklist_field(field, &self.fields));
            }
        }
        Ok(())
    }

    /// Share of schema fields set to true, rounded to a whole percent.
    /// Fields missing from `values` count as false.
    pub fn completion_percent(&self, values: &BTreeMap<String, bool>) -> u8 {
        if self.fields.is_empty() {
            return 0;
        }
        let done = self
            .fields
            .iter()
            .filter(|f| values.get(*f).copied().unwrap_or(false))
            .count();
        ((done as f64 / self.fields.len() as f64) * 100.0).round() as u8
    }

    pub fn is_complete(&self, values: &BTreeMap<String, bool>) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|f| values.get(f).copied().unwrap_or(false))
    }

    pub fn summarize(&self, checklist: Option<&Checklist>) -> ChecklistSummary {
        let mut fields: BTreeMap<String, bool> =
            self.fields.iter().map(|f| (f.clone(), false)).collect();
        if let Some(checklist) = checklist {
            for (name, value) in &checklist.fields {
                if let Some(slot) = fields.get_mut(name) {
                    *slot = *value;
                }
            }
        }

        ChecklistSummary {
            completion_percent: self.completion_percent(&fields),
            qc_complete: self.is_complete(&fields),
            fields,
        }
    }
}

pub async fn apply_checklist(
    repo: &dyn TrackingRepository,
    schema: &ChecklistSchema,
    unit_id: &str,
    user_id: &str,
    updates: &BTreeMap<String, bool>,
) -> ApiResult<ChecklistOutcome> {
    schema.validate_updates(updates)?;

    let unit = repo
        .find_unit(unit_id)
        .await?
        .ok_or_else(|| ApiError::unit_not_found(unit_id))?;
    repo.find_worker(user_id)
        .await?
        .ok_or_else(ApiError::unknown_worker)?;

    let (checklist, logs) = repo
        .apply_checklist(&unit.id, user_id, schema.fields(), updates, Utc::now())
        .await?;

    let summary = schema.summarize(Some(&checklist));
    log::info!(
        "Checklist for {} updated ({} fields, {}%)",
        unit.code,
        updates.len(),
        summary.completion_percent
    );

    // Only the entries touched by this call
    let logs = logs.into_iter().filter(|l| updates.contains_key(&l.field)).collect();

    Ok(ChecklistOutcome {
        checklist,
        logs,
        completion_percent: summary.completion_percent,
        qc_complete: summary.qc_complete,
    })
}

/// Units with tokens, their tokens and checklist state, newest first.
pub async fn list_checklist_units(
    repo: &dyn TrackingRepository,
    schema: &ChecklistSchema,
) -> ApiResult<Vec<UnitChecklistView>> {
    let units = repo.units_with_tokens().await?;
    let checklists: HashMap<String, Checklist> = repo
        .list_checklists()
        .await?
        .into_iter()
        .map(|c| (c.unit_id.clone(), c))
        .collect();

    Ok(units
        .into_iter()
        .map(|entry| UnitChecklistView {
            checklist: schema.summarize(checklists.get(&entry.unit.id)),
            unit: entry.unit,
            tokens: entry.tokens,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::repositories::SqliteRepository;

    fn schema() -> ChecklistSchema {
        ChecklistSchema::new(
            ["uji_input", "uji_output", "uji_ac", "uji_kabel", "labelling"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn updates(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_completion_percent() {
        let schema = schema();
        assert_eq!(schema.completion_percent(&BTreeMap::new()), 0);
        assert_eq!(schema.completion_percent(&updates(&[("uji_ac", true)])), 20);
        assert_eq!(
            schema.completion_percent(&updates(&[("uji_ac", true), ("labelling", true), ("uji_kabel", false)])),
            40
        );

        let three = ChecklistSchema::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(three.completion_percent(&updates(&[("a", true)])), 33);
        assert_eq!(three.completion_percent(&updates(&[("a", true), ("b", true)])), 67);
        assert!(!three.is_complete(&updates(&[("a", true), ("b", true)])));
        assert!(three.is_complete(&updates(&[("a", true), ("b", true), ("c", true)])));
    }

    #[test]
    fn test_percent_is_monotonic_while_setting_fields() {
        let schema = schema();
        let mut values = BTreeMap::new();
        let mut last = 0;
        for field in schema.fields().to_vec() {
            values.insert(field, true);
            let now = schema.completion_percent(&values);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_validate_updates() {
        let schema = schema();
        assert!(schema.validate_updates(&BTreeMap::new()).is_err());
        assert!(schema.validate_updates(&updates(&[("paint", true)])).is_err());
        assert!(schema.validate_updates(&updates(&[("uji_ac", false)])).is_ok());
    }

    #[actix_rt::test]
    async fn test_apply_checklist_merges_fields() {
        let pool = testing::memory_pool().await;
        let repo = SqliteRepository::new(pool.clone());
        let qc = testing::insert_user(&pool, 9, "Budi", "QC").await;
        let created = repo.create_production("Batch-A", 1, "P").await.unwrap();
        let unit_id = created.units[0].id.clone();
        let schema = schema();

        let first = apply_checklist(&repo, &schema, &unit_id, &qc, &updates(&[("uji_ac", true)]))
            .await
            .unwrap();
        assert_eq!(first.completion_percent, 20);
        assert_eq!(first.logs.len(), 1);
        assert_eq!(first.checklist.fields.len(), 5);

        let second = apply_checklist(
            &repo,
            &schema,
            &unit_id,
            &qc,
            &updates(&[("uji_input", true), ("uji_output", true), ("uji_kabel", true), ("labelling", true)]),
        )
        .await
        .unwrap();
        assert_eq!(second.checklist.id, first.checklist.id);
        assert_eq!(second.completion_percent, 100);
        assert!(second.qc_complete);
        assert_eq!(second.logs.len(), 4);

        // Unset keeps a single log row for the field
        let third = apply_checklist(&repo, &schema, &unit_id, &qc, &updates(&[("uji_ac", false)]))
            .await
            .unwrap();
        assert_eq!(third.completion_percent, 80);
        assert!(!third.qc_complete);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checklist_logs WHERE field = 'uji_ac'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[actix_rt::test]
    async fn test_apply_checklist_errors() {
        let pool = testing::memory_pool().await;
        let repo = SqliteRepository::new(pool.clone());
        let qc = testing::insert_user(&pool, 9, "Budi", "QC").await;
        let schema = schema();

        let err = apply_checklist(&repo, &schema, "missing", &qc, &updates(&[("uji_ac", true)]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let created = repo.create_production("Batch-A", 1, "P").await.unwrap();
        let err = apply_checklist(&repo, &schema, &created.units[0].id, &qc, &updates(&[("paint", true)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(repo.checklist_for_unit(&created.units[0].id).await.unwrap().is_none());
    }
}
