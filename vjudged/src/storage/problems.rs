use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::site::ProblemRecord;

use super::{PgStore, ProblemStore, UpsertOutcome};

/// Minimum age of a stored row before a new crawl may rewrite it.
pub const PROBLEM_UPDATE_COOLDOWN_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemRow {
    pub oj_name: String,
    pub problem_id: String,
    pub last_update: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub input: String,
    pub output: String,
    pub sample_input: String,
    pub sample_output: String,
    pub time_limit: Option<i64>,
    pub mem_limit: Option<i64>,
}

impl ProblemRow {
    fn empty(oj_name: &str, problem_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            oj_name: oj_name.to_string(),
            problem_id: problem_id.to_string(),
            last_update: now,
            title: String::new(),
            description: String::new(),
            input: String::new(),
            output: String::new(),
            sample_input: String::new(),
            sample_output: String::new(),
            time_limit: None,
            mem_limit: None,
        }
    }
}

/// The preservation rule: a crawl that returns an empty field never clears a
/// stored non-empty value. Races between two crawlers resolve to the last
/// writer.
pub fn merge_preserving(
    existing: Option<&ProblemRow>,
    oj_name: &str,
    problem_id: &str,
    record: &ProblemRecord,
    now: DateTime<Utc>,
) -> ProblemRow {
    let mut row = match existing {
        Some(prev) => prev.clone(),
        None => ProblemRow::empty(oj_name, problem_id, now),
    };
    overwrite_if_present(&mut row.title, &record.title);
    overwrite_if_present(&mut row.description, &record.description);
    overwrite_if_present(&mut row.input, &record.input);
    overwrite_if_present(&mut row.output, &record.output);
    overwrite_if_present(&mut row.sample_input, &record.sample_input);
    overwrite_if_present(&mut row.sample_output, &record.sample_output);
    if record.time_limit_ms.is_some() {
        row.time_limit = record.time_limit_ms;
    }
    if record.mem_limit_kb.is_some() {
        row.mem_limit = record.mem_limit_kb;
    }
    row.last_update = now;
    row
}

fn overwrite_if_present(stored: &mut String, crawled: &str) {
    if !crawled.is_empty() {
        *stored = crawled.to_string();
    }
}

#[async_trait]
impl ProblemStore for PgStore {
    async fn upsert_problem(
        &self,
        oj_name: &str,
        problem_id: &str,
        record: &ProblemRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UpsertOutcome> {
        let existing = fetch_problem(self, oj_name, problem_id).await?;
        if let Some(prev) = &existing {
            if (now - prev.last_update).num_seconds() < PROBLEM_UPDATE_COOLDOWN_SECS {
                return Ok(UpsertOutcome::Skipped);
            }
        }
        let merged = merge_preserving(existing.as_ref(), oj_name, problem_id, record, now);
        sqlx::query(
            "INSERT INTO problems
                 (oj_name, problem_id, last_update, title, description, input, output,
                  sample_input, sample_output, time_limit, mem_limit)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (oj_name, problem_id)
             DO UPDATE SET
               last_update = EXCLUDED.last_update,
               title = EXCLUDED.title,
               description = EXCLUDED.description,
               input = EXCLUDED.input,
               output = EXCLUDED.output,
               sample_input = EXCLUDED.sample_input,
               sample_output = EXCLUDED.sample_output,
               time_limit = EXCLUDED.time_limit,
               mem_limit = EXCLUDED.mem_limit",
        )
        .bind(&merged.oj_name)
        .bind(&merged.problem_id)
        .bind(merged.last_update)
        .bind(&merged.title)
        .bind(&merged.description)
        .bind(&merged.input)
        .bind(&merged.output)
        .bind(&merged.sample_input)
        .bind(&merged.sample_output)
        .bind(merged.time_limit)
        .bind(merged.mem_limit)
        .execute(self.pool())
        .await?;
        Ok(UpsertOutcome::Stored)
    }
}

async fn fetch_problem(
    store: &PgStore,
    oj_name: &str,
    problem_id: &str,
) -> anyhow::Result<Option<ProblemRow>> {
    let row = sqlx::query(
        "SELECT oj_name, problem_id, last_update, title, description, input, output,
                sample_input, sample_output, time_limit, mem_limit
           FROM problems
          WHERE oj_name = $1 AND problem_id = $2",
    )
    .bind(oj_name)
    .bind(problem_id)
    .fetch_optional(store.pool())
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(ProblemRow {
        oj_name: row.try_get("oj_name")?,
        problem_id: row.try_get("problem_id")?,
        last_update: row.try_get("last_update")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        input: row.try_get("input")?,
        output: row.try_get("output")?,
        sample_input: row.try_get("sample_input")?,
        sample_output: row.try_get("sample_output")?,
        time_limit: row.try_get("time_limit")?,
        mem_limit: row.try_get("mem_limit")?,
    }))
}
