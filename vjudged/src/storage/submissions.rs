use async_trait::async_trait;
use sqlx::Row;

use vjudge_api::verdict;

use super::{PgStore, SubmissionRow, SubmissionStore};

#[async_trait]
impl SubmissionStore for PgStore {
    async fn find_submission(&self, id: i64) -> anyhow::Result<Option<SubmissionRow>> {
        let row = sqlx::query(
            "SELECT id, user_id, oj_name, problem_id, language, source_code,
                    run_id, verdict, exe_time, exe_mem
               FROM submissions
              WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SubmissionRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            oj_name: row.try_get("oj_name")?,
            problem_id: row.try_get("problem_id")?,
            language: row.try_get("language")?,
            source_code: row.try_get("source_code")?,
            run_id: row.try_get("run_id")?,
            verdict: row.try_get("verdict")?,
            exe_time: row.try_get("exe_time")?,
            exe_mem: row.try_get("exe_mem")?,
        }))
    }

    async fn mark_submitted(&self, id: i64, run_id: &str, bot_user: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE submissions
                SET run_id = $2, user_id = $3, verdict = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(run_id)
        .bind(bot_user)
        .bind(verdict::BEING_JUDGED)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn set_verdict(&self, id: i64, verdict: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE submissions SET verdict = $2 WHERE id = $1")
            .bind(id)
            .bind(verdict)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn record_result(
        &self,
        id: i64,
        verdict: &str,
        exe_time: Option<i64>,
        exe_mem: Option<i64>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE submissions
                SET verdict = $2, exe_time = $3, exe_mem = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(verdict)
        .bind(exe_time)
        .bind(exe_mem)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn unfinished_ids(&self) -> anyhow::Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM submissions
              WHERE verdict = $1 OR verdict = $2
              ORDER BY id ASC",
        )
        .bind(verdict::QUEUING)
        .bind(verdict::BEING_JUDGED)
        .fetch_all(self.pool())
        .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("id")?);
        }
        Ok(ids)
    }
}
