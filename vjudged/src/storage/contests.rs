use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use vjudge_api::contest::ContestInfo;

use super::{ContestStore, PgStore};

#[async_trait]
impl ContestStore for PgStore {
    async fn upsert_contest(&self, oj_name: &str, info: &ContestInfo) -> anyhow::Result<()> {
        let (start, end) = contest_window(oj_name, info);
        let problem_list = serde_json::to_string(&info.problem_refs(oj_name))?;
        sqlx::query(
            "INSERT INTO contests
                 (oj_name, site, contest_id, title, public, status,
                  start_time, end_time, problem_list)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (oj_name)
             DO UPDATE SET
               site = EXCLUDED.site,
               contest_id = EXCLUDED.contest_id,
               title = EXCLUDED.title,
               public = EXCLUDED.public,
               status = EXCLUDED.status,
               start_time = EXCLUDED.start_time,
               end_time = EXCLUDED.end_time,
               problem_list = EXCLUDED.problem_list",
        )
        .bind(oj_name)
        .bind(&info.site)
        .bind(&info.contest_id)
        .bind(&info.title)
        .bind(info.public)
        .bind(info.status.as_str())
        .bind(start)
        .bind(end)
        .bind(problem_list)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// Rows must satisfy start ≤ end; a parse that violates it is clamped.
fn contest_window(oj_name: &str, info: &ContestInfo) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = to_datetime(info.start_time);
    let mut end = to_datetime(info.end_time);
    if !info.has_valid_window() {
        warn!("contest {oj_name} reports end before start, clamping");
        end = start;
    }
    (start, end)
}

fn to_datetime(unix: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(unix, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
