//! Job row operations.

use super::{Catalog, Job, JobStatus, Stage};
use crate::catalog::types::now_ms;
use crate::error::Result;
use rusqlite::{params, OptionalExtension, Row};

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(2)?;
    let current_stage: Option<String> = row.get(3)?;
    Ok(Job {
        job_id: row.get(0)?,
        video_id: row.get(1)?,
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Pending),
        current_stage: current_stage.as_deref().and_then(Stage::from_str),
        progress: row.get(4)?,
        message: row.get(5)?,
        error_code: row.get(6)?,
        error_message: row.get(7)?,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
    })
}

const JOB_COLUMNS: &str = "job_id, video_id, status, current_stage, progress, message, \
     error_code, error_message, created_at_ms, updated_at_ms";

impl Catalog {
    pub fn create_job(&self, job_id: &str, media_id: &str) -> Result<()> {
        let now = now_ms();
        self.retry_busy(|conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, video_id, status, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, 'PENDING', ?3, ?4)",
                params![job_id, media_id, now, now],
            )
        })?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
                [job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn set_job_stage(&self, job_id: &str, stage: Stage, progress: f64) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE jobs SET status = ?2, current_stage = ?2, progress = ?3,
                     updated_at_ms = ?4
                 WHERE job_id = ?1",
                params![job_id, stage.as_str(), progress, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn mark_job_done(&self, job_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'DONE', progress = 1.0, updated_at_ms = ?2
                 WHERE job_id = ?1",
                params![job_id, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn mark_job_failed(&self, job_id: &str, code: &str, message: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'FAILED', error_code = ?2, error_message = ?3,
                     updated_at_ms = ?4
                 WHERE job_id = ?1",
                params![job_id, code, message, now_ms()],
            )
        })?;
        Ok(())
    }

    pub fn mark_job_cancelled(&self, job_id: &str) -> Result<()> {
        self.retry_busy(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'CANCELLED', error_code = 'CANCELLED',
                     error_message = ?2, updated_at_ms = ?3
                 WHERE job_id = ?1",
                params![
                    job_id,
                    crate::error::ErrorCode::Cancelled.message(),
                    now_ms()
                ],
            )
        })?;
        Ok(())
    }

    /// Most recent jobs first. Failed history is retained; retry does not
    /// delete it.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at_ms DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map([limit as i64], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn latest_job_for_media(&self, media_id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE video_id = ?1
                     ORDER BY created_at_ms DESC LIMIT 1"
                ),
                [media_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::seed_media;
    use super::*;
    use crate::catalog::{Catalog, MediaType};

    #[test]
    fn test_job_lifecycle() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);

        catalog.create_job("j1", "m1").unwrap();
        let job = catalog.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        catalog
            .set_job_stage("j1", Stage::Embedding, 0.5)
            .unwrap();
        let job = catalog.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running(Stage::Embedding));
        assert_eq!(job.current_stage, Some(Stage::Embedding));

        catalog.mark_job_done("j1").unwrap();
        assert_eq!(catalog.get_job("j1").unwrap().unwrap().status, JobStatus::Done);
    }

    #[test]
    fn test_job_failed_fields() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);
        catalog.create_job("j1", "m1").unwrap();

        catalog
            .mark_job_failed("j1", "EMBEDDING_ERROR", "shard write failed")
            .unwrap();
        let job = catalog.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code.as_deref(), Some("EMBEDDING_ERROR"));
    }

    #[test]
    fn test_latest_job_for_media() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_media(&catalog, "m1", MediaType::Video);

        catalog.create_job("j1", "m1").unwrap();
        catalog.create_job("j2", "m1").unwrap();
        {
            // Force distinct created_at ordering.
            let conn = catalog.lock().unwrap();
            conn.execute("UPDATE jobs SET created_at_ms = 1 WHERE job_id = 'j1'", [])
                .unwrap();
            conn.execute("UPDATE jobs SET created_at_ms = 2 WHERE job_id = 'j2'", [])
                .unwrap();
        }

        let latest = catalog.latest_job_for_media("m1").unwrap().unwrap();
        assert_eq!(latest.job_id, "j2");
        assert_eq!(catalog.list_jobs(10).unwrap().len(), 2);
    }
}
