use chrono::SecondsFormat;
use log::info;
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use crate::job::{Job, JobStage};

/// Write every stage record of `job` not yet in the ledger, returning how many were new
///
/// Submitted stages carry the scheduler handle.
pub fn record_history(conn: &Connection, job: &Job) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO job_stage (job_id, seq, stage, handle, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut inserted = 0;
    for (seq, record) in job.history().iter().enumerate() {
        let handle = match record.stage.is_submitted() {
            true => job.external_handle(),
            false => None,
        };
        inserted += stmt.execute(params![
            job.job_id(),
            seq as i64,
            record.stage.as_str(),
            handle,
            record.at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ])?;
    }
    if inserted > 0 {
        info!("Recorded {} stage changes of job {}", inserted, job.job_id());
    }
    Ok(inserted)
}

/// Stages recorded for a job, oldest first
pub fn load_stages(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<JobStage>> {
    let mut stmt = conn.prepare("SELECT stage FROM job_stage WHERE job_id = ?1 ORDER BY recorded_at, seq")?;
    let rows = stmt.query_map([job_id], |row| row.get::<_, String>(0))?;

    let mut stages = Vec::new();
    for row in rows {
        let stage = row?
            .parse::<JobStage>()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, err.into()))?;
        stages.push(stage);
    }
    Ok(stages)
}
