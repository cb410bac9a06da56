//! Progress reporting for jobs.

use motif_core::{Artifact, Job, JobReport, JobStatus};

/// Percentage of batches that reached a terminal success, 0.0 to 100.0.
/// Terminal statuses report their floor directly so a completed job never
/// shows 99.9 from rounding.
pub fn progress_percent(job: &Job) -> f64 {
    match job.status {
        JobStatus::Completed => 100.0,
        JobStatus::Failed | JobStatus::Cancelled if job.completed_batches == 0 => 0.0,
        _ => {
            if job.total_batches == 0 {
                0.0
            } else {
                (job.completed_batches as f64 / job.total_batches as f64) * 100.0
            }
        }
    }
}

/// Human-readable status line for a job.
pub fn status_message(job: &Job) -> String {
    match job.status {
        JobStatus::Pending => "queued, waiting for admission".to_string(),
        JobStatus::Validating => "validating document and selectors".to_string(),
        JobStatus::Processing => format!(
            "processing: {}/{} batches complete, {} failed",
            job.completed_batches, job.total_batches, job.failed_batches
        ),
        JobStatus::Paused => format!(
            "paused at {}/{} batches",
            job.completed_batches, job.total_batches
        ),
        JobStatus::Completed => format!("completed: {} batches", job.total_batches),
        JobStatus::Failed => {
            if job.completed_batches > 0 {
                format!(
                    "completed with failures: {} of {} batches failed",
                    job.failed_batches, job.total_batches
                )
            } else {
                "failed".to_string()
            }
        }
        JobStatus::Cancelled => "cancelled".to_string(),
    }
}

/// Assemble the status report returned by the engine's job-status call.
pub fn build_report(job: &Job, artifacts: Vec<Artifact>) -> JobReport {
    JobReport {
        job_id: job.id,
        status: job.status,
        progress: progress_percent(job),
        message: status_message(job),
        total_batches: job.total_batches,
        completed_batches: job.completed_batches,
        failed_batches: job.failed_batches,
        artifacts,
        error_summary: job.error_summary.clone(),
    }
}
