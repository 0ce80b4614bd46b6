use common::AssetJob;
use engine::{Engine, JobReport, PromotionOutcome};
use mq::BroccoliError;
use tracing::{error, info, warn};

/// Run one queued asset job.
///
/// Configuration errors (bad directives, unknown derivative keys) are logged
/// and acknowledged since redelivery can't fix them. Everything else goes back
/// to the broker for another attempt.
pub async fn handle_asset_job(engine: &Engine, job: AssetJob) -> Result<(), BroccoliError> {
    match engine.jobs().perform(&job).await {
        Ok(report) => {
            log_report(&job, &report);
            Ok(())
        }
        Err(e) if e.is_configuration() => {
            error!(
                job_id = %job.job_id,
                asset_id = %job.asset_id,
                error = %e,
                "Dropping misconfigured asset job"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                job_id = %job.job_id,
                asset_id = %job.asset_id,
                operation = job.operation.name(),
                error = %e,
                "Asset job failed"
            );
            Err(BroccoliError::Job(e.to_string()))
        }
    }
}

fn log_report(job: &AssetJob, report: &JobReport) {
    match report {
        JobReport::Promotion(PromotionOutcome::Aborted(reason)) => {
            warn!(job_id = %job.job_id, %reason, "Promotion aborted");
        }
        JobReport::Promotion(outcome) => {
            info!(job_id = %job.job_id, state = %outcome.state(), "Promotion handled");
        }
        JobReport::Derivatives(report) => {
            info!(
                job_id = %job.job_id,
                attached = ?report.attached_keys(),
                skipped = ?report.skipped,
                aborted = ?report.aborted,
                "Derivatives handled"
            );
        }
        JobReport::FilesDeleted(count) => {
            info!(job_id = %job.job_id, count, "Files deleted");
        }
    }
}
