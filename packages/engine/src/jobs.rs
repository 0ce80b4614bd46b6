use common::{AssetJob, JobOperation};
use tracing::{info, instrument};

use crate::derivatives::DerivativeReport;
use crate::error::Result;
use crate::promotion::PromotionOutcome;
use crate::state::Engine;

#[derive(Debug)]
pub enum JobReport {
    Promotion(PromotionOutcome),
    Derivatives(DerivativeReport),
    FilesDeleted(usize),
}

/// Resumes queued operations in whatever process picks them up.
///
/// Jobs may arrive twice or out of order; each operation re-reads the asset
/// and relies on the fingerprint guard rather than on the state it had when
/// the job was enqueued.
pub struct JobRunner<'a> {
    engine: &'a Engine,
}

impl<'a> JobRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    #[instrument(
        skip_all,
        fields(
            job_id = %job.job_id,
            operation = job.operation.name(),
            asset_id = %job.asset_id
        )
    )]
    pub async fn perform(&self, job: &AssetJob) -> Result<JobReport> {
        let carried = job.directives()?;
        let directives = self.engine.defaults.resolve(&carried);

        let report = match &job.operation {
            JobOperation::Promote => JobReport::Promotion(
                self.engine
                    .promotion()
                    .promote(job.asset_id, &directives)
                    .await?,
            ),
            JobOperation::CreateDerivatives { selection } => JobReport::Derivatives(
                self.engine
                    .derivatives()
                    .run(job.asset_id, selection)
                    .await?,
            ),
            JobOperation::DeleteFiles { files } => {
                JobReport::FilesDeleted(self.engine.delete_files(files).await?)
            }
        };

        info!("Asset job finished");
        Ok(report)
    }
}
