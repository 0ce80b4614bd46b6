use std::sync::Arc;

use async_trait::async_trait;
use common::job::{AssetJob, JobQueue};
use common::mq::{Message, MqError};
use tracing::debug;

use crate::models::MqQueue;

/// [`JobQueue`] backed by a broccoli queue topic.
#[derive(Clone)]
pub struct BroccoliJobQueue {
    mq: Arc<MqQueue>,
    queue_name: String,
}

impl BroccoliJobQueue {
    pub fn new(mq: Arc<MqQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            mq,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl JobQueue for BroccoliJobQueue {
    async fn enqueue(&self, job: AssetJob) -> Result<(), MqError> {
        debug!(
            message_type = AssetJob::message_type(),
            job_id = %job.message_id(),
            operation = job.operation.name(),
            asset_id = %job.asset_id,
            queue = %self.queue_name,
            "Publishing asset job"
        );

        self.mq
            .publish(&self.queue_name, None, &job, None)
            .await
            .map_err(|e| MqError::Publish(e.to_string()))?;
        Ok(())
    }
}
