use crate::error::{LinkHubError, Result};
use crate::jobs::{self, TransitionUpdate};
use crate::types::{IngestRequest, JobMessage, JobStatus, JobType, ProcessingJob, VideoSubmission};
use crate::{subscription, users, AppState};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use chrono::{DateTime, Utc};

pub const MAX_CAPTION_CHARS: usize = 4000;

pub fn validate_submission(video: &VideoSubmission) -> Result<()> {
    if video.video_id.trim().is_empty() {
        return Err(LinkHubError::BadRequest("video_id is required".to_string()));
    }
    let url = video.video_url.trim();
    let has_host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .map(|rest| !rest.is_empty())
        .unwrap_or(false);
    if !has_host {
        return Err(LinkHubError::BadRequest(
            "video_url must be an http(s) URL".to_string(),
        ));
    }
    if video.caption.chars().count() > MAX_CAPTION_CHARS {
        return Err(LinkHubError::BadRequest(format!(
            "caption must be at most {} characters",
            MAX_CAPTION_CHARS
        )));
    }
    if let Some(bad) = video
        .detections
        .iter()
        .find(|d| !(0.0..=1.0).contains(&d.confidence))
    {
        return Err(LinkHubError::BadRequest(format!(
            "detection confidence for {} must be between 0 and 1",
            bad.class_name
        )));
    }
    Ok(())
}

/// Destination for job messages.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, message: &JobMessage) -> Result<()>;
}

/// Conditional status changes on stored jobs.
#[async_trait]
pub trait JobTransitions: Send + Sync {
    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<ProcessingJob>;
}

pub struct SqsJobQueue<'a> {
    client: &'a SqsClient,
    queue_url: &'a str,
}

impl<'a> SqsJobQueue<'a> {
    pub fn new(client: &'a SqsClient, queue_url: &'a str) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue<'_> {
    async fn send(&self, message: &JobMessage) -> Result<()> {
        self.client
            .send_message()
            .queue_url(self.queue_url)
            .message_body(serde_json::to_string(message)?)
            .message_attributes(
                "job_type",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(message.job_type.as_str())
                    .build()?,
            )
            .send()
            .await?;
        Ok(())
    }
}

pub struct DynamoJobTransitions<'a> {
    client: &'a DynamoClient,
    table_name: &'a str,
}

impl<'a> DynamoJobTransitions<'a> {
    pub fn new(client: &'a DynamoClient, table_name: &'a str) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl JobTransitions for DynamoJobTransitions<'_> {
    async fn transition(
        &self,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
        update: TransitionUpdate,
    ) -> Result<ProcessingJob> {
        jobs::transition(self.client, self.table_name, job_id, from, to, update).await
    }
}

fn message_for(job: &ProcessingJob) -> JobMessage {
    JobMessage {
        job_id: job.job_id.clone(),
        job_type: job.job_type,
        user_id: job.user_id.clone(),
        video: job.input.clone(),
    }
}

/// Send a pending job's message. When the send fails the job is moved to
/// failed, so it stays visible to admin retry instead of sitting in pending
/// with nothing on the queue.
async fn queue_or_fail(
    jobs: &dyn JobTransitions,
    queue: &dyn JobQueue,
    job: &ProcessingJob,
) -> Result<()> {
    let Err(e) = queue.send(&message_for(job)).await else {
        return Ok(());
    };

    tracing::error!("Failed to queue job {}: {}", job.job_id, e);
    let update = TransitionUpdate {
        error: Some("Failed to queue job for processing".to_string()),
        ..Default::default()
    };
    if let Err(mark_err) = jobs
        .transition(&job.job_id, JobStatus::Pending, JobStatus::Failed, update)
        .await
    {
        tracing::error!("Failed to mark job {} failed: {}", job.job_id, mark_err);
    }
    Err(e)
}

/// Accept a video for processing on behalf of `user_id`.
///
/// The job is stored before it is queued so the worker can always find it.
pub async fn ingest(
    state: &AppState,
    user_id: &str,
    req: IngestRequest,
    now: DateTime<Utc>,
) -> Result<ProcessingJob> {
    validate_submission(&req.video)?;
    let queue_url = state.config.require_queue_url()?;

    let user = users::get_user(&state.dynamo_client, state.table(), user_id).await?;
    subscription::enforce(&state.dynamo_client, state.table(), user, now).await?;

    let job_type = req.job_type.unwrap_or(JobType::FullProcessing);
    let job = jobs::new_job(user_id, job_type, req.video, now);
    jobs::create_job(&state.dynamo_client, state.table(), &job).await?;

    queue_or_fail(
        &DynamoJobTransitions::new(&state.dynamo_client, state.table()),
        &SqsJobQueue::new(&state.sqs_client, queue_url),
        &job,
    )
    .await?;
    tracing::info!("Queued job {} for video {}", job.job_id, job.video_id);
    Ok(job)
}

/// Admin retry: put a failed job back on the queue.
pub async fn retry_failed(state: &AppState, job_id: &str) -> Result<ProcessingJob> {
    let queue_url = state.config.require_queue_url()?;
    let job = jobs::get_job(&state.dynamo_client, state.table(), job_id).await?;
    requeue(
        &DynamoJobTransitions::new(&state.dynamo_client, state.table()),
        &SqsJobQueue::new(&state.sqs_client, queue_url),
        &job.job_id,
    )
    .await
}

async fn requeue(
    jobs: &dyn JobTransitions,
    queue: &dyn JobQueue,
    job_id: &str,
) -> Result<ProcessingJob> {
    let job = jobs
        .transition(
            job_id,
            JobStatus::Failed,
            JobStatus::Pending,
            TransitionUpdate::default(),
        )
        .await?;
    queue_or_fail(jobs, queue, &job).await?;
    tracing::info!("Requeued failed job {}", job.job_id);
    Ok(job)
}
