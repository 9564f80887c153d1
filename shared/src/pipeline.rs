//! SQS-driven processing pipeline: caption analysis, tagging, thumbnails and
//! product extraction for a queued job.

use crate::caption::{self, CaptionAnalysis};
use crate::error::{LinkHubError, Result};
use crate::jobs::{self, TransitionUpdate};
use crate::tagging::{self, TaggingOptions, TaggingResult};
use crate::thumbnails::{self, ThumbnailResult};
use crate::types::{JobMessage, JobStatus, JobType, ProcessingJob};
use crate::{notify, products, users, AppState};
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEvent, SqsMessage};
use chrono::Utc;
use serde_json::Value;

/// What happened to one queue record.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Completed,
    /// Nothing to do: the job is finished, cancelled or gone.
    Skipped(String),
    /// The message can never be processed; do not retry it.
    Dropped(String),
    /// Failed, SQS should redeliver.
    Retry(String),
    /// Failed for the last time; SQS moves it to the dead-letter queue.
    Failed(String),
}

impl Outcome {
    pub fn reports_failure(&self) -> bool {
        matches!(self, Outcome::Retry(_) | Outcome::Failed(_))
    }
}

pub fn receive_count(message: &SqsMessage) -> u32 {
    message
        .attributes
        .get("ApproximateReceiveCount")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

pub fn parse_message(body: Option<&str>) -> Result<JobMessage> {
    let body = body.ok_or_else(|| LinkHubError::BadRequest("message has no body".to_string()))?;
    Ok(serde_json::from_str(body)?)
}

/// Failed and finished jobs are never picked up again from the queue; admin
/// retry is the only way back for a failed job.
fn skips_delivery(status: JobStatus) -> bool {
    status.is_terminal() || status == JobStatus::Failed
}

/// Status for a job whose run failed on its `receive_count`-th delivery.
pub fn failure_status(receive_count: u32, max_receive_count: u32) -> JobStatus {
    if receive_count < max_receive_count {
        JobStatus::Pending
    } else {
        JobStatus::Failed
    }
}

/// Outcome when recording completion did not succeed.
fn completion_error_outcome(error: LinkHubError) -> Outcome {
    match error {
        // Cancelled while running: the result is discarded.
        LinkHubError::Conflict(reason) => Outcome::Skipped(reason),
        e => Outcome::Retry(e.to_string()),
    }
}

fn stages(job_type: JobType) -> (bool, bool, bool, bool) {
    // (caption, tagging, thumbnails, products)
    match job_type {
        JobType::CaptionAnalysis => (true, false, false, false),
        JobType::AutoTagging => (true, true, false, false),
        JobType::ThumbnailGeneration => (false, false, true, false),
        JobType::ProductExtraction => (true, true, false, true),
        JobType::FullProcessing => (true, true, true, true),
    }
}

pub struct Pipeline<'a> {
    state: &'a AppState,
    http: &'a reqwest::Client,
}

impl<'a> Pipeline<'a> {
    pub fn new(state: &'a AppState, http: &'a reqwest::Client) -> Self {
        Self { state, http }
    }

    /// Process a batch, reporting failed records so only they are redelivered.
    pub async fn handle_batch(&self, event: SqsEvent) -> SqsBatchResponse {
        tracing::info!("SQS event received with {} records", event.records.len());

        let mut response = SqsBatchResponse::default();
        for message in &event.records {
            let outcome = self.handle_record(message).await;
            let id = message.message_id.clone().unwrap_or_default();
            match &outcome {
                Outcome::Completed => tracing::info!("Message {} processed", id),
                Outcome::Skipped(reason) => tracing::info!("Message {} skipped: {}", id, reason),
                Outcome::Dropped(reason) => tracing::error!("Message {} dropped: {}", id, reason),
                Outcome::Retry(reason) => tracing::warn!("Message {} will be retried: {}", id, reason),
                Outcome::Failed(reason) => tracing::error!("Message {} failed: {}", id, reason),
            }
            if outcome.reports_failure() && !id.is_empty() {
                response.batch_item_failures.push(BatchItemFailure {
                    item_identifier: id,
                });
            }
        }
        response
    }

    pub async fn handle_record(&self, message: &SqsMessage) -> Outcome {
        let job_message = match parse_message(message.body.as_deref()) {
            Ok(m) => m,
            Err(e) => return Outcome::Dropped(format!("Invalid message format: {}", e)),
        };
        let dynamo = &self.state.dynamo_client;
        let table = self.state.table();

        let job = match jobs::find_job(dynamo, table, &job_message.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return Outcome::Dropped(format!("job {} does not exist", job_message.job_id)),
            Err(e) => return Outcome::Retry(e.to_string()),
        };

        if skips_delivery(job.status) {
            return Outcome::Skipped(format!("job {} is {}", job.job_id, job.status));
        }
        let job = match job.status {
            JobStatus::Pending => {
                let update = TransitionUpdate {
                    count_attempt: true,
                    ..Default::default()
                };
                match jobs::transition(dynamo, table, &job.job_id, JobStatus::Pending, JobStatus::InProgress, update)
                    .await
                {
                    Ok(job) => job,
                    Err(LinkHubError::Conflict(reason)) => return Outcome::Skipped(reason),
                    Err(e) => return Outcome::Retry(e.to_string()),
                }
            }
            // In progress: redelivered after a worker crash.
            _ => job,
        };

        match self.run_stages(&job).await {
            Ok(output) => self.complete(&job, output).await,
            Err(e) => self.fail(&job, &e, receive_count(message)).await,
        }
    }

    async fn complete(&self, job: &ProcessingJob, output: Value) -> Outcome {
        let update = TransitionUpdate {
            output: Some(output.clone()),
            ..Default::default()
        };
        let result = jobs::transition(
            &self.state.dynamo_client,
            self.state.table(),
            &job.job_id,
            JobStatus::InProgress,
            JobStatus::Completed,
            update,
        )
        .await;

        if let Err(e) = result {
            return completion_error_outcome(e);
        }

        match self.state.config.results_topic_arn.as_deref() {
            Some(topic) => {
                if let Err(e) = notify::publish_completion(
                    &self.state.sns_client,
                    topic,
                    job.job_type,
                    &job.video_id,
                    &output,
                )
                .await
                {
                    tracing::error!("Error publishing results for job {}: {}", job.job_id, e);
                }
            }
            None => tracing::info!("No results topic configured, skipping publish"),
        }
        Outcome::Completed
    }

    async fn fail(&self, job: &ProcessingJob, error: &LinkHubError, receive_count: u32) -> Outcome {
        let reason = error.to_string();
        let next = failure_status(receive_count, self.state.config.max_receive_count);
        let update = TransitionUpdate {
            error: Some(reason.clone()),
            ..Default::default()
        };

        if let Err(e) = jobs::transition(
            &self.state.dynamo_client,
            self.state.table(),
            &job.job_id,
            JobStatus::InProgress,
            next,
            update,
        )
        .await
        {
            tracing::error!("Failed to record failure for job {}: {}", job.job_id, e);
        }

        match next {
            JobStatus::Pending => Outcome::Retry(reason),
            _ => Outcome::Failed(reason),
        }
    }

    async fn run_stages(&self, job: &ProcessingJob) -> Result<Value> {
        let config = &self.state.config;
        let video = &job.input;
        let now = Utc::now();
        let (run_caption, run_tagging, run_thumbnails, run_products) = stages(job.job_type);
        let mut output = serde_json::Map::new();

        let analysis: Option<CaptionAnalysis> = if run_caption {
            let analysis = caption::analyze(video, &job.job_id, config.confidence_threshold, now);
            output.insert("caption_analysis".to_string(), serde_json::to_value(&analysis)?);
            Some(analysis)
        } else {
            None
        };

        let tags: Option<TaggingResult> = if run_tagging {
            let options = TaggingOptions {
                min_confidence: config.min_tag_confidence,
                max_tags: config.max_tags,
                trending: config.trending_tags.clone(),
            };
            let result = tagging::generate(video, &job.job_id, analysis.as_ref(), &options, now);
            tagging::store_tag_usage(&self.state.dynamo_client, self.state.table(), &result).await;
            output.insert("tagging".to_string(), serde_json::to_value(&result)?);
            Some(result)
        } else {
            None
        };

        let thumbs: Option<ThumbnailResult> = if run_thumbnails {
            let bucket = config.require_thumbnail_bucket()?;
            let result =
                thumbnails::generate(&self.state.s3_client, self.http, bucket, video, &job.job_id, now)
                    .await?;
            output.insert("thumbnails".to_string(), serde_json::to_value(&result)?);
            Some(result)
        } else {
            None
        };

        if run_products {
            if let Some(analysis) = &analysis {
                let seller = users::get_user(&self.state.dynamo_client, self.state.table(), &job.user_id).await?;
                let thumbnail_list = thumbs.as_ref().map(|t| t.thumbnails.as_slice()).unwrap_or(&[]);
                let extracted = products::extract(
                    &job.job_id,
                    video,
                    &seller.handle,
                    analysis,
                    tags.as_ref(),
                    thumbnail_list,
                    now,
                );
                products::save_products(&self.state.dynamo_client, self.state.table(), &extracted).await?;
                output.insert("products".to_string(), serde_json::to_value(&extracted)?);
            }
        }

        Ok(Value::Object(output))
    }
}
