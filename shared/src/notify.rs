use crate::error::Result;
use crate::types::JobType;
use aws_sdk_sns::Client as SnsClient;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CompletionMessage<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: &'a T,
}

/// Human-readable stage name used in SNS subjects.
pub fn stage_title(job_type: JobType) -> &'static str {
    match job_type {
        JobType::CaptionAnalysis => "Caption Analysis",
        JobType::ThumbnailGeneration => "Thumbnail Generation",
        JobType::AutoTagging => "Auto-Tagging",
        JobType::ProductExtraction => "Product Extraction",
        JobType::FullProcessing => "Full Processing",
    }
}

pub fn completion_subject(job_type: JobType, video_id: &str) -> String {
    // SNS subjects are limited to 100 characters
    let subject = format!("{} Complete - {}", stage_title(job_type), video_id);
    subject.chars().take(100).collect()
}

/// Publish `{"type": "<stage>_complete", "data": ...}` to the results topic.
pub async fn publish_completion<T: Serialize>(
    sns_client: &SnsClient,
    topic_arn: &str,
    job_type: JobType,
    video_id: &str,
    data: &T,
) -> Result<()> {
    let message = CompletionMessage {
        kind: format!("{}_complete", job_type.as_str()),
        data,
    };

    sns_client
        .publish()
        .topic_arn(topic_arn)
        .message(serde_json::to_string(&message)?)
        .subject(completion_subject(job_type, video_id))
        .send()
        .await?;

    tracing::info!("Results published for video: {}", video_id);
    Ok(())
}

/// Send a transactional SMS directly to a phone number.
pub async fn send_sms(sns_client: &SnsClient, phone_number: &str, text: &str) -> Result<()> {
    sns_client
        .publish()
        .phone_number(phone_number)
        .message(text)
        .send()
        .await?;
    Ok(())
}
