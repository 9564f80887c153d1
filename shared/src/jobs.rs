use crate::dynamo::{self, n, s, Item, GSI1};
use crate::error::{LinkHubError, Result};
use crate::types::{JobStatus, JobType, Page, ProcessingJob, VideoSubmission};
use aws_sdk_dynamodb::types::ReturnValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use serde_json::Value;

const METADATA_SK: &str = "METADATA";

/// Allowed status transitions. Completed and cancelled jobs never move again.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Cancelled)
            | (Pending, Failed)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Pending)
            | (InProgress, Cancelled)
            | (Failed, Pending)
    )
}

pub fn new_job(
    user_id: &str,
    job_type: JobType,
    video: VideoSubmission,
    now: DateTime<Utc>,
) -> ProcessingJob {
    ProcessingJob {
        job_id: uuid::Uuid::new_v4().to_string(),
        job_type,
        status: JobStatus::Pending,
        video_id: video.video_id.clone(),
        user_id: user_id.to_string(),
        input: video,
        output: None,
        error: None,
        attempts: 0,
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    }
}

pub fn job_to_item(job: &ProcessingJob) -> Result<Item> {
    let mut item = Item::new();
    item.insert("PK".to_string(), s(dynamo::job_pk(&job.job_id)));
    item.insert("SK".to_string(), s(METADATA_SK));
    item.insert("GSI1PK".to_string(), s(dynamo::video_key(&job.video_id)));
    item.insert("GSI1SK".to_string(), s(format!("JOB#{}", job.created_at)));
    item.insert("entity_type".to_string(), s("job"));
    item.insert("job_id".to_string(), s(&job.job_id));
    item.insert("job_type".to_string(), s(job.job_type.as_str()));
    item.insert("status".to_string(), s(job.status.as_str()));
    item.insert("video_id".to_string(), s(&job.video_id));
    item.insert("user_id".to_string(), s(&job.user_id));
    item.insert("input".to_string(), dynamo::json(&job.input)?);
    if let Some(output) = &job.output {
        item.insert("output".to_string(), dynamo::json(output)?);
    }
    if let Some(error) = &job.error {
        item.insert("error".to_string(), s(error));
    }
    item.insert("attempts".to_string(), n(job.attempts));
    item.insert("created_at".to_string(), s(&job.created_at));
    item.insert("updated_at".to_string(), s(&job.updated_at));
    Ok(item)
}

pub fn item_to_job(item: &Item) -> Result<ProcessingJob> {
    let input = dynamo::get_json::<VideoSubmission>(item, "input")?
        .ok_or_else(|| LinkHubError::Internal("job is missing its input".to_string()))?;

    Ok(ProcessingJob {
        job_id: dynamo::require_s(item, "job_id")?,
        job_type: dynamo::get_parsed(item, "job_type")?,
        status: dynamo::get_parsed(item, "status")?,
        video_id: dynamo::require_s(item, "video_id")?,
        user_id: dynamo::require_s(item, "user_id")?,
        input,
        output: dynamo::get_json::<Value>(item, "output")?,
        error: dynamo::get_s(item, "error"),
        attempts: dynamo::get_n(item, "attempts").unwrap_or(0),
        created_at: dynamo::get_s(item, "created_at").unwrap_or_default(),
        updated_at: dynamo::get_s(item, "updated_at").unwrap_or_default(),
    })
}

pub async fn create_job(client: &DynamoClient, table_name: &str, job: &ProcessingJob) -> Result<()> {
    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(job_to_item(job)?))
        .condition_expression("attribute_not_exists(PK)")
        .send()
        .await?;

    tracing::info!(
        "Created {} job {} for video {}",
        job.job_type,
        job.job_id,
        job.video_id
    );
    Ok(())
}

pub async fn find_job(client: &DynamoClient, table_name: &str, job_id: &str) -> Result<Option<ProcessingJob>> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(dynamo::job_pk(job_id)))
        .key("SK", s(METADATA_SK))
        .send()
        .await?;

    result.item().map(item_to_job).transpose()
}

pub async fn get_job(client: &DynamoClient, table_name: &str, job_id: &str) -> Result<ProcessingJob> {
    find_job(client, table_name, job_id)
        .await?
        .ok_or_else(|| LinkHubError::NotFound(format!("Job {} not found", job_id)))
}

/// Extra attributes written alongside a status change.
#[derive(Debug, Default)]
pub struct TransitionUpdate {
    pub output: Option<Value>,
    pub error: Option<String>,
    pub count_attempt: bool,
}

/// Move a job from `from` to `to`, provided it is still in `from`.
pub async fn transition(
    client: &DynamoClient,
    table_name: &str,
    job_id: &str,
    from: JobStatus,
    to: JobStatus,
    update: TransitionUpdate,
) -> Result<ProcessingJob> {
    if !can_transition(from, to) {
        return Err(LinkHubError::Conflict(format!(
            "Job cannot move from {} to {}",
            from, to
        )));
    }

    let mut set_parts = vec!["#status = :to", "updated_at = :updated"];
    let mut request = client
        .update_item()
        .table_name(table_name)
        .key("PK", s(dynamo::job_pk(job_id)))
        .key("SK", s(METADATA_SK))
        .condition_expression("#status = :from")
        .expression_attribute_names("#status", "status")
        .expression_attribute_values(":to", s(to.as_str()))
        .expression_attribute_values(":from", s(from.as_str()))
        .expression_attribute_values(":updated", s(Utc::now().to_rfc3339()));

    if let Some(output) = &update.output {
        set_parts.push("#output = :output");
        request = request
            .expression_attribute_names("#output", "output")
            .expression_attribute_values(":output", dynamo::json(output)?);
    }
    if let Some(error) = update.error {
        set_parts.push("#error = :error");
        request = request
            .expression_attribute_names("#error", "error")
            .expression_attribute_values(":error", s(error));
    }

    let mut update_expression = format!("SET {}", set_parts.join(", "));
    if update.count_attempt {
        update_expression.push_str(" ADD attempts :one");
        request = request.expression_attribute_values(":one", n(1));
    }

    let result = request
        .update_expression(update_expression)
        .return_values(ReturnValue::AllNew)
        .send()
        .await;

    match result {
        Ok(output) => {
            tracing::info!("Job {} moved {} -> {}", job_id, from, to);
            output
                .attributes()
                .map(item_to_job)
                .transpose()?
                .ok_or_else(|| LinkHubError::NotFound(format!("Job {} not found", job_id)))
        }
        Err(e) => {
            if e.as_service_error()
                .map(|se| se.is_conditional_check_failed_exception())
                .unwrap_or(false)
            {
                Err(LinkHubError::Conflict(format!(
                    "Job {} is no longer {}",
                    job_id, from
                )))
            } else {
                Err(e.into())
            }
        }
    }
}

/// Jobs for a video, newest first.
pub async fn list_by_video(
    client: &DynamoClient,
    table_name: &str,
    video_id: &str,
    limit: i32,
) -> Result<Vec<ProcessingJob>> {
    let result = client
        .query()
        .table_name(table_name)
        .index_name(GSI1)
        .key_condition_expression("GSI1PK = :pk AND begins_with(GSI1SK, :prefix)")
        .expression_attribute_values(":pk", s(dynamo::video_key(video_id)))
        .expression_attribute_values(":prefix", s("JOB#"))
        .scan_index_forward(false)
        .limit(limit.clamp(1, 100))
        .send()
        .await?;

    result.items().iter().map(item_to_job).collect()
}

pub async fn list_by_status(
    client: &DynamoClient,
    table_name: &str,
    status: Option<JobStatus>,
    limit: i32,
    cursor: Option<&str>,
) -> Result<Page<ProcessingJob>> {
    let mut request = client
        .scan()
        .table_name(table_name)
        .expression_attribute_values(":type", s("job"))
        .limit(limit.clamp(1, 100));

    request = match status {
        Some(status) => request
            .filter_expression("entity_type = :type AND #status = :status")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", s(status.as_str())),
        None => request.filter_expression("entity_type = :type"),
    };
    if let Some(cursor) = cursor {
        request = request.set_exclusive_start_key(Some(dynamo::decode_cursor(cursor)?));
    }

    let result = request.send().await?;
    let items = result
        .items()
        .iter()
        .map(item_to_job)
        .collect::<Result<Vec<_>>>()?;
    let next_cursor = result
        .last_evaluated_key()
        .map(dynamo::encode_cursor)
        .transpose()?;

    Ok(Page { items, next_cursor })
}

/// Cancel a job owned by `user_id`. Admins pass `None` to skip the owner check.
pub async fn cancel(
    client: &DynamoClient,
    table_name: &str,
    job_id: &str,
    user_id: Option<&str>,
) -> Result<ProcessingJob> {
    let job = get_job(client, table_name, job_id).await?;
    if let Some(user_id) = user_id {
        if job.user_id != user_id {
            return Err(LinkHubError::Forbidden(
                "Job belongs to another user".to_string(),
            ));
        }
    }

    transition(
        client,
        table_name,
        job_id,
        job.status,
        JobStatus::Cancelled,
        TransitionUpdate::default(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn submission() -> VideoSubmission {
        VideoSubmission {
            video_id: "v42".to_string(),
            video_url: "https://www.tiktok.com/@glowshop/video/42".to_string(),
            caption: "New linen dress $29.99 link in bio".to_string(),
            hashtags: vec!["dress".to_string()],
            mentions: vec![],
            thumbnail_url: None,
            product_info: None,
            detections: vec![],
        }
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;
        assert!(can_transition(Pending, InProgress));
        assert!(can_transition(Pending, Cancelled));
        assert!(can_transition(InProgress, Pending));
        assert!(can_transition(Failed, Pending));
        assert!(can_transition(Pending, Failed));
        assert!(!can_transition(Pending, Completed));
        assert!(!can_transition(Failed, Completed));
        for to in [Pending, InProgress, Completed, Failed, Cancelled] {
            assert!(!can_transition(Completed, to));
            assert!(!can_transition(Cancelled, to));
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_way_out() {
        use JobStatus::*;
        let all = [Pending, InProgress, Completed, Failed, Cancelled];
        for from in all {
            let stuck = all.iter().all(|to| !can_transition(from, *to));
            assert_eq!(from.is_terminal(), stuck, "{}", from);
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let job = new_job("u1", JobType::FullProcessing, submission(), now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.video_id, "v42");
        assert!(uuid::Uuid::parse_str(&job.job_id).is_ok());
    }

    #[test]
    fn test_job_item_round_trip() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut job = new_job("u1", JobType::AutoTagging, submission(), now);
        job.output = Some(serde_json::json!({"tags": ["dress"]}));
        let item = job_to_item(&job).unwrap();

        assert_eq!(
            dynamo::get_s(&item, "GSI1SK").as_deref(),
            Some("JOB#2026-01-02T03:04:05+00:00")
        );
        assert_eq!(dynamo::get_s(&item, "entity_type").as_deref(), Some("job"));

        let back = item_to_job(&item).unwrap();
        assert_eq!(back.job_id, job.job_id);
        assert_eq!(back.job_type, JobType::AutoTagging);
        assert_eq!(back.input.caption, job.input.caption);
        assert_eq!(back.output, job.output);
    }
}
