use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========== USER ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Trial,
    Active,
    Expired,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub cognito_user_id: String,
    pub handle: String,
    pub phone_number: String,
    pub subscription_status: SubscriptionStatus,
    pub trial_end_date: Option<String>,
    pub subscription_end_date: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub phone_number: String,
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmSignupRequest {
    pub phone_number: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifySigninRequest {
    pub phone_number: String,
    pub session: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub phone_number: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// Public view of a user, looked up by handle.
#[derive(Debug, Serialize)]
pub struct PublicProfile {
    pub handle: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&User> for PublicProfile {
    fn from(user: &User) -> Self {
        Self {
            handle: user.handle.clone(),
            display_name: user.display_name.clone(),
            bio: user.bio.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

// ========== ADMIN ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdminSession {
    pub session_id: String,
    pub admin_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub last_seen_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub status: SubscriptionStatus,
    pub trial_end_date: Option<String>,
    pub subscription_end_date: Option<String>,
}

// ========== PROCESSING JOB ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CaptionAnalysis,
    ThumbnailGeneration,
    AutoTagging,
    ProductExtraction,
    FullProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessingJob {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub video_id: String,
    pub user_id: String,
    pub input: VideoSubmission,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// A bounding box reported by an external object detector, normalized to 0..1.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Video submitted for processing; also the job's stored input.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoSubmission {
    pub video_id: String,
    pub video_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub product_info: Option<serde_json::Value>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(flatten)]
    pub video: VideoSubmission,
    pub job_type: Option<JobType>,
}

/// Message placed on the processing queue.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobMessage {
    pub job_id: String,
    pub job_type: JobType,
    pub user_id: String,
    pub video: VideoSubmission,
}

// ========== PRODUCT ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Thumbnail {
    pub size: String,
    pub url: String,
    pub quality_score: f64,
    pub confidence: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessingMetadata {
    pub job_id: String,
    pub confidence: f64,
    pub extracted_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub seller_handle: String,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub tags: Vec<String>,
    pub thumbnails: Vec<Thumbnail>,
    pub processing: ProcessingMetadata,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// One page of results with an opaque continuation cursor.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

// ========== ENUM <-> STRING ==========
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(SubscriptionStatus {
    Pending => "pending",
    Trial => "trial",
    Active => "active",
    Expired => "expired",
});

string_enum!(JobType {
    CaptionAnalysis => "caption_analysis",
    ThumbnailGeneration => "thumbnail_generation",
    AutoTagging => "auto_tagging",
    ProductExtraction => "product_extraction",
    FullProcessing => "full_processing",
});

string_enum!(JobStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    /// No transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_strings_match_serde() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(
            "product_extraction".parse::<JobType>().unwrap(),
            JobType::ProductExtraction
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("paused".parse::<JobStatus>().is_err());
        assert!(serde_json::from_str::<SubscriptionStatus>("\"lifetime\"").is_err());
    }

    #[test]
    fn test_ingest_request_defaults() {
        let req: IngestRequest = serde_json::from_str(
            r#"{"video_id": "v1", "video_url": "https://www.tiktok.com/@shop/video/1"}"#,
        )
        .unwrap();
        assert_eq!(req.video.video_id, "v1");
        assert!(req.video.caption.is_empty());
        assert!(req.video.hashtags.is_empty());
        assert!(req.video.detections.is_empty());
        assert!(req.job_type.is_none());
    }
}
