//! Runtime configuration read from the Lambda environment.

use crate::error::{LinkHubError, Result};
use std::env;

pub const DEFAULT_TABLE_NAME: &str = "tiktok-commerce";
const DEFAULT_TRENDING_TAGS: &str = "viral,trending,fyp,fashion,style";

/// Configuration shared by every function in the workspace.
///
/// Values that only some functions need are optional here and checked with the
/// `require_*` accessors at the point of use.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub table_name: String,
    pub cognito_user_pool_id: Option<String>,
    pub cognito_client_id: Option<String>,
    pub cognito_client_secret: Option<String>,
    /// Secrets Manager ARN holding the app client secret.
    pub cognito_client_secret_arn: Option<String>,
    pub processing_queue_url: Option<String>,
    pub results_topic_arn: Option<String>,
    pub thumbnail_bucket: Option<String>,
    /// 0 disables the trial and leaves new users `pending`.
    pub trial_days: i64,
    pub admin_session_ttl_hours: i64,
    pub otp_max_attempts: usize,
    pub confidence_threshold: f64,
    pub min_tag_confidence: f64,
    pub max_tags: usize,
    pub max_receive_count: u32,
    pub trending_tags: Vec<String>,
    pub cors_allow_origin: String,
    /// Accept `X-User-Id` on requests without JWT claims. Local development only.
    pub allow_dev_user_header: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            table_name: non_empty("TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            cognito_user_pool_id: non_empty("COGNITO_USER_POOL_ID"),
            cognito_client_id: non_empty("COGNITO_CLIENT_ID"),
            cognito_client_secret: non_empty("COGNITO_CLIENT_SECRET"),
            cognito_client_secret_arn: non_empty("COGNITO_CLIENT_SECRET_ARN"),
            processing_queue_url: non_empty("PROCESSING_QUEUE_URL"),
            results_topic_arn: non_empty("RESULTS_TOPIC_ARN"),
            thumbnail_bucket: non_empty("THUMBNAIL_BUCKET"),
            trial_days: parse_or("TRIAL_DAYS", non_empty("TRIAL_DAYS"), 14),
            admin_session_ttl_hours: parse_or(
                "ADMIN_SESSION_TTL_HOURS",
                non_empty("ADMIN_SESSION_TTL_HOURS"),
                12,
            ),
            otp_max_attempts: parse_or("OTP_MAX_ATTEMPTS", non_empty("OTP_MAX_ATTEMPTS"), 3),
            confidence_threshold: parse_or(
                "CONFIDENCE_THRESHOLD",
                non_empty("CONFIDENCE_THRESHOLD"),
                0.7,
            ),
            min_tag_confidence: parse_or(
                "MIN_TAG_CONFIDENCE",
                non_empty("MIN_TAG_CONFIDENCE"),
                0.6,
            ),
            max_tags: parse_or("MAX_TAGS", non_empty("MAX_TAGS"), 20),
            max_receive_count: parse_or("MAX_RECEIVE_COUNT", non_empty("MAX_RECEIVE_COUNT"), 3),
            trending_tags: non_empty("TRENDING_TAGS")
                .unwrap_or_else(|| DEFAULT_TRENDING_TAGS.to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            cors_allow_origin: non_empty("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".to_string()),
            allow_dev_user_header: non_empty("ALLOW_DEV_USER_HEADER")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    pub fn require_user_pool_id(&self) -> Result<&str> {
        required(&self.cognito_user_pool_id, "COGNITO_USER_POOL_ID")
    }

    pub fn require_client_id(&self) -> Result<&str> {
        required(&self.cognito_client_id, "COGNITO_CLIENT_ID")
    }

    pub fn require_queue_url(&self) -> Result<&str> {
        required(&self.processing_queue_url, "PROCESSING_QUEUE_URL")
    }

    pub fn require_topic_arn(&self) -> Result<&str> {
        required(&self.results_topic_arn, "RESULTS_TOPIC_ARN")
    }

    pub fn require_thumbnail_bucket(&self) -> Result<&str> {
        required(&self.thumbnail_bucket, "THUMBNAIL_BUCKET")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| LinkHubError::Config(format!("{} must be set", key)))
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid numeric configuration, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert_eq!(config.trial_days, 14);
        assert_eq!(config.admin_session_ttl_hours, 12);
        assert_eq!(config.otp_max_attempts, 3);
        assert_eq!(config.max_tags, 20);
        assert_eq!(config.max_receive_count, 3);
        assert_eq!(
            config.trending_tags,
            vec!["viral", "trending", "fyp", "fashion", "style"]
        );
        assert!(config.require_queue_url().is_err());
        assert!(!config.allow_dev_user_header);
    }

    #[test]
    fn test_dev_user_header_flag() {
        for (raw, expected) in [("true", true), ("1", true), ("YES", true), ("false", false), ("0", false)] {
            let config = AppConfig::from_lookup(lookup(&[("ALLOW_DEV_USER_HEADER", raw)]));
            assert_eq!(config.allow_dev_user_header, expected, "{}", raw);
        }
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TABLE_NAME", "linkhub-dev"),
            ("TRIAL_DAYS", "0"),
            ("MAX_TAGS", "lots"),
            ("TRENDING_TAGS", " OOTD, ,Haul "),
            ("PROCESSING_QUEUE_URL", "https://sqs.us-east-1.amazonaws.com/1/jobs"),
        ]));
        assert_eq!(config.table_name, "linkhub-dev");
        assert_eq!(config.trial_days, 0);
        assert_eq!(config.max_tags, 20);
        assert_eq!(config.trending_tags, vec!["ootd", "haul"]);
        assert_eq!(
            config.require_queue_url().unwrap(),
            "https://sqs.us-east-1.amazonaws.com/1/jobs"
        );
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = AppConfig::from_lookup(lookup(&[("COGNITO_CLIENT_ID", "  ")]));
        assert!(config.cognito_client_id.is_none());
        assert!(matches!(
            config.require_client_id(),
            Err(LinkHubError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("THUMBNAIL_BUCKET", "linkhub-thumbs");
        env::set_var("OTP_MAX_ATTEMPTS", "5");
        let config = AppConfig::from_env();
        env::remove_var("THUMBNAIL_BUCKET");
        env::remove_var("OTP_MAX_ATTEMPTS");

        assert_eq!(config.require_thumbnail_bucket().unwrap(), "linkhub-thumbs");
        assert_eq!(config.otp_max_attempts, 5);
    }
}
