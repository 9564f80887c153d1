//! Cognito custom authentication triggers for OTP sign-in.
//!
//! Cognito calls define → create → verify for every round of the challenge.
//! The trigger event is handled as raw JSON so fields this module does not
//! touch are returned to Cognito unchanged.

use crate::auth::mask_phone;
use crate::error::{LinkHubError, Result};
use crate::notify;
use aws_sdk_sns::Client as SnsClient;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CUSTOM_CHALLENGE: &str = "CUSTOM_CHALLENGE";
pub const OTP_LENGTH: usize = 6;
const CODE_METADATA_PREFIX: &str = "CODE-";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResult {
    #[serde(default)]
    pub challenge_name: String,
    #[serde(default)]
    pub challenge_result: bool,
    pub challenge_metadata: Option<String>,
}

/// The `request` object shared by the three challenge triggers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub user_attributes: HashMap<String, String>,
    #[serde(default)]
    pub session: Vec<ChallengeResult>,
    #[serde(default)]
    pub user_not_found: bool,
    pub challenge_name: Option<String>,
    #[serde(default)]
    pub private_challenge_parameters: HashMap<String, String>,
    pub challenge_answer: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineResponse {
    pub challenge_name: Option<String>,
    pub issue_tokens: bool,
    pub fail_authentication: bool,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub public_challenge_parameters: HashMap<String, String>,
    pub private_challenge_parameters: HashMap<String, String>,
    pub challenge_metadata: String,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub answer_correct: bool,
}

/// Decide the next step of the custom auth flow.
pub fn define(request: &ChallengeRequest, max_attempts: usize) -> DefineResponse {
    let fail = DefineResponse {
        challenge_name: None,
        issue_tokens: false,
        fail_authentication: true,
    };
    let next_challenge = DefineResponse {
        challenge_name: Some(CUSTOM_CHALLENGE.to_string()),
        issue_tokens: false,
        fail_authentication: false,
    };

    if request.user_not_found {
        return fail;
    }

    let Some(last) = request.session.last() else {
        return next_challenge;
    };

    if last.challenge_name == CUSTOM_CHALLENGE && last.challenge_result {
        return DefineResponse {
            challenge_name: None,
            issue_tokens: true,
            fail_authentication: false,
        };
    }

    let failed_attempts = request
        .session
        .iter()
        .filter(|r| r.challenge_name == CUSTOM_CHALLENGE && !r.challenge_result)
        .count();
    if last.challenge_name != CUSTOM_CHALLENGE || failed_attempts >= max_attempts {
        return fail;
    }

    next_challenge
}

/// Build the challenge. Returns the response and, on the first round, the code to text.
///
/// Retries reuse the code from the previous round's metadata so a user who
/// mistypes does not get a second SMS.
pub fn create<F>(request: &ChallengeRequest, generate_code: F) -> (CreateResponse, Option<String>)
where
    F: FnOnce() -> String,
{
    let previous_code = request
        .session
        .iter()
        .rev()
        .filter(|r| r.challenge_name == CUSTOM_CHALLENGE)
        .find_map(|r| {
            r.challenge_metadata
                .as_deref()
                .and_then(|m| m.strip_prefix(CODE_METADATA_PREFIX))
                .map(|c| c.to_string())
        });

    let (code, to_send) = match previous_code {
        Some(code) => (code, None),
        None => {
            let code = generate_code();
            (code.clone(), Some(code))
        }
    };

    let mut public = HashMap::new();
    if let Some(phone) = request.user_attributes.get("phone_number") {
        public.insert("phone_hint".to_string(), mask_phone(phone));
    }
    let mut private = HashMap::new();
    private.insert("answer".to_string(), code.clone());

    (
        CreateResponse {
            public_challenge_parameters: public,
            private_challenge_parameters: private,
            challenge_metadata: format!("{}{}", CODE_METADATA_PREFIX, code),
        },
        to_send,
    )
}

pub fn verify(request: &ChallengeRequest) -> VerifyResponse {
    let expected = request.private_challenge_parameters.get("answer");
    let answer = request.challenge_answer.as_deref().map(str::trim);
    let answer_correct = match (expected, answer) {
        (Some(expected), Some(answer)) if !expected.is_empty() => {
            constant_time_eq(expected.as_bytes(), answer.as_bytes())
        }
        _ => false,
    };
    VerifyResponse { answer_correct }
}

pub fn generate_otp() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..10u32.pow(OTP_LENGTH as u32));
    format!("{:0width$}", value, width = OTP_LENGTH)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Handle one Cognito trigger invocation and return the event with its `response` filled.
pub async fn handle_trigger(
    mut event: serde_json::Value,
    sns_client: &SnsClient,
    max_attempts: usize,
) -> Result<serde_json::Value> {
    let trigger_source = event
        .get("triggerSource")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let request: ChallengeRequest = match event.get("request") {
        Some(raw) => serde_json::from_value(raw.clone())?,
        None => ChallengeRequest::default(),
    };

    tracing::info!(trigger_source = %trigger_source, rounds = request.session.len(), "Auth challenge trigger");

    let response = if trigger_source.starts_with("DefineAuthChallenge") {
        serde_json::to_value(define(&request, max_attempts))?
    } else if trigger_source.starts_with("CreateAuthChallenge") {
        let (response, to_send) = create(&request, generate_otp);
        if let Some(code) = to_send {
            let phone = request.user_attributes.get("phone_number").ok_or_else(|| {
                LinkHubError::BadRequest("user has no phone_number attribute".to_string())
            })?;
            let text = format!("Your TikTok Commerce Link Hub code is {}", code);
            notify::send_sms(sns_client, phone, &text).await?;
            tracing::info!("OTP sent to {}", mask_phone(phone));
        }
        serde_json::to_value(response)?
    } else if trigger_source.starts_with("VerifyAuthChallengeResponse") {
        let response = verify(&request);
        if !response.answer_correct {
            tracing::warn!("Incorrect OTP answer");
        }
        serde_json::to_value(response)?
    } else {
        tracing::warn!("Unhandled trigger source: {}", trigger_source);
        return Ok(event);
    };

    if let Some(obj) = event.as_object_mut() {
        obj.insert("response".to_string(), response);
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(result: bool, metadata: Option<&str>) -> ChallengeResult {
        ChallengeResult {
            challenge_name: CUSTOM_CHALLENGE.to_string(),
            challenge_result: result,
            challenge_metadata: metadata.map(|m| m.to_string()),
        }
    }

    #[test]
    fn test_define_first_round_issues_challenge() {
        let response = define(&ChallengeRequest::default(), 3);
        assert_eq!(response.challenge_name.as_deref(), Some(CUSTOM_CHALLENGE));
        assert!(!response.issue_tokens);
        assert!(!response.fail_authentication);
    }

    #[test]
    fn test_define_unknown_user_fails() {
        let request = ChallengeRequest {
            user_not_found: true,
            ..Default::default()
        };
        assert!(define(&request, 3).fail_authentication);
    }

    #[test]
    fn test_define_correct_answer_issues_tokens() {
        let request = ChallengeRequest {
            session: vec![round(false, Some("CODE-123456")), round(true, Some("CODE-123456"))],
            ..Default::default()
        };
        let response = define(&request, 3);
        assert!(response.issue_tokens);
        assert!(response.challenge_name.is_none());
    }

    #[test]
    fn test_define_retries_until_limit() {
        let two_failures = ChallengeRequest {
            session: vec![round(false, None), round(false, None)],
            ..Default::default()
        };
        assert_eq!(
            define(&two_failures, 3).challenge_name.as_deref(),
            Some(CUSTOM_CHALLENGE)
        );

        let three_failures = ChallengeRequest {
            session: vec![round(false, None), round(false, None), round(false, None)],
            ..Default::default()
        };
        assert!(define(&three_failures, 3).fail_authentication);
    }

    #[test]
    fn test_define_rejects_other_challenges() {
        let request = ChallengeRequest {
            session: vec![ChallengeResult {
                challenge_name: "SRP_A".to_string(),
                challenge_result: true,
                challenge_metadata: None,
            }],
            ..Default::default()
        };
        assert!(define(&request, 3).fail_authentication);
    }

    #[test]
    fn test_create_first_round_generates_code() {
        let mut request = ChallengeRequest::default();
        request
            .user_attributes
            .insert("phone_number".to_string(), "+14155551234".to_string());

        let (response, to_send) = create(&request, || "042137".to_string());
        assert_eq!(to_send.as_deref(), Some("042137"));
        assert_eq!(response.challenge_metadata, "CODE-042137");
        assert_eq!(response.private_challenge_parameters["answer"], "042137");
        assert_eq!(response.public_challenge_parameters["phone_hint"], "+1******1234");
    }

    #[test]
    fn test_create_retry_reuses_code() {
        let request = ChallengeRequest {
            session: vec![round(false, Some("CODE-998877"))],
            ..Default::default()
        };
        let (response, to_send) = create(&request, || panic!("must not generate a new code"));
        assert!(to_send.is_none());
        assert_eq!(response.private_challenge_parameters["answer"], "998877");
    }

    #[test]
    fn test_verify() {
        let mut request = ChallengeRequest::default();
        request
            .private_challenge_parameters
            .insert("answer".to_string(), "123456".to_string());

        request.challenge_answer = Some(" 123456 ".to_string());
        assert!(verify(&request).answer_correct);

        request.challenge_answer = Some("123457".to_string());
        assert!(!verify(&request).answer_correct);

        request.challenge_answer = None;
        assert!(!verify(&request).answer_correct);
    }

    #[test]
    fn test_generate_otp_shape() {
        for _ in 0..50 {
            let code = generate_otp();
            assert_eq!(code.len(), OTP_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_request_parses_cognito_json() {
        let raw = serde_json::json!({
            "userAttributes": {"phone_number": "+14155551234", "sub": "abc"},
            "session": [
                {"challengeName": "CUSTOM_CHALLENGE", "challengeResult": false, "challengeMetadata": "CODE-111111"}
            ],
            "userNotFound": false
        });
        let request: ChallengeRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.session.len(), 1);
        assert_eq!(request.user_attributes["sub"], "abc");
    }

    #[tokio::test]
    async fn test_handle_trigger_define_and_passthrough() {
        let sdk_config = aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        let sns = SnsClient::new(&sdk_config);

        let event = serde_json::json!({
            "triggerSource": "DefineAuthChallenge_Authentication",
            "userName": "+14155551234",
            "request": {"userAttributes": {}, "session": []},
            "response": {}
        });
        let out = handle_trigger(event, &sns, 3).await.unwrap();
        assert_eq!(out["response"]["challengeName"], CUSTOM_CHALLENGE);
        assert_eq!(out["response"]["issueTokens"], false);
        assert_eq!(out["userName"], "+14155551234");

        let event = serde_json::json!({"triggerSource": "PreSignUp_SignUp", "response": {}});
        let out = handle_trigger(event.clone(), &sns, 3).await.unwrap();
        assert_eq!(out, event);
    }
}
