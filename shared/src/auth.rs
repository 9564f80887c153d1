//! Phone-number sign-up and OTP sign-in against Cognito.
//!
//! Sign-up uses the standard Cognito confirmation code (sent by SMS); sign-in
//! uses the `CUSTOM_AUTH` flow whose challenge is driven by the triggers in
//! [`crate::challenge`].

use crate::error::{LinkHubError, Result};
use crate::types::{ConfirmSignupRequest, RefreshRequest, SigninRequest, SignupRequest, User, VerifySigninRequest};
use crate::{users, AppState};
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType, ChallengeNameType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::{Alphanumeric, DistString};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user_sub: String,
    pub confirmed: bool,
    pub code_delivery_destination: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SigninChallenge {
    pub session: String,
    pub challenge_name: String,
    pub phone_hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub id_token: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i32,
}

/// Result of answering the OTP challenge.
#[derive(Debug)]
pub enum VerifyOutcome {
    Authenticated(AuthTokens),
    /// Wrong code with attempts left; the caller must answer again with this session.
    Retry { session: String },
}

/// Cognito app client settings needed for every call.
pub struct CognitoApp<'a> {
    pub client: &'a CognitoClient,
    pub user_pool_id: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
}

impl<'a> CognitoApp<'a> {
    pub fn from_state(state: &'a AppState) -> Result<Self> {
        Ok(Self {
            client: &state.cognito_client,
            user_pool_id: state.config.require_user_pool_id()?,
            client_id: state.config.require_client_id()?,
            client_secret: state.client_secret.as_deref(),
        })
    }

    fn secret_hash(&self, username: &str) -> Result<Option<String>> {
        self.client_secret
            .map(|secret| compute_secret_hash(username, self.client_id, secret))
            .transpose()
    }
}

/// Compute the SECRET_HASH for Cognito authentication
pub fn compute_secret_hash(username: &str, client_id: &str, client_secret: &str) -> Result<String> {
    let message = format!("{}{}", username, client_id);
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| LinkHubError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(message.as_bytes());
    let result = mac.finalize();
    Ok(general_purpose::STANDARD.encode(result.into_bytes()))
}

/// E.164: a plus sign followed by 8 to 15 digits, no leading zero.
pub fn is_valid_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Lowercase a handle, dropping a leading `@`, and check its shape.
pub fn normalize_handle(handle: &str) -> Result<String> {
    let handle = handle.trim().trim_start_matches('@').to_lowercase();
    let valid_chars = handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
    if !(3..=24).contains(&handle.len()) || !valid_chars {
        return Err(LinkHubError::BadRequest(
            "Handle must be 3-24 characters of letters, digits, '_' or '.'".to_string(),
        ));
    }
    Ok(handle)
}

/// `+14155551234` becomes `+1******1234`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 6), tail)
}

fn validate_phone(phone: &str) -> Result<()> {
    if is_valid_e164(phone) {
        Ok(())
    } else {
        Err(LinkHubError::BadRequest(
            "Phone number must be in E.164 format (e.g., +14155551234)".to_string(),
        ))
    }
}

/// Users never see this password: sign-in is OTP only, but Cognito requires one.
fn generate_placeholder_password() -> String {
    let random = Alphanumeric.sample_string(&mut rand::thread_rng(), 32);
    format!("{}Aa1!", random)
}

/// Map a Cognito SDK failure to a user-facing error by exception name.
fn map_cognito_error(detail: &str, fallback: &str) -> LinkHubError {
    tracing::error!("Cognito error: {}", detail);

    if detail.contains("UsernameExistsException") {
        LinkHubError::Conflict("An account with this phone number already exists".to_string())
    } else if detail.contains("CodeMismatchException") {
        LinkHubError::Unauthorized("Invalid verification code".to_string())
    } else if detail.contains("ExpiredCodeException") {
        LinkHubError::Unauthorized("Verification code has expired. Please request a new one".to_string())
    } else if detail.contains("UserNotConfirmedException") {
        LinkHubError::Forbidden("Please confirm your phone number before signing in".to_string())
    } else if detail.contains("UserNotFoundException") {
        LinkHubError::Unauthorized("No account found with this phone number".to_string())
    } else if detail.contains("NotAuthorizedException") {
        LinkHubError::Unauthorized("Incorrect or expired code. Please sign in again".to_string())
    } else if detail.contains("TooManyRequestsException") || detail.contains("LimitExceededException") {
        LinkHubError::Forbidden("Too many attempts. Please try again later".to_string())
    } else if detail.contains("InvalidParameterException") {
        LinkHubError::BadRequest("Invalid phone number or code format".to_string())
    } else {
        LinkHubError::Aws(fallback.to_string())
    }
}

/// Register a phone number and handle; Cognito texts the confirmation code.
pub async fn signup(state: &AppState, request: SignupRequest) -> Result<SignupResponse> {
    let app = CognitoApp::from_state(state)?;
    validate_phone(&request.phone_number)?;
    let handle = normalize_handle(&request.handle)?;

    tracing::info!("Signing up user: {}", mask_phone(&request.phone_number));

    if users::find_by_handle(&state.dynamo_client, state.table(), &handle)
        .await?
        .is_some()
    {
        return Err(LinkHubError::Conflict(format!("Handle @{} is already taken", handle)));
    }

    let mut builder = app
        .client
        .sign_up()
        .client_id(app.client_id)
        .username(&request.phone_number)
        .password(generate_placeholder_password())
        .user_attributes(
            AttributeType::builder()
                .name("phone_number")
                .value(&request.phone_number)
                .build()?,
        )
        .user_attributes(
            AttributeType::builder()
                .name("preferred_username")
                .value(&handle)
                .build()?,
        );
    if let Some(hash) = app.secret_hash(&request.phone_number)? {
        builder = builder.secret_hash(hash);
    }

    let output = builder
        .send()
        .await
        .map_err(|e| map_cognito_error(&format!("{:?}", e), "Signup failed"))?;

    tracing::info!("Signup successful for user: {}", mask_phone(&request.phone_number));

    Ok(SignupResponse {
        user_sub: output.user_sub().to_string(),
        confirmed: output.user_confirmed(),
        code_delivery_destination: output
            .code_delivery_details()
            .and_then(|d| d.destination())
            .map(|d| d.to_string()),
    })
}

/// Confirm the sign-up code and create the platform user record.
pub async fn confirm_signup(state: &AppState, request: ConfirmSignupRequest) -> Result<User> {
    let app = CognitoApp::from_state(state)?;
    validate_phone(&request.phone_number)?;

    let mut builder = app
        .client
        .confirm_sign_up()
        .client_id(app.client_id)
        .username(&request.phone_number)
        .confirmation_code(request.code.trim());
    if let Some(hash) = app.secret_hash(&request.phone_number)? {
        builder = builder.secret_hash(hash);
    }

    if let Err(e) = builder.send().await {
        let detail = format!("{:?}", e);
        // A repeated confirmation of an already confirmed user falls through to
        // record creation, which is idempotent.
        if !(detail.contains("NotAuthorizedException") && detail.contains("CONFIRMED")) {
            return Err(map_cognito_error(&detail, "Confirmation failed"));
        }
        tracing::info!("User already confirmed: {}", mask_phone(&request.phone_number));
    }

    let cognito_user = app
        .client
        .admin_get_user()
        .user_pool_id(app.user_pool_id)
        .username(&request.phone_number)
        .send()
        .await
        .map_err(|e| map_cognito_error(&format!("{:?}", e), "Failed to load confirmed user"))?;

    let attribute = |name: &str| {
        cognito_user
            .user_attributes()
            .iter()
            .find(|a| a.name() == name)
            .and_then(|a| a.value())
            .map(|v| v.to_string())
    };
    let sub = attribute("sub")
        .ok_or_else(|| LinkHubError::Internal("Cognito user has no sub".to_string()))?;
    let handle = attribute("preferred_username")
        .ok_or_else(|| LinkHubError::Internal("Cognito user has no preferred_username".to_string()))?;

    users::create_from_signup(
        &state.dynamo_client,
        state.table(),
        &sub,
        &handle,
        &request.phone_number,
        state.config.trial_days,
        chrono::Utc::now(),
    )
    .await
}

/// Start the OTP sign-in; the define/create triggers send the code.
pub async fn signin(state: &AppState, request: SigninRequest) -> Result<SigninChallenge> {
    let app = CognitoApp::from_state(state)?;
    validate_phone(&request.phone_number)?;

    tracing::info!("Sign-in requested: {}", mask_phone(&request.phone_number));

    let mut builder = app
        .client
        .initiate_auth()
        .auth_flow(AuthFlowType::CustomAuth)
        .client_id(app.client_id)
        .auth_parameters("USERNAME", &request.phone_number);
    if let Some(hash) = app.secret_hash(&request.phone_number)? {
        builder = builder.auth_parameters("SECRET_HASH", hash);
    }

    let output = builder
        .send()
        .await
        .map_err(|e| map_cognito_error(&format!("{:?}", e), "Sign-in failed"))?;

    let session = output
        .session()
        .ok_or_else(|| LinkHubError::Aws("Cognito returned no challenge session".to_string()))?;

    Ok(SigninChallenge {
        session: session.to_string(),
        challenge_name: output
            .challenge_name()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "CUSTOM_CHALLENGE".to_string()),
        phone_hint: output
            .challenge_parameters()
            .and_then(|p| p.get("phone_hint"))
            .cloned(),
    })
}

/// Answer the OTP challenge.
pub async fn verify_signin(state: &AppState, request: VerifySigninRequest) -> Result<VerifyOutcome> {
    let app = CognitoApp::from_state(state)?;
    validate_phone(&request.phone_number)?;

    let mut builder = app
        .client
        .respond_to_auth_challenge()
        .client_id(app.client_id)
        .challenge_name(ChallengeNameType::CustomChallenge)
        .session(&request.session)
        .challenge_responses("USERNAME", &request.phone_number)
        .challenge_responses("ANSWER", request.code.trim());
    if let Some(hash) = app.secret_hash(&request.phone_number)? {
        builder = builder.challenge_responses("SECRET_HASH", hash);
    }

    let output = builder
        .send()
        .await
        .map_err(|e| map_cognito_error(&format!("{:?}", e), "Verification failed"))?;

    if let Some(result) = output.authentication_result() {
        tracing::info!("Authentication successful for user: {}", mask_phone(&request.phone_number));
        return Ok(VerifyOutcome::Authenticated(AuthTokens {
            id_token: result.id_token().unwrap_or_default().to_string(),
            access_token: result.access_token().unwrap_or_default().to_string(),
            refresh_token: result.refresh_token().map(|t| t.to_string()),
            expires_in: result.expires_in(),
        }));
    }

    match output.session() {
        Some(session) => {
            tracing::warn!("Invalid OTP code attempt: {}", mask_phone(&request.phone_number));
            Ok(VerifyOutcome::Retry {
                session: session.to_string(),
            })
        }
        None => Err(LinkHubError::Unauthorized(
            "Incorrect or expired code. Please sign in again".to_string(),
        )),
    }
}

/// Exchange a refresh token for fresh id/access tokens.
pub async fn refresh(state: &AppState, request: RefreshRequest) -> Result<AuthTokens> {
    let app = CognitoApp::from_state(state)?;

    let mut builder = app
        .client
        .initiate_auth()
        .auth_flow(AuthFlowType::RefreshTokenAuth)
        .client_id(app.client_id)
        .auth_parameters("REFRESH_TOKEN", &request.refresh_token);
    if let Some(hash) = app.secret_hash(&request.phone_number)? {
        builder = builder.auth_parameters("SECRET_HASH", hash);
    }

    let output = builder
        .send()
        .await
        .map_err(|e| map_cognito_error(&format!("{:?}", e), "Token refresh failed"))?;

    let result = output
        .authentication_result()
        .ok_or_else(|| LinkHubError::Unauthorized("No authentication result returned".to_string()))?;

    Ok(AuthTokens {
        id_token: result.id_token().unwrap_or_default().to_string(),
        access_token: result.access_token().unwrap_or_default().to_string(),
        refresh_token: None,
        expires_in: result.expires_in(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_secret_hash() {
        // HMAC-SHA256(key="client-secret", msg="+14155550100" + "client-id"), base64
        let hash = compute_secret_hash("+14155550100", "client-id", "client-secret").unwrap();
        assert_eq!(hash, "HVUXNIUJyPD1u4ocoP115qBi9OM+Bxur2Q9vvOKCJ5c=");
    }

    #[test]
    fn test_is_valid_e164() {
        assert!(is_valid_e164("+14155551234"));
        assert!(is_valid_e164("+447911123456"));
        assert!(!is_valid_e164("14155551234"));
        assert!(!is_valid_e164("+0123456789"));
        assert!(!is_valid_e164("+1415555"));
        assert!(!is_valid_e164("+1415555123412345"));
        assert!(!is_valid_e164("+1-415-555-1234"));
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@GlowShop").unwrap(), "glowshop");
        assert_eq!(normalize_handle(" deals_by.sam ").unwrap(), "deals_by.sam");
        assert!(normalize_handle("ab").is_err());
        assert!(normalize_handle("no spaces").is_err());
        assert!(normalize_handle(&"x".repeat(25)).is_err());
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+14155551234"), "+1******1234");
        assert_eq!(mask_phone("+1234"), "*****");
    }

    #[test]
    fn test_placeholder_password_meets_policy() {
        let password = generate_placeholder_password();
        assert!(password.len() >= 8);
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(password.chars().any(|c| c.is_ascii_lowercase()));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| !c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_map_cognito_error() {
        assert!(matches!(
            map_cognito_error("ServiceError { UsernameExistsException }", "x"),
            LinkHubError::Conflict(_)
        ));
        assert!(matches!(
            map_cognito_error("CodeMismatchException", "x"),
            LinkHubError::Unauthorized(_)
        ));
        assert!(matches!(
            map_cognito_error("UserNotConfirmedException", "x"),
            LinkHubError::Forbidden(_)
        ));
        assert!(matches!(
            map_cognito_error("DispatchFailure", "Signup failed"),
            LinkHubError::Aws(m) if m == "Signup failed"
        ));
    }
}
