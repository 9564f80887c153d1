use chrono::{DateTime, Utc};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use linkhub_shared::auth::{self, VerifyOutcome};
use linkhub_shared::error::LinkHubError;
use linkhub_shared::types::{
    AdminLoginRequest, ConfirmSignupRequest, IngestRequest, JobStatus, PublicProfile,
    RefreshRequest, SigninRequest, SignupRequest, SubscriptionStatus, UpdateProfileRequest,
    UpdateSubscriptionRequest, VerifySigninRequest,
};
use linkhub_shared::{admin, http, ingestion, jobs, subscription, users, AppState};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// What a matched route produced.
enum Reply {
    /// Wrapped in the `{"success": true, "data": ...}` envelope.
    Data(StatusCode, Value),
    /// Sent without the envelope.
    Raw(StatusCode, Value),
    NoContent,
}

/// `Ok(None)` when no route matched.
type Routed = linkhub_shared::error::Result<Option<Reply>>;

fn data<T: Serialize>(status: StatusCode, value: &T) -> Routed {
    Ok(Some(Reply::Data(status, serde_json::to_value(value)?)))
}

#[derive(Serialize)]
struct SubscriptionView {
    status: SubscriptionStatus,
    allowed: bool,
    reason: &'static str,
    trial_end_date: Option<String>,
    subscription_end_date: Option<String>,
}

/// Main Lambda handler - routes auth, user, ingestion and admin endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("API Lambda invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return http::preflight();
    }

    let parts = http::path_segments(&path);
    match route(&event, &state, &method, &parts).await {
        Ok(Some(Reply::Data(status, body))) => http::success(status, &body),
        Ok(Some(Reply::Raw(status, body))) => http::json_response(status, &body),
        Ok(Some(Reply::NoContent)) => http::no_content(),
        Ok(None) if is_known_route(&parts) => http::method_not_allowed(),
        Ok(None) => http::not_found(),
        Err(err) => http::error_response(&err),
    }
}

async fn route(event: &Request, state: &AppState, method: &Method, parts: &[&str]) -> Routed {
    let now = Utc::now();
    let dynamo = &state.dynamo_client;
    let table = state.table();

    match (method, parts) {
        // --- AUTH (public) ---
        (&Method::POST, ["auth", "signup"]) => {
            let request: SignupRequest = http::parse_body(event.body())?;
            data(StatusCode::CREATED, &auth::signup(state, request).await?)
        }
        (&Method::POST, ["auth", "confirm"]) => {
            let request: ConfirmSignupRequest = http::parse_body(event.body())?;
            data(StatusCode::CREATED, &auth::confirm_signup(state, request).await?)
        }
        (&Method::POST, ["auth", "signin"]) => {
            let request: SigninRequest = http::parse_body(event.body())?;
            data(StatusCode::OK, &auth::signin(state, request).await?)
        }
        (&Method::POST, ["auth", "verify"]) => {
            let request: VerifySigninRequest = http::parse_body(event.body())?;
            match auth::verify_signin(state, request).await? {
                VerifyOutcome::Authenticated(tokens) => data(StatusCode::OK, &tokens),
                VerifyOutcome::Retry { session } => Ok(Some(Reply::Raw(
                    StatusCode::UNAUTHORIZED,
                    json!({
                        "error": "InvalidCode",
                        "message": "Incorrect code. Please try again",
                        "session": session,
                    }),
                ))),
            }
        }
        (&Method::POST, ["auth", "refresh"]) => {
            let request: RefreshRequest = http::parse_body(event.body())?;
            data(StatusCode::OK, &auth::refresh(state, request).await?)
        }

        // --- USERS ---
        (&Method::GET, ["users", "me"]) => {
            let caller = http::require_caller(event)?;
            data(StatusCode::OK, &users::get_user(dynamo, table, &caller).await?)
        }
        (&Method::PATCH, ["users", "me"]) => {
            let caller = http::require_caller(event)?;
            let request: UpdateProfileRequest = http::parse_body(event.body())?;
            data(
                StatusCode::OK,
                &users::update_profile(dynamo, table, &caller, request).await?,
            )
        }
        // GET /users/{handle} - public profile
        (&Method::GET, ["users", handle]) => {
            let handle = auth::normalize_handle(handle)?;
            let user = users::find_by_handle(dynamo, table, &handle)
                .await?
                .ok_or_else(|| LinkHubError::NotFound(format!("User @{} not found", handle)))?;
            data(StatusCode::OK, &PublicProfile::from(&user))
        }

        // --- SUBSCRIPTION ---
        (&Method::GET, ["subscription"]) => {
            let caller = http::require_caller(event)?;
            let user = users::get_user(dynamo, table, &caller).await?;
            data(StatusCode::OK, &subscription_view(user, now))
        }

        // --- INGESTION & JOBS ---
        (&Method::POST, ["ingest"]) => {
            let caller = http::require_caller(event)?;
            let request: IngestRequest = http::parse_body(event.body())?;
            let job = ingestion::ingest(state, &caller, request, now).await?;
            data(StatusCode::ACCEPTED, &job)
        }
        (&Method::GET, ["jobs", job_id]) => {
            let caller = http::require_caller(event)?;
            let job = jobs::get_job(dynamo, table, job_id).await?;
            if job.user_id != caller {
                return Err(LinkHubError::Forbidden(
                    "Job belongs to another user".to_string(),
                ));
            }
            data(StatusCode::OK, &job)
        }
        (&Method::POST, ["jobs", job_id, "cancel"]) => {
            let caller = http::require_caller(event)?;
            let job = jobs::cancel(dynamo, table, job_id, Some(caller.as_str())).await?;
            tracing::info!("Job {} cancelled by {}", job.job_id, caller);
            data(StatusCode::OK, &job)
        }
        (&Method::GET, ["videos", video_id, "jobs"]) => {
            let caller = http::require_caller(event)?;
            let limit = http::limit_param(event, 20, 100);
            let own: Vec<_> = jobs::list_by_video(dynamo, table, video_id, limit)
                .await?
                .into_iter()
                .filter(|job| job.user_id == caller)
                .collect();
            data(StatusCode::OK, &own)
        }

        // --- ADMIN ---
        (&Method::POST, ["admin", "login"]) => {
            let request: AdminLoginRequest = http::parse_body(event.body())?;
            let login = admin::login(
                dynamo,
                table,
                request.username.trim(),
                &request.password,
                state.config.admin_session_ttl_hours,
                now,
            )
            .await?;
            data(StatusCode::OK, &login)
        }
        (_, ["admin", ..]) => admin_route(event, state, method, parts, now).await,

        _ => Ok(None),
    }
}

/// Admin endpoints; every one of them needs a live session token.
async fn admin_route(
    event: &Request,
    state: &AppState,
    method: &Method,
    parts: &[&str],
    now: DateTime<Utc>,
) -> Routed {
    let dynamo = &state.dynamo_client;
    let table = state.table();

    let token = http::bearer_token(event)
        .ok_or_else(|| LinkHubError::Unauthorized("Missing admin session token".to_string()))?;
    let session = admin::authenticate(dynamo, table, &token, now).await?;

    match (method, parts) {
        (&Method::POST, ["admin", "logout"]) => {
            admin::logout(dynamo, table, &token).await?;
            tracing::info!("Admin {} logged out", session.admin_id);
            Ok(Some(Reply::NoContent))
        }
        (&Method::GET, ["admin", "sessions"]) => {
            let sessions = admin::list_sessions(dynamo, table, &session.admin_id).await?;
            data(StatusCode::OK, &sessions)
        }
        (&Method::GET, ["admin", "users"]) => {
            let limit = http::limit_param(event, 25, 100);
            let cursor = http::query_param(event, "cursor");
            data(
                StatusCode::OK,
                &users::list_users(dynamo, table, limit, cursor.as_deref()).await?,
            )
        }
        (&Method::PUT, ["admin", "users", user_id, "subscription"]) => {
            let request: UpdateSubscriptionRequest = http::parse_body(event.body())?;
            let status = request.status;
            let user = subscription::set_subscription(dynamo, table, user_id, request, now).await?;
            tracing::info!(
                "Admin {} set subscription for {} to {}",
                session.admin_id,
                user_id,
                status
            );
            data(StatusCode::OK, &user)
        }
        // GET /admin/jobs?status=failed&limit=&cursor=
        (&Method::GET, ["admin", "jobs"]) => {
            let status = http::query_param(event, "status")
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(LinkHubError::BadRequest)?;
            let limit = http::limit_param(event, 25, 100);
            let cursor = http::query_param(event, "cursor");
            data(
                StatusCode::OK,
                &jobs::list_by_status(dynamo, table, status, limit, cursor.as_deref()).await?,
            )
        }
        (&Method::POST, ["admin", "jobs", job_id, "retry"]) => {
            let job = ingestion::retry_failed(state, job_id).await?;
            data(StatusCode::ACCEPTED, &job)
        }
        (&Method::POST, ["admin", "jobs", job_id, "cancel"]) => {
            let job = jobs::cancel(dynamo, table, job_id, None).await?;
            tracing::info!("Job {} cancelled by admin {}", job.job_id, session.admin_id);
            data(StatusCode::OK, &job)
        }
        _ => Ok(None),
    }
}

fn subscription_view(user: linkhub_shared::types::User, now: DateTime<Utc>) -> SubscriptionView {
    let decision = subscription::evaluate(&user, now);
    SubscriptionView {
        status: decision.status,
        allowed: decision.allowed,
        reason: decision.reason,
        trial_end_date: user.trial_end_date,
        subscription_end_date: user.subscription_end_date,
    }
}

/// Paths that exist under some method; anything else is a 404.
fn is_known_route(parts: &[&str]) -> bool {
    matches!(
        parts,
        ["auth", "signup" | "confirm" | "signin" | "verify" | "refresh"]
            | ["users", _]
            | ["subscription"]
            | ["ingest"]
            | ["jobs", _]
            | ["jobs", _, "cancel"]
            | ["videos", _, "jobs"]
            | ["admin", "login" | "logout" | "sessions" | "users" | "jobs"]
            | ["admin", "users", _, "subscription"]
            | ["admin", "jobs", _, "retry" | "cancel"]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::{BehaviorVersion, Region, SdkConfig};
    use linkhub_shared::config::AppConfig;
    use linkhub_shared::types::User;

    fn state() -> Arc<AppState> {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        AppState::new(&sdk_config, AppConfig::default(), None)
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut builder = lambda_http::http::Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let body = if body.is_empty() {
            Body::Empty
        } else {
            Body::Text(body.to_string())
        };
        builder.body(body).unwrap()
    }

    fn signed_in(req: Request, sub: &str) -> Request {
        use lambda_http::aws_lambda_events::apigw::{
            ApiGatewayRequestAuthorizer, ApiGatewayRequestAuthorizerJwtDescription,
            ApiGatewayV2httpRequestContext,
        };
        use lambda_http::request::RequestContext;
        use lambda_http::RequestExt;

        let mut jwt = ApiGatewayRequestAuthorizerJwtDescription::default();
        jwt.claims.insert("sub".to_string(), sub.to_string());
        let context = ApiGatewayV2httpRequestContext {
            authorizer: Some(ApiGatewayRequestAuthorizer {
                jwt: Some(jwt),
                ..Default::default()
            }),
            ..Default::default()
        };
        req.with_request_context(RequestContext::ApiGatewayV2(context))
    }

    fn json_body(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_returns_cors_headers() {
        let resp = function_handler(request("OPTIONS", "/ingest", &[], ""), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "*");
        assert!(resp.headers().contains_key("Access-Control-Allow-Methods"));
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method() {
        let resp = function_handler(request("GET", "/projects", &[], ""), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = function_handler(request("GET", "/auth/signup", &[], ""), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

        let resp = function_handler(request("DELETE", "/users/me", &[], ""), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let resp = function_handler(request("POST", "/auth/signup", &[], "{"), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&resp)["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_user_routes_require_caller() {
        for (method, uri) in [("GET", "/users/me"), ("GET", "/subscription"), ("POST", "/jobs/j1/cancel")] {
            let resp = function_handler(request(method, uri, &[], ""), state())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[tokio::test]
    async fn test_ingest_validates_before_touching_aws() {
        let body = r#"{"video_id": "7301", "video_url": "ftp://example.com/v.mp4", "caption": "hi"}"#;
        let resp = function_handler(
            signed_in(request("POST", "/ingest", &[], body), "user-1"),
            state(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&resp)["message"], "video_url must be an http(s) URL");
    }

    #[tokio::test]
    async fn test_user_id_header_alone_is_not_a_caller() {
        let body = r#"{"video_id": "7301", "video_url": "https://www.tiktok.com/@a/video/7301"}"#;
        let resp = function_handler(
            request("POST", "/ingest", &[("X-User-Id", "user-1")], body),
            state(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_public_profile_rejects_invalid_handle() {
        let resp = function_handler(request("GET", "/users/a!", &[], ""), state())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_routes_require_session_token() {
        for (method, uri) in [
            ("GET", "/admin/users"),
            ("GET", "/admin/jobs"),
            ("POST", "/admin/jobs/j1/retry"),
            ("POST", "/admin/logout"),
        ] {
            let resp = function_handler(request(method, uri, &[], ""), state())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
        }
    }

    #[test]
    fn test_known_routes() {
        assert!(is_known_route(&["admin", "users", "u1", "subscription"]));
        assert!(is_known_route(&["videos", "v1", "jobs"]));
        assert!(!is_known_route(&["videos", "v1"]));
        assert!(!is_known_route(&[]));
    }

    #[test]
    fn test_subscription_view_reports_expired_trial() {
        let user = User {
            user_id: "u1".to_string(),
            cognito_user_id: "u1".to_string(),
            handle: "glowshop".to_string(),
            phone_number: "+14155550100".to_string(),
            subscription_status: SubscriptionStatus::Trial,
            trial_end_date: Some("2026-01-01T00:00:00Z".to_string()),
            subscription_end_date: None,
            display_name: None,
            bio: None,
            avatar_url: None,
            created_at: "2025-12-18T00:00:00Z".to_string(),
            updated_at: "2025-12-18T00:00:00Z".to_string(),
        };
        let now = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let view = subscription_view(user, now);
        assert!(!view.allowed);
        assert_eq!(view.status, SubscriptionStatus::Expired);
        assert_eq!(view.trial_end_date.as_deref(), Some("2026-01-01T00:00:00Z"));
    }
}
