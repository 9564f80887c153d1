//! Response plumbing shared by the HTTP functions.

use crate::error::{LinkHubError, Result};
use lambda_http::{http::StatusCode, Body, Error, Request, RequestExt, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::OnceLock;

static CORS_ORIGIN: OnceLock<String> = OnceLock::new();
static DEV_USER_HEADER: OnceLock<bool> = OnceLock::new();

/// Set the `Access-Control-Allow-Origin` value once at cold start.
pub fn set_cors_origin(origin: &str) {
    let _ = CORS_ORIGIN.set(origin.to_string());
}

fn cors_origin() -> &'static str {
    CORS_ORIGIN.get().map(String::as_str).unwrap_or("*")
}

/// Allow `X-User-Id` to stand in for missing JWT claims. Off unless set.
pub fn set_dev_user_header(allowed: bool) {
    let _ = DEV_USER_HEADER.set(allowed);
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    success: bool,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    message: String,
}

/// Successful JSON response wrapped as `{"success": true, "data": ...}`.
pub fn success<T: Serialize>(status: StatusCode, data: &T) -> std::result::Result<Response<Body>, Error> {
    let body = serde_json::to_string(&Envelope {
        success: true,
        data,
    })?;
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", cors_origin())
        .body(body.into())
        .map_err(Box::new)?)
}

/// JSON response without the success envelope.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> std::result::Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", cors_origin())
        .body(serde_json::to_string(body)?.into())
        .map_err(Box::new)?)
}

pub fn no_content() -> std::result::Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", cors_origin())
        .body(Body::Empty)
        .map_err(Box::new)?)
}

pub fn error_response(err: &LinkHubError) -> std::result::Result<Response<Body>, Error> {
    if err.is_internal() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::warn!(error = %err, "Request rejected");
    }

    let body = ErrorResponse {
        error: err.code(),
        message: err.public_message(),
    };
    Ok(Response::builder()
        .status(err.status_code())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", cors_origin())
        .body(serde_json::to_string(&body)?.into())
        .map_err(Box::new)?)
}

/// Turn a service result into a response: `Ok` with `status`, `Err` via [`error_response`].
pub fn respond<T: Serialize>(
    status: StatusCode,
    result: Result<T>,
) -> std::result::Result<Response<Body>, Error> {
    match result {
        Ok(data) => success(status, &data),
        Err(err) => error_response(&err),
    }
}

pub fn preflight() -> std::result::Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", cors_origin())
        .header(
            "Access-Control-Allow-Methods",
            "GET,POST,PUT,PATCH,DELETE,OPTIONS",
        )
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type,Authorization,X-User-Id",
        )
        .body(Body::Empty)
        .map_err(Box::new)?)
}

pub fn not_found() -> std::result::Result<Response<Body>, Error> {
    error_response(&LinkHubError::NotFound("Not found".to_string()))
}

pub fn method_not_allowed() -> std::result::Result<Response<Body>, Error> {
    let body = ErrorResponse {
        error: "MethodNotAllowed",
        message: "Method not allowed".to_string(),
    };
    Ok(Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", cors_origin())
        .body(serde_json::to_string(&body)?.into())
        .map_err(Box::new)?)
}

pub fn parse_body<T: DeserializeOwned>(body: &Body) -> Result<T> {
    let bytes: &[u8] = match body {
        Body::Text(text) => text.as_bytes(),
        Body::Binary(bytes) => bytes.as_slice(),
        Body::Empty => b"",
    };
    serde_json::from_slice(bytes)
        .map_err(|e| LinkHubError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Caller's Cognito `sub`.
///
/// HTTP APIs with a JWT authorizer put the claims in
/// `requestContext.authorizer.jwt.claims`. `X-User-Id` is only read when there
/// are no claims and the dev header has been enabled.
pub fn caller_id(event: &Request) -> Option<String> {
    resolve_caller(event, DEV_USER_HEADER.get().copied().unwrap_or(false))
}

fn resolve_caller(event: &Request, allow_dev_header: bool) -> Option<String> {
    let claimed = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|auth| auth.jwt.as_ref())
        .and_then(|jwt| jwt.claims.get("sub"))
        .map(|s| s.to_string());
    if claimed.is_some() || !allow_dev_header {
        return claimed;
    }
    event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn require_caller(event: &Request) -> Result<String> {
    caller_id(event).ok_or_else(|| LinkHubError::Unauthorized("Missing caller identity".to_string()))
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(event: &Request) -> Option<String> {
    event
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn query_param(event: &Request, name: &str) -> Option<String> {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(name))
        .map(|v| v.to_string())
}

/// `limit` query parameter clamped to `1..=max`.
pub fn limit_param(event: &Request, default: i32, max: i32) -> i32 {
    query_param(event, "limit")
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(default)
        .clamp(1, max)
}

/// Path split into its non-empty segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_http::http;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method("GET").uri("/users/me");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::Empty).unwrap()
    }

    fn with_sub(req: Request, sub: &str) -> Request {
        use lambda_http::aws_lambda_events::apigw::{
            ApiGatewayRequestAuthorizer, ApiGatewayRequestAuthorizerJwtDescription,
            ApiGatewayV2httpRequestContext,
        };
        use lambda_http::request::RequestContext;

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

    #[test]
    fn test_caller_id_from_claims() {
        let req = with_sub(request(&[]), "user-7");
        assert_eq!(caller_id(&req).as_deref(), Some("user-7"));
        assert!(require_caller(&request(&[])).is_err());
    }

    #[test]
    fn test_claims_win_over_user_header() {
        let req = with_sub(request(&[("X-User-Id", "someone-else")]), "user-7");
        assert_eq!(resolve_caller(&req, true).as_deref(), Some("user-7"));
        assert_eq!(resolve_caller(&req, false).as_deref(), Some("user-7"));
    }

    #[test]
    fn test_user_header_needs_dev_flag() {
        let req = request(&[("X-User-Id", "user-42")]);
        assert_eq!(resolve_caller(&req, false), None);
        assert_eq!(resolve_caller(&req, true).as_deref(), Some("user-42"));
        assert!(caller_id(&req).is_none());
    }

    #[test]
    fn test_bearer_token() {
        let req = request(&[("Authorization", "Bearer abc123")]);
        assert_eq!(bearer_token(&req).as_deref(), Some("abc123"));
        assert!(bearer_token(&request(&[("Authorization", "Basic xyz")])).is_none());
        assert!(bearer_token(&request(&[("Authorization", "Bearer  ")])).is_none());
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let err = parse_body::<crate::types::SigninRequest>(&Body::Text("{".into())).unwrap_err();
        assert!(matches!(err, LinkHubError::BadRequest(_)));

        let ok: crate::types::SigninRequest =
            parse_body(&Body::Text(r#"{"phone_number": "+14155550100"}"#.into())).unwrap();
        assert_eq!(ok.phone_number, "+14155550100");
    }

    #[test]
    fn test_envelope_and_error_bodies() {
        let resp = success(StatusCode::CREATED, &serde_json::json!({"id": "p1"})).unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], "p1");

        let resp = error_response(&LinkHubError::Aws("boom".into())).unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["error"], "InternalError");
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(
            path_segments("/sellers/glowshop/products/"),
            vec!["sellers", "glowshop", "products"]
        );
        assert!(path_segments("/").is_empty());
    }
}
