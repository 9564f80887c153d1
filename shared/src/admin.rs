use crate::dynamo::{self, n, s, Item, GSI1};
use crate::error::{LinkHubError, Result};
use crate::types::{AdminLoginResponse, AdminSession};
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use aws_sdk_dynamodb::types::{DeleteRequest, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::LazyLock;

const PROFILE_SK: &str = "PROFILE";
const SESSION_SK: &str = "SESSION";
const TOKEN_LENGTH: usize = 48;
const BATCH_SIZE: usize = 25;
const MAX_UNPROCESSED_RETRIES: usize = 3;

/// Verified against when the username is unknown, so a miss costs one argon2 run.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(b"linkhub-unknown-admin", &salt)
        .map(|hash| hash.to_string())
        .ok()
});

/// Hash a password as an argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    if password.len() < 12 {
        return Err(LinkHubError::BadRequest(
            "Admin passwords must be at least 12 characters".to_string(),
        ));
    }
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LinkHubError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored admin password hash is malformed: {}", e);
            false
        }
    }
}

pub fn generate_session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn new_session(admin_id: &str, ttl_hours: i64, now: DateTime<Utc>) -> AdminSession {
    AdminSession {
        session_id: generate_session_token(),
        admin_id: admin_id.to_string(),
        created_at: now.to_rfc3339(),
        expires_at: (now + Duration::hours(ttl_hours)).to_rfc3339(),
        last_seen_at: now.to_rfc3339(),
    }
}

pub fn session_to_item(session: &AdminSession) -> Result<Item> {
    let expires = DateTime::parse_from_rfc3339(&session.expires_at)
        .map_err(|e| LinkHubError::Internal(format!("invalid session expiry: {}", e)))?;

    let mut item = Item::new();
    item.insert("PK".to_string(), s(dynamo::admin_session_pk(&session.session_id)));
    item.insert("SK".to_string(), s(SESSION_SK));
    item.insert("GSI1PK".to_string(), s(dynamo::admin_pk(&session.admin_id)));
    item.insert("GSI1SK".to_string(), s(format!("SESSION#{}", session.created_at)));
    item.insert("entity_type".to_string(), s("admin_session"));
    item.insert("session_id".to_string(), s(&session.session_id));
    item.insert("admin_id".to_string(), s(&session.admin_id));
    item.insert("created_at".to_string(), s(&session.created_at));
    item.insert("expires_at".to_string(), s(&session.expires_at));
    item.insert("last_seen_at".to_string(), s(&session.last_seen_at));
    item.insert("ttl".to_string(), n(expires.timestamp()));
    Ok(item)
}

pub fn item_to_session(item: &Item) -> Result<AdminSession> {
    Ok(AdminSession {
        session_id: dynamo::require_s(item, "session_id")?,
        admin_id: dynamo::require_s(item, "admin_id")?,
        created_at: dynamo::get_s(item, "created_at").unwrap_or_default(),
        expires_at: dynamo::require_s(item, "expires_at")?,
        last_seen_at: dynamo::get_s(item, "last_seen_at").unwrap_or_default(),
    })
}

fn is_expired(session: &AdminSession, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(&session.expires_at) {
        Ok(expires) => expires.with_timezone(&Utc) <= now,
        Err(_) => true,
    }
}

/// Store an admin account with an already-hashed password.
pub async fn put_admin(
    client: &DynamoClient,
    table_name: &str,
    username: &str,
    password_hash: &str,
) -> Result<()> {
    client
        .put_item()
        .table_name(table_name)
        .item("PK", s(dynamo::admin_pk(username)))
        .item("SK", s(PROFILE_SK))
        .item("entity_type", s("admin"))
        .item("username", s(username))
        .item("password_hash", s(password_hash))
        .item("created_at", s(Utc::now().to_rfc3339()))
        .send()
        .await?;
    Ok(())
}

pub async fn login(
    client: &DynamoClient,
    table_name: &str,
    username: &str,
    password: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<AdminLoginResponse> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(dynamo::admin_pk(username)))
        .key("SK", s(PROFILE_SK))
        .send()
        .await?;

    let stored_hash = result
        .item()
        .and_then(|item| dynamo::get_s(item, "password_hash"));
    if !check_credentials(stored_hash.as_deref(), password) {
        tracing::warn!("Admin login failed for {}", username);
        return Err(LinkHubError::Unauthorized("Invalid credentials".to_string()));
    }

    let session = new_session(username, ttl_hours, now);
    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(session_to_item(&session)?))
        .send()
        .await?;

    tracing::info!("Admin {} logged in", username);
    Ok(AdminLoginResponse {
        token: session.session_id,
        expires_at: session.expires_at,
    })
}

fn check_credentials(stored_hash: Option<&str>, password: &str) -> bool {
    match stored_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_password(password, dummy);
            }
            false
        }
    }
}

/// Resolve a bearer token to a live session and record activity.
pub async fn authenticate(
    client: &DynamoClient,
    table_name: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<AdminSession> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(dynamo::admin_session_pk(token)))
        .key("SK", s(SESSION_SK))
        .send()
        .await?;

    let mut session = result
        .item()
        .map(item_to_session)
        .transpose()?
        .ok_or_else(|| LinkHubError::Unauthorized("Invalid session".to_string()))?;

    if is_expired(&session, now) {
        return Err(LinkHubError::Unauthorized("Session expired".to_string()));
    }

    session.last_seen_at = now.to_rfc3339();
    let touched = client
        .update_item()
        .table_name(table_name)
        .key("PK", s(dynamo::admin_session_pk(token)))
        .key("SK", s(SESSION_SK))
        .update_expression("SET last_seen_at = :seen")
        .condition_expression("attribute_exists(PK)")
        .expression_attribute_values(":seen", s(&session.last_seen_at))
        .send()
        .await;

    match touched {
        Ok(_) => Ok(session),
        Err(e) => {
            // Logged out between the read and the update.
            if e.as_service_error()
                .map(|se| se.is_conditional_check_failed_exception())
                .unwrap_or(false)
            {
                Err(LinkHubError::Unauthorized("Invalid session".to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

pub async fn logout(client: &DynamoClient, table_name: &str, token: &str) -> Result<()> {
    client
        .delete_item()
        .table_name(table_name)
        .key("PK", s(dynamo::admin_session_pk(token)))
        .key("SK", s(SESSION_SK))
        .send()
        .await?;
    Ok(())
}

pub async fn list_sessions(
    client: &DynamoClient,
    table_name: &str,
    admin_id: &str,
) -> Result<Vec<AdminSession>> {
    let result = client
        .query()
        .table_name(table_name)
        .index_name(GSI1)
        .key_condition_expression("GSI1PK = :pk AND begins_with(GSI1SK, :prefix)")
        .expression_attribute_values(":pk", s(dynamo::admin_pk(admin_id)))
        .expression_attribute_values(":prefix", s("SESSION#"))
        .scan_index_forward(false)
        .send()
        .await?;

    result.items().iter().map(item_to_session).collect()
}

/// Delete every session that expired before `now`. Returns how many were removed.
pub async fn cleanup_expired(
    client: &DynamoClient,
    table_name: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut expired_keys: Vec<String> = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let result = client
            .scan()
            .table_name(table_name)
            .filter_expression("entity_type = :type AND #ttl <= :now")
            .projection_expression("PK")
            .expression_attribute_names("#ttl", "ttl")
            .expression_attribute_values(":type", s("admin_session"))
            .expression_attribute_values(":now", n(now.timestamp()))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await?;

        expired_keys.extend(
            result
                .items()
                .iter()
                .filter_map(|item| dynamo::get_s(item, "PK")),
        );

        match result.last_evaluated_key() {
            Some(key) => start_key = Some(key.clone()),
            None => break,
        }
    }

    for requests in delete_batches(&expired_keys)? {
        delete_batch(client, table_name, requests).await?;
    }

    tracing::info!("Removed {} expired admin sessions", expired_keys.len());
    Ok(expired_keys.len())
}

/// Session deletes grouped into `BatchWriteItem`-sized requests.
fn delete_batches(session_pks: &[String]) -> Result<Vec<Vec<WriteRequest>>> {
    session_pks
        .chunks(BATCH_SIZE)
        .map(|chunk| {
            chunk
                .iter()
                .map(|pk| -> Result<WriteRequest> {
                    Ok(WriteRequest::builder()
                        .delete_request(
                            DeleteRequest::builder()
                                .key("PK", s(pk))
                                .key("SK", s(SESSION_SK))
                                .build()?,
                        )
                        .build())
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

async fn delete_batch(
    client: &DynamoClient,
    table_name: &str,
    mut requests: Vec<WriteRequest>,
) -> Result<()> {
    for _ in 0..MAX_UNPROCESSED_RETRIES {
        let output = client
            .batch_write_item()
            .request_items(table_name, requests)
            .send()
            .await?;

        requests = output
            .unprocessed_items()
            .and_then(|items| items.get(table_name))
            .cloned()
            .unwrap_or_default();
        if requests.is_empty() {
            return Ok(());
        }
        tracing::warn!("{} session deletes unprocessed, retrying", requests.len());
    }
    Err(LinkHubError::Aws(format!(
        "{} session deletes still unprocessed",
        requests.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_unknown_admin_still_runs_argon2() {
        let dummy = DUMMY_HASH.as_deref().unwrap();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(!check_credentials(None, "correct horse battery"));

        let hash = hash_password("correct horse battery").unwrap();
        assert!(check_credentials(Some(&hash), "correct horse battery"));
        assert!(!check_credentials(Some(&hash), "linkhub-unknown-admin"));
    }

    #[test]
    fn test_delete_batches_respect_write_limit() {
        let keys = |count: usize| -> Vec<String> {
            (0..count).map(|i| dynamo::admin_session_pk(&format!("s{}", i))).collect()
        };

        assert!(delete_batches(&keys(0)).unwrap().is_empty());

        let sizes: Vec<usize> = delete_batches(&keys(25)).unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![25]);

        let batches = delete_batches(&keys(26)).unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![25, 1]);

        let last = batches[1][0].delete_request().unwrap();
        assert_eq!(dynamo::get_s(last.key(), "PK").as_deref(), Some("ADMIN_SESSION#s25"));
        assert_eq!(dynamo::get_s(last.key(), "SK").as_deref(), Some("SESSION"));
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(
            hash_password("short"),
            Err(LinkHubError::BadRequest(_))
        ));
    }

    #[test]
    fn test_session_tokens_are_random() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_item_carries_ttl() {
        let session = new_session("ops", 12, now());
        let item = session_to_item(&session).unwrap();
        let expected_ttl = (now() + Duration::hours(12)).timestamp();

        assert_eq!(dynamo::get_n::<i64>(&item, "ttl"), Some(expected_ttl));
        assert_eq!(dynamo::get_s(&item, "GSI1PK").as_deref(), Some("ADMIN#ops"));
        let back = item_to_session(&item).unwrap();
        assert_eq!(back.session_id, session.session_id);
    }

    #[test]
    fn test_session_expiry() {
        let session = new_session("ops", 12, now());
        assert!(!is_expired(&session, now() + Duration::hours(11)));
        assert!(is_expired(&session, now() + Duration::hours(12)));

        let mut broken = session.clone();
        broken.expires_at = "soon".to_string();
        assert!(is_expired(&broken, now()));
    }
}
