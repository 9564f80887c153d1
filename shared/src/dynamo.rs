//! Single-table key layout and `AttributeValue` helpers.

use crate::error::{LinkHubError, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;

pub type Item = HashMap<String, AttributeValue>;

pub const GSI1: &str = "GSI1";
pub const GSI2: &str = "GSI2";

pub fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

pub fn handle_key(handle: &str) -> String {
    format!("HANDLE#{}", handle)
}

pub fn admin_pk(username: &str) -> String {
    format!("ADMIN#{}", username)
}

pub fn admin_session_pk(session_id: &str) -> String {
    format!("ADMIN_SESSION#{}", session_id)
}

pub fn job_pk(job_id: &str) -> String {
    format!("JOB#{}", job_id)
}

pub fn video_key(video_id: &str) -> String {
    format!("VIDEO#{}", video_id)
}

pub fn product_pk(product_id: &str) -> String {
    format!("PRODUCT#{}", product_id)
}

pub fn seller_key(handle: &str) -> String {
    format!("SELLER#{}", handle)
}

pub fn tag_pk(tag: &str) -> String {
    format!("TAG#{}", tag)
}

pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// String list; an empty list is stored as an empty `L` because `SS` cannot be empty.
pub fn string_list(values: &[String]) -> AttributeValue {
    AttributeValue::L(values.iter().map(|v| s(v.clone())).collect())
}

pub fn json<T: serde::Serialize>(value: &T) -> Result<AttributeValue> {
    Ok(s(serde_json::to_string(value)?))
}

pub fn get_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

pub fn require_s(item: &Item, key: &str) -> Result<String> {
    get_s(item, key)
        .ok_or_else(|| LinkHubError::Internal(format!("item is missing attribute {}", key)))
}

pub fn get_n<T: std::str::FromStr>(item: &Item, key: &str) -> Option<T> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<T>().ok())
}

pub fn get_string_list(item: &Item, key: &str) -> Vec<String> {
    match item.get(key) {
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .collect(),
        Some(AttributeValue::Ss(values)) => values.clone(),
        _ => Vec::new(),
    }
}

pub fn get_json<T: serde::de::DeserializeOwned>(item: &Item, key: &str) -> Result<Option<T>> {
    match get_s(item, key) {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn get_parsed<T>(item: &Item, key: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    require_s(item, key)?
        .parse()
        .map_err(|e: String| LinkHubError::Internal(format!("invalid {}: {}", key, e)))
}

/// Encode a `LastEvaluatedKey` as an opaque cursor for API clients.
pub fn encode_cursor(key: &Item) -> Result<String> {
    let plain: HashMap<&str, &str> = key
        .iter()
        .filter_map(|(k, v)| v.as_s().ok().map(|s| (k.as_str(), s.as_str())))
        .collect();
    let raw = serde_json::to_vec(&plain)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(raw))
}

/// Decode a cursor produced by [`encode_cursor`] back into an `ExclusiveStartKey`.
pub fn decode_cursor(cursor: &str) -> Result<Item> {
    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| LinkHubError::BadRequest("Invalid cursor".to_string()))?;
    let plain: HashMap<String, String> = serde_json::from_slice(&raw)
        .map_err(|_| LinkHubError::BadRequest("Invalid cursor".to_string()))?;
    Ok(plain.into_iter().map(|(k, v)| (k, s(v))).collect())
}
