use crate::dynamo::{self, s, Item, GSI1};
use crate::error::{LinkHubError, Result};
use crate::types::{Page, SubscriptionStatus, UpdateProfileRequest, User};
use aws_sdk_dynamodb::types::{Put, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Duration, Utc};

const PROFILE_SK: &str = "PROFILE";
const HANDLE_CLAIM_SK: &str = "CLAIM";
const MAX_DISPLAY_NAME: usize = 50;
const MAX_BIO: usize = 280;

pub fn user_to_item(user: &User) -> Item {
    let mut item = Item::new();
    item.insert("PK".to_string(), s(dynamo::user_pk(&user.user_id)));
    item.insert("SK".to_string(), s(PROFILE_SK));
    item.insert("GSI1PK".to_string(), s(dynamo::handle_key(&user.handle)));
    item.insert("GSI1SK".to_string(), s("USER"));
    item.insert("entity_type".to_string(), s("user"));
    item.insert("user_id".to_string(), s(&user.user_id));
    item.insert("cognito_user_id".to_string(), s(&user.cognito_user_id));
    item.insert("handle".to_string(), s(&user.handle));
    item.insert("phone_number".to_string(), s(&user.phone_number));
    item.insert(
        "subscription_status".to_string(),
        s(user.subscription_status.as_str()),
    );
    item.insert("created_at".to_string(), s(&user.created_at));
    item.insert("updated_at".to_string(), s(&user.updated_at));

    let optional = [
        ("trial_end_date", &user.trial_end_date),
        ("subscription_end_date", &user.subscription_end_date),
        ("display_name", &user.display_name),
        ("bio", &user.bio),
        ("avatar_url", &user.avatar_url),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            item.insert(key.to_string(), s(value));
        }
    }
    item
}

pub fn item_to_user(item: &Item) -> Result<User> {
    Ok(User {
        user_id: dynamo::require_s(item, "user_id")?,
        cognito_user_id: dynamo::get_s(item, "cognito_user_id").unwrap_or_default(),
        handle: dynamo::require_s(item, "handle")?,
        phone_number: dynamo::get_s(item, "phone_number").unwrap_or_default(),
        subscription_status: dynamo::get_parsed(item, "subscription_status")?,
        trial_end_date: dynamo::get_s(item, "trial_end_date"),
        subscription_end_date: dynamo::get_s(item, "subscription_end_date"),
        display_name: dynamo::get_s(item, "display_name"),
        bio: dynamo::get_s(item, "bio"),
        avatar_url: dynamo::get_s(item, "avatar_url"),
        created_at: dynamo::get_s(item, "created_at").unwrap_or_default(),
        updated_at: dynamo::get_s(item, "updated_at").unwrap_or_default(),
    })
}

/// Build the record for a newly confirmed user.
///
/// New users start a trial of `trial_days`; with no trial they stay `pending`
/// until an admin activates them.
pub fn new_user(sub: &str, handle: &str, phone_number: &str, trial_days: i64, now: DateTime<Utc>) -> User {
    let (status, trial_end_date) = if trial_days > 0 {
        (
            SubscriptionStatus::Trial,
            Some((now + Duration::days(trial_days)).to_rfc3339()),
        )
    } else {
        (SubscriptionStatus::Pending, None)
    };

    User {
        user_id: sub.to_string(),
        cognito_user_id: sub.to_string(),
        handle: handle.to_string(),
        phone_number: phone_number.to_string(),
        subscription_status: status,
        trial_end_date,
        subscription_end_date: None,
        display_name: None,
        bio: None,
        avatar_url: None,
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    }
}

pub async fn find_user(client: &DynamoClient, table_name: &str, user_id: &str) -> Result<Option<User>> {
    let pk = dynamo::user_pk(user_id);
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(pk))
        .key("SK", s(PROFILE_SK))
        .send()
        .await?;

    result.item().map(item_to_user).transpose()
}

pub async fn get_user(client: &DynamoClient, table_name: &str, user_id: &str) -> Result<User> {
    find_user(client, table_name, user_id)
        .await?
        .ok_or_else(|| LinkHubError::NotFound("User not found".to_string()))
}

pub async fn find_by_handle(client: &DynamoClient, table_name: &str, handle: &str) -> Result<Option<User>> {
    let result = client
        .query()
        .table_name(table_name)
        .index_name(GSI1)
        .key_condition_expression("GSI1PK = :pk AND GSI1SK = :sk")
        .expression_attribute_values(":pk", s(dynamo::handle_key(handle)))
        .expression_attribute_values(":sk", s("USER"))
        .limit(1)
        .send()
        .await?;

    result.items().first().map(item_to_user).transpose()
}

/// Create the user record after sign-up confirmation. Repeat calls return the stored user.
pub async fn create_from_signup(
    client: &DynamoClient,
    table_name: &str,
    sub: &str,
    handle: &str,
    phone_number: &str,
    trial_days: i64,
    now: DateTime<Utc>,
) -> Result<User> {
    if let Some(existing) = find_user(client, table_name, sub).await? {
        return Ok(existing);
    }

    let user = new_user(sub, handle, phone_number, trial_days, now);

    let mut claim = Item::new();
    claim.insert("PK".to_string(), s(dynamo::handle_key(handle)));
    claim.insert("SK".to_string(), s(HANDLE_CLAIM_SK));
    claim.insert("entity_type".to_string(), s("handle_claim"));
    claim.insert("user_id".to_string(), s(sub));

    // The claim item makes handles unique even when two sign-ups race past
    // the GSI check.
    let result = client
        .transact_write_items()
        .transact_items(
            TransactWriteItem::builder()
                .put(
                    Put::builder()
                        .table_name(table_name)
                        .set_item(Some(user_to_item(&user)))
                        .condition_expression("attribute_not_exists(PK)")
                        .build()?,
                )
                .build(),
        )
        .transact_items(
            TransactWriteItem::builder()
                .put(
                    Put::builder()
                        .table_name(table_name)
                        .set_item(Some(claim))
                        .condition_expression("attribute_not_exists(PK)")
                        .build()?,
                )
                .build(),
        )
        .send()
        .await;

    match result {
        Ok(_) => {
            tracing::info!(user_id = %sub, handle = %handle, status = %user.subscription_status, "User created");
            Ok(user)
        }
        Err(e) => {
            let cancelled = e
                .as_service_error()
                .map(|se| se.is_transaction_canceled_exception())
                .unwrap_or(false);
            if !cancelled {
                return Err(e.into());
            }
            match find_user(client, table_name, sub).await? {
                Some(existing) => Ok(existing),
                None => Err(LinkHubError::Conflict(format!(
                    "Handle @{} is already taken",
                    handle
                ))),
            }
        }
    }
}

fn validate_profile_update(req: &UpdateProfileRequest) -> Result<()> {
    if let Some(name) = &req.display_name {
        if name.chars().count() > MAX_DISPLAY_NAME {
            return Err(LinkHubError::BadRequest(format!(
                "Display name must be at most {} characters",
                MAX_DISPLAY_NAME
            )));
        }
    }
    if let Some(bio) = &req.bio {
        if bio.chars().count() > MAX_BIO {
            return Err(LinkHubError::BadRequest(format!(
                "Bio must be at most {} characters",
                MAX_BIO
            )));
        }
    }
    if let Some(url) = &req.avatar_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(LinkHubError::BadRequest(
                "Avatar URL must be an http(s) URL".to_string(),
            ));
        }
    }
    Ok(())
}

/// Update the caller's profile fields. The handle is immutable.
pub async fn update_profile(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    req: UpdateProfileRequest,
) -> Result<User> {
    validate_profile_update(&req)?;
    let pk = dynamo::user_pk(user_id);

    let mut update_expr = vec!["updated_at = :updated"];
    let mut expr_values = std::collections::HashMap::new();
    expr_values.insert(":updated".to_string(), s(Utc::now().to_rfc3339()));

    if let Some(display_name) = req.display_name {
        update_expr.push("display_name = :display_name");
        expr_values.insert(":display_name".to_string(), s(display_name));
    }
    if let Some(bio) = req.bio {
        update_expr.push("bio = :bio");
        expr_values.insert(":bio".to_string(), s(bio));
    }
    if let Some(avatar_url) = req.avatar_url {
        update_expr.push("avatar_url = :avatar_url");
        expr_values.insert(":avatar_url".to_string(), s(avatar_url));
    }

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", s(pk.clone()))
        .key("SK", s(PROFILE_SK))
        .update_expression(format!("SET {}", update_expr.join(", ")))
        .condition_expression("attribute_exists(PK)")
        .set_expression_attribute_values(Some(expr_values))
        .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
        .send()
        .await;

    match result {
        Ok(output) => output
            .attributes()
            .map(item_to_user)
            .transpose()?
            .ok_or_else(|| LinkHubError::NotFound("User not found".to_string())),
        Err(e) => {
            if e.as_service_error()
                .map(|se| se.is_conditional_check_failed_exception())
                .unwrap_or(false)
            {
                Err(LinkHubError::NotFound("User not found".to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

/// Page through all users (admin view).
pub async fn list_users(
    client: &DynamoClient,
    table_name: &str,
    limit: i32,
    cursor: Option<&str>,
) -> Result<Page<User>> {
    let mut request = client
        .scan()
        .table_name(table_name)
        .filter_expression("entity_type = :type")
        .expression_attribute_values(":type", s("user"))
        .limit(limit.clamp(1, 100));
    if let Some(cursor) = cursor {
        request = request.set_exclusive_start_key(Some(dynamo::decode_cursor(cursor)?));
    }

    let result = request.send().await?;
    let items = result
        .items()
        .iter()
        .map(item_to_user)
        .collect::<Result<Vec<_>>>()?;
    let next_cursor = result
        .last_evaluated_key()
        .map(dynamo::encode_cursor)
        .transpose()?;

    Ok(Page { items, next_cursor })
}
