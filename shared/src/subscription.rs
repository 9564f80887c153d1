use crate::dynamo::{self, s};
use crate::error::{LinkHubError, Result};
use crate::types::{SubscriptionStatus, UpdateSubscriptionRequest, User};
use crate::users;
use aws_sdk_dynamodb::types::ReturnValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub allowed: bool,
    /// Status the user should have after this check.
    pub status: SubscriptionStatus,
    /// Set when the stored status is stale and must be persisted.
    pub transition: Option<SubscriptionStatus>,
    pub reason: &'static str,
}

impl GuardDecision {
    fn allow(status: SubscriptionStatus) -> Self {
        Self {
            allowed: true,
            status,
            transition: None,
            reason: "Subscription is valid",
        }
    }

    fn deny(status: SubscriptionStatus, reason: &'static str) -> Self {
        Self {
            allowed: false,
            status,
            transition: None,
            reason,
        }
    }

    fn expire(reason: &'static str) -> Self {
        Self {
            allowed: false,
            status: SubscriptionStatus::Expired,
            transition: Some(SubscriptionStatus::Expired),
            reason,
        }
    }
}

fn parse_date(value: Option<&str>) -> Option<Option<DateTime<Utc>>> {
    match value {
        None => Some(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|d| Some(d.with_timezone(&Utc))),
    }
}

/// Decide whether `user` may use paid features at `now`.
pub fn evaluate(user: &User, now: DateTime<Utc>) -> GuardDecision {
    match user.subscription_status {
        SubscriptionStatus::Pending => GuardDecision::deny(
            SubscriptionStatus::Pending,
            "Subscription is pending activation",
        ),
        SubscriptionStatus::Expired => {
            GuardDecision::deny(SubscriptionStatus::Expired, "Subscription has expired")
        }
        SubscriptionStatus::Trial => match parse_date(user.trial_end_date.as_deref()) {
            Some(Some(end)) if end > now => GuardDecision::allow(SubscriptionStatus::Trial),
            Some(Some(_)) => GuardDecision::expire("Trial period has ended"),
            _ => GuardDecision::deny(SubscriptionStatus::Trial, "Trial end date is missing"),
        },
        SubscriptionStatus::Active => match parse_date(user.subscription_end_date.as_deref()) {
            Some(None) => GuardDecision::allow(SubscriptionStatus::Active),
            Some(Some(end)) if end > now => GuardDecision::allow(SubscriptionStatus::Active),
            Some(Some(_)) => GuardDecision::expire("Subscription has expired"),
            None => GuardDecision::deny(
                SubscriptionStatus::Active,
                "Subscription end date is invalid",
            ),
        },
    }
}

/// Apply the guard: persist any expiry transition and reject denied users.
pub async fn enforce(
    client: &DynamoClient,
    table_name: &str,
    mut user: User,
    now: DateTime<Utc>,
) -> Result<User> {
    let decision = evaluate(&user, now);

    if let Some(next) = decision.transition {
        let result = client
            .update_item()
            .table_name(table_name)
            .key("PK", s(dynamo::user_pk(&user.user_id)))
            .key("SK", s("PROFILE"))
            .update_expression("SET subscription_status = :next, updated_at = :updated")
            .condition_expression("subscription_status = :previous")
            .expression_attribute_values(":next", s(next.as_str()))
            .expression_attribute_values(":previous", s(user.subscription_status.as_str()))
            .expression_attribute_values(":updated", s(now.to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    "Subscription for user {} moved {} -> {}",
                    user.user_id,
                    user.subscription_status,
                    next
                );
            }
            Err(e) => {
                let lost_race = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if !lost_race {
                    return Err(e.into());
                }
                tracing::info!(
                    "Subscription for user {} already changed by another request",
                    user.user_id
                );
            }
        }
        user.subscription_status = next;
        user.updated_at = now.to_rfc3339();
    }

    if !decision.allowed {
        tracing::warn!(
            "Subscription guard denied user {}: {}",
            user.user_id,
            decision.reason
        );
        return Err(LinkHubError::PaymentRequired(decision.reason.to_string()));
    }
    Ok(user)
}

fn validate_override(req: &UpdateSubscriptionRequest, now: DateTime<Utc>) -> Result<()> {
    let bad_date = |field: &str| LinkHubError::BadRequest(format!("{} must be an RFC 3339 timestamp", field));

    match req.status {
        SubscriptionStatus::Active => {
            if let Some(end) = &req.subscription_end_date {
                let end = DateTime::parse_from_rfc3339(end)
                    .map_err(|_| bad_date("subscription_end_date"))?;
                if end.with_timezone(&Utc) <= now {
                    return Err(LinkHubError::BadRequest(
                        "subscription_end_date must be in the future".to_string(),
                    ));
                }
            }
        }
        SubscriptionStatus::Trial => {
            let end = req.trial_end_date.as_deref().ok_or_else(|| {
                LinkHubError::BadRequest("trial_end_date is required for trial status".to_string())
            })?;
            DateTime::parse_from_rfc3339(end).map_err(|_| bad_date("trial_end_date"))?;
        }
        SubscriptionStatus::Pending | SubscriptionStatus::Expired => {}
    }
    Ok(())
}

/// Admin override of a user's subscription.
pub async fn set_subscription(
    client: &DynamoClient,
    table_name: &str,
    user_id: &str,
    req: UpdateSubscriptionRequest,
    now: DateTime<Utc>,
) -> Result<User> {
    validate_override(&req, now)?;

    let mut set_parts = vec!["subscription_status = :status", "updated_at = :updated"];
    let mut remove_parts = Vec::new();
    let mut request = client
        .update_item()
        .table_name(table_name)
        .key("PK", s(dynamo::user_pk(user_id)))
        .key("SK", s("PROFILE"))
        .condition_expression("attribute_exists(PK)")
        .expression_attribute_values(":status", s(req.status.as_str()))
        .expression_attribute_values(":updated", s(now.to_rfc3339()));

    if let Some(end) = req.trial_end_date {
        set_parts.push("trial_end_date = :trial_end");
        request = request.expression_attribute_values(":trial_end", s(end));
    }
    match req.subscription_end_date {
        Some(end) => {
            set_parts.push("subscription_end_date = :sub_end");
            request = request.expression_attribute_values(":sub_end", s(end));
        }
        None if req.status == SubscriptionStatus::Active => {
            remove_parts.push("subscription_end_date");
        }
        None => {}
    }

    let mut update_expression = format!("SET {}", set_parts.join(", "));
    if !remove_parts.is_empty() {
        update_expression.push_str(&format!(" REMOVE {}", remove_parts.join(", ")));
    }

    let result = request
        .update_expression(update_expression)
        .return_values(ReturnValue::AllNew)
        .send()
        .await;

    match result {
        Ok(output) => {
            tracing::info!("Admin set subscription for user {} to {}", user_id, req.status);
            output
                .attributes()
                .map(users::item_to_user)
                .transpose()?
                .ok_or_else(|| LinkHubError::NotFound("User not found".to_string()))
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap()
    }

    fn user(status: SubscriptionStatus, trial_end: Option<DateTime<Utc>>, sub_end: Option<DateTime<Utc>>) -> User {
        let mut user = users::new_user("u1", "glowshop", "+14155551234", 0, now());
        user.subscription_status = status;
        user.trial_end_date = trial_end.map(|d| d.to_rfc3339());
        user.subscription_end_date = sub_end.map(|d| d.to_rfc3339());
        user
    }

    #[test]
    fn test_pending_and_expired_are_denied() {
        let decision = evaluate(&user(SubscriptionStatus::Pending, None, None), now());
        assert!(!decision.allowed);
        assert!(decision.transition.is_none());

        let decision = evaluate(&user(SubscriptionStatus::Expired, None, None), now());
        assert!(!decision.allowed);
        assert_eq!(decision.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn test_trial_allowed_until_end() {
        let running = user(SubscriptionStatus::Trial, Some(now() + Duration::days(3)), None);
        assert!(evaluate(&running, now()).allowed);

        let ended = user(SubscriptionStatus::Trial, Some(now() - Duration::seconds(1)), None);
        let decision = evaluate(&ended, now());
        assert!(!decision.allowed);
        assert_eq!(decision.transition, Some(SubscriptionStatus::Expired));
    }

    #[test]
    fn test_trial_without_end_is_denied_without_transition() {
        let decision = evaluate(&user(SubscriptionStatus::Trial, None, None), now());
        assert!(!decision.allowed);
        assert!(decision.transition.is_none());
    }

    #[test]
    fn test_active_subscription() {
        assert!(evaluate(&user(SubscriptionStatus::Active, None, None), now()).allowed);
        assert!(
            evaluate(
                &user(SubscriptionStatus::Active, None, Some(now() + Duration::days(30))),
                now()
            )
            .allowed
        );

        let lapsed = user(SubscriptionStatus::Active, None, Some(now() - Duration::days(1)));
        let decision = evaluate(&lapsed, now());
        assert!(!decision.allowed);
        assert_eq!(decision.transition, Some(SubscriptionStatus::Expired));
    }

    #[test]
    fn test_active_with_garbage_end_date_is_denied() {
        let mut bad = user(SubscriptionStatus::Active, None, None);
        bad.subscription_end_date = Some("next tuesday".to_string());
        let decision = evaluate(&bad, now());
        assert!(!decision.allowed);
        assert!(decision.transition.is_none());
    }

    #[test]
    fn test_validate_override() {
        let past = UpdateSubscriptionRequest {
            status: SubscriptionStatus::Active,
            trial_end_date: None,
            subscription_end_date: Some((now() - Duration::days(1)).to_rfc3339()),
        };
        assert!(validate_override(&past, now()).is_err());

        let open_ended = UpdateSubscriptionRequest {
            status: SubscriptionStatus::Active,
            trial_end_date: None,
            subscription_end_date: None,
        };
        assert!(validate_override(&open_ended, now()).is_ok());

        let trial_without_end = UpdateSubscriptionRequest {
            status: SubscriptionStatus::Trial,
            trial_end_date: None,
            subscription_end_date: None,
        };
        assert!(validate_override(&trial_without_end, now()).is_err());

        let expire = UpdateSubscriptionRequest {
            status: SubscriptionStatus::Expired,
            trial_end_date: None,
            subscription_end_date: None,
        };
        assert!(validate_override(&expire, now()).is_ok());
    }
}
