use crate::error::{LinkHubError, Result};
use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;

#[derive(Deserialize)]
struct ClientSecretDocument {
    client_secret: String,
}

/// Resolve the Cognito app client secret.
///
/// A value set directly in the environment wins; otherwise the secret is read
/// from Secrets Manager. The secret string may be the raw value or a JSON
/// document with a `client_secret` field.
pub async fn resolve_client_secret(
    client: &SecretsClient,
    direct: Option<&str>,
    secret_arn: Option<&str>,
) -> Result<Option<String>> {
    if let Some(secret) = direct {
        return Ok(Some(secret.to_string()));
    }
    let Some(arn) = secret_arn else {
        return Ok(None);
    };

    let output = client.get_secret_value().secret_id(arn).send().await?;
    let raw = output
        .secret_string()
        .ok_or_else(|| LinkHubError::Config(format!("secret {} has no string value", arn)))?;

    tracing::info!("Loaded Cognito client secret from Secrets Manager");
    Ok(Some(parse_secret_string(raw)))
}

fn parse_secret_string(raw: &str) -> String {
    match serde_json::from_str::<ClientSecretDocument>(raw) {
        Ok(doc) => doc.client_secret,
        Err(_) => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_string() {
        assert_eq!(parse_secret_string("abc123\n"), "abc123");
        assert_eq!(
            parse_secret_string(r#"{"client_secret": "s3cr3t", "client_id": "x"}"#),
            "s3cr3t"
        );
    }
}
