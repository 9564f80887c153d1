pub mod admin;
pub mod auth;
pub mod caption;
pub mod challenge;
pub mod config;
pub mod dynamo;
pub mod error;
pub mod http;
pub mod ingestion;
pub mod jobs;
pub mod notify;
pub mod pipeline;
pub mod products;
pub mod secrets;
pub mod subscription;
pub mod tagging;
pub mod thumbnails;
pub mod types;
pub mod users;

use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_secretsmanager::Client as SecretsClient;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use config::AppConfig;
use std::sync::Arc;

/// Shared application state, built once per cold start.
pub struct AppState {
    pub cognito_client: CognitoClient,
    pub dynamo_client: DynamoClient,
    pub s3_client: S3Client,
    pub sqs_client: SqsClient,
    pub sns_client: SnsClient,
    pub config: AppConfig,
    /// Cognito app client secret, resolved from the environment or Secrets Manager.
    pub client_secret: Option<String>,
}

impl AppState {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        config: AppConfig,
        client_secret: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cognito_client: CognitoClient::new(sdk_config),
            dynamo_client: DynamoClient::new(sdk_config),
            s3_client: S3Client::new(sdk_config),
            sqs_client: SqsClient::new(sdk_config),
            sns_client: SnsClient::new(sdk_config),
            config,
            client_secret,
        })
    }

    /// Load AWS and application configuration from the Lambda environment.
    pub async fn from_env() -> error::Result<Arc<Self>> {
        let sdk_config = aws_config::load_from_env().await;
        let config = AppConfig::from_env();
        let client_secret = secrets::resolve_client_secret(
            &SecretsClient::new(&sdk_config),
            config.cognito_client_secret.as_deref(),
            config.cognito_client_secret_arn.as_deref(),
        )
        .await?;
        http::set_cors_origin(&config.cors_allow_origin);
        http::set_dev_user_header(config.allow_dev_user_header);
        if config.allow_dev_user_header {
            tracing::warn!("X-User-Id header accepted for requests without JWT claims");
        }
        Ok(Self::new(&sdk_config, config, client_secret))
    }

    pub fn table(&self) -> &str {
        &self.config.table_name
    }
}
