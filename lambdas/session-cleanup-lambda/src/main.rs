use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use linkhub_shared::admin;
use linkhub_shared::config::AppConfig;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let sdk_config = aws_config::load_from_env().await;
    let dynamo_client = DynamoClient::new(&sdk_config);
    let table_name = AppConfig::from_env().table_name;

    run(service_fn(move |event: LambdaEvent<Value>| {
        let dynamo_client = dynamo_client.clone();
        let table_name = table_name.clone();
        async move { function_handler(event, &dynamo_client, &table_name).await }
    }))
    .await
}

/// Scheduled (EventBridge) sweep of expired admin sessions.
async fn function_handler(
    event: LambdaEvent<Value>,
    dynamo_client: &DynamoClient,
    table_name: &str,
) -> Result<Value, Error> {
    let source = event
        .payload
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("manual");
    tracing::info!("Session cleanup triggered by {}", source);

    let removed = admin::cleanup_expired(dynamo_client, table_name, Utc::now()).await?;
    tracing::info!("Removed {} expired admin sessions", removed);

    Ok(json!({ "removed": removed }))
}
