//! Cognito custom auth triggers (define, create and verify auth challenge).
//!
//! One function serves all three triggers; `triggerSource` picks the step.

use aws_sdk_sns::Client as SnsClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use linkhub_shared::challenge;
use linkhub_shared::config::AppConfig;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let sdk_config = aws_config::load_from_env().await;
    let sns_client = SnsClient::new(&sdk_config);
    let max_attempts = AppConfig::from_env().otp_max_attempts;

    run(service_fn(move |event: LambdaEvent<Value>| {
        let sns_client = sns_client.clone();
        async move {
            let response = challenge::handle_trigger(event.payload, &sns_client, max_attempts).await?;
            Ok::<Value, Error>(response)
        }
    }))
    .await
}
