use aws_lambda_events::event::sqs::{SqsBatchResponse, SqsEvent};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use linkhub_shared::pipeline::Pipeline;
use linkhub_shared::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let state = AppState::from_env().await?;
    let http = reqwest::Client::builder()
        .user_agent("linkhub-worker/0.1")
        .build()?;

    run(service_fn(move |event: LambdaEvent<SqsEvent>| {
        let state = Arc::clone(&state);
        let http = http.clone();
        async move { function_handler(event, state, http).await }
    }))
    .await
}

async fn function_handler(
    event: LambdaEvent<SqsEvent>,
    state: Arc<AppState>,
    http: reqwest::Client,
) -> Result<SqsBatchResponse, Error> {
    tracing::info!(request_id = %event.context.request_id, "Processing batch");
    let pipeline = Pipeline::new(&state, &http);
    Ok(pipeline.handle_batch(event.payload).await)
}
