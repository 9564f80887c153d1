use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use linkhub_shared::error::{self, LinkHubError};
use linkhub_shared::types::{Product, UpdateProductRequest};
use linkhub_shared::{auth, http, products, users, AppState};
use std::sync::Arc;

/// Product catalog handler
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    tracing::info!("Product Lambda invoked - Method: {} Path: {}", method, path);

    if method == Method::OPTIONS {
        return http::preflight();
    }

    let dynamo = &state.dynamo_client;
    let table = state.table();
    let parts = http::path_segments(path);

    match (method, parts.as_slice()) {
        // GET /products?tag={tag}
        (&Method::GET, ["products"]) => match http::query_param(&event, "tag") {
            Some(tag) => http::respond(
                StatusCode::OK,
                products::list_by_tag(dynamo, table, &tag.to_lowercase()).await,
            ),
            None => http::error_response(&LinkHubError::BadRequest(
                "tag query parameter is required".to_string(),
            )),
        },
        // GET /products/{id}
        (&Method::GET, ["products", product_id]) => http::respond(
            StatusCode::OK,
            products::get_product(dynamo, table, product_id).await,
        ),
        // PATCH /products/{id} - owner only
        (&Method::PATCH, ["products", product_id]) => {
            http::respond(StatusCode::OK, update(&event, &state, product_id).await)
        }
        // DELETE /products/{id} - owner only
        (&Method::DELETE, ["products", product_id]) => {
            match delete(&event, &state, product_id).await {
                Ok(()) => http::no_content(),
                Err(e) => http::error_response(&e),
            }
        }
        // GET /sellers/{handle}/products?limit=&cursor=
        (&Method::GET, ["sellers", handle, "products"]) => {
            let limit = http::limit_param(&event, 20, 100);
            let cursor = http::query_param(&event, "cursor");
            let result = match auth::normalize_handle(handle) {
                Ok(handle) => {
                    products::list_by_seller(dynamo, table, &handle, limit, cursor.as_deref()).await
                }
                Err(e) => Err(e),
            };
            http::respond(StatusCode::OK, result)
        }
        // GET /videos/{id}/products
        (&Method::GET, ["videos", video_id, "products"]) => http::respond(
            StatusCode::OK,
            products::list_by_video(dynamo, table, video_id).await,
        ),
        (_, ["products"] | ["products", _] | ["sellers", _, "products"] | ["videos", _, "products"]) => {
            http::method_not_allowed()
        }
        _ => http::not_found(),
    }
}

/// Handle of the calling seller.
async fn caller_handle(event: &Request, state: &AppState) -> error::Result<String> {
    let caller = http::require_caller(event)?;
    let user = users::get_user(&state.dynamo_client, state.table(), &caller).await?;
    Ok(user.handle)
}

async fn update(event: &Request, state: &AppState, product_id: &str) -> error::Result<Product> {
    let request: UpdateProductRequest = http::parse_body(event.body())?;
    let owner = caller_handle(event, state).await?;
    products::update_product(&state.dynamo_client, state.table(), product_id, &owner, request).await
}

async fn delete(event: &Request, state: &AppState, product_id: &str) -> error::Result<()> {
    let owner = caller_handle(event, state).await?;
    products::delete_product(&state.dynamo_client, state.table(), product_id, &owner).await
}
