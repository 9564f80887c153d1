use crate::caption::{self, CaptionAnalysis, ProductMention};
use crate::dynamo::{self, n, s, Item, GSI1, GSI2};
use crate::error::{LinkHubError, Result};
use crate::tagging::TaggingResult;
use crate::types::{
    Page, ProcessingMetadata, Product, Thumbnail, UpdateProductRequest, VideoSubmission,
};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};

const METADATA_SK: &str = "METADATA";
const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 2000;
const MAX_PRODUCT_TAGS: usize = 20;
const MAX_TAG_VIDEOS: i32 = 20;

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Stable per seller, so a retried job overwrites its own products and
/// two sellers ingesting the same video never share a key.
pub fn product_id(seller_handle: &str, video_id: &str, name: &str) -> String {
    format!("{}-{}-{}", seller_handle, video_id, slug(name))
}

/// Mentions from the caption, or the submitted product info when the caption names none.
fn mentions_for(video: &VideoSubmission, analysis: &CaptionAnalysis) -> Vec<ProductMention> {
    if !analysis.products_mentioned.is_empty() {
        return analysis.products_mentioned.clone();
    }
    video
        .product_info
        .as_ref()
        .and_then(|info| info.get("name"))
        .and_then(|name| name.as_str())
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            vec![ProductMention {
                name: name.trim().to_string(),
                category: "general".to_string(),
                confidence: analysis.confidence_score,
            }]
        })
        .unwrap_or_default()
}

fn first_price(video: &VideoSubmission, analysis: &CaptionAnalysis) -> Option<(f64, String)> {
    if let Some(price) = analysis.pricing_info.first() {
        return Some((price.amount, price.currency.clone()));
    }
    let info = video.product_info.as_ref()?.get("price")?;
    match info {
        serde_json::Value::Number(num) => num.as_f64().map(|p| (p, "USD".to_string())),
        serde_json::Value::String(text) => caption::find_prices(text)
            .into_iter()
            .next()
            .map(|p| (p.amount, p.currency)),
        _ => None,
    }
}

/// Build product records from the outputs of the earlier stages.
pub fn extract(
    job_id: &str,
    video: &VideoSubmission,
    seller_handle: &str,
    analysis: &CaptionAnalysis,
    tagging: Option<&TaggingResult>,
    thumbnails: &[Thumbnail],
    now: DateTime<Utc>,
) -> Vec<Product> {
    let price = first_price(video, analysis);
    let top_feature = analysis.key_features.first();
    let tags: Vec<String> = tagging
        .map(|t| t.generated_tags.iter().map(|g| g.tag.clone()).collect())
        .unwrap_or_default();
    let description = video
        .product_info
        .as_ref()
        .and_then(|info| info.get("description"))
        .and_then(|d| d.as_str())
        .map(str::to_string);

    mentions_for(video, analysis)
        .into_iter()
        .map(|mention| {
            let title = match top_feature {
                Some(feature) => title_case(&format!("{} {}", feature, mention.name)),
                None => title_case(&mention.name),
            };
            Product {
                product_id: product_id(seller_handle, &video.video_id, &mention.name),
                seller_handle: seller_handle.to_string(),
                video_id: video.video_id.clone(),
                title,
                description: description.clone(),
                price: price.as_ref().map(|(amount, _)| *amount),
                currency: price.as_ref().map(|(_, currency)| currency.clone()),
                tags: tags.clone(),
                thumbnails: thumbnails.to_vec(),
                processing: ProcessingMetadata {
                    job_id: job_id.to_string(),
                    confidence: ((mention.confidence + analysis.confidence_score) / 2.0).min(1.0),
                    extracted_at: now.to_rfc3339(),
                },
                created_at: now.to_rfc3339(),
                updated_at: now.to_rfc3339(),
            }
        })
        .collect()
}

pub fn product_to_item(product: &Product) -> Result<Item> {
    let mut item = Item::new();
    item.insert("PK".to_string(), s(dynamo::product_pk(&product.product_id)));
    item.insert("SK".to_string(), s(METADATA_SK));
    item.insert("GSI1PK".to_string(), s(dynamo::seller_key(&product.seller_handle)));
    item.insert("GSI1SK".to_string(), s(format!("PRODUCT#{}", product.created_at)));
    item.insert("GSI2PK".to_string(), s(dynamo::video_key(&product.video_id)));
    item.insert("GSI2SK".to_string(), s(format!("PRODUCT#{}", product.product_id)));
    item.insert("entity_type".to_string(), s("product"));
    item.insert("product_id".to_string(), s(&product.product_id));
    item.insert("seller_handle".to_string(), s(&product.seller_handle));
    item.insert("video_id".to_string(), s(&product.video_id));
    item.insert("title".to_string(), s(&product.title));
    if let Some(description) = &product.description {
        item.insert("description".to_string(), s(description));
    }
    if let Some(price) = product.price {
        item.insert("price".to_string(), n(price));
    }
    if let Some(currency) = &product.currency {
        item.insert("currency".to_string(), s(currency));
    }
    item.insert("tags".to_string(), dynamo::string_list(&product.tags));
    item.insert("thumbnails".to_string(), dynamo::json(&product.thumbnails)?);
    item.insert("processing".to_string(), dynamo::json(&product.processing)?);
    item.insert("created_at".to_string(), s(&product.created_at));
    item.insert("updated_at".to_string(), s(&product.updated_at));
    Ok(item)
}

pub fn item_to_product(item: &Item) -> Result<Product> {
    Ok(Product {
        product_id: dynamo::require_s(item, "product_id")?,
        seller_handle: dynamo::require_s(item, "seller_handle")?,
        video_id: dynamo::require_s(item, "video_id")?,
        title: dynamo::require_s(item, "title")?,
        description: dynamo::get_s(item, "description"),
        price: dynamo::get_n(item, "price"),
        currency: dynamo::get_s(item, "currency"),
        tags: dynamo::get_string_list(item, "tags"),
        thumbnails: dynamo::get_json(item, "thumbnails")?.unwrap_or_default(),
        processing: dynamo::get_json(item, "processing")?.ok_or_else(|| {
            LinkHubError::Internal("product is missing processing metadata".to_string())
        })?,
        created_at: dynamo::get_s(item, "created_at").unwrap_or_default(),
        updated_at: dynamo::get_s(item, "updated_at").unwrap_or_default(),
    })
}

/// Writes are refused when the key already belongs to another seller.
pub async fn save_products(client: &DynamoClient, table_name: &str, products: &[Product]) -> Result<()> {
    for product in products {
        let result = client
            .put_item()
            .table_name(table_name)
            .set_item(Some(product_to_item(product)?))
            .condition_expression("attribute_not_exists(PK) OR seller_handle = :handle")
            .expression_attribute_values(":handle", s(&product.seller_handle))
            .send()
            .await;
        if let Err(e) = result {
            if e.as_service_error()
                .map(|se| se.is_conditional_check_failed_exception())
                .unwrap_or(false)
            {
                return Err(LinkHubError::Forbidden(format!(
                    "Product {} belongs to another seller",
                    product.product_id
                )));
            }
            return Err(e.into());
        }
    }
    tracing::info!("Saved {} products", products.len());
    Ok(())
}

pub async fn get_product(client: &DynamoClient, table_name: &str, product_id: &str) -> Result<Product> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(dynamo::product_pk(product_id)))
        .key("SK", s(METADATA_SK))
        .send()
        .await?;

    result
        .item()
        .map(item_to_product)
        .transpose()?
        .ok_or_else(|| LinkHubError::NotFound(format!("Product {} not found", product_id)))
}

/// A seller's products, newest first.
pub async fn list_by_seller(
    client: &DynamoClient,
    table_name: &str,
    handle: &str,
    limit: i32,
    cursor: Option<&str>,
) -> Result<Page<Product>> {
    let mut request = client
        .query()
        .table_name(table_name)
        .index_name(GSI1)
        .key_condition_expression("GSI1PK = :pk AND begins_with(GSI1SK, :prefix)")
        .expression_attribute_values(":pk", s(dynamo::seller_key(handle)))
        .expression_attribute_values(":prefix", s("PRODUCT#"))
        .scan_index_forward(false)
        .limit(limit.clamp(1, 100));
    if let Some(cursor) = cursor {
        request = request.set_exclusive_start_key(Some(dynamo::decode_cursor(cursor)?));
    }

    let result = request.send().await?;
    let items = result
        .items()
        .iter()
        .map(item_to_product)
        .collect::<Result<Vec<_>>>()?;
    let next_cursor = result
        .last_evaluated_key()
        .map(dynamo::encode_cursor)
        .transpose()?;

    Ok(Page { items, next_cursor })
}

pub async fn list_by_video(client: &DynamoClient, table_name: &str, video_id: &str) -> Result<Vec<Product>> {
    let result = client
        .query()
        .table_name(table_name)
        .index_name(GSI2)
        .key_condition_expression("GSI2PK = :pk AND begins_with(GSI2SK, :prefix)")
        .expression_attribute_values(":pk", s(dynamo::video_key(video_id)))
        .expression_attribute_values(":prefix", s("PRODUCT#"))
        .send()
        .await?;

    result.items().iter().map(item_to_product).collect()
}

/// Products from up to 20 videos carrying `tag`, in video id order.
pub async fn list_by_tag(client: &DynamoClient, table_name: &str, tag: &str) -> Result<Vec<Product>> {
    let tag = caption::normalize_tag(tag);
    if tag.is_empty() {
        return Err(LinkHubError::BadRequest("tag is required".to_string()));
    }

    let result = client
        .query()
        .table_name(table_name)
        .key_condition_expression("PK = :pk AND begins_with(SK, :prefix)")
        .expression_attribute_values(":pk", s(dynamo::tag_pk(&tag)))
        .expression_attribute_values(":prefix", s("VIDEO#"))
        .limit(MAX_TAG_VIDEOS)
        .send()
        .await?;

    let mut products = Vec::new();
    for video_id in result
        .items()
        .iter()
        .filter_map(|item| dynamo::get_s(item, "video_id"))
    {
        products.extend(list_by_video(client, table_name, &video_id).await?);
    }
    products.retain(|p| p.tags.iter().any(|t| t == &tag));
    Ok(products)
}

fn apply_update(product: &mut Product, req: UpdateProductRequest, now: DateTime<Utc>) -> Result<()> {
    if let Some(title) = req.title {
        let title = title.trim().to_string();
        if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
            return Err(LinkHubError::BadRequest(format!(
                "title must be 1-{} characters",
                MAX_TITLE_CHARS
            )));
        }
        product.title = title;
    }
    if let Some(description) = req.description {
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(LinkHubError::BadRequest(format!(
                "description must be at most {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
        product.description = Some(description);
    }
    if let Some(price) = req.price {
        if !price.is_finite() || price < 0.0 {
            return Err(LinkHubError::BadRequest(
                "price must be a non-negative number".to_string(),
            ));
        }
        product.price = Some(price);
    }
    if let Some(currency) = req.currency {
        let currency = currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LinkHubError::BadRequest(
                "currency must be a 3-letter ISO code".to_string(),
            ));
        }
        product.currency = Some(currency);
    }
    if let Some(tags) = req.tags {
        let mut normalized: Vec<String> = Vec::new();
        for tag in tags.iter().map(|t| caption::normalize_tag(t)) {
            if !tag.is_empty() && !normalized.contains(&tag) {
                normalized.push(tag);
            }
        }
        if normalized.len() > MAX_PRODUCT_TAGS {
            return Err(LinkHubError::BadRequest(format!(
                "at most {} tags are allowed",
                MAX_PRODUCT_TAGS
            )));
        }
        product.tags = normalized;
    }
    product.updated_at = now.to_rfc3339();
    Ok(())
}

fn ensure_owner(product: &Product, owner_handle: &str) -> Result<()> {
    if product.seller_handle != owner_handle {
        return Err(LinkHubError::Forbidden(
            "Product belongs to another seller".to_string(),
        ));
    }
    Ok(())
}

pub async fn update_product(
    client: &DynamoClient,
    table_name: &str,
    product_id: &str,
    owner_handle: &str,
    req: UpdateProductRequest,
) -> Result<Product> {
    let mut product = get_product(client, table_name, product_id).await?;
    ensure_owner(&product, owner_handle)?;
    apply_update(&mut product, req, Utc::now())?;

    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(product_to_item(&product)?))
        .condition_expression("attribute_exists(PK)")
        .send()
        .await?;

    tracing::info!("Product {} updated by @{}", product_id, owner_handle);
    Ok(product)
}

pub async fn delete_product(
    client: &DynamoClient,
    table_name: &str,
    product_id: &str,
    owner_handle: &str,
) -> Result<()> {
    let product = get_product(client, table_name, product_id).await?;
    ensure_owner(&product, owner_handle)?;

    client
        .delete_item()
        .table_name(table_name)
        .key("PK", s(dynamo::product_pk(product_id)))
        .key("SK", s(METADATA_SK))
        .send()
        .await?;

    tracing::info!("Product {} deleted by @{}", product_id, owner_handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::{self, TaggingOptions};

    fn video(caption: &str, product_info: Option<serde_json::Value>) -> VideoSubmission {
        VideoSubmission {
            video_id: "7301".to_string(),
            video_url: "https://www.tiktok.com/@glowshop/video/7301".to_string(),
            caption: caption.to_string(),
            hashtags: vec![],
            mentions: vec![],
            thumbnail_url: None,
            product_info,
            detections: vec![],
        }
    }

    fn thumbnail() -> Thumbnail {
        Thumbnail {
            size: "400x400".to_string(),
            url: "https://b.s3.amazonaws.com/thumbnails/7301/400x400.jpg".to_string(),
            quality_score: 0.6,
            confidence: 0.5,
        }
    }

    #[test]
    fn test_extract_from_caption() {
        let v = video("Waterproof tote, only $45 link in bio", None);
        let analysis = caption::analyze(&v, "job-1", 0.7, Utc::now());
        let options = TaggingOptions {
            min_confidence: 0.6,
            max_tags: 20,
            trending: vec![],
        };
        let tags = tagging::generate(&v, "job-1", Some(&analysis), &options, Utc::now());
        let products = extract("job-1", &v, "glowshop", &analysis, Some(&tags), &[thumbnail()], Utc::now());

        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.product_id, "glowshop-7301-tote");
        assert_eq!(p.title, "Waterproof Tote");
        assert_eq!(p.price, Some(45.0));
        assert_eq!(p.currency.as_deref(), Some("USD"));
        assert_eq!(p.tags, vec!["tote"]);
        assert_eq!(p.thumbnails.len(), 1);
        assert_eq!(p.seller_handle, "glowshop");
        assert!(p.processing.confidence > 0.0 && p.processing.confidence <= 1.0);
    }

    #[test]
    fn test_extract_falls_back_to_product_info() {
        let info = serde_json::json!({"name": "Summer Dress Set", "price": "€35"});
        let v = video("new drop", Some(info));
        let analysis = caption::analyze(&v, "job-2", 0.7, Utc::now());
        let products = extract("job-2", &v, "glowshop", &analysis, None, &[], Utc::now());

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].product_id, "glowshop-7301-summer-dress-set");
        assert_eq!(products[0].title, "Summer Dress Set");
        assert_eq!(products[0].price, Some(35.0));
        assert_eq!(products[0].currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_extract_nothing_to_sell() {
        let v = video("good morning", None);
        let analysis = caption::analyze(&v, "job-3", 0.7, Utc::now());
        assert!(extract("job-3", &v, "glowshop", &analysis, None, &[], Utc::now()).is_empty());
    }

    #[test]
    fn test_product_item_round_trip() {
        let v = video("Linen dress $29.99", None);
        let analysis = caption::analyze(&v, "job-4", 0.7, Utc::now());
        let product = extract("job-4", &v, "glowshop", &analysis, None, &[thumbnail()], Utc::now())
            .remove(0);
        let item = product_to_item(&product).unwrap();

        assert_eq!(dynamo::get_s(&item, "GSI1PK").as_deref(), Some("SELLER#glowshop"));
        assert_eq!(dynamo::get_s(&item, "GSI2PK").as_deref(), Some("VIDEO#7301"));
        assert_eq!(item_to_product(&item).unwrap(), product);
    }

    #[test]
    fn test_same_video_from_two_sellers_gets_distinct_keys() {
        let v = video("Linen dress $29.99", None);
        let analysis = caption::analyze(&v, "job-7", 0.7, Utc::now());
        let ours = extract("job-7", &v, "alice", &analysis, None, &[], Utc::now()).remove(0);
        let theirs = extract("job-8", &v, "mallory", &analysis, None, &[], Utc::now()).remove(0);

        assert_ne!(ours.product_id, theirs.product_id);
        let our_item = product_to_item(&ours).unwrap();
        let their_item = product_to_item(&theirs).unwrap();
        assert_eq!(dynamo::get_s(&our_item, "PK").as_deref(), Some("PRODUCT#alice-7301-dress"));
        assert_ne!(dynamo::get_s(&our_item, "PK"), dynamo::get_s(&their_item, "PK"));
    }

    #[test]
    fn test_apply_update_validation() {
        let v = video("Linen dress $29.99", None);
        let analysis = caption::analyze(&v, "job-5", 0.7, Utc::now());
        let mut product = extract("job-5", &v, "glowshop", &analysis, None, &[], Utc::now()).remove(0);

        let ok = UpdateProductRequest {
            title: Some("  Linen Midi Dress ".to_string()),
            description: None,
            price: Some(24.5),
            currency: Some("eur".to_string()),
            tags: Some(vec!["#Dress".to_string(), "dress".to_string(), "linen".to_string()]),
        };
        apply_update(&mut product, ok, Utc::now()).unwrap();
        assert_eq!(product.title, "Linen Midi Dress");
        assert_eq!(product.currency.as_deref(), Some("EUR"));
        assert_eq!(product.tags, vec!["dress", "linen"]);

        let negative = UpdateProductRequest {
            title: None,
            description: None,
            price: Some(-1.0),
            currency: None,
            tags: None,
        };
        assert!(apply_update(&mut product, negative, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_tag_listing_rejects_blank_tag() {
        let sdk_config = aws_config::SdkConfig::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        let client = DynamoClient::new(&sdk_config);
        assert!(matches!(
            list_by_tag(&client, "tiktok-commerce", " # ").await,
            Err(LinkHubError::BadRequest(_))
        ));
    }

    #[test]
    fn test_only_owner_may_modify() {
        let v = video("Linen dress", None);
        let analysis = caption::analyze(&v, "job-6", 0.7, Utc::now());
        let product = extract("job-6", &v, "glowshop", &analysis, None, &[], Utc::now()).remove(0);
        assert!(ensure_owner(&product, "glowshop").is_ok());
        assert!(matches!(
            ensure_owner(&product, "othershop"),
            Err(LinkHubError::Forbidden(_))
        ));
    }
}
