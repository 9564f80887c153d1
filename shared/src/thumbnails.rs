use crate::error::{LinkHubError, Result};
use crate::types::{Detection, Thumbnail, VideoSubmission};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, imageops::FilterType, ColorType, DynamicImage, GrayImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output sizes: square, landscape, portrait, social card.
pub const VARIANT_SIZES: [(u32, u32); 4] = [(400, 400), (800, 600), (600, 800), (1200, 630)];

const JPEG_QUALITY: u8 = 85;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_CONTROL: &str = "max-age=31536000";
const PLACEHOLDER_SIZE: (u32, u32) = (800, 600);
const PLACEHOLDER_GRAY: u8 = 211;

/// Detector classes that count as a sellable product in frame.
const PRODUCT_CLASSES: &[&str] = &[
    "handbag", "backpack", "suitcase", "tie", "umbrella", "bottle", "wine glass", "cup", "bowl",
    "chair", "couch", "bed", "potted plant", "vase", "clock", "book", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "refrigerator",
    "hair drier", "toothbrush", "scissors", "teddy bear", "sports ball", "skateboard",
    "surfboard", "tennis racket", "frisbee", "kite",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub sharpness: f64,
    pub brightness_score: f64,
    pub contrast_score: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailResult {
    pub video_id: String,
    pub processing_job_id: String,
    pub thumbnails: Vec<Thumbnail>,
    pub primary_thumbnail_url: String,
    pub quality: QualityMetrics,
    pub composition_score: f64,
    pub has_product: bool,
    pub confidence_score: f64,
    pub used_placeholder: bool,
    pub processing_timestamp: String,
}

pub fn placeholder() -> DynamicImage {
    let (w, h) = PLACEHOLDER_SIZE;
    DynamicImage::ImageRgb8(RgbImage::from_pixel(
        w,
        h,
        Rgb([PLACEHOLDER_GRAY, PLACEHOLDER_GRAY, PLACEHOLDER_GRAY]),
    ))
}

/// Fetch and decode the source frame. Any failure yields the placeholder.
pub async fn fetch_source(http: &reqwest::Client, url: &str) -> (DynamicImage, bool) {
    match download(http, url).await {
        Ok(img) => (img, false),
        Err(e) => {
            tracing::warn!("Error downloading image from {}: {}", url, e);
            (placeholder(), true)
        }
    }
}

async fn download(http: &reqwest::Client, url: &str) -> Result<DynamicImage> {
    let bytes = http
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| LinkHubError::BadRequest(format!("fetch failed: {}", e)))?
        .bytes()
        .await
        .map_err(|e| LinkHubError::BadRequest(format!("read failed: {}", e)))?;

    image::load_from_memory(&bytes)
        .map_err(|e| LinkHubError::BadRequest(format!("Failed to load image: {}", e)))
}

fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;

    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let value = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            responses.push(value);
        }
    }
    let mean = responses.iter().sum::<f64>() / responses.len() as f64;
    responses.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / responses.len() as f64
}

/// Score for mean brightness in [0, 1]: full marks inside [0.3, 0.8].
pub fn brightness_score(brightness: f64) -> f64 {
    let score = if brightness < 0.3 {
        brightness / 0.3
    } else if brightness > 0.8 {
        (1.0 - brightness) / 0.2
    } else {
        1.0
    };
    score.clamp(0.0, 1.0)
}

pub fn quality_metrics(img: &DynamicImage) -> QualityMetrics {
    let gray = img.to_luma8();
    let count = (gray.width() as f64 * gray.height() as f64).max(1.0);

    let mean = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / count;
    let variance = gray
        .pixels()
        .map(|p| (p.0[0] as f64 - mean).powi(2))
        .sum::<f64>()
        / count;

    let sharpness = (laplacian_variance(&gray) / 1000.0).min(1.0);
    let brightness = brightness_score(mean / 255.0);
    let contrast = (variance.sqrt() / 255.0 * 2.0).min(1.0);

    QualityMetrics {
        sharpness,
        brightness_score: brightness,
        contrast_score: contrast,
        overall: 0.4 * sharpness + 0.3 * brightness + 0.3 * contrast,
    }
}

fn size_score(area: f64) -> f64 {
    if (0.1..=0.6).contains(&area) {
        1.0
    } else if area < 0.1 {
        area * 10.0
    } else {
        (1.0 - (area - 0.6) * 2.0).max(0.2)
    }
}

/// How well detected objects are framed. Boxes are normalized to 0..1.
pub fn composition_score(detections: &[Detection]) -> f64 {
    if detections.is_empty() {
        return 0.3;
    }

    let mut best: f64 = 0.0;
    let mut max_confidence: f64 = 0.0;
    for d in detections {
        let cx = d.x + d.width / 2.0;
        let cy = d.y + d.height / 2.0;
        let distance = ((cx - 0.5).powi(2) + (cy - 0.5).powi(2)).sqrt();
        let center = 1.0 - (distance * 2.0).min(1.0);
        let score = (0.4 * center + 0.6 * size_score(d.width * d.height)) * d.confidence;
        best = best.max(score);
        max_confidence = max_confidence.max(d.confidence);
    }
    if max_confidence > 0.8 {
        best *= 1.2;
    }
    best.min(1.0)
}

pub fn has_product(detections: &[Detection]) -> bool {
    detections
        .iter()
        .any(|d| PRODUCT_CLASSES.contains(&d.class_name.to_lowercase().as_str()))
}

fn wants_overlay(product_info: Option<&serde_json::Value>) -> bool {
    product_info
        .and_then(|info| info.get("name"))
        .map(|name| !name.is_null())
        .unwrap_or(false)
}

/// Fit `img` inside `width`x`height` (never enlarging), centered on white.
pub fn render_variant(img: &DynamicImage, width: u32, height: u32, overlay: bool) -> RgbImage {
    let fitted = if img.width() > width || img.height() > height {
        img.resize(width, height, FilterType::Lanczos3)
    } else {
        img.clone()
    };

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let x = (width - fitted.width()) / 2;
    let y = (height - fitted.height()) / 2;
    imageops::overlay(&mut canvas, &fitted.to_rgb8(), x as i64, y as i64);

    if overlay {
        // Darken the bottom quarter as a caption band.
        let band_start = height - height / 4;
        for py in band_start..height {
            for px in 0..width {
                let pixel = canvas.get_pixel_mut(px, py);
                for channel in pixel.0.iter_mut() {
                    *channel /= 2;
                }
            }
        }
    }
    canvas
}

pub fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .map_err(|e| LinkHubError::Internal(format!("Failed to encode JPEG: {}", e)))?;
    Ok(buf)
}

pub fn thumbnail_key(video_id: &str, width: u32, height: u32) -> String {
    format!("thumbnails/{}/{}x{}.jpg", video_id, width, height)
}

pub fn public_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Produce every thumbnail variant for a video and upload them to `bucket`.
pub async fn generate(
    s3_client: &S3Client,
    http: &reqwest::Client,
    bucket: &str,
    video: &VideoSubmission,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<ThumbnailResult> {
    tracing::info!("Generating thumbnails for video: {}", video.video_id);

    let source_url = video.thumbnail_url.as_deref().unwrap_or(&video.video_url);
    let (source, used_placeholder) = fetch_source(http, source_url).await;

    let quality = quality_metrics(&source);
    let composition = composition_score(&video.detections);
    let confidence = ((quality.overall + composition) / 2.0).clamp(0.0, 1.0);
    let overlay = wants_overlay(video.product_info.as_ref());

    let mut thumbnails = Vec::with_capacity(VARIANT_SIZES.len());
    for (width, height) in VARIANT_SIZES {
        let bytes = encode_jpeg(&render_variant(&source, width, height, overlay))?;
        let key = thumbnail_key(&video.video_id, width, height);

        s3_client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("image/jpeg")
            .cache_control(CACHE_CONTROL)
            .send()
            .await?;

        thumbnails.push(Thumbnail {
            size: format!("{}x{}", width, height),
            url: public_url(bucket, &key),
            quality_score: quality.overall,
            confidence,
        });
    }

    let primary_thumbnail_url = thumbnails
        .first()
        .map(|t| t.url.clone())
        .unwrap_or_default();

    tracing::info!(
        "Generated {} thumbnails for video: {}",
        thumbnails.len(),
        video.video_id
    );

    Ok(ThumbnailResult {
        video_id: video.video_id.clone(),
        processing_job_id: job_id.to_string(),
        thumbnails,
        primary_thumbnail_url,
        quality,
        composition_score: composition,
        has_product: has_product(&video.detections),
        confidence_score: confidence,
        used_placeholder,
        processing_timestamp: now.to_rfc3339(),
    })
}
