use crate::caption::{self, CaptionAnalysis};
use crate::dynamo::{self, n, s};
use crate::types::VideoSubmission;
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

const SEO_KEYWORD_COUNT: usize = 10;
const GENERAL: &str = "general";
const TREND: &str = "trend";
const CAPTION_TAG_WORDS: &[&str] = &[
    "dress", "shirt", "shoes", "bag", "jewelry", "makeup", "skincare", "fashion", "style",
    "outfit", "accessories",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    Caption,
    Hashtag,
    CaptionAnalysis,
    Trending,
}

impl TagSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Caption => "caption",
            Self::Hashtag => "hashtag",
            Self::CaptionAnalysis => "caption_analysis",
            Self::Trending => "trending",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedTag {
    pub tag: String,
    pub confidence: f64,
    pub category: String,
    pub source: TagSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingResult {
    pub video_id: String,
    pub processing_job_id: String,
    pub generated_tags: Vec<GeneratedTag>,
    pub categories: Vec<CategoryScore>,
    pub trending_tags: Vec<String>,
    pub seo_keywords: Vec<String>,
    pub content_themes: Vec<String>,
    pub confidence_score: f64,
    pub processing_timestamp: String,
}

#[derive(Debug, Clone)]
pub struct TaggingOptions {
    pub min_confidence: f64,
    pub max_tags: usize,
    pub trending: Vec<String>,
}

fn tag(tag: &str, confidence: f64, category: &str, source: TagSource) -> GeneratedTag {
    GeneratedTag {
        tag: caption::normalize_tag(tag),
        confidence,
        category: category.to_string(),
        source,
    }
}

/// Shopping words written in the caption itself, punctuation stripped.
fn caption_words(text: &str) -> Vec<GeneratedTag> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | '#' | '@'))
                .to_lowercase()
        })
        .filter(|word| CAPTION_TAG_WORDS.contains(&word.as_str()))
        .map(|word| {
            let category = caption::lookup_product(&word)
                .map(|(_, category)| category)
                .unwrap_or(GENERAL);
            tag(&word, 0.8, category, TagSource::Caption)
        })
        .collect()
}

/// Candidate tags in priority order: caption words, hashtags, caption analysis, trending.
pub fn candidates(
    video: &VideoSubmission,
    analysis: Option<&CaptionAnalysis>,
    trending: &[String],
) -> Vec<GeneratedTag> {
    let mut out = caption_words(&video.caption);

    let hashtags = match analysis {
        Some(a) => a.hashtags.clone(),
        None => video.hashtags.iter().map(|h| caption::normalize_tag(h)).collect(),
    };
    out.extend(hashtags.iter().map(|h| {
        let category = caption::lookup_product(h)
            .map(|(_, category)| category)
            .unwrap_or(GENERAL);
        tag(h, 0.75, category, TagSource::Hashtag)
    }));

    if let Some(analysis) = analysis {
        out.extend(
            analysis
                .products_mentioned
                .iter()
                .map(|p| tag(&p.name, 0.85, &p.category, TagSource::CaptionAnalysis)),
        );
    }

    out.extend(trending.iter().map(|t| tag(t, 0.5, TREND, TagSource::Trending)));
    out
}

/// Deduplicate case-insensitively (first accepted occurrence wins), drop tags
/// under `min_confidence`, rank by confidence and keep at most `max_tags`.
pub fn merge_and_rank(
    candidates: Vec<GeneratedTag>,
    min_confidence: f64,
    max_tags: usize,
) -> Vec<GeneratedTag> {
    let mut seen = HashSet::new();
    let mut tags: Vec<GeneratedTag> = candidates
        .into_iter()
        .filter(|t| !t.tag.is_empty() && t.confidence >= min_confidence)
        .filter(|t| seen.insert(t.tag.to_lowercase()))
        .collect();

    tags.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    tags.truncate(max_tags);
    tags
}

/// Share of product tags falling in each category, largest first.
pub fn categorize(tags: &[GeneratedTag]) -> Vec<CategoryScore> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for t in tags
        .iter()
        .filter(|t| t.category != GENERAL && t.category != TREND)
    {
        *counts.entry(t.category.as_str()).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    if total == 0 {
        return Vec::new();
    }

    let mut scores: Vec<CategoryScore> = counts
        .into_iter()
        .map(|(category, count)| CategoryScore {
            category: category.to_string(),
            confidence: count as f64 / total as f64,
        })
        .collect();
    // BTreeMap order keeps ties alphabetical
    scores.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    scores
}

pub fn themes(categories: &[CategoryScore]) -> Vec<String> {
    let dominant: Vec<String> = categories
        .iter()
        .filter(|c| c.confidence >= 0.5)
        .map(|c| c.category.clone())
        .collect();
    if !dominant.is_empty() {
        return dominant;
    }
    categories
        .first()
        .map(|c| vec![c.category.clone()])
        .unwrap_or_default()
}

pub fn overall_confidence(tags: &[GeneratedTag]) -> f64 {
    if tags.is_empty() {
        return 0.0;
    }
    let total: f64 = tags.iter().map(|t| t.confidence).sum();
    (total / tags.len() as f64).min(1.0)
}

pub fn generate(
    video: &VideoSubmission,
    job_id: &str,
    analysis: Option<&CaptionAnalysis>,
    options: &TaggingOptions,
    now: DateTime<Utc>,
) -> TaggingResult {
    let tags = merge_and_rank(
        candidates(video, analysis, &options.trending),
        options.min_confidence,
        options.max_tags,
    );
    let categories = categorize(&tags);
    let content_themes = themes(&categories);
    let seo_keywords = tags
        .iter()
        .take(SEO_KEYWORD_COUNT)
        .map(|t| t.tag.clone())
        .collect();

    tracing::info!("Generated {} tags for video: {}", tags.len(), video.video_id);

    TaggingResult {
        video_id: video.video_id.clone(),
        processing_job_id: job_id.to_string(),
        confidence_score: overall_confidence(&tags),
        generated_tags: tags,
        categories,
        trending_tags: options.trending.clone(),
        seo_keywords,
        content_themes,
        processing_timestamp: now.to_rfc3339(),
    }
}

/// Record tag usage for trend analysis. Failures are logged and ignored.
pub async fn store_tag_usage(client: &DynamoClient, table_name: &str, result: &TaggingResult) {
    for t in &result.generated_tags {
        let put = client
            .put_item()
            .table_name(table_name)
            .item("PK", s(dynamo::tag_pk(&t.tag)))
            .item("SK", s(dynamo::video_key(&result.video_id)))
            .item("entity_type", s("tag_usage"))
            .item("tag", s(&t.tag))
            .item("video_id", s(&result.video_id))
            .item("confidence", n(t.confidence))
            .item("category", s(&t.category))
            .item("source", s(t.source.as_str()))
            .item("created_at", s(&result.processing_timestamp))
            .send()
            .await;

        if let Err(e) = put {
            tracing::warn!("Error storing tag {}: {:?}", t.tag, e);
        }
    }
}
