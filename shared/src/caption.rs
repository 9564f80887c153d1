//! Rule-based caption analysis: product mentions, prices, calls to action,
//! sentiment and product features.

use crate::types::VideoSubmission;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// `1299`, `29.99` or `1,299.99`.
const AMOUNT: &str = r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?";

static PRICE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\$\s?({a})|€\s?({a})|£\s?({a})|\b(usd|eur|gbp|cad|aud)\s?({a})|({a})\s?(\$|€|£|dollars?\b|bucks\b|euros?\b|pounds?\b)",
        a = AMOUNT
    ))
    .expect("Invalid price regex")
});

static PROMO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\buse\s+code\s+([a-z0-9]+)").expect("Invalid promo regex"));

static HASHTAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("Invalid hashtag regex"));

static MENTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_.]+)").expect("Invalid mention regex"));

/// Word (or two-word phrase) -> (product name, category).
const PRODUCT_LEXICON: &[(&str, &str, &str)] = &[
    ("dress", "dress", "apparel"),
    ("dresses", "dress", "apparel"),
    ("shirt", "shirt", "apparel"),
    ("shirts", "shirt", "apparel"),
    ("top", "top", "apparel"),
    ("jeans", "jeans", "apparel"),
    ("jacket", "jacket", "apparel"),
    ("hoodie", "hoodie", "apparel"),
    ("sweater", "sweater", "apparel"),
    ("skirt", "skirt", "apparel"),
    ("leggings", "leggings", "apparel"),
    ("shoes", "shoes", "footwear"),
    ("sneakers", "sneakers", "footwear"),
    ("boots", "boots", "footwear"),
    ("heels", "heels", "footwear"),
    ("sandals", "sandals", "footwear"),
    ("bag", "bag", "bags"),
    ("bags", "bag", "bags"),
    ("handbag", "handbag", "bags"),
    ("purse", "purse", "bags"),
    ("tote", "tote", "bags"),
    ("backpack", "backpack", "bags"),
    ("wallet", "wallet", "bags"),
    ("jewelry", "jewelry", "jewelry"),
    ("necklace", "necklace", "jewelry"),
    ("earrings", "earrings", "jewelry"),
    ("ring", "ring", "jewelry"),
    ("bracelet", "bracelet", "jewelry"),
    ("watch", "watch", "jewelry"),
    ("makeup", "makeup", "beauty"),
    ("lipstick", "lipstick", "beauty"),
    ("mascara", "mascara", "beauty"),
    ("foundation", "foundation", "beauty"),
    ("eyeshadow", "eyeshadow", "beauty"),
    ("blush", "blush", "beauty"),
    ("perfume", "perfume", "beauty"),
    ("skincare", "skincare", "skincare"),
    ("serum", "serum", "skincare"),
    ("moisturizer", "moisturizer", "skincare"),
    ("sunscreen", "sunscreen", "skincare"),
    ("cleanser", "cleanser", "skincare"),
    ("sunglasses", "sunglasses", "accessories"),
    ("hat", "hat", "accessories"),
    ("belt", "belt", "accessories"),
    ("scarf", "scarf", "accessories"),
    ("accessories", "accessories", "accessories"),
    ("phone case", "phone case", "electronics"),
    ("headphones", "headphones", "electronics"),
    ("earbuds", "earbuds", "electronics"),
    ("charger", "charger", "electronics"),
    ("candle", "candle", "home"),
    ("mug", "mug", "home"),
    ("blanket", "blanket", "home"),
];

const CTA_PHRASES: &[&str] = &[
    "link in bio",
    "shop now",
    "buy now",
    "order now",
    "get yours",
    "tap the link",
    "click the link",
    "shop the look",
    "add to cart",
    "swipe up",
    "limited time",
    "dm me",
    "dm to order",
];

const POSITIVE_WORDS: &[&str] = &[
    "love", "loving", "amazing", "perfect", "best", "great", "beautiful", "gorgeous", "obsessed",
    "cute", "favorite", "favourite", "comfy", "stunning", "awesome", "excellent", "happy", "must-have",
    "fire", "worth",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "worst", "disappointed", "disappointing", "ugly", "terrible", "awful", "broke",
    "broken", "cheaply", "returned", "refund", "scam", "waste",
];

const FEATURE_WORDS: &[&str] = &[
    "waterproof",
    "lightweight",
    "breathable",
    "vegan",
    "organic",
    "handmade",
    "wireless",
    "adjustable",
    "stretchy",
    "sustainable",
    "cruelty-free",
    "long-lasting",
    "oversized",
    "reversible",
    "rechargeable",
    "comfortable",
    "durable",
    "soft",
    "hypoallergenic",
    "unisex",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductMention {
    pub name: String,
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceInfo {
    pub amount: f64,
    pub currency: String,
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionAnalysis {
    pub video_id: String,
    pub processing_job_id: String,
    pub products_mentioned: Vec<ProductMention>,
    pub pricing_info: Vec<PriceInfo>,
    pub call_to_actions: Vec<String>,
    pub sentiment_score: f64,
    pub key_features: Vec<String>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub confidence_score: f64,
    pub low_confidence: bool,
    pub processing_timestamp: String,
}

/// Lowercase word tokens; hyphens inside words are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a hashtag or tag: no leading `#`, lowercase, trimmed.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Look up a token in the product lexicon, returning `(name, category)`.
pub fn lookup_product(token: &str) -> Option<(&'static str, &'static str)> {
    PRODUCT_LEXICON
        .iter()
        .find(|(word, _, _)| *word == token)
        .map(|(_, name, category)| (*name, *category))
}

/// Product mentions in `text`, in order of first appearance.
pub fn find_products(text: &str, hashtags: &[String]) -> Vec<ProductMention> {
    let tokens = tokenize(text);
    let tagged: HashSet<String> = hashtags.iter().map(|h| normalize_tag(h)).collect();

    let mut candidates: Vec<(usize, &str, &str)> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if let Some((name, category)) = lookup_product(token) {
            candidates.push((i, name, category));
        }
    }
    for (i, pair) in tokens.windows(2).enumerate() {
        let phrase = format!("{} {}", pair[0], pair[1]);
        if let Some((name, category)) = lookup_product(&phrase) {
            candidates.push((i, name, category));
        }
    }
    candidates.sort_by_key(|(i, _, _)| *i);

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|(_, name, _)| seen.insert(*name))
        .map(|(_, name, category)| ProductMention {
            name: name.to_string(),
            category: category.to_string(),
            confidence: if tagged.contains(name) { 0.9 } else { 0.8 },
        })
        .collect()
}

fn currency_for_unit(unit: &str) -> &'static str {
    match unit.to_lowercase().as_str() {
        "€" | "euro" | "euros" => "EUR",
        "£" | "pound" | "pounds" => "GBP",
        _ => "USD",
    }
}

pub fn find_prices(text: &str) -> Vec<PriceInfo> {
    PRICE_REGEX
        .captures_iter(text)
        .filter_map(|cap| {
            let (amount, currency) = if let Some(m) = cap.get(1) {
                (m.as_str(), "USD".to_string())
            } else if let Some(m) = cap.get(2) {
                (m.as_str(), "EUR".to_string())
            } else if let Some(m) = cap.get(3) {
                (m.as_str(), "GBP".to_string())
            } else if let (Some(code), Some(m)) = (cap.get(4), cap.get(5)) {
                (m.as_str(), code.as_str().to_uppercase())
            } else if let (Some(m), Some(unit)) = (cap.get(6), cap.get(7)) {
                (m.as_str(), currency_for_unit(unit.as_str()).to_string())
            } else {
                return None;
            };
            let amount = amount.replace(',', "").parse::<f64>().ok()?;
            Some(PriceInfo {
                amount,
                currency,
                raw: cap.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

pub fn find_calls_to_action(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found: Vec<String> = CTA_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .map(|phrase| phrase.to_string())
        .collect();

    for cap in PROMO_REGEX.captures_iter(text) {
        if let Some(code) = cap.get(1) {
            found.push(format!("use code {}", code.as_str().to_uppercase()));
        }
    }
    found
}

/// Lexicon sentiment in [0, 1]; 0.5 is neutral.
pub fn sentiment_score(tokens: &[String]) -> f64 {
    let positive = tokens
        .iter()
        .filter(|t| POSITIVE_WORDS.contains(&t.as_str()))
        .count() as f64;
    let negative = tokens
        .iter()
        .filter(|t| NEGATIVE_WORDS.contains(&t.as_str()))
        .count() as f64;
    0.5 + 0.5 * (positive - negative) / (positive + negative + 2.0)
}

pub fn find_features(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .filter(|t| FEATURE_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert((*t).clone()))
        .cloned()
        .collect()
}

/// Submitted tags plus any `#tag` / `@user` in the caption, deduplicated.
fn merge_marked(submitted: &[String], regex: &Regex, text: &str, prefix: char) -> Vec<String> {
    let mut seen = HashSet::new();
    submitted
        .iter()
        .map(|t| t.trim().trim_start_matches(prefix).to_lowercase())
        .chain(
            regex
                .captures_iter(text)
                .filter_map(|cap| cap.get(1))
                .map(|m| m.as_str().trim_end_matches('.').to_lowercase()),
        )
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Analyze a video caption. Results under `threshold` are flagged, not dropped.
pub fn analyze(
    video: &VideoSubmission,
    job_id: &str,
    threshold: f64,
    now: DateTime<Utc>,
) -> CaptionAnalysis {
    let caption = video.caption.as_str();
    let tokens = tokenize(caption);
    let hashtags = merge_marked(&video.hashtags, &HASHTAG_REGEX, caption, '#');
    let mentions = merge_marked(&video.mentions, &MENTION_REGEX, caption, '@');

    let products_mentioned = find_products(caption, &hashtags);
    let pricing_info = find_prices(caption);
    let call_to_actions = find_calls_to_action(caption);
    let sentiment = sentiment_score(&tokens);
    let key_features = find_features(&tokens);

    let signals = [
        !products_mentioned.is_empty(),
        !pricing_info.is_empty(),
        !call_to_actions.is_empty(),
        !key_features.is_empty(),
        (sentiment - 0.5).abs() > f64::EPSILON,
    ];
    let found = signals.iter().filter(|s| **s).count() as f64;
    let confidence_score = (0.5 + 0.1 * found).min(0.95);

    tracing::info!(
        "Caption for video {}: {} products, {} prices, confidence {:.2}",
        video.video_id,
        products_mentioned.len(),
        pricing_info.len(),
        confidence_score
    );

    CaptionAnalysis {
        video_id: video.video_id.clone(),
        processing_job_id: job_id.to_string(),
        products_mentioned,
        pricing_info,
        call_to_actions,
        sentiment_score: sentiment,
        key_features,
        hashtags,
        mentions,
        confidence_score,
        low_confidence: confidence_score < threshold,
        processing_timestamp: now.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn video(caption: &str, hashtags: &[&str]) -> VideoSubmission {
        VideoSubmission {
            video_id: "v1".to_string(),
            video_url: "https://www.tiktok.com/@glowshop/video/1".to_string(),
            caption: caption.to_string(),
            hashtags: hashtags.iter().map(|h| h.to_string()).collect(),
            mentions: vec![],
            thumbnail_url: None,
            product_info: None,
            detections: vec![],
        }
    }

    #[test]
    fn test_full_caption() {
        let v = video(
            "Obsessed with this linen dress! Only $29.99, waterproof tote too. Link in bio, use code GLOW10 #dress @glowshop",
            &["Summer"],
        );
        let result = analyze(&v, "job-1", 0.7, Utc::now());

        let dress = &result.products_mentioned[0];
        assert_eq!(dress.name, "dress");
        assert_eq!(dress.category, "apparel");
        assert!(approx(dress.confidence, 0.9));
        assert!(result
            .products_mentioned
            .iter()
            .any(|p| p.name == "tote" && approx(p.confidence, 0.8)));

        assert_eq!(result.pricing_info.len(), 1);
        assert!(approx(result.pricing_info[0].amount, 29.99));
        assert_eq!(result.pricing_info[0].currency, "USD");

        assert_eq!(result.call_to_actions, vec!["link in bio", "use code GLOW10"]);
        assert_eq!(result.key_features, vec!["waterproof"]);
        assert_eq!(result.hashtags, vec!["summer", "dress"]);
        assert_eq!(result.mentions, vec!["glowshop"]);
        assert!(result.sentiment_score > 0.5);
        assert!(approx(result.confidence_score, 0.95));
        assert!(!result.low_confidence);
    }

    #[test]
    fn test_price_formats() {
        let prices = find_prices("was 29.99$ now €10, UK £5.50, USD 20 or 15 dollars");
        let pairs: Vec<(f64, &str)> = prices
            .iter()
            .map(|p| (p.amount, p.currency.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (29.99, "USD"),
                (10.0, "EUR"),
                (5.5, "GBP"),
                (20.0, "USD"),
                (15.0, "USD")
            ]
        );
    }

    #[test]
    fn test_thousands_separators() {
        let prices = find_prices("Bag $1,299, coat €2,450.50, set of 2 for 1,000 dollars");
        let amounts: Vec<f64> = prices.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![1299.0, 2450.5, 1000.0]);
        assert_eq!(prices[0].raw, "$1,299");
        assert_eq!(prices[1].currency, "EUR");
    }

    #[test]
    fn test_adjacent_prices_do_not_overlap() {
        let prices = find_prices("$20 $30");
        assert_eq!(prices.len(), 2);
        assert!(approx(prices[1].amount, 30.0));
    }

    #[test]
    fn test_two_word_product() {
        let products = find_products("Glitter phone case restock", &[]);
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "phone case");
        assert_eq!(products[0].category, "electronics");
    }

    #[test]
    fn test_products_deduplicated() {
        let products = find_products("dress dresses DRESS", &[]);
        assert_eq!(products.len(), 1);
    }

    #[test]
    fn test_sentiment_bounds() {
        assert!(approx(sentiment_score(&tokenize("just a caption")), 0.5));
        assert!(approx(sentiment_score(&tokenize("love it")), 0.5 + 0.5 / 3.0));
        assert!(sentiment_score(&tokenize("worst purchase, broken")) < 0.5);
        let gushing = tokenize(&"love ".repeat(500));
        assert!(sentiment_score(&gushing) < 1.0);
    }

    #[test]
    fn test_empty_caption_is_low_confidence() {
        let result = analyze(&video("", &[]), "job-2", 0.7, Utc::now());
        assert!(approx(result.confidence_score, 0.5));
        assert!(result.low_confidence);
        assert!(result.products_mentioned.is_empty());
    }

    #[test]
    fn test_hyphenated_features() {
        let tokens = tokenize("Cruelty-free, long-lasting and soft-ish");
        assert_eq!(find_features(&tokens), vec!["cruelty-free", "long-lasting"]);
    }
}
