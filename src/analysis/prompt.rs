use serde::Serialize;
use serde_json::Value;

use crate::db::RestaurantSnapshot;

const SAMPLE_REVIEWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnalysisKind {
    /// Summary, strengths and weaknesses, common themes, improvements
    General,
    /// Review sentiment with supporting quotes
    Sentiment,
    /// Side-by-side comparison and positioning
    Competitive,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PromptRestaurant {
    pub name: String,
    pub rating: f64,
    pub review_count: i64,
    pub price: String,
    pub categories: Vec<String>,
    pub neighborhood: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_reviews: Vec<SampleReview>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SampleReview {
    pub rating: f64,
    pub text: String,
}

/// Trim stored data down to what the model needs, keeping the prompt small.
pub fn preprocess(snapshots: &[RestaurantSnapshot], max_restaurants: usize) -> Vec<PromptRestaurant> {
    snapshots
        .iter()
        .take(max_restaurants)
        .map(|s| {
            let r = &s.restaurant;
            let highlights = match &r.highlights {
                Value::Array(a) if !a.is_empty() => Some(r.highlights.clone()),
                Value::Object(o) if !o.is_empty() => Some(r.highlights.clone()),
                Value::String(t) if !t.is_empty() => Some(r.highlights.clone()),
                _ => None,
            };
            PromptRestaurant {
                name: r.name.clone(),
                rating: r.rating,
                review_count: r.review_count,
                price: r.price.clone(),
                categories: r.categories.clone(),
                neighborhood: r.neighborhood.clone(),
                highlights,
                sample_reviews: s
                    .reviews
                    .iter()
                    .take(SAMPLE_REVIEWS)
                    .map(|rv| SampleReview {
                        rating: rv.rating,
                        text: rv.comment.text.clone(),
                    })
                    .collect(),
            }
        })
        .collect()
}

pub fn build(kind: AnalysisKind, data: &[PromptRestaurant]) -> String {
    let n = data.len();
    let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string());
    match kind {
        AnalysisKind::General => format!(
            "You are an expert restaurant analyst with deep knowledge of the food industry.

Analyze the following {n} restaurants and provide insights:

{rendered}

Please provide:
1. An overall summary of the restaurants (1-2 paragraphs)
2. Key strengths and weaknesses for each restaurant based on reviews
3. Common themes across all restaurants
4. Suggestions for improvement for each restaurant

Format your response with clear headings and bullet points where appropriate.
"
        ),
        AnalysisKind::Sentiment => format!(
            "You are an expert in sentiment analysis for the restaurant industry.

Analyze the reviews for these {n} restaurants:

{rendered}

For each restaurant:
1. Identify the overall sentiment (positive, negative, or mixed)
2. Extract key positive phrases customers use
3. Extract key negative phrases customers use
4. Identify specific aspects receiving praise (food, service, atmosphere, etc.)
5. Identify specific aspects receiving criticism

Use specific quotes from reviews to support your analysis.
"
        ),
        AnalysisKind::Competitive => format!(
            "You are a restaurant industry consultant specializing in competitive analysis.

Compare and contrast these {n} restaurants:

{rendered}

Provide:
1. A comparison table of key metrics (rating, price point, popularity)
2. Each restaurant's unique selling proposition
3. Areas where each restaurant outperforms competitors
4. Areas where each restaurant underperforms
5. Market positioning analysis
6. Recommendations for each restaurant to improve competitive position

Format your analysis with clear sections for each point of comparison.
"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RestaurantRow, ReviewComment, ReviewRow};
    use serde_json::json;

    fn snapshot(name: &str, reviews: usize, highlights: Value) -> RestaurantSnapshot {
        RestaurantSnapshot {
            restaurant: RestaurantRow {
                place_id: name.to_lowercase(),
                name: name.into(),
                rating: 4.0,
                review_count: 50,
                highlights,
                ..Default::default()
            },
            reviews: (0..reviews)
                .map(|i| ReviewRow {
                    rating: 5.0,
                    comment: ReviewComment {
                        text: format!("review {}", i),
                        language: "en".into(),
                    },
                    ..Default::default()
                })
                .collect(),
            details: None,
        }
    }

    #[test]
    fn limits_restaurants_and_reviews() {
        let snaps: Vec<_> = (0..5)
            .map(|i| snapshot(&format!("R{}", i), 6, json!([])))
            .collect();
        let data = preprocess(&snaps, 3);
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|r| r.sample_reviews.len() == 3));
        assert_eq!(data[0].sample_reviews[2].text, "review 2");
    }

    #[test]
    fn optional_parts_only_when_present() {
        let data = preprocess(
            &[
                snapshot("Plain", 0, json!([])),
                snapshot("Hot", 1, json!(["Hot and New"])),
            ],
            3,
        );
        let plain = serde_json::to_value(&data[0]).unwrap();
        assert!(plain.get("highlights").is_none());
        assert!(plain.get("sample_reviews").is_none());

        let hot = serde_json::to_value(&data[1]).unwrap();
        assert_eq!(hot["highlights"], json!(["Hot and New"]));
        assert_eq!(hot["sample_reviews"][0]["text"], json!("review 0"));
    }

    #[test]
    fn prompts_embed_count_and_data() {
        let data = preprocess(&[snapshot("Kedai", 1, json!([]))], 3);
        for kind in [AnalysisKind::General, AnalysisKind::Sentiment, AnalysisKind::Competitive] {
            let prompt = build(kind, &data);
            assert!(prompt.contains(" 1 restaurants"));
            assert!(prompt.contains("\"name\": \"Kedai\""));
        }
        assert!(build(AnalysisKind::Sentiment, &data).contains("quotes from reviews"));
        assert!(build(AnalysisKind::Competitive, &data).contains("comparison table"));
    }
}
