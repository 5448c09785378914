use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::db::price_level;
use crate::truncate;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("SERPAPI_API_KEY environment variable must be set")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("API Error: {0}")]
    Api(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

// The request URL carries the api key; keep it out of the message.
impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Http(e.without_url())
    }
}

/// Optional search filters. "all" (any case) or empty means no filter.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub price: Option<String>,
    pub category: Option<String>,
    pub sort_by: Option<String>,
}

impl SearchFilters {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(level) = active(&self.price).and_then(price_level) {
            params.push(("attrs", format!("RestaurantsPriceRange2.{}", level)));
        }
        if let Some(category) = active(&self.category) {
            params.push(("cflt", category.to_string()));
        }
        if let Some(sort) = active(&self.sort_by) {
            params.push(("sortby", sort.to_string()));
        }
        params
    }
}

fn active(v: &Option<String>) -> Option<&str> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
}

/// One page of a listing search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub location: String,
    pub offset: u32,
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("engine", "yelp".to_string()),
            ("find_desc", self.query.clone()),
            ("find_loc", self.location.clone()),
            ("start", self.offset.to_string()),
        ];
        params.extend(self.filters.params());
        params
    }
}

/// The listing/review search API as seen by the scraper.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Raw `organic_results` entries for one page.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Value>, SearchError>;

    /// Raw `reviews` entries for one restaurant.
    async fn reviews(&self, place_id: &str) -> Result<Vec<Value>, SearchError>;

    /// Raw business entry for one restaurant.
    async fn details(&self, place_id: &str, location: &str) -> Result<Value, SearchError>;
}

/// SerpApi-backed client for the `yelp` and `yelp_reviews` engines.
pub struct SerpApiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl SerpApiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        SerpApiClient {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Build from `SERPAPI_API_KEY`.
    pub fn from_env(base_url: &str) -> Result<Self, SearchError> {
        let key = std::env::var("SERPAPI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SearchError::MissingApiKey)?;
        Ok(Self::new(key, base_url))
    }

    async fn get(&self, params: &[(&'static str, String)]) -> Result<Value, SearchError> {
        debug!(?params, "SerpApi request");
        let response = self
            .http
            .get(&self.base_url)
            .query(params)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // SerpApi reports most failures as {"error": "..."}, often with a 4xx.
        match serde_json::from_str::<Value>(&body) {
            Ok(json) if status.is_success() || json.get("error").is_some() => {
                check_response(json)
            }
            _ if !status.is_success() => Err(SearchError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            }),
            _ => Err(SearchError::Decode(truncate(&body, 200))),
        }
    }
}

#[async_trait]
impl SearchClient for SerpApiClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Value>, SearchError> {
        let json = self.get(&request.params()).await?;
        Ok(list_at(&json, "organic_results"))
    }

    async fn reviews(&self, place_id: &str) -> Result<Vec<Value>, SearchError> {
        let params = [
            ("engine", "yelp_reviews".to_string()),
            ("place_id", place_id.to_string()),
        ];
        let json = self.get(&params).await?;
        Ok(list_at(&json, "reviews"))
    }

    async fn details(&self, place_id: &str, location: &str) -> Result<Value, SearchError> {
        let params = [
            ("engine", "yelp".to_string()),
            ("place_id", place_id.to_string()),
            ("find_loc", location.to_string()),
        ];
        let json = self.get(&params).await?;
        Ok(list_at(&json, "organic_results")
            .into_iter()
            .next()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}

/// Reject bodies carrying an `error` key; accept any other JSON object.
fn check_response(json: Value) -> Result<Value, SearchError> {
    match json.get("error") {
        Some(Value::String(msg)) => Err(SearchError::Api(msg.clone())),
        Some(other) => Err(SearchError::Api(other.to_string())),
        None if json.is_object() => Ok(json),
        None => Err(SearchError::Decode(truncate(&json.to_string(), 200))),
    }
}

/// A missing list means "no results", not an error.
fn list_at(json: &Value, key: &str) -> Vec<Value> {
    json.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
