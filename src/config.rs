use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

/// Runtime settings. Read from `YELP_*` environment variables (and `.env`)
/// over the defaults below; CLI flags override individual values per run.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub export_dir: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub max_reviews: usize,
    pub page_delay_ms: u64,
    pub serpapi_url: String,
    pub openai_url: String,
    pub openai_model: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // A missing .env is normal; only the process environment is used then.
        let _ = dotenvy::dotenv();
        Self::from_builder(Config::builder().add_source(
            Environment::with_prefix("YELP").try_parsing(true),
        ))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        builder
            .set_default("db_path", "data/yelp.sqlite")?
            .set_default("export_dir", "data/exports")?
            .set_default("page_size", 20)?
            .set_default("max_pages", 5)?
            .set_default("max_reviews", 10)?
            .set_default("page_delay_ms", 2000)?
            .set_default("serpapi_url", "https://serpapi.com/search.json")?
            .set_default("openai_url", "https://api.openai.com/v1")?
            .set_default("openai_model", "gpt-3.5-turbo")?
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid YELP_* settings")
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}
