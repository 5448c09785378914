use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::metadata;
use crate::scrape::{ScrapeOutcome, Scraper};
use crate::serpapi::SearchClient;

/// First page for the next run of (location, query): 0 when the pair has no
/// history, otherwise one past the last recorded page.
///
/// The recorded status is not consulted, so a page that failed last time is
/// skipped rather than retried.
pub fn start_page(conn: &Connection, location: &str, query: &str) -> Result<u32> {
    Ok(match metadata::get(conn, location, query)? {
        Some(prev) => prev.last_page.saturating_add(1),
        None => 0,
    })
}

pub async fn resume<C: SearchClient>(
    scraper: &Scraper<'_, C>,
    location: &str,
    query: &str,
) -> Result<ScrapeOutcome> {
    let page = start_page(scraper.conn(), location, query)?;
    if page == 0 {
        info!("No previous scrape for '{}' in '{}', starting at page 0", query, location);
    } else {
        info!("Resuming '{}' in '{}' from page {}", query, location, page);
    }
    Ok(scraper.run(location, query, page).await)
}
