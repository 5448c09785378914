use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::{self, RestaurantRow};
use crate::mapper;
use crate::metadata::{self, ScrapeMetadata, ScrapeStatus};
use crate::serpapi::{SearchClient, SearchFilters, SearchRequest};

/// Knobs for one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub page_size: u32,
    pub max_pages: u32,
    pub max_reviews: usize,
    /// Pause between pages. Zero disables it.
    pub page_delay: Duration,
    pub filters: SearchFilters,
    pub with_details: bool,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        ScrapeOptions {
            page_size: 20,
            max_pages: 5,
            max_reviews: 10,
            page_delay: Duration::from_secs(2),
            filters: SearchFilters::default(),
            with_details: false,
        }
    }
}

/// What a run collected, plus the last metadata it recorded.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub restaurants: Vec<RestaurantRow>,
    pub metadata: ScrapeMetadata,
}

/// Per-page persistence counters, for logging.
#[derive(Debug, Default)]
struct PageStats {
    saved: usize,
    skipped: usize,
    store_errors: usize,
    reviews: usize,
}

/// Drives the page-by-page fetch loop for one (location, query) pair.
pub struct Scraper<'a, C> {
    conn: &'a Connection,
    client: &'a C,
    opts: ScrapeOptions,
}

impl<'a, C: SearchClient> Scraper<'a, C> {
    pub fn new(conn: &'a Connection, client: &'a C, opts: ScrapeOptions) -> Self {
        Scraper { conn, client, opts }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// Scrape up to `max_pages` pages starting at `start_page`.
    ///
    /// Never returns an error: a search failure stops the run and is recorded
    /// as `failed` in the returned metadata, along with whatever was collected
    /// before it.
    pub async fn run(&self, location: &str, query: &str, start_page: u32) -> ScrapeOutcome {
        let end_page = start_page.saturating_add(self.opts.max_pages);
        let mut restaurants: Vec<RestaurantRow> = Vec::new();
        let mut current_page = start_page;

        info!(
            "Scraping '{}' in '{}' from page {} (up to {} pages)",
            query, location, start_page, self.opts.max_pages
        );
        self.track(location, query, current_page, ScrapeStatus::InProgress, 0, None);

        let pb = ProgressBar::new(self.opts.max_pages as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} page {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        for page in start_page..end_page {
            current_page = page;
            self.track(
                location,
                query,
                page,
                ScrapeStatus::ProcessingPage,
                restaurants.len(),
                None,
            );

            let request = SearchRequest {
                query: query.to_string(),
                location: location.to_string(),
                offset: page.saturating_mul(self.opts.page_size),
                filters: self.opts.filters.clone(),
            };

            let entries = match self.client.search(&request).await {
                Ok(entries) => entries,
                Err(e) => {
                    pb.finish_and_clear();
                    let message = e.to_string();
                    warn!("Search failed on page {}: {}", page, message);
                    let metadata = self.track(
                        location,
                        query,
                        page,
                        ScrapeStatus::Failed,
                        restaurants.len(),
                        Some(&message),
                    );
                    return ScrapeOutcome {
                        restaurants,
                        metadata,
                    };
                }
            };

            let (page_rows, stats) = self.persist_page(&entries, location, query).await;
            restaurants.extend(page_rows);
            info!(
                "Page {}: {} entries, {} saved, {} skipped, {} store errors, {} reviews ({} total)",
                page,
                entries.len(),
                stats.saved,
                stats.skipped,
                stats.store_errors,
                stats.reviews,
                restaurants.len()
            );
            self.track(
                location,
                query,
                page,
                ScrapeStatus::Processing,
                restaurants.len(),
                None,
            );
            pb.inc(1);
            pb.set_message(format!("{} restaurants", restaurants.len()));

            if entries.len() < self.opts.page_size as usize {
                info!("Page {} was short, no more results", page);
                break;
            }

            if page + 1 < end_page && !self.opts.page_delay.is_zero() {
                tokio::time::sleep(self.opts.page_delay).await;
            }
        }

        pb.finish_and_clear();
        let metadata = self.track(
            location,
            query,
            current_page,
            ScrapeStatus::Completed,
            restaurants.len(),
            None,
        );
        info!(
            "Completed '{}' in '{}': {} restaurants",
            query,
            location,
            restaurants.len()
        );
        ScrapeOutcome {
            restaurants,
            metadata,
        }
    }

    /// Map and store one page. Returns every mapped restaurant, stored or not.
    async fn persist_page(
        &self,
        entries: &[Value],
        location: &str,
        query: &str,
    ) -> (Vec<RestaurantRow>, PageStats) {
        let mut stats = PageStats::default();
        let mut rows = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(row) = mapper::restaurant::map(entry, location, query) else {
                let title = entry.get("title").and_then(Value::as_str).unwrap_or("?");
                debug!("Skipping result without place id: {}", title);
                stats.skipped += 1;
                continue;
            };

            match db::upsert_restaurant(self.conn, &row) {
                Ok(()) => {
                    stats.saved += 1;
                    stats.reviews += self.persist_reviews(&row).await;
                    if self.opts.with_details {
                        self.persist_details(&row).await;
                    }
                }
                Err(e) => {
                    warn!("{:#}", e);
                    stats.store_errors += 1;
                }
            }
            rows.push(row);
        }

        (rows, stats)
    }

    async fn persist_reviews(&self, restaurant: &RestaurantRow) -> usize {
        let entries = match self.client.reviews(&restaurant.place_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Reviews for {} failed: {}", restaurant.name, e);
                return 0;
            }
        };

        let mut saved = 0;
        for entry in entries.iter().take(self.opts.max_reviews) {
            let Some(review) = mapper::review::map(entry, &restaurant.place_id) else {
                debug!("Skipping review without user id for {}", restaurant.place_id);
                continue;
            };
            match db::upsert_review(self.conn, &review) {
                Ok(()) => saved += 1,
                Err(e) => warn!("{:#}", e),
            }
        }
        saved
    }

    async fn persist_details(&self, restaurant: &RestaurantRow) {
        let entry = match self
            .client
            .details(&restaurant.place_id, &restaurant.location)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Details for {} failed: {}", restaurant.name, e);
                return;
            }
        };
        let details = mapper::details::map(&entry, &restaurant.place_id);
        if let Err(e) = db::upsert_details(self.conn, &details) {
            warn!("{:#}", e);
        }
    }

    /// Best-effort metadata write. On store failure the in-memory record is
    /// returned so the run can continue.
    fn track(
        &self,
        location: &str,
        query: &str,
        page: u32,
        status: ScrapeStatus,
        total: usize,
        error: Option<&str>,
    ) -> ScrapeMetadata {
        metadata::upsert(self.conn, location, query, page, status, total, error).unwrap_or_else(
            |e| {
                warn!("Failed to record scrape metadata ({}): {:#}", status, e);
                ScrapeMetadata::new(location, query, page, status, total, error)
            },
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::db::test_conn;
    use crate::serpapi::SearchError;

    /// Scripted search API: pages are served in order, reviews by place id.
    #[derive(Default)]
    pub(crate) struct FakeSearch {
        pages: Mutex<VecDeque<Result<Vec<Value>, String>>>,
        reviews: HashMap<String, Result<Vec<Value>, String>>,
        pub(crate) offsets: Mutex<Vec<u32>>,
        pub(crate) review_calls: Mutex<Vec<String>>,
        latency: Duration,
    }

    impl FakeSearch {
        pub(crate) fn with_pages(pages: Vec<Result<Vec<Value>, String>>) -> Self {
            FakeSearch {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        /// Each search call takes this long (virtual time in paused tests).
        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn review_page(mut self, place_id: &str, reviews: Result<Vec<Value>, String>) -> Self {
            self.reviews.insert(place_id.to_string(), reviews);
            self
        }
    }

    #[async_trait]
    impl SearchClient for FakeSearch {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<Value>, SearchError> {
            self.offsets.lock().unwrap().push(request.offset);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.pages.lock().unwrap().pop_front() {
                Some(Ok(entries)) => Ok(entries),
                Some(Err(msg)) => Err(SearchError::Api(msg)),
                None => Ok(Vec::new()),
            }
        }

        async fn reviews(&self, place_id: &str) -> Result<Vec<Value>, SearchError> {
            self.review_calls.lock().unwrap().push(place_id.to_string());
            match self.reviews.get(place_id) {
                Some(Ok(entries)) => Ok(entries.clone()),
                Some(Err(msg)) => Err(SearchError::Api(msg.clone())),
                None => Ok(Vec::new()),
            }
        }

        async fn details(&self, place_id: &str, _location: &str) -> Result<Value, SearchError> {
            Ok(json!({ "address": format!("{} Main St", place_id) }))
        }
    }

    pub(crate) fn entries(prefix: &str, n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({ "place_ids": [format!("{}-{}", prefix, i)], "title": format!("R {}", i) }))
            .collect()
    }

    pub(crate) fn opts(page_size: u32, max_pages: u32) -> ScrapeOptions {
        ScrapeOptions {
            page_size,
            max_pages,
            page_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_follows_page_phases() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("a", 20)), Ok(entries("b", 5))])
            .with_latency(Duration::from_secs(1));
        let scraper = Scraper::new(
            &conn,
            &client,
            ScrapeOptions {
                page_delay: Duration::from_secs(10),
                ..opts(20, 3)
            },
        );

        // Timeline: fetch p0 [0s, 1s), delay [1s, 11s), fetch p1 [11s, 12s).
        let observe = async {
            let mut seen = Vec::new();
            for wait_ms in [500, 4_500, 6_500] {
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                let m = metadata::get(&conn, "Seattle, WA", "Restaurants").unwrap().unwrap();
                seen.push((m.status, m.last_page, m.total_count));
            }
            seen
        };
        let (out, seen) = tokio::join!(scraper.run("Seattle, WA", "Restaurants", 0), observe);

        assert_eq!(
            seen,
            vec![
                (ScrapeStatus::ProcessingPage, 0, 0),
                (ScrapeStatus::Processing, 0, 20),
                (ScrapeStatus::ProcessingPage, 1, 20),
            ]
        );
        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.last_page, 1);
        assert_eq!(out.metadata.total_count, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_runs_only_between_pages() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("a", 20)), Ok(entries("b", 20))]);
        let scraper = Scraper::new(
            &conn,
            &client,
            ScrapeOptions {
                page_delay: Duration::from_secs(10),
                ..opts(20, 2)
            },
        );

        let start = tokio::time::Instant::now();
        let out = scraper.run("Seattle, WA", "Restaurants", 0).await;
        let elapsed = start.elapsed();

        assert_eq!(out.restaurants.len(), 40);
        // one pause between p0 and p1, none after the last page
        assert!(elapsed >= Duration::from_secs(10), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn short_page_skips_the_delay() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("a", 7))]);
        let scraper = Scraper::new(
            &conn,
            &client,
            ScrapeOptions {
                page_delay: Duration::from_secs(10),
                ..opts(20, 5)
            },
        );

        let start = tokio::time::Instant::now();
        scraper.run("Seattle, WA", "Restaurants", 0).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_never_sleeps() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![
            Ok(entries("a", 20)),
            Ok(entries("b", 20)),
            Ok(entries("c", 20)),
        ]);
        let start = tokio::time::Instant::now();
        let out = Scraper::new(&conn, &client, opts(20, 3))
            .run("Seattle, WA", "Restaurants", 0)
            .await;
        assert_eq!(out.restaurants.len(), 60);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn short_first_page_completes() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("p", 15))]);
        let out = Scraper::new(&conn, &client, opts(20, 1))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.total_count, 15);
        assert_eq!(out.restaurants.len(), 15);
        assert_eq!(count(&conn, "restaurants"), 15);

        let stored = metadata::get(&conn, "Seattle, WA", "Restaurants").unwrap().unwrap();
        assert_eq!(stored.status, ScrapeStatus::Completed);
        assert_eq!(stored.total_count, 15);
        assert_eq!(stored.last_page, 0);
    }

    #[tokio::test]
    async fn short_page_stops_before_max_pages() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![
            Ok(entries("a", 20)),
            Ok(entries("b", 3)),
            Ok(entries("c", 20)),
        ]);
        let out = Scraper::new(&conn, &client, opts(20, 5))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.last_page, 1);
        assert_eq!(out.metadata.total_count, 23);
        assert_eq!(*client.offsets.lock().unwrap(), vec![0, 20]);
    }

    #[tokio::test]
    async fn offsets_follow_page_index() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("a", 10)), Ok(entries("b", 10))]);
        Scraper::new(&conn, &client, opts(10, 2))
            .run("Seattle, WA", "Restaurants", 3)
            .await;
        assert_eq!(*client.offsets.lock().unwrap(), vec![30, 40]);
    }

    #[tokio::test]
    async fn zero_max_pages_fetches_nothing() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("a", 20))]);
        let out = Scraper::new(&conn, &client, opts(20, 0))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert!(client.offsets.lock().unwrap().is_empty());
        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.total_count, 0);
        assert!(out.restaurants.is_empty());
    }

    #[tokio::test]
    async fn empty_page_completes() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(Vec::new())]);
        let out = Scraper::new(&conn, &client, opts(20, 3))
            .run("Seattle, WA", "Restaurants", 0)
            .await;
        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.total_count, 0);
        assert_eq!(client.offsets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn error_on_page_keeps_earlier_pages() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![
            Ok(entries("a", 20)),
            Ok(entries("b", 20)),
            Err("Your account has run out of searches.".into()),
        ]);
        let out = Scraper::new(&conn, &client, opts(20, 5))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.metadata.status, ScrapeStatus::Failed);
        assert_eq!(out.metadata.last_page, 2);
        assert_eq!(out.metadata.total_count, 40);
        assert_eq!(
            out.metadata.error.as_deref(),
            Some("API Error: Your account has run out of searches.")
        );
        assert_eq!(out.restaurants.len(), 40);
        assert_eq!(count(&conn, "restaurants"), 40);

        let stored = metadata::get(&conn, "Seattle, WA", "Restaurants").unwrap().unwrap();
        assert_eq!(stored, out.metadata);
    }

    #[tokio::test]
    async fn entries_without_place_id_are_skipped() {
        let conn = test_conn();
        let mut page = entries("p", 4);
        page.push(json!({ "title": "No Id" }));
        let client = FakeSearch::with_pages(vec![Ok(page)]);
        let out = Scraper::new(&conn, &client, opts(20, 1))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.restaurants.len(), 4);
        assert_eq!(count(&conn, "restaurants"), 4);
        assert!(out.restaurants.iter().all(|r| !r.place_id.is_empty()));
    }

    #[tokio::test]
    async fn review_without_author_is_skipped() {
        let conn = test_conn();
        let raw = std::fs::read_to_string("tests/fixtures/reviews.json").unwrap();
        let reviews: Value = serde_json::from_str(&raw).unwrap();
        let reviews = reviews["reviews"].as_array().unwrap().clone();

        let client = FakeSearch::with_pages(vec![Ok(entries("p", 1))])
            .review_page("p-0", Ok(reviews));
        Scraper::new(&conn, &client, opts(20, 1))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert!(db::get_restaurant(&conn, "p-0").unwrap().is_some());
        let stored = db::fetch_reviews(&conn, "p-0").unwrap();
        let authors: Vec<&str> = stored.iter().map(|r| r.user.user_id.as_str()).collect();
        assert_eq!(authors, vec!["aB3xYz", "Qr7Lm2"]);
    }

    #[tokio::test]
    async fn review_fetch_failure_does_not_abort() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("p", 3))])
            .review_page("p-0", Err("timeout".into()))
            .review_page(
                "p-1",
                Ok(vec![json!({ "user": { "user_id": "u1" }, "rating": 4 })]),
            );
        let out = Scraper::new(&conn, &client, opts(20, 1))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(count(&conn, "restaurants"), 3);
        assert_eq!(count(&conn, "reviews"), 1);
        assert_eq!(client.review_calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reviews_are_capped() {
        let conn = test_conn();
        let many: Vec<Value> = (0..8)
            .map(|i| json!({ "user": { "user_id": format!("u{}", i) } }))
            .collect();
        let client = FakeSearch::with_pages(vec![Ok(entries("p", 1))]).review_page("p-0", Ok(many));
        let mut o = opts(20, 1);
        o.max_reviews = 5;
        Scraper::new(&conn, &client, o)
            .run("Seattle, WA", "Restaurants", 0)
            .await;
        assert_eq!(count(&conn, "reviews"), 5);
    }

    #[tokio::test]
    async fn store_errors_skip_records_without_aborting() {
        let conn = test_conn();
        conn.execute_batch("DROP TABLE reviews; DROP TABLE scrape_metadata;")
            .unwrap();
        let client = FakeSearch::with_pages(vec![Ok(entries("p", 2))]).review_page(
            "p-0",
            Ok(vec![json!({ "user": { "user_id": "u1" } })]),
        );
        let out = Scraper::new(&conn, &client, opts(20, 1))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(out.metadata.status, ScrapeStatus::Completed);
        assert_eq!(out.metadata.total_count, 2);
        assert_eq!(count(&conn, "restaurants"), 2);
    }

    #[tokio::test]
    async fn reappearing_restaurant_is_updated_not_duplicated() {
        let conn = test_conn();
        let mut first = entries("a", 20);
        first[0] = json!({ "place_ids": ["dup"], "title": "Before" });
        let second = vec![json!({ "place_ids": ["dup"], "title": "After" })];
        let client = FakeSearch::with_pages(vec![Ok(first), Ok(second)]);
        Scraper::new(&conn, &client, opts(20, 2))
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        assert_eq!(count(&conn, "restaurants"), 20);
        assert_eq!(db::get_restaurant(&conn, "dup").unwrap().unwrap().name, "After");
    }

    #[tokio::test]
    async fn details_are_stored_when_enabled() {
        let conn = test_conn();
        let client = FakeSearch::with_pages(vec![Ok(entries("p", 2))]);
        let mut o = opts(20, 1);
        o.with_details = true;
        Scraper::new(&conn, &client, o)
            .run("Seattle, WA", "Restaurants", 0)
            .await;

        let d = db::get_details(&conn, "p-1").unwrap().unwrap();
        assert_eq!(d.address, "p-1 Main St");
    }
}
