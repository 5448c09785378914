use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS restaurants (
            place_id        TEXT PRIMARY KEY,
            name            TEXT NOT NULL DEFAULT '',
            rating          REAL NOT NULL DEFAULT 0,
            review_count    INTEGER NOT NULL DEFAULT 0,
            price           TEXT NOT NULL DEFAULT '',
            categories      TEXT NOT NULL DEFAULT '[]',
            neighborhood    TEXT NOT NULL DEFAULT '',
            phone           TEXT NOT NULL DEFAULT '',
            url             TEXT NOT NULL DEFAULT '',
            service_options TEXT NOT NULL DEFAULT '{}',
            highlights      TEXT NOT NULL DEFAULT '[]',
            location        TEXT NOT NULL DEFAULT '',
            query           TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_restaurants_pair ON restaurants(location, query);

        CREATE TABLE IF NOT EXISTS reviews (
            id          INTEGER PRIMARY KEY,
            place_id    TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL DEFAULT '',
            user_data   TEXT NOT NULL DEFAULT '{}',
            position    INTEGER NOT NULL DEFAULT 0,
            rating      REAL NOT NULL DEFAULT 0,
            date        TEXT NOT NULL DEFAULT '',
            text        TEXT NOT NULL DEFAULT '',
            language    TEXT NOT NULL DEFAULT '',
            useful      INTEGER NOT NULL DEFAULT 0,
            funny       INTEGER NOT NULL DEFAULT 0,
            cool        INTEGER NOT NULL DEFAULT 0,
            photos      TEXT NOT NULL DEFAULT '[]',
            tags        TEXT NOT NULL DEFAULT '[]',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(place_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_reviews_place ON reviews(place_id);

        CREATE TABLE IF NOT EXISTS restaurant_details (
            place_id     TEXT PRIMARY KEY,
            hours        TEXT NOT NULL DEFAULT '{}',
            address      TEXT NOT NULL DEFAULT '',
            website      TEXT NOT NULL DEFAULT '',
            photos       TEXT NOT NULL DEFAULT '[]',
            menu         TEXT NOT NULL DEFAULT '{}',
            health_score REAL NOT NULL DEFAULT 0,
            updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS scrape_metadata (
            id           INTEGER PRIMARY KEY,
            location     TEXT NOT NULL,
            query        TEXT NOT NULL,
            last_page    INTEGER NOT NULL DEFAULT 0,
            status       TEXT NOT NULL CHECK(status IN
                ('not_started','in_progress','processing_page','processing','completed','failed')),
            total_count  INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL,
            error        TEXT,
            UNIQUE(location, query)
        );
        ",
    )?;
    Ok(())
}

// ── Restaurants ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestaurantRow {
    pub place_id: String,
    pub name: String,
    pub rating: f64,
    pub review_count: i64,
    pub price: String,
    pub categories: Vec<String>,
    pub neighborhood: String,
    pub phone: String,
    pub url: String,
    pub service_options: Value,
    pub highlights: Value,
    pub location: String,
    pub query: String,
}

impl RestaurantRow {
    /// Ordinal of the price tier ("$" = 1 .. "$$$$" = 4).
    pub fn price_level(&self) -> Option<u8> {
        price_level(&self.price)
    }
}

pub fn price_level(price: &str) -> Option<u8> {
    let n = price.len();
    if (1..=4).contains(&n) && price.chars().all(|c| c == '$') {
        Some(n as u8)
    } else {
        None
    }
}

pub fn upsert_restaurant(conn: &Connection, r: &RestaurantRow) -> Result<()> {
    conn.execute(
        "INSERT INTO restaurants
         (place_id, name, rating, review_count, price, categories, neighborhood, phone,
          url, service_options, highlights, location, query)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
         ON CONFLICT(place_id) DO UPDATE SET
            name = excluded.name,
            rating = excluded.rating,
            review_count = excluded.review_count,
            price = excluded.price,
            categories = excluded.categories,
            neighborhood = excluded.neighborhood,
            phone = excluded.phone,
            url = excluded.url,
            service_options = excluded.service_options,
            highlights = excluded.highlights,
            location = excluded.location,
            query = excluded.query,
            updated_at = datetime('now')",
        rusqlite::params![
            r.place_id,
            r.name,
            r.rating,
            r.review_count,
            r.price,
            serde_json::to_string(&r.categories)?,
            r.neighborhood,
            r.phone,
            r.url,
            r.service_options.to_string(),
            r.highlights.to_string(),
            r.location,
            r.query,
        ],
    )
    .with_context(|| format!("Failed to upsert restaurant {}", r.place_id))?;
    Ok(())
}

const RESTAURANT_COLUMNS: &str = "place_id, name, rating, review_count, price, categories,
    neighborhood, phone, url, service_options, highlights, location, query";

fn restaurant_from_row(row: &rusqlite::Row) -> rusqlite::Result<RestaurantRow> {
    let categories: String = row.get(5)?;
    let service_options: String = row.get(9)?;
    let highlights: String = row.get(10)?;
    Ok(RestaurantRow {
        place_id: row.get(0)?,
        name: row.get(1)?,
        rating: row.get(2)?,
        review_count: row.get(3)?,
        price: row.get(4)?,
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        neighborhood: row.get(6)?,
        phone: row.get(7)?,
        url: row.get(8)?,
        service_options: serde_json::from_str(&service_options).unwrap_or_default(),
        highlights: serde_json::from_str(&highlights).unwrap_or_default(),
        location: row.get(11)?,
        query: row.get(12)?,
    })
}

pub fn get_restaurant(conn: &Connection, place_id: &str) -> Result<Option<RestaurantRow>> {
    let sql = format!("SELECT {} FROM restaurants WHERE place_id = ?1", RESTAURANT_COLUMNS);
    let row = conn
        .query_row(&sql, [place_id], restaurant_from_row)
        .optional()?;
    Ok(row)
}

/// Restaurants collected for a (location, query) pair, best rated first.
pub fn fetch_restaurants(
    conn: &Connection,
    location: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<RestaurantRow>> {
    let sql = format!(
        "SELECT {} FROM restaurants
         WHERE location = ?1 AND query = ?2
         ORDER BY rating DESC, review_count DESC, place_id{}",
        RESTAURANT_COLUMNS,
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([location, query], restaurant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Reviews ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewAuthor {
    pub name: String,
    pub user_id: String,
    pub link: String,
    pub thumbnail: String,
    pub address: String,
    pub friends: i64,
    pub photos: i64,
    pub reviews: i64,
    pub elite_year: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewComment {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewFeedback {
    pub useful: i64,
    pub funny: i64,
    pub cool: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPhoto {
    pub link: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewRow {
    pub place_id: String,
    pub position: i64,
    pub rating: f64,
    pub date: String,
    pub user: ReviewAuthor,
    pub comment: ReviewComment,
    pub feedback: ReviewFeedback,
    pub photos: Vec<ReviewPhoto>,
    pub tags: Vec<String>,
}

/// Insert or replace the review written by `user.user_id` for `place_id`.
pub fn upsert_review(conn: &Connection, r: &ReviewRow) -> Result<()> {
    conn.execute(
        "INSERT INTO reviews
         (place_id, user_id, user_name, user_data, position, rating, date, text, language,
          useful, funny, cool, photos, tags)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
         ON CONFLICT(place_id, user_id) DO UPDATE SET
            user_name = excluded.user_name,
            user_data = excluded.user_data,
            position = excluded.position,
            rating = excluded.rating,
            date = excluded.date,
            text = excluded.text,
            language = excluded.language,
            useful = excluded.useful,
            funny = excluded.funny,
            cool = excluded.cool,
            photos = excluded.photos,
            tags = excluded.tags,
            updated_at = datetime('now')",
        rusqlite::params![
            r.place_id,
            r.user.user_id,
            r.user.name,
            serde_json::to_string(&r.user)?,
            r.position,
            r.rating,
            r.date,
            r.comment.text,
            r.comment.language,
            r.feedback.useful,
            r.feedback.funny,
            r.feedback.cool,
            serde_json::to_string(&r.photos)?,
            serde_json::to_string(&r.tags)?,
        ],
    )
    .with_context(|| {
        format!("Failed to upsert review {} for {}", r.user.user_id, r.place_id)
    })?;
    Ok(())
}

pub fn fetch_reviews(conn: &Connection, place_id: &str) -> Result<Vec<ReviewRow>> {
    let mut stmt = conn.prepare(
        "SELECT place_id, position, rating, date, user_data, text, language,
                useful, funny, cool, photos, tags
         FROM reviews WHERE place_id = ?1
         ORDER BY position, id",
    )?;
    let rows = stmt
        .query_map([place_id], |row| {
            let user: String = row.get(4)?;
            let photos: String = row.get(10)?;
            let tags: String = row.get(11)?;
            Ok(ReviewRow {
                place_id: row.get(0)?,
                position: row.get(1)?,
                rating: row.get(2)?,
                date: row.get(3)?,
                user: serde_json::from_str(&user).unwrap_or_default(),
                comment: ReviewComment {
                    text: row.get(5)?,
                    language: row.get(6)?,
                },
                feedback: ReviewFeedback {
                    useful: row.get(7)?,
                    funny: row.get(8)?,
                    cool: row.get(9)?,
                },
                photos: serde_json::from_str(&photos).unwrap_or_default(),
                tags: serde_json::from_str(&tags).unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Details ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailsRow {
    pub place_id: String,
    pub hours: Value,
    pub address: String,
    pub website: String,
    pub photos: Value,
    pub menu: Value,
    pub health_score: f64,
}

pub fn upsert_details(conn: &Connection, d: &DetailsRow) -> Result<()> {
    conn.execute(
        "INSERT INTO restaurant_details (place_id, hours, address, website, photos, menu, health_score)
         VALUES (?1,?2,?3,?4,?5,?6,?7)
         ON CONFLICT(place_id) DO UPDATE SET
            hours = excluded.hours,
            address = excluded.address,
            website = excluded.website,
            photos = excluded.photos,
            menu = excluded.menu,
            health_score = excluded.health_score,
            updated_at = datetime('now')",
        rusqlite::params![
            d.place_id,
            d.hours.to_string(),
            d.address,
            d.website,
            d.photos.to_string(),
            d.menu.to_string(),
            d.health_score,
        ],
    )
    .with_context(|| format!("Failed to upsert details for {}", d.place_id))?;
    Ok(())
}

pub fn get_details(conn: &Connection, place_id: &str) -> Result<Option<DetailsRow>> {
    let row = conn
        .query_row(
            "SELECT place_id, hours, address, website, photos, menu, health_score
             FROM restaurant_details WHERE place_id = ?1",
            [place_id],
            |row| {
                let hours: String = row.get(1)?;
                let photos: String = row.get(4)?;
                let menu: String = row.get(5)?;
                Ok(DetailsRow {
                    place_id: row.get(0)?,
                    hours: serde_json::from_str(&hours).unwrap_or_default(),
                    address: row.get(2)?,
                    website: row.get(3)?,
                    photos: serde_json::from_str(&photos).unwrap_or_default(),
                    menu: serde_json::from_str(&menu).unwrap_or_default(),
                    health_score: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ── Snapshots ──

/// A restaurant together with its stored reviews; the unit of JSON export,
/// import and analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestaurantSnapshot {
    #[serde(flatten)]
    pub restaurant: RestaurantRow,
    #[serde(default)]
    pub reviews: Vec<ReviewRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailsRow>,
}

pub fn fetch_snapshots(
    conn: &Connection,
    location: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<RestaurantSnapshot>> {
    fetch_restaurants(conn, location, query, limit)?
        .into_iter()
        .map(|restaurant| {
            let reviews = fetch_reviews(conn, &restaurant.place_id)?;
            let details = get_details(conn, &restaurant.place_id)?;
            Ok(RestaurantSnapshot {
                restaurant,
                reviews,
                details,
            })
        })
        .collect()
}

// ── Stats ──

pub struct Stats {
    pub restaurants: usize,
    pub reviews: usize,
    pub details: usize,
    pub pairs: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let restaurants: usize =
        conn.query_row("SELECT COUNT(*) FROM restaurants", [], |r| r.get(0))?;
    let reviews: usize = conn.query_row("SELECT COUNT(*) FROM reviews", [], |r| r.get(0))?;
    let details: usize =
        conn.query_row("SELECT COUNT(*) FROM restaurant_details", [], |r| r.get(0))?;
    let pairs: usize =
        conn.query_row("SELECT COUNT(*) FROM scrape_metadata", [], |r| r.get(0))?;
    Ok(Stats {
        restaurants,
        reviews,
        details,
        pairs,
    })
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}
