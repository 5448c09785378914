use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::{self, RestaurantSnapshot};
use crate::mapper::{self, float, int, labels};

#[derive(Debug, Default, PartialEq)]
pub struct ImportStats {
    pub restaurants: usize,
    pub reviews: usize,
    pub details: usize,
    pub skipped: usize,
}

/// Read a snapshot file: either a bare list or `{"restaurants": [...]}`.
/// Entries that do not decode are skipped with a warning. Files from the
/// older scraper scripts are accepted too (see `normalize_entry`).
pub fn read_snapshots(path: &Path) -> Result<Vec<RestaurantSnapshot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    parse_snapshots(json).with_context(|| format!("Unexpected JSON structure in {}", path.display()))
}

fn parse_snapshots(json: Value) -> Result<Vec<RestaurantSnapshot>> {
    let items = match json {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("restaurants") {
            Some(Value::Array(items)) => items,
            _ => bail!("expected a list or an object with a 'restaurants' list"),
        },
        _ => bail!("expected a list or an object with a 'restaurants' list"),
    };

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(normalize_entry(item)) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Skipping entry {}: {}", i, e);
                None
            }
        })
        .collect())
}

/// Older snapshot files keep the review count in `reviews` or
/// `reviews_count` and the raw review list in `reviews_data`. Their ratings
/// and counts may be strings and their categories raw `{"title": ..}`
/// objects. Rewrite those into the snapshot shape.
fn normalize_entry(mut entry: Value) -> Value {
    let legacy_count = match entry.get("reviews") {
        Some(Value::Array(_)) | None => None,
        Some(_) => Some(int(&entry, "reviews")),
    }
    .or_else(|| entry.get("reviews_count").map(|_| int(&entry, "reviews_count")));
    let review_count = match entry.get("review_count") {
        Some(Value::Number(_)) => None,
        Some(_) => Some(int(&entry, "review_count")),
        None => legacy_count,
    };
    let rating = match entry.get("rating") {
        Some(Value::String(_)) => Some(float(&entry, "rating")),
        _ => None,
    };
    let categories = match entry.get("categories") {
        Some(Value::Array(items)) if items.iter().any(|c| !c.is_string()) => {
            Some(labels(&entry, "categories"))
        }
        _ => None,
    };
    let neighborhood = match entry.get("neighborhood") {
        Some(Value::Array(_)) => Some(labels(&entry, "neighborhood").join(", ")),
        _ => None,
    };
    let place_id = entry
        .get("place_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(obj) = entry.as_object_mut() else {
        return entry;
    };
    if !matches!(obj.get("reviews"), Some(Value::Array(_))) {
        obj.remove("reviews");
        if let Some(Value::Array(raw)) = obj.remove("reviews_data") {
            let reviews = raw
                .iter()
                .filter_map(|r| mapper::review::map(r, &place_id))
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect();
            obj.insert("reviews".into(), Value::Array(reviews));
        }
    }
    obj.remove("reviews_count");
    if let Some(n) = review_count {
        obj.insert("review_count".into(), n.into());
    }
    if let Some(r) = rating {
        obj.insert("rating".into(), r.into());
    }
    if let Some(c) = categories {
        obj.insert("categories".into(), c.into());
    }
    if let Some(n) = neighborhood {
        obj.insert("neighborhood".into(), n.into());
    }
    entry
}

/// Upsert snapshots into the store with the same keys a scrape uses.
pub fn load_snapshots(conn: &Connection, snapshots: &[RestaurantSnapshot]) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let tx = conn.unchecked_transaction()?;

    for snap in snapshots {
        let place_id = snap.restaurant.place_id.trim();
        if place_id.is_empty() {
            warn!("Skipping restaurant without place_id: {}", snap.restaurant.name);
            stats.skipped += 1;
            continue;
        }
        db::upsert_restaurant(&tx, &snap.restaurant)?;
        stats.restaurants += 1;

        for review in &snap.reviews {
            if review.user.user_id.trim().is_empty() {
                stats.skipped += 1;
                continue;
            }
            let mut review = review.clone();
            review.place_id = place_id.to_string();
            db::upsert_review(&tx, &review)?;
            stats.reviews += 1;
        }

        if let Some(details) = &snap.details {
            let mut details = details.clone();
            details.place_id = place_id.to_string();
            db::upsert_details(&tx, &details)?;
            stats.details += 1;
        }
    }

    tx.commit()?;
    info!(
        "Imported {} restaurants, {} reviews, {} details ({} skipped)",
        stats.restaurants, stats.reviews, stats.details, stats.skipped
    );
    Ok(stats)
}

pub fn load_file(conn: &Connection, path: &Path) -> Result<ImportStats> {
    let snapshots = read_snapshots(path)?;
    info!("Loaded {} entries from {}", snapshots.len(), path.display());
    load_snapshots(conn, &snapshots)
}
