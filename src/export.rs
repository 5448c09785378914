use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Local;
use regex::Regex;
use tracing::info;

use crate::db::RestaurantSnapshot;

static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const CSV_HEADER: &str = "place_id,name,rating,review_count,price,categories,neighborhood,phone,url,location,query,reviews_stored";

/// "Seattle, WA" -> "seattle_wa"
pub fn location_slug(location: &str) -> String {
    let lower = location.to_lowercase();
    NON_ALNUM_RE
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

fn snapshot_path(dir: &Path, location: &str, ext: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("yelp_{}_{}.{}", location_slug(location), stamp, ext))
}

pub fn write_json(dir: &Path, location: &str, snapshots: &[RestaurantSnapshot]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = snapshot_path(dir, location, "json");
    let json = serde_json::to_string_pretty(snapshots)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Data saved to {}", path.display());
    Ok(path)
}

pub fn write_csv(dir: &Path, location: &str, snapshots: &[RestaurantSnapshot]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = snapshot_path(dir, location, "csv");
    std::fs::write(&path, to_csv(snapshots))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Data saved to {}", path.display());
    Ok(path)
}

fn to_csv(snapshots: &[RestaurantSnapshot]) -> String {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push('\n');
    for s in snapshots {
        let r = &s.restaurant;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            escape_csv(&r.place_id),
            escape_csv(&r.name),
            r.rating,
            r.review_count,
            escape_csv(&r.price),
            escape_csv(&r.categories.join(";")),
            escape_csv(&r.neighborhood),
            escape_csv(&r.phone),
            escape_csv(&r.url),
            escape_csv(&r.location),
            escape_csv(&r.query),
            s.reviews.len(),
        );
    }
    out
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
