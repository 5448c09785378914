use serde_json::Value;

use super::{array, float, object, text};
use crate::db::DetailsRow;

/// Map the first `organic_results` entry of a place lookup.
pub fn map(entry: &Value, place_id: &str) -> DetailsRow {
    DetailsRow {
        place_id: place_id.to_string(),
        hours: object(entry, "hours"),
        address: text(entry, "address"),
        website: text(entry, "website"),
        photos: Value::Array(array(entry, "photos")),
        menu: object(entry, "menu"),
        health_score: float(entry, "health_score"),
    }
}
