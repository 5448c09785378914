use serde_json::Value;

use super::{array, float, int, labels, object, text};
use crate::db::RestaurantRow;

/// Map one `organic_results` entry. `None` when no place id can be derived;
/// every other field falls back to its empty value.
pub fn map(entry: &Value, location: &str, query: &str) -> Option<RestaurantRow> {
    let place_id = place_id(entry)?;

    let highlights = match entry.get("highlights") {
        Some(h @ Value::Array(_)) => h.clone(),
        _ => Value::Array(Vec::new()),
    };

    Some(RestaurantRow {
        place_id,
        name: text(entry, "title"),
        rating: float(entry, "rating"),
        review_count: int(entry, "reviews"),
        price: text(entry, "price"),
        categories: labels(entry, "categories"),
        neighborhood: neighborhood(entry),
        phone: text(entry, "phone"),
        url: text(entry, "link"),
        service_options: object(entry, "service_options"),
        highlights,
        location: location.to_string(),
        query: query.to_string(),
    })
}

/// First non-empty `place_ids` element, else `place_id`.
fn place_id(entry: &Value) -> Option<String> {
    array(entry, "place_ids")
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| Some(text(entry, "place_id")).filter(|s| !s.is_empty()))
}

fn neighborhood(entry: &Value) -> String {
    match entry.get("neighborhoods") {
        Some(Value::Array(_)) => labels(entry, "neighborhoods").join(", "),
        _ => text(entry, "neighborhoods"),
    }
}
