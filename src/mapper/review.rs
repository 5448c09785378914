use serde_json::Value;

use super::{array, float, int, text};
use crate::db::{ReviewAuthor, ReviewComment, ReviewFeedback, ReviewPhoto, ReviewRow};

/// Map one `reviews` entry for `place_id`. `None` when the author has no
/// `user_id`. The `user`, `comment`, `feedback` and `photos` parts default
/// independently of each other.
pub fn map(entry: &Value, place_id: &str) -> Option<ReviewRow> {
    let user = entry.get("user").unwrap_or(&Value::Null);
    let author = ReviewAuthor {
        name: text(user, "name"),
        user_id: text(user, "user_id"),
        link: text(user, "link"),
        thumbnail: text(user, "thumbnail"),
        address: text(user, "address"),
        friends: int(user, "friends"),
        photos: int(user, "photos"),
        reviews: int(user, "reviews"),
        elite_year: int(user, "elite_year"),
    };
    if author.user_id.is_empty() {
        return None;
    }

    let comment = entry.get("comment").unwrap_or(&Value::Null);
    let feedback = entry.get("feedback").unwrap_or(&Value::Null);

    Some(ReviewRow {
        place_id: place_id.to_string(),
        position: int(entry, "position"),
        rating: float(entry, "rating"),
        date: text(entry, "date"),
        user: author,
        comment: ReviewComment {
            text: text(comment, "text"),
            language: text(comment, "language"),
        },
        feedback: ReviewFeedback {
            useful: int(feedback, "useful"),
            funny: int(feedback, "funny"),
            cool: int(feedback, "cool"),
        },
        photos: array(entry, "photos")
            .iter()
            .map(|p| ReviewPhoto {
                link: text(p, "link"),
                caption: text(p, "caption"),
            })
            .filter(|p| !p.link.is_empty())
            .collect(),
        tags: array(entry, "tags")
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
    })
}
