//! Per (location, query) scrape progress, kept in `scrape_metadata`.
//!
//! One row per pair. Every write stamps `last_updated`; rows are never deleted.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    NotStarted,
    InProgress,
    ProcessingPage,
    Processing,
    Completed,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::NotStarted => "not_started",
            ScrapeStatus::InProgress => "in_progress",
            ScrapeStatus::ProcessingPage => "processing_page",
            ScrapeStatus::Processing => "processing",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_started" => Ok(ScrapeStatus::NotStarted),
            "in_progress" => Ok(ScrapeStatus::InProgress),
            "processing_page" => Ok(ScrapeStatus::ProcessingPage),
            "processing" => Ok(ScrapeStatus::Processing),
            "completed" => Ok(ScrapeStatus::Completed),
            "failed" => Ok(ScrapeStatus::Failed),
            other => Err(anyhow!("unknown scrape status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    pub location: String,
    pub query: String,
    pub last_page: u32,
    pub status: ScrapeStatus,
    pub total_count: usize,
    pub last_updated: String,
    pub error: Option<String>,
}

impl ScrapeMetadata {
    pub fn new(
        location: &str,
        query: &str,
        page: u32,
        status: ScrapeStatus,
        total_count: usize,
        error: Option<&str>,
    ) -> Self {
        ScrapeMetadata {
            location: location.to_string(),
            query: query.to_string(),
            last_page: page,
            status,
            total_count,
            last_updated: Utc::now().to_rfc3339(),
            error: error.map(str::to_string),
        }
    }

    /// Placeholder for a pair that has never been scraped.
    pub fn not_started(location: &str, query: &str) -> Self {
        Self::new(location, query, 0, ScrapeStatus::NotStarted, 0, None)
    }
}

const COLUMNS: &str = "location, query, last_page, status, total_count, last_updated, error";

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<ScrapeMetadata> {
    let status: String = row.get(3)?;
    let status = status.parse::<ScrapeStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ScrapeMetadata {
        location: row.get(0)?,
        query: row.get(1)?,
        last_page: row.get(2)?,
        status,
        total_count: row.get(4)?,
        last_updated: row.get(5)?,
        error: row.get(6)?,
    })
}

pub fn get(conn: &Connection, location: &str, query: &str) -> Result<Option<ScrapeMetadata>> {
    let sql = format!(
        "SELECT {} FROM scrape_metadata WHERE location = ?1 AND query = ?2",
        COLUMNS
    );
    Ok(conn
        .query_row(&sql, [location, query], from_row)
        .optional()?)
}

/// Create or overwrite the record for (location, query). Every mutable field,
/// `error` included, takes the value passed here.
pub fn upsert(
    conn: &Connection,
    location: &str,
    query: &str,
    page: u32,
    status: ScrapeStatus,
    total_count: usize,
    error: Option<&str>,
) -> Result<ScrapeMetadata> {
    let meta = ScrapeMetadata::new(location, query, page, status, total_count, error);
    conn.execute(
        "INSERT INTO scrape_metadata (location, query, last_page, status, total_count, last_updated, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(location, query) DO UPDATE SET
            last_page = excluded.last_page,
            status = excluded.status,
            total_count = excluded.total_count,
            last_updated = excluded.last_updated,
            error = excluded.error",
        rusqlite::params![
            meta.location,
            meta.query,
            meta.last_page,
            meta.status.as_str(),
            meta.total_count,
            meta.last_updated,
            meta.error,
        ],
    )?;
    Ok(meta)
}

pub fn list(conn: &Connection) -> Result<Vec<ScrapeMetadata>> {
    let sql = format!(
        "SELECT {} FROM scrape_metadata ORDER BY last_updated DESC, location, query",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    #[test]
    fn get_unknown_pair_is_none() {
        let conn = test_conn();
        assert!(get(&conn, "Seattle, WA", "Tacos").unwrap().is_none());
    }

    #[test]
    fn second_upsert_overwrites_single_record() {
        let conn = test_conn();
        upsert(&conn, "Seattle, WA", "Tacos", 0, ScrapeStatus::InProgress, 0, None).unwrap();
        let written =
            upsert(&conn, "Seattle, WA", "Tacos", 2, ScrapeStatus::Processing, 40, None).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scrape_metadata", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let stored = get(&conn, "Seattle, WA", "Tacos").unwrap().unwrap();
        assert_eq!(stored, written);
        assert_eq!(stored.last_page, 2);
        assert_eq!(stored.status, ScrapeStatus::Processing);
        assert_eq!(stored.total_count, 40);
    }

    #[test]
    fn error_is_cleared_by_later_upsert() {
        let conn = test_conn();
        upsert(&conn, "Austin, TX", "BBQ", 3, ScrapeStatus::Failed, 60, Some("API Error: quota"))
            .unwrap();
        assert_eq!(
            get(&conn, "Austin, TX", "BBQ").unwrap().unwrap().error.as_deref(),
            Some("API Error: quota")
        );

        upsert(&conn, "Austin, TX", "BBQ", 4, ScrapeStatus::InProgress, 0, None).unwrap();
        assert!(get(&conn, "Austin, TX", "BBQ").unwrap().unwrap().error.is_none());
    }

    #[test]
    fn pairs_are_independent() {
        let conn = test_conn();
        upsert(&conn, "Seattle, WA", "Tacos", 1, ScrapeStatus::Completed, 5, None).unwrap();
        upsert(&conn, "Seattle, WA", "Pho", 7, ScrapeStatus::Failed, 9, Some("boom")).unwrap();

        let all = list(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(get(&conn, "Seattle, WA", "Tacos").unwrap().unwrap().last_page, 1);
        assert_eq!(get(&conn, "Seattle, WA", "Pho").unwrap().unwrap().last_page, 7);
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            ScrapeStatus::NotStarted,
            ScrapeStatus::InProgress,
            ScrapeStatus::ProcessingPage,
            ScrapeStatus::Processing,
            ScrapeStatus::Completed,
            ScrapeStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<ScrapeStatus>().unwrap(), s);
        }
        assert!("done".parse::<ScrapeStatus>().is_err());
    }
}
