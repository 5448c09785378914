mod analysis;
mod config;
mod db;
mod export;
mod import;
mod mapper;
mod metadata;
mod resume;
mod scrape;
mod serpapi;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;

use crate::analysis::llm::OpenAiClient;
use crate::analysis::prompt::AnalysisKind;
use crate::analysis::AnalysisRequest;
use crate::config::Settings;
use crate::db::RestaurantSnapshot;
use crate::metadata::ScrapeMetadata;
use crate::scrape::{ScrapeOptions, ScrapeOutcome, Scraper};
use crate::serpapi::{SearchFilters, SerpApiClient};

#[derive(Parser)]
#[command(name = "yelp_scraper", about = "Yelp restaurant scraper via SerpApi")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape listing pages (and reviews) for a location and query
    Scrape {
        /// Location, e.g. "Seattle, WA"
        #[arg(short, long)]
        location: String,
        /// Search terms
        #[arg(short, long, default_value = "Restaurants")]
        query: String,
        /// First page to fetch
        #[arg(long, default_value = "0")]
        start_page: u32,
        /// Max pages for this run (default: YELP_MAX_PAGES)
        #[arg(short = 'n', long)]
        max_pages: Option<u32>,
        /// Price filter ($, $$, $$$, $$$$ or "all")
        #[arg(long)]
        price: Option<String>,
        /// Category filter (e.g. "mexican")
        #[arg(long)]
        category: Option<String>,
        /// Sort order (e.g. "rating", "review_count")
        #[arg(long)]
        sort_by: Option<String>,
        /// Also fetch business details for each restaurant
        #[arg(long)]
        details: bool,
        /// Write a JSON snapshot when done
        #[arg(long)]
        export: bool,
    },
    /// Continue a previous scrape from the page after the last one recorded
    Resume {
        #[arg(short, long)]
        location: String,
        #[arg(short, long, default_value = "Restaurants")]
        query: String,
        /// Max pages for this run (default: YELP_MAX_PAGES)
        #[arg(short = 'n', long)]
        max_pages: Option<u32>,
        #[arg(long)]
        details: bool,
    },
    /// Show scrape progress for one pair, or every pair
    Status {
        #[arg(short, long, requires = "query")]
        location: Option<String>,
        #[arg(short, long, requires = "location")]
        query: Option<String>,
    },
    /// Stored restaurants for a location and query
    List {
        #[arg(short, long)]
        location: String,
        #[arg(short, long, default_value = "Restaurants")]
        query: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// One restaurant with its stored reviews
    Show {
        place_id: String,
    },
    /// Export stored restaurants and reviews to JSON and/or CSV
    Export {
        #[arg(short, long)]
        location: String,
        #[arg(short, long, default_value = "Restaurants")]
        query: String,
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,
        /// Output directory (default: YELP_EXPORT_DIR)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Load a JSON snapshot into the store
    Import {
        file: PathBuf,
    },
    /// Ask the language model for a report on stored or exported restaurants
    Analyze {
        #[arg(short, long, value_enum, default_value = "general")]
        kind: AnalysisKind,
        #[arg(short, long, required_unless_present = "file")]
        location: Option<String>,
        #[arg(short, long, default_value = "Restaurants")]
        query: String,
        /// Read restaurants from a JSON snapshot instead of the store
        #[arg(long, conflicts_with = "location")]
        file: Option<PathBuf>,
        /// Max restaurants included in the prompt
        #[arg(short = 'n', long, default_value = "3")]
        max_restaurants: usize,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show store statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
    Both,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Scrape {
            location,
            query,
            start_page,
            max_pages,
            price,
            category,
            sort_by,
            details,
            export,
        } => {
            let conn = open_store(&settings)?;
            let client = SerpApiClient::from_env(&settings.serpapi_url)?;
            let mut opts = scrape_options(&settings, max_pages, details);
            opts.filters = SearchFilters {
                price,
                category,
                sort_by,
            };
            let scraper = Scraper::new(&conn, &client, opts);
            let outcome = scraper.run(&location, &query, start_page).await;
            print_outcome(&outcome);
            if export {
                let snapshots = db::fetch_snapshots(&conn, &location, &query, None)?;
                let path = export::write_json(Path::new(&settings.export_dir), &location, &snapshots)?;
                println!("Exported {} restaurants to {}", snapshots.len(), path.display());
            }
            Ok(())
        }
        Commands::Resume {
            location,
            query,
            max_pages,
            details,
        } => {
            let conn = open_store(&settings)?;
            let client = SerpApiClient::from_env(&settings.serpapi_url)?;
            let scraper = Scraper::new(&conn, &client, scrape_options(&settings, max_pages, details));
            let outcome = resume::resume(&scraper, &location, &query).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Status { location, query } => {
            let conn = open_store(&settings)?;
            let records = match (location, query) {
                (Some(location), Some(query)) => vec![metadata::get(&conn, &location, &query)?
                    .unwrap_or_else(|| ScrapeMetadata::not_started(&location, &query))],
                _ => metadata::list(&conn)?,
            };
            if records.is_empty() {
                println!("No scrapes recorded yet.");
                return Ok(());
            }
            print_status(&records);
            Ok(())
        }
        Commands::List {
            location,
            query,
            limit,
        } => {
            let conn = open_store(&settings)?;
            let rows = db::fetch_restaurants(&conn, &location, &query, Some(limit))?;
            if rows.is_empty() {
                println!("No restaurants stored for '{}' in '{}'.", query, location);
                return Ok(());
            }

            println!(
                "{:>3} | {:<28} | {:>6} | {:>7} | {:<5} | {:<24} | {:<18}",
                "#", "Restaurant", "Rating", "Reviews", "Price", "Categories", "Neighborhood"
            );
            println!("{}", "-".repeat(108));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<28} | {:>6.1} | {:>7} | {:<5} | {:<24} | {:<18}",
                    i + 1,
                    truncate(&r.name, 28),
                    r.rating,
                    r.review_count,
                    r.price,
                    truncate(&r.categories.join(", "), 24),
                    truncate(&r.neighborhood, 18),
                );
            }

            println!("\n{} restaurants | details: show <place_id>", rows.len());
            Ok(())
        }
        Commands::Show { place_id } => {
            let conn = open_store(&settings)?;
            let Some(r) = db::get_restaurant(&conn, &place_id)? else {
                println!("No restaurant with place_id {}.", place_id);
                return Ok(());
            };
            println!("{} ({})", r.name, r.place_id);
            println!("  Rating:       {:.1} ({} reviews)", r.rating, r.review_count);
            match r.price_level() {
                Some(tier) => println!("  Price:        {} (tier {})", r.price, tier),
                None => println!("  Price:        -"),
            }
            println!("  Categories:   {}", r.categories.join(", "));
            println!("  Neighborhood: {}", r.neighborhood);
            println!("  Phone:        {}", r.phone);
            println!("  URL:          {}", r.url);
            if let Some(d) = db::get_details(&conn, &place_id)? {
                println!("  Address:      {}", d.address);
                println!("  Website:      {}", d.website);
            }

            let reviews = db::fetch_reviews(&conn, &place_id)?;
            if !reviews.is_empty() {
                println!("\n--- Reviews ---");
                for rv in &reviews {
                    println!(
                        "  [{:.0}] {} ({}): {}",
                        rv.rating,
                        rv.user.name,
                        rv.date,
                        truncate(&rv.comment.text, 100)
                    );
                }
            }
            Ok(())
        }
        Commands::Export {
            location,
            query,
            format,
            out,
        } => {
            let conn = open_store(&settings)?;
            let snapshots = db::fetch_snapshots(&conn, &location, &query, None)?;
            if snapshots.is_empty() {
                println!("Nothing to export for '{}' in '{}'.", query, location);
                return Ok(());
            }
            let dir = out.unwrap_or_else(|| PathBuf::from(&settings.export_dir));
            if matches!(format, ExportFormat::Json | ExportFormat::Both) {
                let path = export::write_json(&dir, &location, &snapshots)?;
                println!("JSON: {}", path.display());
            }
            if matches!(format, ExportFormat::Csv | ExportFormat::Both) {
                let path = export::write_csv(&dir, &location, &snapshots)?;
                println!("CSV:  {}", path.display());
            }
            println!("Exported {} restaurants.", snapshots.len());
            Ok(())
        }
        Commands::Import { file } => {
            let conn = open_store(&settings)?;
            let stats = import::load_file(&conn, &file)?;
            println!(
                "Imported {} restaurants, {} reviews, {} details ({} skipped).",
                stats.restaurants, stats.reviews, stats.details, stats.skipped
            );
            Ok(())
        }
        Commands::Analyze {
            kind,
            location,
            query,
            file,
            max_restaurants,
            output,
        } => {
            let snapshots = load_for_analysis(&settings, location.as_deref(), &query, file.as_deref())?;
            let completer = OpenAiClient::from_env(&settings.openai_url, &settings.openai_model)?;
            let request = AnalysisRequest {
                kind,
                max_restaurants,
            };
            let report = analysis::run(&completer, &snapshots, &request).await?;
            match output {
                Some(path) => {
                    analysis::save_report(&path, &report)?;
                    println!("Report written to {}", path.display());
                }
                None => println!("{}", report),
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open_store(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Restaurants: {}", s.restaurants);
            println!("Reviews:     {}", s.reviews);
            println!("Details:     {}", s.details);
            println!("Scrapes:     {}", s.pairs);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn scrape_options(settings: &Settings, max_pages: Option<u32>, with_details: bool) -> ScrapeOptions {
    ScrapeOptions {
        page_size: settings.page_size,
        max_pages: max_pages.unwrap_or(settings.max_pages),
        max_reviews: settings.max_reviews,
        page_delay: settings.page_delay(),
        filters: SearchFilters::default(),
        with_details,
    }
}

fn load_for_analysis(
    settings: &Settings,
    location: Option<&str>,
    query: &str,
    file: Option<&Path>,
) -> anyhow::Result<Vec<RestaurantSnapshot>> {
    match (file, location) {
        (Some(path), _) => import::read_snapshots(path),
        (None, Some(location)) => {
            let conn = open_store(settings)?;
            db::fetch_snapshots(&conn, location, query, None)
                .with_context(|| format!("Failed to load '{}' in '{}'", query, location))
        }
        (None, None) => bail!("either --location or --file is required"),
    }
}

fn print_outcome(outcome: &ScrapeOutcome) {
    let m = &outcome.metadata;
    println!(
        "{}: {} restaurants, last page {} ({} total recorded)",
        m.status,
        outcome.restaurants.len(),
        m.last_page,
        m.total_count
    );
    if let Some(err) = &m.error {
        println!("Error: {}", err);
        println!("Run 'resume' to continue from page {}.", m.last_page + 1);
    }
}

fn print_status(records: &[ScrapeMetadata]) {
    println!(
        "{:<24} | {:<20} | {:<15} | {:>4} | {:>5} | {:<25}",
        "Location", "Query", "Status", "Page", "Total", "Updated"
    );
    println!("{}", "-".repeat(107));
    for m in records {
        println!(
            "{:<24} | {:<20} | {:<15} | {:>4} | {:>5} | {:<25}",
            truncate(&m.location, 24),
            truncate(&m.query, 20),
            m.status.as_str(),
            m.last_page,
            m.total_count,
            truncate(&m.last_updated, 25),
        );
        if let Some(err) = &m.error {
            println!("  error: {}", truncate(err, 100));
        }
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
