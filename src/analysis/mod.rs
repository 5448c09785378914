pub mod llm;
pub mod prompt;

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::db::RestaurantSnapshot;
use llm::Completer;
use prompt::AnalysisKind;

pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    pub max_restaurants: usize,
}

/// Build the prompt for `snapshots` and return the model's text.
pub async fn run<C: Completer>(
    completer: &C,
    snapshots: &[RestaurantSnapshot],
    request: &AnalysisRequest,
) -> Result<String> {
    if snapshots.is_empty() {
        bail!("No restaurants to analyze");
    }
    let data = prompt::preprocess(snapshots, request.max_restaurants);
    let text = prompt::build(request.kind, &data);
    info!("Analyzing {} of {} restaurants ({:?})", data.len(), snapshots.len(), request.kind);
    completer.complete(&text).await
}

pub fn save_report(path: &Path, report: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, report).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Report saved to {}", path.display());
    Ok(())
}
