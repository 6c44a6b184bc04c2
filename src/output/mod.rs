//! Report files for a finished session
//!
//! Layout: `<report_dir>/<YYYY-MM-DD>/<session>/` holding one `<city>.json`
//! snapshot per city plus `summary.json` and `summary.md`.

mod report;
mod summary;

pub use report::write_city_report;
pub use summary::{write_summary, CitySummary, SummaryReport};

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::OutputError;
use crate::orchestrator::CrossCityInsights;
use crate::store::{CityIntelligence, Session};

/// Dated per-session directory under `base`
pub fn session_report_dir(base: &Path, session_id: &str) -> PathBuf {
    let date_str = Local::now().format("%Y-%m-%d").to_string();
    base.join(date_str).join(file_stem(session_id))
}

/// Keep names filesystem-safe; ids come from user requests
pub(crate) fn file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

/// Write every city snapshot and the session summary; returns the directory
pub fn write_reports(
    base: &Path,
    session: &Session,
    cities: &[CityIntelligence],
    insights: Option<&CrossCityInsights>,
    quality_threshold: f64,
) -> Result<PathBuf, OutputError> {
    let dir = session_report_dir(base, &session.id);

    for city in cities {
        write_city_report(&dir, city)?;
    }
    write_summary(&dir, session, cities, insights, quality_threshold)?;

    info!("Reports written to {:?}", dir);
    Ok(dir)
}
