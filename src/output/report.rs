use crate::error::OutputError;
use crate::store::CityIntelligence;
use std::fs;
use std::path::{Path, PathBuf};

use super::file_stem;

/// Write one city's snapshot as `<city>.json`
pub fn write_city_report(
    report_dir: &Path,
    city: &CityIntelligence,
) -> Result<PathBuf, OutputError> {
    fs::create_dir_all(report_dir).map_err(OutputError::CreateDir)?;

    let report_path = report_dir.join(format!("{}.json", file_stem(&city.city.id)));
    let json = serde_json::to_string_pretty(city)?;
    fs::write(&report_path, json).map_err(OutputError::WriteReport)?;

    Ok(report_path)
}
