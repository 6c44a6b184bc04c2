use crate::error::OutputError;
use crate::orchestrator::CrossCityInsights;
use crate::reflection::Verdict;
use crate::store::{CityIntelligence, CityStatus, Session, TaskStatus};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub timestamp: String,
    pub session_id: String,
    pub origin: String,
    pub destination: String,
    pub cities: Vec<CitySummary>,
    pub average_quality: f64,
    pub quality_threshold: f64,
    pub below_threshold: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<CrossCityInsights>,
    pub report_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CitySummary {
    pub id: String,
    pub name: String,
    pub nights: u32,
    pub status: CityStatus,
    pub quality: f64,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub failed_units: Vec<String>,
    pub open_gaps: usize,
}

pub fn write_summary(
    report_dir: &Path,
    session: &Session,
    cities: &[CityIntelligence],
    insights: Option<&CrossCityInsights>,
    quality_threshold: f64,
) -> Result<SummaryReport, OutputError> {
    fs::create_dir_all(report_dir).map_err(OutputError::CreateDir)?;

    let summary = build_summary(
        session,
        cities,
        insights,
        quality_threshold,
        report_dir.to_path_buf(),
    );

    let json_path = report_dir.join("summary.json");
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(&json_path, json).map_err(OutputError::WriteReport)?;

    let md_path = report_dir.join("summary.md");
    let md = build_summary_markdown(&summary);
    fs::write(&md_path, md).map_err(OutputError::WriteReport)?;

    Ok(summary)
}

fn build_summary(
    session: &Session,
    cities: &[CityIntelligence],
    insights: Option<&CrossCityInsights>,
    quality_threshold: f64,
    report_dir: PathBuf,
) -> SummaryReport {
    let summaries: Vec<CitySummary> = cities
        .iter()
        .map(|city| {
            let latest = city.latest_reflection();
            CitySummary {
                id: city.city.id.clone(),
                name: city.city.name.clone(),
                nights: city.nights,
                status: city.status,
                quality: city.quality,
                iterations: city.iteration,
                verdict: latest.map(|r| r.verdict),
                failed_units: city
                    .tasks
                    .values()
                    .filter(|t| t.status == TaskStatus::Failed)
                    .map(|t| t.name.clone())
                    .collect(),
                open_gaps: latest.map(|r| r.gaps.len()).unwrap_or(0),
            }
        })
        .collect();

    let average_quality = if summaries.is_empty() {
        0.0
    } else {
        summaries.iter().map(|c| c.quality).sum::<f64>() / summaries.len() as f64
    };
    let below_threshold = summaries
        .iter()
        .filter(|c| c.quality < quality_threshold)
        .map(|c| c.id.clone())
        .collect();

    SummaryReport {
        timestamp: Utc::now().to_rfc3339(),
        session_id: session.id.clone(),
        origin: session.trip.origin.clone(),
        destination: session.trip.destination.clone(),
        cities: summaries,
        average_quality,
        quality_threshold,
        below_threshold,
        insights: insights.cloned(),
        report_dir,
    }
}

fn build_summary_markdown(summary: &SummaryReport) -> String {
    let mut md = String::new();

    md.push_str("# tripintel Summary\n\n");
    md.push_str(&format!("**Generated:** {}\n", summary.timestamp));
    md.push_str(&format!("**Session:** {}\n", summary.session_id));
    md.push_str(&format!(
        "**Route:** {} to {}\n",
        summary.origin, summary.destination
    ));
    md.push_str(&format!(
        "**Report Dir:** {}\n",
        summary.report_dir.display()
    ));
    md.push_str(&format!(
        "**Average Quality:** {:.1} (threshold {:.0})\n\n",
        summary.average_quality, summary.quality_threshold
    ));

    md.push_str("## Cities\n\n");
    md.push_str("| City | Nights | Status | Quality | Iterations | Failed Units |\n");
    md.push_str("|------|--------|--------|---------|------------|--------------|\n");

    for city in &summary.cities {
        let status_icon = match city.status {
            CityStatus::Complete if city.quality >= summary.quality_threshold => "✅",
            CityStatus::Complete => "⚠️",
            CityStatus::Processing => "⏳",
            CityStatus::Pending => "⏸️",
        };
        let failed = if city.failed_units.is_empty() {
            "-".to_string()
        } else {
            city.failed_units.join(", ")
        };

        md.push_str(&format!(
            "| {} | {} | {} {:?} | {:.1} | {} | {} |\n",
            city.name, city.nights, status_icon, city.status, city.quality, city.iterations, failed
        ));
    }

    if let Some(insights) = &summary.insights {
        md.push_str("\n## Across the Route\n\n");
        if !insights.themes.is_empty() {
            md.push_str(&format!("**Themes:** {}\n", insights.themes.join(", ")));
        }
        md.push_str(&format!(
            "**Variety:** {:.0} / 100\n",
            insights.variety_score
        ));
        md.push_str(&format!("**Pace fit:** {:.0} / 100\n", insights.pace_score));

        if !insights.recommendations.is_empty() {
            md.push_str("\n**Recommendations:**\n");
            for recommendation in &insights.recommendations {
                md.push_str(&format!("- {}\n", recommendation));
            }
        }
    }

    if !summary.below_threshold.is_empty() {
        md.push_str("\n## Below Threshold\n\n");
        md.push_str("See the per-city JSON snapshots for the open gaps.\n");
    }

    md
}
