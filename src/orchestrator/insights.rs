use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::store::{CityIntelligence, Preferences};
use crate::unit::slots;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossCityInsights {
    /// Distinct themes across the route, in first-seen order
    pub themes: Vec<String>,
    /// 0-100; higher when cities bring different themes
    pub variety_score: f64,
    /// 0-100; how closely daily schedules follow the requested pace
    pub pace_score: f64,
    pub recommendations: Vec<String>,
}

fn city_themes(city: &CityIntelligence) -> Vec<String> {
    let mut themes = Vec::new();
    if let Some(theme) = city
        .slot(slots::NARRATIVE)
        .and_then(|n| n.get("theme"))
        .and_then(Value::as_str)
    {
        themes.push(theme.trim().to_string());
    }
    if let Some(list) = city
        .slot(slots::SYNTHESIS)
        .and_then(|s| s.get("themes"))
        .and_then(Value::as_array)
    {
        themes.extend(list.iter().filter_map(Value::as_str).map(|t| t.trim().to_string()));
    }
    themes.retain(|t| !t.is_empty());
    themes
}

/// Ratio of scheduled blocks per day to the pace target, 1.0 when they match
fn pace_fit(city: &CityIntelligence, preferences: &Preferences) -> Option<f64> {
    let blocks = city.slot(slots::TIME_BLOCKS)?.as_array()?;
    if blocks.is_empty() {
        return None;
    }
    let per_day = blocks.len() as f64 / f64::from(city.nights.max(1));
    let target = preferences.pace.blocks_per_day();
    Some((per_day / target).min(target / per_day))
}

pub fn derive(
    cities: &[CityIntelligence],
    preferences: &Preferences,
    quality_threshold: f64,
) -> CrossCityInsights {
    let mut seen = BTreeSet::new();
    let mut themes = Vec::new();
    let mut mentions = 0usize;

    for city in cities {
        // A theme counts once per city
        let own: BTreeSet<String> = city_themes(city)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        mentions += own.len();
        for theme in city_themes(city) {
            if seen.insert(theme.to_lowercase()) {
                themes.push(theme);
            }
        }
    }

    let variety_score = if mentions == 0 {
        0.0
    } else {
        (seen.len() as f64 / mentions as f64 * 100.0).clamp(0.0, 100.0)
    };

    let fits: Vec<f64> = cities
        .iter()
        .filter_map(|c| pace_fit(c, preferences))
        .collect();
    let pace_score = if fits.is_empty() {
        0.0
    } else {
        (fits.iter().sum::<f64>() / fits.len() as f64 * 100.0).clamp(0.0, 100.0)
    };

    let mut recommendations = Vec::new();
    if cities.len() > 1 && mentions > 0 && variety_score < 50.0 {
        recommendations.push(
            "Themes repeat from city to city; give later stops a different focus".to_string(),
        );
    }
    if !fits.is_empty() && pace_score < 60.0 {
        recommendations.push(format!(
            "Daily schedules drift from the requested {} pace",
            preferences.pace
        ));
    }
    for city in cities {
        if city.quality < quality_threshold {
            recommendations.push(format!(
                "Review {} before travelling: quality {:.0} after {} iteration(s)",
                city.city.name, city.quality, city.iteration
            ));
        }
    }

    CrossCityInsights {
        themes,
        variety_score,
        pace_score,
        recommendations,
    }
}
