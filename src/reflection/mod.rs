//! Quality reflection
//!
//! Scores a city's accepted outputs per category with structural heuristics,
//! combines them into a weighted quality score and classifies what is
//! missing. Scoring reads only the outputs and the preferences, so the same
//! inputs always produce the same score.

mod refine;

pub use refine::{RefinementPlan, RefinementPlanner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::store::{CityIntelligence, Preferences};
use crate::unit::slots;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCategory {
    Narrative,
    TimeAllocation,
    Clusters,
    PreferenceMatch,
    HiddenGems,
    Logistics,
    Synthesis,
}

impl GapCategory {
    pub const ALL: [GapCategory; 7] = [
        GapCategory::Narrative,
        GapCategory::TimeAllocation,
        GapCategory::Clusters,
        GapCategory::PreferenceMatch,
        GapCategory::HiddenGems,
        GapCategory::Logistics,
        GapCategory::Synthesis,
    ];

    /// Share of the overall quality score; the weights sum to 1.0
    pub fn weight(self) -> f64 {
        match self {
            GapCategory::Narrative => 0.20,
            GapCategory::TimeAllocation => 0.15,
            GapCategory::Clusters => 0.15,
            GapCategory::PreferenceMatch => 0.15,
            GapCategory::HiddenGems => 0.15,
            GapCategory::Logistics => 0.10,
            GapCategory::Synthesis => 0.10,
        }
    }

    pub fn slot(self) -> &'static str {
        match self {
            GapCategory::Narrative => slots::NARRATIVE,
            GapCategory::TimeAllocation => slots::TIME_BLOCKS,
            GapCategory::Clusters => slots::CLUSTERS,
            GapCategory::PreferenceMatch => slots::PREFERENCE_MATCH,
            GapCategory::HiddenGems => slots::HIDDEN_GEMS,
            GapCategory::Logistics => slots::LOGISTICS,
            GapCategory::Synthesis => slots::SYNTHESIS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GapCategory::Narrative => "narrative",
            GapCategory::TimeAllocation => "time allocation",
            GapCategory::Clusters => "neighbourhood clusters",
            GapCategory::PreferenceMatch => "preference match",
            GapCategory::HiddenGems => "hidden gems",
            GapCategory::Logistics => "logistics",
            GapCategory::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for GapCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Slot has never been filled
    Missing,
    BelowThreshold,
    /// Output exists but contradicts the preferences
    PreferenceMismatch,
    /// Reported by a unit about its own output
    Reported,
    /// Addressed by one unit to another
    Suggestion,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Gap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<GapCategory>,
    pub kind: GapKind,
    pub description: String,
    pub remediation: String,
    /// Unit named by a suggestion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Complete,
    NeedsRefinement,
    CriticalGaps,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Complete => write!(f, "complete"),
            Verdict::NeedsRefinement => write!(f, "needs_refinement"),
            Verdict::CriticalGaps => write!(f, "critical_gaps"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub iteration: u32,
    pub quality: f64,
    pub category_scores: BTreeMap<GapCategory, f64>,
    pub strengths: Vec<String>,
    pub gaps: Vec<Gap>,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

impl Reflection {
    /// Gaps tied to a scored category
    pub fn category_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(|g| g.category.is_some())
    }
}

const STRENGTH_SCORE: f64 = 85.0;
const CRITICAL_CATEGORY_COUNT: usize = 2;

pub struct ReflectionEngine {
    gap_threshold: f64,
}

impl ReflectionEngine {
    pub fn new(gap_threshold: f64) -> Self {
        Self { gap_threshold }
    }

    pub fn reflect(
        &self,
        city: &CityIntelligence,
        preferences: &Preferences,
        iteration: u32,
    ) -> Reflection {
        let mut category_scores = BTreeMap::new();
        let mut gaps = Vec::new();
        let mut strengths = Vec::new();
        let mut below = 0;

        for category in GapCategory::ALL {
            let slot = city.slot(category.slot());
            let score = score_category(category, slot, city.nights, preferences).clamp(0.0, 100.0);
            category_scores.insert(category, score);

            if score < self.gap_threshold {
                below += 1;
                let kind = if slot.is_none() {
                    GapKind::Missing
                } else {
                    GapKind::BelowThreshold
                };
                gaps.push(Gap {
                    category: Some(category),
                    kind,
                    description: match kind {
                        GapKind::Missing => format!("no {} produced", category.label()),
                        _ => format!("{} scored {:.0}", category.label(), score),
                    },
                    remediation: remediation(category).to_string(),
                    target_unit: None,
                });
            } else if score >= STRENGTH_SCORE {
                strengths.push(format!("strong {}", category.label()));
            }
        }

        if let Some(gap) = dietary_cross_check(city.slot(slots::HIDDEN_GEMS), preferences) {
            gaps.push(gap);
        }
        if let Some(gap) = interest_cross_check(city.slot(slots::PREFERENCE_MATCH), preferences) {
            gaps.push(gap);
        }

        let has_category_gaps = gaps.iter().any(|g| g.category.is_some());
        gaps.extend(reported_gaps(city));

        let quality = GapCategory::ALL
            .iter()
            .map(|c| c.weight() * category_scores.get(c).copied().unwrap_or(0.0))
            .sum::<f64>()
            .clamp(0.0, 100.0);

        let verdict = if !has_category_gaps {
            Verdict::Complete
        } else if below > CRITICAL_CATEGORY_COUNT {
            Verdict::CriticalGaps
        } else {
            Verdict::NeedsRefinement
        };

        Reflection {
            iteration,
            quality,
            category_scores,
            strengths,
            gaps,
            verdict,
            created_at: Utc::now(),
        }
    }
}

fn remediation(category: GapCategory) -> &'static str {
    match category {
        GapCategory::Narrative => "Write a headline, a theme and a fuller story for the stay",
        GapCategory::TimeAllocation => "Cover every day with blocks matching the requested pace",
        GapCategory::Clusters => "Group places into at least two walkable neighbourhoods",
        GapCategory::PreferenceMatch => "Score the city against each stated interest",
        GapCategory::HiddenGems => "List at least three lesser-known spots including a dining find",
        GapCategory::Logistics => "Describe arrival, local transport and at least two tips",
        GapCategory::Synthesis => "Summarise the stay with at least three highlights",
    }
}

fn text(value: Option<&Value>, key: &str) -> Option<String> {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn array<'a>(value: Option<&'a Value>, key: &str) -> &'a [Value] {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn ratio(have: f64, want: f64) -> f64 {
    if want <= 0.0 {
        1.0
    } else {
        (have / want).min(1.0)
    }
}

fn score_category(
    category: GapCategory,
    slot: Option<&Value>,
    nights: u32,
    preferences: &Preferences,
) -> f64 {
    let Some(value) = slot else {
        return 0.0;
    };
    let value = Some(value);

    match category {
        GapCategory::Narrative => {
            let mut score = 0.0;
            if text(value, "headline").is_some() {
                score += 30.0;
            }
            if text(value, "theme").is_some() {
                score += 20.0;
            }
            let story_len = text(value, "story").map(|s| s.len()).unwrap_or(0);
            score + 50.0 * ratio(story_len as f64, 400.0)
        }
        GapCategory::TimeAllocation => {
            let blocks = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            if blocks.is_empty() {
                return 0.0;
            }
            let mut days: Vec<i64> = blocks
                .iter()
                .filter_map(|b| b.get("day").and_then(Value::as_i64))
                .collect();
            days.sort_unstable();
            days.dedup();

            let wanted_days = f64::from(nights.max(1));
            let coverage = ratio(days.len() as f64, wanted_days);
            let per_day = blocks.len() as f64 / (days.len().max(1) as f64);
            let target = preferences.pace.blocks_per_day();
            let pace_fit = (per_day / target).min(target / per_day);
            60.0 * coverage + 40.0 * pace_fit
        }
        GapCategory::Clusters => {
            let clusters = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            if clusters.is_empty() {
                return 0.0;
            }
            let populated = clusters
                .iter()
                .filter(|c| !array(Some(*c), "places").is_empty())
                .count();
            let mut score = 40.0 * ratio(populated as f64, clusters.len() as f64);
            if clusters.len() >= 2 {
                score += 30.0;
            }
            let dense = clusters
                .iter()
                .filter(|c| array(Some(*c), "places").len() >= 2)
                .count();
            score + 30.0 * ratio(dense as f64, clusters.len() as f64)
        }
        GapCategory::PreferenceMatch => {
            let reported = value
                .and_then(|v| v.get("score"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 100.0);
            let rationale = if text(value, "rationale").is_some() {
                1.0
            } else {
                0.8
            };
            reported * rationale
        }
        GapCategory::HiddenGems => {
            let gems = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            if gems.is_empty() {
                return 0.0;
            }
            let mut score = 60.0 * ratio(gems.len() as f64, 3.0);
            if gems.iter().any(is_food) {
                score += 20.0;
            }
            let explained = gems.iter().filter(|g| text(Some(*g), "why").is_some()).count();
            score += 20.0 * ratio(explained as f64, gems.len() as f64);
            if !preferences.dietary.is_empty() && !has_dietary_find(gems, &preferences.dietary) {
                score = score.min(50.0);
            }
            score
        }
        GapCategory::Logistics => {
            let mut score = 0.0;
            if text(value, "arrival").is_some() {
                score += 30.0;
            }
            if text(value, "transport").is_some() {
                score += 30.0;
            }
            score + 40.0 * ratio(array(value, "tips").len() as f64, 2.0)
        }
        GapCategory::Synthesis => {
            let mut score = 0.0;
            if text(value, "summary").is_some() {
                score += 40.0;
            }
            score += 40.0 * ratio(array(value, "highlights").len() as f64, 3.0);
            if !array(value, "themes").is_empty() {
                score += 20.0;
            }
            score
        }
    }
}

fn is_food(gem: &Value) -> bool {
    gem.get("category")
        .and_then(Value::as_str)
        .map(|c| {
            let c = c.to_lowercase();
            c.contains("food") || c.contains("dining") || c.contains("restaurant")
        })
        .unwrap_or(false)
}

fn has_dietary_find(gems: &[Value], dietary: &[String]) -> bool {
    gems.iter().filter(|g| is_food(g)).any(|gem| {
        array(Some(gem), "dietary").iter().any(|tag| {
            tag.as_str()
                .map(|t| dietary.iter().any(|d| d.eq_ignore_ascii_case(t.trim())))
                .unwrap_or(false)
        })
    })
}

fn dietary_cross_check(gems: Option<&Value>, preferences: &Preferences) -> Option<Gap> {
    let gems = gems?.as_array()?;
    if preferences.dietary.is_empty() || has_dietary_find(gems, &preferences.dietary) {
        return None;
    }
    Some(Gap {
        category: Some(GapCategory::HiddenGems),
        kind: GapKind::PreferenceMismatch,
        description: format!(
            "no dining find suits the {} requirement",
            preferences.dietary.join("/")
        ),
        remediation: format!(
            "Add a food entry tagged {}",
            preferences.dietary.join(" or ")
        ),
        target_unit: None,
    })
}

fn interest_cross_check(matched: Option<&Value>, preferences: &Preferences) -> Option<Gap> {
    let matched = matched?;
    if preferences.interests.is_empty() || !array(Some(matched), "matchedInterests").is_empty() {
        return None;
    }
    Some(Gap {
        category: Some(GapCategory::PreferenceMatch),
        kind: GapKind::PreferenceMismatch,
        description: format!(
            "none of the interests ({}) were matched",
            preferences.interests.join(", ")
        ),
        remediation: "Relate the city to each stated interest".to_string(),
        target_unit: None,
    })
}

/// Free-text gaps and suggestions carried on successful unit outputs
fn reported_gaps(city: &CityIntelligence) -> Vec<Gap> {
    let mut gaps = Vec::new();
    for (unit, task) in &city.tasks {
        let Some(output) = task.output.as_ref().filter(|o| o.success) else {
            continue;
        };
        for gap in &output.gaps {
            gaps.push(Gap {
                category: None,
                kind: GapKind::Reported,
                description: format!("{}: {}", unit, gap),
                remediation: gap.clone(),
                target_unit: None,
            });
        }
        for suggestion in &output.suggestions {
            gaps.push(Gap {
                category: None,
                kind: GapKind::Suggestion,
                description: format!("{} suggests: {}", unit, suggestion.message),
                remediation: suggestion.message.clone(),
                target_unit: Some(suggestion.target.clone()),
            });
        }
    }
    gaps
}
