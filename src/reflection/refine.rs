//! Map reflection gaps to the units that should re-run

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{Gap, GapCategory, Reflection};
use crate::unit::catalog;

/// Which unit owns each scored category
const CATEGORY_UNITS: &[(GapCategory, &str)] = &[
    (GapCategory::Narrative, catalog::STORY_WEAVER),
    (GapCategory::TimeAllocation, catalog::TIME_ALLOCATOR),
    (GapCategory::Clusters, catalog::CLUSTER_BUILDER),
    (GapCategory::PreferenceMatch, catalog::PREFERENCE_MATCHER),
    (GapCategory::HiddenGems, catalog::HIDDEN_GEMS),
    (GapCategory::Logistics, catalog::LOGISTICS_PLANNER),
    (GapCategory::Synthesis, catalog::STORY_WEAVER),
];

/// Keywords for free-text gaps reported by units; first match wins.
/// Matched against whole words, optionally pluralised with a trailing `s`.
const KEYWORD_UNITS: &[(&str, &str)] = &[
    ("weather", catalog::WEATHER_SCOUT),
    ("rain", catalog::WEATHER_SCOUT),
    ("photo", catalog::PHOTO_SCOUT),
    ("transport", catalog::LOGISTICS_PLANNER),
    ("transit", catalog::LOGISTICS_PLANNER),
    ("arrival", catalog::LOGISTICS_PLANNER),
    ("train", catalog::LOGISTICS_PLANNER),
    ("airport", catalog::LOGISTICS_PLANNER),
    ("neighbourhood", catalog::CLUSTER_BUILDER),
    ("neighborhood", catalog::CLUSTER_BUILDER),
    ("schedule", catalog::TIME_ALLOCATOR),
    ("itinerary", catalog::TIME_ALLOCATOR),
    ("dining", catalog::HIDDEN_GEMS),
    ("food", catalog::HIDDEN_GEMS),
    ("restaurant", catalog::HIDDEN_GEMS),
    ("dietary", catalog::HIDDEN_GEMS),
    ("nightlife", catalog::HIDDEN_GEMS),
    ("interest", catalog::PREFERENCE_MATCHER),
    ("story", catalog::STORY_WEAVER),
    ("highlight", catalog::STORY_WEAVER),
];

fn mentions(word: &str, keyword: &str) -> bool {
    word == keyword || word.strip_suffix('s') == Some(keyword)
}

#[derive(Debug, Clone, Serialize)]
pub struct RefinementPlan {
    pub iteration: u32,
    /// Units to re-run, in name order
    pub units: Vec<String>,
    /// One instruction line per selected unit
    pub instructions: BTreeMap<String, String>,
    pub gaps: Vec<Gap>,
}

impl RefinementPlan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

pub struct RefinementPlanner {
    available: BTreeSet<String>,
}

impl RefinementPlanner {
    /// `available` is the set of units that can actually be re-run
    pub fn new(available: impl IntoIterator<Item = String>) -> Self {
        Self {
            available: available.into_iter().collect(),
        }
    }

    fn target_for(gap: &Gap) -> Option<&'static str> {
        if let Some(target) = &gap.target_unit {
            return catalog::spec(target).map(|s| s.name);
        }
        if let Some(category) = gap.category {
            return CATEGORY_UNITS
                .iter()
                .find(|(c, _)| *c == category)
                .map(|(_, unit)| *unit);
        }

        let text = gap.remediation.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        KEYWORD_UNITS
            .iter()
            .find(|(keyword, _)| words.iter().any(|word| mentions(word, keyword)))
            .map(|(_, unit)| *unit)
    }

    pub fn plan(&self, reflection: &Reflection, iteration: u32) -> RefinementPlan {
        let mut lines: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for gap in &reflection.gaps {
            let Some(unit) = Self::target_for(gap) else {
                debug!("No unit handles gap '{}', dropping it", gap.description);
                continue;
            };
            if !self.available.contains(unit) {
                debug!("Unit {} for gap '{}' is not registered", unit, gap.description);
                continue;
            }

            let entry = lines.entry(unit.to_string()).or_default();
            if !entry.contains(&gap.remediation) {
                entry.push(gap.remediation.clone());
            }
        }

        let instructions: BTreeMap<String, String> = lines
            .into_iter()
            .map(|(unit, parts)| (unit, parts.join("; ")))
            .collect();

        RefinementPlan {
            iteration,
            units: instructions.keys().cloned().collect(),
            instructions,
            gaps: reflection.gaps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::{GapKind, Verdict};
    use chrono::Utc;

    fn gap(category: Option<GapCategory>, description: &str, target: Option<&str>) -> Gap {
        Gap {
            category,
            kind: if category.is_some() {
                GapKind::BelowThreshold
            } else {
                GapKind::Reported
            },
            description: description.to_string(),
            remediation: format!("fix: {}", description),
            target_unit: target.map(str::to_string),
        }
    }

    fn reflection(gaps: Vec<Gap>) -> Reflection {
        Reflection {
            iteration: 1,
            quality: 60.0,
            category_scores: BTreeMap::new(),
            strengths: Vec::new(),
            gaps,
            verdict: Verdict::NeedsRefinement,
            created_at: Utc::now(),
        }
    }

    fn planner() -> RefinementPlanner {
        RefinementPlanner::new(catalog::CATALOG.iter().map(|s| s.name.to_string()))
    }

    #[test]
    fn test_category_gaps_use_table() {
        let plan = planner().plan(
            &reflection(vec![
                gap(Some(GapCategory::Narrative), "narrative scored 40", None),
                gap(Some(GapCategory::Synthesis), "synthesis scored 30", None),
                gap(Some(GapCategory::Logistics), "logistics scored 20", None),
            ]),
            2,
        );

        assert_eq!(
            plan.units,
            vec![catalog::LOGISTICS_PLANNER, catalog::STORY_WEAVER]
        );
        assert_eq!(
            plan.instructions[catalog::STORY_WEAVER],
            "fix: narrative scored 40; fix: synthesis scored 30"
        );
        assert_eq!(plan.iteration, 2);
    }

    #[test]
    fn test_free_text_gap_uses_keywords() {
        let plan = planner().plan(
            &reflection(vec![gap(None, "hidden_gems: few nightlife options", None)]),
            2,
        );
        assert_eq!(plan.units, vec![catalog::HIDDEN_GEMS]);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let plan = planner().plan(
            &reflection(vec![gap(None, "add train connections from the airport", None)]),
            2,
        );
        assert_eq!(plan.units, vec![catalog::LOGISTICS_PLANNER]);

        let plan = planner().plan(
            &reflection(vec![gap(None, "vegetarian restaurants near the old town", None)]),
            2,
        );
        assert_eq!(plan.units, vec![catalog::HIDDEN_GEMS]);

        let plan = planner().plan(
            &reflection(vec![gap(None, "an interesting detour", None)]),
            2,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_suggestion_targets_named_unit() {
        let plan = planner().plan(
            &reflection(vec![gap(None, "mention the market", Some(catalog::STORY_WEAVER))]),
            2,
        );
        assert_eq!(plan.units, vec![catalog::STORY_WEAVER]);
    }

    #[test]
    fn test_unmatched_gap_is_dropped() {
        let plan = planner().plan(
            &reflection(vec![gap(None, "placeholder output: no backend configured", None)]),
            2,
        );
        assert!(plan.is_empty());
        assert_eq!(plan.gaps.len(), 1);
    }

    #[test]
    fn test_unavailable_unit_is_skipped() {
        let planner = RefinementPlanner::new(vec![catalog::STORY_WEAVER.to_string()]);
        let plan = planner.plan(
            &reflection(vec![gap(Some(GapCategory::HiddenGems), "hidden gems scored 10", None)]),
            2,
        );
        assert!(plan.is_empty());
    }
}
