use async_trait::async_trait;
use serde_json::{json, Value};

use super::catalog::UnitSpec;
use super::{slots, TaskUnit, UnitContext, UnitDescriptor, UnitInput, UnitResult};
use crate::error::UnitError;

const PLACEHOLDER_CONFIDENCE: f64 = 50.0;
const PLACEHOLDER_GAP: &str = "placeholder output: no backend configured";

/// Stand-in for a unit that has no backend to talk to. Produces structurally
/// valid, clearly generic output for every declared slot.
pub struct NullUnit {
    descriptor: UnitDescriptor,
}

impl NullUnit {
    pub fn new(descriptor: UnitDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn from_spec(spec: &UnitSpec) -> Self {
        Self::new(spec.descriptor())
    }
}

fn placeholder(slot: &str, input: &UnitInput) -> Option<Value> {
    let city = &input.city.name;
    let nights = input.nights.max(1);
    let prefs = &input.preferences;

    let value = match slot {
        slots::TIME_BLOCKS => {
            let periods = ["morning", "afternoon", "evening", "night"];
            let per_day = (prefs.pace.blocks_per_day() as usize).min(periods.len());
            let blocks: Vec<Value> = (1..=nights)
                .flat_map(|day| {
                    periods[..per_day].iter().map(move |period| {
                        json!({
                            "day": day,
                            "period": period,
                            "activity": format!("Explore {}", city),
                            "area": "City centre",
                            "durationHours": 3,
                        })
                    })
                })
                .collect();
            Value::Array(blocks)
        }
        slots::PREFERENCE_MATCH => json!({
            "score": 60,
            "matchedInterests": prefs.interests,
            "unmatchedInterests": [],
            "rationale": format!("No detailed assessment of {} available", city),
        }),
        slots::WEATHER => json!({
            "summary": "Seasonal averages unavailable",
            "lowC": null,
            "highC": null,
            "conditions": [],
        }),
        slots::CLUSTERS => json!([
            {"name": "Old Town", "places": [{"name": format!("{} main square", city), "category": "sight"}]},
            {"name": "Riverside", "places": [{"name": format!("{} promenade", city), "category": "walk"}]},
        ]),
        slots::HIDDEN_GEMS => json!([
            {"name": format!("{} neighbourhood market", city), "category": "food", "why": "Local produce and stalls", "dietary": prefs.dietary},
            {"name": format!("{} side-street gallery", city), "category": "culture", "why": "Small rotating exhibitions", "dietary": []},
            {"name": format!("{} hilltop viewpoint", city), "category": "nature", "why": "Quiet view over the rooftops", "dietary": []},
        ]),
        slots::LOGISTICS => {
            let arrival = input
                .trip
                .as_ref()
                .map(|t| format!("Arrive from {} and head to the centre", t.origin))
                .unwrap_or_else(|| "Arrive at the main station".to_string());
            json!({
                "arrival": arrival,
                "transport": "Walk and use public transport",
                "tips": ["Carry a refillable water bottle", "Buy a day pass for transit"],
            })
        }
        slots::PHOTO_SPOTS => json!([
            {"name": format!("{} old bridge", city), "bestLight": "golden hour", "tip": "Shoot from the east bank"},
        ]),
        slots::NARRATIVE => json!({
            "headline": format!("{} nights in {}", nights, city),
            "theme": "First impressions",
            "story": format!("A gentle introduction to {}.", city),
        }),
        slots::SYNTHESIS => json!({
            "summary": format!("A {}-night stay in {}", nights, city),
            "highlights": ["Old Town walk", "Local market", "Sunset viewpoint"],
            "themes": prefs.interests,
        }),
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl TaskUnit for NullUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &UnitInput, _ctx: &UnitContext) -> Result<UnitResult, UnitError> {
        let mut result = UnitResult::new(PLACEHOLDER_CONFIDENCE).with_gap(PLACEHOLDER_GAP);
        for slot in &self.descriptor.outputs {
            if let Some(value) = placeholder(slot, input) {
                result = result.with_slot(slot, value);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{City, Pace, Preferences};
    use crate::unit::catalog;
    use std::time::Duration;

    fn input(pace: Pace) -> UnitInput {
        UnitInput::new(
            City {
                id: "lyon".to_string(),
                name: "Lyon".to_string(),
                country: None,
                description: None,
                latitude: None,
                longitude: None,
            },
            2,
            Preferences {
                dietary: vec!["vegan".to_string()],
                pace,
                ..Preferences::default()
            },
        )
    }

    #[tokio::test]
    async fn test_every_catalog_slot_has_a_placeholder() {
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));
        for spec in catalog::CATALOG {
            let out = NullUnit::from_spec(spec)
                .execute(&input(Pace::Moderate), &ctx)
                .await;
            assert!(out.success, "{} failed", spec.name);
            for slot in spec.outputs {
                assert!(out.data.contains_key(*slot), "{} missing {}", spec.name, slot);
            }
            assert_eq!(out.confidence, PLACEHOLDER_CONFIDENCE);
        }
    }

    #[tokio::test]
    async fn test_time_blocks_follow_pace() {
        let unit = NullUnit::from_spec(catalog::spec(catalog::TIME_ALLOCATOR).unwrap());
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));

        let out = unit.execute(&input(Pace::Packed), &ctx).await;

        assert_eq!(out.data[slots::TIME_BLOCKS].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_food_gem_carries_dietary_tags() {
        let unit = NullUnit::from_spec(catalog::spec(catalog::HIDDEN_GEMS).unwrap());
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));

        let out = unit.execute(&input(Pace::Relaxed), &ctx).await;

        assert_eq!(out.data[slots::HIDDEN_GEMS][0]["dietary"][0], "vegan");
    }
}
