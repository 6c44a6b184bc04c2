use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::catalog::{self, UnitSpec};
use super::{slots, TaskUnit, UnitContext, UnitDescriptor, UnitInput, UnitResult};
use crate::error::UnitError;
use crate::provider::{Place, PlacesLookup};

/// Groups looked-up places by neighbourhood. The number of clusters follows
/// the number of planned days when the time allocation is available.
pub struct ClusterUnit {
    descriptor: UnitDescriptor,
    places: Arc<dyn PlacesLookup>,
}

impl ClusterUnit {
    pub fn from_spec(spec: &UnitSpec, places: Arc<dyn PlacesLookup>) -> Self {
        Self {
            descriptor: spec.descriptor(),
            places,
        }
    }
}

fn planned_days(input: &UnitInput) -> usize {
    input
        .dependency_slot(catalog::TIME_ALLOCATOR, slots::TIME_BLOCKS)
        .and_then(Value::as_array)
        .map(|blocks| {
            let mut days: Vec<i64> = blocks
                .iter()
                .filter_map(|b| b.get("day").and_then(Value::as_i64))
                .collect();
            days.sort_unstable();
            days.dedup();
            days.len()
        })
        .filter(|n| *n > 0)
        .unwrap_or(input.nights as usize)
}

pub(crate) fn cluster_places(places: Vec<Place>, max_clusters: usize) -> Vec<Value> {
    let mut by_area: BTreeMap<String, Vec<Place>> = BTreeMap::new();
    for place in places {
        let area = if place.area.trim().is_empty() {
            "City centre".to_string()
        } else {
            place.area.trim().to_string()
        };
        by_area.entry(area).or_default().push(place);
    }

    let mut groups: Vec<(String, Vec<Place>)> = by_area.into_iter().collect();
    // Largest first, name as tiebreak for stable output
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    groups.truncate(max_clusters.max(1));

    groups
        .into_iter()
        .map(|(area, places)| {
            json!({
                "name": area,
                "places": places
                    .iter()
                    .map(|p| json!({"name": p.name, "category": p.category}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect()
}

#[async_trait]
impl TaskUnit for ClusterUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &UnitInput, ctx: &UnitContext) -> Result<UnitResult, UnitError> {
        let mut interests = input.preferences.interests.clone();
        if let Some(focus) = &input.refinement_instructions {
            interests.push(focus.clone());
        }

        let places = self
            .places
            .search(&input.city, &interests, ctx.timeout)
            .await?;
        ctx.report_progress(60);

        if places.is_empty() {
            return Err(UnitError::Execution(format!(
                "no places found for {}",
                input.city.name
            )));
        }

        let days = planned_days(input);
        let clusters = cluster_places(places, days + 1);
        let mut result = UnitResult::new(if clusters.len() >= 2 { 80.0 } else { 55.0 })
            .with_slot(slots::CLUSTERS, Value::Array(clusters.clone()));

        if input.dependency(catalog::TIME_ALLOCATOR).is_none() {
            result = result.with_gap("time allocation unavailable, clustered by nights");
        }
        if clusters.len() < 2 {
            result = result.with_gap("places concentrated in a single area");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::store::{City, Preferences};
    use crate::unit::TaskOutput;
    use std::time::Duration;

    struct FixedPlaces(Vec<Place>);

    #[async_trait]
    impl PlacesLookup for FixedPlaces {
        async fn search(
            &self,
            _city: &City,
            _interests: &[String],
            _timeout: Duration,
        ) -> Result<Vec<Place>, BackendError> {
            Ok(self.0.clone())
        }
    }

    fn place(name: &str, area: &str) -> Place {
        Place {
            name: name.to_string(),
            category: "sight".to_string(),
            area: area.to_string(),
        }
    }

    fn input() -> UnitInput {
        UnitInput::new(
            City {
                id: "porto".to_string(),
                name: "Porto".to_string(),
                country: None,
                description: None,
                latitude: None,
                longitude: None,
            },
            1,
            Preferences::default(),
        )
    }

    #[test]
    fn test_cluster_places_largest_first() {
        let clusters = cluster_places(
            vec![
                place("Sé", "Ribeira"),
                place("Bolhão", "Baixa"),
                place("Cais", "Ribeira"),
                place("Livraria", "Baixa"),
                place("Ponte", "Ribeira"),
                place("Serralves", "Boavista"),
            ],
            2,
        );

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0]["name"], "Ribeira");
        assert_eq!(clusters[0]["places"].as_array().unwrap().len(), 3);
        assert_eq!(clusters[1]["name"], "Baixa");
    }

    #[tokio::test]
    async fn test_run_uses_time_blocks_for_cluster_count() {
        let unit = ClusterUnit::from_spec(
            catalog::spec(catalog::CLUSTER_BUILDER).unwrap(),
            Arc::new(FixedPlaces(vec![
                place("a", "North"),
                place("b", "South"),
                place("c", "East"),
                place("d", "West"),
            ])),
        );
        let mut previous = BTreeMap::new();
        let mut data = BTreeMap::new();
        data.insert(
            slots::TIME_BLOCKS.to_string(),
            json!([{"day": 1}, {"day": 2}, {"day": 2}]),
        );
        previous.insert(
            catalog::TIME_ALLOCATOR.to_string(),
            TaskOutput {
                success: true,
                data,
                confidence: 90.0,
                ..TaskOutput::default()
            },
        );
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));

        let out = unit
            .execute(&input().with_previous_outputs(previous), &ctx)
            .await;

        assert!(out.success);
        assert_eq!(out.data[slots::CLUSTERS].as_array().unwrap().len(), 3);
        assert!(out.gaps.is_empty());
    }

    #[tokio::test]
    async fn test_run_without_places_fails() {
        let unit = ClusterUnit::from_spec(
            catalog::spec(catalog::CLUSTER_BUILDER).unwrap(),
            Arc::new(FixedPlaces(Vec::new())),
        );
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));

        let out = unit.execute(&input(), &ctx).await;

        assert!(!out.success);
        assert!(out.gaps[0].contains("no places"));
    }
}
