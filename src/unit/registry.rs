use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::{self, UnitSpec};
use super::{ClusterUnit, NullUnit, PromptUnit, TaskUnit, WeatherUnit};
use crate::config::Config;
use crate::provider::{Backend, BackendLookup};

/// Units available to one orchestrator, keyed by name
#[derive(Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, Arc<dyn TaskUnit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the catalog units for `config`. Without a backend every unit is
    /// served by its placeholder.
    pub fn from_config(config: &Config, backend: Option<Arc<dyn Backend>>) -> Self {
        let mut registry = Self::new();

        for spec in catalog::CATALOG {
            if config.disabled_units.iter().any(|d| d == spec.name) {
                info!("Unit {} disabled by config", spec.name);
                continue;
            }
            registry.register(build_unit(spec, backend.as_ref(), config));
        }

        debug!(
            "Registry built with {} units ({})",
            registry.len(),
            backend.as_ref().map(|b| b.name()).unwrap_or("offline")
        );
        registry
    }

    /// Insert a unit, replacing any unit of the same name
    pub fn register(&mut self, unit: Arc<dyn TaskUnit>) {
        self.units.insert(unit.name().to_string(), unit);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn TaskUnit>> {
        self.units.remove(name)
    }

    /// Registered unit, or a placeholder for a catalog unit that is not
    /// registered. `None` for names the catalog does not know either.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn TaskUnit>> {
        self.get(name).or_else(|| {
            catalog::spec(name).map(|spec| Arc::new(NullUnit::from_spec(spec)) as Arc<dyn TaskUnit>)
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskUnit>> {
        self.units.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit name -> declared dependencies that are themselves registered.
    /// Dependencies on unregistered catalog units are dropped so that
    /// disabling a unit only degrades its dependents.
    pub fn dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        let registered: BTreeSet<&str> = self.units.keys().map(String::as_str).collect();

        self.units
            .iter()
            .map(|(name, unit)| {
                let deps = unit
                    .descriptor()
                    .depends_on
                    .iter()
                    .filter(|dep| {
                        registered.contains(dep.as_str()) || !catalog::is_known_unit(dep)
                    })
                    .cloned()
                    .collect();
                (name.clone(), deps)
            })
            .collect()
    }
}

fn build_unit(
    spec: &UnitSpec,
    backend: Option<&Arc<dyn Backend>>,
    config: &Config,
) -> Arc<dyn TaskUnit> {
    let Some(backend) = backend else {
        return Arc::new(NullUnit::from_spec(spec));
    };

    match spec.name {
        catalog::CLUSTER_BUILDER => Arc::new(ClusterUnit::from_spec(
            spec,
            Arc::new(BackendLookup::new(backend.clone(), config.retry.clone())),
        )),
        catalog::WEATHER_SCOUT => Arc::new(WeatherUnit::from_spec(
            spec,
            Arc::new(BackendLookup::new(backend.clone(), config.retry.clone())),
        )),
        _ => Arc::new(PromptUnit::from_spec(
            spec,
            backend.clone(),
            config.retry.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_registry_has_full_catalog() {
        let registry = UnitRegistry::from_config(&Config::default(), None);
        assert_eq!(registry.len(), catalog::CATALOG.len());
        assert!(registry.contains(catalog::STORY_WEAVER));
    }

    #[test]
    fn test_disabled_unit_is_dropped_from_dependencies() {
        let config = Config {
            disabled_units: vec![catalog::HIDDEN_GEMS.to_string()],
            ..Config::default()
        };
        let registry = UnitRegistry::from_config(&config, None);

        assert!(!registry.contains(catalog::HIDDEN_GEMS));
        let deps = registry.dependency_map();
        assert!(!deps[catalog::STORY_WEAVER].contains(&catalog::HIDDEN_GEMS.to_string()));
        assert!(deps[catalog::STORY_WEAVER].contains(&catalog::CLUSTER_BUILDER.to_string()));
    }

    #[test]
    fn test_resolve_falls_back_to_placeholder() {
        let mut registry = UnitRegistry::from_config(&Config::default(), None);
        registry.remove(catalog::PHOTO_SCOUT);

        let unit = registry.resolve(catalog::PHOTO_SCOUT).unwrap();
        assert_eq!(unit.name(), catalog::PHOTO_SCOUT);
        assert!(registry.resolve("tour_guide").is_none());
    }
}
