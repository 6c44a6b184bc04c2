//! Session state store
//!
//! One `SharedMemory` per session. The session record sits behind a `RwLock`;
//! every city gets its own `Mutex`, so parallel units of one phase serialise
//! their writes per city and never lose updates. Nothing is created on
//! demand: task and city operations fail unless the record was initialized.

mod types;

pub use types::*;

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::error::StoreError;
use crate::orchestrator::CrossCityInsights;
use crate::reflection::Reflection;
use crate::unit::TaskOutput;

struct CitySlot {
    id: CityId,
    record: Arc<Mutex<CityIntelligence>>,
}

pub struct SharedMemory {
    session: RwLock<Session>,
    cities: RwLock<Vec<CitySlot>>,
    insights: RwLock<Option<CrossCityInsights>>,
}

fn poisoned<T>(what: &str) -> impl FnOnce(T) -> StoreError + '_ {
    move |_| StoreError::Poisoned(what.to_string())
}

impl SharedMemory {
    pub fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
            cities: RwLock::new(Vec::new()),
            insights: RwLock::new(None),
        }
    }

    pub fn session(&self) -> Result<Session, StoreError> {
        let session = self.session.read().map_err(poisoned("session"))?;
        Ok(session.clone())
    }

    pub fn session_id(&self) -> Result<String, StoreError> {
        let session = self.session.read().map_err(poisoned("session"))?;
        Ok(session.id.clone())
    }

    pub fn set_phase(
        &self,
        phase: OrchestratorPhase,
        current_city: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut session = self.session.write().map_err(poisoned("session"))?;
        session.phase = phase;
        session.current_city = current_city.map(str::to_string);
        session.updated_at = Utc::now();
        Ok(())
    }

    /// Create a fresh record for `city`, replacing any previous one
    pub fn initialize_city_intelligence(&self, city: City, nights: u32) -> Result<(), StoreError> {
        let mut cities = self.cities.write().map_err(poisoned("cities"))?;
        let id = city.id.clone();
        let record = Arc::new(Mutex::new(CityIntelligence::new(city, nights)));

        match cities.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => slot.record = record,
            None => cities.push(CitySlot { id, record }),
        }
        Ok(())
    }

    fn city_record(&self, city_id: &str) -> Result<Arc<Mutex<CityIntelligence>>, StoreError> {
        let cities = self.cities.read().map_err(poisoned("cities"))?;
        cities
            .iter()
            .find(|slot| slot.id == city_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| StoreError::CityNotFound(city_id.to_string()))
    }

    fn with_city<R>(
        &self,
        city_id: &str,
        f: impl FnOnce(&mut CityIntelligence) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let record = self.city_record(city_id)?;
        let mut guard: MutexGuard<'_, CityIntelligence> =
            record.lock().map_err(poisoned("city"))?;
        let result = f(&mut guard)?;
        guard.updated_at = Utc::now();
        Ok(result)
    }

    pub fn initialize_task_state(&self, city_id: &str, task: &str) -> Result<(), StoreError> {
        self.with_city(city_id, |city| {
            city.tasks.insert(task.to_string(), TaskState::new(task));
            Ok(())
        })
    }

    /// Shallow-merge `patch` into an existing task state; progress only moves forward
    pub fn update_task_state(
        &self,
        city_id: &str,
        task: &str,
        patch: TaskStatePatch,
    ) -> Result<(), StoreError> {
        self.with_city(city_id, |city| {
            let state = city
                .tasks
                .get_mut(task)
                .ok_or_else(|| StoreError::TaskNotFound {
                    city: city_id.to_string(),
                    task: task.to_string(),
                })?;

            if let Some(status) = patch.status {
                state.status = status;
            }
            if let Some(progress) = patch.progress {
                state.progress = state.progress.max(progress.min(100));
            }
            if let Some(output) = patch.output {
                state.output = Some(output);
            }
            if let Some(error) = patch.error {
                state.error = Some(error);
            }
            state.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Accept a successful output: record it on the task and copy its slots
    /// into the city. Failed outputs leave the city untouched.
    pub fn set_task_output(
        &self,
        city_id: &str,
        task: &str,
        output: &TaskOutput,
    ) -> Result<bool, StoreError> {
        if !output.success {
            return Ok(false);
        }

        self.with_city(city_id, |city| {
            let state = city
                .tasks
                .get_mut(task)
                .ok_or_else(|| StoreError::TaskNotFound {
                    city: city_id.to_string(),
                    task: task.to_string(),
                })?;
            state.output = Some(output.clone());
            state.updated_at = Utc::now();

            for (slot, value) in &output.data {
                city.outputs.insert(slot.clone(), value.clone());
            }
            Ok(true)
        })
    }

    pub fn update_city_quality(
        &self,
        city_id: &str,
        quality: f64,
        iteration: u32,
    ) -> Result<(), StoreError> {
        self.with_city(city_id, |city| {
            city.quality = quality.clamp(0.0, 100.0);
            city.iteration = iteration;
            Ok(())
        })
    }

    pub fn add_reflection(&self, city_id: &str, reflection: Reflection) -> Result<(), StoreError> {
        self.with_city(city_id, |city| {
            city.reflections.push(reflection);
            Ok(())
        })
    }

    pub fn update_city_status(&self, city_id: &str, status: CityStatus) -> Result<(), StoreError> {
        self.with_city(city_id, |city| {
            city.status = status;
            Ok(())
        })
    }

    pub fn city(&self, city_id: &str) -> Result<CityIntelligence, StoreError> {
        let record = self.city_record(city_id)?;
        let guard = record.lock().map_err(poisoned("city"))?;
        Ok(guard.clone())
    }

    /// Snapshot of every city in route order
    pub fn cities(&self) -> Result<Vec<CityIntelligence>, StoreError> {
        let records: Vec<_> = {
            let cities = self.cities.read().map_err(poisoned("cities"))?;
            cities.iter().map(|slot| slot.record.clone()).collect()
        };

        records
            .iter()
            .map(|record| {
                record
                    .lock()
                    .map(|guard| guard.clone())
                    .map_err(poisoned("city"))
            })
            .collect()
    }

    /// Mean progress over every task of every city, each task weighted equally
    pub fn calculate_overall_progress(&self) -> Result<f64, StoreError> {
        let cities = self.cities()?;
        let progress: Vec<u8> = cities
            .iter()
            .flat_map(|city| city.tasks.values().map(|task| task.progress))
            .collect();

        if progress.is_empty() {
            return Ok(0.0);
        }
        let total: u64 = progress.iter().map(|p| u64::from(*p)).sum();
        Ok(total as f64 / progress.len() as f64)
    }

    pub fn set_insights(&self, insights: CrossCityInsights) -> Result<(), StoreError> {
        let mut slot = self.insights.write().map_err(poisoned("insights"))?;
        *slot = Some(insights);
        Ok(())
    }

    pub fn insights(&self) -> Result<Option<CrossCityInsights>, StoreError> {
        let slot = self.insights.read().map_err(poisoned("insights"))?;
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn memory() -> SharedMemory {
        SharedMemory::new(Session::new(
            "s1".to_string(),
            None,
            TripContext {
                origin: "Lisbon".to_string(),
                destination: "Seville".to_string(),
                total_nights: 5,
            },
            Preferences::default(),
        ))
    }

    fn city(id: &str) -> City {
        City {
            id: id.to_string(),
            name: id.to_uppercase(),
            country: None,
            description: None,
            latitude: None,
            longitude: None,
        }
    }

    fn output(success: bool, slot: &str) -> TaskOutput {
        let mut data = BTreeMap::new();
        if success {
            data.insert(slot.to_string(), json!({"headline": "x"}));
        }
        TaskOutput {
            success,
            data,
            confidence: if success { 80.0 } else { 0.0 },
            gaps: Vec::new(),
            suggestions: Vec::new(),
            execution_time_ms: 5,
        }
    }

    #[test]
    fn test_task_ops_require_initialized_city() {
        let memory = memory();
        assert!(matches!(
            memory.initialize_task_state("porto", "story_weaver"),
            Err(StoreError::CityNotFound(_))
        ));
    }

    #[test]
    fn test_update_requires_initialized_task() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        let result =
            memory.update_task_state("porto", "story_weaver", TaskStatePatch::progress(10));
        assert!(matches!(result, Err(StoreError::TaskNotFound { .. })));
    }

    #[test]
    fn test_progress_never_decreases() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_task_state("porto", "hidden_gems").unwrap();

        memory
            .update_task_state("porto", "hidden_gems", TaskStatePatch::progress(60))
            .unwrap();
        memory
            .update_task_state("porto", "hidden_gems", TaskStatePatch::progress(20))
            .unwrap();

        let snapshot = memory.city("porto").unwrap();
        assert_eq!(snapshot.tasks["hidden_gems"].progress, 60);
    }

    #[test]
    fn test_reinitializing_task_resets_progress() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_task_state("porto", "hidden_gems").unwrap();
        memory
            .update_task_state("porto", "hidden_gems", TaskStatePatch::progress(100))
            .unwrap();
        memory.initialize_task_state("porto", "hidden_gems").unwrap();

        let snapshot = memory.city("porto").unwrap();
        assert_eq!(snapshot.tasks["hidden_gems"].progress, 0);
        assert_eq!(snapshot.tasks["hidden_gems"].status, TaskStatus::Pending);
    }

    #[test]
    fn test_failed_output_is_not_written() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_task_state("porto", "story_weaver").unwrap();

        let written = memory
            .set_task_output("porto", "story_weaver", &output(false, "narrative"))
            .unwrap();
        assert!(!written);
        assert!(memory.city("porto").unwrap().outputs.is_empty());

        let written = memory
            .set_task_output("porto", "story_weaver", &output(true, "narrative"))
            .unwrap();
        assert!(written);
        let snapshot = memory.city("porto").unwrap();
        assert!(snapshot.slot("narrative").is_some());
        assert!(snapshot.tasks["story_weaver"].output.is_some());
    }

    #[test]
    fn test_reinitializing_city_replaces_record() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_task_state("porto", "story_weaver").unwrap();
        memory
            .set_task_output("porto", "story_weaver", &output(true, "narrative"))
            .unwrap();
        memory.update_city_quality("porto", 64.0, 1).unwrap();

        memory.initialize_city_intelligence(city("porto"), 4).unwrap();
        let snapshot = memory.city("porto").unwrap();
        assert_eq!(snapshot.nights, 4);
        assert!(snapshot.outputs.is_empty());
        assert!(snapshot.tasks.is_empty());
        assert_eq!(snapshot.iteration, 0);
        assert_eq!(memory.cities().unwrap().len(), 1);
    }

    #[test]
    fn test_overall_progress_is_task_mean() {
        let memory = memory();
        assert_eq!(memory.calculate_overall_progress().unwrap(), 0.0);

        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_city_intelligence(city("braga"), 1).unwrap();
        memory.initialize_task_state("porto", "a").unwrap();
        memory.initialize_task_state("porto", "b").unwrap();
        memory.initialize_task_state("braga", "a").unwrap();
        memory
            .update_task_state("porto", "a", TaskStatePatch::progress(100))
            .unwrap();
        memory
            .update_task_state("braga", "a", TaskStatePatch::progress(50))
            .unwrap();

        assert_eq!(memory.calculate_overall_progress().unwrap(), 50.0);
    }

    #[test]
    fn test_cities_keep_route_order() {
        let memory = memory();
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        memory.initialize_city_intelligence(city("braga"), 1).unwrap();
        memory.initialize_city_intelligence(city("porto"), 3).unwrap();

        let ids: Vec<_> = memory
            .cities()
            .unwrap()
            .into_iter()
            .map(|c| c.city.id)
            .collect();
        assert_eq!(ids, vec!["porto", "braga"]);
    }

    #[tokio::test]
    async fn test_concurrent_task_writes_are_not_lost() {
        let memory = Arc::new(memory());
        memory.initialize_city_intelligence(city("porto"), 2).unwrap();
        let names: Vec<String> = (0..16).map(|i| format!("unit_{}", i)).collect();
        for name in &names {
            memory.initialize_task_state("porto", name).unwrap();
        }

        let mut handles = Vec::new();
        for name in names.clone() {
            let memory = memory.clone();
            handles.push(tokio::spawn(async move {
                let mut data = BTreeMap::new();
                data.insert(format!("slot_{}", name), json!(1));
                let out = TaskOutput {
                    success: true,
                    data,
                    confidence: 90.0,
                    gaps: Vec::new(),
                    suggestions: Vec::new(),
                    execution_time_ms: 1,
                };
                memory.set_task_output("porto", &name, &out).unwrap();
                memory
                    .update_task_state("porto", &name, TaskStatePatch::progress(100))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = memory.city("porto").unwrap();
        assert_eq!(snapshot.outputs.len(), 16);
        assert!(snapshot.tasks.values().all(|t| t.progress == 100));
    }
}
