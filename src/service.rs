//! Session-level entry points: start a run, poll it, cancel it
//!
//! Each started session owns a `SharedMemory` and a cancellation token. The
//! service keeps them in a map; cancelling or purging removes the entry, so
//! later queries for that session report it as not found.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{RequestError, StoreError, TripIntelError};
use crate::orchestrator::{
    event_stream, CrossCityInsights, EventKind, EventSink, EventStream, Orchestrator, RouteStop,
};
use crate::provider::create_backend;
use crate::reflection::Reflection;
use crate::store::{
    City, CityIntelligence, CityStatus, OrchestratorPhase, Preferences, Session, SharedMemory,
    TaskStatus, TripContext,
};
use crate::unit::UnitRegistry;

/// Request accepted by `IntelligenceService::start`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TripRequest {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,

    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub cities: Option<Vec<City>>,

    /// City id -> nights
    #[serde(default, alias = "nightsPerCity")]
    pub nights_per_city: Option<BTreeMap<String, u32>>,

    #[serde(default, alias = "tripContext")]
    pub trip_context: Option<TripContext>,

    #[serde(default)]
    pub preferences: Preferences,
}

impl TripRequest {
    /// Check the request and resolve it into route stops
    pub fn route(&self) -> Result<Vec<RouteStop>, RequestError> {
        let cities = self
            .cities
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or(RequestError::MissingCities)?;
        let nights = self
            .nights_per_city
            .as_ref()
            .ok_or(RequestError::MissingNights)?;
        if self.trip_context.is_none() {
            return Err(RequestError::MissingTripContext);
        }

        // Nights are keyed by id, so a repeated id cannot be resolved
        let mut seen = BTreeSet::new();
        if let Some(dup) = cities.iter().find(|c| !seen.insert(c.id.as_str())) {
            return Err(RequestError::DuplicateCity(dup.id.clone()));
        }

        cities
            .iter()
            .map(|city| match nights.get(&city.id) {
                Some(n) if *n > 0 => Ok(RouteStop {
                    city: city.clone(),
                    nights: *n,
                }),
                _ => Err(RequestError::NightsNotAssigned(city.id.clone())),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub name: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CityStatusView {
    pub city_id: String,
    pub status: CityStatus,
    pub quality: f64,
    pub iterations: u32,
    pub per_task: Vec<TaskStatusView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: OrchestratorPhase,
    pub current_city_id: Option<String>,
    pub per_city: Vec<CityStatusView>,
    pub overall_progress: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitySnapshot {
    pub city: City,
    pub nights: u32,
    pub status: CityStatus,
    pub quality: f64,
    pub iterations: u32,
    pub outputs: BTreeMap<String, Value>,
    pub latest_reflection: Option<Reflection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CityIntelligence> for CitySnapshot {
    fn from(city: CityIntelligence) -> Self {
        let latest_reflection = city.latest_reflection().cloned();
        Self {
            city: city.city,
            nights: city.nights,
            status: city.status,
            quality: city.quality,
            iterations: city.iteration,
            outputs: city.outputs,
            latest_reflection,
            created_at: city.created_at,
            updated_at: city.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelAck {
    pub session_id: String,
    pub cancelled: bool,
    pub cancelled_at: DateTime<Utc>,
}

/// A started session and its event stream
pub struct StartedSession {
    pub session_id: String,
    pub events: EventStream,
}

struct SessionHandle {
    memory: Arc<SharedMemory>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
}

pub struct IntelligenceService {
    config: Config,
    registry: Arc<UnitRegistry>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl IntelligenceService {
    pub fn new(config: Config, registry: Arc<UnitRegistry>) -> Self {
        Self {
            config,
            registry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Service with the catalog units wired to the configured backend
    pub fn from_config(config: Config) -> Self {
        let registry = UnitRegistry::from_config(&config, create_backend(&config));
        Self::new(config, Arc::new(registry))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn handle<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&SessionHandle) -> R,
    ) -> Result<R, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| StoreError::Poisoned("sessions".to_string()))?;
        sessions
            .get(session_id)
            .map(f)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    /// Validate the request, create the session and spawn its run
    pub fn start(&self, request: TripRequest) -> Result<StartedSession, TripIntelError> {
        let route = request.route()?;
        let trip = request
            .trip_context
            .clone()
            .ok_or(RequestError::MissingTripContext)?;
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let orchestrator = Orchestrator::new(self.config.clone(), self.registry.clone())?;
        let memory = Arc::new(SharedMemory::new(Session::new(
            session_id.clone(),
            request.user_id.clone(),
            trip,
            request.preferences.clone(),
        )));
        let cancel = CancellationToken::new();

        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| StoreError::Poisoned("sessions".to_string()))?;
            if sessions.contains_key(&session_id) {
                return Err(RequestError::DuplicateSession(session_id).into());
            }
            sessions.insert(
                session_id.clone(),
                SessionHandle {
                    memory: memory.clone(),
                    cancel: cancel.clone(),
                    created_at: Utc::now(),
                },
            );
        }

        let (sink, rx) = EventSink::channel();
        let events = event_stream(rx, self.config.keep_alive(), self.config.event_buffer);
        sink.emit(EventKind::Connected {
            session_id: session_id.clone(),
        });

        info!(
            "Started session {} with {} cities",
            session_id,
            route.len()
        );

        let watcher = sink.clone();
        tokio::spawn(async move {
            let run = tokio::spawn(async move {
                orchestrator.drive(memory, route, sink, cancel).await;
            });
            if let Err(e) = run.await {
                error!("Orchestrator task failed: {}", e);
                watcher.emit(EventKind::Error {
                    message: format!("orchestrator task failed: {}", e),
                });
            }
        });

        Ok(StartedSession { session_id, events })
    }

    pub fn get_status(&self, session_id: &str) -> Result<SessionStatus, StoreError> {
        let memory = self.session_memory(session_id)?;
        let session = memory.session()?;

        let per_city = memory
            .cities()?
            .into_iter()
            .map(|city| CityStatusView {
                city_id: city.city.id,
                status: city.status,
                quality: city.quality,
                iterations: city.iteration,
                per_task: city
                    .tasks
                    .into_values()
                    .map(|task| TaskStatusView {
                        name: task.name,
                        status: task.status,
                        progress: task.progress,
                        error: task.error,
                    })
                    .collect(),
            })
            .collect();

        Ok(SessionStatus {
            session_id: session.id,
            phase: session.phase,
            current_city_id: session.current_city,
            per_city,
            overall_progress: memory.calculate_overall_progress()?,
        })
    }

    pub fn get_city_intelligence(
        &self,
        session_id: &str,
        city_id: &str,
    ) -> Result<CitySnapshot, StoreError> {
        let memory = self.session_memory(session_id)?;
        Ok(memory.city(city_id)?.into())
    }

    pub fn get_cross_city_insights(
        &self,
        session_id: &str,
    ) -> Result<Option<CrossCityInsights>, StoreError> {
        self.session_memory(session_id)?.insights()
    }

    /// Signal the run to stop at its next checkpoint and drop the session state
    pub fn cancel(&self, session_id: &str) -> Result<CancelAck, StoreError> {
        let handle = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| StoreError::Poisoned("sessions".to_string()))?;
            sessions
                .remove(session_id)
                .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?
        };
        handle.cancel.cancel();
        info!("Cancelled session {}", session_id);

        Ok(CancelAck {
            session_id: session_id.to_string(),
            cancelled: true,
            cancelled_at: Utc::now(),
        })
    }

    /// Remove sessions older than `session_ttl_sec`; returns how many went
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let ttl = Duration::from_secs(self.config.session_ttl_sec);
        let now = Utc::now();

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StoreError::Poisoned("sessions".to_string()))?;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| (now - handle.created_at).to_std().unwrap_or_default() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(handle) = sessions.remove(id) {
                handle.cancel.cancel();
            }
        }
        if !expired.is_empty() {
            info!("Purged {} expired sessions", expired.len());
        }
        Ok(expired.len())
    }

    pub fn session_memory(&self, session_id: &str) -> Result<Arc<SharedMemory>, StoreError> {
        self.handle(session_id, |handle| handle.memory.clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;
    use crate::orchestrator::{Event, Frame};
    use crate::unit::{
        catalog, slots, TaskUnit, UnitContext, UnitDescriptor, UnitInput, UnitResult,
    };
    use async_trait::async_trait;
    use futures::StreamExt;

    fn city(id: &str) -> City {
        City {
            id: id.to_string(),
            name: id.to_string(),
            country: None,
            description: None,
            latitude: None,
            longitude: None,
        }
    }

    fn request(ids: &[&str]) -> TripRequest {
        TripRequest {
            cities: Some(ids.iter().map(|id| city(id)).collect()),
            nights_per_city: Some(ids.iter().map(|id| (id.to_string(), 2)).collect()),
            trip_context: Some(TripContext {
                origin: "Lisbon".to_string(),
                destination: "Porto".to_string(),
                total_nights: 2 * ids.len() as u32,
            }),
            ..TripRequest::default()
        }
    }

    fn offline_service(max_iterations: u32) -> IntelligenceService {
        let config = Config {
            max_iterations,
            ..Config::default()
        };
        let registry = Arc::new(UnitRegistry::from_config(&config, None));
        IntelligenceService::new(config, registry)
    }

    async fn events(stream: EventStream) -> Vec<Event> {
        stream
            .filter_map(|frame| async move {
                match frame {
                    Frame::Event(event) => Some(event),
                    Frame::KeepAlive(_) => None,
                }
            })
            .collect()
            .await
    }

    struct SlowUnit(UnitDescriptor);

    #[async_trait]
    impl TaskUnit for SlowUnit {
        fn descriptor(&self) -> &UnitDescriptor {
            &self.0
        }

        async fn run(
            &self,
            _input: &UnitInput,
            _ctx: &UnitContext,
        ) -> Result<UnitResult, UnitError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(UnitResult::new(80.0).with_slot(slots::TIME_BLOCKS, serde_json::json!([])))
        }
    }

    #[test]
    fn test_request_validation() {
        assert_eq!(
            TripRequest::default().route().unwrap_err(),
            RequestError::MissingCities
        );

        let mut missing_nights = request(&["porto"]);
        missing_nights.nights_per_city = None;
        assert_eq!(missing_nights.route().unwrap_err(), RequestError::MissingNights);

        let mut missing_trip = request(&["porto"]);
        missing_trip.trip_context = None;
        assert_eq!(
            missing_trip.route().unwrap_err(),
            RequestError::MissingTripContext
        );

        let mut unassigned = request(&["porto", "braga"]);
        unassigned
            .nights_per_city
            .as_mut()
            .unwrap()
            .remove("braga");
        assert_eq!(
            unassigned.route().unwrap_err(),
            RequestError::NightsNotAssigned("braga".to_string())
        );

        assert_eq!(
            request(&["porto", "braga", "porto"]).route().unwrap_err(),
            RequestError::DuplicateCity("porto".to_string())
        );
    }

    #[test]
    fn test_request_accepts_camel_case_keys() {
        let yaml = r#"
cities:
  - id: porto
    name: Porto
nightsPerCity:
  porto: 3
tripContext:
  origin: Lisbon
  destination: Porto
"#;
        let request: TripRequest = serde_yaml::from_str(yaml).unwrap();
        let route = request.route().unwrap();
        assert_eq!(route[0].nights, 3);
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_state() {
        let service = offline_service(1);
        let mut bad = request(&["porto"]);
        bad.cities = None;

        assert!(matches!(
            service.start(bad),
            Err(TripIntelError::Request(RequestError::MissingCities))
        ));
        assert!(matches!(
            service.start(request(&["porto", "porto"])),
            Err(TripIntelError::Request(RequestError::DuplicateCity(id))) if id == "porto"
        ));
        assert_eq!(service.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_run_to_completion_and_query() {
        let service = offline_service(1);
        let started = service.start(request(&["porto", "braga"])).unwrap();
        let session_id = started.session_id.clone();

        let events = events(started.events).await;
        assert_eq!(events.first().map(Event::name), Some("connected"));
        assert_eq!(events.last().map(Event::name), Some("done"));

        let status = service.get_status(&session_id).unwrap();
        assert_eq!(status.phase, OrchestratorPhase::Complete);
        assert_eq!(status.per_city.len(), 2);
        assert_eq!(status.overall_progress, 100.0);
        assert!(status.per_city.iter().all(|c| c.status == CityStatus::Complete));

        let porto = service.get_city_intelligence(&session_id, "porto").unwrap();
        assert!(porto.outputs.contains_key(slots::NARRATIVE));
        assert_eq!(porto.iterations, 1);
        assert!(porto.latest_reflection.is_some());

        assert!(service
            .get_cross_city_insights(&session_id)
            .unwrap()
            .is_some());
        assert!(matches!(
            service.get_city_intelligence(&session_id, "faro"),
            Err(StoreError::CityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_session_is_rejected() {
        let service = offline_service(1);
        let mut first = request(&["porto"]);
        first.session_id = Some("fixed".to_string());
        let started = service.start(first.clone()).unwrap();

        assert!(matches!(
            service.start(first),
            Err(TripIntelError::Request(RequestError::DuplicateSession(id))) if id == "fixed"
        ));
        events(started.events).await;
    }

    #[tokio::test]
    async fn test_cancel_removes_session_and_ends_stream() {
        let config = Config {
            max_iterations: 1,
            ..Config::default()
        };
        let mut registry = UnitRegistry::from_config(&config, None);
        registry.register(Arc::new(SlowUnit(
            catalog::spec(catalog::TIME_ALLOCATOR).unwrap().descriptor(),
        )));
        let service = IntelligenceService::new(config, Arc::new(registry));

        let started = service.start(request(&["porto", "braga"])).unwrap();
        let ack = service.cancel(&started.session_id).unwrap();
        assert!(ack.cancelled);

        let events = events(started.events).await;
        let names: Vec<_> = events.iter().map(Event::name).collect();
        assert_eq!(names.last(), Some(&"cancelled"));
        assert!(!names.contains(&"city_complete"));

        assert!(matches!(
            service.get_status(&started.session_id),
            Err(StoreError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.cancel(&started.session_id),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let config = Config {
            max_iterations: 1,
            session_ttl_sec: 0,
            ..Config::default()
        };
        let registry = Arc::new(UnitRegistry::from_config(&config, None));
        let service = IntelligenceService::new(config, registry);

        let started = service.start(request(&["porto"])).unwrap();
        events(started.events).await;

        assert_eq!(service.purge_expired().unwrap(), 1);
        assert_eq!(service.active_sessions(), 0);
    }
}
