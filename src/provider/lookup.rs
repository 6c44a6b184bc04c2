//! Places and weather lookups consumed by the clustering and weather units

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{complete_json, Backend};
use crate::config::RetryConfig;
use crate::error::BackendError;
use crate::store::City;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Place {
    pub name: String,

    #[serde(default)]
    pub category: String,

    /// Neighbourhood or district the place belongs to
    #[serde(default)]
    pub area: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherOutlook {
    pub summary: String,

    #[serde(default)]
    pub low_c: Option<f64>,

    #[serde(default)]
    pub high_c: Option<f64>,

    #[serde(default)]
    pub conditions: Vec<String>,
}

#[async_trait]
pub trait PlacesLookup: Send + Sync {
    async fn search(
        &self,
        city: &City,
        interests: &[String],
        timeout: Duration,
    ) -> Result<Vec<Place>, BackendError>;
}

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    async fn outlook(
        &self,
        city: &City,
        nights: u32,
        timeout: Duration,
    ) -> Result<WeatherOutlook, BackendError>;
}

/// Lookups answered by the text-generation backend
pub struct BackendLookup {
    backend: Arc<dyn Backend>,
    retry: RetryConfig,
}

impl BackendLookup {
    pub fn new(backend: Arc<dyn Backend>, retry: RetryConfig) -> Self {
        Self { backend, retry }
    }
}

const PLACES_PROMPT: &str = "You are a places directory. Reply with JSON only: \
{\"places\": [{\"name\": text, \"category\": text, \"area\": neighbourhood}]}.";

const WEATHER_PROMPT: &str = "You are a climate reference. Reply with JSON only: \
{\"summary\": text, \"lowC\": number, \"highC\": number, \"conditions\": [text]}.";

#[async_trait]
impl PlacesLookup for BackendLookup {
    async fn search(
        &self,
        city: &City,
        interests: &[String],
        timeout: Duration,
    ) -> Result<Vec<Place>, BackendError> {
        let user_prompt = format!(
            "List up to 15 places worth visiting in {}{} for someone interested in: {}.",
            city.name,
            city.country
                .as_deref()
                .map(|c| format!(", {}", c))
                .unwrap_or_default(),
            if interests.is_empty() {
                "general sightseeing".to_string()
            } else {
                interests.join(", ")
            }
        );

        let value = complete_json(
            self.backend.as_ref(),
            &self.retry,
            PLACES_PROMPT,
            &user_prompt,
            timeout,
        )
        .await?;

        let places = value.get("places").cloned().unwrap_or(value);
        Ok(serde_json::from_value(places)?)
    }
}

#[async_trait]
impl WeatherLookup for BackendLookup {
    async fn outlook(
        &self,
        city: &City,
        nights: u32,
        timeout: Duration,
    ) -> Result<WeatherOutlook, BackendError> {
        let user_prompt = format!(
            "Typical weather in {} over a {}-night stay in the coming weeks.",
            city.name, nights
        );

        let value = complete_json(
            self.backend.as_ref(),
            &self.retry,
            WEATHER_PROMPT,
            &user_prompt,
            timeout,
        )
        .await?;

        Ok(serde_json::from_value(value)?)
    }
}
