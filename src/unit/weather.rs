use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::catalog::UnitSpec;
use super::{slots, TaskUnit, UnitContext, UnitDescriptor, UnitInput, UnitResult};
use crate::error::UnitError;
use crate::provider::WeatherLookup;

pub struct WeatherUnit {
    descriptor: UnitDescriptor,
    weather: Arc<dyn WeatherLookup>,
}

impl WeatherUnit {
    pub fn from_spec(spec: &UnitSpec, weather: Arc<dyn WeatherLookup>) -> Self {
        Self {
            descriptor: spec.descriptor(),
            weather,
        }
    }
}

#[async_trait]
impl TaskUnit for WeatherUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &UnitInput, ctx: &UnitContext) -> Result<UnitResult, UnitError> {
        let outlook = self
            .weather
            .outlook(&input.city, input.nights, ctx.timeout)
            .await?;

        let confidence = if outlook.low_c.is_some() && outlook.high_c.is_some() {
            85.0
        } else {
            60.0
        };
        let mut result =
            UnitResult::new(confidence).with_slot(slots::WEATHER, json!(outlook));
        if outlook.conditions.is_empty() {
            result = result.with_gap("weather conditions not itemised");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::provider::WeatherOutlook;
    use crate::store::{City, Preferences};
    use crate::unit::catalog;
    use std::time::Duration;

    struct Sunny;

    #[async_trait]
    impl WeatherLookup for Sunny {
        async fn outlook(
            &self,
            _city: &City,
            _nights: u32,
            _timeout: Duration,
        ) -> Result<WeatherOutlook, BackendError> {
            Ok(WeatherOutlook {
                summary: "Dry and warm".to_string(),
                low_c: Some(17.0),
                high_c: Some(29.0),
                conditions: vec!["sunny".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn test_weather_slot_is_camel_case() {
        let unit = WeatherUnit::from_spec(
            catalog::spec(catalog::WEATHER_SCOUT).unwrap(),
            Arc::new(Sunny),
        );
        let input = UnitInput::new(
            City {
                id: "seville".to_string(),
                name: "Seville".to_string(),
                country: None,
                description: None,
                latitude: None,
                longitude: None,
            },
            2,
            Preferences::default(),
        );
        let ctx = UnitContext::new("s1", 1, Duration::from_secs(1));

        let out = unit.execute(&input, &ctx).await;

        assert!(out.success);
        assert_eq!(out.confidence, 85.0);
        assert_eq!(out.data[slots::WEATHER]["highC"], 29.0);
    }
}
