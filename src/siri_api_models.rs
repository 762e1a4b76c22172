// SIRI models and fetching for the PRIM marketplace (Île-de-France Mobilités)
// PRIM website: https://prim.iledefrance-mobilites.fr/
//
// PRIM API Endpoints:
// - Stop Monitoring: https://prim.iledefrance-mobilites.fr/marketplace/stop-monitoring?MonitoringRef=...
// - General Message: https://prim.iledefrance-mobilites.fr/marketplace/general-message?LineRef=...
// - Stop areas referential: https://prim.iledefrance-mobilites.fr/marketplace/referentiel/stop-areas

use crate::departures::TransitVisit;
use crate::error::{DashboardError, Result};
use crate::http_fetch::HttpFetcher;
use crate::stop_cache::StopCache;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

pub const PRIM_BASE_URL: &str = "https://prim.iledefrance-mobilites.fr/marketplace";

// ============================================================================
// Data Structures
// ============================================================================

/// SIRI text field. PRIM emits a bare string, `{"value": ..}` or
/// `[{"value": ..}]` depending on the field and the feed version.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SiriText {
    Plain(String),
    Value { value: String },
    List(Vec<SiriTextValue>),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SiriTextValue {
    pub value: String,
}

impl SiriText {
    pub fn text(&self) -> Option<&str> {
        let raw = match self {
            SiriText::Plain(s) => s.as_str(),
            SiriText::Value { value } => value.as_str(),
            SiriText::List(items) => items.first()?.value.as_str(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }
}

fn text_of(field: &Option<SiriText>) -> Option<String> {
    field.as_ref().and_then(|t| t.text()).map(String::from)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiriEnvelope {
    #[serde(rename = "Siri")]
    pub siri: Siri,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Siri {
    #[serde(rename = "ServiceDelivery")]
    pub service_delivery: ServiceDelivery,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceDelivery {
    pub stop_monitoring_delivery: Vec<StopMonitoringDelivery>,
    pub general_message_delivery: Vec<GeneralMessageDelivery>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StopMonitoringDelivery {
    pub monitored_stop_visit: Vec<MonitoredStopVisit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitoredStopVisit {
    pub monitored_vehicle_journey: MonitoredVehicleJourney,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MonitoredVehicleJourney {
    pub line_ref: Option<SiriText>,
    pub direction_ref: Option<SiriText>,
    pub direction_name: Option<SiriText>,
    pub destination_name: Option<SiriText>,
    pub monitored_call: MonitoredCall,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MonitoredCall {
    pub destination_display: Option<SiriText>,
    pub vehicle_at_stop: Option<bool>,
    pub aimed_arrival_time: Option<DateTime<Utc>>,
    pub expected_arrival_time: Option<DateTime<Utc>>,
    pub aimed_departure_time: Option<DateTime<Utc>>,
    pub expected_departure_time: Option<DateTime<Utc>>,
    pub departure_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GeneralMessageDelivery {
    pub info_message: Vec<InfoMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InfoMessage {
    pub info_message_identifier: Option<SiriText>,
    pub info_channel_ref: Option<SiriText>,
    pub valid_until_time: Option<DateTime<Utc>>,
    pub content: InfoMessageContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InfoMessageContent {
    pub message: Vec<ContentMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContentMessage {
    pub message_text: Option<SiriText>,
}

/// Disruption message shown under a stop board.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeneralMessage {
    pub id: String,
    pub channel: Option<String>,
    pub text: String,
    pub valid_until: Option<DateTime<Utc>>,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&MonitoredStopVisit> for TransitVisit {
    fn from(visit: &MonitoredStopVisit) -> Self {
        let journey = &visit.monitored_vehicle_journey;
        let call = &journey.monitored_call;

        TransitVisit {
            line_ref: text_of(&journey.line_ref),
            direction_ref: text_of(&journey.direction_ref),
            direction_name: text_of(&journey.direction_name),
            destination: text_of(&journey.destination_name)
                .or_else(|| text_of(&call.destination_display)),
            aimed_departure: call.aimed_departure_time,
            expected_departure: call.expected_departure_time,
            aimed_arrival: call.aimed_arrival_time,
            expected_arrival: call.expected_arrival_time,
            departure_status: call.departure_status.clone(),
            vehicle_at_stop: call.vehicle_at_stop.unwrap_or(false),
        }
    }
}

impl ServiceDelivery {
    pub fn visits(&self) -> Vec<TransitVisit> {
        self.stop_monitoring_delivery
            .iter()
            .flat_map(|d| d.monitored_stop_visit.iter())
            .map(TransitVisit::from)
            .collect()
    }

    /// Messages still valid at `now`, deduplicated by text.
    pub fn messages(&self, now: DateTime<Utc>) -> Vec<GeneralMessage> {
        let mut seen = std::collections::HashSet::new();
        self.general_message_delivery
            .iter()
            .flat_map(|d| d.info_message.iter())
            .filter(|m| m.valid_until_time.is_none_or(|until| until > now))
            .filter_map(|m| {
                let text = m.content.message.iter().find_map(|c| text_of(&c.message_text))?;
                if !seen.insert(text.clone()) {
                    return None;
                }
                Some(GeneralMessage {
                    id: text_of(&m.info_message_identifier).unwrap_or_default(),
                    channel: text_of(&m.info_channel_ref),
                    text,
                    valid_until: m.valid_until_time,
                })
            })
            .collect()
    }
}

pub fn parse_service_delivery(value: serde_json::Value) -> Result<ServiceDelivery> {
    serde_json::from_value::<SiriEnvelope>(value)
        .map(|envelope| envelope.siri.service_delivery)
        .map_err(|e| DashboardError::ParseError(format!("Unexpected SIRI shape: {}", e)))
}

// ============================================================================
// Fetching
// ============================================================================

fn lock_cache(cache: &Mutex<StopCache>) -> Result<std::sync::MutexGuard<'_, StopCache>> {
    cache
        .lock()
        .map_err(|e| DashboardError::NetworkError(format!("Failed to lock stop cache: {}", e)))
}

/// Cached blob for `key` when fresh at `requested_at`, else `fetch` stored under that same instant.
fn cached_or_fetch<F>(cache: &Mutex<StopCache>, key: &str, requested_at: Instant, fetch: F) -> Result<serde_json::Value>
where
    F: FnOnce() -> Result<serde_json::Value>,
{
    if let Some(blob) = lock_cache(cache)?.get(key, requested_at) {
        log::debug!("💾 Stop cache hit for {}", key);
        return Ok(blob);
    }

    let blob = fetch()?;
    lock_cache(cache)?.put(key, blob.clone(), requested_at);
    Ok(blob)
}

pub struct PrimClient<'a> {
    fetcher: &'a HttpFetcher,
}

impl<'a> PrimClient<'a> {
    pub fn new(fetcher: &'a HttpFetcher) -> Self {
        PrimClient { fetcher }
    }

    pub fn stop_monitoring_url(monitoring_ref: &str, preview: Option<&str>) -> String {
        match preview {
            Some(interval) => format!(
                "{}/stop-monitoring?MonitoringRef={}&PreviewInterval={}",
                PRIM_BASE_URL, monitoring_ref, interval
            ),
            None => format!("{}/stop-monitoring?MonitoringRef={}", PRIM_BASE_URL, monitoring_ref),
        }
    }

    /// Live visits for a stop, served from `cache` while the entry is fresh.
    /// `requested_at` stamps the entry, so refreshes one TTL apart always refetch.
    pub fn fetch_stop_visits(
        &self,
        monitoring_ref: &str,
        cache: &Mutex<StopCache>,
        requested_at: Instant,
    ) -> Result<Vec<TransitVisit>> {
        let raw = cached_or_fetch(cache, monitoring_ref, requested_at, || {
            let url = Self::stop_monitoring_url(monitoring_ref, None);
            self.fetcher.get_json(&url)
        })?;
        Ok(parse_service_delivery(raw)?.visits())
    }

    /// Aimed departure of the first visit over the next 12 hours.
    pub fn fetch_next_scheduled_departure(&self, monitoring_ref: &str) -> Result<Option<DateTime<Utc>>> {
        let url = Self::stop_monitoring_url(monitoring_ref, Some("PT12H"));
        let blob: serde_json::Value = self.fetcher.get_json(&url)?;
        let visits = parse_service_delivery(blob)?.visits();

        Ok(visits
            .first()
            .and_then(|v| v.aimed_departure.or(v.expected_departure)))
    }

    pub fn fetch_general_messages(&self, line_ref: &str, now: DateTime<Utc>) -> Result<Vec<GeneralMessage>> {
        let url = format!("{}/general-message?LineRef={}", PRIM_BASE_URL, line_ref);
        let blob: serde_json::Value = self.fetcher.get_json(&url)?;
        Ok(parse_service_delivery(blob)?.messages(now))
    }
}
