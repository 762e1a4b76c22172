// Vélib' Métropole station availability (GBFS feeds)

use crate::error::{DashboardError, Result};
use crate::http_fetch::HttpFetcher;
use serde::{Deserialize, Serialize};

const STATION_INFORMATION_URL: &str =
    "https://velib-metropole-opendata.smoove.pro/opendata/Velib_Metropole/station_information.json";
const STATION_STATUS_URL: &str =
    "https://velib-metropole-opendata.smoove.pro/opendata/Velib_Metropole/station_status.json";

#[derive(Debug, Clone, Deserialize)]
pub struct GbfsFeed<T> {
    pub data: GbfsStations<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GbfsStations<T> {
    pub stations: Vec<T>,
}

/// Vélib publishes `station_id` as a number; other GBFS feeds use strings.
fn station_id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected station_id: {}", other))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationInformation {
    #[serde(deserialize_with = "station_id_string")]
    pub station_id: String,
    pub name: String,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationStatus {
    #[serde(deserialize_with = "station_id_string")]
    pub station_id: String,
    #[serde(default)]
    pub num_bikes_available: u32,
    #[serde(default)]
    pub num_docks_available: u32,
    pub num_ebikes_available: Option<u32>,
    #[serde(default)]
    pub num_bikes_available_types: Vec<BikeTypeCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BikeTypeCount {
    pub mechanical: Option<u32>,
    pub ebike: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelibAvailability {
    pub station_id: String,
    pub name: String,
    pub mechanical: u32,
    pub ebikes: u32,
    pub free_docks: u32,
    pub capacity: Option<u32>,
}

impl StationStatus {
    fn ebikes(&self) -> u32 {
        let typed: Option<u32> = self
            .num_bikes_available_types
            .iter()
            .filter_map(|t| t.ebike)
            .reduce(|a, b| a + b);
        typed.or(self.num_ebikes_available).unwrap_or(0)
    }

    fn mechanical(&self) -> Option<u32> {
        self.num_bikes_available_types
            .iter()
            .filter_map(|t| t.mechanical)
            .reduce(|a, b| a + b)
    }
}

pub fn availability(
    station_id: &str,
    information: &[StationInformation],
    status: &[StationStatus],
) -> Result<VelibAvailability> {
    let info = information.iter().find(|s| s.station_id == station_id);
    let status = status.iter().find(|s| s.station_id == station_id);

    let (info, status) = match (info, status) {
        (Some(info), Some(status)) => (info, status),
        _ => {
            return Err(DashboardError::ParseError(format!(
                "Vélib station {} not found",
                station_id
            )))
        }
    };

    let ebikes = status.ebikes().min(status.num_bikes_available);
    Ok(VelibAvailability {
        station_id: station_id.to_string(),
        name: info.name.clone(),
        mechanical: status
            .mechanical()
            .unwrap_or(status.num_bikes_available - ebikes)
            .min(status.num_bikes_available - ebikes),
        ebikes,
        free_docks: status.num_docks_available,
        capacity: info.capacity,
    })
}

/// Both feeds are fetched together, then every requested station is looked up.
pub fn fetch_stations(
    fetcher: &HttpFetcher,
    station_ids: &[&str],
) -> Result<Vec<(String, Result<VelibAvailability>)>> {
    let (information, status) = std::thread::scope(|scope| {
        let info = scope.spawn(|| fetcher.get_json::<GbfsFeed<StationInformation>>(STATION_INFORMATION_URL));
        let status = fetcher.get_json::<GbfsFeed<StationStatus>>(STATION_STATUS_URL);
        let info = info
            .join()
            .unwrap_or_else(|_| Err(DashboardError::NetworkError("station_information fetch panicked".into())));
        (info, status)
    });
    let information = information?.data.stations;
    let status = status?.data.stations;

    Ok(station_ids
        .iter()
        .map(|id| (id.to_string(), availability(id, &information, &status)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feeds() -> (Vec<StationInformation>, Vec<StationStatus>) {
        let info: GbfsFeed<StationInformation> = serde_json::from_str(
            r#"{"data":{"stations":[
                {"station_id":1074333296,"name":"Hippodrome de Vincennes","capacity":30},
                {"station_id":"508042092","name":"École du Breuil"}
            ]}}"#,
        )
        .unwrap();
        let status: GbfsFeed<StationStatus> = serde_json::from_str(
            r#"{"data":{"stations":[
                {"station_id":1074333296,"num_bikes_available":10,"num_docks_available":20,
                 "num_bikes_available_types":[{"mechanical":7},{"ebike":3}]},
                {"station_id":508042092,"num_bikes_available":5,"num_ebikes_available":2,"num_docks_available":9}
            ]}}"#,
        )
        .unwrap();
        (info.data.stations, status.data.stations)
    }

    #[test]
    fn typed_counts_take_precedence() {
        let (info, status) = feeds();
        let a = availability("1074333296", &info, &status).unwrap();
        assert_eq!((a.mechanical, a.ebikes, a.free_docks), (7, 3, 20));
        assert_eq!(a.name, "Hippodrome de Vincennes");
        assert_eq!(a.capacity, Some(30));
    }

    #[test]
    fn typed_mechanical_count_excludes_unclassified_bikes() {
        let (info, _) = feeds();
        let status: GbfsFeed<StationStatus> = serde_json::from_str(
            r#"{"data":{"stations":[
                {"station_id":1074333296,"num_bikes_available":10,"num_docks_available":20,
                 "num_bikes_available_types":[{"mechanical":5},{"ebike":3}]}
            ]}}"#,
        )
        .unwrap();
        let a = availability("1074333296", &info, &status.data.stations).unwrap();
        assert_eq!((a.mechanical, a.ebikes), (5, 3));
    }

    #[test]
    fn flat_ebike_count_is_used_otherwise() {
        let (info, status) = feeds();
        let a = availability("508042092", &info, &status).unwrap();
        assert_eq!((a.mechanical, a.ebikes, a.free_docks), (3, 2, 9));
    }

    #[test]
    fn unknown_station_is_an_error() {
        let (info, status) = feeds();
        let err = availability("42", &info, &status).unwrap_err();
        assert!(matches!(err, DashboardError::ParseError(_)));
    }
}
