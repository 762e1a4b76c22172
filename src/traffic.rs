// Road traffic around the hippodrome.
// - Sytadin barometer: https://www.sytadin.fr/ (global Île-de-France state)
// - DATEX II situation publications: incidents matched by keyword or bounding box

use crate::error::{DashboardError, Result};
use crate::http_fetch::HttpFetcher;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Fluid,
    Dense,
    Saturated,
    Unknown,
}

impl TrafficLevel {
    pub fn color(&self) -> &'static str {
        match self {
            TrafficLevel::Fluid => "green",
            TrafficLevel::Dense => "orange",
            TrafficLevel::Saturated => "red",
            TrafficLevel::Unknown => "#888",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficState {
    pub message: String,
    pub level: TrafficLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficIncident {
    pub id: String,
    pub record_type: String,
    pub comment: Option<String>,
    pub road: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficReport {
    pub state: TrafficState,
    pub incidents: Vec<TrafficIncident>,
}

/// Area of interest for DATEX II records.
#[derive(Debug, Clone)]
pub struct IncidentFilter {
    pub keywords: Vec<String>,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl IncidentFilter {
    pub fn around(latitude: f64, longitude: f64, radius_deg: f64, keywords: &[String]) -> Self {
        IncidentFilter {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            min_lat: latitude - radius_deg,
            max_lat: latitude + radius_deg,
            min_lon: longitude - radius_deg,
            max_lon: longitude + radius_deg,
        }
    }

    fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude) && (self.min_lon..=self.max_lon).contains(&longitude)
    }

    fn matches(&self, incident: &TrafficIncident) -> bool {
        let text = format!(
            "{} {}",
            incident.comment.as_deref().unwrap_or_default(),
            incident.road.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        let by_keyword = self.keywords.iter().any(|k| text.contains(k.as_str()));
        let by_area = match (incident.latitude, incident.longitude) {
            (Some(lat), Some(lon)) => self.contains(lat, lon),
            _ => false,
        };
        by_keyword || by_area
    }
}

pub fn classify(message: &str) -> TrafficLevel {
    let lower = message.to_lowercase();
    if lower.contains("très dense") || lower.contains("tres dense") || lower.contains("saturé") {
        TrafficLevel::Saturated
    } else if lower.contains("dense") {
        TrafficLevel::Dense
    } else if lower.contains("fluide") {
        TrafficLevel::Fluid
    } else {
        TrafficLevel::Unknown
    }
}

static GLOBAL_STATE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"globalEtat"\s*:\s*"([^"]+)""#));

/// Extracts `globalEtat` from the Sytadin barometer body.
pub fn parse_sytadin(body: &str) -> Result<TrafficState> {
    let pattern = GLOBAL_STATE
        .as_ref()
        .map_err(|e| DashboardError::ParseError(format!("Invalid Sytadin pattern: {}", e)))?;

    let message = pattern
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "État inconnu".to_string());

    Ok(TrafficState {
        level: classify(&message),
        message,
    })
}

fn child_text<'a, 'input>(node: roxmltree::Node<'a, 'input>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Situation records of a DATEX II publication that fall inside `filter`.
pub fn parse_datex(xml: &str, filter: &IncidentFilter) -> Result<Vec<TrafficIncident>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| DashboardError::ParseError(format!("Invalid DATEX II document: {}", e)))?;

    let incidents = doc
        .descendants()
        .filter(|n| n.has_tag_name("situationRecord"))
        .map(|record| {
            let comment = record
                .descendants()
                .find(|n| n.has_tag_name("generalPublicComment"))
                .and_then(|c| child_text(c, "value"))
                .map(String::from);

            TrafficIncident {
                id: record.attribute("id").unwrap_or_default().to_string(),
                record_type: record
                    .attributes()
                    .find(|a| a.name() == "type")
                    .map(|a| a.value().to_string())
                    .unwrap_or_else(|| "SituationRecord".to_string()),
                comment,
                road: child_text(record, "roadNumber").map(String::from),
                latitude: child_text(record, "latitude").and_then(|v| v.parse().ok()),
                longitude: child_text(record, "longitude").and_then(|v| v.parse().ok()),
            }
        })
        .filter(|incident| filter.matches(incident))
        .collect();

    Ok(incidents)
}

pub fn fetch_traffic(
    fetcher: &HttpFetcher,
    sytadin_url: &str,
    datex_url: Option<&str>,
    filter: &IncidentFilter,
) -> Result<TrafficReport> {
    let state = parse_sytadin(&fetcher.get_text(sytadin_url)?)?;

    let incidents = match datex_url {
        Some(url) => match fetcher.get_text(url).and_then(|xml| parse_datex(&xml, filter)) {
            Ok(incidents) => incidents,
            Err(e) => {
                log::warn!("⚠️  DATEX II incidents unavailable: {}", e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    Ok(TrafficReport { state, incidents })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d2LogicalModel xmlns="http://datex2.eu/schema/2/2_0" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <payloadPublication xsi:type="SituationPublication">
    <situation id="S1">
      <situationRecord xsi:type="Accident" id="R1">
        <generalPublicComment><comment><values><value lang="fr">Accident sur l'A4 sortie Joinville</value></values></comment></generalPublicComment>
        <groupOfLocations xsi:type="Point"><pointByCoordinates><pointCoordinates>
          <latitude>48.90</latitude><longitude>2.60</longitude>
        </pointCoordinates></pointByCoordinates></groupOfLocations>
      </situationRecord>
    </situation>
    <situation id="S2">
      <situationRecord xsi:type="MaintenanceWorks" id="R2">
        <groupOfLocations xsi:type="Point"><pointByCoordinates><pointCoordinates>
          <latitude>48.8330</latitude><longitude>2.4390</longitude>
        </pointCoordinates></pointByCoordinates></groupOfLocations>
      </situationRecord>
    </situation>
    <situation id="S3">
      <situationRecord xsi:type="Accident" id="R3">
        <generalPublicComment><comment><values><value lang="fr">Bouchon porte d'Orléans</value></values></comment></generalPublicComment>
        <groupOfLocations xsi:type="Point"><pointByCoordinates><pointCoordinates>
          <latitude>48.82</latitude><longitude>2.32</longitude>
        </pointCoordinates></pointByCoordinates></groupOfLocations>
      </situationRecord>
    </situation>
  </payloadPublication>
</d2LogicalModel>"#;

    fn filter() -> IncidentFilter {
        IncidentFilter::around(48.8327, 2.4382, 0.03, &["Joinville".to_string(), " ".to_string()])
    }

    #[test]
    fn datex_records_match_by_keyword_or_area() {
        let incidents = parse_datex(DATEX, &filter()).unwrap();
        let ids: Vec<_> = incidents.iter().map(|i| i.id.as_str()).collect();

        assert_eq!(ids, vec!["R1", "R2"]);
        assert_eq!(incidents[0].record_type, "Accident");
        assert_eq!(incidents[0].comment.as_deref(), Some("Accident sur l'A4 sortie Joinville"));
        assert_eq!(incidents[1].latitude, Some(48.833));
    }

    #[test]
    fn malformed_datex_is_a_parse_error() {
        assert!(matches!(parse_datex("<d2LogicalModel>", &filter()), Err(DashboardError::ParseError(_))));
    }

    #[test]
    fn sytadin_state_is_extracted() {
        let state = parse_sytadin(r#"{"date":"15/10","globalEtat":"Très dense","km":312}"#).unwrap();
        assert_eq!(state.message, "Très dense");
        assert_eq!(state.level, TrafficLevel::Saturated);

        let unknown = parse_sytadin("<html>maintenance</html>").unwrap();
        assert_eq!(unknown.message, "État inconnu");
        assert_eq!(unknown.level.color(), "#888");
    }

    #[test]
    fn sytadin_pattern_compiles_once() {
        assert!(GLOBAL_STATE.is_ok());
        let first = parse_sytadin(r#"{"globalEtat":"Fluide"}"#).unwrap();
        let second = parse_sytadin(r#"{"globalEtat":"Dense"}"#).unwrap();
        assert_eq!((first.message.as_str(), second.message.as_str()), ("Fluide", "Dense"));
    }

    #[test]
    fn classification() {
        assert_eq!(classify("Fluide"), TrafficLevel::Fluid);
        assert_eq!(classify("Dense"), TrafficLevel::Dense);
        assert_eq!(classify("Saturé"), TrafficLevel::Saturated);
    }
}
