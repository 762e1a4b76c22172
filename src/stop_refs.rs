// Daily sanity check: are the monitoring refs we poll still known to PRIM?

use crate::config::StopDefinition;
use crate::error::Result;
use crate::http_fetch::HttpFetcher;
use crate::siri_api_models::PRIM_BASE_URL;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
pub struct StopAreaReferential {
    pub stop_areas: Vec<StopAreaEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopAreaEntry {
    #[serde(rename = "StopAreaId")]
    pub stop_area_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefCheck {
    pub key: String,
    pub monitoring_ref: String,
    pub valid: bool,
}

pub fn check_refs(stops: &[StopDefinition], referential: &StopAreaReferential) -> Vec<RefCheck> {
    let known: HashSet<&str> = referential
        .stop_areas
        .iter()
        .map(|sa| sa.stop_area_id.as_str())
        .collect();

    stops
        .iter()
        .map(|stop| RefCheck {
            key: stop.key.to_string(),
            monitoring_ref: stop.monitoring_ref.to_string(),
            valid: known.contains(stop.monitoring_ref),
        })
        .collect()
}

pub fn fetch_and_check(fetcher: &HttpFetcher, stops: &[StopDefinition]) -> Result<Vec<RefCheck>> {
    log::info!("⏰ Checking monitoring refs against the PRIM referential...");
    let url = format!("{}/referentiel/stop-areas", PRIM_BASE_URL);
    let referential: StopAreaReferential = fetcher.get_json(&url)?;

    let report = check_refs(stops, &referential);
    for check in &report {
        if check.valid {
            log::info!("✅ Valid ref: {} ({})", check.monitoring_ref, check.key);
        } else {
            log::warn!("❗ Invalid ref: {} ({})", check.monitoring_ref, check.key);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STOPS;

    #[test]
    fn unknown_refs_are_flagged() {
        let referential: StopAreaReferential = serde_json::from_str(
            r#"{"stop_areas":[{"StopAreaId":"STIF:StopArea:SP:43135:"},{"StopAreaId":"STIF:StopArea:SP:463644:"}]}"#,
        )
        .unwrap();
        let report = check_refs(STOPS, &referential);

        assert_eq!(report.len(), 3);
        assert!(report[0].valid);
        assert!(!report[1].valid);
        assert_eq!(report[1].key, "bus77");
        assert!(report[2].valid);
    }

    #[test]
    fn empty_referential_invalidates_everything() {
        let referential: StopAreaReferential = serde_json::from_str(r#"{"stop_areas":[]}"#).unwrap();
        assert!(check_refs(STOPS, &referential).iter().all(|c| !c.valid));
    }

    #[test]
    fn error_body_is_not_a_referential() {
        let parsed = serde_json::from_str::<StopAreaReferential>(r#"{"message":"Invalid authentication credentials"}"#);
        assert!(parsed.is_err());
    }
}
