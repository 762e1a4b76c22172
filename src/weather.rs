// Current conditions from Open-Meteo (https://open-meteo.com/)

use crate::error::Result;
use crate::http_fetch::HttpFetcher;
use serde::{Deserialize, Serialize};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub windspeed: f64,
    pub weathercode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub temperature_c: i64,
    pub wind_kmh: i64,
    pub code: u32,
    pub label: &'static str,
    pub icon: String,
}

pub fn forecast_url(latitude: f64, longitude: f64) -> String {
    format!(
        "{}?latitude={}&longitude={}&current_weather=true&timezone=Europe%2FParis",
        OPEN_METEO_URL, latitude, longitude
    )
}

/// WMO weather interpretation code, in French.
pub fn weather_code_label(code: u32) -> &'static str {
    match code {
        0 => "Ciel dégagé",
        1 => "Principalement dégagé",
        2 => "Partiellement nuageux",
        3 => "Couvert",
        45 => "Brouillard",
        48 => "Brouillard givrant",
        51 => "Bruine légère",
        53 => "Bruine modérée",
        55 => "Bruine dense",
        56 => "Bruine verglaçante légère",
        57 => "Bruine verglaçante dense",
        61 => "Pluie faible",
        63 => "Pluie modérée",
        65 => "Pluie forte",
        66 => "Pluie verglaçante légère",
        67 => "Pluie verglaçante forte",
        71 => "Neige faible",
        73 => "Neige modérée",
        75 => "Neige forte",
        77 => "Grains de neige",
        80 => "Averses faibles",
        81 => "Averses modérées",
        82 => "Averses violentes",
        85 => "Averses de neige faibles",
        86 => "Averses de neige fortes",
        95 => "Orage",
        96 => "Orage avec grêle légère",
        99 => "Orage avec grêle forte",
        _ => "Inconnu",
    }
}

impl ForecastResponse {
    /// `None` when Open-Meteo answered without a `current_weather` block.
    pub fn report(&self) -> Option<WeatherReport> {
        self.current_weather.as_ref().map(|current| WeatherReport {
            temperature_c: current.temperature.round() as i64,
            wind_kmh: current.windspeed.round() as i64,
            code: current.weathercode,
            label: weather_code_label(current.weathercode),
            icon: format!("img/{}.png", current.weathercode),
        })
    }
}

pub fn fetch_weather(fetcher: &HttpFetcher, latitude: f64, longitude: f64) -> Result<Option<WeatherReport>> {
    let response: ForecastResponse = fetcher.get_json(&forecast_url(latitude, longitude))?;
    Ok(response.report())
}
