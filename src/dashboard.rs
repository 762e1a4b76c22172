// Refresh orchestration: every widget is fetched on its own blocking task,
// then turned into an HTML fragment keyed by the page element it fills.

use crate::config::{DashboardConfig, StopDefinition, STOPS, VELIB_STATIONS};
use crate::departures::{build_stop_board, has_no_upcoming, StopBoard, TransitVisit};
use crate::error::{DashboardError, ErrorKind, Result};
use crate::gtfs_schedule::{LineSchedule, ScheduleSummary};
use crate::http_fetch::HttpFetcher;
use crate::news::{fetch_headlines, Headline, NewsTicker};
use crate::render;
use crate::siri_api_models::{GeneralMessage, PrimClient};
use crate::stop_cache::{StopCache, StopCacheStats};
use crate::traffic::{fetch_traffic, IncidentFilter, TrafficReport};
use crate::velib::{fetch_stations, VelibAvailability};
use crate::weather::{fetch_weather, WeatherReport};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const DATE_ELEMENT: &str = "current-date";
pub const TIME_ELEMENT: &str = "current-time";
pub const WEATHER_ELEMENT: &str = "weather-bloc";
pub const TRAFFIC_ELEMENT: &str = "info-trafic-bloc";
pub const NEWS_ELEMENT: &str = "news-ticker";

// ============================================================================
// Shared context and state
// ============================================================================

/// Everything a fetch needs; built once at startup and shared read-only.
pub struct DashboardContext {
    pub config: DashboardConfig,
    pub fetcher: HttpFetcher,
    pub stop_cache: Mutex<StopCache>,
    pub schedule: Option<ScheduleSummary>,
}

impl DashboardContext {
    pub fn new(config: DashboardConfig, fetcher: HttpFetcher, schedule: Option<ScheduleSummary>) -> Self {
        let stop_cache = Mutex::new(StopCache::new(config.stop_cache_ttl()));
        DashboardContext {
            config,
            fetcher,
            stop_cache,
            schedule,
        }
    }

    pub fn line_schedule(&self, stop: &StopDefinition) -> Option<&LineSchedule> {
        self.schedule.as_ref().and_then(|s| s.line(stop.gtfs_line))
    }

    pub fn stop_cache_stats(&self) -> Result<StopCacheStats> {
        self.stop_cache
            .lock()
            .map(|cache| cache.stats(Instant::now()))
            .map_err(|e| DashboardError::NetworkError(format!("Failed to lock stop cache: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    pub element_id: String,
    pub ok: bool,
    pub html: String,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Widget {
    fn rendered(element_id: &str, html: String, now: DateTime<Utc>) -> Self {
        Widget {
            element_id: element_id.to_string(),
            ok: true,
            html,
            error_kind: None,
            error: None,
            updated_at: now,
        }
    }

    fn failed(element_id: &str, title: &str, icon: &str, message: &str, error: &DashboardError, now: DateTime<Utc>) -> Self {
        log::warn!("⚠️  {} failed: {}", element_id, error);
        Widget {
            element_id: element_id.to_string(),
            ok: false,
            html: render::render_error(title, icon, message),
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            updated_at: now,
        }
    }
}

/// A stop board together with what is rendered around it.
#[derive(Debug, Clone)]
pub struct StopLoad {
    pub board: StopBoard,
    pub messages: Vec<GeneralMessage>,
    pub schedule: Option<LineSchedule>,
}

/// Outcome of one widget fetch, before rendering.
#[derive(Debug)]
pub enum Fetched {
    Stop(&'static StopDefinition, Result<StopLoad>),
    Weather(Result<Option<WeatherReport>>),
    Velib(Result<Vec<(String, Result<VelibAvailability>)>>),
    Traffic(Result<TrafficReport>),
    News(Result<Vec<Headline>>),
}

#[derive(Debug, Default)]
pub struct DashboardState {
    widgets: BTreeMap<String, Widget>,
    boards: HashMap<String, StopBoard>,
    messages: HashMap<String, Vec<GeneralMessage>>,
    ticker: NewsTicker,
    last_refresh: Option<DateTime<Utc>>,
    refresh_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub refreshed_at: DateTime<Utc>,
    pub ok: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub refresh_count: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub widgets: usize,
    pub failed_widgets: Vec<String>,
    pub headlines: usize,
    pub schedule_loaded: bool,
    pub stop_cache: StopCacheStats,
}

impl DashboardState {
    pub fn widgets(&self) -> Vec<&Widget> {
        self.widgets.values().collect()
    }

    pub fn widget(&self, element_id: &str) -> Option<&Widget> {
        self.widgets.get(element_id)
    }

    pub fn board(&self, stop_key: &str) -> Option<&StopBoard> {
        self.boards.get(stop_key)
    }

    pub fn messages(&self, stop_key: &str) -> Option<&Vec<GeneralMessage>> {
        self.messages.get(stop_key)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn refresh_count(&self) -> u64 {
        self.refresh_count
    }

    fn put(&mut self, widget: Widget) {
        self.widgets.insert(widget.element_id.clone(), widget);
    }

    /// Turns one fetch outcome into widgets. Failures become error fragments.
    pub fn apply(&mut self, fetched: Fetched, now: DateTime<Utc>) {
        match fetched {
            Fetched::Stop(stop, Ok(load)) => {
                let html = render::render_stop_board(&load.board, &load.messages, load.schedule.as_ref());
                self.put(Widget::rendered(stop.element_id, html, now));
                self.boards.insert(stop.key.to_string(), load.board);
                self.messages.insert(stop.key.to_string(), load.messages);
            }
            Fetched::Stop(stop, Err(e)) => {
                self.put(Widget::failed(stop.element_id, stop.name, stop.icon, "Horaires indisponibles", &e, now));
            }
            Fetched::Weather(Ok(report)) => {
                self.put(Widget::rendered(WEATHER_ELEMENT, render::render_weather(report.as_ref()), now));
            }
            Fetched::Weather(Err(e)) => {
                self.put(Widget::failed(WEATHER_ELEMENT, "Météo", "img/picto-meteo.svg", "Météo indisponible", &e, now));
            }
            Fetched::Velib(Ok(stations)) => {
                for (station_id, result) in stations {
                    let Some(station) = VELIB_STATIONS.iter().find(|s| s.station_id == station_id) else {
                        continue;
                    };
                    let widget = match result {
                        Ok(availability) => {
                            Widget::rendered(station.element_id, render::render_velib(&availability), now)
                        }
                        Err(e) => Widget::failed(station.element_id, "Vélib", "img/picto-velib.svg", "Station indisponible", &e, now),
                    };
                    self.put(widget);
                }
            }
            Fetched::Velib(Err(e)) => {
                for station in VELIB_STATIONS {
                    self.put(Widget::failed(station.element_id, "Vélib", "img/picto-velib.svg", "Station indisponible", &e, now));
                }
            }
            Fetched::Traffic(Ok(report)) => {
                self.put(Widget::rendered(TRAFFIC_ELEMENT, render::render_traffic(&report), now));
            }
            Fetched::Traffic(Err(e)) => {
                self.put(Widget::failed(TRAFFIC_ELEMENT, "Info trafic", "img/picto-info.svg", "Info trafic indisponible", &e, now));
            }
            Fetched::News(Ok(headlines)) => {
                self.ticker.replace(headlines);
                let html = render::render_news(self.ticker.current(), self.ticker.position(), self.ticker.len());
                self.put(Widget::rendered(NEWS_ELEMENT, html, now));
                self.ticker.advance();
            }
            Fetched::News(Err(e)) => {
                self.put(Widget::failed(NEWS_ELEMENT, "Actualités", "img/picto-info.svg", "Actualités indisponibles", &e, now));
            }
        }
    }

    pub fn update_clock(&mut self, now: DateTime<Utc>) {
        self.put(Widget::rendered(DATE_ELEMENT, render::format_date_fr(now), now));
        self.put(Widget::rendered(TIME_ELEMENT, render::format_time_with_seconds(now), now));
    }

    pub fn finish_refresh(&mut self, now: DateTime<Utc>) -> RefreshSummary {
        self.last_refresh = Some(now);
        self.refresh_count += 1;
        let failed = self.widgets.values().filter(|w| !w.ok).count();
        RefreshSummary {
            refreshed_at: now,
            ok: self.widgets.len() - failed,
            failed,
        }
    }

    pub fn stats(&self, stop_cache: StopCacheStats, schedule_loaded: bool) -> DashboardStats {
        DashboardStats {
            refresh_count: self.refresh_count,
            last_refresh: self.last_refresh,
            widgets: self.widgets.len(),
            failed_widgets: self
                .widgets
                .values()
                .filter(|w| !w.ok)
                .map(|w| w.element_id.clone())
                .collect(),
            headlines: self.ticker.len(),
            schedule_loaded,
            stop_cache,
        }
    }
}

// ============================================================================
// Blocking fetches
// ============================================================================

/// Line refs worth asking general messages for: the known one, else whatever
/// lines currently call at the stop.
fn message_line_refs(stop: &StopDefinition, visits: &[TransitVisit]) -> Vec<String> {
    match stop.line_ref {
        Some(line_ref) => vec![line_ref.to_string()],
        None => visits
            .iter()
            .filter_map(|v| v.line_ref.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

fn load_messages(ctx: &DashboardContext, stop: &StopDefinition, visits: &[TransitVisit], now: DateTime<Utc>) -> Vec<GeneralMessage> {
    let client = PrimClient::new(&ctx.fetcher);
    let mut messages: Vec<GeneralMessage> = Vec::new();

    for line_ref in message_line_refs(stop, visits) {
        match client.fetch_general_messages(&line_ref, now) {
            Ok(found) => {
                for message in found {
                    if !messages.iter().any(|m| m.text == message.text) {
                        messages.push(message);
                    }
                }
            }
            Err(e) => log::warn!("⚠️  General messages unavailable for {}: {}", line_ref, e),
        }
    }
    messages
}

/// `requested_at` is when the refresh was scheduled; the stop cache is stamped with it.
pub fn load_stop_board(
    ctx: &DashboardContext,
    stop: &'static StopDefinition,
    now: DateTime<Utc>,
    requested_at: Instant,
) -> Result<StopLoad> {
    let client = PrimClient::new(&ctx.fetcher);
    let visits = client.fetch_stop_visits(stop.monitoring_ref, &ctx.stop_cache, requested_at)?;

    let next_scheduled = if has_no_upcoming(&visits, now) {
        match client.fetch_next_scheduled_departure(stop.monitoring_ref) {
            Ok(next) => next,
            Err(e) => {
                log::warn!("⚠️  Next scheduled departure unavailable for {}: {}", stop.key, e);
                None
            }
        }
    } else {
        None
    };

    let board = build_stop_board(stop, &visits, next_scheduled, now, ctx.config.departures_per_group);
    let messages = load_messages(ctx, stop, &visits, now);
    log::debug!("🚉 {}: {} visits, {} messages", stop.key, visits.len(), messages.len());

    Ok(StopLoad {
        board,
        messages,
        schedule: ctx.line_schedule(stop).cloned(),
    })
}

/// General messages for the lines calling at `stop`.
pub fn load_stop_messages(ctx: &DashboardContext, stop: &'static StopDefinition, now: DateTime<Utc>) -> Result<Vec<GeneralMessage>> {
    let visits = match stop.line_ref {
        Some(_) => Vec::new(),
        None => PrimClient::new(&ctx.fetcher).fetch_stop_visits(stop.monitoring_ref, &ctx.stop_cache, Instant::now())?,
    };
    Ok(load_messages(ctx, stop, &visits, now))
}

fn fetch_velib(ctx: &DashboardContext) -> Result<Vec<(String, Result<VelibAvailability>)>> {
    let ids: Vec<&str> = VELIB_STATIONS.iter().map(|s| s.station_id).collect();
    fetch_stations(&ctx.fetcher, &ids)
}

fn fetch_traffic_report(ctx: &DashboardContext) -> Result<TrafficReport> {
    let config = &ctx.config;
    let filter = IncidentFilter::around(
        config.latitude,
        config.longitude,
        config.traffic_radius_deg,
        &config.traffic_keywords,
    );
    fetch_traffic(&ctx.fetcher, &config.sytadin_url, config.datex_url.as_deref(), &filter)
}

// ============================================================================
// Refresh
// ============================================================================

/// Fetches every widget in parallel and stores the rendered fragments.
/// A failing widget never stops the others.
pub async fn refresh_all(
    ctx: Arc<DashboardContext>,
    state: Arc<Mutex<DashboardState>>,
    requested_at: Instant,
) -> Result<RefreshSummary> {
    let started = Instant::now();
    let mut jobs = Vec::new();

    for stop in STOPS {
        let ctx = ctx.clone();
        jobs.push(tokio::task::spawn_blocking(move || {
            Fetched::Stop(stop, load_stop_board(&ctx, stop, Utc::now(), requested_at))
        }));
    }

    let weather_ctx = ctx.clone();
    jobs.push(tokio::task::spawn_blocking(move || {
        Fetched::Weather(fetch_weather(
            &weather_ctx.fetcher,
            weather_ctx.config.latitude,
            weather_ctx.config.longitude,
        ))
    }));

    let velib_ctx = ctx.clone();
    jobs.push(tokio::task::spawn_blocking(move || Fetched::Velib(fetch_velib(&velib_ctx))));

    let traffic_ctx = ctx.clone();
    jobs.push(tokio::task::spawn_blocking(move || Fetched::Traffic(fetch_traffic_report(&traffic_ctx))));

    let news_ctx = ctx.clone();
    jobs.push(tokio::task::spawn_blocking(move || {
        Fetched::News(fetch_headlines(&news_ctx.fetcher, &news_ctx.config.news_feed_url))
    }));

    let results = join_all(jobs).await;

    let now = Utc::now();
    let mut state = state
        .lock()
        .map_err(|e| DashboardError::NetworkError(format!("Failed to lock dashboard state: {}", e)))?;

    for result in results {
        match result {
            Ok(fetched) => state.apply(fetched, now),
            Err(e) => log::error!("❌ Widget fetch task panicked: {}", e),
        }
    }
    state.update_clock(now);
    let summary = state.finish_refresh(now);

    log::info!(
        "✓ Refresh #{} done in {:.1}s: {} widgets ok, {} failed",
        state.refresh_count(),
        started.elapsed().as_secs_f64(),
        summary.ok,
        summary.failed
    );
    Ok(summary)
}
