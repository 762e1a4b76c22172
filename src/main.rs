// Hippodrome de Vincennes dashboard server with embedded frontend
// PRIM (SIRI) departures + Open-Meteo + Vélib + road traffic + news

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use chrono::Utc;
use chrono_tz::Europe::Paris;
use clap::Parser;
use serde::Serialize;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::{self, MissedTickBehavior};
use zip::ZipArchive;

mod config;
mod dashboard;
mod departures;
mod error;
mod gtfs_schedule;
mod http_fetch;
mod news;
mod render;
mod siri_api_models;
mod stop_cache;
mod stop_refs;
mod traffic;
mod velib;
mod weather;

use config::{Cli, Command, DashboardConfig, STOPS};
use dashboard::{DashboardContext, DashboardState, Widget};
use gtfs_schedule::ScheduleSummary;
use http_fetch::HttpFetcher;

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/dashboard.html");
const DASHBOARD_JS: &str = include_str!("../static/dashboard.js");

const SOURCES: [&str; 5] = ["PRIM", "Open-Meteo", "Vélib", "Sytadin", "rss2json"];

#[derive(Clone)]
struct AppState {
    ctx: Arc<DashboardContext>,
    dashboard: Arc<Mutex<DashboardState>>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
    sources: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp(),
            sources: SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().timestamp(),
            sources: vec![],
        }
    }
}

fn lock_failed(what: &str, e: impl std::fmt::Display) -> HttpResponse {
    log::error!("❌ Failed to lock dashboard state: {}", e);
    HttpResponse::InternalServerError().json(ApiResponse::<String>::error(format!("Failed to retrieve {}", what)))
}

fn unknown_stop(stop_key: &str) -> HttpResponse {
    log::warn!("⚠️  Stop not found: {}", stop_key);
    HttpResponse::NotFound().json(ApiResponse::<String>::error(format!("Stop '{}' not found", stop_key)))
}

// ============================================================================
// Frontend Routes
// ============================================================================

async fn serve_index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn serve_js() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/javascript; charset=utf-8")
        .body(DASHBOARD_JS)
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_dashboard(state: web::Data<AppState>) -> HttpResponse {
    match state.dashboard.lock() {
        Ok(dashboard) => {
            let widgets: Vec<Widget> = dashboard.widgets().into_iter().cloned().collect();
            log::debug!("📊 Dashboard requested: {} widgets", widgets.len());
            HttpResponse::Ok().json(ApiResponse::success(widgets))
        }
        Err(e) => lock_failed("dashboard", e),
    }
}

async fn get_widget(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let element_id = path.into_inner();

    match state.dashboard.lock() {
        Ok(dashboard) => match dashboard.widget(&element_id) {
            Some(widget) => HttpResponse::Ok().json(ApiResponse::success(widget)),
            None => {
                log::warn!("⚠️  Widget not found: {}", element_id);
                HttpResponse::NotFound().json(ApiResponse::<String>::error(format!(
                    "Widget '{}' not found",
                    element_id
                )))
            }
        },
        Err(e) => lock_failed("widget", e),
    }
}

async fn get_departures(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let stop_key = path.into_inner();
    let Some(stop) = config::find_stop(&stop_key) else {
        return unknown_stop(&stop_key);
    };

    let ctx = state.ctx.clone();
    match tokio::task::spawn_blocking(move || dashboard::load_stop_board(&ctx, stop, Utc::now(), std::time::Instant::now())).await {
        Ok(Ok(load)) => {
            log::info!("🚉 Departures requested for {}", stop.key);
            HttpResponse::Ok().json(ApiResponse::success(load.board))
        }
        Ok(Err(e)) => {
            log::warn!("⚠️  Departures for {} failed: {}", stop.key, e);
            let last = state.dashboard.lock().ok().and_then(|d| d.board(stop.key).cloned());
            match last {
                Some(board) => {
                    log::info!("💾 Serving last refreshed board for {}", stop.key);
                    HttpResponse::Ok().json(ApiResponse::success(board))
                }
                None => HttpResponse::BadGateway().json(ApiResponse::<String>::error(e.to_string())),
            }
        }
        Err(e) => {
            log::error!("❌ Departures task panicked: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error("Departures task panicked".to_string()))
        }
    }
}

async fn get_messages(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let stop_key = path.into_inner();
    let Some(stop) = config::find_stop(&stop_key) else {
        return unknown_stop(&stop_key);
    };

    let ctx = state.ctx.clone();
    match tokio::task::spawn_blocking(move || dashboard::load_stop_messages(&ctx, stop, Utc::now())).await {
        Ok(Ok(messages)) => {
            log::info!("⚠️  Messages requested for {}: {} active", stop.key, messages.len());
            HttpResponse::Ok().json(ApiResponse::success(messages))
        }
        Ok(Err(e)) => {
            log::warn!("⚠️  Messages for {} failed: {}", stop.key, e);
            let last = state.dashboard.lock().ok().and_then(|d| d.messages(stop.key).cloned());
            match last {
                Some(messages) => HttpResponse::Ok().json(ApiResponse::success(messages)),
                None => HttpResponse::BadGateway().json(ApiResponse::<String>::error(e.to_string())),
            }
        }
        Err(e) => {
            log::error!("❌ Messages task panicked: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error("Messages task panicked".to_string()))
        }
    }
}

async fn get_schedule(state: web::Data<AppState>) -> HttpResponse {
    match &state.ctx.schedule {
        Some(summary) => HttpResponse::Ok().json(ApiResponse::success(summary)),
        None => HttpResponse::NotFound().json(ApiResponse::<String>::error(
            "No GTFS summary loaded, run `gtfs-extract` first".to_string(),
        )),
    }
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    let cache_stats = match state.ctx.stop_cache_stats() {
        Ok(stats) => stats,
        Err(e) => return lock_failed("stats", e),
    };

    match state.dashboard.lock() {
        Ok(dashboard) => {
            log::debug!("📊 Stats requested");
            HttpResponse::Ok().json(ApiResponse::success(
                dashboard.stats(cache_stats, state.ctx.schedule.is_some()),
            ))
        }
        Err(e) => lock_failed("stats", e),
    }
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let last_refresh = state.dashboard.lock().ok().and_then(|d| d.last_refresh());

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Hippodrome de Vincennes Dashboard",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": SOURCES,
        "timestamp": Utc::now().timestamp(),
        "last_refresh": last_refresh,
        "embedded_frontend": true
    }))
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    log::info!("🔄 Manual refresh requested...");

    match dashboard::refresh_all(state.ctx.clone(), state.dashboard.clone(), std::time::Instant::now()).await {
        Ok(summary) => {
            log::info!("✓ Manual refresh completed successfully");
            HttpResponse::Ok().json(ApiResponse::success(summary))
        }
        Err(e) => {
            log::warn!("⚠️  Manual refresh failed: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error(format!("Refresh failed: {}", e)))
        }
    }
}

fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Frontend routes
        .route("/", web::get().to(serve_index))
        .route("/dashboard.js", web::get().to(serve_js))
        // Health check
        .route("/health", web::get().to(health_check))
        // API routes
        .service(
            web::scope("/api")
                .route("/dashboard", web::get().to(get_dashboard))
                .route("/dashboard/{element_id}", web::get().to(get_widget))
                .route("/departures/{stop_key}", web::get().to(get_departures))
                .route("/messages/{stop_key}", web::get().to(get_messages))
                .route("/schedule", web::get().to(get_schedule))
                .route("/stats", web::get().to(get_stats))
                .route("/refresh", web::post().to(force_refresh)),
        );
}

// ============================================================================
// Background Task
// ============================================================================

async fn data_refresh_task(ctx: Arc<DashboardContext>, shared: Arc<Mutex<DashboardState>>) {
    let mut interval = time::interval(ctx.config.refresh_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // Scheduled deadline, not wake-up time: consecutive ticks are exactly one period apart.
        let scheduled = interval.tick().await.into_std();

        log::info!("🔄 Auto-refreshing dashboard...");
        if let Err(e) = dashboard::refresh_all(ctx.clone(), shared.clone(), scheduled).await {
            log::warn!("⚠️  Auto-refresh failed: {}", e);
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(ctx: Arc<DashboardContext>) -> std::io::Result<()> {
    let app_state = AppState {
        ctx: ctx.clone(),
        dashboard: Arc::new(Mutex::new(DashboardState::default())),
    };

    // Start background refresh task
    let refresh_ctx = app_state.ctx.clone();
    let refresh_dashboard = app_state.dashboard.clone();
    tokio::spawn(async move {
        data_refresh_task(refresh_ctx, refresh_dashboard).await;
    });

    let bind_address = ctx.config.bind_address();
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🚀 Hippodrome de Vincennes Dashboard (Embedded UI)       ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://{}", bind_address);
    println!("📱 Dashboard available at: http://localhost:{}", ctx.config.port);
    println!("🔄 Auto-refresh: Every {} seconds\n", ctx.config.refresh_interval().as_secs());

    println!("📍 Available Routes:");
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│ Frontend:                                                   │");
    println!("│   GET  /                           - Dashboard (embedded)   │");
    println!("│   GET  /dashboard.js               - JavaScript (embedded)  │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ API - Widgets:                                              │");
    println!("│   GET  /api/dashboard              - All rendered widgets   │");
    println!("│   GET  /api/dashboard/:element     - One widget             │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ API - Transit:                                              │");
    println!("│   GET  /api/departures/:stop       - Stop board             │");
    println!("│   GET  /api/messages/:stop         - Line disruptions       │");
    println!("│   GET  /api/schedule               - Weekly GTFS summary    │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ API - Meta & Control:                                       │");
    println!("│   GET  /api/stats                  - Refresh & cache stats  │");
    println!("│   POST /api/refresh                - Force refresh          │");
    println!("│   GET  /health                     - Health check           │");
    println!("└─────────────────────────────────────────────────────────────┘\n");

    println!("🚉 Stops: {}", STOPS.iter().map(|s| s.key).collect::<Vec<_>>().join(", "));

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure_routes)
    })
    .bind(bind_address)?
    .run()
    .await
}

fn serve(config: DashboardConfig, fetcher: HttpFetcher) -> anyhow::Result<()> {
    let schedule = match config.gtfs_summary_path() {
        Some(path) => match ScheduleSummary::load(&path) {
            Ok(summary) => {
                log::info!("✓ Loaded GTFS summary for week {} → {}", summary.week_start, summary.week_end);
                Some(summary)
            }
            Err(e) => {
                log::warn!("⚠️  GTFS summary unavailable: {}", e);
                None
            }
        },
        None => None,
    };

    // The blocking HTTP client lives outside the async runtime: created here,
    // and this handle outlives the server.
    let ctx = Arc::new(DashboardContext::new(config, fetcher, schedule));
    actix_web::rt::System::new()
        .block_on(run_server(ctx.clone()))
        .context("Dashboard server stopped with an error")?;
    drop(ctx);
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

fn check_refs(fetcher: &HttpFetcher) -> anyhow::Result<()> {
    let report = stop_refs::fetch_and_check(fetcher, STOPS).context("Failed to fetch the stop-area referential")?;
    let invalid: Vec<&str> = report
        .iter()
        .filter(|c| !c.valid)
        .map(|c| c.monitoring_ref.as_str())
        .collect();

    if invalid.is_empty() {
        println!("✅ All {} monitoring refs are valid", report.len());
        Ok(())
    } else {
        anyhow::bail!("{} invalid monitoring ref(s): {}", invalid.len(), invalid.join(", "))
    }
}

fn summarize_and_save<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    lines: &[String],
    output: &Path,
) -> anyhow::Result<()> {
    let today = Utc::now().with_timezone(&Paris).date_naive();
    let summary = gtfs_schedule::summarize(archive, lines, today).context("Failed to summarize GTFS archive")?;

    for line in &summary.lines {
        println!(
            "🚌 {}: {} trips, {} → {}, {} stops",
            line.line,
            line.trips,
            line.first_departure.as_deref().unwrap_or("--"),
            line.last_departure.as_deref().unwrap_or("--"),
            line.stops.len()
        );
    }
    summary.save(output).context("Failed to save GTFS summary")?;
    Ok(())
}

fn gtfs_extract(fetcher: &HttpFetcher, zip: Option<PathBuf>, output: Option<PathBuf>, lines: &[String]) -> anyhow::Result<()> {
    let output = output
        .or_else(config::default_gtfs_summary_path)
        .unwrap_or_else(|| PathBuf::from(config::GTFS_SUMMARY_FILE));

    match zip {
        Some(path) => {
            log::info!("📦 Reading GTFS archive from {:?}", path);
            let mut archive = gtfs_schedule::open_archive(&path)?;
            summarize_and_save(&mut archive, lines, &output)
        }
        None => {
            let mut archive = gtfs_schedule::download_archive(fetcher, gtfs_schedule::IDFM_GTFS_URL)?;
            summarize_and_save(&mut archive, lines, &output)
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.config;

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║                                                            ║");
    println!("║    🚀 Hippodrome de Vincennes Dashboard                    ║");
    println!("║       RER A · Bus 77 · Bus 201 · Vélib · Météo            ║");
    println!("║                                                            ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    if config.prim_api_key.is_none() && config.cors_proxy.is_none() {
        log::warn!("⚠️  No PRIM API key nor CORS proxy configured, PRIM requests will be rejected");
    }

    let fetcher = HttpFetcher::new(
        config.request_timeout(),
        config.retries,
        config.cors_proxy.clone(),
        config.prim_api_key.clone(),
    )
    .context("Failed to create HTTP client")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, fetcher),
        Command::CheckRefs => check_refs(&fetcher),
        Command::GtfsExtract { zip, output, lines } => gtfs_extract(&fetcher, zip, output, &lines),
    }
}
