// Runtime configuration for the Hippodrome de Vincennes dashboard server.
// Every option can come from the command line, the environment, or a .env file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Built-in stops and stations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StopDefinition {
    pub key: &'static str,
    pub monitoring_ref: &'static str,
    /// Known line ref; otherwise taken from the live visits
    pub line_ref: Option<&'static str>,
    /// route_short_name in the static GTFS
    pub gtfs_line: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub element_id: &'static str,
    pub vehicle_label: &'static str,
}

pub const STOPS: &[StopDefinition] = &[
    StopDefinition {
        key: "rer",
        monitoring_ref: "STIF:StopArea:SP:43135:",
        line_ref: Some("STIF:Line::C01742:"),
        gtfs_line: "A",
        name: "RER A Joinville-le-Pont",
        icon: "img/picto-rer-a.svg",
        element_id: "rer-content",
        vehicle_label: "train",
    },
    StopDefinition {
        key: "bus77",
        monitoring_ref: "STIF:StopArea:SP:463641:",
        line_ref: None,
        gtfs_line: "77",
        name: "BUS 77 Hippodrome de Vincennes",
        icon: "img/picto-bus.svg",
        element_id: "bus77-content",
        vehicle_label: "bus",
    },
    StopDefinition {
        key: "bus201",
        monitoring_ref: "STIF:StopArea:SP:463644:",
        line_ref: None,
        gtfs_line: "201",
        name: "BUS 201 Ecole du Breuil",
        icon: "img/picto-bus.svg",
        element_id: "bus201-content",
        vehicle_label: "bus",
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct VelibStation {
    pub station_id: &'static str,
    pub element_id: &'static str,
}

pub const VELIB_STATIONS: &[VelibStation] = &[
    VelibStation { station_id: "1074333296", element_id: "velib-vincennes" },
    VelibStation { station_id: "508042092", element_id: "velib-breuil" },
];

pub fn find_stop(key: &str) -> Option<&'static StopDefinition> {
    STOPS.iter().find(|s| s.key.eq_ignore_ascii_case(key))
}

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug, Clone)]
#[command(name = "hippodrome-dashboard", version, about = "Transit, weather, Vélib and traffic dashboard for the Hippodrome de Vincennes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: DashboardConfig,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the dashboard HTTP server (default)
    Serve,
    /// Check the configured monitoring refs against the PRIM stop-area referential
    CheckRefs,
    /// Build the static schedule summary from the IDFM GTFS archive
    GtfsExtract {
        /// Read a local GTFS zip instead of downloading it
        #[arg(long)]
        zip: Option<PathBuf>,

        /// Where to write the summary JSON (defaults to the user cache directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Route short names to keep
        #[arg(long, value_delimiter = ',', default_value = "A,77,201")]
        lines: Vec<String>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct DashboardConfig {
    #[arg(long, env = "DASHBOARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "DASHBOARD_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Seconds between two dashboard refreshes
    #[arg(long, env = "DASHBOARD_REFRESH_SECS", default_value_t = 60)]
    pub refresh_secs: u64,

    /// PRIM marketplace API key, sent as the `apikey` header
    #[arg(long, env = "PRIM_API_KEY", hide_env_values = true)]
    pub prim_api_key: Option<String>,

    /// Optional relay; requests become `{proxy}/?url=<encoded target>`
    #[arg(long, env = "DASHBOARD_CORS_PROXY")]
    pub cors_proxy: Option<String>,

    #[arg(long, env = "DASHBOARD_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Extra attempts after the first failed request
    #[arg(long, env = "DASHBOARD_RETRIES", default_value_t = 2)]
    pub retries: u32,

    #[arg(long, env = "DASHBOARD_STOP_CACHE_TTL_SECS", default_value_t = 60)]
    pub stop_cache_ttl_secs: u64,

    /// Departures shown per destination
    #[arg(long, env = "DASHBOARD_DEPARTURES_PER_GROUP", default_value_t = 4)]
    pub departures_per_group: usize,

    #[arg(long, env = "DASHBOARD_LATITUDE", default_value_t = 48.8327)]
    pub latitude: f64,

    #[arg(long, env = "DASHBOARD_LONGITUDE", default_value_t = 2.4382)]
    pub longitude: f64,

    #[arg(
        long,
        env = "DASHBOARD_NEWS_FEED",
        default_value = "https://api.rss2json.com/v1/api.json?rss_url=https%3A%2F%2Fwww.francetvinfo.fr%2Ftitres.rss"
    )]
    pub news_feed_url: String,

    #[arg(
        long,
        env = "DASHBOARD_SYTADIN_URL",
        default_value = "https://www.sytadin.fr/sys/barreau_courbe_cms.php?type=N"
    )]
    pub sytadin_url: String,

    /// DATEX II publication to scan for incidents near the hippodrome
    #[arg(long, env = "DASHBOARD_DATEX_URL")]
    pub datex_url: Option<String>,

    #[arg(
        long,
        env = "DASHBOARD_TRAFFIC_KEYWORDS",
        value_delimiter = ',',
        default_value = "Vincennes,Joinville,A4,A86,Hippodrome"
    )]
    pub traffic_keywords: Vec<String>,

    /// Half-width in degrees of the box around the dashboard coordinates
    #[arg(long, env = "DASHBOARD_TRAFFIC_RADIUS_DEG", default_value_t = 0.03)]
    pub traffic_radius_deg: f64,

    /// Static schedule summary produced by `gtfs-extract`
    #[arg(long, env = "DASHBOARD_GTFS_SUMMARY")]
    pub gtfs_summary: Option<PathBuf>,
}

impl DashboardConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn stop_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stop_cache_ttl_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured summary path, else the default one when `gtfs-extract` already wrote it.
    pub fn gtfs_summary_path(&self) -> Option<PathBuf> {
        match &self.gtfs_summary {
            Some(path) => Some(path.clone()),
            None => default_gtfs_summary_path().filter(|p| p.exists()),
        }
    }
}

pub fn default_gtfs_summary_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("hippodrome-dashboard").join(GTFS_SUMMARY_FILE))
}

pub const GTFS_SUMMARY_FILE: &str = "gtfs-info.json";
