// Runtime configuration for the transit map server.
// Every flag can also be set through a TRANSIT_MAP_* environment variable.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use serde::Serialize;

pub const REFRESH_INTERVAL_MS: u64 = 15_000;
/// Meters/second to miles/hour.
pub const SPEED_CONVERSION_FACTOR: f64 = 2.23694;
pub const DEFAULT_ROUTE: &str = "20";
pub const CREDENTIAL_URL: &str = "https://get-signed-url-1030252149980.us-central1.run.app/";
pub const ROUTES_SOURCE: &str = "busroutes.geojson";

pub const MAP_CENTER: [f64; 2] = [30.2672, -97.7431];
pub const ZOOM_LEVEL: u8 = 12;
pub const TILE_LAYER_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const TILE_LAYER_ATTRIBUTION: &str = "© OpenStreetMap contributors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedFormat {
    /// GTFS-realtime rendered as JSON
    Json,
    /// GTFS-realtime protobuf
    Protobuf,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "transit-map", author, version, about = "Live transit vehicle map server", long_about = None)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, env = "TRANSIT_MAP_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "TRANSIT_MAP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Endpoint returning the signed vehicle feed URL
    #[arg(long, env = "TRANSIT_MAP_CREDENTIAL_URL", default_value = CREDENTIAL_URL)]
    pub credential_url: String,

    /// Route geometry GeoJSON, as an http(s) URL or a local path
    #[arg(long, env = "TRANSIT_MAP_ROUTES_SOURCE", default_value = ROUTES_SOURCE)]
    pub routes_source: String,

    #[arg(long, env = "TRANSIT_MAP_FEED_FORMAT", value_enum, default_value_t = FeedFormat::Json)]
    pub feed_format: FeedFormat,

    /// Vehicle poll period; must be non-zero
    #[arg(
        long,
        env = "TRANSIT_MAP_REFRESH_INTERVAL_MS",
        default_value_t = REFRESH_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_interval_ms: u64,

    /// Route selected once the route list is first built, if it was observed
    #[arg(long, env = "TRANSIT_MAP_DEFAULT_ROUTE", default_value = DEFAULT_ROUTE)]
    pub default_route: String,

    /// Time zone used to display vehicle timestamps
    #[arg(long, env = "TRANSIT_MAP_TIMEZONE", default_value = "America/Chicago")]
    pub timezone: Tz,

    #[arg(long, env = "TRANSIT_MAP_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Directory served under /data
    #[arg(long, env = "TRANSIT_MAP_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

impl Config {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Presentation settings handed to the browser page.
#[derive(Debug, Clone, Serialize)]
pub struct MapConfig {
    pub center: [f64; 2],
    pub zoom: u8,
    pub tile_url: &'static str,
    pub attribution: &'static str,
    pub refresh_interval_ms: u64,
}

impl MapConfig {
    pub fn from_config(config: &Config) -> Self {
        MapConfig {
            center: MAP_CENTER,
            zoom: ZOOM_LEVEL,
            tile_url: TILE_LAYER_URL,
            attribution: TILE_LAYER_ATTRIBUTION,
            refresh_interval_ms: config.refresh_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_named_constants() {
        let config = Config::parse_from(["transit-map"]);
        assert_eq!(config.refresh_interval(), Duration::from_millis(15_000));
        assert_eq!(config.default_route, "20");
        assert_eq!(config.feed_format, FeedFormat::Json);
        assert_eq!(config.timezone, chrono_tz::America::Chicago);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "transit-map",
            "--feed-format",
            "protobuf",
            "--timezone",
            "Europe/Paris",
            "--refresh-interval-ms",
            "500",
        ]);
        assert_eq!(config.feed_format, FeedFormat::Protobuf);
        assert_eq!(config.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.refresh_interval(), Duration::from_millis(500));
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        let result = Config::try_parse_from(["transit-map", "--refresh-interval-ms", "0"]);
        assert!(result.is_err());

        let config = Config::try_parse_from(["transit-map", "--refresh-interval-ms", "1"]).unwrap();
        assert_eq!(config.refresh_interval(), Duration::from_millis(1));
    }
}
