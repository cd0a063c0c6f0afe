// Live vehicle positions from the GTFS-realtime feed.
// Each successful poll replaces the whole vehicle set; a failed poll keeps
// the previous one.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use gtfs_rt::FeedMessage;
use prost::Message;
use tracing::{info, warn};

use crate::config::FeedFormat;
use crate::error::Result;
use crate::models::{RawFeed, RawTimestamp, UNASSIGNED_ROUTE, Vehicle};

#[derive(Debug, Default)]
pub struct VehicleFeed {
    vehicles: Vec<Vehicle>,
    observed_routes: HashSet<String>,
    last_success: Option<DateTime<Utc>>,
    successes: u64,
    failures: u64,
}

impl VehicleFeed {
    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    /// Every route id seen since startup, including the unassigned sentinel.
    pub fn observed_routes(&self) -> &HashSet<String> {
        &self.observed_routes
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Applies the outcome of one poll. Returns whether the snapshot changed.
    pub fn apply(&mut self, result: Result<Vec<Vehicle>>) -> bool {
        match result {
            Ok(vehicles) => {
                self.observed_routes
                    .extend(vehicles.iter().map(|v| v.route_id.clone()));
                info!(
                    "🚌 Loaded {} vehicles ({} routes seen so far)",
                    vehicles.len(),
                    self.observed_routes.len()
                );
                self.vehicles = vehicles;
                self.last_success = Some(Utc::now());
                self.successes += 1;
                true
            }
            Err(e) => {
                warn!(
                    "⚠️  Error loading vehicle data ({}), keeping {} vehicles from the last poll",
                    e,
                    self.vehicles.len()
                );
                self.failures += 1;
                false
            }
        }
    }
}

/// Decodes a feed response body into vehicles.
pub fn decode_vehicles(format: FeedFormat, body: &[u8], tz: Tz) -> Result<Vec<Vehicle>> {
    match format {
        FeedFormat::Json => decode_json(body, tz),
        FeedFormat::Protobuf => decode_protobuf(body, tz),
    }
}

fn decode_json(body: &[u8], tz: Tz) -> Result<Vec<Vehicle>> {
    let feed: RawFeed = serde_json::from_slice(body)?;

    Ok(feed
        .entity
        .into_iter()
        .map(|entity| {
            let raw = entity.vehicle;
            Vehicle {
                id: raw.vehicle.id.unwrap_or_else(|| "Unknown".to_string()),
                label: raw.vehicle.label.unwrap_or_else(|| "Unknown".to_string()),
                latitude: raw.position.latitude,
                longitude: raw.position.longitude,
                speed: normalize_speed(raw.position.speed),
                observed_at: format_observed_at(raw.timestamp.as_ref().and_then(RawTimestamp::seconds), tz),
                route_id: route_or_unassigned(raw.trip.and_then(|t| t.route_id)),
            }
        })
        .collect())
}

fn decode_protobuf(body: &[u8], tz: Tz) -> Result<Vec<Vehicle>> {
    let feed = FeedMessage::decode(body)?;

    Ok(feed
        .entity
        .into_iter()
        .filter_map(|entity| {
            let vehicle = entity.vehicle?;
            let position = vehicle.position?;
            let descriptor = vehicle.vehicle.unwrap_or_default();

            Some(Vehicle {
                id: descriptor.id.unwrap_or_else(|| "Unknown".to_string()),
                label: descriptor.label.unwrap_or_else(|| "Unknown".to_string()),
                latitude: position.latitude as f64,
                longitude: position.longitude as f64,
                speed: normalize_speed(position.speed.map(f64::from)),
                observed_at: format_observed_at(vehicle.timestamp.and_then(|ts| i64::try_from(ts).ok()), tz),
                route_id: route_or_unassigned(vehicle.trip.and_then(|t| t.route_id)),
            })
        })
        .collect())
}

/// Missing, zero, negative and NaN speeds all read as standing still.
pub fn normalize_speed(speed: Option<f64>) -> f64 {
    match speed {
        Some(s) if s.is_finite() && s > 0.0 => s,
        _ => 0.0,
    }
}

fn route_or_unassigned(route_id: Option<String>) -> String {
    route_id.unwrap_or_else(|| UNASSIGNED_ROUTE.to_string())
}

/// Long-form local date and time, e.g. "11/14/2023, 4:13:20 PM".
pub fn format_observed_at(seconds: Option<i64>, tz: Tz) -> String {
    match seconds.and_then(|s| Utc.timestamp_opt(s, 0).single()) {
        Some(dt) => dt.with_timezone(&tz).format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
        None => "Invalid Date".to_string(),
    }
}
