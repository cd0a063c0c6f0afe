// Data model for live vehicles, static route geometry and the route filter,
// plus the raw wire shapes of the credential service and the vehicle feed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Route id given to vehicles that are not running a trip.
pub const UNASSIGNED_ROUTE: &str = "N/A";
/// Filter value that shows every route.
pub const ALL_ROUTES: &str = "all";

// ============================================================================
// Internal Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: String,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters per second, never negative
    pub speed: f64,
    pub observed_at: String,
    pub route_id: String,
}

/// Display metadata and geometry for one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteFeature {
    pub route_id: String,
    /// Raw ROUTENAME, kept as JSON since some sources publish non-string names
    pub name: serde_json::Value,
    /// Hex color without the leading '#'
    pub color: Option<String>,
    pub direction: Option<String>,
    pub geometry: Option<geojson::Geometry>,
}

impl RouteFeature {
    /// Popup text shared by the single-route and all-routes layers.
    pub fn popup(&self) -> String {
        let name = match &self.name {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => "undefined".to_string(),
            other => other.to_string(),
        };
        let direction = self.direction.as_deref().unwrap_or("undefined");
        format!("Route: {} ({})", name, direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FilterState {
    #[default]
    All,
    Route(String),
}

impl FilterState {
    pub fn from_value(value: &str) -> Self {
        if value == ALL_ROUTES {
            FilterState::All
        } else {
            FilterState::Route(value.to_string())
        }
    }

    pub fn as_value(&self) -> &str {
        match self {
            FilterState::All => ALL_ROUTES,
            FilterState::Route(id) => id,
        }
    }

    pub fn matches(&self, route_id: &str) -> bool {
        match self {
            FilterState::All => true,
            FilterState::Route(id) => id == route_id,
        }
    }
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_value())
    }
}

impl Serialize for FilterState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_value())
    }
}

// ============================================================================
// Wire Formats
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub signed_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFeed {
    #[serde(default)]
    pub entity: Vec<RawEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEntity {
    pub vehicle: RawVehiclePosition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVehiclePosition {
    pub position: RawPosition,
    #[serde(default)]
    pub vehicle: RawVehicleDescriptor,
    pub trip: Option<RawTrip>,
    pub timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVehicleDescriptor {
    pub id: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrip {
    pub route_id: Option<String>,
}

/// GTFS-RT JSON encodes uint64 timestamps as strings, some feeds as numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Seconds(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn seconds(&self) -> Option<i64> {
        match self {
            RawTimestamp::Seconds(s) => Some(*s),
            RawTimestamp::Text(s) => s.trim().parse().ok(),
        }
    }
}
