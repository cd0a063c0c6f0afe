use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransitError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Feature #{index} has no ROUTE_ID")]
    MissingRouteId { index: usize },
    #[error("Route list already built with {built} routes, refusing rebuild with {observed}")]
    DropdownAlreadyBuilt { built: usize, observed: usize },
    #[error("Route '{0}' is not in the route list")]
    UnknownRoute(String),
    #[error("Signed feed URL is not available yet")]
    CredentialUnavailable,
}

impl From<serde_json::Error> for TransitError {
    fn from(e: serde_json::Error) -> Self {
        TransitError::Parse(format!("Invalid JSON: {}", e))
    }
}

impl From<geojson::Error> for TransitError {
    fn from(e: geojson::Error) -> Self {
        TransitError::Parse(format!("Invalid GeoJSON: {}", e))
    }
}

impl From<prost::DecodeError> for TransitError {
    fn from(e: prost::DecodeError) -> Self {
        TransitError::Parse(format!("Failed to decode GTFS-RT feed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, TransitError>;
