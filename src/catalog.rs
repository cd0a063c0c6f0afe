// Static route geometry, loaded once from a GeoJSON feature collection.
// Properties read per feature: ROUTE_ID, ROUTENAME, ROUTECOLOR, DIRECTION.

use std::cmp::Ordering;
use std::collections::HashMap;

use geojson::{Feature, GeoJson};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{Result, TransitError};
use crate::filter::FilterController;
use crate::models::RouteFeature;

#[derive(Debug, Default)]
pub struct RouteCatalog {
    routes: HashMap<String, RouteFeature>,
    loaded: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub accepted: usize,
    pub skipped: usize,
    pub relabeled: usize,
}

impl RouteCatalog {
    pub fn get(&self, route_id: &str) -> Option<&RouteFeature> {
        self.routes.get(route_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Features in route order ("9" before "10").
    pub fn features(&self) -> Vec<&RouteFeature> {
        let mut features: Vec<_> = self.routes.values().collect();
        features.sort_by(|a, b| compare_route_ids(&a.route_id, &b.route_id));
        features
    }

    /// Stores every feature that carries a route id and relabels the matching
    /// entries of an already built route list. A feature without a route id
    /// is logged and skipped; the rest of the batch still loads.
    pub fn load(&mut self, features: Vec<Feature>, filter: &mut FilterController) -> LoadSummary {
        let mut summary = LoadSummary::default();

        for (index, feature) in features.into_iter().enumerate() {
            let route = match route_from_feature(index, feature) {
                Ok(route) => route,
                Err(e) => {
                    error!("❌ Error processing GeoJSON feature: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let route_id = route.route_id.clone();
            self.routes.insert(route_id.clone(), route);
            summary.accepted += 1;

            if filter.patch_label(&route_id, self) {
                summary.relabeled += 1;
            }
        }

        self.loaded = true;
        if self.is_empty() {
            warn!("⚠️  Route catalog is empty, no route geometry will be drawn");
        }
        info!(
            "🗺️  Route catalog loaded: {} routes ({} features accepted, {} skipped, {} labels updated)",
            self.routes.len(),
            summary.accepted,
            summary.skipped,
            summary.relabeled
        );
        summary
    }
}

/// Parses a GeoJSON document that must be a feature collection.
pub fn parse_feature_collection(body: &str) -> Result<Vec<Feature>> {
    match body.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        _ => Err(TransitError::Parse(
            "Route geometry is not a FeatureCollection".to_string(),
        )),
    }
}

fn route_from_feature(index: usize, feature: Feature) -> Result<RouteFeature> {
    let route_id = feature
        .property("ROUTE_ID")
        .and_then(route_id_text)
        .ok_or(TransitError::MissingRouteId { index })?;

    let name = feature.property("ROUTENAME").cloned().unwrap_or(Value::Null);
    let color = feature
        .property("ROUTECOLOR")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(String::from);
    let direction = feature.property("DIRECTION").and_then(Value::as_str).map(String::from);

    Ok(RouteFeature {
        route_id,
        name,
        color,
        direction,
        geometry: feature.geometry,
    })
}

fn route_id_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Strips a leading run of digits followed by a hyphen ("20-Manor Rd" becomes
/// "Manor Rd"). Anything else is returned as is.
pub fn strip_route_prefix(name: &str) -> &str {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && name.as_bytes().get(digits) == Some(&b'-') {
        &name[digits + 1..]
    } else {
        name
    }
}

/// Name cleaning over raw JSON names: non-strings pass through untouched.
pub fn clean_route_name(raw: &Value) -> Value {
    match raw {
        Value::String(s) => Value::String(strip_route_prefix(s).to_string()),
        other => other.clone(),
    }
}

/// Text shown for a route in the route list.
pub fn route_label(route_id: &str, route: Option<&RouteFeature>) -> String {
    let cleaned = match route.map(|r| clean_route_name(&r.name)) {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    };

    if cleaned.is_empty() {
        format!("Route {}", route_id)
    } else {
        format!("Route {} - {}", route_id, cleaned)
    }
}

/// Numeric ordering for route ids; ids that are not numbers sort after the
/// numeric ones, alphabetically.
pub fn compare_route_ids(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
