// Overlay rendering: vehicle markers, the vehicle table and route polylines.
// Every render discards the previous overlay and draws it again from the
// current vehicles, route catalog and filter.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::catalog::RouteCatalog;
use crate::config::SPEED_CONVERSION_FACTOR;
use crate::models::{FilterState, RouteFeature, Vehicle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LayerId(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrokeStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// One popup line per entry
    pub popup: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteShape {
    pub route_id: String,
    pub geometry: Option<geojson::Geometry>,
    pub popup: String,
    pub style: StrokeStyle,
    pub base_style: StrokeStyle,
    pub hover_style: Option<StrokeStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLayer {
    pub shapes: Vec<RouteShape>,
    /// Indices into `shapes`; the last one is drawn on top
    pub draw_order: Vec<usize>,
}

impl RouteLayer {
    fn new(shapes: Vec<RouteShape>) -> Self {
        let draw_order = (0..shapes.len()).collect();
        RouteLayer { shapes, draw_order }
    }

    /// Shapes in draw order, bottom first.
    pub fn drawn(&self) -> impl Iterator<Item = &RouteShape> {
        self.draw_order.iter().filter_map(|&i| self.shapes.get(i))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub vehicle_id: String,
    pub route_id: String,
    pub speed_mph: String,
    pub observed_at: String,
}

/// The drawing primitives the renderer needs from a map.
pub trait MapSurface {
    fn add_marker(&mut self, marker: Marker) -> LayerId;
    fn add_route_layer(&mut self, layer: RouteLayer) -> LayerId;
    /// Returns false when the layer is not on the map.
    fn remove_layer(&mut self, id: LayerId) -> bool;
}

/// In-memory map holding whatever is currently drawn. Pointer hover is part
/// of the model: the page reports hover through the session and mirrors the
/// resulting styles and draw order.
#[derive(Debug, Default)]
pub struct OverlayMap {
    next_id: u64,
    markers: BTreeMap<LayerId, Marker>,
    route_layers: BTreeMap<LayerId, RouteLayer>,
}

impl OverlayMap {
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn route_layers(&self) -> impl Iterator<Item = (LayerId, &RouteLayer)> {
        self.route_layers.iter().map(|(id, layer)| (*id, layer))
    }

    pub fn route_layer(&self, id: LayerId) -> Option<&RouteLayer> {
        self.route_layers.get(&id)
    }

    /// Applies the hover style of one shape and raises it to the top.
    /// Shapes without a hover style are left alone.
    pub fn pointer_enter(&mut self, layer: LayerId, shape: usize) -> bool {
        let Some(layer) = self.route_layers.get_mut(&layer) else {
            return false;
        };
        let Some(target) = layer.shapes.get_mut(shape) else {
            return false;
        };
        let Some(hover) = target.hover_style.clone() else {
            return false;
        };

        target.style = hover;
        layer.draw_order.retain(|&i| i != shape);
        layer.draw_order.push(shape);
        true
    }

    pub fn pointer_leave(&mut self, layer: LayerId, shape: usize) -> bool {
        let Some(target) = self
            .route_layers
            .get_mut(&layer)
            .and_then(|l| l.shapes.get_mut(shape))
        else {
            return false;
        };
        if target.hover_style.is_none() {
            return false;
        }
        target.style = target.base_style.clone();
        true
    }

    fn next_layer_id(&mut self) -> LayerId {
        self.next_id += 1;
        LayerId(self.next_id)
    }
}

impl MapSurface for OverlayMap {
    fn add_marker(&mut self, marker: Marker) -> LayerId {
        let id = self.next_layer_id();
        self.markers.insert(id, marker);
        id
    }

    fn add_route_layer(&mut self, layer: RouteLayer) -> LayerId {
        let id = self.next_layer_id();
        self.route_layers.insert(id, layer);
        id
    }

    fn remove_layer(&mut self, id: LayerId) -> bool {
        self.markers.remove(&id).is_some() || self.route_layers.remove(&id).is_some()
    }
}

/// Speed in mph with one decimal, e.g. 10 m/s becomes "22.4".
pub fn display_speed(meters_per_second: f64) -> String {
    format!("{:.1}", meters_per_second * SPEED_CONVERSION_FACTOR)
}

const ALL_ROUTES_FALLBACK_COLOR: &str = "ffffff";
const SINGLE_ROUTE_FALLBACK_COLOR: &str = "000000";

fn stroke(route: &RouteFeature, fallback: &str, weight: f64, opacity: f64) -> StrokeStyle {
    StrokeStyle {
        color: format!("#{}", route.color.as_deref().unwrap_or(fallback)),
        weight,
        opacity,
    }
}

fn all_routes_shape(route: &RouteFeature) -> RouteShape {
    let base = stroke(route, ALL_ROUTES_FALLBACK_COLOR, 3.0, 0.5);
    let hover = StrokeStyle { weight: 5.0, opacity: 1.0, ..base.clone() };
    RouteShape {
        route_id: route.route_id.clone(),
        geometry: route.geometry.clone(),
        popup: route.popup(),
        style: base.clone(),
        base_style: base,
        hover_style: Some(hover),
    }
}

fn single_route_shape(route: &RouteFeature) -> RouteShape {
    let base = stroke(route, SINGLE_ROUTE_FALLBACK_COLOR, 4.0, 0.7);
    RouteShape {
        route_id: route.route_id.clone(),
        geometry: route.geometry.clone(),
        popup: route.popup(),
        style: base.clone(),
        base_style: base,
        hover_style: None,
    }
}

#[derive(Debug, Default)]
pub struct RenderEngine<M = OverlayMap> {
    map: M,
    table: Vec<TableRow>,
    markers: Vec<LayerId>,
    route_layer: Option<LayerId>,
    all_routes_layer: Option<LayerId>,
    renders: u64,
}

impl<M: MapSurface> RenderEngine<M> {
    pub fn new(map: M) -> Self {
        RenderEngine {
            map,
            table: Vec::new(),
            markers: Vec::new(),
            route_layer: None,
            all_routes_layer: None,
            renders: 0,
        }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn table(&self) -> &[TableRow] {
        &self.table
    }

    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Layer currently showing route geometry, if any.
    pub fn active_route_layer(&self) -> Option<LayerId> {
        self.all_routes_layer.or(self.route_layer)
    }

    pub fn render(&mut self, vehicles: &[Vehicle], catalog: &RouteCatalog, filter: &FilterState) {
        for id in self.markers.drain(..) {
            self.map.remove_layer(id);
        }
        self.table.clear();

        for vehicle in vehicles.iter().filter(|v| filter.matches(&v.route_id)) {
            let speed = display_speed(vehicle.speed);
            let marker = Marker {
                vehicle_id: vehicle.id.clone(),
                latitude: vehicle.latitude,
                longitude: vehicle.longitude,
                popup: vec![
                    format!("Vehicle: {}", vehicle.label),
                    format!("Route: {}", vehicle.route_id),
                    format!("Speed: {} mph", speed),
                ],
            };
            self.markers.push(self.map.add_marker(marker));
            self.table.push(TableRow {
                vehicle_id: vehicle.id.clone(),
                route_id: vehicle.route_id.clone(),
                speed_mph: speed,
                observed_at: vehicle.observed_at.clone(),
            });
        }

        if let Some(id) = self.route_layer.take() {
            self.map.remove_layer(id);
        }
        if let Some(id) = self.all_routes_layer.take() {
            self.map.remove_layer(id);
        }

        match filter {
            FilterState::All => {
                let shapes = catalog.features().into_iter().map(all_routes_shape).collect();
                self.all_routes_layer = Some(self.map.add_route_layer(RouteLayer::new(shapes)));
            }
            FilterState::Route(route_id) => {
                if let Some(route) = catalog.get(route_id) {
                    let layer = RouteLayer::new(vec![single_route_shape(route)]);
                    self.route_layer = Some(self.map.add_route_layer(layer));
                }
            }
        }

        self.renders += 1;
        debug!(
            "🖌️  Rendered filter '{}': {} markers, route layer {}",
            filter,
            self.markers.len(),
            if self.active_route_layer().is_some() { "drawn" } else { "none" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_feature_collection;
    use crate::filter::FilterController;
    use proptest::prelude::*;
    use serde_json::json;

    fn vehicle(id: &str, route: &str, speed: f64) -> Vehicle {
        Vehicle {
            id: id.into(),
            label: format!("Bus {}", id),
            latitude: 30.27,
            longitude: -97.74,
            speed,
            observed_at: "1/1/2024, 12:00:00 PM".into(),
            route_id: route.into(),
        }
    }

    fn catalog(routes: &[(&str, Option<&str>)]) -> RouteCatalog {
        let features: Vec<_> = routes
            .iter()
            .map(|(id, color)| json!({
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[-97.74, 30.26], [-97.73, 30.27]]},
                "properties": {"ROUTE_ID": id, "ROUTENAME": format!("{}-Main St", id), "ROUTECOLOR": color, "DIRECTION": "Northbound"}
            }))
            .collect();
        let body = json!({"type": "FeatureCollection", "features": features}).to_string();
        let mut catalog = RouteCatalog::default();
        catalog.load(parse_feature_collection(&body).unwrap(), &mut FilterController::new("20"));
        catalog
    }

    #[test]
    fn converts_speed_to_mph() {
        assert_eq!(display_speed(10.0), "22.4");
        assert_eq!(display_speed(0.0), "0.0");
        assert_eq!(display_speed(1.0), "2.2");
    }

    #[test]
    fn route_filter_keeps_only_matching_vehicles() {
        let vehicles = vec![vehicle("v1", "20", 10.0), vehicle("v2", "9", 0.0)];
        let mut engine = RenderEngine::new(OverlayMap::default());
        engine.render(&vehicles, &RouteCatalog::default(), &FilterState::Route("20".into()));

        assert_eq!(engine.map().markers().count(), 1);
        assert_eq!(engine.table().len(), 1);
        assert_eq!(engine.table()[0].vehicle_id, "v1");
        assert_eq!(engine.table()[0].speed_mph, "22.4");
        let marker = engine.map().markers().next().unwrap();
        assert_eq!(marker.popup, vec!["Vehicle: Bus v1", "Route: 20", "Speed: 22.4 mph"]);
    }

    #[test]
    fn table_rows_follow_feed_order() {
        let vehicles = vec![vehicle("b", "20", 1.0), vehicle("a", "9", 2.0), vehicle("c", "20", 3.0)];
        let mut engine = RenderEngine::new(OverlayMap::default());
        engine.render(&vehicles, &RouteCatalog::default(), &FilterState::All);

        let ids: Vec<_> = engine.table().iter().map(|r| r.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn repeated_renders_do_not_duplicate_layers() {
        let vehicles = vec![vehicle("v1", "20", 10.0), vehicle("v2", "20", 5.0)];
        let catalog = catalog(&[("20", Some("ff0000"))]);
        let filter = FilterState::Route("20".into());
        let mut engine = RenderEngine::new(OverlayMap::default());

        engine.render(&vehicles, &catalog, &filter);
        engine.render(&vehicles, &catalog, &filter);

        assert_eq!(engine.map().markers().count(), 2);
        assert_eq!(engine.table().len(), 2);
        assert_eq!(engine.map().route_layers().count(), 1);
        assert_eq!(engine.render_count(), 2);
    }

    #[test]
    fn switching_filters_replaces_route_layer() {
        let catalog = catalog(&[("20", None), ("9", None)]);
        let mut engine = RenderEngine::new(OverlayMap::default());

        engine.render(&[], &catalog, &FilterState::All);
        let all_layer = engine.active_route_layer().unwrap();
        engine.render(&[], &catalog, &FilterState::Route("9".into()));

        assert_eq!(engine.map().route_layers().count(), 1);
        assert!(engine.map().route_layer(all_layer).is_none());
        let layer = engine.map().route_layer(engine.active_route_layer().unwrap()).unwrap();
        assert_eq!(layer.shapes.len(), 1);
        assert_eq!(layer.shapes[0].route_id, "9");
        assert_eq!(layer.shapes[0].style, StrokeStyle { color: "#000000".into(), weight: 4.0, opacity: 0.7 });
        assert!(layer.shapes[0].hover_style.is_none());
    }

    #[test]
    fn all_routes_layer_hovers_each_shape_independently() {
        let catalog = catalog(&[("20", Some("ff0000")), ("9", None)]);
        let mut engine = RenderEngine::new(OverlayMap::default());
        engine.render(&[], &catalog, &FilterState::All);

        let id = engine.active_route_layer().unwrap();
        let layer = engine.map().route_layer(id).unwrap();
        assert_eq!(layer.shapes.len(), 2);
        assert_eq!(layer.shapes[0].route_id, "9");
        assert_eq!(layer.shapes[0].style.color, "#ffffff");
        assert_eq!(layer.shapes[1].style, StrokeStyle { color: "#ff0000".into(), weight: 3.0, opacity: 0.5 });
        assert_eq!(layer.shapes[1].popup, "Route: 20-Main St (Northbound)");

        let map = engine.map_mut();
        assert!(map.pointer_enter(id, 0));
        let layer = map.route_layer(id).unwrap();
        assert_eq!(layer.shapes[0].style, StrokeStyle { color: "#ffffff".into(), weight: 5.0, opacity: 1.0 });
        assert_eq!(layer.shapes[1].style.weight, 3.0);
        assert_eq!(layer.draw_order, vec![1, 0]);

        assert!(map.pointer_leave(id, 0));
        let layer = map.route_layer(id).unwrap();
        assert_eq!(layer.shapes[0].style, layer.shapes[0].base_style);
    }

    #[test]
    fn single_route_layer_ignores_hover() {
        let catalog = catalog(&[("20", Some("00ff00"))]);
        let mut engine = RenderEngine::new(OverlayMap::default());
        engine.render(&[], &catalog, &FilterState::Route("20".into()));

        let id = engine.active_route_layer().unwrap();
        assert!(!engine.map_mut().pointer_enter(id, 0));
        assert_eq!(engine.map().route_layer(id).unwrap().shapes[0].style.weight, 4.0);
    }

    #[test]
    fn missing_geometry_still_renders_vehicles() {
        let vehicles = vec![vehicle("v7", "801", 3.0)];
        let catalog = catalog(&[("20", None)]);
        let mut engine = RenderEngine::new(OverlayMap::default());
        engine.render(&vehicles, &catalog, &FilterState::Route("801".into()));

        assert_eq!(engine.map().markers().count(), 1);
        assert_eq!(engine.table()[0].route_id, "801");
        assert!(engine.active_route_layer().is_none());
        assert_eq!(engine.map().route_layers().count(), 0);
    }

    proptest! {
        #[test]
        fn displayed_speed_is_rounded_to_one_decimal(speed in 0.0f64..60.0) {
            let shown = display_speed(speed);
            let (_, decimals) = shown.split_once('.').unwrap();
            prop_assert_eq!(decimals.len(), 1);
            let value: f64 = shown.parse().unwrap();
            prop_assert!((value - speed * SPEED_CONVERSION_FACTOR).abs() <= 0.05 + 1e-9);
        }
    }
}
