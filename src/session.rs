// Application session: the one owner of credential, catalog, vehicles,
// filter and overlay, and the async tasks that feed it.
//
// Network calls run without holding the lock. Every state change and the
// render that follows it happen in a single critical section, so the last
// render always reflects the latest filter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use geojson::Feature;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::catalog::RouteCatalog;
use crate::credential::CredentialGate;
use crate::error::Result;
use crate::feed::VehicleFeed;
use crate::filter::{FilterController, RouteOption};
use crate::models::{FilterState, Vehicle};
use crate::render::{LayerId, Marker, OverlayMap, RenderEngine, RouteShape, TableRow};
use crate::source::TransitSource;

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug)]
pub struct Session {
    credential: CredentialGate,
    catalog: RouteCatalog,
    feed: VehicleFeed,
    filter: FilterController,
    renderer: RenderEngine<OverlayMap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteLayerView {
    pub id: LayerId,
    /// Bottom first
    pub shapes: Vec<RouteShape>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlaySnapshot {
    pub filter: FilterState,
    pub markers: Vec<Marker>,
    pub route_layers: Vec<RouteLayerView>,
    pub table: Vec<TableRow>,
    pub render_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteListView {
    pub selected: FilterState,
    pub initialized: bool,
    pub options: Vec<RouteOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub credential_ready: bool,
    pub credential_resolved: bool,
    pub catalog_loaded: bool,
    pub catalog_routes: usize,
    pub vehicles: usize,
    pub observed_routes: usize,
    pub route_list_built: bool,
    pub filter: FilterState,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub render_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No signed URL yet, nothing was requested
    Skipped,
    Updated,
    Failed,
}

impl Session {
    pub fn new(default_route: impl Into<String>) -> Self {
        Session {
            credential: CredentialGate::default(),
            catalog: RouteCatalog::default(),
            feed: VehicleFeed::default(),
            filter: FilterController::new(default_route),
            renderer: RenderEngine::new(OverlayMap::default()),
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn credential(&self) -> &CredentialGate {
        &self.credential
    }

    #[cfg(test)]
    pub fn catalog(&self) -> &RouteCatalog {
        &self.catalog
    }

    pub fn filter(&self) -> &FilterController {
        &self.filter
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        self.feed.vehicles()
    }

    pub fn renderer(&self) -> &RenderEngine<OverlayMap> {
        &self.renderer
    }

    pub fn resolve_credential(&mut self, result: Result<String>) {
        self.credential.resolve(result);
    }

    pub fn apply_catalog(&mut self, result: Result<Vec<Feature>>) {
        match result {
            Ok(features) => {
                self.catalog.load(features, &mut self.filter);
            }
            Err(e) => error!("❌ Error loading bus routes: {}", e),
        }
    }

    /// Stores a poll result. A successful poll builds the route list the
    /// first time routes are seen, then re-renders.
    pub fn apply_poll(&mut self, result: Result<Vec<Vehicle>>) -> PollOutcome {
        if !self.feed.apply(result) {
            return PollOutcome::Failed;
        }

        if !self.filter.is_initialized() && !self.feed.observed_routes().is_empty() {
            if let Err(e) = self.filter.build_once(self.feed.observed_routes(), &self.catalog) {
                error!("❌ Route list consistency error: {}", e);
            }
        }

        self.render();
        PollOutcome::Updated
    }

    /// User selection from the route list; renders right away.
    pub fn select_route(&mut self, value: &str) -> Result<()> {
        self.filter.select(value)?;
        info!("🎯 Route filter changed to '{}'", value);
        self.render();
        Ok(())
    }

    /// Pointer entering or leaving a route of the drawn route layer. Only
    /// the all-routes layer reacts; returns whether a style changed.
    pub fn hover_route(&mut self, route_id: &str, active: bool) -> bool {
        let Some(id) = self.renderer.active_route_layer() else {
            return false;
        };
        let Some(shape) = self
            .renderer
            .map()
            .route_layer(id)
            .and_then(|layer| layer.shapes.iter().position(|s| s.route_id == route_id))
        else {
            return false;
        };

        let map = self.renderer.map_mut();
        if active {
            map.pointer_enter(id, shape)
        } else {
            map.pointer_leave(id, shape)
        }
    }

    pub fn render(&mut self) {
        self.renderer
            .render(self.feed.vehicles(), &self.catalog, self.filter.current());
    }

    pub fn overlay(&self) -> OverlaySnapshot {
        let map = self.renderer.map();
        OverlaySnapshot {
            filter: self.filter.current().clone(),
            markers: map.markers().cloned().collect(),
            route_layers: map
                .route_layers()
                .map(|(id, layer)| RouteLayerView {
                    id,
                    shapes: layer.drawn().cloned().collect(),
                })
                .collect(),
            table: self.renderer.table().to_vec(),
            render_count: self.renderer.render_count(),
        }
    }

    pub fn route_list(&self) -> RouteListView {
        RouteListView {
            selected: self.filter.current().clone(),
            initialized: self.filter.is_initialized(),
            options: self.filter.options().to_vec(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            credential_ready: self.credential.is_ready(),
            credential_resolved: self.credential.is_resolved(),
            catalog_loaded: self.catalog.is_loaded(),
            catalog_routes: self.catalog.len(),
            vehicles: self.feed.vehicles().len(),
            observed_routes: self.feed.observed_routes().len(),
            route_list_built: self.filter.is_initialized(),
            filter: self.filter.current().clone(),
            successful_polls: self.feed.successes(),
            failed_polls: self.feed.failures(),
            last_poll: self.feed.last_success(),
            render_count: self.renderer.render_count(),
        }
    }
}

/// Locks the session. A poisoned lock is recovered, since every mutation
/// leaves the session consistent before it can panic.
pub fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("⚠️  Session lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

// ============================================================================
// Background Tasks
// ============================================================================

pub async fn acquire_credential<S: TransitSource>(session: &SharedSession, source: &S) {
    let result = source.fetch_signed_url().await;
    lock(session).resolve_credential(result);
}

pub async fn load_catalog<S: TransitSource>(session: &SharedSession, source: &S) {
    let result = source.fetch_route_features().await;
    lock(session).apply_catalog(result);
}

pub async fn poll_once<S: TransitSource>(session: &SharedSession, source: &S) -> PollOutcome {
    let signed_url = lock(session).credential().signed_url().map(str::to_string);
    let signed_url = match signed_url {
        Ok(url) => url,
        Err(e) => {
            warn!("⏸️  Skipping vehicle poll: {}", e);
            return PollOutcome::Skipped;
        }
    };

    let result = source.fetch_vehicles(&signed_url).await;
    lock(session).apply_poll(result)
}

/// Startup and polling. The catalog loads on its own task; the first poll
/// waits for the credential request to finish, then polling repeats every
/// `every` for the life of the process.
pub async fn run_pipeline<S: TransitSource>(session: SharedSession, source: Arc<S>, every: Duration) {
    let catalog_session = session.clone();
    let catalog_source = source.clone();
    tokio::spawn(async move {
        load_catalog(&catalog_session, catalog_source.as_ref()).await;
    });

    acquire_credential(&session, source.as_ref()).await;

    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("🔄 Polling vehicle positions every {} ms", every.as_millis());

    loop {
        interval.tick().await;
        match poll_once(&session, source.as_ref()).await {
            PollOutcome::Updated => {
                let guard = lock(&session);
                info!(
                    "✓ Vehicle poll rendered {} of {} vehicles (filter '{}')",
                    guard.renderer().table().len(),
                    guard.vehicles().len(),
                    guard.filter().current()
                );
            }
            PollOutcome::Failed | PollOutcome::Skipped => {}
        }
    }
}
