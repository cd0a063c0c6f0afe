// Live transit map server with embedded frontend
// Polls the signed vehicle feed, renders the filtered overlay and serves it to the web UI

use actix_cors::Cors;
use actix_files as fs;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod catalog;
mod config;
mod credential;
mod error;
mod feed;
mod filter;
mod models;
mod render;
mod session;
mod source;

use config::{Config, MapConfig};
use error::TransitError;
use session::{Session, SharedSession, lock};
use source::HttpTransitSource;

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/index.html");
const TRANSIT_JS: &str = include_str!("../static/transit-map.js");

#[derive(Clone)]
struct AppState {
    session: SharedSession,
    map_config: MapConfig,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Deserialize)]
struct FilterRequest {
    route: String,
}

#[derive(Deserialize)]
struct HoverRequest {
    route: String,
    active: bool,
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
        .body(TRANSIT_JS)
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_overlay(state: web::Data<AppState>) -> HttpResponse {
    let session = lock(&state.session);
    HttpResponse::Ok().json(ApiResponse::success(session.overlay()))
}

async fn get_vehicles(state: web::Data<AppState>) -> HttpResponse {
    let session = lock(&state.session);
    HttpResponse::Ok().json(ApiResponse::success(session.vehicles()))
}

async fn get_routes(state: web::Data<AppState>) -> HttpResponse {
    let session = lock(&state.session);
    HttpResponse::Ok().json(ApiResponse::success(session.route_list()))
}

async fn set_filter(state: web::Data<AppState>, body: web::Json<FilterRequest>) -> HttpResponse {
    let mut session = lock(&state.session);

    match session.select_route(&body.route) {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(session.overlay())),
        Err(e @ TransitError::UnknownRoute(_)) => {
            HttpResponse::BadRequest().json(ApiResponse::<String>::error(e.to_string()))
        }
        Err(e) => {
            warn!("⚠️  Filter change failed: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error(e.to_string()))
        }
    }
}

async fn set_hover(state: web::Data<AppState>, body: web::Json<HoverRequest>) -> HttpResponse {
    let changed = lock(&state.session).hover_route(&body.route, body.active);
    HttpResponse::Ok().json(ApiResponse::success(changed))
}

async fn get_map_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(&state.map_config))
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    let session = lock(&state.session);
    HttpResponse::Ok().json(ApiResponse::success(session.stats()))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Live Transit Map",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp(),
        "embedded_frontend": true
    }))
}

fn api_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(serve_index))
        .route("/transit-map.js", web::get().to(serve_js))
        .route("/health", web::get().to(health_check))
        .service(
            web::scope("/api/transit")
                .route("/overlay", web::get().to(get_overlay))
                .route("/vehicles", web::get().to(get_vehicles))
                .route("/routes", web::get().to(get_routes))
                .route("/filter", web::post().to(set_filter))
                .route("/hover", web::post().to(set_hover))
                .route("/map-config", web::get().to(get_map_config))
                .route("/stats", web::get().to(get_stats)),
        );
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(config: Config, source: HttpTransitSource) -> std::io::Result<()> {
    let app_state = AppState {
        session: Session::new(config.default_route.clone()).shared(),
        map_config: MapConfig::from_config(&config),
    };

    // Credential, catalog and vehicle polling
    tokio::spawn(session::run_pipeline(
        app_state.session.clone(),
        Arc::new(source),
        config.refresh_interval(),
    ));

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🚌 Live Transit Map Server (Embedded UI)                 ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://{}:{}", config.bind, config.port);
    println!("📡 API available at: http://localhost:{}/api/transit", config.port);
    println!("🗺️  Route geometry: {}", config.routes_source);
    println!("🔄 Vehicle refresh: every {} ms\n", config.refresh_interval_ms);

    println!("📍 Available Routes:");
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│   GET  /                           - Web UI (embedded)      │");
    println!("│   GET  /data/*                     - Static files           │");
    println!("│   GET  /api/transit/overlay        - Rendered overlay       │");
    println!("│   GET  /api/transit/vehicles       - Vehicle snapshot       │");
    println!("│   GET  /api/transit/routes         - Route list             │");
    println!("│   POST /api/transit/filter         - Change route filter    │");
    println!("│   POST /api/transit/hover          - Route hover state      │");
    println!("│   GET  /api/transit/map-config     - Map settings           │");
    println!("│   GET  /api/transit/stats          - Session statistics     │");
    println!("│   GET  /health                     - Health check           │");
    println!("└─────────────────────────────────────────────────────────────┘\n");

    let static_dir = config.static_dir.clone();
    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(api_routes)
            .service(fs::Files::new("/data", &static_dir))
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source = match HttpTransitSource::from_config(&config) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ Failed to set up transit source: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "🚀 Starting transit map (default route '{}', times in {})",
        config.default_route, config.timezone
    );

    actix_web::rt::System::new().block_on(run_server(config, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use crate::models::Vehicle;

    fn vehicle(id: &str, route: &str, speed: f64) -> Vehicle {
        Vehicle {
            id: id.into(),
            label: id.into(),
            latitude: 30.27,
            longitude: -97.74,
            speed,
            observed_at: "11/14/2023, 4:13:20 PM".into(),
            route_id: route.into(),
        }
    }

    fn state_with(vehicles: Vec<Vehicle>) -> AppState {
        let mut session = Session::new("20");
        session.apply_poll(Ok(vehicles));
        AppState {
            session: session.shared(),
            map_config: MapConfig::from_config(&Config::parse_from(["transit-map"])),
        }
    }

    #[actix_web::test]
    async fn overlay_reflects_default_filter() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with(vec![vehicle("v1", "20", 10.0), vehicle("v2", "9", 0.0)])))
                .configure(api_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/transit/overlay").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["filter"], "20");
        assert_eq!(body["data"]["markers"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["table"][0]["speed_mph"], "22.4");
    }

    #[actix_web::test]
    async fn filter_change_rerenders_and_rejects_unknown_routes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with(vec![vehicle("v1", "20", 10.0), vehicle("v2", "9", 0.0)])))
                .configure(api_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/transit/filter")
            .set_json(serde_json::json!({"route": "all"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["filter"], "all");
        assert_eq!(body["data"]["table"].as_array().unwrap().len(), 2);

        let req = test::TestRequest::post()
            .uri("/api/transit/filter")
            .set_json(serde_json::json!({"route": "42"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn route_list_lists_all_then_numeric_routes() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with(vec![
                    vehicle("a", "9", 1.0),
                    vehicle("b", "20", 1.0),
                    vehicle("c", "3", 1.0),
                ])))
                .configure(api_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/transit/routes").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let values: Vec<_> = body["data"]["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["value"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["all", "3", "9", "20"]);
        assert_eq!(body["data"]["selected"], "20");
    }

    #[actix_web::test]
    async fn hover_raises_route_in_all_routes_overlay() {
        let mut session = Session::new("20");
        session.apply_catalog(crate::catalog::parse_feature_collection(&serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"ROUTE_ID": "9"}},
                {"type": "Feature", "geometry": null, "properties": {"ROUTE_ID": "20"}}
            ]
        }).to_string()));
        session.apply_poll(Ok(vec![vehicle("v1", "20", 10.0), vehicle("v2", "9", 0.0)]));
        session.select_route("all").unwrap();
        let state = AppState {
            session: session.shared(),
            map_config: MapConfig::from_config(&Config::parse_from(["transit-map"])),
        };
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(api_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/transit/hover")
            .set_json(serde_json::json!({"route": "9", "active": true}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"], true);

        let req = test::TestRequest::get().uri("/api/transit/overlay").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let shapes = body["data"]["route_layers"][0]["shapes"].as_array().unwrap();
        assert_eq!(shapes.last().unwrap()["route_id"], "9");
        assert_eq!(shapes.last().unwrap()["style"]["weight"], 5.0);
    }

    #[actix_web::test]
    async fn endpoints_keep_serving_after_a_poisoned_lock() {
        let state = state_with(vec![vehicle("v1", "20", 10.0)]);
        let poisoner = state.session.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poll task panicked while holding the session");
        })
        .join();
        assert!(state.session.is_poisoned());

        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(api_routes)).await;
        for uri in ["/api/transit/overlay", "/api/transit/vehicles", "/api/transit/routes", "/api/transit/stats"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["success"], true, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn serves_embedded_frontend_and_health() {
        let app = test::init_service(App::new().app_data(web::Data::new(state_with(vec![]))).configure(api_routes)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }
}
