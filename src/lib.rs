pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::{AppConfig, WarehouseConfig};
use crate::services::interaction::InteractionController;
use crate::services::session::SessionProvisioner;
use crate::services::stage::StageLocation;
use crate::services::upload_service::UploadService;
use crate::services::warehouse::WarehouseConnector;
use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::uploads::preview_csv,
        api::handlers::uploads::upload_csv,
        api::handlers::uploads::list_stage,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::uploads::PreviewResponse,
            api::handlers::uploads::UploadResponse,
            api::handlers::uploads::StageFileResponse,
            api::handlers::uploads::StageListingResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "uploads", description = "CSV preview and stage upload endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<InteractionController>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the interaction controller for `connector`, uploading to `@MY_FILES`.
    pub fn new(
        config: AppConfig,
        warehouse_config: WarehouseConfig,
        connector: Arc<dyn WarehouseConnector>,
    ) -> Self {
        let provisioner = SessionProvisioner::new(connector, warehouse_config);
        let uploader = UploadService::new(StageLocation::default(), config.scratch_dir.clone());
        let controller = InteractionController::new(provisioner, uploader, &config);

        Self {
            controller: Arc::new(controller),
            config,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/", get(api::handlers::pages::index))
        .route("/preview", post(api::handlers::pages::preview))
        .route("/upload", post(api::handlers::pages::upload))
        .route("/api/preview", post(api::handlers::uploads::preview_csv))
        .route("/api/upload", post(api::handlers::uploads::upload_csv))
        .route("/api/stage", get(api::handlers::uploads::list_stage))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_file_size.saturating_add(10 * 1024 * 1024), // Add 10MB buffer for multipart overhead
        ))
        .with_state(state)
}
