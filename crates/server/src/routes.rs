//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Uploads are streamed to storage, so node routes carry no body limit.
    let node_routes = Router::new()
        .route(
            "/node",
            get(handlers::list_nodes).post(handlers::create_node),
        )
        .route(
            "/node/",
            get(handlers::list_nodes).post(handlers::create_node),
        )
        .route(
            "/node/{id}",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .layer(DefaultBodyLimit::disable());

    let api_routes = Router::new()
        .route("/", get(handlers::service_info))
        .route("/health", get(handlers::health_check))
        .route("/preauth/{token}", get(handlers::fetch_preauth))
        // Admin endpoints (all require the node:admin scope)
        .route(
            "/admin/tokens",
            post(handlers::create_token).get(handlers::list_tokens),
        )
        .route(
            "/admin/tokens/{token_id}",
            delete(handlers::revoke_token),
        );

    let mut router = Router::new().merge(node_routes).merge(api_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
