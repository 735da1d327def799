use axum::routing::get;
use axum::Router;

use crate::api::handlers::{self, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Schema summary
        .route("/rest/v1/schema", get(handlers::get_schema_summary))
        // The singular system root: no create/delete surface.
        .route(
            "/rest/v1/system",
            get(handlers::get_root)
                .put(handlers::put_root)
                .patch(handlers::patch_root),
        )
        // Everything below the root resolves through the path engine.
        .route(
            "/rest/v1/system/*path",
            get(handlers::get_path)
                .post(handlers::post_path)
                .put(handlers::put_path)
                .patch(handlers::patch_path)
                .delete(handlers::delete_path),
        )
        .with_state(state)
}
